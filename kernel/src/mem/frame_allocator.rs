use crate::sync::mutex::Mutex;
use alloc::boxed::Box;
use alloc::vec;
use core::ops::Range;
use core::ptr::NonNull;
use newtos_shared::mem::{PAGE_FRAME_SIZE, PAGE_SHIFT, is_page_aligned, page_round_up};

/// Byte written over every byte of a frame when its last owner frees it.
///
/// This is a documented postcondition of [`FrameAllocator::free`]: stale
/// reads through a dangling mapping see `0x01` everywhere (bar the first
/// few bytes, which the free list reuses for its link), never old data.
pub const SCRUB_BYTE: u8 = 0x01;

/// Link node stored inside each free frame; the frame's own storage is the
/// list's storage.
struct FreeFrame {
    next: Option<NonNull<FreeFrame>>,
}

/// Free list, cached free count, and reference counts: one consistency
/// domain under one lock. A reader can never observe the list and the
/// count table disagreeing.
struct FrameTable {
    /// Lowest allocatable frame address (first frame above the kernel's
    /// own footprint).
    floor: usize,
    /// One past the highest allocatable frame address.
    ceiling: usize,
    free_head: Option<NonNull<FreeFrame>>,
    free_count: usize,
    /// Owners per frame, indexed by `(addr - floor) >> PAGE_SHIFT`.
    /// 0 exactly when the frame is on the free list.
    refcounts: Box<[u16]>,
}

// The raw frame pointers are reachable only through the table.
unsafe impl Send for FrameTable {}

impl FrameTable {
    fn index(&self, addr: usize) -> usize {
        (addr - self.floor) >> PAGE_SHIFT
    }

    fn contains(&self, addr: usize) -> bool {
        addr >= self.floor && addr < self.ceiling
    }

    /// Scrub `addr` and push it onto the free list. The frame's count must
    /// already be 0 and the frame must be registered memory.
    unsafe fn push_free(&mut self, addr: usize) {
        debug_assert_eq!(self.refcounts[self.index(addr)], 0);
        core::ptr::write_bytes(addr as *mut u8, SCRUB_BYTE, PAGE_FRAME_SIZE);
        let node = addr as *mut FreeFrame;
        (*node).next = self.free_head;
        self.free_head = NonNull::new(node);
        self.free_count += 1;
    }

    fn pop_free(&mut self) -> Option<usize> {
        let node = self.free_head?;
        self.free_head = unsafe { node.as_ref().next };
        self.free_count -= 1;
        Some(node.as_ptr() as usize)
    }

    /// Register every full frame in `range` as free with count 0.
    unsafe fn free_range(&mut self, range: Range<usize>) {
        assert!(
            range.start >= self.floor && range.end <= self.ceiling,
            "frame range {:#x}..{:#x} outside allocator bounds",
            range.start,
            range.end,
        );
        let mut addr = page_round_up(range.start);
        while addr + PAGE_FRAME_SIZE <= range.end {
            let index = self.index(addr);
            self.refcounts[index] = 0;
            self.push_free(addr);
            addr += PAGE_FRAME_SIZE;
        }
    }
}

/// Physical page-frame allocator with per-frame reference counting.
///
/// Manages 4096-byte frames between a fixed floor and ceiling. A frame with
/// count 0 sits on the intrusive free list and nowhere else; a frame with
/// count >= 1 is owned by that many virtual mappings. All unsafety is
/// front-loaded into registration ([`Self::init_early`] /
/// [`Self::init_late`]): once a range is registered, the allocator owns it
/// and the remaining operations are safe.
///
/// Emptiness is not handled here. [`Self::try_allocate`] simply returns
/// `None`; the eviction-aware retry lives in
/// [`crate::system::MemorySystem::allocate_frame`].
pub struct FrameAllocator {
    table: Mutex<FrameTable>,
}

impl FrameAllocator {
    /// Fix the allocatable bounds and size the reference-count table.
    /// No frames are allocatable until a range is registered.
    pub fn new(floor: usize, ceiling: usize) -> Self {
        assert!(
            is_page_aligned(floor) && is_page_aligned(ceiling),
            "frame allocator bounds must be page-aligned"
        );
        assert!(floor < ceiling, "frame allocator range is empty");
        let frames = (ceiling - floor) >> PAGE_SHIFT;
        Self {
            table: Mutex::new(FrameTable {
                floor,
                ceiling,
                free_head: None,
                free_count: 0,
                refcounts: vec![0; frames].into_boxed_slice(),
            }),
        }
    }

    /// Phase-one registration, before full virtual-memory setup. Mutates
    /// through the exclusive borrow, so no lock is taken.
    ///
    /// # Safety
    ///
    /// Frames in `range` must be unused physical memory, mapped and
    /// exclusively owned by the caller, and only a single execution context
    /// may be running.
    pub unsafe fn init_early(&mut self, range: Range<usize>) {
        let table = self.table.get_mut();
        table.free_range(range);
        log::info!("registered {} early frames", table.free_count);
    }

    /// Phase-two registration of the remaining physical memory, under the
    /// lock.
    ///
    /// # Safety
    ///
    /// Frames in `range` must be unused physical memory, mapped and
    /// exclusively owned by the caller, and disjoint from every previously
    /// registered range.
    pub unsafe fn init_late(&self, range: Range<usize>) {
        let mut table = self.table.lock();
        table.free_range(range);
        log::info!("frame allocator ready, {} frames free", table.free_count);
    }

    /// Remove one frame from the free list and hand it to the caller with
    /// reference count exactly 1. The contents are whatever the scrub left
    /// behind; the caller initializes the frame.
    pub fn try_allocate(&self) -> Option<usize> {
        let mut table = self.table.lock();
        let addr = table.pop_free()?;
        let index = table.index(addr);
        debug_assert_eq!(table.refcounts[index], 0);
        table.refcounts[index] = 1;
        Some(addr)
    }

    /// Release one owner's claim on `addr`.
    ///
    /// When the last owner releases, the frame is scrubbed with
    /// [`SCRUB_BYTE`] and returned to the free list. While other owners
    /// remain (copy-on-write sharing), this only decrements; the frame
    /// stays allocated and untouched.
    ///
    /// A misaligned or out-of-range address, or a free of a frame nobody
    /// owns, is a broken invariant elsewhere in the kernel and aborts.
    pub fn free(&self, addr: usize) {
        let mut table = self.table.lock();
        if !is_page_aligned(addr) || !table.contains(addr) {
            panic!("free: bad frame address {addr:#x}");
        }
        let index = table.index(addr);
        if table.refcounts[index] == 0 {
            panic!("free: reference count underflow on frame {addr:#x}");
        }
        table.refcounts[index] -= 1;
        if table.refcounts[index] == 0 {
            // Last owner gone; the frame is registered memory, so the
            // table may scrub and relink it.
            unsafe { table.push_free(addr) };
        }
    }

    /// Record one more owner of an allocated frame (fork-style sharing).
    pub fn increment_refcount(&self, addr: usize) {
        let mut table = self.table.lock();
        if !table.contains(addr) {
            panic!("increment_refcount: frame {addr:#x} outside allocatable range");
        }
        let index = table.index(addr);
        table.refcounts[index] += 1;
    }

    /// Drop one owner without freeing, even if the count reaches 0. Used
    /// when a mapping is handed over rather than torn down.
    pub fn decrement_refcount(&self, addr: usize) {
        let mut table = self.table.lock();
        if !table.contains(addr) {
            panic!("decrement_refcount: frame {addr:#x} outside allocatable range");
        }
        let index = table.index(addr);
        if table.refcounts[index] == 0 {
            panic!("decrement_refcount: reference count underflow on frame {addr:#x}");
        }
        table.refcounts[index] -= 1;
    }

    /// Current owner count of `addr`. 0 for a free (or never-allocated)
    /// frame.
    pub fn refcount(&self, addr: usize) -> usize {
        let table = self.table.lock();
        if !table.contains(addr) {
            panic!("refcount: frame {addr:#x} outside allocatable range");
        }
        usize::from(table.refcounts[table.index(addr)])
    }

    /// Cached number of free frames.
    pub fn free_frames(&self) -> usize {
        self.table.lock().free_count
    }
}
