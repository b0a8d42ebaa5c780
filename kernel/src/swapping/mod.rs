pub mod page_replacement;

pub use page_replacement::PageReplacementPolicy;

use crate::block::{BLOCK_SECTOR_SIZE, BlockDevice, BlockSector, SECTORS_PER_FRAME};
use crate::sync::mutex::Mutex;
use crate::system::{MemoryContext, MemorySystem, Pid};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ptr::copy_nonoverlapping;
use newtos_shared::paging::{Mapping, PageTableEntry};

/// First sector of the swap area on the backing device.
pub const SWAP_BASE_SECTOR: BlockSector = 2;

/// Index of a swap slot.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SlotId(usize);

impl SlotId {
    pub fn index(self) -> usize {
        self.0
    }
}

struct SwapSlot {
    free: bool,
    /// Permission bits of the page-table entry that referenced the evicted
    /// frame, restored verbatim at swap-in.
    flags: u64,
    base: BlockSector,
}

/// Fixed table of backing-store slots, one evicted frame each.
///
/// Slots map 1:1 onto sector ranges assigned at construction: slot `i`
/// spans [`SECTORS_PER_FRAME`] sectors starting at
/// `SWAP_BASE_SECTOR + i * SECTORS_PER_FRAME`. Its own lock domain,
/// separate from the frame allocator's, and never held across device I/O.
pub struct SwapTable {
    slots: Mutex<Box<[SwapSlot]>>,
}

impl SwapTable {
    /// Carve `total_sectors` of backing store into frame-sized slots;
    /// leftover sectors are unused.
    pub fn new(total_sectors: u32) -> Self {
        let count = total_sectors as usize / SECTORS_PER_FRAME;
        let slots = (0..count)
            .map(|i| SwapSlot {
                free: true,
                flags: 0,
                base: SWAP_BASE_SECTOR + (i * SECTORS_PER_FRAME) as BlockSector,
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        log::info!("swap table initialized, {count} slots");
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// First free slot. Swap-space exhaustion means the kernel cannot make
    /// progress, so it aborts rather than reporting an error.
    pub fn find_free_slot(&self) -> SlotId {
        let slots = self.slots.lock();
        match slots.iter().position(|slot| slot.free) {
            Some(index) => SlotId(index),
            None => panic!("no free swap slot available"),
        }
    }

    /// Mark `slot` occupied, recording the permission bits to restore at
    /// swap-in.
    pub fn occupy(&self, slot: SlotId, flags: u64) {
        let mut slots = self.slots.lock();
        let entry = &mut slots[slot.0];
        assert!(entry.free, "occupy: swap slot {} already in use", slot.0);
        entry.free = false;
        entry.flags = flags;
    }

    /// Free `slot` again. Only legal once its contents have been fully
    /// restored into a newly allocated frame.
    pub fn release(&self, slot: SlotId) {
        let mut slots = self.slots.lock();
        let entry = &mut slots[slot.0];
        assert!(!entry.free, "release: swap slot {} is not in use", slot.0);
        entry.free = true;
        entry.flags = 0;
    }

    /// Permission bits recorded when `slot` was occupied.
    pub fn flags(&self, slot: SlotId) -> u64 {
        self.slots.lock()[slot.0].flags
    }

    /// First sector of `slot`'s range.
    pub fn base_sector(&self, slot: SlotId) -> BlockSector {
        self.slots.lock()[slot.0].base
    }

    /// Recover the slot whose range starts at `sector`, the inverse of
    /// [`Self::base_sector`] for the value a swapped page-table entry
    /// carries.
    pub fn slot_of_sector(&self, sector: BlockSector) -> SlotId {
        assert!(sector >= SWAP_BASE_SECTOR, "sector {sector} below swap area");
        let index = (sector - SWAP_BASE_SECTOR) as usize / SECTORS_PER_FRAME;
        assert!(index < self.slots.lock().len(), "sector {sector} beyond swap area");
        SlotId(index)
    }

    pub fn free_slots(&self) -> usize {
        self.slots.lock().iter().filter(|slot| slot.free).count()
    }
}

/// Write the frame at `frame` to the sector run starting at `base`.
///
/// # Safety
///
/// `frame` must be the address of a live, readable page frame.
unsafe fn write_frame_to_disk(device: &mut dyn BlockDevice, frame: usize, base: BlockSector) {
    let mut buffer = [0u8; BLOCK_SECTOR_SIZE];
    let mut frame_ptr = frame as *const u8;
    for i in 0..SECTORS_PER_FRAME {
        copy_nonoverlapping(frame_ptr, buffer.as_mut_ptr(), BLOCK_SECTOR_SIZE);
        device.write(base + i as BlockSector, &buffer);
        frame_ptr = frame_ptr.add(BLOCK_SECTOR_SIZE);
    }
}

/// Fill the frame at `frame` from the sector run starting at `base`.
///
/// # Safety
///
/// `frame` must be the address of a live, writable page frame.
unsafe fn read_frame_from_disk(device: &mut dyn BlockDevice, frame: usize, base: BlockSector) {
    let mut buffer = [0u8; BLOCK_SECTOR_SIZE];
    let mut frame_ptr = frame as *mut u8;
    for i in 0..SECTORS_PER_FRAME {
        device.read(base + i as BlockSector, &mut buffer);
        copy_nonoverlapping(buffer.as_ptr(), frame_ptr, BLOCK_SECTOR_SIZE);
        frame_ptr = frame_ptr.add(BLOCK_SECTOR_SIZE);
    }
}

impl MemorySystem {
    /// Evict one page: pick a victim, persist its frame to a swap slot,
    /// free the frame, and retarget the victim's page-table entry at the
    /// slot.
    ///
    /// Invoked from [`Self::allocate_frame`] when the free list runs dry.
    /// It only frees frames, never allocates, so the allocate -> evict ->
    /// free chain stays one level deep. The exclusive `ctx` borrow keeps
    /// the whole sequence atomic with respect to fault resolution on the
    /// same entry, and no internal lock is held across the device write.
    ///
    /// Finding no victim even after an access-tracking reset, and finding
    /// no free slot, are both fatal: there is no evictable memory left.
    pub fn swap_out(&self, ctx: &mut MemoryContext) {
        let pid = ctx.policy.select_victim_process();
        let page = match ctx.policy.select_victim_page(pid) {
            Some(page) => page,
            None => {
                ctx.policy.reset_access_tracking(pid);
                match ctx.policy.select_victim_page(pid) {
                    Some(page) => page,
                    None => panic!("swap_out: no page to swap out"),
                }
            }
        };

        ctx.process.add_resident(pid, -1);

        let slot = self.swap.find_free_slot();
        let entry = ctx
            .process
            .entry(pid, page, false)
            .unwrap_or_else(|| panic!("swap_out: victim page {page:#x} has no page-table entry"));
        let Mapping::Resident { frame, flags } = entry.mapping() else {
            panic!("swap_out: victim page {page:#x} is not resident");
        };

        let base = self.swap.base_sector(slot);
        unsafe { write_frame_to_disk(ctx.device, frame, base) };
        self.swap.occupy(slot, flags);
        self.frames.free(frame);

        ctx.process.set_entry(
            pid,
            page,
            PageTableEntry::from_mapping(Mapping::Swapped { sector: base, flags }),
        );
        ctx.process.flush_tlb(pid);

        log::debug!("swapped out page {page:#x} of pid {pid} to sector {base}");
    }

    /// Resolve a not-present fault at `addr`: pull the page's image back
    /// from its swap slot into a fresh frame, release the slot, and make
    /// the entry resident again with its saved permissions (plus user).
    ///
    /// Shared by both fault entry points ([`Self::page_fault`] and
    /// [`Self::copy_on_write_fault`]) and behaves identically from both.
    pub fn swap_in(&self, ctx: &mut MemoryContext, pid: Pid, addr: usize) {
        let entry = ctx
            .process
            .entry(pid, addr, false)
            .unwrap_or_else(|| panic!("swap_in: fault at {addr:#x} with no page-table entry"));
        let Mapping::Swapped { sector, .. } = entry.mapping() else {
            panic!("swap_in: page at {addr:#x} is not swapped out");
        };

        let frame = match self.allocate_frame(ctx) {
            Ok(frame) => frame,
            Err(err) => panic!("swap_in: {err}"),
        };
        unsafe { read_frame_from_disk(ctx.device, frame, sector) };

        let slot = self.swap.slot_of_sector(sector);
        let flags = self.swap.flags(slot);
        self.swap.release(slot);

        ctx.process.set_entry(
            pid,
            addr,
            PageTableEntry::from_mapping(Mapping::Resident { frame, flags }).with_user(true),
        );
        ctx.process.add_resident(pid, 1);

        log::trace!("swapped in page {addr:#x} of pid {pid} from sector {sector}");
    }
}
