//! Host-side doubles for the collaborators behind [`MemoryContext`]: a
//! heap-backed "physical" region, a scripted replacement policy, an
//! in-memory block device, and a page-table map per process. Frame addresses
//! handed out by the allocator under test are real host addresses into the
//! region, so scrubbing, copying, and disk round-trips exercise the same
//! pointer arithmetic as the kernel paths.

use crate::block::{BLOCK_SECTOR_SIZE, BlockDevice, BlockSector, SECTORS_PER_FRAME};
use crate::mem::FrameAllocator;
use crate::swapping::{PageReplacementPolicy, SwapTable};
use crate::system::{MemoryContext, MemorySystem, Pid, ProcessMemory};
use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec;
use core::ops::Range;
use newtos_shared::mem::PAGE_FRAME_SIZE;
use newtos_shared::paging::{Mapping, PageTableEntry};

pub const TEST_PID: Pid = 7;

/// One frame of fake physical memory, aligned like the real thing.
#[derive(Clone)]
#[repr(align(4096))]
pub struct PageBuf(pub [u8; PAGE_FRAME_SIZE]);

/// Allocate `frames` page-aligned frames on the heap and return them with
/// the address range they occupy. The region must outlive any allocator
/// registered over it.
pub fn phys_region(frames: usize) -> (Box<[PageBuf]>, Range<usize>) {
    let region = vec![PageBuf([0; PAGE_FRAME_SIZE]); frames].into_boxed_slice();
    let start = region.as_ptr() as usize;
    (region, start..start + frames * PAGE_FRAME_SIZE)
}

pub fn fill_frame(frame: usize, byte: u8) {
    unsafe { core::ptr::write_bytes(frame as *mut u8, byte, PAGE_FRAME_SIZE) };
}

pub fn frame_byte(frame: usize, offset: usize) -> u8 {
    debug_assert!(offset < PAGE_FRAME_SIZE);
    unsafe { *((frame + offset) as *const u8) }
}

#[derive(Default)]
pub struct TestProcess {
    pub entries: BTreeMap<usize, PageTableEntry>,
    pub resident: isize,
    pub killed: bool,
    pub tlb_flushes: usize,
}

/// Page tables and accounting for every process the tests touch, plus the
/// faulting context the real kernel would read from trap state.
pub struct Processes {
    pub table: BTreeMap<Pid, TestProcess>,
    pub current: Pid,
    pub fault_addr: usize,
}

impl Default for Processes {
    fn default() -> Self {
        Self {
            table: BTreeMap::new(),
            current: TEST_PID,
            fault_addr: 0,
        }
    }
}

impl Processes {
    pub fn process(&mut self, pid: Pid) -> &mut TestProcess {
        self.table.entry(pid).or_default()
    }
}

impl ProcessMemory for Processes {
    fn current_pid(&self) -> Pid {
        self.current
    }

    fn fault_address(&self) -> usize {
        self.fault_addr
    }

    fn entry(&mut self, pid: Pid, addr: usize, allocate: bool) -> Option<PageTableEntry> {
        let entries = &mut self.process(pid).entries;
        if allocate {
            return Some(*entries.entry(addr).or_insert(PageTableEntry::DEFAULT));
        }
        entries.get(&addr).copied()
    }

    fn set_entry(&mut self, pid: Pid, addr: usize, entry: PageTableEntry) {
        self.process(pid).entries.insert(addr, entry);
    }

    fn add_resident(&mut self, pid: Pid, frames: isize) {
        self.process(pid).resident += frames;
    }

    fn flush_tlb(&mut self, pid: Pid) {
        self.process(pid).tlb_flushes += 1;
    }

    fn mark_killed(&mut self, pid: Pid) {
        self.process(pid).killed = true;
    }
}

/// Replacement policy that plays back a queue of victim pages. Victims
/// pushed to `after_reset` only become eligible once access tracking is
/// cleared, which lets tests drive the retry path.
pub struct ScriptedPolicy {
    pub victim: Pid,
    pub eligible: VecDeque<usize>,
    pub after_reset: VecDeque<usize>,
    pub resets: usize,
}

impl ScriptedPolicy {
    pub fn new(victim: Pid) -> Self {
        Self {
            victim,
            eligible: VecDeque::new(),
            after_reset: VecDeque::new(),
            resets: 0,
        }
    }
}

impl PageReplacementPolicy for ScriptedPolicy {
    fn select_victim_process(&mut self) -> Pid {
        self.victim
    }

    fn select_victim_page(&mut self, _pid: Pid) -> Option<usize> {
        self.eligible.pop_front()
    }

    fn reset_access_tracking(&mut self, _pid: Pid) {
        self.resets += 1;
        while let Some(page) = self.after_reset.pop_front() {
            self.eligible.push_back(page);
        }
    }
}

/// Sparse in-memory block device; unwritten sectors read back as zeros.
#[derive(Default)]
pub struct RamDisk {
    pub sectors: BTreeMap<BlockSector, [u8; BLOCK_SECTOR_SIZE]>,
}

impl BlockDevice for RamDisk {
    fn read(&mut self, sector: BlockSector, buffer: &mut [u8; BLOCK_SECTOR_SIZE]) {
        *buffer = self.sectors.get(&sector).copied().unwrap_or([0; BLOCK_SECTOR_SIZE]);
    }

    fn write(&mut self, sector: BlockSector, buffer: &[u8; BLOCK_SECTOR_SIZE]) {
        self.sectors.insert(sector, *buffer);
    }
}

/// A whole memory subsystem over fake hardware: `frames` registered frames
/// and `swap_slots` frame-sized swap slots.
pub struct TestRig {
    _region: Box<[PageBuf]>,
    pub floor: usize,
    pub system: MemorySystem,
    pub processes: Processes,
    pub policy: ScriptedPolicy,
    pub disk: RamDisk,
}

impl TestRig {
    pub fn new(frames: usize, swap_slots: usize) -> Self {
        let (region, range) = phys_region(frames);
        let floor = range.start;
        let mut allocator = FrameAllocator::new(range.start, range.end);
        unsafe { allocator.init_early(range) };
        let swap = SwapTable::new((swap_slots * SECTORS_PER_FRAME) as u32);
        Self {
            _region: region,
            floor,
            system: MemorySystem::new(allocator, swap),
            processes: Processes::default(),
            policy: ScriptedPolicy::new(TEST_PID),
            disk: RamDisk::default(),
        }
    }

    /// Run `f` against the system with the rig's collaborators bundled the
    /// way real call sites bundle theirs.
    pub fn run<R>(&mut self, f: impl FnOnce(&MemorySystem, &mut MemoryContext) -> R) -> R {
        let mut ctx = MemoryContext {
            policy: &mut self.policy,
            process: &mut self.processes,
            device: &mut self.disk,
        };
        f(&self.system, &mut ctx)
    }

    /// Allocate a frame and map it at `addr` for [`TEST_PID`], returning
    /// the frame address.
    pub fn map_resident(&mut self, addr: usize, writable: bool) -> usize {
        let frame = self
            .system
            .frames
            .try_allocate()
            .expect("a free frame for the mapping");
        let entry = PageTableEntry::from_mapping(Mapping::Resident { frame, flags: 0 })
            .with_user(true)
            .with_writable(writable);
        self.processes.process(TEST_PID).entries.insert(addr, entry);
        frame
    }

    /// [`TEST_PID`]'s entry at `addr`; the mapping must exist.
    pub fn entry(&mut self, addr: usize) -> PageTableEntry {
        self.processes.process(TEST_PID).entries[&addr]
    }
}
