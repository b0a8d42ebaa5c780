use crate::block::BlockDevice;
use crate::mem::FrameAllocator;
use crate::swapping::{PageReplacementPolicy, SwapTable};
use alloc::boxed::Box;
use newtos_shared::paging::PageTableEntry;
use once_cell::race::OnceBox;

/// Process identifier.
pub type Pid = u32;

/// Page-table and accounting access to the processes whose memory this
/// subsystem manages.
///
/// Entries are read and written by value; the packed [`PageTableEntry`] is a
/// plain integer. An implementation backs these with its real page-table
/// walker and per-process bookkeeping. Calls arrive only from a context that
/// holds the collaborators exclusively (see [`MemoryContext`]), so the
/// implementation needs no locking of its own for this crate's sake.
pub trait ProcessMemory {
    /// Process the faulting execution context belongs to.
    fn current_pid(&self) -> Pid;
    /// Faulting virtual address (the CR2 analogue).
    fn fault_address(&self) -> usize;
    /// Page-table entry mapping `addr` in `pid`'s address space, if one
    /// exists. With `allocate` set, missing intermediate page-table pages
    /// are created and a default (unmapped) entry is returned.
    fn entry(&mut self, pid: Pid, addr: usize, allocate: bool) -> Option<PageTableEntry>;
    /// Overwrite the entry mapping `addr`. The entry must already exist.
    fn set_entry(&mut self, pid: Pid, addr: usize, entry: PageTableEntry);
    /// Adjust `pid`'s resident-set size by `frames` page frames.
    fn add_resident(&mut self, pid: Pid, frames: isize);
    /// Invalidate cached translations for `pid`'s address space.
    fn flush_tlb(&mut self, pid: Pid);
    /// Terminate `pid` for exhausting memory on its own behalf.
    fn mark_killed(&mut self, pid: Pid);
}

/// The external collaborators, threaded as one bundle through every
/// operation that may allocate, evict, or resolve a fault.
///
/// Holding the bundle by `&mut` is what serializes eviction against fault
/// resolution: while one sequence runs, no other caller can observe a
/// half-rewritten page-table entry.
pub struct MemoryContext<'a> {
    pub policy: &'a mut dyn PageReplacementPolicy,
    pub process: &'a mut dyn ProcessMemory,
    pub device: &'a mut dyn BlockDevice,
}

/// Top-level physical-memory state: the frame allocator and the swap slot
/// table, each its own lock domain.
///
/// Owned by the bootstrap context and passed by shared reference; a global
/// handle is available via [`init_memory_system`] for interrupt paths that
/// cannot take a parameter.
pub struct MemorySystem {
    pub frames: FrameAllocator,
    pub swap: SwapTable,
}

impl MemorySystem {
    pub fn new(frames: FrameAllocator, swap: SwapTable) -> Self {
        Self { frames, swap }
    }
}

static SYSTEM: OnceBox<MemorySystem> = OnceBox::new();

/// Install the global handle. Call once during bootstrap, after
/// [`FrameAllocator::init_early`] has registered the first physical range.
/// There is no teardown; the system lives until the machine halts.
pub fn init_memory_system(system: MemorySystem) {
    if SYSTEM.set(Box::new(system)).is_err() {
        panic!("memory system initialized twice");
    }
}

/// The installed system.
pub fn memory_system() -> &'static MemorySystem {
    SYSTEM.get().expect("memory system not initialized")
}
