/// Size of a physical page frame in bytes.
pub const PAGE_FRAME_SIZE: usize = 4096;

/// Shift between a frame's physical address and its frame number.
pub const PAGE_SHIFT: usize = 12;

/// Bottom of the higher-half kernel mapping. A user-visible fault at or
/// above this address is a kernel bug, not something to resolve.
pub const KERNEL_BASE: usize = 0xFFFF_8000_0000_0000;

/// Round `addr` up to the next frame boundary.
pub const fn page_round_up(addr: usize) -> usize {
    (addr + PAGE_FRAME_SIZE - 1) & !(PAGE_FRAME_SIZE - 1)
}

/// Round `addr` down to the containing frame boundary.
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_FRAME_SIZE - 1)
}

pub const fn is_page_aligned(addr: usize) -> bool {
    addr % PAGE_FRAME_SIZE == 0
}
