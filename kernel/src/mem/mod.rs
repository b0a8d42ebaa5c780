pub mod fault;
pub mod frame_allocator;

pub use frame_allocator::FrameAllocator;

use crate::system::{MemoryContext, MemorySystem};
use core::fmt;

/// Passes at the free list per allocation, with one eviction between
/// consecutive passes. Eviction either frees a frame or aborts, so two
/// passes suffice; the bound exists so that an eviction which frees nothing
/// (the victim frame was still shared) terminates instead of recursing.
const MAX_ALLOCATION_ATTEMPTS: usize = 2;

/// Frame exhaustion that survived eviction.
///
/// Every caller treats this as fatal except the copy-on-write shared-copy
/// path, which charges it to the faulting process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfFrames;

impl fmt::Display for OutOfFrames {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "out of physical frames, even after eviction")
    }
}

impl core::error::Error for OutOfFrames {}

impl MemorySystem {
    /// Allocate one frame, evicting a page to the swap device if the free
    /// list is empty. The returned frame has reference count exactly 1.
    ///
    /// Transient exhaustion is recovered here and is invisible to the
    /// caller; [`OutOfFrames`] comes back only when eviction itself could
    /// not free a frame.
    pub fn allocate_frame(&self, ctx: &mut MemoryContext) -> Result<usize, OutOfFrames> {
        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            if let Some(frame) = self.frames.try_allocate() {
                return Ok(frame);
            }
            log::debug!("free list empty, swapping out a page");
            self.swap_out(ctx);
        }
        Err(OutOfFrames)
    }
}
