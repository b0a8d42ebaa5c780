// https://wiki.osdev.org/Paging
//
// 64-bit entry layout. Bits 9-11 are ignored by the MMU; bit 9 is ours and
// marks an entry whose address field holds a swap sector instead of a frame.

use crate::mem::{PAGE_SHIFT, is_page_aligned};
use arbitrary_int::u40;
use bitbybit::bitfield;

/// Permission bits live in the low 12 bits of an entry.
pub const FLAGS_MASK: u64 = 0xFFF;

#[bitfield(u64, default = 0)]
pub struct PageTableEntry {
    #[bit(0, rw)]
    present: bool,
    #[bit(1, rw)]
    writable: bool,
    #[bit(2, rw)]
    user: bool,
    #[bit(3, rw)]
    write_through: bool,
    #[bit(4, rw)]
    cache_disable: bool,
    #[bit(5, rw)]
    accessed: bool,
    #[bit(6, rw)]
    dirty: bool,
    #[bit(8, rw)]
    global: bool,
    #[bit(9, rw)]
    swapped: bool,
    #[bits(12..=51, rw)]
    page_frame_number: u40,
}

/// A page-table entry as the memory subsystem sees it.
///
/// At most one of a resident frame and a swap slot backs a virtual page at
/// any time; the swap marker bit is what distinguishes `Swapped` from a page
/// that was never mapped. `flags` are the entry's low permission bits
/// ([`FLAGS_MASK`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mapping {
    Unmapped,
    Resident { frame: usize, flags: u64 },
    Swapped { sector: u32, flags: u64 },
}

impl PageTableEntry {
    pub fn permission_flags(self) -> u64 {
        self.raw_value() & FLAGS_MASK
    }

    /// Decode the packed entry. The sole counterpart of [`Self::from_mapping`].
    // Sector numbers fit comfortably in 32 bits (2 TB of swap).
    #[allow(clippy::cast_possible_truncation)]
    pub fn mapping(self) -> Mapping {
        if self.present() {
            Mapping::Resident {
                frame: (self.page_frame_number().value() as usize) << PAGE_SHIFT,
                flags: self.permission_flags(),
            }
        } else if self.swapped() {
            Mapping::Swapped {
                sector: self.page_frame_number().value() as u32,
                flags: self.permission_flags(),
            }
        } else {
            Mapping::Unmapped
        }
    }

    /// Encode a mapping as a packed entry. The present and swap-marker bits
    /// are forced to match the variant, whatever `flags` says.
    pub fn from_mapping(mapping: Mapping) -> Self {
        match mapping {
            Mapping::Unmapped => Self::DEFAULT,
            Mapping::Resident { frame, flags } => {
                debug_assert!(is_page_aligned(frame));
                Self::new_with_raw_value(flags & FLAGS_MASK)
                    .with_page_frame_number(u40::new((frame >> PAGE_SHIFT) as u64))
                    .with_swapped(false)
                    .with_present(true)
            }
            Mapping::Swapped { sector, flags } => {
                Self::new_with_raw_value(flags & FLAGS_MASK)
                    .with_page_frame_number(u40::new(u64::from(sector)))
                    .with_swapped(true)
                    .with_present(false)
            }
        }
    }
}
