use crate::system::{MemoryContext, MemorySystem};
use core::ptr::copy_nonoverlapping;
use newtos_shared::mem::{KERNEL_BASE, PAGE_FRAME_SIZE};
use newtos_shared::paging::{Mapping, PageTableEntry};

impl MemorySystem {
    /// Generic not-present fault entry point: reads the faulting address
    /// and process from the collaborator and swaps the page back in.
    pub fn page_fault(&self, ctx: &mut MemoryContext) {
        let pid = ctx.process.current_pid();
        let addr = ctx.process.fault_address();
        self.swap_in(ctx, pid, addr);
    }

    /// Present-but-read-only fault: copy-on-write resolution.
    ///
    /// The sole owner of a shared frame just gets the writable bit back; a
    /// process sharing the frame gets a private copy and relinquishes its
    /// claim on the original. A missing entry, a non-user page, a kernel
    /// address, or an unreferenced frame each signal a distinct kernel bug
    /// and abort.
    pub fn copy_on_write_fault(&self, ctx: &mut MemoryContext) {
        let pid = ctx.process.current_pid();
        let addr = ctx.process.fault_address();

        let entry = ctx
            .process
            .entry(pid, addr, false)
            .unwrap_or_else(|| panic!("write fault at {addr:#x} with no page-table entry"));

        // A cleared present bit means the page went to swap, not that the
        // write was illegal.
        if !entry.present() {
            self.swap_in(ctx, pid, addr);
            return;
        }
        if !entry.user() {
            panic!("write fault on non-user page at {addr:#x}");
        }
        if addr >= KERNEL_BASE {
            panic!("write fault in kernel space at {addr:#x}");
        }

        let Mapping::Resident { frame, .. } = entry.mapping() else {
            unreachable!("present entries decode as resident");
        };

        match self.frames.refcount(frame) {
            0 => panic!("write fault on unreferenced frame {frame:#x}"),
            1 => {
                // Sole owner: upgrade in place.
                ctx.process.set_entry(pid, addr, entry.with_writable(true));
                ctx.process.flush_tlb(pid);
            }
            _ => {
                let Ok(copy) = self.allocate_frame(ctx) else {
                    // The one exhaustion charged to the process instead of
                    // the kernel.
                    log::warn!("killing pid {pid}: no frame for copy-on-write at {addr:#x}");
                    ctx.process.mark_killed(pid);
                    return;
                };
                unsafe {
                    copy_nonoverlapping(frame as *const u8, copy as *mut u8, PAGE_FRAME_SIZE);
                }
                ctx.process.set_entry(
                    pid,
                    addr,
                    PageTableEntry::from_mapping(Mapping::Resident { frame: copy, flags: 0 })
                        .with_writable(true)
                        .with_user(true),
                );
                self.frames.decrement_refcount(frame);
                ctx.process.flush_tlb(pid);
            }
        }
    }
}
