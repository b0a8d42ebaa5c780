use crate::system::Pid;

/// Victim selection, supplied by the process manager.
///
/// The eviction engine asks for a process, then for an evictable page of
/// that process (never a page holding page-table structures). Selection is
/// serialized by the exclusive collaborator borrow in
/// [`crate::system::MemoryContext`]; implementations need no extra locking
/// against this crate.
pub trait PageReplacementPolicy {
    /// Pick the process to take a frame from.
    fn select_victim_process(&mut self) -> Pid;

    /// Virtual address of an evictable page of `pid`, or `None` if no page
    /// is currently eligible (e.g. everything was accessed recently).
    fn select_victim_page(&mut self, pid: Pid) -> Option<usize>;

    /// Clear per-page access tracking for `pid` so that a retried
    /// [`Self::select_victim_page`] can find a victim.
    fn reset_access_tracking(&mut self, pid: Pid);
}
