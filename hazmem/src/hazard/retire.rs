//! Retire list (component D): a per-slot bag of pointers a thread
//! believes logically deleted but which another thread's hazard
//! publication might still protect. Purely local state — no
//! synchronisation of its own; callers are responsible for ensuring only
//! the owning slot's thread ever touches it (see
//! [`super::registry::SlotHandle`]).

use std::cell::UnsafeCell;

/// A deferred deletion: the type-erased pointer plus the callback that
/// finishes reclaiming it once a scan proves safety.
pub(crate) struct RetireEntry {
    pub(crate) ptr: usize,
    pub(crate) deleter: Box<dyn Fn(usize) + Send>,
}

pub(crate) struct RetireList {
    entries: UnsafeCell<Vec<RetireEntry>>,
}

// SAFETY: a `RetireList` is reachable from multiple threads only through
// the process-wide slot registry, but every method here is only ever
// called by the single thread holding the owning `SlotHandle` — enforced
// by `SlotHandle` being `!Sync`. No two threads call into the same
// instance concurrently.
unsafe impl Sync for RetireList {}

impl RetireList {
    pub(crate) fn new() -> Self {
        Self {
            entries: UnsafeCell::new(Vec::new()),
        }
    }

    pub(crate) fn push(&self, entry: RetireEntry) {
        // SAFETY: single-writer invariant, see the `unsafe impl Sync` above.
        unsafe { (*self.entries.get()).push(entry) };
    }

    pub(crate) fn len(&self) -> usize {
        // SAFETY: see above.
        unsafe { (*self.entries.get()).len() }
    }

    /// Try to reclaim every entry for which `scan_fn(ptr)` returns `false`
    /// (meaning: no slot currently publishes it). Entries that are still
    /// hazardous are kept for a later pass.
    pub(crate) fn for_each_try_reclaim(&self, scan_fn: impl Fn(usize) -> bool) {
        // SAFETY: see above.
        let entries = unsafe { &mut *self.entries.get() };
        let mut i = 0;
        while i < entries.len() {
            if scan_fn(entries[i].ptr) {
                i += 1;
            } else {
                let entry = entries.swap_remove(i);
                (entry.deleter)(entry.ptr);
            }
        }
    }

    /// Move every remaining entry out to `sink`, leaving the list empty.
    /// Used when a slot is torn down with hazardous nodes still pending.
    pub(crate) fn drain_to(&self, sink: &mut impl FnMut(RetireEntry)) {
        // SAFETY: see above.
        let entries = unsafe { &mut *self.entries.get() };
        for entry in entries.drain(..) {
            sink(entry);
        }
    }
}
