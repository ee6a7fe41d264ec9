//! The capability a type must have to be recycled by [`super::stack::Stack`]:
//! a singly-linked successor field manipulable atomically. In a systems
//! language with compile-time trait/template checks this would be a
//! metaprogrammed constraint; here it is an ordinary trait bound, checked
//! mechanically by the compiler and costing nothing at runtime.

use std::sync::atomic::{AtomicPtr, Ordering};

/// Implemented by node types that can be threaded onto a free-node stack.
pub trait FreeNode: Sized {
    /// The intrusive link field used to chain this node into whichever
    /// tier currently holds it.
    fn next_link(&self) -> &AtomicPtr<Self>;

    fn get_next(&self) -> *mut Self {
        self.next_link().load(Ordering::Relaxed)
    }

    fn set_next(&self, next: *mut Self) {
        self.next_link().store(next, Ordering::Relaxed);
    }

    fn cas_next(&self, current: *mut Self, new: *mut Self) -> bool {
        self.next_link()
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }
}
