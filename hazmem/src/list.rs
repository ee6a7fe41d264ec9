//! Lock-free linked list primitive (component F): `push_front`,
//! `push_back`, `pop_front`, `iterate_snapshot`. CAS-based `next`
//! manipulation for insertion and deletion; traversal is hazard-pointer
//! protected. Deleted nodes are handed to this list's own free-node
//! stack rather than freed directly — the container-level half of the
//! control flow `recycle::Stack` describes from the node-pool side.
//!
//! Grounded on the teacher's `sync::lockfree_queue` Michael-Scott shape,
//! generalized from a FIFO queue to a list supporting both ends.

use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::ptr::NonNull;

use crate::error::Result;
use crate::hazard;
use crate::logging::{self, Severity};
use crate::recycle::{FreeNode, Stack};

struct ListNode<V> {
    next: AtomicPtr<ListNode<V>>,
    value: ManuallyDrop<V>,
}

impl<V> FreeNode for ListNode<V> {
    fn next_link(&self) -> &AtomicPtr<Self> {
        &self.next
    }
}

/// A lock-free singly-linked list. Nodes removed from the list are
/// recycled through an internal [`Stack`] of the same node type rather
/// than deallocated, so sustained push/pop churn need not keep hitting
/// the allocator.
pub struct List<V> {
    head: AtomicPtr<ListNode<V>>,
    free: Stack<ListNode<V>>,
}

// SAFETY: all mutable state is atomic or owned by the internal `Stack`,
// which is itself `Send + Sync`.
unsafe impl<V: Send> Send for List<V> {}
unsafe impl<V: Send> Sync for List<V> {}

impl<V> List<V> {
    /// Create an empty list. Fails only if the internal free-node
    /// stack's dynamic TLS key cannot be created.
    pub fn new() -> Result<Self> {
        Ok(Self {
            head: AtomicPtr::new(std::ptr::null_mut()),
            free: Stack::new()?,
        })
    }

    fn acquire_node(&self, value: V) -> NonNull<ListNode<V>> {
        if let Some(mut reused) = self.free.pop() {
            // SAFETY: `reused` just came off the free-node stack, which
            // only ever holds nodes unlinked from this list with their
            // old value already moved out by `pop_front`.
            unsafe {
                reused.as_ref().next.store(std::ptr::null_mut(), Ordering::Relaxed);
                std::ptr::write(&mut reused.as_mut().value, ManuallyDrop::new(value));
            }
            reused
        } else {
            let boxed = Box::new(ListNode {
                next: AtomicPtr::new(std::ptr::null_mut()),
                value: ManuallyDrop::new(value),
            });
            NonNull::new(Box::into_raw(boxed)).unwrap()
        }
    }

    /// Insert `value` at the head of the list.
    pub fn push_front(&self, value: V) {
        let node = self.acquire_node(value);
        loop {
            let head = self.head.load(Ordering::Acquire);
            // SAFETY: `node` is exclusively ours until linked in.
            unsafe { node.as_ref().next.store(head, Ordering::Relaxed) };
            if self
                .head
                .compare_exchange_weak(head, node.as_ptr(), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Insert `value` at the tail of the list. Traverses to the current
    /// last node and CASes its `next`, retrying the whole traversal from
    /// `head` if another insertion raced past the node found.
    ///
    /// The walk hazard-protects two nodes at once (the current node and
    /// the candidate being advanced onto), the same double-reservation
    /// shape [`crate::recycle::Stack::pop`] uses against its Treiber
    /// stack: verifying a freshly read successor pointer requires
    /// re-reading it off its predecessor, which means the predecessor
    /// must still be safe to dereference at that point too.
    pub fn push_back(&self, value: V) {
        let node = self.acquire_node(value);
        let slot_a = hazard::acquire_slot();
        let slot_b = hazard::acquire_slot();
        'retry: loop {
            let head = self.head.load(Ordering::Acquire);
            if head.is_null() {
                if self
                    .head
                    .compare_exchange_weak(
                        std::ptr::null_mut(),
                        node.as_ptr(),
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    return;
                }
                continue;
            }

            slot_a.publish(head as usize);
            if self.head.load(Ordering::Acquire) != head {
                continue 'retry;
            }

            let mut last = head;
            let mut cur_slot = &slot_a;
            let mut next_slot = &slot_b;
            loop {
                // SAFETY: `last` is hazard-published by `cur_slot`.
                let next = unsafe { (*last).next.load(Ordering::Acquire) };
                if next.is_null() {
                    break;
                }
                next_slot.publish(next as usize);
                // SAFETY: `last` is still hazard-published by `cur_slot`,
                // unchanged since the read above.
                if unsafe { (*last).next.load(Ordering::Acquire) } != next {
                    continue 'retry;
                }
                last = next;
                std::mem::swap(&mut cur_slot, &mut next_slot);
            }

            // SAFETY: `last` is hazard-published by `cur_slot` with no
            // successor observed above.
            if unsafe { (*last).cas_next(std::ptr::null_mut(), node.as_ptr()) } {
                slot_a.clear();
                slot_b.clear();
                return;
            }
        }
    }

    /// Remove and return the value at the head of the list, or `None`.
    pub fn pop_front(&self) -> Option<V> {
        let slot = hazard::acquire_slot();
        loop {
            let head = self.head.load(Ordering::Acquire);
            if head.is_null() {
                return None;
            }
            slot.publish(head as usize);
            if self.head.load(Ordering::Acquire) != head {
                continue;
            }
            // SAFETY: `head` is hazard-published; it cannot be reclaimed
            // while we hold the publication.
            let next = unsafe { (*head).next.load(Ordering::Acquire) };
            if self
                .head
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                slot.clear();
                // SAFETY: the CAS above gave this thread exclusive
                // ownership of `head`; nothing else reads its value field
                // again.
                let value = unsafe { std::ptr::read(&(*head).value) };
                self.free.push(NonNull::new(head).unwrap());
                return Some(ManuallyDrop::into_inner(value));
            }
        }
    }

    /// Count the nodes currently on the live chain, walking it under
    /// hazard protection. Not linearizable against concurrent mutation,
    /// same caveat as [`Self::iterate_snapshot`] — a diagnostic, not a
    /// structural guarantee.
    pub fn count(&self) -> usize {
        let slot = hazard::acquire_slot();
        let mut n = 0;
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            slot.publish(cur as usize);
            n += 1;
            // SAFETY: `cur` is hazard-published for the duration of this
            // read.
            cur = unsafe { (*cur).next.load(Ordering::Acquire) };
        }
        n
    }

    /// Write a human-readable summary through the logger (spec §6).
    pub fn dump(&self, severity: Severity, id: impl std::fmt::Display) {
        logging::dump(severity, "list", id, &format!("count={}", self.count()));
    }
}

impl<V: Clone> List<V> {
    /// A hazard-protected snapshot of the list's current contents, head
    /// to tail. Not linearizable against concurrent mutation — a
    /// best-effort view, as the name says.
    pub fn iterate_snapshot(&self) -> Vec<V> {
        let slot = hazard::acquire_slot();
        let mut out = Vec::new();
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            slot.publish(cur as usize);
            // SAFETY: `cur` is hazard-published for the duration of this
            // read.
            let value = ManuallyDrop::into_inner(unsafe { (*cur).value.clone() });
            let next = unsafe { (*cur).next.load(Ordering::Acquire) };
            out.push(value);
            cur = next;
        }
        out
    }
}

impl<V> Drop for List<V> {
    fn drop(&mut self) {
        let mut cur = *self.head.get_mut();
        while !cur.is_null() {
            // SAFETY: `Drop` has exclusive access to the whole list.
            let next = unsafe { (*cur).next.load(Ordering::Relaxed) };
            let mut boxed = unsafe { Box::from_raw(cur) };
            // SAFETY: this node was never unlinked via `pop_front`, so
            // its value was never moved out and still needs dropping.
            unsafe { ManuallyDrop::drop(&mut boxed.value) };
            cur = next;
        }
        while let Some(recycled) = self.free.pop() {
            // SAFETY: every node on the free tier had its value already
            // moved out by `pop_front` before being pushed here.
            drop(unsafe { Box::from_raw(recycled.as_ptr()) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_reflects_live_chain_length() {
        let list: List<i32> = List::new().unwrap();
        assert_eq!(list.count(), 0);
        list.push_back(1);
        list.push_back(2);
        assert_eq!(list.count(), 2);
        list.pop_front();
        assert_eq!(list.count(), 1);
    }

    #[test]
    fn push_front_then_pop_front_is_lifo() {
        let list: List<i32> = List::new().unwrap();
        list.push_front(1);
        list.push_front(2);
        list.push_front(3);
        assert_eq!(list.pop_front(), Some(3));
        assert_eq!(list.pop_front(), Some(2));
        assert_eq!(list.pop_front(), Some(1));
        assert_eq!(list.pop_front(), None);
    }

    #[test]
    fn push_back_then_pop_front_is_fifo() {
        let list: List<i32> = List::new().unwrap();
        list.push_back(1);
        list.push_back(2);
        list.push_back(3);
        assert_eq!(list.pop_front(), Some(1));
        assert_eq!(list.pop_front(), Some(2));
        assert_eq!(list.pop_front(), Some(3));
    }

    #[test]
    fn iterate_snapshot_reflects_current_order() {
        let list: List<i32> = List::new().unwrap();
        list.push_back(1);
        list.push_back(2);
        list.push_back(3);
        assert_eq!(list.iterate_snapshot(), vec![1, 2, 3]);
    }

    #[test]
    fn recycled_nodes_are_reused_across_pop_and_push() {
        let list: List<i32> = List::new().unwrap();
        list.push_front(1);
        list.pop_front();
        list.push_front(2);
        assert_eq!(list.iterate_snapshot(), vec![2]);
    }

    #[test]
    fn concurrent_push_back_preserves_every_value() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let list = Arc::new(List::<i32>::new().unwrap());
        let mut handles = Vec::new();
        for t in 0..8 {
            let list = list.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    list.push_back(t * 50 + i);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let seen: HashSet<i32> = list.iterate_snapshot().into_iter().collect();
        assert_eq!(seen.len(), 400);
    }

    #[test]
    fn dropping_list_does_not_leak_or_double_drop_values() {
        use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
        use std::sync::Arc;

        struct DropCounter(Arc<AtomicUsize>);
        impl Drop for DropCounter {
            fn drop(&mut self) {
                self.0.fetch_add(1, AtomicOrdering::SeqCst);
            }
        }

        let counter = Arc::new(AtomicUsize::new(0));
        {
            let list: List<DropCounter> = List::new().unwrap();
            for _ in 0..5 {
                list.push_back(DropCounter(counter.clone()));
            }
            let _ = list.pop_front();
        }
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 5);
    }
}
