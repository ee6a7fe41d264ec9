//! Free-node stack (component E): the three-tier recycler. Grounded on
//! the teacher's `sync::lockfree_queue` for the Treiber-stack shape of
//! the lock-free tier, and on the hazard-pointer ABA-resistant pop
//! pattern from `other_examples`' `oliver-giersch-hazptr` crate, composed
//! with this crate's own [`crate::hazard`] and [`crate::tls`] modules for
//! the stash and consignment tiers the spec adds around it.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, Mutex};

use crate::hazard;
use crate::logging::{self, Severity};
use crate::recycle::node::FreeNode;
use crate::tls;

struct Shared<N: FreeNode> {
    free_head: AtomicPtr<N>,
    consignment: Mutex<*mut N>,
}

// SAFETY: `free_head` is atomic; `consignment`'s raw pointer is only ever
// touched while the mutex is held.
unsafe impl<N: FreeNode> Send for Shared<N> {}
unsafe impl<N: FreeNode> Sync for Shared<N> {}

/// A thread's stash of still-hazardous-when-last-seen nodes. Draining
/// into the consignment tier on drop is what keeps nodes from being lost
/// when the owning thread exits (spec invariant: no lost nodes).
struct Stash<N: FreeNode> {
    nodes: Vec<NonNull<N>>,
    shared: Arc<Shared<N>>,
}

// SAFETY: a `Stash<N>` lives behind a dynamic-TLS slot that only the
// owning thread ever dereferences while alive; the destructor that
// eventually drops it (at thread exit) is the sole other accessor, and
// it never races the owning thread's own use.
unsafe impl<N: FreeNode> Send for Stash<N> {}

impl<N: FreeNode> Drop for Stash<N> {
    fn drop(&mut self) {
        let mut head = self.shared.consignment.lock().unwrap();
        for n in self.nodes.drain(..) {
            // SAFETY: `n` is exclusively owned by this stash until pushed.
            unsafe { n.as_ref().set_next(*head) };
            *head = n.as_ptr();
        }
    }
}

/// Three-tier lock-free/locked free-node recycler for node type `N`.
/// Cloning shares the same tiers and thread-local stash key — clone
/// rather than construct a second `Stack` for the same logical pool.
pub struct Stack<N: FreeNode> {
    shared: Arc<Shared<N>>,
    stash_key: tls::Key<Stash<N>>,
    /// Per-thread reservation of the two hazard slots `pop_free_stack`
    /// needs (POP_HEAD, POP_NEXT in the original's fixed-index scheme).
    /// Reserved once per thread rather than acquired fresh on every pop,
    /// so the hot path does not churn the global hazard registry.
    pop_slots_key: tls::Key<(hazard::SlotHandle, hazard::SlotHandle)>,
}

impl<N: FreeNode> Clone for Stack<N> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            stash_key: self.stash_key,
            pop_slots_key: self.pop_slots_key,
        }
    }
}

impl<N: FreeNode> Stack<N> {
    /// Create a new, empty stack. Fails only if the dynamic TLS key space
    /// is exhausted.
    pub fn new() -> crate::error::Result<Self> {
        Ok(Self {
            shared: Arc::new(Shared {
                free_head: AtomicPtr::new(std::ptr::null_mut()),
                consignment: Mutex::new(std::ptr::null_mut()),
            }),
            stash_key: tls::Key::create(true)?,
            pop_slots_key: tls::Key::create(true)?,
        })
    }

    fn with_stash<R>(&self, f: impl FnOnce(&mut Stash<N>) -> R) -> R {
        let shared = self.shared.clone();
        self.stash_key.with_mut_or_init(
            || Stash {
                nodes: Vec::new(),
                shared,
            },
            f,
        )
    }

    fn with_pop_slots<R>(&self, f: impl FnOnce(&hazard::SlotHandle, &hazard::SlotHandle) -> R) -> R {
        self.pop_slots_key.with_mut_or_init(
            || (hazard::acquire_slot(), hazard::acquire_slot()),
            |(pop_head, pop_next)| f(pop_head, pop_next),
        )
    }

    /// Offer `n` for recycling. `n` must not currently be linked into any
    /// other structure.
    pub fn push(&self, n: NonNull<N>) {
        if let Ok(mut guard) = self.shared.consignment.try_lock() {
            // SAFETY: `n` is exclusively owned by the caller at push time.
            unsafe { n.as_ref().set_next(*guard) };
            *guard = n.as_ptr();
            if let Some(extra) = self.with_stash(|stash| stash.nodes.pop()) {
                // SAFETY: `extra` came out of this thread's own stash, so
                // no other owner exists.
                unsafe { extra.as_ref().set_next(*guard) };
                *guard = extra.as_ptr();
            }
            return;
        }

        if hazard::scan(n.as_ptr() as usize) {
            let candidate = self.with_stash(|stash| {
                let candidate = stash.nodes.pop();
                stash.nodes.push(n);
                candidate
            });
            if let Some(candidate) = candidate {
                if hazard::scan(candidate.as_ptr() as usize) {
                    self.with_stash(|stash| stash.nodes.push(candidate));
                } else {
                    self.push_free_stack(candidate);
                }
            }
        } else {
            self.push_free_stack(n);
        }
    }

    /// Obtain a recyclable node, or `None` if every tier is empty.
    pub fn pop(&self) -> Option<NonNull<N>> {
        if let Some(n) = self.with_stash(|stash| stash.nodes.pop()) {
            return Some(n);
        }
        if let Some(n) = self.try_pop_consignment() {
            return Some(n);
        }
        if let Some(n) = self.pop_free_stack() {
            return Some(n);
        }
        self.try_pop_consignment()
    }

    /// Splice a pre-linked list (terminated by a null `next`) directly
    /// onto the free tier, bypassing hazard checks entirely. Callers must
    /// guarantee exclusivity — initialization only.
    pub fn unchecked_bulk_push(&self, head: NonNull<N>) {
        let mut tail = head;
        loop {
            // SAFETY: the caller guarantees exclusive access to the whole
            // chain being spliced in.
            let next = unsafe { tail.as_ref().get_next() };
            match NonNull::new(next) {
                Some(n) => tail = n,
                None => break,
            }
        }
        loop {
            let old_head = self.shared.free_head.load(Ordering::Acquire);
            // SAFETY: see above.
            unsafe { tail.as_ref().set_next(old_head) };
            if self
                .shared
                .free_head
                .compare_exchange_weak(old_head, head.as_ptr(), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Write a human-readable summary through the logger (spec §6). Only
    /// the mutex-guarded consignment tier's length is counted exactly;
    /// the lock-free free-stack tier is not walked here since doing so
    /// safely would need the same hazard protection `pop_free_stack`
    /// uses, which is more machinery than a diagnostic warrants.
    pub fn dump(&self, severity: Severity, id: impl std::fmt::Display) {
        let consignment_len = {
            let guard = self.shared.consignment.lock().unwrap();
            let mut n = 0usize;
            let mut cur = *guard;
            while !cur.is_null() {
                n += 1;
                // SAFETY: consignment nodes are only ever linked/unlinked
                // while this mutex is held, which we hold here.
                cur = unsafe { (*cur).get_next() };
            }
            n
        };
        logging::dump(
            severity,
            "recycle.stack",
            id,
            &format!("consignment_len={consignment_len}"),
        );
    }

    fn push_free_stack(&self, n: NonNull<N>) {
        loop {
            let head = self.shared.free_head.load(Ordering::Acquire);
            // SAFETY: caller of `push` proved `n` is not observed before
            // reaching this path.
            unsafe { n.as_ref().set_next(head) };
            if self
                .shared
                .free_head
                .compare_exchange_weak(head, n.as_ptr(), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    fn try_pop_consignment(&self) -> Option<NonNull<N>> {
        let mut guard = self.shared.consignment.try_lock().ok()?;
        let head = *guard;
        let head = NonNull::new(head)?;
        // SAFETY: `head` is a live consignment-list node; we hold the
        // mutex serializing all consignment access.
        *guard = unsafe { head.as_ref().get_next() };
        Some(head)
    }

    /// Lock-free Treiber pop with double hazard-pointer reservation
    /// (POP_HEAD, POP_NEXT) against the ABA problem: a node popped,
    /// recycled, and re-pushed by another thread between our reads of
    /// `head` and `head.next` must not make our CAS install a stale
    /// `next`.
    fn pop_free_stack(&self) -> Option<NonNull<N>> {
        self.with_pop_slots(|pop_head, pop_next| loop {
            let h = self.shared.free_head.load(Ordering::Acquire);
            if h.is_null() {
                return None;
            }
            pop_head.publish(h as usize);
            if self.shared.free_head.load(Ordering::Acquire) != h {
                continue;
            }
            // SAFETY: `h` is non-null and hazard-published; it cannot be
            // reclaimed while this slot protects it.
            let next = unsafe { (*h).get_next() };
            pop_next.publish(next as usize);
            // SAFETY: see above.
            if unsafe { (*h).get_next() } != next {
                continue;
            }
            if self
                .shared
                .free_head
                .compare_exchange_weak(h, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                // SAFETY: the CAS above gives us exclusive ownership of `h`.
                unsafe { (*h).set_next(std::ptr::null_mut()) };
                pop_head.clear();
                pop_next.clear();
                return NonNull::new(h);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicPtr;

    struct Node {
        next: AtomicPtr<Node>,
        value: u32,
    }

    impl Node {
        fn new(value: u32) -> NonNull<Node> {
            let boxed = Box::new(Node {
                next: AtomicPtr::new(std::ptr::null_mut()),
                value,
            });
            NonNull::new(Box::into_raw(boxed)).unwrap()
        }
    }

    impl FreeNode for Node {
        fn next_link(&self) -> &AtomicPtr<Self> {
            &self.next
        }
    }

    #[test]
    fn push_then_pop_single_threaded() {
        let stack: Stack<Node> = Stack::new().unwrap();
        let n = Node::new(1);
        stack.push(n);
        let popped = stack.pop().unwrap();
        assert_eq!(unsafe { popped.as_ref().value }, 1);
    }

    #[test]
    fn pop_on_empty_stack_returns_none() {
        let stack: Stack<Node> = Stack::new().unwrap();
        assert!(stack.pop().is_none());
    }

    #[test]
    fn unchecked_bulk_push_is_lifo() {
        let stack: Stack<Node> = Stack::new().unwrap();
        let a = Node::new(1);
        let b = Node::new(2);
        let c = Node::new(3);
        // SAFETY: test-local, exclusive construction of a..b..c chain.
        unsafe {
            a.as_ref().set_next(b.as_ptr());
            b.as_ref().set_next(c.as_ptr());
        }
        stack.unchecked_bulk_push(a);
        let v: Vec<u32> = (0..3)
            .map(|_| unsafe { stack.pop().unwrap().as_ref().value })
            .collect();
        assert_eq!(v, vec![1, 2, 3]);
    }

    #[test]
    fn push_pop_round_trips_under_contention() {
        let stack: Arc<Stack<Node>> = Arc::new(Stack::new().unwrap());
        for v in 0..64 {
            stack.push(Node::new(v));
        }
        let mut handles = Vec::new();
        for _ in 0..8 {
            let stack = stack.clone();
            handles.push(std::thread::spawn(move || {
                let mut popped = Vec::new();
                for _ in 0..8 {
                    if let Some(n) = stack.pop() {
                        popped.push(n.as_ptr() as usize);
                    }
                }
                popped
            }));
        }
        let mut all = Vec::new();
        for h in handles {
            all.extend(h.join().unwrap());
        }
        assert_eq!(all.len(), 64);
    }

    #[test]
    fn dump_counts_consignment_tier_exactly() {
        let stack: Stack<Node> = Stack::new().unwrap();
        let n = Node::new(7);
        {
            let mut guard = stack.shared.consignment.lock().unwrap();
            unsafe { n.as_ref().set_next(*guard) };
            *guard = n.as_ptr();
        }
        stack.dump(crate::logging::Severity::Dump, "test");
    }

    #[test]
    fn hazardous_node_pushed_while_lock_held_is_not_lost() {
        let stack: Stack<Node> = Stack::new().unwrap();
        let n = Node::new(42);
        let observer = hazard::acquire_slot();
        observer.publish(n.as_ptr() as usize);

        {
            // Holding the consignment lock forces push() onto the
            // hazard-check/stash path rather than the fast consignment one.
            let _guard = stack.shared.consignment.lock().unwrap();
            stack.push(n);
        }

        observer.clear();
        observer.release();
        assert!(stack.pop().is_some());
    }
}
