//! Black-box tests for the concrete scenarios spec's testable-properties
//! section describes, run against the crate's public API only.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use hazmem::hazard;
use hazmem::list::List;
use hazmem::logging;
use hazmem::recycle::{FreeNode, Stack};
use hazmem::tls;

/// Tests within this file run on separate threads of the same process,
/// so the ERR/WARN counters and the global consignment are shared
/// mutable state across them. This serializes exactly the two scenarios
/// that care about absolute values of that shared state (scenario 1
/// asserts zero WARNs process-wide; scenario 4 deliberately produces
/// some) so neither observes the other's activity.
static GLOBAL_COUNTERS_GUARD: Mutex<()> = Mutex::new(());

/// Scenario 1: one producer pushes 0..1000, one consumer pops 1000
/// times. Every value is seen exactly once and no ERR/WARN is logged.
#[test]
fn spsc_producer_consumer_sees_every_value_exactly_once() {
    let _guard = GLOBAL_COUNTERS_GUARD.lock().unwrap();
    let _ = logging::take_counts();

    let list = Arc::new(List::<u32>::new().unwrap());
    let producer = {
        let list = list.clone();
        std::thread::spawn(move || {
            for v in 0..1000 {
                list.push_back(v);
            }
        })
    };

    let consumer = {
        let list = list.clone();
        std::thread::spawn(move || {
            let mut seen = Vec::with_capacity(1000);
            while seen.len() < 1000 {
                if let Some(v) = list.pop_front() {
                    seen.push(v);
                } else {
                    std::thread::yield_now();
                }
            }
            seen
        })
    };

    producer.join().unwrap();
    let seen = consumer.join().unwrap();

    let expected: HashSet<u32> = (0..1000).collect();
    let actual: HashSet<u32> = seen.into_iter().collect();
    assert_eq!(actual, expected);

    let (err, warn) = logging::counts();
    assert_eq!(err, 0);
    assert_eq!(warn, 0);
}

/// Scenario 2: many threads push and pop the same free-node stack
/// concurrently. Every node pushed is eventually popped by someone, and
/// no node is observed twice concurrently (no double-pop).
///
/// The spec frames this as a fixed wall-clock duration of churn; a fixed
/// iteration count is used here instead so the test is deterministic
/// rather than timing-dependent.
#[test]
fn many_threads_churn_a_shared_free_stack_without_loss_or_duplication() {
    struct Node {
        next: std::sync::atomic::AtomicPtr<Node>,
        id: u32,
        taken: AtomicUsize,
    }
    impl FreeNode for Node {
        fn next_link(&self) -> &std::sync::atomic::AtomicPtr<Self> {
            &self.next
        }
    }

    const THREADS: usize = 32;
    const ROUNDS: usize = 200;

    let stack: Arc<Stack<Node>> = Arc::new(Stack::new().unwrap());
    let mut seed_ptrs = Vec::new();
    for id in 0..(THREADS as u32) {
        let boxed = Box::new(Node {
            next: std::sync::atomic::AtomicPtr::new(std::ptr::null_mut()),
            id,
            taken: AtomicUsize::new(0),
        });
        let ptr = std::ptr::NonNull::new(Box::into_raw(boxed)).unwrap();
        stack.push(ptr);
        seed_ptrs.push(ptr);
    }

    let mut handles = Vec::new();
    for _ in 0..THREADS {
        let stack = stack.clone();
        handles.push(std::thread::spawn(move || {
            for _ in 0..ROUNDS {
                if let Some(n) = stack.pop() {
                    // SAFETY: exclusive possession between pop and push.
                    let prev = unsafe { n.as_ref().taken.fetch_add(1, Ordering::SeqCst) };
                    assert_eq!(prev, 0, "node observed by two holders at once");
                    unsafe { n.as_ref().taken.fetch_sub(1, Ordering::SeqCst) };
                    stack.push(n);
                }
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let mut recovered = HashSet::new();
    while let Some(n) = stack.pop() {
        // SAFETY: exclusively held after pop.
        recovered.insert(unsafe { n.as_ref().id });
    }
    let expected: HashSet<u32> = (0..THREADS as u32).collect();
    assert_eq!(recovered, expected);

    for ptr in seed_ptrs {
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    }
}

/// Scenario 3: hazard-protect a node while a concurrent thread pops and
/// recycles other nodes through the same stack, exercising the
/// ABA-resistant double-reservation pop against real contention. The
/// protected node must still be readable (not reclaimed) after the
/// storm, by the public API alone.
#[test]
fn hazard_protected_node_survives_concurrent_free_stack_churn() {
    struct Node {
        next: std::sync::atomic::AtomicPtr<Node>,
        marker: u64,
    }
    impl FreeNode for Node {
        fn next_link(&self) -> &std::sync::atomic::AtomicPtr<Self> {
            &self.next
        }
    }

    let stack: Arc<Stack<Node>> = Arc::new(Stack::new().unwrap());
    for _ in 0..64 {
        let boxed = Box::new(Node {
            next: std::sync::atomic::AtomicPtr::new(std::ptr::null_mut()),
            marker: 0xC0FFEE,
        });
        stack.push(std::ptr::NonNull::new(Box::into_raw(boxed)).unwrap());
    }

    let guarded = stack.pop().unwrap();
    let guard = hazard::acquire_slot();
    guard.publish(guarded.as_ptr() as usize);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let stack = stack.clone();
        handles.push(std::thread::spawn(move || {
            for _ in 0..500 {
                if let Some(n) = stack.pop() {
                    stack.push(n);
                }
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    // SAFETY: `guarded` is still hazard-published by `guard` above, so
    // it cannot have been reclaimed by any concurrent popper.
    assert_eq!(unsafe { guarded.as_ref().marker }, 0xC0FFEE);

    guard.clear();
    guard.release();
    stack.push(guarded);
}

/// Scenario 4: 100 ephemeral threads each publish a hazard pointer and
/// exit without clearing it. After every thread has joined, the
/// process-global consignment holds exactly 100 entries — nothing was
/// silently dropped, nothing was wrongly reclaimed.
#[test]
fn threads_exiting_with_an_uncleared_publication_all_land_in_consignment() {
    let _guard = GLOBAL_COUNTERS_GUARD.lock().unwrap();
    let before = hazard::consignment_len();

    let handles: Vec<_> = (0..100u64)
        .map(|i| {
            std::thread::spawn(move || {
                let slot = hazard::acquire_slot();
                slot.publish(0x1000 + i as usize);
                // Thread exits here without calling `slot.clear()`.
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(hazard::consignment_len(), before + 100);
}

/// Scenario 5: repeated arena-backed allocation past a single chamber's
/// capacity grows the chamber count; growth only ever adds chambers, it
/// never shrinks or replaces one in place.
#[test]
fn arena_backed_allocation_past_capacity_grows_chamber_count() {
    use hazmem::mm::Arena;

    let arena = Arena::with_mmap(false);
    let before = arena.stats().chamber_count;
    assert_eq!(before, 0);

    // One page's worth of allocations forces at least a second chamber.
    for _ in 0..10_000 {
        arena.allocate(64, 32).unwrap();
    }

    let after = arena.stats().chamber_count;
    assert!(after > before, "expected chamber growth, saw {after}");
}

/// Scenario 6: 10 threads each set a value for the same destructor-bearing
/// dynamic TLS key; every thread's destructor runs exactly once by the
/// time it has joined, and releasing the key afterward does not panic.
#[test]
fn ten_threads_each_run_their_destructor_exactly_once_then_key_releases_cleanly() {
    #[derive(Clone)]
    struct Counted(Arc<AtomicUsize>);
    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let counter = Arc::new(AtomicUsize::new(0));
    let key: tls::Key<Counted> = tls::Key::create(true).unwrap();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let counter = counter.clone();
            std::thread::spawn(move || {
                key.set(Counted(counter));
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(counter.load(Ordering::SeqCst), 10);

    // Releasing after every setter thread has already exited must not
    // panic or otherwise disturb already-run destructors.
    key.release();
}
