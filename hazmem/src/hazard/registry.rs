//! Hazard pointer registry (component C): a process-wide, append-only
//! list of per-thread slots plus the `publish`/`scan`/`clear` protocol
//! that lets writers know which nodes are still being read.
//!
//! Grounded on the teacher's `sync::hazard` module (a flat, fixed-size
//! array scanned linearly) generalised to the spec's append-only,
//! grow-as-needed slot list backed by the arena allocator, and to the
//! spec's explicit retry-then-consign teardown policy the teacher's
//! version does not need (it never frees the slots it scans).

use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use crate::config::{HAZARD_SCAN_RETRY_BACKOFF_MS, HAZARD_SCAN_RETRY_BUDGET};
use crate::hazard::retire::{RetireEntry, RetireList};
use crate::logging::{self, Severity};
use crate::mm::Arena;

struct Slot {
    published: AtomicUsize,
    in_use: AtomicBool,
    /// Bumped every time this slot transitions UNUSED -> IN-USE. Not part
    /// of the publish/scan safety argument, which rests entirely on
    /// ordering between `publish` and `scan` (spec §3) — a debug aid only,
    /// surfaced through `SlotHandle::dump` to distinguish a freshly
    /// acquired slot from one being reused after a prior owner's exit.
    generation: AtomicUsize,
    retire: RetireList,
    next: AtomicPtr<Slot>,
}

struct Registry {
    head: AtomicPtr<Slot>,
    slot_count: AtomicUsize,
    arena: Arena,
    /// Fallback for retired nodes that are still hazardous after a
    /// slot's teardown retry budget is exhausted (spec §4.C). Distinct
    /// from any container-specific consignment tier: these entries are
    /// never reclaimed automatically, only counted and kept alive.
    consignment: Mutex<Vec<RetireEntry>>,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| Registry {
        head: AtomicPtr::new(std::ptr::null_mut()),
        slot_count: AtomicUsize::new(0),
        // Slot headers must outlive their own teardown logic, which can
        // run from a thread-exit destructor after most of the process
        // has begun unwinding; never return their pages to the OS.
        arena: Arena::with_mmap(true),
        consignment: Mutex::new(Vec::new()),
    })
}

/// A claimed hazard slot. Not `Sync`: only the thread that acquired it
/// may publish, clear, or retire through it, which is also what makes
/// this slot's [`RetireList`] single-writer-safe.
pub struct SlotHandle {
    slot: NonNull<Slot>,
}

unsafe impl Send for SlotHandle {}

impl SlotHandle {
    fn slot(&self) -> &Slot {
        // SAFETY: slots are arena-allocated and never freed individually;
        // the registry never removes a slot from the chain.
        unsafe { self.slot.as_ref() }
    }

    /// Publish `ptr` as currently being dereferenced by this thread. A
    /// release store followed by a full fence, per spec §4.C: any
    /// subsequent re-read of the guarded structure that still observes
    /// `ptr` proves the node has not been reclaimed.
    pub fn publish(&self, ptr: usize) {
        self.slot().published.store(ptr, Ordering::Release);
        fence(Ordering::SeqCst);
    }

    /// Stop protecting whatever this slot currently publishes.
    pub fn clear(&self) {
        self.slot().published.store(0, Ordering::Release);
    }

    /// Add `ptr` to this slot's retire list. If the list has grown past
    /// [`crate::config::RETIRE_LIST_RECLAIM_MULTIPLIER`] times the
    /// registry's slot count, run an immediate reclamation pass.
    pub fn retire(&self, ptr: usize, deleter: impl Fn(usize) + Send + 'static) {
        let slot = self.slot();
        slot.retire.push(RetireEntry {
            ptr,
            deleter: Box::new(deleter),
        });
        let threshold =
            registry().slot_count.load(Ordering::Relaxed) * crate::config::RETIRE_LIST_RECLAIM_MULTIPLIER;
        if slot.retire.len() > threshold.max(1) {
            slot.retire.for_each_try_reclaim(scan);
        }
    }

    /// Write a human-readable summary of this slot through the logger
    /// (spec §6). `generation` is a debug aid only (see [`Slot`]), not
    /// part of the publish/scan safety argument.
    pub fn dump(&self, severity: Severity, id: impl std::fmt::Display) {
        let slot = self.slot();
        logging::dump(
            severity,
            "hazard.slot",
            id,
            &format!(
                "generation={} published={:#x} retire_len={}",
                slot.generation.load(Ordering::Relaxed),
                slot.published.load(Ordering::Acquire),
                slot.retire.len()
            ),
        );
    }

    /// Release this slot: best-effort reclaim of everything on its
    /// retire list with bounded retries, consigning whatever remains
    /// hazardous, then mark the slot reusable. Called explicitly or from
    /// `Drop`.
    pub fn release(self) {
        // `self` is consumed; `Drop` runs the same logic exactly once.
        drop(self);
    }

    fn teardown(&self) {
        let slot = self.slot();
        for _ in 0..HAZARD_SCAN_RETRY_BUDGET {
            slot.retire.for_each_try_reclaim(scan);
            if slot.retire.len() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(HAZARD_SCAN_RETRY_BACKOFF_MS));
        }
        if slot.retire.len() > 0 {
            logging::output_log(
                Severity::Err,
                256,
                "hazard",
                "node(s) still hazardous past retry budget; consigning",
            );
            let mut consignment = registry().consignment.lock().unwrap();
            slot.retire.drain_to(&mut |entry| consignment.push(entry));
        }

        // A thread can exit after `publish` without ever calling `clear`
        // or `retire` on that pointer (e.g. it never owned the node, just
        // protected someone else's). There is no known deleter for a bare
        // forgotten publication, so consign it with a no-op one rather
        // than silently dropping the protection it stood for.
        let published = slot.published.load(Ordering::Acquire);
        if published != 0 {
            logging::output_log(
                Severity::Warn,
                256,
                "hazard",
                "slot torn down with an uncleared publication; consigning",
            );
            registry().consignment.lock().unwrap().push(RetireEntry {
                ptr: published,
                deleter: Box::new(|_| {}),
            });
        }

        slot.published.store(0, Ordering::Release);
        slot.in_use.store(false, Ordering::Release);
    }
}

impl Drop for SlotHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Claim a hazard slot, reusing a previously released one if any is free,
/// otherwise appending a new one to the registry's slot list.
pub fn acquire_slot() -> SlotHandle {
    let reg = registry();

    let mut cur = reg.head.load(Ordering::Acquire);
    while !cur.is_null() {
        // SAFETY: slots are never freed; `cur` came from a live atomic.
        let slot = unsafe { &*cur };
        if slot
            .in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            slot.generation.fetch_add(1, Ordering::Relaxed);
            return SlotHandle {
                slot: NonNull::new(cur).unwrap(),
            };
        }
        cur = slot.next.load(Ordering::Acquire);
    }

    let ptr = reg
        .arena
        .allocate(
            std::mem::size_of::<Slot>(),
            std::mem::align_of::<Slot>().max(16),
        )
        .expect("hazard slot allocation failed")
        .cast::<Slot>();
    // SAFETY: `ptr` is freshly carved, exclusively-owned arena memory
    // sized and aligned for `Slot`.
    unsafe {
        ptr.write(Slot {
            published: AtomicUsize::new(0),
            in_use: AtomicBool::new(true),
            generation: AtomicUsize::new(1),
            retire: RetireList::new(),
            next: AtomicPtr::new(std::ptr::null_mut()),
        });
    }

    loop {
        let old_head = reg.head.load(Ordering::Acquire);
        // SAFETY: `ptr` is not yet published; writing `next` is exclusive.
        unsafe { (*ptr).next.store(old_head, Ordering::Relaxed) };
        if reg
            .head
            .compare_exchange(old_head, ptr, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            reg.slot_count.fetch_add(1, Ordering::Relaxed);
            return SlotHandle {
                slot: NonNull::new(ptr).unwrap(),
            };
        }
    }
}

/// Returns true iff some slot currently publishes `ptr`. `scan(0)` is
/// always false.
pub fn scan(ptr: usize) -> bool {
    if ptr == 0 {
        return false;
    }
    let mut cur = registry().head.load(Ordering::Acquire);
    while !cur.is_null() {
        // SAFETY: see `acquire_slot`.
        let slot = unsafe { &*cur };
        if slot.published.load(Ordering::Acquire) == ptr {
            return true;
        }
        cur = slot.next.load(Ordering::Acquire);
    }
    false
}

/// Number of slots the registry has ever allocated (not just in-use).
pub fn slot_count() -> usize {
    registry().slot_count.load(Ordering::Relaxed)
}

/// Number of entries parked in the global consignment fallback.
pub fn consignment_len() -> usize {
    registry().consignment.lock().unwrap().len()
}

/// Write a human-readable summary of the whole registry through the
/// logger (spec §6): total slots ever allocated and the size of the
/// process-global consignment fallback.
pub fn dump(severity: Severity, id: impl std::fmt::Display) {
    logging::dump(
        severity,
        "hazard.registry",
        id,
        &format!(
            "slot_count={} consignment_len={}",
            slot_count(),
            consignment_len()
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::sync::Arc;

    #[test]
    fn publish_then_scan_sees_it_clear_then_does_not() {
        let slot = acquire_slot();
        slot.publish(0xdead);
        assert!(scan(0xdead));
        slot.clear();
        assert!(!scan(0xdead));
    }

    #[test]
    fn scan_of_null_is_always_false() {
        assert!(!scan(0));
    }

    #[test]
    fn slots_are_reused_after_release() {
        let before = slot_count();
        let slot = acquire_slot();
        slot.release();
        let slot2 = acquire_slot();
        slot2.release();
        assert_eq!(slot_count(), before.max(1));
    }

    #[test]
    fn dump_does_not_panic_for_a_fresh_or_reused_slot() {
        let slot = acquire_slot();
        slot.dump(Severity::Dump, "fresh");
        slot.release();
        let slot2 = acquire_slot();
        slot2.dump(Severity::Dump, "reused");
        slot2.release();
        dump(Severity::Dump, "registry");
    }

    #[test]
    fn teardown_reclaims_non_hazardous_retired_nodes() {
        let slot = acquire_slot();
        let reclaimed = Arc::new(StdAtomicUsize::new(0));
        let r = reclaimed.clone();
        slot.retire(0x1234, move |_| {
            r.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        slot.release();
        assert_eq!(reclaimed.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn teardown_consigns_still_hazardous_nodes() {
        let observer = acquire_slot();
        observer.publish(0xface);

        let owner = acquire_slot();
        let before = consignment_len();
        owner.retire(0xface, |_| {
            panic!("must not reclaim a still-hazardous node");
        });
        owner.release();
        assert!(consignment_len() > before);
        observer.clear();
        observer.release();
    }

    #[test]
    fn teardown_consigns_an_uncleared_publication_even_without_retire() {
        let slot = acquire_slot();
        slot.publish(0xbeef);
        let before = consignment_len();
        slot.release();
        assert_eq!(consignment_len(), before + 1);
    }
}
