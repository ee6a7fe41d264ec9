//! Arena allocator (component A): an append-only bump allocator used to
//! place internal metadata. Exposes `allocate(size, align)` and never
//! frees individual allocations — memory is released in bulk when the
//! arena is dropped (`release_all`), unless configured to leak so that
//! post-exit thread-local destructors can still dereference arena memory.

use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::{ARENA_MAX_ALLOC_SIZE, DEFAULT_ALIGN_SIZE, PRE_ALLOC_PAGES};
use crate::error::{Error, Result};
use crate::logging::{self, Severity};
use crate::mm::page::{round_up_to_page, MmapPageSource, PageBlock, PageSource, PAGE_SIZE};

/// A single page-aligned block carved into aligned sub-allocations by
/// bumping a cursor. Chambers chain into a stack via `next`.
struct Chamber {
    base: *mut u8,
    capacity: usize,
    /// Bytes of `base..base+capacity` already handed out.
    cursor: AtomicUsize,
    next: AtomicPtr<Chamber>,
    /// The block as returned by the page source, for `release_all`.
    block: PageBlock,
}

impl Chamber {
    /// Try to bump-allocate `size` bytes aligned to `align` from this
    /// chamber. Returns `None` if it does not fit; never partially fills.
    fn try_allocate(&self, size: usize, align: usize) -> Option<*mut u8> {
        loop {
            let cursor = self.cursor.load(Ordering::Relaxed);
            let base_addr = self.base as usize + cursor;
            let padding = base_addr.next_multiple_of(align) - base_addr;
            let new_cursor = cursor.checked_add(padding)?.checked_add(size)?;
            if new_cursor > self.capacity {
                return None;
            }
            if self
                .cursor
                .compare_exchange_weak(cursor, new_cursor, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                // SAFETY: [cursor+padding, cursor+padding+size) was just
                // exclusively claimed by the successful CAS above, and lies
                // within [0, capacity) which is within the chamber's block.
                return Some(unsafe { self.base.add(cursor + padding) });
            }
        }
    }
}

/// Aggregate usage statistics, exposed through [`Arena::dump`] and
/// [`Arena::stats`]. Mirrors the original's `alloc_chamber_statistics`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArenaStats {
    pub chamber_count: usize,
    pub alloc_size: usize,
    pub consumed_size: usize,
}

/// Append-only arena allocator. `allocate` is lock-free on the fast path;
/// chamber provisioning races are resolved by having the loser consume
/// the winner's chamber instead of retrying a fresh page request.
pub struct Arena {
    head: AtomicPtr<Chamber>,
    chamber_count: AtomicUsize,
    page_source: Arc<dyn PageSource>,
    /// When true, chambers are never returned to the page source, even on
    /// drop — for arenas whose memory must remain valid for reads that
    /// can occur after the arena's owning thread (or the whole process)
    /// has begun tearing down.
    leak_on_drop: bool,
}

// SAFETY: all mutable state is behind atomics; chambers are only ever
// appended, never removed or mutated after being linked.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Create a new, empty arena backed by `page_source`.
    pub fn new(page_source: Arc<dyn PageSource>, leak_on_drop: bool) -> Self {
        Self {
            head: AtomicPtr::new(std::ptr::null_mut()),
            chamber_count: AtomicUsize::new(0),
            page_source,
            leak_on_drop,
        }
    }

    /// An arena using the default `mmap`-backed page source.
    pub fn with_mmap(leak_on_drop: bool) -> Self {
        Self::new(Arc::new(MmapPageSource), leak_on_drop)
    }

    /// Allocate `size` bytes aligned to at least `align` (must be a power
    /// of two, >= 16). Returns `Err` if `align` is invalid, the request
    /// exceeds [`ARENA_MAX_ALLOC_SIZE`], or the page allocator declines.
    pub fn allocate(&self, size: usize, align: usize) -> Result<*mut u8> {
        if align < 16 || !align.is_power_of_two() {
            return Err(Error::InvalidAlignment { align });
        }
        if size > ARENA_MAX_ALLOC_SIZE {
            return Err(Error::AllocationTooLarge {
                requested: size,
                max: ARENA_MAX_ALLOC_SIZE,
            });
        }

        loop {
            let mut cur = self.head.load(Ordering::Acquire);
            while !cur.is_null() {
                // SAFETY: chambers are append-only and never freed while
                // the arena is alive; `cur` was read from a live atomic.
                let chamber = unsafe { &*cur };
                if let Some(ptr) = chamber.try_allocate(size, align) {
                    return Ok(ptr);
                }
                cur = chamber.next.load(Ordering::Acquire);
            }

            // No chamber had room (or there were none yet); provision a
            // new one sized to fit at least this request.
            if let Some(ptr) = self.grow(size, align)? {
                return Ok(ptr);
            }
        }
    }

    /// Allocate and zero `size` bytes aligned to [`DEFAULT_ALIGN_SIZE`].
    pub fn allocate_default_aligned(&self, size: usize) -> Result<*mut u8> {
        self.allocate(size, DEFAULT_ALIGN_SIZE)
    }

    /// Provision a new chamber sized to fit at least `size`/`align`. On a
    /// CAS race, the loser consumes the winner's freshly published chamber
    /// directly and returns that allocation (spec §4.A: "consume the
    /// winner's chamber first") instead of discarding it and making the
    /// caller re-walk the chamber list to bump it a second time.
    fn grow(&self, size: usize, align: usize) -> Result<Option<*mut u8>> {
        let default_chamber_size = PRE_ALLOC_PAGES * PAGE_SIZE;
        let needed = round_up_to_page(size + align);
        let request = default_chamber_size.max(needed);

        let block = self.page_source.allocate(request, 0)?;
        let chamber = Box::into_raw(Box::new(Chamber {
            base: block.addr.as_ptr(),
            capacity: block.actual_size,
            cursor: AtomicUsize::new(0),
            next: AtomicPtr::new(std::ptr::null_mut()),
            block,
        }));

        loop {
            let old_head = self.head.load(Ordering::Acquire);
            // SAFETY: `chamber` was just built above and is not yet
            // published; writing its `next` field is exclusive to us.
            unsafe { (*chamber).next.store(old_head, Ordering::Relaxed) };
            match self.head.compare_exchange(
                old_head,
                chamber,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.chamber_count.fetch_add(1, Ordering::Relaxed);
                    // SAFETY: `chamber` was just exclusively published by
                    // the CAS above and sized to fit this request.
                    let ptr = unsafe { &*chamber }
                        .try_allocate(size, align)
                        .expect("freshly provisioned chamber must fit its own request");
                    return Ok(Some(ptr));
                }
                Err(_) => {
                    // Another thread published a chamber first. Consume
                    // the winner's chamber before retrying our own, per
                    // spec §4.A, rather than leaking this one.
                    let winner = self.head.load(Ordering::Acquire);
                    // SAFETY: winner is a live chamber just published by
                    // another thread's successful CAS.
                    let winner_ref = unsafe { &*winner };
                    if let Some(ptr) = winner_ref.try_allocate(size, align) {
                        // SAFETY: `chamber` was never published (the CAS
                        // above failed), so we still exclusively own it.
                        let boxed = unsafe { Box::from_raw(chamber) };
                        self.release_chamber_block(&boxed.block);
                        return Ok(Some(ptr));
                    }
                    // Winner's chamber doesn't fit us either; loop to try
                    // publishing ours again on top of the new head.
                    continue;
                }
            }
        }
    }

    fn release_chamber_block(&self, block: &PageBlock) {
        if self.leak_on_drop {
            return;
        }
        // SAFETY: `block` was obtained from `self.page_source` and has not
        // been released elsewhere; this chamber is being discarded.
        if let Err(e) = unsafe { self.page_source.release(block.addr, block.actual_size) } {
            logging::output_log(Severity::Err, 256, "arena", &format!("{e}"));
        }
    }

    /// Snapshot usage statistics across all chambers.
    pub fn stats(&self) -> ArenaStats {
        let mut stats = ArenaStats {
            chamber_count: self.chamber_count.load(Ordering::Relaxed),
            ..Default::default()
        };
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            // SAFETY: see `allocate`.
            let chamber = unsafe { &*cur };
            stats.alloc_size += chamber.capacity;
            stats.consumed_size += chamber.cursor.load(Ordering::Relaxed).min(chamber.capacity);
            cur = chamber.next.load(Ordering::Acquire);
        }
        stats
    }

    /// Write a human-readable summary through the logger (spec §6).
    pub fn dump(&self, severity: Severity, id: impl std::fmt::Display) {
        let stats = self.stats();
        logging::dump(
            severity,
            "arena",
            id,
            &format!(
                "chambers={} alloc_size={} consumed={}",
                stats.chamber_count, stats.alloc_size, stats.consumed_size
            ),
        );
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        let mut cur = self.head.swap(std::ptr::null_mut(), Ordering::AcqRel);
        while !cur.is_null() {
            // SAFETY: Drop has exclusive access; no other reference to the
            // arena (and therefore to its chambers) can exist.
            let chamber = unsafe { Box::from_raw(cur) };
            cur = chamber.next.load(Ordering::Relaxed);
            self.release_chamber_block(&chamber.block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_returns_aligned_pointers() {
        let arena = Arena::with_mmap(false);
        for align in [16usize, 32, 64] {
            let p = arena.allocate(100, align).unwrap();
            assert_eq!(p as usize % align, 0);
        }
    }

    #[test]
    fn second_half_page_triggers_new_chamber() {
        let arena = Arena::with_mmap(false);
        let half = (PRE_ALLOC_PAGES * PAGE_SIZE) / 2;
        let _ = arena.allocate(half, DEFAULT_ALIGN_SIZE).unwrap();
        let before = arena.stats().chamber_count;
        let _ = arena.allocate(half + 1, DEFAULT_ALIGN_SIZE).unwrap();
        let after = arena.stats().chamber_count;
        assert_eq!(after, before + 1);
    }

    #[test]
    fn rejects_bad_alignment() {
        let arena = Arena::with_mmap(false);
        assert!(matches!(
            arena.allocate(8, 7),
            Err(Error::InvalidAlignment { .. })
        ));
        assert!(matches!(
            arena.allocate(8, 8),
            Err(Error::InvalidAlignment { .. })
        ));
    }

    #[test]
    fn rejects_oversized_allocation() {
        let arena = Arena::with_mmap(false);
        let err = arena
            .allocate(ARENA_MAX_ALLOC_SIZE + 1, DEFAULT_ALIGN_SIZE)
            .unwrap_err();
        assert!(matches!(err, Error::AllocationTooLarge { .. }));
    }

    #[test]
    fn concurrent_allocations_never_overlap() {
        use std::collections::BTreeSet;
        use std::sync::Mutex;

        let arena = Arc::new(Arena::with_mmap(false));
        let seen = Arc::new(Mutex::new(BTreeSet::new()));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let arena = arena.clone();
            let seen = seen.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..200 {
                    let p = arena.allocate(64, DEFAULT_ALIGN_SIZE).unwrap() as usize;
                    let mut seen = seen.lock().unwrap();
                    assert!(seen.insert(p), "duplicate allocation at {p:#x}");
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
