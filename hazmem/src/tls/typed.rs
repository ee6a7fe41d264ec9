//! Typed convenience layer over [`crate::tls::raw`], mirroring the split
//! in the original source between the low-level pthread key wrapper and
//! the `dynamic_tls<T>` template built on it. Boxes `T` and stores the
//! raw pointer as the opaque word; the destructor trampoline reconstructs
//! and drops the `Box`.

use std::marker::PhantomData;
use std::ops::Deref;

use super::raw::{self, Key as RawKey};
use crate::error::Result;

fn encode<T>(value: T) -> usize {
    Box::into_raw(Box::new(value)) as usize
}

/// SAFETY: `ptr` must have come from [`encode`] for this same `T` and not
/// already have been decoded.
unsafe fn decode<T>(ptr: usize) -> Box<T> {
    // SAFETY: see function contract.
    unsafe { Box::from_raw(ptr as *mut T) }
}

/// A typed dynamic TLS key. `T`'s destructor (if any) runs once per
/// thread, at that thread's exit, for whichever value the thread last set
/// and never overwrote — matching [`raw`]'s leak-on-overwrite contract.
pub struct Key<T> {
    raw: RawKey,
    _marker: PhantomData<fn(T)>,
}

// A `Key<T>` names a slot, not a value; it carries no `T` directly, so it
// is safe to share and send regardless of whether `T` itself is.
impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Key<T> {}

impl<T> Key<T> {
    /// Create a key. When `with_destructor` is true, dropping a thread's
    /// last-set, non-overwritten value runs `T`'s own `Drop` at that
    /// thread's exit; when false, a live value at thread exit is leaked.
    pub fn create(with_destructor: bool) -> Result<Self> {
        let destructor = with_destructor.then_some(drop_trampoline::<T> as fn(usize));
        let raw = raw::key_create(destructor)?;
        Ok(Self {
            raw,
            _marker: PhantomData,
        })
    }

    /// Release the key. See [`raw::key_release`] for the shared-ownership
    /// caveat: threads that still hold a value keep running its destructor
    /// at their own exit regardless.
    pub fn release(self) {
        raw::key_release(self.raw);
    }

    /// Set this thread's value, boxing it. Overwriting a previously set
    /// value leaks the old box without running its destructor — only a
    /// thread exit does, matching `set`'s documented contract.
    pub fn set(&self, value: T) {
        raw::set(self.raw, encode(value));
    }

    /// Borrow this thread's current value, if set.
    pub fn get(&self) -> Option<&T> {
        let ptr = raw::get(self.raw);
        if ptr == 0 {
            return None;
        }
        // SAFETY: a non-zero value for this key was produced by `set`,
        // which only ever stores pointers from `encode::<T>`; the box
        // remains live until a destructor or thread exit consumes it,
        // neither of which can run concurrently with this thread's own
        // call.
        Some(unsafe { &*(ptr as *const T) })
    }

    /// Borrow this thread's value, initializing it with `init` if unset.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        if self.get().is_none() {
            self.set(init());
        }
        self.get().expect("just initialized")
    }

    /// A scoped accessor over this thread's current value, if set.
    pub fn get_accessor(&self) -> Option<Accessor<'_, T>> {
        self.get().map(|value| Accessor { value })
    }

    /// Mutably access this thread's current value, if set. Safe because
    /// a thread's own slot value is never aliased: only that thread's
    /// `get`/`set`/`with_mut` calls ever touch it, and the destructor
    /// only runs after the thread can no longer call back in.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let ptr = raw::get(self.raw);
        if ptr == 0 {
            return None;
        }
        // SAFETY: see method doc.
        Some(f(unsafe { &mut *(ptr as *mut T) }))
    }

    /// Like [`Self::with_mut`], initializing with `init` first if unset.
    pub fn with_mut_or_init<R>(&self, init: impl FnOnce() -> T, f: impl FnOnce(&mut T) -> R) -> R {
        if raw::get(self.raw) == 0 {
            self.set(init());
        }
        self.with_mut(f).expect("just initialized")
    }
}

fn drop_trampoline<T>(ptr: usize) {
    // SAFETY: only ever invoked by `raw`'s thread-exit walk on a value
    // this key's `set` produced via `encode::<T>`, and only once per
    // (key, thread) since `raw` zeroes nothing out but guarantees a
    // single destructor call per row entry per thread lifetime.
    drop(unsafe { decode::<T>(ptr) });
}

/// A borrow of a thread's current value for a [`Key`]. Exists mainly so
/// call sites read `*accessor` rather than juggling an `Option<&T>`
/// directly at every use.
pub struct Accessor<'a, T> {
    value: &'a T,
}

impl<'a, T> Deref for Accessor<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.value
    }
}
