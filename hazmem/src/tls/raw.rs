//! Raw dynamic TLS (component B): process-wide creation of thread-local
//! slots whose values are pointer-sized opaque words, modeled on
//! `pthread_key_create`/`pthread_setspecific` rather than on Rust's
//! `std::thread_local!` (which requires the key to be a compile-time
//! static, not created at runtime).
//!
//! Mechanism: a process-global, grow-only registry of key metadata
//! (capacity advances in [`DYNAMIC_TLS_ARRAY_SIZE`] steps, mirroring a
//! grow-only array of fixed-size slot groups) paired with a per-thread
//! value row of the same shape. A key's id is never reused, so a key
//! released while other threads still hold live values keeps its
//! metadata reachable for their eventual thread-exit destructor call —
//! the registry entry, not a reference count, is what keeps it alive.
//! This sidesteps the original's destructor-vs-TLS-teardown race (see
//! `dynamic_tls.hpp`) entirely: the per-thread row below is itself a
//! `std::thread_local!`, so its `Drop` glue *is* the teardown, not
//! something that can race a separate one.

use std::cell::RefCell;
use std::sync::Mutex;

use crate::config::{DYNAMIC_TLS_ARRAY_SIZE, DYNAMIC_TLS_MAX_KEYS};
use crate::error::{Error, Result};
use crate::logging::{self, Severity};

struct KeyMeta {
    destructor: Option<fn(usize)>,
}

static REGISTRY: Mutex<Vec<KeyMeta>> = Mutex::new(Vec::new());

struct ThreadRow {
    values: RefCell<Vec<usize>>,
}

impl Drop for ThreadRow {
    fn drop(&mut self) {
        let row = self.values.borrow();
        let registry = REGISTRY.lock().unwrap();
        for (id, meta) in registry.iter().enumerate() {
            let Some(value) = row.get(id).copied() else {
                continue;
            };
            if value == 0 {
                continue;
            }
            if let Some(destructor) = meta.destructor {
                destructor(value);
            }
        }
    }
}

thread_local! {
    static ROW: ThreadRow = const {
        ThreadRow { values: RefCell::new(Vec::new()) }
    };
}

/// An opaque handle to a dynamic TLS slot. `Copy` because it names a slot,
/// not a value — the same key can be read and written from any thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key {
    id: usize,
}

/// Create a new key whose per-thread value starts at `0` (unset). If
/// `destructor` is set, it runs once at a thread's exit for every thread
/// whose current value for this key is non-zero, in unspecified order
/// relative to other keys' destructors, before that thread's other
/// thread-local state is torn down.
pub fn key_create(destructor: Option<fn(usize)>) -> Result<Key> {
    let mut registry = REGISTRY.lock().unwrap();
    if registry.len() >= DYNAMIC_TLS_MAX_KEYS {
        logging::output_log(Severity::Err, 256, "tls", "key space exhausted");
        return Err(Error::TlsExhausted);
    }
    if registry.len() == registry.capacity() {
        registry.reserve(DYNAMIC_TLS_ARRAY_SIZE);
    }
    registry.push(KeyMeta { destructor });
    Ok(Key {
        id: registry.len() - 1,
    })
}

/// Release a key. The creator gives up its handle; any thread that still
/// holds a non-zero value for this key still runs the destructor at that
/// thread's exit, since released key ids are never reused and their
/// metadata is never removed from the registry.
pub fn key_release(_key: Key) {}

/// Number of keys ever created by the process (released or not).
pub fn key_count() -> usize {
    REGISTRY.lock().unwrap().len()
}

/// Write a human-readable summary through the logger (spec §6).
pub fn dump(severity: Severity, id: impl std::fmt::Display) {
    logging::dump(severity, "tls", id, &format!("key_count={}", key_count()));
}

/// Set this thread's value for `key`. Does **not** run the previous
/// value's destructor — only a thread exit does. Overwriting a non-zero
/// value therefore leaks whatever it referenced, mirroring raw
/// `pthread_setspecific` semantics.
pub fn set(key: Key, value: usize) {
    ROW.with(|row| {
        let mut values = row.values.borrow_mut();
        if values.len() <= key.id {
            let target = (key.id + 1).next_multiple_of(DYNAMIC_TLS_ARRAY_SIZE);
            values.resize(target, 0);
        }
        if values[key.id] != 0 && value != 0 {
            logging::output_log(
                Severity::Warn,
                256,
                "tls",
                "overwriting a set value leaks it until thread exit",
            );
        }
        values[key.id] = value;
    });
}

/// Read this thread's value for `key`. Returns `0` if never set, or set to
/// `0` by this thread.
pub fn get(key: Key) -> usize {
    ROW.with(|row| {
        let values = row.values.borrow();
        values.get(key.id).copied().unwrap_or(0)
    })
}
