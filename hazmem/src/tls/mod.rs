//! Dynamic thread-local storage (component B).
//!
//! [`raw`] is the `pthread_key_create`-shaped primitive: opaque,
//! pointer-sized values, no drop glue of its own. [`typed`] layers a
//! generic, boxing `Key<T>` on top for everything else in the crate
//! (hazard registry slots, the free-node stack's per-thread stash) that
//! wants to store a real Rust value per thread rather than a raw word.

pub mod raw;
pub mod typed;

pub use raw::{dump, key_count, Key as RawKey};
pub use typed::{Accessor, Key};
