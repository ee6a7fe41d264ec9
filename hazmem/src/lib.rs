//! hazmem: a hazard-pointer-based safe memory reclamation subsystem and
//! the lock-free LIFO free-node stack built on top of it.
//!
//! The three hard concerns, leaves first:
//!
//! - [`mm`] — an append-only arena allocator (component A) over a
//!   pluggable page-aligned memory source.
//! - [`tls`] — dynamic, runtime-created thread-local storage with
//!   destructors that run before a thread's other state tears down
//!   (component B).
//! - [`hazard`] — the process-wide hazard pointer registry and per-slot
//!   retire lists readers and reclaimers coordinate through (components
//!   C and D).
//! - [`recycle`] — the three-tier free-node stack: thread-local stash,
//!   mutex-guarded consignment, lock-free Treiber free-stack (component
//!   E, the hard part).
//! - [`list`] — a lock-free linked list built on `hazard` and `recycle`
//!   (component F).
//! - [`stm`] — an experimental single-slot transactional cell, behind
//!   the `stm` feature (component G).
//!
//! None of this is a general-purpose garbage collector, none of it is
//! wait-free, and none of it bounds memory overhead under pathological
//! contention — it is lock-free with best-effort progress, built to
//! recycle nodes for lock-free containers under unbounded reader
//! contention.

pub mod config;
pub mod error;
pub mod hazard;
pub mod list;
pub mod logging;
pub mod mm;
pub mod raii;
pub mod recycle;
#[cfg(feature = "stm")]
pub mod stm;
pub mod tls;

pub use error::{Error, Result};
