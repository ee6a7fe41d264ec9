//! Error taxonomy for the hazmem subsystem.
//!
//! The core never panics or unwinds across its public boundary for an
//! expected failure; every fallible operation returns a [`Result`] whose
//! error is a variant of [`Error`]. Invariant violations that would
//! otherwise corrupt state are logged at `ERR` through [`crate::logging`]
//! and converted into a leak (safe but observable) rather than propagated,
//! matching the propagation policy in the spec.

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// The error taxonomy this crate can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The page allocator declined to provide more address space.
    OutOfAddressSpace { requested: usize },
    /// A node was double-pushed, or remained hazardous past the retry
    /// budget and had to be leaked rather than freed. Logged at `ERR`;
    /// never returned from a container-facing `push`/`pop`.
    ProtocolViolation { reason: &'static str },
    /// The dynamic TLS runtime refused to hand out a new key.
    TlsExhausted,
    /// `release` was called on a pointer the arena does not own.
    UnexpectedDeallocate { addr: usize },
    /// Requested allocation exceeds [`crate::config::ARENA_MAX_ALLOC_SIZE`].
    AllocationTooLarge { requested: usize, max: usize },
    /// Alignment requested was not a power of two, or was below the
    /// minimum the arena guarantees.
    InvalidAlignment { align: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfAddressSpace { requested } => {
                write!(f, "out of address space: requested {requested} bytes")
            }
            Self::ProtocolViolation { reason } => write!(f, "protocol violation: {reason}"),
            Self::TlsExhausted => write!(f, "dynamic TLS key space exhausted"),
            Self::UnexpectedDeallocate { addr } => {
                write!(f, "deallocate of unowned pointer at {addr:#x}")
            }
            Self::AllocationTooLarge { requested, max } => {
                write!(f, "allocation of {requested} bytes exceeds max {max}")
            }
            Self::InvalidAlignment { align } => {
                write!(f, "invalid alignment: {align} is not a power of two")
            }
        }
    }
}

impl std::error::Error for Error {}
