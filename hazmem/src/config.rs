//! Compile-time configuration constants.
//!
//! Every value here is a magic number in the original C++ source
//! (`libalconcurrent`); the spec documents them as the stable public
//! knobs of the subsystem. There are no runtime environment variables and
//! no persisted state — changing behavior means changing these constants
//! and rebuilding.

/// Minimum alignment handed out by the arena allocator's fast path,
/// used whenever a caller does not need a stricter alignment.
pub const DEFAULT_ALIGN_SIZE: usize = 32;

/// Size of one arena chamber requested from the page allocator, expressed
/// as a multiple of [`crate::mm::page::PAGE_SIZE`].
pub const PRE_ALLOC_PAGES: usize = 1;

/// Number of `(key_id, value)` pairs held per dynamic-TLS slot group. The
/// global key registry grows by this many slots at a time rather than one
/// key at a time, and each thread's value row grows to match.
pub const DYNAMIC_TLS_ARRAY_SIZE: usize = 8;

/// Upper bound on live dynamic-TLS keys ever created by the process.
/// `key_create` past this returns `TlsExhausted`. Keys are never recycled,
/// so this also bounds total keys created over the process lifetime.
pub const DYNAMIC_TLS_MAX_KEYS: usize = 4096;

/// Number of times a thread retries reclaiming a hazardous retired node
/// before handing it off to the process-global consignment, at thread
/// exit or explicit slot release.
pub const HAZARD_SCAN_RETRY_BUDGET: u32 = 10;

/// Sleep between reclamation retries during the bounded back-off above.
pub const HAZARD_SCAN_RETRY_BACKOFF_MS: u64 = 1;

/// Free-node stack's retire-list-to-registry-size ratio that triggers an
/// eager reclamation pass on a slot (spec §4.C: "e.g., 2x registry size").
pub const RETIRE_LIST_RECLAIM_MULTIPLIER: usize = 2;

/// Largest single allocation the arena will satisfy directly; requests
/// above this fail rather than provision an oversized chamber. Default is
/// one page-allocator unit, per spec.
pub const ARENA_MAX_ALLOC_SIZE: usize = PRE_ALLOC_PAGES * crate::mm::page::PAGE_SIZE;
