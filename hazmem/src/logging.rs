//! Logger interface (spec §6) and the ERR/WARN counters the core must
//! maintain alongside it.
//!
//! The spec treats the logger as an external collaborator the core calls
//! into — "a sink the core calls with a severity tag and a formatted
//! string; no log routing decisions live in the core." Under `std` the
//! idiomatic sink is the [`log`] facade rather than the teacher's bespoke
//! `no_std` circular buffer (`log_service.rs`): an application picks the
//! backend (`env_logger`, `tracing-log`, ...), and this module only owns
//! the severity mapping and the two counters the spec requires.
//!
//! Severities map onto [`log::Level`] as follows:
//!
//! | spec severity | `log` level | notes |
//! |---|---|---|
//! | `ERR` | `Error` | increments [`count_err`] |
//! | `WARN` | `Warn` | increments [`count_warn`] |
//! | `INFO` | `Info` | |
//! | `DEBUG` | `Debug` | |
//! | `TEST` | `Trace`, target suffixed `::test` | |
//! | `DUMP` | `Debug`, target suffixed `::dump` | used by every component's `dump()` |

use std::sync::atomic::{AtomicU64, Ordering};

/// Severities a component may log at. Mirrors spec §6 exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Err,
    Warn,
    Info,
    Debug,
    Test,
    Dump,
}

impl Severity {
    fn level(self) -> log::Level {
        match self {
            Severity::Err => log::Level::Error,
            Severity::Warn => log::Level::Warn,
            Severity::Info => log::Level::Info,
            Severity::Debug => log::Level::Debug,
            Severity::Test => log::Level::Trace,
            Severity::Dump => log::Level::Debug,
        }
    }

    fn target_suffix(self) -> Option<&'static str> {
        match self {
            Severity::Test => Some("test"),
            Severity::Dump => Some("dump"),
            _ => None,
        }
    }
}

static ERR_COUNT: AtomicU64 = AtomicU64::new(0);
static WARN_COUNT: AtomicU64 = AtomicU64::new(0);

/// Emit a log message tagged with `subsystem` at the given severity,
/// truncated to `max_len` bytes (matching the spec's
/// `output_log(severity, max_len, message)` signature). `ERR`/`WARN`
/// increment the respective global counter before the message is handed
/// to the `log` facade.
pub fn output_log(severity: Severity, max_len: usize, subsystem: &str, message: &str) {
    match severity {
        Severity::Err => {
            ERR_COUNT.fetch_add(1, Ordering::Relaxed);
        }
        Severity::Warn => {
            WARN_COUNT.fetch_add(1, Ordering::Relaxed);
        }
        _ => {}
    }

    let truncated = if message.len() > max_len {
        &message[..message.floor_char_boundary(max_len)]
    } else {
        message
    };

    match severity.target_suffix() {
        Some(suffix) => log::log!(target: "hazmem", severity.level(), "[{subsystem}::{suffix}] {truncated}"),
        None => log::log!(target: "hazmem", severity.level(), "[{subsystem}] {truncated}"),
    }
}

/// Every major component's diagnostic entry point (spec §6:
/// `dump(severity, tag, id)`). Not machine-parseable, not stable across
/// versions — a thin wrapper over [`output_log`] that formats the id.
pub fn dump(severity: Severity, tag: &str, id: impl std::fmt::Display, message: &str) {
    output_log(severity, usize::MAX, tag, &format!("#{id}: {message}"));
}

/// Read the current `(count_err, count_warn)` totals without resetting them.
pub fn counts() -> (u64, u64) {
    (
        ERR_COUNT.load(Ordering::Relaxed),
        WARN_COUNT.load(Ordering::Relaxed),
    )
}

/// Atomically read and reset both counters, returning the values seen
/// before the reset.
pub fn take_counts() -> (u64, u64) {
    (
        ERR_COUNT.swap(0, Ordering::Relaxed),
        WARN_COUNT.swap(0, Ordering::Relaxed),
    )
}

trait FloorCharBoundary {
    fn floor_char_boundary(&self, index: usize) -> usize;
}

impl FloorCharBoundary for str {
    fn floor_char_boundary(&self, index: usize) -> usize {
        if index >= self.len() {
            return self.len();
        }
        let mut i = index;
        while i > 0 && !self.is_char_boundary(i) {
            i -= 1;
        }
        i
    }
}
