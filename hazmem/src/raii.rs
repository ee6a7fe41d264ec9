//! Generic RAII scope guard.
//!
//! The rest of the crate builds its own purpose-specific guards on this
//! pattern: [`crate::hazard::SlotHandle`] tears down a hazard slot on
//! drop, and the dynamic-TLS per-thread row runs destructors on drop.
//! This module keeps only the reusable, domain-agnostic piece.

/// Generic scope guard that runs cleanup code on drop, unless cancelled.
pub struct ScopeGuard<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    /// Create a new scope guard.
    pub fn new(cleanup: F) -> Self {
        Self {
            cleanup: Some(cleanup),
        }
    }

    /// Cancel the cleanup; the closure is dropped without running.
    pub fn cancel(mut self) {
        self.cleanup = None;
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

/// Run `$e` when the enclosing scope exits, unless the guard is cancelled.
#[macro_export]
macro_rules! defer {
    ($e:expr) => {
        let _guard = $crate::raii::ScopeGuard::new(|| $e);
    };
}
