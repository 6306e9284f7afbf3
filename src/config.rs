//! Process-wide execution flags.
//!
//! Two scalars, both explicit set/clear, neither consulted inside user
//! callables by the core:
//! - *abort-requested*: cooperative cancellation, checked by executors
//!   before dispatching each compute step.
//! - *skip-evictions*: disables memory-bounding evictions in freshly
//!   compiled plans (pin-restoring evictions are always kept).

use std::sync::atomic::{AtomicBool, Ordering};

static ABORT_REQUESTED: AtomicBool = AtomicBool::new(false);
static SKIP_EVICTIONS: AtomicBool = AtomicBool::new(false);

/// Request that any running (or future) execution stops at its next
/// dispatch point. Callables may invoke this to cancel the run they are
/// part of; the executor then fails with an *aborted* error.
///
/// The flag stays set until [`reset_abort`] is called.
pub fn abort_run() {
    ABORT_REQUESTED.store(true, Ordering::SeqCst);
}

/// Clear the abort flag.
pub fn reset_abort() {
    ABORT_REQUESTED.store(false, Ordering::SeqCst);
}

/// True when an abort has been requested and not yet reset.
#[must_use]
pub fn aborted() -> bool {
    ABORT_REQUESTED.load(Ordering::SeqCst)
}

/// Globally enable or disable eviction planning.
///
/// When set, plans compiled afterwards contain no memory-bounding
/// `Evict` steps. Already-compiled plans are unaffected.
pub fn set_evictions_skipped(skipped: bool) {
    SKIP_EVICTIONS.store(skipped, Ordering::SeqCst);
}

/// True when eviction planning is disabled.
#[must_use]
pub fn evictions_skipped() -> bool {
    SKIP_EVICTIONS.load(Ordering::SeqCst)
}
