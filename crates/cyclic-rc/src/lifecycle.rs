//! Process lifecycle.
//!
//! Collector statics are const-initialized, so nothing has to run before the
//! first handle is created. What remains is the teardown: garbage cycles still
//! buffered when the program ends are never destroyed unless someone runs a
//! final full collection. [`RuntimeGuard`] is a reference-counted token for
//! that; any number of independent components may hold one, and the last one
//! dropped collects.
//!
//! # Examples
//!
//! ```
//! use cyclic_rc::lifecycle;
//!
//! fn main() {
//!     let _runtime = lifecycle::init();
//!     // ... build and drop cyclic structures ...
//! } // full collection of the shared collector and this thread's collector
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::collector;
use crate::mode::{Local, Shared};

static ACTIVE_GUARDS: AtomicUsize = AtomicUsize::new(0);

/// A RAII token that keeps the collectors' final teardown pending.
///
/// Dropping the last live guard runs [`shutdown`].
///
/// # Warning
///
/// A guard passed to `mem::forget()` keeps the count above zero for good, so
/// the final collection never runs from a guard drop. [`shutdown`] can still
/// be called directly.
#[must_use = "dropping the guard immediately runs the final collection"]
#[derive(Debug)]
pub struct RuntimeGuard {
    _private: (),
}

/// Register one user of the collectors.
pub fn init() -> RuntimeGuard {
    ACTIVE_GUARDS.fetch_add(1, Ordering::AcqRel);
    RuntimeGuard { _private: () }
}

impl Clone for RuntimeGuard {
    fn clone(&self) -> Self {
        init()
    }
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        if ACTIVE_GUARDS.fetch_sub(1, Ordering::AcqRel) == 1 {
            shutdown();
        }
    }
}

/// Number of live [`RuntimeGuard`]s.
#[must_use]
pub fn active_guards() -> usize {
    ACTIVE_GUARDS.load(Ordering::Acquire)
}

/// Run a full collection of the process-wide collector and of the calling
/// thread's local collector.
///
/// Safe to call at any time and any number of times. Does nothing for a
/// collector that is already collecting, or while this thread is running
/// destructors.
pub fn shutdown() {
    #[cfg(feature = "tracing")]
    ::tracing::debug!(guards = active_guards(), "cc_shutdown");

    let _ = collector::make_collect::<Shared>(true);
    let _ = collector::make_collect::<Local>(true);
}
