//! Multi-thread configuration.
//!
//! [`Cc<T>`] here is `crate::Cc<T, Shared>`: atomic counts, one process-wide
//! collector behind a reentrant lock, and `Send + Sync` when `T` is. Use
//! `parking_lot` locks for interior mutability inside shared values; the
//! collector knows how to trace them.
//!
//! # Examples
//!
//! ```
//! use cyclic_rc::sync::{self, Cc};
//! use cyclic_rc::Trace;
//! use parking_lot::Mutex;
//!
//! #[derive(Trace, Default)]
//! struct Node {
//!     peer: Mutex<Option<Cc<Node>>>,
//! }
//!
//! let a = Cc::new_shared(Node::default());
//! let b = Cc::new_shared(Node::default());
//! *a.peer.lock() = Some(Cc::clone(&b));
//! *b.peer.lock() = Some(Cc::clone(&a));
//!
//! let worker = std::thread::spawn(move || drop(b));
//! worker.join().unwrap();
//! drop(a);
//!
//! sync::collect_full();
//! ```

use std::mem;
use std::ptr::NonNull;

use parking_lot::{Mutex, RwLock};

use crate::collector::{self, BufferStats};
use crate::metrics::CollectMetrics;
use crate::trace::{LockState, Trace, Tracer};

pub use crate::mode::Shared;

/// A cycle-collected handle usable across threads.
pub type Cc<T> = crate::Cc<T, Shared>;

/// Run one amortized collection pass on the process-wide collector.
///
/// Blocks while another thread is collecting or draining.
pub fn collect() {
    let _ = collector::make_collect::<Shared>(false);
}

/// Collect every candidate buffered on the process-wide collector and free
/// the resulting garbage before returning.
pub fn collect_full() {
    let _ = collector::make_collect::<Shared>(true);
}

/// Whether this thread is currently running destructors from the shared
/// collector's free queue.
#[must_use]
pub fn is_freeing() -> bool {
    crate::mode::is_freeing::<Shared>()
}

/// Buffer occupancy of the process-wide collector.
#[must_use]
pub fn buffer_stats() -> BufferStats {
    collector::buffer_stats_of::<Shared>()
}

/// Metrics of the last collection on the process-wide collector.
#[must_use]
pub fn last_collect_metrics() -> CollectMetrics {
    collector::last_metrics::<Shared>()
}

// ============================================================================
// Lock tracing
// ============================================================================

// A collection pass takes each lock it traces with `try_lock` and holds it
// until the pass ends, so no thread can move handles in or out while the
// traversals run. A lock another thread holds is left alone and its contents
// stay invisible for the whole pass.

unsafe fn unlock_mutex<T>(addr: NonNull<()>) {
    // SAFETY: `addr` is a `Mutex<T>` locked by `Mutex::trace` with a
    // forgotten guard
    unsafe { addr.cast::<Mutex<T>>().as_ref().force_unlock() };
}

unsafe fn unlock_rwlock_read<T>(addr: NonNull<()>) {
    // SAFETY: `addr` is an `RwLock<T>` read-locked by `RwLock::trace` with a
    // forgotten guard
    unsafe { addr.cast::<RwLock<T>>().as_ref().force_unlock_read() };
}

// SAFETY: Traces the protected value while holding the lock
unsafe impl<T: Trace> Trace for Mutex<T> {
    fn trace(&self, tracer: &mut Tracer) {
        let addr = NonNull::from(self).cast::<()>();
        match tracer.lock_state(addr) {
            LockState::Untracked => {
                if let Some(guard) = self.try_lock() {
                    guard.trace(tracer);
                }
            }
            LockState::Unseen => match self.try_lock() {
                Some(guard) => {
                    mem::forget(guard);
                    tracer.hold(addr, unlock_mutex::<T>);
                    // SAFETY: Locked by this pass
                    unsafe { (*self.data_ptr()).trace(tracer) };
                }
                None => tracer.block(addr),
            },
            // SAFETY: Locked by this pass
            LockState::Held => unsafe { (*self.data_ptr()).trace(tracer) },
            LockState::Blocked => {}
        }
    }
}

// SAFETY: Traces the protected value while holding a read lock
unsafe impl<T: Trace> Trace for RwLock<T> {
    fn trace(&self, tracer: &mut Tracer) {
        let addr = NonNull::from(self).cast::<()>();
        match tracer.lock_state(addr) {
            LockState::Untracked => {
                if let Some(guard) = self.try_read() {
                    guard.trace(tracer);
                }
            }
            LockState::Unseen => match self.try_read() {
                Some(guard) => {
                    mem::forget(guard);
                    tracer.hold(addr, unlock_rwlock_read::<T>);
                    // SAFETY: Read-locked by this pass
                    unsafe { (*self.data_ptr()).trace(tracer) };
                }
                None => tracer.block(addr),
            },
            // SAFETY: Read-locked by this pass
            LockState::Held => unsafe { (*self.data_ptr()).trace(tracer) },
            LockState::Blocked => {}
        }
    }
}
