//! Concurrency configurations.
//!
//! A [`Mode`] picks the counter word type and the collector instance a family
//! of handles reports to. [`Local`] keeps one unsynchronized collector per
//! thread. [`Shared`] keeps a single process-wide collector behind a reentrant
//! lock and uses atomic counters.

use std::cell::{Cell, RefCell};
use std::sync::atomic::AtomicUsize;

use parking_lot::ReentrantMutex;

use crate::collector::Collector;
use crate::state::Word;

mod sealed {
    pub trait Sealed {}
}

/// A concurrency configuration for [`Cc`](crate::Cc) handles.
///
/// This trait is sealed; [`Local`] and [`Shared`] are the only
/// implementations.
pub trait Mode: sealed::Sealed + Sized + 'static {
    /// Storage for the live count and the info word.
    #[doc(hidden)]
    type Word: Word;

    /// Whether handles of this mode may cross threads.
    const MULTITHREADED: bool;

    /// Name used in metrics and tracing output.
    const NAME: &'static str;

    /// Run `f` against this mode's collector.
    ///
    /// Returns `None` if the collector is no longer reachable, which only
    /// happens for [`Local`] while its thread is shutting down.
    #[doc(hidden)]
    fn with_collector<R>(f: impl FnOnce(&RefCell<Collector<Self>>) -> R) -> Option<R>;

    /// Run `f` against this thread's "currently freeing" flag.
    #[doc(hidden)]
    fn with_freeing_flag<R>(f: impl FnOnce(&Cell<bool>) -> R) -> Option<R>;
}

// ============================================================================
// Local
// ============================================================================

/// Single-thread configuration: plain counters, one collector per thread.
///
/// `Cc<T, Local>` is neither `Send` nor `Sync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Local;

thread_local! {
    static LOCAL_COLLECTOR: RefCell<Collector<Local>> = const { RefCell::new(Collector::new()) };
    static LOCAL_FREEING: Cell<bool> = const { Cell::new(false) };
}

impl sealed::Sealed for Local {}

impl Mode for Local {
    type Word = Cell<usize>;

    const MULTITHREADED: bool = false;
    const NAME: &'static str = "local";

    #[inline]
    fn with_collector<R>(f: impl FnOnce(&RefCell<Collector<Self>>) -> R) -> Option<R> {
        LOCAL_COLLECTOR.try_with(f).ok()
    }

    #[inline]
    fn with_freeing_flag<R>(f: impl FnOnce(&Cell<bool>) -> R) -> Option<R> {
        LOCAL_FREEING.try_with(f).ok()
    }
}

// ============================================================================
// Shared
// ============================================================================

/// Multi-thread configuration: atomic counters, one process-wide collector.
///
/// Count increments never lock. Decrements, root buffering and collection
/// serialize on the collector's reentrant lock, so a destructor running under
/// the lock may drop further handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Shared;

static SHARED_COLLECTOR: ReentrantMutex<RefCell<Collector<Shared>>> =
    parking_lot::const_reentrant_mutex(RefCell::new(Collector::new()));

thread_local! {
    static SHARED_FREEING: Cell<bool> = const { Cell::new(false) };
}

impl sealed::Sealed for Shared {}

impl Mode for Shared {
    type Word = AtomicUsize;

    const MULTITHREADED: bool = true;
    const NAME: &'static str = "shared";

    #[inline]
    fn with_collector<R>(f: impl FnOnce(&RefCell<Collector<Self>>) -> R) -> Option<R> {
        let guard = SHARED_COLLECTOR.lock();
        Some(f(&guard))
    }

    #[inline]
    fn with_freeing_flag<R>(f: impl FnOnce(&Cell<bool>) -> R) -> Option<R> {
        SHARED_FREEING.try_with(f).ok()
    }
}

/// Whether this thread is draining the free queue of mode `M`.
#[inline]
pub(crate) fn is_freeing<M: Mode>() -> bool {
    M::with_freeing_flag(Cell::get).unwrap_or(false)
}

/// Sets the "currently freeing" flag for as long as it lives.
///
/// Resets the flag on unwind, so a panicking destructor does not leave the
/// free queue permanently blocked on this thread.
pub(crate) struct FreeingGuard<M: Mode> {
    _mode: std::marker::PhantomData<M>,
}

impl<M: Mode> FreeingGuard<M> {
    /// Returns `None` if this thread is already freeing.
    pub(crate) fn enter() -> Option<Self> {
        let entered = M::with_freeing_flag(|flag| !flag.replace(true))?;
        entered.then_some(Self {
            _mode: std::marker::PhantomData,
        })
    }
}

impl<M: Mode> Drop for FreeingGuard<M> {
    fn drop(&mut self) {
        let _ = M::with_freeing_flag(|flag| flag.set(false));
    }
}
