//! Trace trait and the `Tracer` that collects an object's out-edges.
//!
//! Types stored in a [`Cc`](crate::Cc) implement [`Trace`] so the collector can
//! reach the handles they own without knowing their layout.

use std::cell::{Cell, RefCell};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet, LinkedList, VecDeque};
use std::hash::BuildHasher;
use std::ptr::NonNull;

// ============================================================================
// Core Trait
// ============================================================================

/// A type whose owned [`Cc`](crate::Cc) handles can be enumerated.
///
/// # Safety
///
/// Implementations **MUST NOT** report a handle the value does not own, and
/// must report each owned handle at most once per call. Reporting a handle
/// twice, or reporting one owned by someone else (for example through an `Rc`
/// shared between two objects), makes trial deletion free live objects.
///
/// Omitting a handle is safe but may leak the cycles it closes.
///
/// Prefer using `#[derive(Trace)]` instead of manual implementation.
///
/// # Examples
///
/// ```
/// use cyclic_rc::{Cc, Trace, Tracer};
/// use std::cell::RefCell;
///
/// struct Node {
///     label: String,
///     next: RefCell<Cc<Node>>,
/// }
///
/// unsafe impl Trace for Node {
///     fn trace(&self, tracer: &mut Tracer) {
///         self.next.trace(tracer);
///     }
/// }
/// ```
pub unsafe trait Trace {
    /// Report every handle directly owned by this value to `tracer`.
    ///
    /// Handles nested in plain containers (vectors, maps, options) count as
    /// directly owned.
    fn trace(&self, tracer: &mut Tracer);
}

// ============================================================================
// VisitTag
// ============================================================================

/// Why a traversal is running.
///
/// The collector does not need callbacks to look at the tag; it exists so
/// cooperating code can tell traversals apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VisitTag {
    /// Trial deletion: subtracting internal references.
    MarkGray,
    /// Deciding which gray objects are garbage.
    Scan,
    /// Restoring the counts of a subgraph proven live.
    ScanBlack,
    /// Gathering a garbage cycle for destruction.
    CollectWhite,
    /// An application-driven traversal.
    User(u32),
}

// ============================================================================
// Tracer
// ============================================================================

/// Receives the out-edges reported by [`Trace::trace`].
///
/// # Examples
///
/// ```
/// use cyclic_rc::{Cc, Trace, Tracer, VisitTag};
///
/// let a = Cc::new(1_u32);
/// let pair = (Cc::clone(&a), Cc::clone(&a));
///
/// let mut tracer = Tracer::new(VisitTag::User(7));
/// pair.trace(&mut tracer);
/// assert_eq!(tracer.tag(), VisitTag::User(7));
/// assert_eq!(tracer.edge_count(), 2);
/// ```
#[derive(Debug)]
pub struct Tracer {
    tag: VisitTag,
    /// When set, only handles of this configuration are kept.
    multithreaded: Option<bool>,
    edges: Vec<NonNull<()>>,
    /// Locks taken during a collection pass, keyed by address. `None` marks
    /// a lock that was contended when first seen.
    locks: Option<HashMap<NonNull<()>, Option<UnlockFn>>>,
}

/// Releases a lock the collector took with a forgotten guard.
pub(crate) type UnlockFn = unsafe fn(NonNull<()>);

/// How a collection pass sees one lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockState {
    /// Not a collection traversal: lock briefly, skip if contended.
    Untracked,
    /// First encounter in this pass.
    Unseen,
    /// Held by this pass; the data may be read directly.
    Held,
    /// Contended when first seen; its contents stay invisible for the pass.
    Blocked,
}

impl Tracer {
    /// Create a tracer for an application-driven traversal.
    #[must_use]
    pub const fn new(tag: VisitTag) -> Self {
        Self {
            tag,
            multithreaded: None,
            edges: Vec::new(),
            locks: None,
        }
    }

    /// Create the tracer used by a collector of one configuration.
    pub(crate) fn for_mode(multithreaded: bool) -> Self {
        Self {
            tag: VisitTag::MarkGray,
            multithreaded: Some(multithreaded),
            edges: Vec::new(),
            locks: Some(HashMap::new()),
        }
    }

    /// The purpose of the current traversal.
    #[inline]
    #[must_use]
    pub const fn tag(&self) -> VisitTag {
        self.tag
    }

    /// Number of edges reported so far.
    #[inline]
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Record one edge to the allocation whose header is `header`.
    ///
    /// Handles of the other configuration are not visible to this
    /// collector: their counts include this edge and they stay live.
    #[inline]
    pub(crate) fn report(&mut self, multithreaded: bool, header: NonNull<()>) {
        if self.multithreaded.is_none_or(|mode| mode == multithreaded) {
            self.edges.push(header);
        }
    }

    /// Start a new traversal, discarding edges from the previous one.
    #[inline]
    pub(crate) fn begin(&mut self, tag: VisitTag) {
        self.tag = tag;
        self.edges.clear();
    }

    /// Take the edges reported since [`Tracer::begin`].
    #[inline]
    pub(crate) fn drain(&mut self) -> std::vec::Drain<'_, NonNull<()>> {
        self.edges.drain(..)
    }

    /// How the lock at `addr` should be traced.
    pub(crate) fn lock_state(&self, addr: NonNull<()>) -> LockState {
        match &self.locks {
            None => LockState::Untracked,
            Some(locks) => match locks.get(&addr) {
                None => LockState::Unseen,
                Some(Some(_)) => LockState::Held,
                Some(None) => LockState::Blocked,
            },
        }
    }

    /// Keep the lock at `addr`, acquired with a forgotten guard, until the
    /// pass ends.
    pub(crate) fn hold(&mut self, addr: NonNull<()>, unlock: UnlockFn) {
        if let Some(locks) = &mut self.locks {
            if let Entry::Vacant(slot) = locks.entry(addr) {
                slot.insert(Some(unlock));
            }
        }
    }

    /// Treat the lock at `addr` as opaque until the pass ends.
    pub(crate) fn block(&mut self, addr: NonNull<()>) {
        if let Some(locks) = &mut self.locks {
            locks.entry(addr).or_insert(None);
        }
    }

    /// Release every lock held by this pass.
    ///
    /// Traversals of one pass must see the same edges, so locks stay held from
    /// the first time they are traced until the pass is complete.
    pub(crate) fn release_locks(&mut self) {
        if let Some(locks) = &mut self.locks {
            for (addr, unlock) in locks.drain() {
                if let Some(unlock) = unlock {
                    // SAFETY: Acquired by this tracer and not yet released;
                    // the owning allocation outlives the pass
                    unsafe { unlock(addr) };
                }
            }
        }
    }
}

impl Drop for Tracer {
    fn drop(&mut self) {
        self.release_locks();
    }
}

// ============================================================================
// Trace implementations for primitive types
// ============================================================================

macro_rules! impl_trace_for_primitives {
    ($($t:ty),* $(,)?) => {
        $(
            // SAFETY: Primitive types contain no handles
            unsafe impl Trace for $t {
                #[inline]
                fn trace(&self, _tracer: &mut Tracer) {}
            }
        )*
    };
}

impl_trace_for_primitives! {
    // Signed integers
    i8, i16, i32, i64, i128, isize,
    // Unsigned integers
    u8, u16, u32, u64, u128, usize,
    // Floating point
    f32, f64,
    // Other primitives
    bool, char, (),
    // String types
    String, str, &'static str,
    // Common std types without handles
    std::time::Duration,
    std::time::Instant,
    std::time::SystemTime,
    std::path::Path,
    std::path::PathBuf,
    std::ffi::OsStr,
    std::ffi::OsString,
    std::num::NonZeroU8,
    std::num::NonZeroU16,
    std::num::NonZeroU32,
    std::num::NonZeroU64,
    std::num::NonZeroUsize,
    std::num::NonZeroI32,
    std::num::NonZeroI64,
    std::sync::atomic::AtomicBool,
    std::sync::atomic::AtomicU32,
    std::sync::atomic::AtomicU64,
    std::sync::atomic::AtomicUsize,
    std::sync::atomic::AtomicIsize,
}

// ============================================================================
// Trace implementations for owning containers
// ============================================================================

// SAFETY: Box owns its contents
unsafe impl<T: Trace + ?Sized> Trace for Box<T> {
    #[inline]
    fn trace(&self, tracer: &mut Tracer) {
        T::trace(self.as_ref(), tracer);
    }
}

// `Rc` and `Arc` may be shared by several managed objects, so the handles
// behind them are not owned by any one of them. Treat them as opaque: the
// counts they hold keep their targets alive.

// SAFETY: Reports nothing
unsafe impl<T: ?Sized> Trace for std::rc::Rc<T> {
    #[inline]
    fn trace(&self, _tracer: &mut Tracer) {}
}

// SAFETY: Reports nothing
unsafe impl<T: ?Sized> Trace for std::sync::Arc<T> {
    #[inline]
    fn trace(&self, _tracer: &mut Tracer) {}
}

// SAFETY: Vec owns all elements
unsafe impl<T: Trace> Trace for Vec<T> {
    #[inline]
    fn trace(&self, tracer: &mut Tracer) {
        for item in self {
            item.trace(tracer);
        }
    }
}

// SAFETY: Arrays own all elements
unsafe impl<T: Trace, const N: usize> Trace for [T; N] {
    #[inline]
    fn trace(&self, tracer: &mut Tracer) {
        for item in self {
            item.trace(tracer);
        }
    }
}

// SAFETY: Slices trace all elements
unsafe impl<T: Trace> Trace for [T] {
    #[inline]
    fn trace(&self, tracer: &mut Tracer) {
        for item in self {
            item.trace(tracer);
        }
    }
}

// SAFETY: Option traces its contents if Some
unsafe impl<T: Trace> Trace for Option<T> {
    #[inline]
    fn trace(&self, tracer: &mut Tracer) {
        if let Some(inner) = self {
            inner.trace(tracer);
        }
    }
}

// SAFETY: Result traces whichever variant is present
unsafe impl<T: Trace, E: Trace> Trace for Result<T, E> {
    #[inline]
    fn trace(&self, tracer: &mut Tracer) {
        match self {
            Ok(v) => v.trace(tracer),
            Err(e) => e.trace(tracer),
        }
    }
}

// SAFETY: Cell<T> traces a copy of its contents
unsafe impl<T: Trace + Copy> Trace for Cell<T> {
    #[inline]
    fn trace(&self, tracer: &mut Tracer) {
        self.get().trace(tracer);
    }
}

// SAFETY: RefCell traces its contents
unsafe impl<T: Trace + ?Sized> Trace for RefCell<T> {
    #[inline]
    fn trace(&self, tracer: &mut Tracer) {
        // A mutably borrowed cell is skipped; missing edges only delay
        // collection.
        if let Ok(inner) = self.try_borrow() {
            inner.trace(tracer);
        }
    }
}

// SAFETY: VecDeque owns all elements
unsafe impl<T: Trace> Trace for VecDeque<T> {
    #[inline]
    fn trace(&self, tracer: &mut Tracer) {
        for item in self {
            item.trace(tracer);
        }
    }
}

// SAFETY: LinkedList owns all elements
unsafe impl<T: Trace> Trace for LinkedList<T> {
    #[inline]
    fn trace(&self, tracer: &mut Tracer) {
        for item in self {
            item.trace(tracer);
        }
    }
}

// SAFETY: BinaryHeap owns all elements
unsafe impl<T: Trace> Trace for BinaryHeap<T> {
    #[inline]
    fn trace(&self, tracer: &mut Tracer) {
        for item in self {
            item.trace(tracer);
        }
    }
}

// SAFETY: HashMap owns all keys and values
unsafe impl<K: Trace, V: Trace, S: BuildHasher> Trace for HashMap<K, V, S> {
    #[inline]
    fn trace(&self, tracer: &mut Tracer) {
        for (k, v) in self {
            k.trace(tracer);
            v.trace(tracer);
        }
    }
}

// SAFETY: HashSet owns all elements
unsafe impl<T: Trace, S: BuildHasher> Trace for HashSet<T, S> {
    #[inline]
    fn trace(&self, tracer: &mut Tracer) {
        for item in self {
            item.trace(tracer);
        }
    }
}

// SAFETY: BTreeMap owns all key-value pairs
unsafe impl<K: Trace, V: Trace> Trace for BTreeMap<K, V> {
    #[inline]
    fn trace(&self, tracer: &mut Tracer) {
        for (k, v) in self {
            k.trace(tracer);
            v.trace(tracer);
        }
    }
}

// SAFETY: BTreeSet owns all elements
unsafe impl<T: Trace> Trace for BTreeSet<T> {
    #[inline]
    fn trace(&self, tracer: &mut Tracer) {
        for item in self {
            item.trace(tracer);
        }
    }
}

// ============================================================================
// Trace implementations for tuples
// ============================================================================

macro_rules! impl_trace_for_tuples {
    () => {};
    ($first:ident $(, $rest:ident)*) => {
        // SAFETY: Tuples trace all their elements
        unsafe impl<$first: Trace $(, $rest: Trace)*> Trace for ($first, $($rest,)*) {
            #[inline]
            #[allow(non_snake_case)]
            fn trace(&self, tracer: &mut Tracer) {
                let ($first, $($rest,)*) = self;
                $first.trace(tracer);
                $($rest.trace(tracer);)*
            }
        }
        impl_trace_for_tuples!($($rest),*);
    };
}

impl_trace_for_tuples!(A, B, C, D, E, F, G, H, I, J, K, L);

// SAFETY: PhantomData contains no actual data
unsafe impl<T: ?Sized> Trace for std::marker::PhantomData<T> {
    #[inline]
    fn trace(&self, _tracer: &mut Tracer) {}
}
