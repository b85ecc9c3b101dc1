//! The `Cc` handle and its allocation.

use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop};
use std::ops::Deref;
use std::ptr::{self, NonNull};

use crate::collector;
use crate::mode::{Local, Mode, Shared};
use crate::slot::{self, Header};
use crate::trace::{Trace, Tracer};

// ============================================================================
// CcBox - The allocation behind a handle
// ============================================================================

/// Header and value in one allocation. The header comes first so a header
/// pointer is also a pointer to the box.
#[repr(C)]
struct CcBox<T, M: Mode> {
    header: Header<M>,
    value: ManuallyDrop<T>,
}

impl<T: Trace + 'static, M: Mode> CcBox<T, M> {
    /// Type-erased trace function for this value type.
    unsafe fn trace_value(header: NonNull<Header<M>>, tracer: &mut Tracer) {
        let boxed = header.cast::<Self>().as_ptr();
        // SAFETY: The header belongs to a live `CcBox<T, M>`; a dead value is
        // never touched
        unsafe {
            if !(*boxed).header.state.is_dead() {
                (*boxed).value.trace(tracer);
            }
        }
    }

    /// Type-erased drop function for this value type.
    unsafe fn drop_value(header: NonNull<Header<M>>) {
        let boxed = header.cast::<Self>().as_ptr();
        // SAFETY: The collector drops each value exactly once
        unsafe { ManuallyDrop::drop(&mut (*boxed).value) };
    }

    /// Type-erased deallocation function for this value type.
    unsafe fn dealloc(header: NonNull<Header<M>>) {
        let boxed = header.cast::<Self>().as_ptr();
        // SAFETY: Allocated by `Box` in `Cc::allocate`; the value is already
        // dropped and `ManuallyDrop` keeps it from being dropped again
        drop(unsafe { Box::from_raw(boxed) });
    }
}

// ============================================================================
// Cc - The handle
// ============================================================================

struct Inner<T: ?Sized, M: Mode> {
    header: NonNull<Header<M>>,
    value: NonNull<T>,
}

impl<T: ?Sized, M: Mode> Clone for Inner<T, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized, M: Mode> Copy for Inner<T, M> {}

/// A reference-counted pointer with cycle collection.
///
/// `Cc<T>` behaves like `Rc<T>`: cloning increments a count, dropping the
/// last handle destroys the value immediately. Handles that form a cycle are
/// reclaimed by [`collect`](crate::collect) or
/// [`collect_full`](crate::collect_full).
///
/// A `Cc` may be null, like an empty `shared_ptr`. [`Cc::default`] and
/// [`Cc::null`] create one.
///
/// # Configurations
///
/// The mode parameter selects the collector. `Cc<T>` (`Cc<T, Local>`) uses
/// this thread's collector and is neither `Send` nor `Sync`.
/// [`sync::Cc<T>`](crate::sync::Cc) (`Cc<T, Shared>`) uses the process-wide
/// collector and is `Send + Sync` when `T` is.
///
/// # Panics
///
/// Dereferencing a null handle panics, as does dereferencing a handle whose
/// value has already been destroyed (only observable from the `Drop` impl of
/// another member of the same garbage cycle). Use [`Cc::get`] for fallible
/// access.
///
/// # Examples
///
/// ```
/// use cyclic_rc::Cc;
///
/// let x = Cc::new(42);
/// assert_eq!(*x, 42);
///
/// let y = Cc::clone(&x);
/// assert!(Cc::ptr_eq(&x, &y));
/// assert_eq!(Cc::use_count(&x), 2);
/// ```
pub struct Cc<T: ?Sized, M: Mode = Local> {
    inner: Option<Inner<T, M>>,
    _marker: PhantomData<T>,
}

impl<T: Trace + 'static> Cc<T> {
    /// Allocate a value that may take part in reference cycles.
    pub fn new(value: T) -> Self {
        Self::allocate(value, false)
    }

    /// Allocate a value that never takes part in a reference cycle.
    ///
    /// Acyclic objects are never buffered as cycle-root candidates, so they
    /// cost nothing to the collector. Declaring an object acyclic when it
    /// can close a cycle leaks that cycle.
    ///
    /// # Examples
    ///
    /// ```
    /// use cyclic_rc::Cc;
    ///
    /// let name = Cc::new_acyclic(String::from("leaf"));
    /// let other = Cc::clone(&name);
    /// drop(other);
    /// assert!(!Cc::is_buffered(&name));
    /// ```
    pub fn new_acyclic(value: T) -> Self {
        Self::allocate(value, true)
    }
}

impl<T: Trace + Send + Sync + 'static> Cc<T, Shared> {
    /// Allocate a value on the process-wide collector.
    ///
    /// # Examples
    ///
    /// ```
    /// use cyclic_rc::sync::Cc;
    ///
    /// let x = Cc::new_shared(7_u64);
    /// let y = Cc::clone(&x);
    /// std::thread::spawn(move || assert_eq!(*y, 7)).join().unwrap();
    /// ```
    pub fn new_shared(value: T) -> Self {
        Self::allocate(value, false)
    }

    /// Allocate an acyclic value on the process-wide collector.
    pub fn new_shared_acyclic(value: T) -> Self {
        Self::allocate(value, true)
    }
}

impl<T: Trace + 'static, M: Mode> Cc<T, M> {
    fn allocate(value: T, acyclic: bool) -> Self {
        let boxed = Box::new(CcBox {
            header: Header::new(
                acyclic,
                CcBox::<T, M>::trace_value,
                CcBox::<T, M>::drop_value,
                CcBox::<T, M>::dealloc,
            ),
            value: ManuallyDrop::new(value),
        });
        let ptr = NonNull::from(Box::leak(boxed));
        let header = ptr.cast::<Header<M>>();
        // SAFETY: Freshly allocated; this handle is its first owner
        unsafe { slot::increase_refcount(header) };
        // SAFETY: Field of a non-null allocation; `ManuallyDrop<T>` is
        // layout-compatible with `T`
        let value =
            unsafe { NonNull::new_unchecked(ptr::addr_of_mut!((*ptr.as_ptr()).value).cast::<T>()) };
        Self {
            inner: Some(Inner { header, value }),
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized, M: Mode> Cc<T, M> {
    /// Create a null handle.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            inner: None,
            _marker: PhantomData,
        }
    }

    /// Borrow the value.
    ///
    /// Returns `None` for a null handle, or if the value has already been
    /// destroyed by the collector.
    #[must_use]
    pub fn get(this: &Self) -> Option<&T> {
        let inner = this.inner?;
        // SAFETY: The handle keeps the allocation live
        if unsafe { slot::state(inner.header) }.is_dead() {
            return None;
        }
        // SAFETY: Live allocation with a value that has not been dropped
        Some(unsafe { inner.value.as_ref() })
    }

    /// Whether this handle is null.
    #[must_use]
    pub const fn is_null(this: &Self) -> bool {
        this.inner.is_none()
    }

    /// Drop the target and leave this handle null.
    pub fn reset(this: &mut Self) {
        drop(mem::take(this));
    }

    /// Drop the target and take over `other`'s target instead.
    pub fn reset_with(this: &mut Self, other: Self) {
        let previous = mem::replace(this, other);
        drop(previous);
    }

    /// Exchange the targets of two handles. Counts are untouched.
    pub fn swap(this: &mut Self, other: &mut Self) {
        mem::swap(this, other);
    }

    /// Number of handles to the target, or 0 for a null handle.
    #[must_use]
    pub fn use_count(this: &Self) -> usize {
        // SAFETY: The handle keeps the allocation live
        this.inner
            .map_or(0, |inner| unsafe { slot::state(inner.header) }.count())
    }

    /// Whether this is the only handle to its target.
    #[must_use]
    pub fn is_unique(this: &Self) -> bool {
        Self::use_count(this) == 1
    }

    /// Whether two handles share a target. Two null handles are equal.
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.inner.map(|inner| inner.header) == other.inner.map(|inner| inner.header)
    }

    /// Convert to a handle of a related type that shares this allocation.
    ///
    /// `project` maps the value to the view the new handle exposes, typically
    /// an unsizing coercion to a trait object. The count is carried over.
    ///
    /// # Examples
    ///
    /// ```
    /// use cyclic_rc::Cc;
    /// use std::fmt::Display;
    ///
    /// let n = Cc::new(5_i32);
    /// let shown: Cc<dyn Display> = Cc::upcast(Cc::clone(&n), |v| v as &dyn Display);
    /// assert_eq!(shown.to_string(), "5");
    /// assert!(Cc::use_count(&n) == 2);
    /// ```
    pub fn upcast<U: ?Sized>(this: Self, project: impl FnOnce(&T) -> &U) -> Cc<U, M> {
        let Some(value) = Self::get(&this) else {
            return Cc::null();
        };
        let value = NonNull::from(project(value));
        let this = ManuallyDrop::new(this);
        Cc {
            inner: this.inner.map(|inner| Inner {
                header: inner.header,
                value,
            }),
            _marker: PhantomData,
        }
    }

    /// Report the handles owned by the value to `tracer`.
    ///
    /// Does nothing for a null handle or a destroyed value.
    ///
    /// # Examples
    ///
    /// ```
    /// use cyclic_rc::{Cc, Tracer, VisitTag};
    ///
    /// let leaf = Cc::new(1_u8);
    /// let pair = Cc::new((Cc::clone(&leaf), Cc::clone(&leaf)));
    ///
    /// let mut tracer = Tracer::new(VisitTag::User(0));
    /// Cc::visit_children(&pair, &mut tracer);
    /// assert_eq!(tracer.edge_count(), 2);
    /// ```
    pub fn visit_children(this: &Self, tracer: &mut Tracer) {
        if let Some(inner) = this.inner {
            // SAFETY: The handle keeps the allocation live
            unsafe { ((*inner.header.as_ptr()).trace_fn)(inner.header, tracer) };
        }
    }

    /// Whether the target is currently buffered as a cycle-root candidate.
    #[must_use]
    pub fn is_buffered(this: &Self) -> bool {
        // SAFETY: The handle keeps the allocation live
        this.inner
            .is_some_and(|inner| unsafe { slot::state(inner.header) }.is_buffered())
    }

    /// Whether the target was allocated as acyclic.
    #[must_use]
    pub fn is_acyclic(this: &Self) -> bool {
        // SAFETY: The handle keeps the allocation live
        this.inner
            .is_some_and(|inner| unsafe { slot::state(inner.header) }.is_acyclic())
    }

    /// Run a collection on this handle family's collector: one amortized
    /// pass, or a full collection when `all` is set.
    ///
    /// Does nothing if called while that collector is already collecting or
    /// while this thread is running its destructors.
    pub fn collect(all: bool) {
        let _ = collector::make_collect::<M>(all);
    }

    #[cfg(test)]
    pub(crate) fn header(this: &Self) -> Option<NonNull<Header<M>>> {
        this.inner.map(|inner| inner.header)
    }
}

#[cold]
#[track_caller]
fn deref_failed(null: bool) -> ! {
    if null {
        panic!("dereferenced a null Cc");
    }
    panic!("dereferenced a Cc whose value has already been destroyed");
}

impl<T: ?Sized, M: Mode> Deref for Cc<T, M> {
    type Target = T;

    #[track_caller]
    fn deref(&self) -> &Self::Target {
        match Self::get(self) {
            Some(value) => value,
            None => deref_failed(self.inner.is_none()),
        }
    }
}

impl<T: ?Sized, M: Mode> Clone for Cc<T, M> {
    fn clone(&self) -> Self {
        if let Some(inner) = self.inner {
            // SAFETY: `self` keeps the allocation live
            unsafe { slot::increase_refcount(inner.header) };
        }
        Self {
            inner: self.inner,
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized, M: Mode> Drop for Cc<T, M> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            // SAFETY: This handle's count is given up exactly once
            unsafe { slot::decrease_refcount(inner.header) };
        }
    }
}

// SAFETY: Reports the one edge this handle represents
unsafe impl<T: ?Sized, M: Mode> Trace for Cc<T, M> {
    #[inline]
    fn trace(&self, tracer: &mut Tracer) {
        if let Some(inner) = self.inner {
            tracer.report(M::MULTITHREADED, inner.header.cast());
        }
    }
}

impl<T: ?Sized, M: Mode> Default for Cc<T, M> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: Trace + 'static> From<T> for Cc<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: ?Sized + PartialEq, M: Mode> PartialEq for Cc<T, M> {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

impl<T: ?Sized + Eq, M: Mode> Eq for Cc<T, M> {}

impl<T: ?Sized + PartialOrd, M: Mode> PartialOrd for Cc<T, M> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        (**self).partial_cmp(&**other)
    }
}

impl<T: ?Sized + Ord, M: Mode> Ord for Cc<T, M> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (**self).cmp(&**other)
    }
}

impl<T: ?Sized + std::hash::Hash, M: Mode> std::hash::Hash for Cc<T, M> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (**self).hash(state);
    }
}

impl<T: ?Sized + std::fmt::Debug, M: Mode> std::fmt::Debug for Cc<T, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match Self::get(self) {
            Some(value) => f.debug_tuple("Cc").field(&value).finish(),
            None if self.inner.is_none() => write!(f, "Cc(<null>)"),
            None => write!(f, "Cc(<dead>)"),
        }
    }
}

impl<T: ?Sized + std::fmt::Display, M: Mode> std::fmt::Display for Cc<T, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&**self, f)
    }
}

impl<T: ?Sized, M: Mode> std::fmt::Pointer for Cc<T, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let header = self
            .inner
            .map_or(ptr::null(), |inner| inner.header.as_ptr().cast_const());
        std::fmt::Pointer::fmt(&header, f)
    }
}

impl<T: ?Sized, M: Mode> AsRef<T> for Cc<T, M> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T: ?Sized, M: Mode> std::borrow::Borrow<T> for Cc<T, M> {
    fn borrow(&self) -> &T {
        self
    }
}

// `Cc<T, Local>` stays !Send + !Sync through its `NonNull` fields.

// SAFETY: Shared handles use atomic counts and the process-wide collector;
// the value may be used, traced and dropped from any thread, which `T: Send
// + Sync` permits.
unsafe impl<T: ?Sized + Send + Sync> Send for Cc<T, Shared> {}

// SAFETY: See the `Send` impl.
unsafe impl<T: ?Sized + Send + Sync> Sync for Cc<T, Shared> {}
