//! Per-object reference-count state.
//!
//! Every managed allocation carries one [`RcState`]: the live count plus a
//! packed info word holding the color, buffered flag, generation age and the
//! destruction flags used by the deferred-free queue.
//!
//! Destruction goes doomed, then dead, then dropped: queued for destruction,
//! value no longer accessible, destructor finished.

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

// ============================================================================
// Word - the storage cell for counts and flags
// ============================================================================

/// A machine word with interior mutability.
///
/// `Cell<usize>` backs the single-thread configuration and `AtomicUsize` the
/// multi-thread one. Read-modify-write on the info word goes through
/// [`Word::update`] so concurrent increments never lose a color write.
pub trait Word: 'static {
    /// Create a word holding `value`.
    fn new(value: usize) -> Self;

    /// Read the current value.
    fn get(&self) -> usize;

    /// Overwrite the current value.
    fn set(&self, value: usize);

    /// Add one, saturating at `usize::MAX`. Returns the new value.
    fn increment(&self) -> usize;

    /// Subtract one. Returns the new value.
    fn decrement(&self) -> usize;

    /// Apply `f` to the current value.
    fn update(&self, f: impl Fn(usize) -> usize);
}

impl Word for Cell<usize> {
    #[inline]
    fn new(value: usize) -> Self {
        Self::new(value)
    }

    #[inline]
    fn get(&self) -> usize {
        Self::get(self)
    }

    #[inline]
    fn set(&self, value: usize) {
        Self::set(self, value);
    }

    #[inline]
    fn increment(&self) -> usize {
        let next = Self::get(self).saturating_add(1);
        Self::set(self, next);
        next
    }

    #[inline]
    fn decrement(&self) -> usize {
        let current = Self::get(self);
        debug_assert!(current > 0, "reference count underflow");
        let next = current.wrapping_sub(1);
        Self::set(self, next);
        next
    }

    #[inline]
    fn update(&self, f: impl Fn(usize) -> usize) {
        Self::set(self, f(Self::get(self)));
    }
}

impl Word for AtomicUsize {
    #[inline]
    fn new(value: usize) -> Self {
        Self::new(value)
    }

    /// Uses Acquire ordering to see the complete effect of prior decrements.
    #[inline]
    fn get(&self) -> usize {
        self.load(Ordering::Acquire)
    }

    #[inline]
    fn set(&self, value: usize) {
        self.store(value, Ordering::Release);
    }

    /// Relaxed is enough for an increment: the caller already holds a handle.
    #[inline]
    fn increment(&self) -> usize {
        match self.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |count| {
            if count == usize::MAX {
                None
            } else {
                Some(count + 1)
            }
        }) {
            Ok(previous) => previous + 1,
            Err(saturated) => saturated,
        }
    }

    #[inline]
    fn decrement(&self) -> usize {
        let previous = self.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "reference count underflow");
        previous.wrapping_sub(1)
    }

    #[inline]
    fn update(&self, f: impl Fn(usize) -> usize) {
        // The closure never fails, so the result is always Ok.
        let _ = self.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| Some(f(v)));
    }
}

// ============================================================================
// Color and Age
// ============================================================================

/// Trial-deletion color of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    /// In use, or free.
    Black = 0,
    /// Acyclic; never takes part in cycle collection.
    Green = 1,
    /// Possible member of a cycle, mid trial deletion.
    Gray = 2,
    /// Member of a garbage cycle.
    White = 3,
    /// Possible root of a garbage cycle.
    Purple = 4,
}

impl Color {
    const fn from_bits(bits: usize) -> Self {
        match bits {
            1 => Self::Green,
            2 => Self::Gray,
            3 => Self::White,
            4 => Self::Purple,
            _ => Self::Black,
        }
    }
}

/// Generation of a buffered root candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Age {
    /// Buffered since the last collection pass.
    Young = 0,
    /// Aging through the medium buckets.
    Medium = 1,
    /// Due for trial deletion on the next pass.
    Old = 2,
}

impl Age {
    const fn from_bits(bits: usize) -> Self {
        match bits {
            1 => Self::Medium,
            2 => Self::Old,
            _ => Self::Young,
        }
    }
}

// ============================================================================
// Info word layout
// ============================================================================

const COLOR_MASK: usize = 0b111;
const BUFFERED_FLAG: usize = 1 << 3;
const AGE_SHIFT: usize = 4;
const AGE_MASK: usize = 0b11 << AGE_SHIFT;
/// Queued for destruction; handle drops targeting it only decrement.
const DOOMED_FLAG: usize = 1 << 6;
/// The value's destructor has started; the value must not be accessed.
const DEAD_FLAG: usize = 1 << 7;
/// The value's destructor has finished; only the allocation remains.
const DROPPED_FLAG: usize = 1 << 8;

// ============================================================================
// RcState
// ============================================================================

/// Live count plus packed color/buffered/age/destruction flags.
pub struct RcState<W: Word> {
    count: W,
    info: W,
}

impl<W: Word> RcState<W> {
    /// A fresh state: count zero, unbuffered, young, black or green.
    pub fn new(acyclic: bool) -> Self {
        let color = if acyclic { Color::Green } else { Color::Black };
        Self {
            count: W::new(0),
            info: W::new(color as usize),
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count.get()
    }

    #[inline]
    pub fn is_count_zero(&self) -> bool {
        self.count() == 0
    }

    #[inline]
    pub fn color(&self) -> Color {
        Color::from_bits(self.info.get() & COLOR_MASK)
    }

    #[inline]
    pub fn age(&self) -> Age {
        Age::from_bits((self.info.get() & AGE_MASK) >> AGE_SHIFT)
    }

    #[inline]
    pub fn is_acyclic(&self) -> bool {
        self.color() == Color::Green
    }

    #[inline]
    pub fn is_black(&self) -> bool {
        self.color() == Color::Black
    }

    #[inline]
    pub fn is_gray(&self) -> bool {
        self.color() == Color::Gray
    }

    #[inline]
    pub fn is_white(&self) -> bool {
        self.color() == Color::White
    }

    #[inline]
    pub fn is_purple(&self) -> bool {
        self.color() == Color::Purple
    }

    #[inline]
    pub fn is_buffered(&self) -> bool {
        self.info.get() & BUFFERED_FLAG != 0
    }

    #[inline]
    pub fn is_doomed(&self) -> bool {
        self.info.get() & DOOMED_FLAG != 0
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.info.get() & DEAD_FLAG != 0
    }

    #[inline]
    pub fn is_dropped(&self) -> bool {
        self.info.get() & DROPPED_FLAG != 0
    }

    /// Count one more owner. An incoming reference cancels root candidacy.
    #[inline]
    pub fn increase_count(&self) {
        self.count.increment();
        self.info.update(|info| {
            if Color::from_bits(info & COLOR_MASK) == Color::Purple {
                info & !COLOR_MASK
            } else {
                info
            }
        });
    }

    /// Count one owner fewer. Returns the new count.
    #[inline]
    pub fn decrease_count(&self) -> usize {
        self.count.decrement()
    }

    /// Raw increment used when trial deletion restores an edge.
    #[inline]
    pub fn restore_count(&self) {
        self.count.increment();
    }

    /// Raw decrement used when trial deletion removes an edge.
    #[inline]
    pub fn trial_decrement(&self) {
        // Internal edges never exceed the count, but a racing drop in the
        // shared configuration can get there first.
        self.count.update(|count| count.saturating_sub(1));
    }

    fn set_color(&self, color: Color) {
        self.info.update(|info| {
            // Green is permanent.
            if info & COLOR_MASK == Color::Green as usize {
                info
            } else {
                (info & !COLOR_MASK) | color as usize
            }
        });
    }

    #[inline]
    pub fn mark_black(&self) {
        self.set_color(Color::Black);
    }

    #[inline]
    pub fn mark_gray(&self) {
        self.set_color(Color::Gray);
    }

    #[inline]
    pub fn mark_white(&self) {
        self.set_color(Color::White);
    }

    #[inline]
    pub fn mark_purple(&self) {
        self.set_color(Color::Purple);
    }

    #[inline]
    pub fn mark_buffered(&self) {
        self.info.update(|info| info | BUFFERED_FLAG);
    }

    #[inline]
    pub fn mark_nonbuffered(&self) {
        self.info.update(|info| info & !BUFFERED_FLAG);
    }

    #[inline]
    pub fn mark_age(&self, age: Age) {
        self.info
            .update(|info| (info & !AGE_MASK) | ((age as usize) << AGE_SHIFT));
    }

    #[inline]
    pub fn mark_doomed(&self) {
        self.info.update(|info| info | DOOMED_FLAG);
    }

    #[inline]
    pub fn mark_dead(&self) {
        self.info.update(|info| info | DEAD_FLAG);
    }

    #[inline]
    pub fn mark_dropped(&self) {
        self.info.update(|info| info | DROPPED_FLAG);
    }
}

impl<W: Word> std::fmt::Debug for RcState<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RcState")
            .field("count", &self.count())
            .field("color", &self.color())
            .field("buffered", &self.is_buffered())
            .field("age", &self.age())
            .field("doomed", &self.is_doomed())
            .field("dead", &self.is_dead())
            .field("dropped", &self.is_dropped())
            .finish()
    }
}
