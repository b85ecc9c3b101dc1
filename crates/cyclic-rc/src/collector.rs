//! Generational root-buffer collector.
//!
//! Candidates enter the young buffer, age through [`MEDIUM_BUCKETS`] medium
//! buckets, and are trial-deleted once they reach the old buffer. A partial
//! collection runs one pass of the pipeline; a full collection runs enough
//! passes to push every buffered candidate through.
//!
//! ```text
//!   young -> medium[0] -> ... -> medium[4] -> old -> mark -> scan -> collect
//! ```

use std::cell::RefCell;
use std::mem;
use std::ptr::NonNull;
use std::time::Instant;

use crate::metrics::{self, CollectMetrics, CollectionType};
use crate::mode::{self, FreeingGuard, Mode, Shared};
use crate::slot::{self, Header, Scratch};
use crate::state::Age;
#[cfg(feature = "tracing")]
use crate::tracing::internal::{log_phase_end, log_phase_start, Phase};

/// Number of aging buckets between the young and old buffers.
pub const MEDIUM_BUCKETS: usize = 5;

/// Pipeline passes in a full collection: enough to move a young candidate
/// through every bucket and then trial-delete it.
pub const FULL_COLLECT_PASSES: usize = 2 + MEDIUM_BUCKETS;

type Buffer<M> = Vec<NonNull<Header<M>>>;

/// Per-configuration collector state.
///
/// An object is in at most one buffer, and is in one exactly when its
/// buffered bit is set.
#[doc(hidden)]
pub struct Collector<M: Mode> {
    young: Buffer<M>,
    medium: [Buffer<M>; MEDIUM_BUCKETS],
    old: Buffer<M>,
    /// Doomed objects whose values have not been dropped yet.
    to_free: Buffer<M>,
    collecting: bool,
    last_metrics: CollectMetrics,
}

// SAFETY: The shared collector is only reached through its process-wide lock,
// and every object it points at has atomic state.
unsafe impl Send for Collector<Shared> {}

impl<M: Mode> Collector<M> {
    pub(crate) const fn new() -> Self {
        Self {
            young: Vec::new(),
            medium: [const { Vec::new() }; MEDIUM_BUCKETS],
            old: Vec::new(),
            to_free: Vec::new(),
            collecting: false,
            last_metrics: CollectMetrics::new(),
        }
    }

    /// Buffer a new root candidate.
    pub(crate) fn add_young(&mut self, header: NonNull<Header<M>>) {
        // SAFETY: Candidates are owned by at least one handle
        let s = unsafe { slot::state(header) };
        debug_assert!(!s.is_buffered() && !s.is_acyclic());
        s.mark_buffered();
        s.mark_age(Age::Young);
        self.young.push(header);
        metrics::record_buffered();
    }

    pub(crate) fn enqueue_free(&mut self, header: NonNull<Header<M>>) {
        self.to_free.push(header);
    }

    pub(crate) const fn is_collecting(&self) -> bool {
        self.collecting
    }

    pub(crate) const fn last_metrics(&self) -> CollectMetrics {
        self.last_metrics
    }

    fn is_empty(&self) -> bool {
        self.young.is_empty()
            && self.medium.iter().all(Vec::is_empty)
            && self.old.is_empty()
            && self.to_free.is_empty()
    }

    fn buffered(&self) -> usize {
        self.young.len() + self.medium.iter().map(Vec::len).sum::<usize>() + self.old.len()
    }

    pub(crate) fn stats(&self) -> BufferStats {
        let mut medium = [0; MEDIUM_BUCKETS];
        for (count, bucket) in medium.iter_mut().zip(&self.medium) {
            *count = bucket.len();
        }
        BufferStats {
            young: self.young.len(),
            medium,
            old: self.old.len(),
            pending_free: self.to_free.len(),
        }
    }

    /// Drop stale candidates from the younger buffers, age the survivors, then
    /// rotate: young to medium[0], each medium bucket to the next, the last
    /// one to old. The emptied old buffer becomes the new young one.
    ///
    /// Returns whether any buffer is still non-empty.
    pub(crate) fn process_buffers(&mut self) -> bool {
        for (i, bucket) in self.medium.iter_mut().enumerate() {
            let age = if i + 1 == MEDIUM_BUCKETS {
                Age::Old
            } else {
                Age::Medium
            };
            retain_candidates(bucket, age);
        }
        retain_candidates(&mut self.young, Age::Medium);

        debug_assert!(self.old.is_empty());
        let mut carry = mem::take(&mut self.young);
        for bucket in &mut self.medium {
            carry = mem::replace(bucket, carry);
        }
        self.young = mem::replace(&mut self.old, carry);

        self.buffered() != 0
    }
}

impl<M: Mode> Drop for Collector<M> {
    /// Runs when a thread's local collector is torn down: collect whatever is
    /// still buffered, then release the buffers.
    fn drop(&mut self) {
        if self.is_empty() {
            return;
        }
        let mut cell = RefCell::new(mem::replace(self, Self::new()));
        let mut scratch = Scratch::new();
        for _ in 0..FULL_COLLECT_PASSES {
            drain_queue(&cell);
            pipeline_pass(&cell, &mut scratch);
            drain_queue(&cell);
        }

        let collector = cell.get_mut();
        let mut remaining = mem::take(&mut collector.young);
        for bucket in &mut collector.medium {
            remaining.append(bucket);
        }
        remaining.append(&mut collector.old);
        for header in remaining {
            // SAFETY: Buffered objects are live
            unsafe { evict(header) };
        }
        drain_queue(&cell);
    }
}

/// Occupancy of a collector's buffers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Candidates buffered since the last pass.
    pub young: usize,
    /// Candidates in each aging bucket, youngest first.
    pub medium: [usize; MEDIUM_BUCKETS],
    /// Candidates due for trial deletion on the next pass.
    pub old: usize,
    /// Objects queued for destruction.
    pub pending_free: usize,
}

impl BufferStats {
    /// Total number of buffered root candidates.
    #[must_use]
    pub fn total_buffered(&self) -> usize {
        self.young + self.medium.iter().sum::<usize>() + self.old
    }
}

// ============================================================================
// Buffer maintenance
// ============================================================================

/// Take `header` out of its buffer. A doomed object whose value is already
/// gone is freed here.
unsafe fn evict<M: Mode>(header: NonNull<Header<M>>) {
    // SAFETY: Buffered objects are live
    let s = unsafe { slot::state(header) };
    s.mark_nonbuffered();
    if s.is_doomed() {
        // SAFETY: The buffer no longer references it
        unsafe { slot::dealloc_if_unreachable(header) };
    }
}

/// Keep only purple candidates, stamping them with `age`.
fn retain_candidates<M: Mode>(bucket: &mut Buffer<M>, age: Age) {
    bucket.retain(|&header| {
        // SAFETY: Buffered objects are live
        let s = unsafe { slot::state(header) };
        if s.is_purple() {
            s.mark_age(age);
            true
        } else {
            // SAFETY: Buffered objects are live
            unsafe { evict(header) };
            false
        }
    });
}

// ============================================================================
// Pipeline
// ============================================================================

/// Gray every live candidate in the old buffer; evict the rest.
fn mark<M: Mode>(old: &mut Buffer<M>, scratch: &mut Scratch<M>) {
    let mut i = 0;
    while i < old.len() {
        let header = old[i];
        // SAFETY: Buffered objects are live
        let s = unsafe { slot::state(header) };
        if s.is_purple() && !s.is_count_zero() {
            // SAFETY: Everything reachable from a live candidate is live
            unsafe { slot::mark_gray(header, scratch) };
            i += 1;
        } else {
            old.swap_remove(i);
            // SAFETY: Buffered objects are live
            unsafe { evict(header) };
        }
    }
}

fn scan<M: Mode>(old: &Buffer<M>, scratch: &mut Scratch<M>) {
    for &header in old {
        // SAFETY: Everything reachable from a grayed candidate is live
        unsafe { slot::scan(header, scratch) };
    }
}

/// Empty the old buffer, collecting the garbage reachable from each root
/// into `doomed`.
fn collect_roots<M: Mode>(
    old: &mut Buffer<M>,
    scratch: &mut Scratch<M>,
    doomed: &mut Buffer<M>,
) -> usize {
    let mut collected = 0;
    for header in old.drain(..) {
        // SAFETY: Buffered objects are live
        unsafe { slot::state(header) }.mark_nonbuffered();
        // SAFETY: Scanned roots and their subgraphs are live
        collected += unsafe { slot::collect_white(header, scratch, doomed) };
    }
    for &header in doomed.iter() {
        // SAFETY: Garbage stays allocated until it is drained
        unsafe { slot::state(header) }.mark_doomed();
    }
    collected
}

/// One mark, scan, collect-roots, age pass. Returns the number of candidates
/// examined and the number of objects collected.
///
/// The old buffer is moved out while the traversals run, so `Trace` impls
/// never observe the collector borrowed.
fn pipeline_pass<M: Mode>(cell: &RefCell<Collector<M>>, scratch: &mut Scratch<M>) -> (usize, usize) {
    let Ok(mut old) = cell.try_borrow_mut().map(|mut c| mem::take(&mut c.old)) else {
        return (0, 0);
    };
    let examined = old.len();

    #[cfg(feature = "tracing")]
    log_phase_start(Phase::Mark, examined);
    mark(&mut old, scratch);
    #[cfg(feature = "tracing")]
    log_phase_end(Phase::Mark, old.len());

    #[cfg(feature = "tracing")]
    log_phase_start(Phase::Scan, old.len());
    scan(&old, scratch);
    #[cfg(feature = "tracing")]
    log_phase_end(Phase::Scan, old.len());

    #[cfg(feature = "tracing")]
    log_phase_start(Phase::CollectRoots, old.len());
    let mut doomed = Vec::new();
    let collected = collect_roots(&mut old, scratch, &mut doomed);
    scratch.finish_pass();
    #[cfg(feature = "tracing")]
    log_phase_end(Phase::CollectRoots, collected);

    if let Ok(mut collector) = cell.try_borrow_mut() {
        collector.old = old;
        collector.to_free.append(&mut doomed);
        collector.process_buffers();
    }
    (examined, collected)
}

// ============================================================================
// Deferred free
// ============================================================================

fn pop_free<M: Mode>(cell: &RefCell<Collector<M>>) -> Option<NonNull<Header<M>>> {
    cell.try_borrow_mut().ok()?.to_free.pop()
}

/// Drop queued values one at a time. Values dropped here may queue more.
fn drain_queue<M: Mode>(cell: &RefCell<Collector<M>>) -> usize {
    let mut freed = 0;
    while let Some(header) = pop_free(cell) {
        // SAFETY: Queued objects are doomed, live, and not yet dropped
        unsafe {
            slot::call_destructor(header);
            slot::dealloc_if_unreachable(header);
        }
        freed += 1;
    }
    freed
}

/// Drain the deferred-free queue with this thread's freeing flag set.
///
/// Returns the number of values dropped; zero if this thread is already
/// draining further up the stack.
pub(crate) fn process_free_objects<M: Mode>(cell: &RefCell<Collector<M>>) -> usize {
    let Some(_freeing) = FreeingGuard::<M>::enter() else {
        return 0;
    };
    drain_queue(cell)
}

/// Clears the collecting flag when the collection ends, even by unwinding.
struct CollectingGuard<'a, M: Mode> {
    cell: &'a RefCell<Collector<M>>,
}

impl<'a, M: Mode> CollectingGuard<'a, M> {
    fn enter(cell: &'a RefCell<Collector<M>>) -> Option<Self> {
        let mut collector = cell.try_borrow_mut().ok()?;
        if collector.collecting {
            return None;
        }
        collector.collecting = true;
        Some(Self { cell })
    }
}

impl<M: Mode> Drop for CollectingGuard<'_, M> {
    fn drop(&mut self) {
        if let Ok(mut collector) = self.cell.try_borrow_mut() {
            collector.collecting = false;
        }
    }
}

/// Run one partial (`all == false`) or full (`all == true`) collection on the
/// collector of mode `M`.
///
/// Returns `None` without doing anything if a collection is already running
/// on this collector, or if this thread is draining its free queue.
pub(crate) fn make_collect<M: Mode>(all: bool) -> Option<CollectMetrics> {
    M::with_collector(|cell| {
        if mode::is_freeing::<M>() {
            return None;
        }
        let guard = CollectingGuard::enter(cell)?;
        let start = Instant::now();

        #[cfg(feature = "tracing")]
        let _span = crate::tracing::internal::trace_collection(
            M::NAME,
            all,
            crate::tracing::internal::next_collect_id(),
        );

        let passes = if all { FULL_COLLECT_PASSES } else { 1 };
        let mut scratch = Scratch::new();
        let mut result = CollectMetrics::new();
        for _ in 0..passes {
            result.objects_freed += process_free_objects(cell);
            let (examined, collected) = pipeline_pass(cell, &mut scratch);
            result.roots_examined += examined;
            result.objects_collected += collected;
            result.objects_freed += process_free_objects(cell);
        }
        drop(guard);

        result.duration = start.elapsed();
        result.passes = passes;
        result.collection_type = if all {
            CollectionType::Full
        } else {
            CollectionType::Partial
        };
        result.multithreaded = M::MULTITHREADED;
        if let Ok(mut collector) = cell.try_borrow_mut() {
            result.candidates_remaining = collector.buffered();
            collector.last_metrics = result;
        }
        metrics::record_collection(&result);

        #[cfg(feature = "tracing")]
        ::tracing::debug!(
            objects_collected = result.objects_collected,
            objects_freed = result.objects_freed,
            candidates_remaining = result.candidates_remaining,
            "collect_end"
        );

        Some(result)
    })
    .flatten()
}

/// Buffer occupancy of mode `M`'s collector on this thread.
pub(crate) fn buffer_stats_of<M: Mode>() -> BufferStats {
    M::with_collector(|cell| cell.try_borrow().map(|c| c.stats()).unwrap_or_default())
        .unwrap_or_default()
}

/// Metrics of the last collection on mode `M`'s collector.
pub(crate) fn last_metrics<M: Mode>() -> CollectMetrics {
    M::with_collector(|cell| {
        cell.try_borrow()
            .map(|c| c.last_metrics())
            .unwrap_or_else(|_| CollectMetrics::new())
    })
    .unwrap_or_else(CollectMetrics::new)
}

// ============================================================================
// Public entry points (single-thread configuration)
// ============================================================================

/// Run one amortized collection pass on this thread's collector.
///
/// Candidates must age through every bucket before they are trial-deleted,
/// so garbage is reclaimed within `MEDIUM_BUCKETS + 2` calls.
pub fn collect() {
    let _ = make_collect::<crate::Local>(false);
}

/// Collect every buffered candidate on this thread's collector and free the
/// resulting garbage before returning.
///
/// # Examples
///
/// ```
/// use cyclic_rc::{collect_full, Cc, Trace};
/// use std::cell::RefCell;
///
/// #[derive(Trace, Default)]
/// struct Node {
///     next: RefCell<Cc<Node>>,
/// }
///
/// let a = Cc::new(Node::default());
/// *a.next.borrow_mut() = Cc::clone(&a);
/// drop(a);
///
/// collect_full();
/// assert_eq!(cyclic_rc::buffer_stats().total_buffered(), 0);
/// ```
pub fn collect_full() {
    let _ = make_collect::<crate::Local>(true);
}

/// Whether this thread is currently running destructors from the local
/// collector's free queue.
#[must_use]
pub fn is_freeing() -> bool {
    mode::is_freeing::<crate::Local>()
}

/// Buffer occupancy of this thread's collector.
#[must_use]
pub fn buffer_stats() -> BufferStats {
    buffer_stats_of::<crate::Local>()
}
