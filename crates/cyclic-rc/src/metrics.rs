//! Collection metrics and statistics.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Statistics from one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectMetrics {
    /// Wall-clock duration of the collection.
    pub duration: Duration,
    /// Pipeline passes run.
    pub passes: usize,
    /// Old-buffer candidates examined by the mark phase.
    pub roots_examined: usize,
    /// Objects found to be cyclic garbage.
    pub objects_collected: usize,
    /// Values dropped by the free-queue drains of this collection.
    pub objects_freed: usize,
    /// Candidates still buffered afterwards.
    pub candidates_remaining: usize,
    /// Partial or full.
    pub collection_type: CollectionType,
    /// Whether this ran on the multi-thread collector.
    pub multithreaded: bool,
}

impl Default for CollectMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectMetrics {
    /// Create a new `CollectMetrics` with all fields set to zero/defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duration: Duration::ZERO,
            passes: 0,
            roots_examined: 0,
            objects_collected: 0,
            objects_freed: 0,
            candidates_remaining: 0,
            collection_type: CollectionType::None,
            multithreaded: false,
        }
    }
}

/// Kind of collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum CollectionType {
    /// No collection has run yet.
    #[default]
    None = 0,
    /// One amortized pipeline pass.
    Partial = 1,
    /// Every buffered candidate processed.
    Full = 2,
}

/// Process-level cumulative statistics.
///
/// Atomic counters covering both configurations and every thread since
/// process start.
///
/// # Example
///
/// ```
/// use cyclic_rc::global_metrics;
///
/// let metrics = global_metrics();
/// println!("Total collections: {}", metrics.total_collections());
/// println!("Cycle members freed: {}", metrics.total_objects_collected());
/// ```
#[derive(Debug)]
pub struct GlobalMetrics {
    collections: AtomicUsize,
    full_collections: AtomicUsize,
    objects_collected: AtomicUsize,
    objects_released: AtomicUsize,
    candidates_buffered: AtomicUsize,
    pause_ns: AtomicU64,
}

impl Default for GlobalMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalMetrics {
    /// Create a new `GlobalMetrics` with all counters initialized to zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            collections: AtomicUsize::new(0),
            full_collections: AtomicUsize::new(0),
            objects_collected: AtomicUsize::new(0),
            objects_released: AtomicUsize::new(0),
            candidates_buffered: AtomicUsize::new(0),
            pause_ns: AtomicU64::new(0),
        }
    }

    /// Returns the total number of collections performed.
    #[inline]
    #[must_use]
    pub fn total_collections(&self) -> usize {
        self.collections.load(Ordering::Relaxed)
    }

    /// Returns the total number of full collections performed.
    #[inline]
    #[must_use]
    pub fn total_full_collections(&self) -> usize {
        self.full_collections.load(Ordering::Relaxed)
    }

    /// Returns the total number of objects reclaimed as cyclic garbage.
    #[inline]
    #[must_use]
    pub fn total_objects_collected(&self) -> usize {
        self.objects_collected.load(Ordering::Relaxed)
    }

    /// Returns the total number of objects released by their count reaching
    /// zero.
    #[inline]
    #[must_use]
    pub fn total_objects_released(&self) -> usize {
        self.objects_released.load(Ordering::Relaxed)
    }

    /// Returns the total number of times an object was buffered as a root
    /// candidate.
    #[inline]
    #[must_use]
    pub fn total_candidates_buffered(&self) -> usize {
        self.candidates_buffered.load(Ordering::Relaxed)
    }

    /// Returns the total time spent collecting, in nanoseconds.
    #[inline]
    #[must_use]
    pub fn total_pause_ns(&self) -> u64 {
        self.pause_ns.load(Ordering::Relaxed)
    }
}

static GLOBAL_METRICS: GlobalMetrics = GlobalMetrics::new();

/// Get the global cumulative metrics.
#[must_use]
pub fn global_metrics() -> &'static GlobalMetrics {
    &GLOBAL_METRICS
}

/// Metrics of the last collection on this thread's local collector.
///
/// Returns zeroed metrics with [`CollectionType::None`] if no collection has
/// run yet.
///
/// # Example
///
/// ```
/// use cyclic_rc::{collect_full, last_collect_metrics, CollectionType};
///
/// collect_full();
/// let metrics = last_collect_metrics();
/// assert_eq!(metrics.collection_type, CollectionType::Full);
/// ```
#[must_use]
pub fn last_collect_metrics() -> CollectMetrics {
    crate::collector::last_metrics::<crate::Local>()
}

#[inline]
pub(crate) fn record_release() {
    GLOBAL_METRICS
        .objects_released
        .fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_buffered() {
    GLOBAL_METRICS
        .candidates_buffered
        .fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_collection(metrics: &CollectMetrics) {
    GLOBAL_METRICS.collections.fetch_add(1, Ordering::Relaxed);
    if metrics.collection_type == CollectionType::Full {
        GLOBAL_METRICS
            .full_collections
            .fetch_add(1, Ordering::Relaxed);
    }
    GLOBAL_METRICS
        .objects_collected
        .fetch_add(metrics.objects_collected, Ordering::Relaxed);
    let nanos = u64::try_from(metrics.duration.as_nanos()).unwrap_or(u64::MAX);
    GLOBAL_METRICS.pause_ns.fetch_add(nanos, Ordering::Relaxed);
}
