//! Collector tracing support.
//!
//! When the `tracing` feature is enabled, this module provides structured
//! tracing spans and events for cycle collections.

#[cfg(feature = "tracing")]
pub mod internal {
    use std::sync::atomic::{AtomicU64, Ordering};
    use tracing::{span, Level};

    /// Phases of one pipeline pass.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Phase {
        /// Gray the subgraphs under old candidates.
        Mark,
        /// Split gray objects into live and garbage.
        Scan,
        /// Queue garbage for destruction.
        CollectRoots,
    }

    /// Stable identifier for a collection.
    ///
    /// Correlates all events within one `make_collect` call. Starts at 1 and
    /// increases monotonically across both configurations.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CollectId(pub u64);

    static NEXT_COLLECT_ID: AtomicU64 = AtomicU64::new(1);

    /// Generate the next unique collection ID.
    pub fn next_collect_id() -> CollectId {
        CollectId(NEXT_COLLECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a span for an entire collection.
    pub fn trace_collection(mode: &str, full: bool, id: CollectId) -> span::EnteredSpan {
        span!(
            Level::DEBUG,
            "cc_collect",
            mode = mode,
            full = full,
            collect_id = id.0
        )
        .entered()
    }

    /// Log the start of a phase with the number of candidates it will visit.
    pub fn log_phase_start(phase: Phase, candidates: usize) {
        tracing::debug!(phase = ?phase, candidates, "phase_start");
    }

    /// Log the end of a phase.
    pub fn log_phase_end(phase: Phase, count: usize) {
        tracing::debug!(phase = ?phase, count, "phase_end");
    }
}

#[cfg(not(feature = "tracing"))]
#[allow(dead_code)]
pub mod internal {
    /// Stub type when tracing is disabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CollectId(pub u64);

    /// Stub function when tracing is disabled.
    pub const fn next_collect_id() -> CollectId {
        CollectId(0)
    }
}
