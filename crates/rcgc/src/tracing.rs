//! GC tracing support.
//!
//! When the `tracing` feature is enabled, this module provides structured
//! tracing spans and events for collection passes. Reports that must never
//! be lost (unraisable callback errors, debug-flag output) fall back to
//! `eprintln!` when the feature is off.

use crate::error::CallbackError;

#[cfg(feature = "tracing")]
pub mod internal {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;
    use tracing::{span, Level};

    /// Phases of a collection pass.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum GcPhase {
        /// Optimistic marking from roots.
        MarkAlive,
        /// `update_refs`, `subtract_refs` and `move_unreachable`.
        Scan,
        /// Weakref callbacks and finalizers.
        Finalize,
        /// Resurrection check.
        Resurrect,
        /// Clearing and freeing garbage.
        Delete,
    }

    /// Stable identifier for a GC run.
    ///
    /// Correlates every event of one collection pass. Monotonically
    /// increasing, starting at 1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    static NEXT_GC_ID: AtomicU64 = AtomicU64::new(1);

    /// Generate the next unique GC ID.
    pub fn next_gc_id() -> GcId {
        GcId(NEXT_GC_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a span for the entire GC collection.
    pub fn trace_gc_collection(collection_type: &str, gc_id: GcId) -> span::EnteredSpan {
        span!(
            Level::DEBUG,
            "gc_collect",
            collection_type = collection_type,
            gc_id = gc_id.0
        )
        .entered()
    }

    /// Create a span for one phase.
    pub fn trace_phase(phase: GcPhase) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_phase", phase = ?phase).entered()
    }

    /// Log the start of a phase.
    pub fn log_phase_start(phase: GcPhase, objects: usize) {
        tracing::debug!(phase = ?phase, objects, "phase_start");
    }

    /// Log the end of a phase.
    pub fn log_phase_end(phase: GcPhase, objects: usize) {
        tracing::debug!(phase = ?phase, objects, "phase_end");
    }

    /// Log a completed stop-the-world pause.
    pub fn log_pause(duration: Duration) {
        tracing::debug!(pause_us = duration.as_micros(), "stw_pause");
    }

    /// Log slot indices becoming reusable.
    pub fn log_qsbr_reclaimed(count: usize, read_seq: u64) {
        tracing::debug!(count, read_seq, "qsbr_reclaimed");
    }
}

#[cfg(not(feature = "tracing"))]
pub mod internal {
    /// Stub type when tracing is disabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);
}

pub use internal::GcId;

/// Report an error from user code that has nowhere to propagate to.
pub(crate) fn report_unraisable(context: &str, err: &CallbackError) {
    #[cfg(feature = "tracing")]
    tracing::warn!(context, error = %err, "unraisable");
    #[cfg(not(feature = "tracing"))]
    eprintln!("[GC] Exception ignored in {context}: {err}");
}

/// Output selected by the collector's debug flags.
pub(crate) fn report_debug(message: std::fmt::Arguments<'_>) {
    #[cfg(feature = "tracing")]
    tracing::info!("{message}");
    #[cfg(not(feature = "tracing"))]
    eprintln!("[GC] {message}");
}
