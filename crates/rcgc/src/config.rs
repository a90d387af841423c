//! Collector configuration.
//!
//! The incremental work-estimation constants are policy rather than
//! correctness, so every one of them can be overridden here.

bitflags::bitflags! {
    /// Extra reporting selected per collector.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct GcDebugFlags: u32 {
        /// Report per-collection statistics.
        const STATS         = 1 << 0;
        /// Report each collectable object found.
        const COLLECTABLE   = 1 << 1;
        /// Report each uncollectable object found.
        const UNCOLLECTABLE = 1 << 2;
        /// Keep every unreachable object in the garbage list instead of freeing it.
        const SAVEALL       = 1 << 5;
        /// `COLLECTABLE | UNCOLLECTABLE | SAVEALL`.
        const LEAK = Self::COLLECTABLE.bits() | Self::UNCOLLECTABLE.bits() | Self::SAVEALL.bits();
    }
}

/// Which collector drives the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectorMode {
    /// One mutator at a time; the generational/incremental collector.
    #[default]
    Serial,
    /// Many mutator threads; stop-the-world merge points and QSBR frees.
    Concurrent,
}

pub const DEFAULT_YOUNG_THRESHOLD: usize = 2000;
pub const DEFAULT_OLD_SCALE_FACTOR: usize = 10;
pub const DEFAULT_SCAN_RATE_DIVISOR: usize = 10;
pub const DEFAULT_PREFETCH_BUFFER_LEN: usize = 256;
pub const DEFAULT_SPAN_THRESHOLD: usize = 32;
pub const DEFAULT_QSBR_DEFERRED_LIMIT: usize = 10;

/// Tunables for a [`Collector`](crate::Collector).
#[derive(Debug, Clone, Copy)]
pub struct GcConfig {
    /// Serial or concurrent collector.
    pub mode: CollectorMode,
    /// Tracked allocations (net of deallocations) that trigger an automatic pass.
    pub young_threshold: usize,
    /// Scales how much of the old space one increment may scan.
    pub old_scale_factor: usize,
    /// Divides the heap size when sizing an increment. Larger values mean
    /// smaller increments; the collector still scans faster than objects are
    /// promoted because each increment covers at least the young count.
    pub scan_rate_divisor: usize,
    /// Run the optimistic mark-alive pre-pass in concurrent mode.
    pub mark_alive: bool,
    /// Capacity of the mark-alive prefetch ring. Must be a power of two.
    pub prefetch_buffer_len: usize,
    /// Objects with more outgoing edges than this are pushed as a span.
    pub span_threshold: usize,
    /// Number of deferred frees batched before the QSBR sequence is advanced.
    pub qsbr_deferred_limit: usize,
    /// Upper bound on scratch entries (worklist and span stack slots) one pass
    /// may allocate; exceeding it fails the pass with `GcError::OutOfMemory`.
    pub max_scratch_entries: Option<usize>,
    /// Reporting flags.
    pub debug: GcDebugFlags,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            mode: CollectorMode::Serial,
            young_threshold: DEFAULT_YOUNG_THRESHOLD,
            old_scale_factor: DEFAULT_OLD_SCALE_FACTOR,
            scan_rate_divisor: DEFAULT_SCAN_RATE_DIVISOR,
            mark_alive: true,
            prefetch_buffer_len: DEFAULT_PREFETCH_BUFFER_LEN,
            span_threshold: DEFAULT_SPAN_THRESHOLD,
            qsbr_deferred_limit: DEFAULT_QSBR_DEFERRED_LIMIT,
            max_scratch_entries: None,
            debug: GcDebugFlags::empty(),
        }
    }
}

impl GcConfig {
    /// Default configuration for the concurrent collector.
    #[must_use]
    pub fn concurrent() -> Self {
        Self {
            mode: CollectorMode::Concurrent,
            ..Self::default()
        }
    }

    /// Default configuration for the serial collector.
    #[must_use]
    pub fn serial() -> Self {
        Self::default()
    }
}
