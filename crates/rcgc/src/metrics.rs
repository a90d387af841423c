//! GC metrics and statistics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Statistics from the most recent garbage collection.
#[derive(Debug, Clone, Copy)]
pub struct GcMetrics {
    /// Wall-clock duration of the last collection.
    pub duration: Duration,
    /// Time the world was stopped, summed over every pause of the pass.
    pub pause_duration: Duration,
    /// Number of stop-the-world pauses the pass took.
    pub pauses: usize,
    /// Objects proven reachable by the mark-alive pre-pass.
    pub objects_marked_alive: usize,
    /// Objects the pass examined with reference-count subtraction.
    pub objects_scanned: usize,
    /// Objects freed.
    pub objects_collected: usize,
    /// Objects moved to the garbage list.
    pub objects_uncollectable: usize,
    /// Objects a finalizer brought back to life.
    pub objects_resurrected: usize,
    /// Type of collection.
    pub collection_type: CollectionType,
    /// Collections run by this collector so far.
    pub total_collections: usize,
    /// Duration of the reference-count scan (update, subtract, move).
    pub scan_duration: Duration,
    /// Duration of weakref callbacks and finalizers.
    pub finalize_duration: Duration,
    /// Duration of clearing and freeing garbage.
    pub delete_duration: Duration,
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GcMetrics {
    /// Create a new `GcMetrics` with all fields set to zero/defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duration: Duration::ZERO,
            pause_duration: Duration::ZERO,
            pauses: 0,
            objects_marked_alive: 0,
            objects_scanned: 0,
            objects_collected: 0,
            objects_uncollectable: 0,
            objects_resurrected: 0,
            collection_type: CollectionType::None,
            total_collections: 0,
            scan_duration: Duration::ZERO,
            finalize_duration: Duration::ZERO,
            delete_duration: Duration::ZERO,
        }
    }
}

/// Type of GC collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum CollectionType {
    /// No collection has run yet.
    #[default]
    None = 0,
    /// Young generation only.
    Young = 1,
    /// Young generation plus one slice of the old generation.
    Incremental = 2,
    /// The whole heap, serial collector.
    Full = 3,
    /// The whole heap, concurrent collector.
    Concurrent = 4,
}

/// Captures the duration of each phase of a pass.
#[derive(Debug, Clone, Copy)]
pub struct PhaseTimer {
    /// Accumulated scan phase time.
    pub scan: Duration,
    /// Accumulated finalize phase time.
    pub finalize: Duration,
    /// Accumulated delete phase time.
    pub delete: Duration,
    /// Accumulated stop-the-world time.
    pub pause: Duration,
    current_start: Option<Instant>,
    pause_start: Option<Instant>,
}

impl Default for PhaseTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTimer {
    /// Create a new `PhaseTimer` with all durations set to zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            scan: Duration::ZERO,
            finalize: Duration::ZERO,
            delete: Duration::ZERO,
            pause: Duration::ZERO,
            current_start: None,
            pause_start: None,
        }
    }

    /// Start timing a phase.
    pub fn start(&mut self) {
        self.current_start = Some(Instant::now());
    }

    /// End the scan phase and record its duration.
    pub fn end_scan(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.scan += start.elapsed();
        }
    }

    /// End the finalize phase and record its duration.
    pub fn end_finalize(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.finalize += start.elapsed();
        }
    }

    /// End the delete phase and record its duration.
    pub fn end_delete(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.delete += start.elapsed();
        }
    }

    /// The world has just been stopped.
    pub fn pause_begin(&mut self) {
        self.pause_start = Some(Instant::now());
    }

    /// The world is about to restart.
    pub fn pause_end(&mut self) {
        if let Some(start) = self.pause_start.take() {
            self.pause += start.elapsed();
        }
    }
}

/// Cumulative statistics of one collector.
#[derive(Debug)]
pub struct GlobalMetrics {
    collections: AtomicUsize,
    young_collections: AtomicUsize,
    incremental_collections: AtomicUsize,
    full_collections: AtomicUsize,
    concurrent_collections: AtomicUsize,
    objects_collected: AtomicUsize,
    objects_uncollectable: AtomicUsize,
    objects_resurrected: AtomicUsize,
    pause_ns: AtomicU64,
    out_of_memory: AtomicUsize,
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
            young_collections: AtomicUsize::new(0),
            incremental_collections: AtomicUsize::new(0),
            full_collections: AtomicUsize::new(0),
            concurrent_collections: AtomicUsize::new(0),
            objects_collected: AtomicUsize::new(0),
            objects_uncollectable: AtomicUsize::new(0),
            objects_resurrected: AtomicUsize::new(0),
            pause_ns: AtomicU64::new(0),
            out_of_memory: AtomicUsize::new(0),
        }
    }

    pub(crate) fn record(&self, metrics: &GcMetrics) {
        self.collections.fetch_add(1, Ordering::Relaxed);
        let per_type = match metrics.collection_type {
            CollectionType::None => None,
            CollectionType::Young => Some(&self.young_collections),
            CollectionType::Incremental => Some(&self.incremental_collections),
            CollectionType::Full => Some(&self.full_collections),
            CollectionType::Concurrent => Some(&self.concurrent_collections),
        };
        if let Some(counter) = per_type {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        self.objects_collected
            .fetch_add(metrics.objects_collected, Ordering::Relaxed);
        self.objects_uncollectable
            .fetch_add(metrics.objects_uncollectable, Ordering::Relaxed);
        self.objects_resurrected
            .fetch_add(metrics.objects_resurrected, Ordering::Relaxed);
        let pause_ns = u64::try_from(metrics.pause_duration.as_nanos()).unwrap_or(u64::MAX);
        self.pause_ns.fetch_add(pause_ns, Ordering::Relaxed);
    }

    pub(crate) fn record_out_of_memory(&self) {
        self.out_of_memory.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the total number of completed collections.
    #[inline]
    #[must_use]
    pub fn total_collections(&self) -> usize {
        self.collections.load(Ordering::Relaxed)
    }

    /// Returns the number of young collections.
    #[inline]
    #[must_use]
    pub fn total_young_collections(&self) -> usize {
        self.young_collections.load(Ordering::Relaxed)
    }

    /// Returns the number of incremental collections.
    #[inline]
    #[must_use]
    pub fn total_incremental_collections(&self) -> usize {
        self.incremental_collections.load(Ordering::Relaxed)
    }

    /// Returns the number of full serial collections.
    #[inline]
    #[must_use]
    pub fn total_full_collections(&self) -> usize {
        self.full_collections.load(Ordering::Relaxed)
    }

    /// Returns the number of concurrent collections.
    #[inline]
    #[must_use]
    pub fn total_concurrent_collections(&self) -> usize {
        self.concurrent_collections.load(Ordering::Relaxed)
    }

    /// Returns the total number of objects freed by the cycle collector.
    #[inline]
    #[must_use]
    pub fn total_objects_collected(&self) -> usize {
        self.objects_collected.load(Ordering::Relaxed)
    }

    /// Returns the total number of objects moved to the garbage list.
    #[inline]
    #[must_use]
    pub fn total_objects_uncollectable(&self) -> usize {
        self.objects_uncollectable.load(Ordering::Relaxed)
    }

    /// Returns the total number of resurrected objects.
    #[inline]
    #[must_use]
    pub fn total_objects_resurrected(&self) -> usize {
        self.objects_resurrected.load(Ordering::Relaxed)
    }

    /// Returns the total pause time in nanoseconds.
    #[inline]
    #[must_use]
    pub fn total_pause_ns(&self) -> u64 {
        self.pause_ns.load(Ordering::Relaxed)
    }

    /// Returns how many passes failed for lack of scratch space.
    #[inline]
    #[must_use]
    pub fn total_out_of_memory(&self) -> usize {
        self.out_of_memory.load(Ordering::Relaxed)
    }
}

/// Ring buffer size for GC history.
const HISTORY_SIZE: usize = 64;

/// The most recent `GcMetrics` snapshots, oldest first.
#[derive(Debug, Default)]
pub struct GcHistory {
    buffer: Mutex<VecDeque<GcMetrics>>,
}

impl GcHistory {
    pub(crate) fn push(&self, metrics: GcMetrics) {
        let mut buffer = self.buffer.lock();
        if buffer.len() == HISTORY_SIZE {
            buffer.pop_front();
        }
        buffer.push_back(metrics);
    }

    /// Recorded snapshots, oldest first.
    #[must_use]
    pub fn snapshots(&self) -> Vec<GcMetrics> {
        self.buffer.lock().iter().copied().collect()
    }

    /// Average pause over the recorded snapshots.
    #[must_use]
    pub fn average_pause(&self) -> Duration {
        let buffer = self.buffer.lock();
        if buffer.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = buffer.iter().map(|m| m.pause_duration).sum();
        total / u32::try_from(buffer.len()).unwrap_or(u32::MAX)
    }

    /// Longest pause over the recorded snapshots.
    #[must_use]
    pub fn max_pause(&self) -> Duration {
        self.buffer
            .lock()
            .iter()
            .map(|m| m.pause_duration)
            .max()
            .unwrap_or_default()
    }
}
