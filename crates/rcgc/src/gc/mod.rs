//! The cycle collector.
//!
//! Reference counting frees most objects the moment their last reference
//! goes away. What it cannot free are cycles; [`Collector`] finds those by
//! subtracting internal references inside a region of tracked objects (see
//! `pass`) and then finalizes, clears and frees whatever nothing outside
//! the region refers to.
//!
//! Two drivers share the phases:
//!
//! - `serial`: one mutator, generational with an incremental old space.
//! - `concurrent`: many mutators, a mark-alive pre-pass and two short
//!   stop-the-world pauses; finalizers and weakref callbacks run while the
//!   world is running.

mod concurrent;
mod list;
mod mark_alive;
mod pass;
mod serial;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use self::list::{Links, NodeId, OLD, PERMANENT, YOUNG};
use self::pass::{GcState, Heads};
use crate::config::{CollectorMode, GcConfig, GcDebugFlags};
use crate::error::{fatal_error, CallbackError, GcError};
use crate::heap::{GcBits, Heap};
use crate::metrics::{CollectionType, GcHistory, GcMetrics, GlobalMetrics, PhaseTimer};
use crate::object::{FinalizeCx, ObjRef};
use crate::stw::{ThreadControlBlock, ThreadRegistry};
use crate::thread::Mutator;
use crate::tracing::{report_debug, report_unraisable};
use crate::weakref::{self, WeakRef};

/// Which part of the heap a collection covers.
///
/// The concurrent collector always scans the whole heap; the generation
/// only selects which statistics entry the pass is counted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generation {
    /// Objects allocated since the last collection.
    Young,
    /// The young objects plus the next slice of the old generation.
    Increment,
    /// Every tracked object that is not frozen.
    Full,
}

impl Generation {
    const fn index(self) -> usize {
        match self {
            Self::Young => 0,
            Self::Increment => 1,
            Self::Full => 2,
        }
    }

    const fn collection_type(self, mode: CollectorMode) -> CollectionType {
        match (mode, self) {
            (CollectorMode::Concurrent, _) => CollectionType::Concurrent,
            (CollectorMode::Serial, Self::Young) => CollectionType::Young,
            (CollectorMode::Serial, Self::Increment) => CollectionType::Incremental,
            (CollectorMode::Serial, Self::Full) => CollectionType::Full,
        }
    }
}

/// Per-generation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationStats {
    /// Collections of this generation.
    pub collections: usize,
    /// Objects they freed.
    pub collected: usize,
    /// Objects they moved to the garbage list.
    pub uncollectable: usize,
}

/// When a collection callback is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackPhase {
    /// Before the pass starts.
    Start,
    /// After the pass finished.
    Stop,
}

/// Passed to collection callbacks. Counts are zero at [`CallbackPhase::Start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionInfo {
    /// Generation that was requested.
    pub generation: Generation,
    /// Objects freed.
    pub collected: usize,
    /// Objects moved to the garbage list.
    pub uncollectable: usize,
}

/// A collection callback. Errors are reported as unraisable.
pub type GcCallback =
    Arc<dyn Fn(CallbackPhase, &CollectionInfo) -> Result<(), CallbackError> + Send + Sync>;

/// Counters of one pass.
#[derive(Debug, Default)]
pub(crate) struct PassOutcome {
    pub(crate) scanned: usize,
    pub(crate) marked_alive: usize,
    pub(crate) collected: usize,
    pub(crate) uncollectable: usize,
    pub(crate) resurrected: usize,
    pub(crate) pauses: usize,
}

/// Objects a pass found unreachable, each holding one temporary reference
/// until the delete phase.
pub(crate) struct Doomed {
    unreachable: NodeId,
    dest: NodeId,
    objs: Vec<ObjRef>,
    cleared: Vec<WeakRef>,
}

struct CollectingGuard<'a>(&'a AtomicBool);

impl Drop for CollectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A heap, its mutator threads and the cycle collector that manages them.
pub struct Collector {
    config: RwLock<GcConfig>,
    pub(crate) heap: Heap,
    pub(crate) threads: ThreadRegistry,
    state: Mutex<GcState>,
    /// Strong references held on behalf of the program.
    globals: Mutex<Vec<ObjRef>>,
    /// Uncollectable objects, each held by a strong reference.
    garbage: Mutex<Vec<ObjRef>>,
    stats: Mutex<[GenerationStats; 3]>,
    callbacks: Mutex<Vec<GcCallback>>,
    collecting: AtomicBool,
    enabled: AtomicBool,
    last_metrics: Mutex<GcMetrics>,
    metrics: GlobalMetrics,
    history: GcHistory,
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("config", &*self.config.read())
            .field("live_objects", &self.heap.live_objects())
            .field("threads", &self.threads.len())
            .finish_non_exhaustive()
    }
}

impl Collector {
    /// Create a collector with an empty heap.
    #[must_use]
    pub fn new(config: GcConfig) -> Arc<Self> {
        Arc::new(Self {
            config: RwLock::new(config),
            heap: Heap::new(config.qsbr_deferred_limit),
            threads: ThreadRegistry::new(),
            state: Mutex::new(GcState::new()),
            globals: Mutex::new(Vec::new()),
            garbage: Mutex::new(Vec::new()),
            stats: Mutex::new([GenerationStats::default(); 3]),
            callbacks: Mutex::new(Vec::new()),
            collecting: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            last_metrics: Mutex::new(GcMetrics::new()),
            metrics: GlobalMetrics::new(),
            history: GcHistory::default(),
        })
    }

    /// A copy of the current configuration.
    #[must_use]
    pub fn config(&self) -> GcConfig {
        *self.config.read()
    }

    /// The object arena.
    #[must_use]
    pub const fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Number of registered mutator threads.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    // ========================================================================
    // Tracking
    // ========================================================================

    pub(crate) fn track(&self, obj: ObjRef, slot: &crate::heap::ObjectBox) {
        self.state.lock().track(obj, slot);
    }

    pub(crate) fn untrack(&self, obj: ObjRef, slot: &crate::heap::ObjectBox) {
        if slot.has(GcBits::TRACKED) {
            self.state.lock().untrack(obj, slot);
        }
    }

    /// Run an automatic collection if enough young objects accumulated.
    pub(crate) fn maybe_collect(&self, mutator: &Mutator) {
        if !self.is_enabled() || mutator.in_borrow() || self.is_collecting() {
            return;
        }
        let config = self.config();
        if config.young_threshold == 0 {
            return;
        }
        let due = {
            let st = self.state.lock();
            match config.mode {
                CollectorMode::Serial => st.young_count > config.young_threshold,
                // Skip passes that would only rescan a large stable heap.
                CollectorMode::Concurrent => {
                    st.young_count > config.young_threshold
                        && st.young_count >= st.long_lived / 4
                }
            }
        };
        if !due {
            return;
        }
        let generation = match config.mode {
            CollectorMode::Serial => Generation::Increment,
            CollectorMode::Concurrent => Generation::Full,
        };
        if let Err(err) = self.collect(mutator, generation) {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %err, "automatic collection skipped");
            #[cfg(not(feature = "tracing"))]
            let _ = err;
        }
    }

    // ========================================================================
    // Collection
    // ========================================================================

    /// Whether a pass is running.
    #[must_use]
    pub fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::Acquire)
    }

    /// Collect `generation`. Returns the number of objects freed.
    ///
    /// Runs even while automatic collection is disabled.
    ///
    /// # Errors
    ///
    /// - [`GcError::ThreadNotAttached`] if `mutator` belongs to another collector.
    /// - [`GcError::CollectionInProgress`] if a pass is already running, or
    ///   the mutator is inside [`Mutator::with_payload`].
    /// - [`GcError::OutOfMemory`] if the pass could not get its scratch
    ///   space. The heap is unchanged in that case.
    pub fn collect(&self, mutator: &Mutator, generation: Generation) -> Result<usize, GcError> {
        if !std::ptr::eq(Arc::as_ptr(mutator.collector()), self) {
            return Err(GcError::ThreadNotAttached);
        }
        if mutator.in_borrow() {
            return Err(GcError::CollectionInProgress);
        }
        if self
            .collecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(GcError::CollectionInProgress);
        }
        let _collecting = CollectingGuard(&self.collecting);

        let config = self.config();
        let collection_type = generation.collection_type(config.mode);
        self.invoke_callbacks(
            CallbackPhase::Start,
            &CollectionInfo {
                generation,
                collected: 0,
                uncollectable: 0,
            },
        );
        if config.debug.contains(GcDebugFlags::STATS) {
            report_debug(format_args!(
                "collecting generation {generation:?}, live objects {}",
                self.heap.live_objects()
            ));
        }

        #[cfg(feature = "tracing")]
        let _span = crate::tracing::internal::trace_gc_collection(
            &format!("{collection_type:?}"),
            crate::tracing::internal::next_gc_id(),
        );

        let start = Instant::now();
        let mut timer = PhaseTimer::new();
        let outcome = match self.run_pass(mutator, generation, &config, &mut timer) {
            Ok(outcome) => outcome,
            Err(err) => {
                if err == GcError::OutOfMemory {
                    self.metrics.record_out_of_memory();
                }
                return Err(err);
            }
        };

        {
            let mut stats = self.stats.lock();
            let entry = &mut stats[generation.index()];
            entry.collections += 1;
            entry.collected += outcome.collected;
            entry.uncollectable += outcome.uncollectable;
        }
        let metrics = GcMetrics {
            duration: start.elapsed(),
            pause_duration: timer.pause,
            pauses: outcome.pauses,
            objects_marked_alive: outcome.marked_alive,
            objects_scanned: outcome.scanned,
            objects_collected: outcome.collected,
            objects_uncollectable: outcome.uncollectable,
            objects_resurrected: outcome.resurrected,
            collection_type,
            total_collections: self.metrics.total_collections() + 1,
            scan_duration: timer.scan,
            finalize_duration: timer.finalize,
            delete_duration: timer.delete,
        };
        self.metrics.record(&metrics);
        *self.last_metrics.lock() = metrics;
        self.history.push(metrics);

        if config.debug.contains(GcDebugFlags::STATS) {
            report_debug(format_args!(
                "done, {} unreachable, {} uncollectable, {:.4}s elapsed",
                outcome.collected,
                outcome.uncollectable,
                metrics.duration.as_secs_f64()
            ));
        }
        self.invoke_callbacks(
            CallbackPhase::Stop,
            &CollectionInfo {
                generation,
                collected: outcome.collected,
                uncollectable: outcome.uncollectable,
            },
        );
        Ok(outcome.collected)
    }

    fn run_pass(
        &self,
        mutator: &Mutator,
        generation: Generation,
        config: &GcConfig,
        timer: &mut PhaseTimer,
    ) -> Result<PassOutcome, GcError> {
        let mut outcome = PassOutcome::default();
        let doomed = match config.mode {
            CollectorMode::Serial => {
                serial::scan(self, mutator, generation, config, timer, &mut outcome)?
            }
            CollectorMode::Concurrent => {
                concurrent::scan(self, mutator, config, timer, &mut outcome)?
            }
        };
        self.finish_pass(mutator, doomed, config, timer, &mut outcome);
        Ok(outcome)
    }

    /// The phases after the scan: weakref callbacks, finalizers, the
    /// resurrection check and deletion.
    fn finish_pass(
        &self,
        mutator: &Mutator,
        mut doomed: Doomed,
        config: &GcConfig,
        timer: &mut PhaseTimer,
        outcome: &mut PassOutcome,
    ) {
        timer.start();
        let callbacks = std::mem::take(&mut doomed.cleared);
        let callbacks_ran = !callbacks.is_empty();
        let finalized = {
            #[cfg(feature = "tracing")]
            let _phase = crate::tracing::internal::trace_phase(
                crate::tracing::internal::GcPhase::Finalize,
            );
            weakref::run_callbacks(callbacks);
            self.finalize_garbage(mutator, &doomed.objs)
        };
        timer.end_finalize();

        if callbacks_ran || finalized > 0 {
            #[cfg(feature = "tracing")]
            let _phase = crate::tracing::internal::trace_phase(
                crate::tracing::internal::GcPhase::Resurrect,
            );
            let resurrected = match config.mode {
                CollectorMode::Serial => {
                    mutator.flush_deferred();
                    let stacks = self.threads.snapshot();
                    self.state.lock().handle_resurrected(
                        &self.heap,
                        doomed.unreachable,
                        doomed.dest,
                        &stacks,
                    )
                }
                CollectorMode::Concurrent => {
                    outcome.pauses += 1;
                    concurrent::resurrection_pause(self, mutator, &doomed, timer)
                }
            };
            outcome.resurrected = resurrected.len();
        }

        timer.start();
        outcome.collected = self.delete_garbage(mutator, &doomed);
        timer.end_delete();

        if config.mode == CollectorMode::Concurrent {
            self.heap.advance_for_pending();
            self.heap.qsbr.quiescent_state(&mutator.tcb.qsbr);
            self.heap.process_deferred_frees();
        }
    }

    /// Shared tail of the scan, with the region built and the state locked.
    ///
    /// Survivors move to `dest`. Objects with legacy finalizers (everything,
    /// under `SAVEALL`) go to the garbage list. The rest stay on the
    /// unreachable list: their weakrefs are cleared, their deferred counts
    /// made ordinary and merged, and each takes a temporary reference.
    pub(crate) fn scan_region(
        &self,
        st: &mut GcState,
        mutator: &Mutator,
        heads: Heads,
        dest: NodeId,
        stacks: &[Arc<ThreadControlBlock>],
        config: &GcConfig,
        outcome: &mut PassOutcome,
    ) -> Doomed {
        let heap = &self.heap;
        #[cfg(feature = "tracing")]
        let _phase = crate::tracing::internal::trace_phase(crate::tracing::internal::GcPhase::Scan);
        #[cfg(feature = "tracing")]
        crate::tracing::internal::log_phase_start(
            crate::tracing::internal::GcPhase::Scan,
            st.links.len(heads.region),
        );

        outcome.scanned = st.update_refs(heap, heads.region, stacks);
        st.subtract_refs(heap, heads.region);
        st.move_unreachable(heap, heads.region, heads.unreachable);
        st.untrack_acyclic(heap, heads.region);
        st.place_all(heap, heads.region, dest);

        let save_all = config.debug.contains(GcDebugFlags::SAVEALL);
        st.move_legacy_finalizers(heap, heads.unreachable, heads.finalizers, save_all);
        let mut uncollectable = Vec::new();
        for index in st.links.indices(heads.finalizers) {
            if let Some(slot) = heap.slot(index) {
                slot.rc.inc(mutator.tid());
                uncollectable.push(ObjRef::new(index, slot.generation()));
                if config.debug.contains(GcDebugFlags::UNCOLLECTABLE) {
                    report_debug(format_args!(
                        "uncollectable <{} {index}>",
                        slot.type_name()
                    ));
                }
            }
        }
        outcome.uncollectable = uncollectable.len();
        st.place_all(heap, heads.finalizers, dest);
        self.garbage.lock().extend(uncollectable);

        let mut objs = Vec::new();
        let mut cleared = Vec::new();
        for index in st.links.indices(heads.unreachable) {
            let Some(slot) = heap.slot(index) else {
                fatal_error("tracked node without a slot");
            };
            let obj = ObjRef::new(index, slot.generation());
            if config.debug.contains(GcDebugFlags::COLLECTABLE) {
                report_debug(format_args!(
                    "collectable <{} {index}>",
                    slot.type_name()
                ));
            }
            cleared.extend(heap.weakrefs.clear(obj));
            if slot.has(GcBits::DEFERRED) {
                slot.rc.remove_deferred_bias();
                slot.unset(GcBits::DEFERRED);
            }
            slot.rc.explicit_merge(0);
            slot.rc.inc(mutator.tid());
            objs.push(obj);
        }
        heads.release_scan(&mut st.links);
        #[cfg(feature = "tracing")]
        crate::tracing::internal::log_phase_end(crate::tracing::internal::GcPhase::Scan, objs.len());

        Doomed {
            unreachable: heads.unreachable,
            dest,
            objs,
            cleared,
        }
    }

    /// Call each pending finalizer once. Returns how many ran.
    fn finalize_garbage(&self, mutator: &Mutator, objs: &[ObjRef]) -> usize {
        let mut ran = 0;
        for &obj in objs {
            let Some(slot) = self.heap.get(obj) else {
                continue;
            };
            if slot.has(GcBits::FINALIZED) {
                continue;
            }
            let taken = {
                let mut payload = slot.lock_payload();
                if payload.as_ref().is_some_and(|p| p.has_finalizer()) {
                    payload.take()
                } else {
                    None
                }
            };
            let Some(mut payload) = taken else {
                continue;
            };
            slot.set(GcBits::FINALIZED);
            let mut cx = FinalizeCx {
                mutator,
                this: obj,
            };
            if let Err(err) = payload.finalize(&mut cx) {
                report_unraisable(slot.type_name(), &err);
            }
            *slot.lock_payload() = Some(payload);
            ran += 1;
        }
        ran
    }

    /// Clear what is still unreachable, then drop the temporary references.
    /// Returns how many doomed objects were freed.
    fn delete_garbage(&self, mutator: &Mutator, doomed: &Doomed) -> usize {
        #[cfg(feature = "tracing")]
        let _phase =
            crate::tracing::internal::trace_phase(crate::tracing::internal::GcPhase::Delete);

        for &obj in &doomed.objs {
            let Some(slot) = self.heap.get(obj) else {
                continue;
            };
            if !slot.has(GcBits::UNREACHABLE) {
                continue;
            }
            let mut released = Vec::new();
            if let Some(payload) = slot.lock_payload().as_mut() {
                payload.clear(&mut released);
            }
            for child in released {
                mutator.decref(child);
            }
        }

        let mut collected = 0;
        for &obj in &doomed.objs {
            mutator.decref(obj);
            if self.heap.get(obj).is_none() {
                collected += 1;
            }
        }

        // Whatever survived the clearing lives on with the survivors.
        let mut st = self.state.lock();
        while let Some(node) = st.links.first(doomed.unreachable) {
            let Some(slot) = self.heap.slot(Links::index(node)) else {
                fatal_error("tracked node without a slot");
            };
            slot.unset(GcBits::UNREACHABLE);
            st.place(node, &slot, doomed.dest);
        }
        st.links.free_head(doomed.unreachable);
        collected
    }

    fn invoke_callbacks(&self, phase: CallbackPhase, info: &CollectionInfo) {
        let callbacks: Vec<GcCallback> = self.callbacks.lock().clone();
        for callback in callbacks {
            if let Err(err) = callback(phase, info) {
                report_unraisable("gc callback", &err);
            }
        }
    }

    // ========================================================================
    // Control
    // ========================================================================

    /// Allow automatic collections.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    /// Stop automatic collections. Explicit ones still run.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    /// Whether automatic collections run.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Young allocations that trigger an automatic collection. `0` disables
    /// automatic collection.
    pub fn set_threshold(&self, young: usize) {
        self.config.write().young_threshold = young;
    }

    /// Current young threshold.
    #[must_use]
    pub fn threshold(&self) -> usize {
        self.config.read().young_threshold
    }

    /// Replace the debug flags.
    pub fn set_debug(&self, flags: GcDebugFlags) {
        self.config.write().debug = flags;
    }

    /// Current debug flags.
    #[must_use]
    pub fn debug(&self) -> GcDebugFlags {
        self.config.read().debug
    }

    /// Bound the scratch entries a pass may use. `None` removes the bound.
    pub fn set_max_scratch_entries(&self, limit: Option<usize>) {
        self.config.write().max_scratch_entries = limit;
    }

    /// Register a callback invoked before and after every collection.
    pub fn add_callback(&self, callback: GcCallback) {
        self.callbacks.lock().push(callback);
    }

    /// Remove every registered callback.
    pub fn clear_callbacks(&self) {
        self.callbacks.lock().clear();
    }

    // ========================================================================
    // Generations
    // ========================================================================

    /// Move every tracked object to the permanent generation. Frozen
    /// objects are never scanned until [`Collector::unfreeze`].
    pub fn freeze(&self) {
        let mut st = self.state.lock();
        for head in [YOUNG, OLD[0], OLD[1]] {
            for index in st.links.indices(head) {
                if let Some(slot) = self.heap.slot(index) {
                    slot.set(GcBits::FROZEN);
                    slot.unset(GcBits::OLD_SPACE_1);
                }
            }
            st.links.merge(head, PERMANENT);
        }
        st.young_count = 0;
    }

    /// Return frozen objects to the oldest generation.
    pub fn unfreeze(&self) {
        let mode = self.config().mode;
        let mut st = self.state.lock();
        let dest = match mode {
            CollectorMode::Serial => st.pending(),
            CollectorMode::Concurrent => YOUNG,
        };
        while let Some(node) = st.links.first(PERMANENT) {
            let Some(slot) = self.heap.slot(Links::index(node)) else {
                fatal_error("tracked node without a slot");
            };
            slot.unset(GcBits::FROZEN);
            st.place(node, &slot, dest);
        }
    }

    /// Number of frozen objects.
    #[must_use]
    pub fn freeze_count(&self) -> usize {
        self.state.lock().links.len(PERMANENT)
    }

    /// Tracked objects of `generation`, or of every unfrozen generation.
    ///
    /// `Young` lists the young generation, `Increment` the old objects not
    /// yet scanned in the current incremental cycle and `Full` the whole
    /// old generation. The handles are borrowed: take a reference before
    /// the next collection or deallocation if they must stay valid.
    #[must_use]
    pub fn get_objects(&self, generation: Option<Generation>) -> Vec<ObjRef> {
        let st = self.state.lock();
        let heads: Vec<NodeId> = match generation {
            Some(Generation::Young) => vec![YOUNG],
            Some(Generation::Increment) => vec![st.pending()],
            Some(Generation::Full) => vec![OLD[0], OLD[1]],
            None => vec![YOUNG, OLD[0], OLD[1]],
        };
        heads
            .into_iter()
            .flat_map(|head| st.links.indices(head))
            .filter_map(|index| {
                self.heap
                    .slot(index)
                    .map(|slot| ObjRef::new(index, slot.generation()))
            })
            .collect()
    }

    /// `[young allocations, old objects pending this cycle, old objects
    /// already visited]`.
    #[must_use]
    pub fn counts(&self) -> [usize; 3] {
        let st = self.state.lock();
        [
            st.young_count,
            st.links.len(st.pending()),
            st.links.len(st.visited()),
        ]
    }

    /// Per-generation statistics, indexed young, increment, full.
    #[must_use]
    pub fn stats(&self) -> [GenerationStats; 3] {
        *self.stats.lock()
    }

    // ========================================================================
    // Roots & garbage
    // ========================================================================

    /// Hand a strong reference to the global root set.
    pub fn add_global(&self, obj: ObjRef) {
        self.globals.lock().push(obj);
    }

    /// Drop one global reference to `obj`. Returns whether one was held.
    pub fn remove_global(&self, mutator: &Mutator, obj: ObjRef) -> bool {
        let removed = {
            let mut globals = self.globals.lock();
            globals
                .iter()
                .position(|&g| g == obj)
                .map(|pos| globals.swap_remove(pos))
        };
        match removed {
            Some(obj) => {
                mutator.decref(obj);
                true
            }
            None => false,
        }
    }

    /// Snapshot of the global root set.
    #[must_use]
    pub fn globals(&self) -> Vec<ObjRef> {
        self.globals.lock().clone()
    }

    /// Snapshot of the garbage list.
    #[must_use]
    pub fn garbage(&self) -> Vec<ObjRef> {
        self.garbage.lock().clone()
    }

    /// Empty the garbage list, handing its strong references to the caller.
    #[must_use]
    pub fn take_garbage(&self) -> Vec<ObjRef> {
        std::mem::take(&mut *self.garbage.lock())
    }

    // ========================================================================
    // Metrics
    // ========================================================================

    /// Metrics of the most recent collection.
    #[must_use]
    pub fn last_metrics(&self) -> GcMetrics {
        *self.last_metrics.lock()
    }

    /// Cumulative counters.
    #[must_use]
    pub const fn metrics(&self) -> &GlobalMetrics {
        &self.metrics
    }

    /// Metrics of recent collections.
    #[must_use]
    pub const fn history(&self) -> &GcHistory {
        &self.history
    }
}
