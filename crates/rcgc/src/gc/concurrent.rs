//! The concurrent collector.
//!
//! A pass stops the world twice:
//!
//! 1. Buffered deferred counts are flushed, queued merges applied, the
//!    mark-alive pre-pass runs and the young list is scanned. Weakrefs of
//!    the unreachable objects are cleared before the world restarts.
//! 2. Only if callbacks or finalizers ran: the unreachable objects are
//!    checked again and anything that gained an outside reference is
//!    resurrected.
//!
//! Callbacks and finalizers run between the pauses, and deletion after the
//! second one. Freed slots are only reused once every thread has passed a
//! quiescent state.

use super::list::{Links, YOUNG};
use super::mark_alive::{self, clear_alive};
use super::pass::{Heads, Scratch};
use super::{Collector, Doomed, PassOutcome};
use crate::config::GcConfig;
use crate::error::GcError;
use crate::heap::GcBits;
use crate::metrics::PhaseTimer;
use crate::object::ObjRef;
use crate::thread::{flush_deferred_buffer, Mutator};

pub(super) fn scan(
    collector: &Collector,
    mutator: &Mutator,
    config: &GcConfig,
    timer: &mut PhaseTimer,
    outcome: &mut PassOutcome,
) -> Result<Doomed, GcError> {
    collector.threads.stop_the_world(&mutator.tcb);
    timer.pause_begin();
    outcome.pauses += 1;
    let mut merged = Vec::new();
    let result = scan_paused(collector, mutator, config, timer, outcome, &mut merged);
    timer.pause_end();
    collector.threads.start_the_world();
    #[cfg(feature = "tracing")]
    crate::tracing::internal::log_pause(timer.pause);

    for obj in merged {
        mutator.decref(obj);
    }
    result
}

fn scan_paused(
    collector: &Collector,
    mutator: &Mutator,
    config: &GcConfig,
    timer: &mut PhaseTimer,
    outcome: &mut PassOutcome,
    merged: &mut Vec<ObjRef>,
) -> Result<Doomed, GcError> {
    let heap = &collector.heap;
    let stacks = collector.threads.snapshot();
    for tcb in &stacks {
        flush_deferred_buffer(collector, tcb);
        // Each queued object keeps one extra reference until the world
        // restarts, so none can die mid-pause.
        while let Some(obj) = tcb.merge_queue.pop() {
            if let Some(slot) = heap.get(obj) {
                slot.rc.explicit_merge(1);
                merged.push(obj);
            }
        }
    }
    let globals = collector.globals();

    timer.start();
    let mut st = collector.state.lock();
    let mut scratch = Scratch::new(config.max_scratch_entries);
    let marked = if config.mark_alive {
        #[cfg(feature = "tracing")]
        let _phase = crate::tracing::internal::trace_phase(
            crate::tracing::internal::GcPhase::MarkAlive,
        );
        mark_alive::mark_alive(heap, &st, &globals, &stacks, config, &mut scratch)?
    } else {
        Vec::new()
    };
    outcome.marked_alive = marked.len();

    let heads = match Heads::alloc(&mut st.links) {
        Ok(heads) => heads,
        Err(err) => {
            clear_alive(heap, &marked);
            return Err(err);
        }
    };
    let young = st.links.indices(YOUNG);
    let candidates: Vec<u32> = young
        .into_iter()
        .filter(|&index| heap.slot(index).is_some_and(|slot| !slot.has(GcBits::ALIVE)))
        .collect();
    if let Err(err) = scratch.reserve(candidates.len()) {
        clear_alive(heap, &marked);
        heads.release_all(&mut st.links);
        return Err(err);
    }
    for index in candidates {
        st.links.move_to(heads.region, Links::node(index));
    }
    clear_alive(heap, &marked);
    st.young_count = 0;

    let doomed = collector.scan_region(
        &mut st,
        mutator,
        heads,
        YOUNG,
        &stacks,
        config,
        outcome,
    );
    st.long_lived = st.tracked;
    drop(st);
    timer.end_scan();
    Ok(doomed)
}

/// Second pause: recheck the unreachable objects after finalizers and
/// callbacks ran. Returns the resurrected objects.
pub(super) fn resurrection_pause(
    collector: &Collector,
    mutator: &Mutator,
    doomed: &Doomed,
    timer: &mut PhaseTimer,
) -> Vec<ObjRef> {
    collector.threads.stop_the_world(&mutator.tcb);
    timer.pause_begin();
    let stacks = collector.threads.snapshot();
    for tcb in &stacks {
        flush_deferred_buffer(collector, tcb);
    }
    let resurrected = collector.state.lock().handle_resurrected(
        &collector.heap,
        doomed.unreachable,
        doomed.dest,
        &stacks,
    );
    timer.pause_end();
    collector.threads.start_the_world();
    resurrected
}
