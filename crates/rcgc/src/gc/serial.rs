//! The serial collector: one mutator, a young generation and an old
//! generation split into two half-spaces.
//!
//! Young collections scan only the young list. Incremental collections add a
//! slice of the *pending* half-space, sized by the work estimate, and move
//! everything that survives into the *visited* half-space. Once pending runs
//! dry the two swap roles and the next cycle over the old generation starts.

use super::list::{OLD, YOUNG};
use super::pass::{Heads, Scratch};
use super::{Collector, Doomed, Generation, PassOutcome};
use crate::config::GcConfig;
use crate::error::GcError;
use crate::metrics::PhaseTimer;
use crate::thread::Mutator;

pub(super) fn scan(
    collector: &Collector,
    mutator: &Mutator,
    generation: Generation,
    config: &GcConfig,
    timer: &mut PhaseTimer,
    outcome: &mut PassOutcome,
) -> Result<Doomed, GcError> {
    mutator.flush_deferred();
    mutator.drain_merge_queue();
    let heap = &collector.heap;
    let stacks = collector.threads.snapshot();

    timer.start();
    let mut st = collector.state.lock();
    let young = st.links.len(YOUNG);
    let bound = match generation {
        Generation::Young => young,
        Generation::Increment => young + st.links.len(st.pending()),
        Generation::Full => young + st.links.len(OLD[0]) + st.links.len(OLD[1]),
    };
    // Reserve everything up front: a pass that fails here has not moved a
    // single object.
    Scratch::new(config.max_scratch_entries).reserve(bound)?;
    let heads = Heads::alloc(&mut st.links)?;

    let visited = st.visited();
    match generation {
        Generation::Young => st.links.merge(YOUNG, heads.region),
        Generation::Increment => {
            let work = st.assess_work(config);
            st.links.merge(YOUNG, heads.region);
            let budget = work.saturating_sub(young).max(1);
            let taken = st.take_increment(heap, heads.region, budget);
            st.work_to_do = work.saturating_sub(young + taken);
        }
        Generation::Full => {
            st.links.merge(YOUNG, heads.region);
            st.links.merge(OLD[0], heads.region);
            st.links.merge(OLD[1], heads.region);
        }
    }
    st.young_count = 0;

    let doomed = collector.scan_region(
        &mut st,
        mutator,
        heads,
        visited,
        &stacks,
        config,
        outcome,
    );

    if generation != Generation::Young && st.links.is_empty(st.pending()) {
        st.flip_spaces();
        st.work_to_do = 0;
    }
    drop(st);
    timer.end_scan();
    Ok(doomed)
}
