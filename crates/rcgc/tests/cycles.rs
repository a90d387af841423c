//! Cycle collection tests for the serial collector.

use std::sync::Arc;

use parking_lot::Mutex;
use rcgc::{
    CallbackError, CallbackPhase, CollectionInfo, Collector, GcConfig, GcError, GcObject,
    Generation, Mutator, ObjRef, Traverse, Visitor,
};

/// A container that can form cycles.
#[derive(Traverse, Default)]
struct Node {
    edges: Vec<ObjRef>,
}

impl GcObject for Node {
    fn clear(&mut self, released: &mut Vec<ObjRef>) {
        released.append(&mut self.edges);
    }
}

/// An immutable container: untracked once its children are.
#[derive(Traverse)]
struct Tuple(Vec<ObjRef>);

impl GcObject for Tuple {
    fn clear(&mut self, released: &mut Vec<ObjRef>) {
        released.append(&mut self.0);
    }

    fn is_untrackable_container(&self) -> bool {
        true
    }
}

/// Holds no references and is never tracked.
struct Leaf;

impl Traverse for Leaf {
    fn traverse(&self, _visitor: &mut dyn Visitor) {}
}

impl GcObject for Leaf {
    fn is_container(&self) -> bool {
        false
    }
}

fn setup() -> (Arc<Collector>, Mutator) {
    let collector = Collector::new(GcConfig::serial());
    collector.disable();
    let mutator = Mutator::new(&collector).unwrap();
    (collector, mutator)
}

/// Store a new strong reference to `to` inside `from`.
fn link(m: &Mutator, from: ObjRef, to: ObjRef) {
    m.incref(to);
    m.with_payload::<Node, _>(from, |n| n.edges.push(to)).unwrap();
}

fn cycle(m: &Mutator) -> (ObjRef, ObjRef) {
    let a = m.alloc(Node::default());
    let b = m.alloc(Node::default());
    link(m, a, b);
    link(m, b, a);
    (a, b)
}

#[test]
fn test_simple_cycle() {
    let (collector, m) = setup();
    let (a, b) = cycle(&m);

    m.decref(a);
    m.decref(b);
    assert_eq!(collector.heap().live_objects(), 2);

    assert_eq!(m.collect_full().unwrap(), 2);
    assert_eq!(collector.heap().live_objects(), 0);
    assert_eq!(m.refcount(a), None);
}

#[test]
fn test_self_reference() {
    let (collector, m) = setup();
    let a = m.alloc(Node::default());
    link(&m, a, a);
    m.decref(a);

    assert_eq!(m.collect_full().unwrap(), 1);
    assert_eq!(collector.heap().live_objects(), 0);
}

#[test]
fn test_externally_referenced_cycle_survives() {
    let (collector, m) = setup();
    let (a, b) = cycle(&m);
    m.decref(b);

    assert_eq!(m.collect_full().unwrap(), 0);
    assert_eq!(collector.heap().live_objects(), 2);
    assert_eq!(m.refcount(a), Some(2));

    m.decref(a);
    assert_eq!(m.collect_full().unwrap(), 2);
}

#[test]
fn test_acyclic_garbage_dies_without_collection() {
    let (collector, m) = setup();
    let a = m.alloc(Node::default());
    let b = m.alloc(Node::default());
    let leaf = m.alloc(Leaf);
    link(&m, a, b);
    link(&m, b, leaf);
    m.decref(b);
    m.decref(leaf);

    m.decref(a);
    assert_eq!(collector.heap().live_objects(), 0);
}

#[test]
fn test_collection_is_idempotent() {
    let (collector, m) = setup();
    let (a, b) = cycle(&m);
    let keep = m.alloc(Node::default());
    m.decref(a);
    m.decref(b);

    assert_eq!(m.collect_full().unwrap(), 2);
    assert_eq!(m.collect_full().unwrap(), 0);
    assert_eq!(collector.heap().live_objects(), 1);
    assert!(m.is_tracked(keep));
}

/// Everything observable about `objs` and the generation lists.
fn snapshot(
    collector: &Collector,
    m: &Mutator,
    objs: &[ObjRef],
) -> ([usize; 3], Vec<ObjRef>, Vec<[bool; 4]>, Vec<Option<i64>>) {
    let mut tracked = collector.get_objects(None);
    tracked.sort_by_key(|r| r.index());
    let flags = objs
        .iter()
        .map(|&obj| {
            [
                m.is_tracked(obj),
                m.is_finalized(obj),
                m.is_deferred(obj),
                m.is_immortal(obj),
            ]
        })
        .collect();
    let counts = objs.iter().map(|&obj| m.refcount(obj)).collect();
    (collector.counts(), tracked, flags, counts)
}

#[test]
fn test_collection_without_garbage_changes_nothing() {
    for config in [GcConfig::serial(), GcConfig::concurrent()] {
        let collector = Collector::new(GcConfig {
            young_threshold: 0,
            ..config
        });
        let m = Mutator::new(&collector).unwrap();
        let (a, b) = cycle(&m);
        m.decref(b);
        let deferred = m.alloc(Node::default());
        m.mark_deferred(deferred).unwrap();
        let immortal = m.alloc(Node::default());
        m.mark_immortal(immortal).unwrap();
        let leaf = m.alloc(Leaf);
        let objs = [a, b, deferred, immortal, leaf];

        // The first pass promotes young objects and untracks the immortal one.
        assert_eq!(m.collect_full().unwrap(), 0);
        let before = snapshot(&collector, &m, &objs);
        assert!(!m.is_tracked(immortal));
        assert!(m.is_deferred(deferred));

        for _ in 0..3 {
            assert_eq!(m.collect_full().unwrap(), 0);
            assert_eq!(snapshot(&collector, &m, &objs), before);
            assert_eq!(collector.heap().live_objects(), 5);
        }
    }
}

#[test]
fn test_young_collection_promotes_survivors() {
    let (collector, m) = setup();
    let keep = m.alloc(Node::default());
    assert_eq!(collector.counts()[0], 1);
    assert_eq!(collector.get_objects(Some(Generation::Young)), vec![keep]);

    m.collect(Generation::Young).unwrap();
    assert_eq!(collector.counts(), [0, 0, 1]);
    assert!(collector.get_objects(Some(Generation::Young)).is_empty());
    assert_eq!(collector.get_objects(Some(Generation::Full)), vec![keep]);
    assert_eq!(collector.get_objects(None), vec![keep]);
}

#[test]
fn test_young_collection_ignores_old_cycles() {
    let (collector, m) = setup();
    let (a, b) = cycle(&m);
    m.collect(Generation::Young).unwrap();
    m.decref(a);
    m.decref(b);

    assert_eq!(m.collect(Generation::Young).unwrap(), 0);
    assert_eq!(collector.heap().live_objects(), 2);
    assert_eq!(m.collect_full().unwrap(), 2);
}

#[test]
fn test_increments_reach_old_cycles() {
    let (collector, m) = setup();
    let (a, b) = cycle(&m);
    m.collect(Generation::Young).unwrap();
    m.decref(a);
    m.decref(b);

    let mut collected = 0;
    for _ in 0..4 {
        collected += m.collect(Generation::Increment).unwrap();
    }
    assert_eq!(collected, 2);
    assert_eq!(collector.heap().live_objects(), 0);
}

#[test]
fn test_increment_keeps_live_old_objects() {
    let (collector, m) = setup();
    let (a, b) = cycle(&m);
    m.decref(b);
    m.collect(Generation::Young).unwrap();

    for _ in 0..4 {
        assert_eq!(m.collect(Generation::Increment).unwrap(), 0);
    }
    assert_eq!(collector.heap().live_objects(), 2);
    assert_eq!(collector.get_objects(None).len(), 2);
    m.decref(a);
}

#[test]
fn test_deferred_object_in_cycle() {
    let (collector, m) = setup();
    let a = m.alloc(Node::default());
    assert!(m.mark_deferred(a).unwrap());
    let b = m.alloc(Node::default());
    link(&m, a, b);
    link(&m, b, a);
    m.decref(a);
    m.decref(b);

    // Deferred counts never reach zero on their own.
    assert_eq!(collector.heap().live_objects(), 2);
    assert_eq!(m.collect_full().unwrap(), 2);
    assert_eq!(collector.heap().live_objects(), 0);
}

#[test]
fn test_unreferenced_deferred_object_needs_collection() {
    let (collector, m) = setup();
    let a = m.alloc(Node::default());
    m.mark_deferred(a).unwrap();
    m.incref(a);
    assert_eq!(m.refcount(a), Some(2));
    m.decref(a);
    m.decref(a);
    assert_eq!(m.refcount(a), Some(0));
    assert_eq!(collector.heap().live_objects(), 1);

    assert_eq!(m.collect_full().unwrap(), 1);
    assert_eq!(collector.heap().live_objects(), 0);
}

#[test]
fn test_untracked_objects_cannot_be_deferred() {
    let (_collector, m) = setup();
    let leaf = m.alloc(Leaf);
    assert!(!m.is_tracked(leaf));
    assert!(!m.mark_deferred(leaf).unwrap());
    m.decref(leaf);
    assert_eq!(m.mark_deferred(leaf), Err(GcError::InvalidReference));
}

#[test]
fn test_immortal_objects_are_never_collected() {
    let (collector, m) = setup();
    let (a, b) = cycle(&m);
    m.mark_immortal(a).unwrap();
    m.decref(a);
    m.decref(b);
    assert!(m.is_immortal(a));
    assert_eq!(m.refcount(a), Some(i64::MAX));

    assert_eq!(m.collect_full().unwrap(), 0);
    assert!(!m.is_tracked(a));
    assert_eq!(collector.heap().live_objects(), 2);
}

#[test]
fn test_acyclic_tuple_is_untracked() {
    let (_collector, m) = setup();
    let leaf = m.alloc(Leaf);
    let tuple = m.alloc(Tuple(vec![leaf]));
    assert!(m.is_tracked(tuple));

    m.collect(Generation::Young).unwrap();
    assert!(!m.is_tracked(tuple));

    let node = m.alloc(Node::default());
    m.incref(node);
    let holder = m.alloc(Tuple(vec![node]));
    m.collect(Generation::Young).unwrap();
    assert!(m.is_tracked(holder));
}

#[test]
fn test_explicit_untrack() {
    let (collector, m) = setup();
    let (a, b) = cycle(&m);
    m.untrack(a);
    m.untrack(b);
    m.decref(a);
    m.decref(b);

    assert_eq!(m.collect_full().unwrap(), 0);
    assert_eq!(collector.heap().live_objects(), 2);
}

#[test]
fn test_freeze_hides_objects() {
    let (collector, m) = setup();
    let (a, b) = cycle(&m);
    collector.freeze();
    assert_eq!(collector.freeze_count(), 2);
    assert!(collector.get_objects(None).is_empty());
    m.decref(a);
    m.decref(b);

    assert_eq!(m.collect_full().unwrap(), 0);
    assert_eq!(collector.heap().live_objects(), 2);

    collector.unfreeze();
    assert_eq!(collector.freeze_count(), 0);
    assert_eq!(collector.get_objects(Some(Generation::Increment)).len(), 2);
    assert_eq!(m.collect_full().unwrap(), 2);
}

#[test]
fn test_stats_per_generation() {
    let (_collector, m) = setup();
    let (a, b) = cycle(&m);
    m.decref(a);
    m.decref(b);
    m.collect(Generation::Young).unwrap();
    m.collect_full().unwrap();

    let stats = m.collector().stats();
    assert_eq!(stats[0].collections, 1);
    assert_eq!(stats[0].collected, 2);
    assert_eq!(stats[1].collections, 0);
    assert_eq!(stats[2].collections, 1);
    assert_eq!(stats[2].collected, 0);
}

#[test]
fn test_callbacks_see_start_and_stop() {
    let (collector, m) = setup();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    collector.add_callback(Arc::new(
        move |phase: CallbackPhase, info: &CollectionInfo| -> Result<(), CallbackError> {
            log.lock().push((phase, info.generation, info.collected));
            Ok(())
        },
    ));
    collector.add_callback(Arc::new(
        |_: CallbackPhase, _: &CollectionInfo| -> Result<(), CallbackError> {
            Err(CallbackError::new("ignored"))
        },
    ));

    let (a, b) = cycle(&m);
    m.decref(a);
    m.decref(b);
    assert_eq!(m.collect_full().unwrap(), 2);

    assert_eq!(
        *seen.lock(),
        vec![
            (CallbackPhase::Start, Generation::Full, 0),
            (CallbackPhase::Stop, Generation::Full, 2),
        ]
    );

    collector.clear_callbacks();
    m.collect_full().unwrap();
    assert_eq!(seen.lock().len(), 2);
}

#[test]
fn test_automatic_collection() {
    let collector = Collector::new(GcConfig {
        young_threshold: 10,
        ..GcConfig::serial()
    });
    let m = Mutator::new(&collector).unwrap();
    for _ in 0..20 {
        let (a, b) = cycle(&m);
        m.decref(a);
        m.decref(b);
    }
    assert!(collector.metrics().total_collections() > 0);
    assert!(collector.heap().live_objects() < 40);

    collector.disable();
    let before = collector.metrics().total_collections();
    for _ in 0..20 {
        let (a, b) = cycle(&m);
        m.decref(a);
        m.decref(b);
    }
    assert_eq!(collector.metrics().total_collections(), before);
    collector.enable();
    assert!(collector.is_enabled());
}

#[test]
fn test_threshold_zero_disables_automatic_collection() {
    let collector = Collector::new(GcConfig::serial());
    collector.set_threshold(0);
    assert_eq!(collector.threshold(), 0);
    let m = Mutator::new(&collector).unwrap();
    for _ in 0..3000 {
        let (a, b) = cycle(&m);
        m.decref(a);
        m.decref(b);
    }
    assert_eq!(collector.metrics().total_collections(), 0);
    assert_eq!(m.collect_full().unwrap(), 6000);
}
