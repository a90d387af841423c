//! Integration tests for collection metrics and history.

use std::time::Duration;

use rcgc::{
    CollectionType, Collector, GcConfig, GcObject, Generation, Mutator, ObjRef, Traverse,
};

#[derive(Traverse, Default)]
struct Node {
    edges: Vec<ObjRef>,
}

impl GcObject for Node {
    fn clear(&mut self, released: &mut Vec<ObjRef>) {
        released.append(&mut self.edges);
    }
}

fn setup(config: GcConfig) -> (std::sync::Arc<Collector>, Mutator) {
    let collector = Collector::new(GcConfig {
        young_threshold: 0,
        ..config
    });
    let m = Mutator::new(&collector).unwrap();
    (collector, m)
}

fn dead_cycle(m: &Mutator) {
    let a = m.alloc(Node::default());
    let b = m.alloc(Node::default());
    m.incref(b);
    m.with_payload::<Node, _>(a, |n| n.edges.push(b)).unwrap();
    m.incref(a);
    m.with_payload::<Node, _>(b, |n| n.edges.push(a)).unwrap();
    m.decref(a);
    m.decref(b);
}

#[test]
fn test_no_collection_yet() {
    let (collector, _m) = setup(GcConfig::serial());
    let metrics = collector.last_metrics();
    assert_eq!(metrics.collection_type, CollectionType::None);
    assert_eq!(metrics.total_collections, 0);
    assert!(collector.history().snapshots().is_empty());
    assert_eq!(collector.history().average_pause(), Duration::ZERO);
}

/// Phase timings never exceed the wall-clock duration of the pass.
#[test]
fn test_phase_timing_sums_approximately() {
    let (collector, m) = setup(GcConfig::serial());
    for _ in 0..100 {
        dead_cycle(&m);
    }
    m.collect_full().unwrap();

    let metrics = collector.last_metrics();
    let total_phase_time =
        metrics.scan_duration + metrics.finalize_duration + metrics.delete_duration;
    assert!(
        total_phase_time <= metrics.duration + Duration::from_micros(100),
        "Total phase time ({total_phase_time:?}) should not exceed total duration ({:?})",
        metrics.duration
    );
    assert_eq!(metrics.objects_collected, 200);
    assert_eq!(metrics.objects_scanned, 200);
}

#[test]
fn test_serial_collection_types() {
    let (collector, m) = setup(GcConfig::serial());
    m.collect(Generation::Young).unwrap();
    assert_eq!(collector.last_metrics().collection_type, CollectionType::Young);
    m.collect(Generation::Increment).unwrap();
    assert_eq!(
        collector.last_metrics().collection_type,
        CollectionType::Incremental
    );
    m.collect_full().unwrap();
    assert_eq!(collector.last_metrics().collection_type, CollectionType::Full);

    let global = collector.metrics();
    assert_eq!(global.total_collections(), 3);
    assert_eq!(global.total_young_collections(), 1);
    assert_eq!(global.total_incremental_collections(), 1);
    assert_eq!(global.total_full_collections(), 1);
    assert_eq!(global.total_concurrent_collections(), 0);
    // Serial passes never stop the world.
    assert_eq!(collector.last_metrics().pauses, 0);
    assert_eq!(global.total_pause_ns(), 0);
}

#[test]
fn test_concurrent_pauses_are_recorded() {
    let (collector, m) = setup(GcConfig::concurrent());
    dead_cycle(&m);
    m.collect_full().unwrap();

    let metrics = collector.last_metrics();
    assert_eq!(metrics.collection_type, CollectionType::Concurrent);
    assert_eq!(metrics.pauses, 1);
    assert!(metrics.pause_duration <= metrics.duration);
    assert_eq!(collector.metrics().total_concurrent_collections(), 1);
    assert!(collector.history().max_pause() >= collector.history().average_pause());
}

#[test]
fn test_global_totals_accumulate() {
    let (collector, m) = setup(GcConfig::serial());
    for _ in 0..3 {
        dead_cycle(&m);
        m.collect_full().unwrap();
    }
    assert_eq!(collector.metrics().total_objects_collected(), 6);
    assert_eq!(collector.metrics().total_objects_uncollectable(), 0);
    assert_eq!(collector.metrics().total_objects_resurrected(), 0);
    assert_eq!(collector.last_metrics().total_collections, 3);
}

#[test]
fn test_history_keeps_recent_snapshots() {
    let (collector, m) = setup(GcConfig::serial());
    for _ in 0..100 {
        m.collect(Generation::Young).unwrap();
    }
    let snapshots = collector.history().snapshots();
    assert_eq!(snapshots.len(), 64);
    assert_eq!(snapshots[0].total_collections, 37);
    assert_eq!(snapshots[63].total_collections, 100);
}
