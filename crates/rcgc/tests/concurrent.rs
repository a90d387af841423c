//! Concurrent collector: several mutator threads, the mark-alive pre-pass,
//! QSBR-deferred slot reuse and the scratch-space limit.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use rcgc::{
    Collector, GcConfig, GcError, GcObject, Generation, Mutator, ObjRef, StackRef, Traverse,
    Visitor,
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

struct Leaf;

impl Traverse for Leaf {
    fn traverse(&self, _visitor: &mut dyn Visitor) {}
}

impl GcObject for Leaf {
    fn is_container(&self) -> bool {
        false
    }
}

fn concurrent(config: GcConfig) -> (Arc<Collector>, Mutator) {
    let collector = Collector::new(GcConfig {
        young_threshold: 0,
        ..config
    });
    let m = Mutator::new(&collector).unwrap();
    (collector, m)
}

fn link(m: &Mutator, from: ObjRef, to: ObjRef) {
    m.incref(to);
    m.with_payload::<Node, _>(from, |n| n.edges.push(to)).unwrap();
}

fn dead_cycle(m: &Mutator) {
    let a = m.alloc(Node::default());
    let b = m.alloc(Node::default());
    link(m, a, b);
    link(m, b, a);
    m.decref(a);
    m.decref(b);
}

/// A chain of `len` nodes whose head is handed to the global roots.
fn rooted_chain(collector: &Collector, m: &Mutator, len: usize) -> ObjRef {
    let head = m.alloc(Node::default());
    let mut prev = head;
    for _ in 1..len {
        let next = m.alloc(Node::default());
        m.with_payload::<Node, _>(prev, |n| n.edges.push(next)).unwrap();
        prev = next;
    }
    collector.add_global(head);
    head
}

#[test]
fn test_cycle_is_collected() {
    let (collector, m) = concurrent(GcConfig::concurrent());
    dead_cycle(&m);
    assert_eq!(m.collect_full().unwrap(), 2);
    assert_eq!(collector.heap().live_objects(), 0);

    let metrics = collector.last_metrics();
    assert_eq!(metrics.pauses, 1);
    assert_eq!(metrics.collection_type, rcgc::CollectionType::Concurrent);
}

#[test]
fn test_every_generation_scans_the_whole_heap() {
    let (collector, m) = concurrent(GcConfig::concurrent());
    dead_cycle(&m);
    m.collect(Generation::Young).unwrap();
    dead_cycle(&m);
    assert_eq!(m.collect(Generation::Young).unwrap(), 2);
    assert_eq!(collector.heap().live_objects(), 0);
    assert_eq!(collector.stats()[0].collections, 2);
}

#[test]
fn test_mark_alive_skips_reachable_objects() {
    let (collector, m) = concurrent(GcConfig::concurrent());
    rooted_chain(&collector, &m, 10);
    dead_cycle(&m);

    assert_eq!(m.collect_full().unwrap(), 2);
    let metrics = collector.last_metrics();
    assert_eq!(metrics.objects_marked_alive, 10);
    assert_eq!(metrics.objects_scanned, 2);
    assert_eq!(collector.heap().live_objects(), 10);
}

#[test]
fn test_without_mark_alive_everything_is_scanned() {
    let (collector, m) = concurrent(GcConfig {
        mark_alive: false,
        ..GcConfig::concurrent()
    });
    rooted_chain(&collector, &m, 10);
    dead_cycle(&m);

    assert_eq!(m.collect_full().unwrap(), 2);
    let metrics = collector.last_metrics();
    assert_eq!(metrics.objects_marked_alive, 0);
    assert_eq!(metrics.objects_scanned, 12);
    assert_eq!(collector.heap().live_objects(), 10);
}

#[test]
fn test_wide_container_is_marked_in_spans() {
    let (collector, m) = concurrent(GcConfig {
        span_threshold: 8,
        prefetch_buffer_len: 4,
        ..GcConfig::concurrent()
    });
    let hub = m.alloc(Node::default());
    for _ in 0..100 {
        let child = m.alloc(Node::default());
        m.with_payload::<Node, _>(hub, |n| n.edges.push(child)).unwrap();
    }
    collector.add_global(hub);

    assert_eq!(m.collect_full().unwrap(), 0);
    let metrics = collector.last_metrics();
    assert_eq!(metrics.objects_marked_alive, 101);
    assert_eq!(metrics.objects_scanned, 0);

    // Marks are cleared after each pass.
    assert_eq!(m.collect_full().unwrap(), 0);
    assert_eq!(collector.last_metrics().objects_marked_alive, 101);

    assert!(collector.remove_global(&m, hub));
    assert_eq!(collector.heap().live_objects(), 0);
}

#[test]
fn test_stack_entries_are_mark_roots() {
    let (collector, m) = concurrent(GcConfig::concurrent());
    let a = m.alloc(Node::default());
    let b = m.alloc(Node::default());
    link(&m, a, b);
    m.decref(b);
    m.push(StackRef::steal(&m, a));

    assert_eq!(m.collect_full().unwrap(), 0);
    assert_eq!(collector.last_metrics().objects_marked_alive, 2);

    m.pop().unwrap().close(&m);
    assert_eq!(collector.heap().live_objects(), 0);
}

#[test]
fn test_frozen_objects_keep_their_children() {
    let (collector, m) = concurrent(GcConfig::concurrent());
    let holder = m.alloc(Node::default());
    collector.freeze();
    let child = m.alloc(Node::default());
    m.with_payload::<Node, _>(holder, |n| n.edges.push(child)).unwrap();

    assert_eq!(m.collect_full().unwrap(), 0);
    assert_eq!(collector.last_metrics().objects_marked_alive, 1);
    assert!(m.is_tracked(child));

    collector.unfreeze();
    assert_eq!(collector.freeze_count(), 0);
    assert_eq!(collector.get_objects(None).len(), 2);
}

#[test]
fn test_scratch_limit_fails_without_side_effects() {
    let (collector, m) = concurrent(GcConfig {
        max_scratch_entries: Some(3),
        ..GcConfig::concurrent()
    });
    rooted_chain(&collector, &m, 10);
    dead_cycle(&m);
    let tracked = collector.get_objects(None).len();

    assert_eq!(m.collect_full(), Err(GcError::OutOfMemory));
    assert_eq!(collector.metrics().total_out_of_memory(), 1);
    assert_eq!(collector.metrics().total_collections(), 0);
    assert_eq!(collector.heap().live_objects(), 12);
    assert_eq!(collector.get_objects(None).len(), tracked);
    assert!(!collector.is_collecting());

    collector.set_max_scratch_entries(None);
    assert_eq!(m.collect_full().unwrap(), 2);
    assert_eq!(collector.last_metrics().objects_marked_alive, 10);
}

#[test]
fn test_scratch_limit_on_candidates() {
    let (collector, m) = concurrent(GcConfig {
        max_scratch_entries: Some(3),
        ..GcConfig::concurrent()
    });
    rooted_chain(&collector, &m, 2);
    dead_cycle(&m);
    dead_cycle(&m);

    // Two marks fit, the four candidates do not.
    assert_eq!(m.collect_full(), Err(GcError::OutOfMemory));
    assert_eq!(collector.heap().live_objects(), 6);

    collector.set_max_scratch_entries(Some(6));
    assert_eq!(m.collect_full().unwrap(), 4);
}

#[test]
fn test_serial_scratch_limit() {
    let collector = Collector::new(GcConfig {
        young_threshold: 0,
        max_scratch_entries: Some(1),
        ..GcConfig::serial()
    });
    let m = Mutator::new(&collector).unwrap();
    dead_cycle(&m);

    assert_eq!(m.collect_full(), Err(GcError::OutOfMemory));
    assert_eq!(collector.counts()[0], 2);
    collector.set_max_scratch_entries(Some(2));
    assert_eq!(m.collect_full().unwrap(), 2);
}

#[test]
fn test_freed_slots_wait_for_every_thread() {
    let collector = Collector::new(GcConfig {
        young_threshold: 0,
        qsbr_deferred_limit: 1,
        ..GcConfig::concurrent()
    });
    let m1 = Mutator::new(&collector).unwrap();
    let m2 = Mutator::new(&collector).unwrap();

    let a = m1.alloc(Leaf);
    m1.decref(a);
    assert_eq!(collector.heap().live_objects(), 0);
    assert_eq!(collector.heap().pending_frees(), 1);

    // m2 has not passed a quiescent state yet.
    m1.safepoint();
    assert_eq!(collector.heap().pending_frees(), 1);
    let b = m1.alloc(Leaf);
    assert_ne!(b.index(), a.index());

    m2.safepoint();
    assert_eq!(collector.heap().pending_frees(), 0);
    let c = m1.alloc(Leaf);
    assert_eq!(c.index(), a.index());
    assert_ne!(c.generation(), a.generation());

    m1.decref(b);
    m1.decref(c);
}

#[test]
fn test_detached_thread_does_not_hold_back_reuse() {
    let collector = Collector::new(GcConfig {
        young_threshold: 0,
        qsbr_deferred_limit: 1,
        ..GcConfig::concurrent()
    });
    let m1 = Mutator::new(&collector).unwrap();
    let m2 = Mutator::new(&collector).unwrap();

    let a = m1.alloc(Leaf);
    m2.detached(|| {
        m1.decref(a);
        m1.safepoint();
        assert_eq!(collector.heap().pending_frees(), 0);
    });
}

#[test]
fn test_collection_reclaims_freed_slots() {
    let (collector, m) = concurrent(GcConfig {
        qsbr_deferred_limit: 100,
        ..GcConfig::concurrent()
    });
    dead_cycle(&m);
    assert_eq!(m.collect_full().unwrap(), 2);
    // The pass advances the sequence and passes a quiescent state itself.
    assert_eq!(collector.heap().pending_frees(), 0);
}

#[test]
fn test_shared_object_across_threads() {
    const WORKERS: usize = 4;
    const ROUNDS: usize = 200;

    let collector = Collector::new(GcConfig {
        young_threshold: 64,
        ..GcConfig::concurrent()
    });
    let m = Mutator::new(&collector).unwrap();
    let shared = m.alloc(Node::default());
    collector.add_global(shared);
    let finished = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let collector = Arc::clone(&collector);
            let finished = Arc::clone(&finished);
            thread::spawn(move || {
                let w = Mutator::new(&collector).unwrap();
                let mut kept = Vec::new();
                for round in 0..ROUNDS {
                    w.incref(shared);
                    dead_cycle(&w);
                    let node = w.alloc(Node::default());
                    link(&w, node, shared);
                    if round % 3 == 0 {
                        kept.push(node);
                    } else {
                        w.decref(node);
                    }
                    w.decref(shared);
                    w.safepoint();
                }
                for node in kept {
                    w.decref(node);
                }
                finished.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    while finished.load(Ordering::SeqCst) < WORKERS {
        let _ = m.collect_full();
        m.safepoint();
    }
    m.detached(|| {
        for handle in handles {
            handle.join().unwrap();
        }
    });

    m.collect_full().unwrap();
    assert_eq!(collector.heap().live_objects(), 1);
    assert_eq!(m.refcount(shared), Some(1));
    assert!(collector.metrics().total_concurrent_collections() > 0);

    assert!(collector.remove_global(&m, shared));
    assert_eq!(collector.heap().live_objects(), 0);
}
