//! Integration tests for GC tracing feature.
//!
//! These tests run collections with a subscriber installed so every span
//! and event the collector emits is formatted at least once.

#![cfg(feature = "tracing")]

use rcgc::{CallbackError, Collector, GcConfig, GcDebugFlags, GcObject, Mutator, ObjRef, Traverse};

#[derive(Traverse, Default)]
struct Node {
    edges: Vec<ObjRef>,
    #[rcgc(skip)]
    fail_finalizer: bool,
}

impl GcObject for Node {
    fn clear(&mut self, released: &mut Vec<ObjRef>) {
        released.append(&mut self.edges);
    }

    fn has_finalizer(&self) -> bool {
        self.fail_finalizer
    }

    fn finalize(&mut self, _cx: &mut rcgc::FinalizeCx<'_>) -> Result<(), CallbackError> {
        Err(CallbackError::new("finalizer failed"))
    }
}

fn init_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .with_test_writer()
        .try_init();
}

fn dead_cycle(m: &Mutator, fail_finalizer: bool) {
    let a = m.alloc(Node {
        fail_finalizer,
        ..Node::default()
    });
    let b = m.alloc(Node::default());
    m.incref(b);
    m.with_payload::<Node, _>(a, |n| n.edges.push(b)).unwrap();
    m.incref(a);
    m.with_payload::<Node, _>(b, |n| n.edges.push(a)).unwrap();
    m.decref(a);
    m.decref(b);
}

#[test]
fn test_serial_collection_with_tracing() {
    init_subscriber();
    let collector = Collector::new(GcConfig {
        young_threshold: 0,
        debug: GcDebugFlags::STATS | GcDebugFlags::COLLECTABLE,
        ..GcConfig::serial()
    });
    let m = Mutator::new(&collector).unwrap();
    dead_cycle(&m, true);
    assert_eq!(m.collect_full().unwrap(), 2);
}

#[test]
fn test_concurrent_collection_with_tracing() {
    init_subscriber();
    let collector = Collector::new(GcConfig {
        young_threshold: 0,
        qsbr_deferred_limit: 1,
        ..GcConfig::concurrent()
    });
    let m = Mutator::new(&collector).unwrap();
    for _ in 0..5 {
        dead_cycle(&m, false);
        assert_eq!(m.collect_full().unwrap(), 2);
    }
    assert_eq!(collector.heap().pending_frees(), 0);
}

#[test]
fn test_scratch_failure_with_tracing() {
    init_subscriber();
    let collector = Collector::new(GcConfig {
        young_threshold: 4,
        max_scratch_entries: Some(1),
        ..GcConfig::serial()
    });
    let m = Mutator::new(&collector).unwrap();
    // Automatic passes fail and are skipped.
    for _ in 0..5 {
        dead_cycle(&m, false);
    }
    assert_eq!(collector.metrics().total_collections(), 0);
    assert!(collector.metrics().total_out_of_memory() > 0);
}
