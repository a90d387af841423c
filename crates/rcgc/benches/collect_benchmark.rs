//! Benchmark: cycle collection cost, serial and concurrent.
//!
//! Measures full collections over heaps of dead cycles, incremental
//! collections over a large live old generation, and the effect of the
//! mark-alive pre-pass on a mostly-live concurrent heap.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rcgc::{Collector, GcConfig, GcObject, Generation, Mutator, ObjRef, Traverse};
use std::hint::black_box;

#[derive(Traverse, Default)]
struct Node {
    edges: Vec<ObjRef>,
}

impl GcObject for Node {
    fn clear(&mut self, released: &mut Vec<ObjRef>) {
        released.append(&mut self.edges);
    }
}

fn dead_cycles(m: &Mutator, count: usize) {
    for _ in 0..count {
        let a = m.alloc(Node::default());
        let b = m.alloc(Node::default());
        m.incref(b);
        m.with_payload::<Node, _>(a, |n| n.edges.push(b)).unwrap();
        m.incref(a);
        m.with_payload::<Node, _>(b, |n| n.edges.push(a)).unwrap();
        m.decref(a);
        m.decref(b);
    }
}

/// A live chain of `len` nodes held by the global roots.
fn live_chain(collector: &Collector, m: &Mutator, len: usize) {
    let head = m.alloc(Node::default());
    let mut prev = head;
    for _ in 1..len {
        let next = m.alloc(Node::default());
        m.with_payload::<Node, _>(prev, |n| n.edges.push(next)).unwrap();
        prev = next;
    }
    collector.add_global(head);
}

fn bench_full_collection(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_collection");
    for cycles in [100, 1_000, 10_000] {
        for (name, config) in [
            ("serial", GcConfig::serial()),
            ("concurrent", GcConfig::concurrent()),
        ] {
            let collector = Collector::new(GcConfig {
                young_threshold: 0,
                ..config
            });
            let m = Mutator::new(&collector).unwrap();
            group.bench_with_input(BenchmarkId::new(name, cycles), &cycles, |b, &cycles| {
                b.iter(|| {
                    dead_cycles(&m, cycles);
                    black_box(m.collect_full().unwrap());
                });
            });
        }
    }
    group.finish();
}

fn bench_incremental_pause(c: &mut Criterion) {
    let collector = Collector::new(GcConfig {
        young_threshold: 0,
        ..GcConfig::serial()
    });
    let m = Mutator::new(&collector).unwrap();
    live_chain(&collector, &m, 50_000);
    m.collect(Generation::Young).unwrap();

    c.bench_function("incremental_with_50k_old", |b| {
        b.iter(|| {
            dead_cycles(&m, 100);
            black_box(m.collect(Generation::Increment).unwrap());
        });
    });
}

fn bench_mark_alive(c: &mut Criterion) {
    let mut group = c.benchmark_group("mark_alive");
    for mark_alive in [true, false] {
        let collector = Collector::new(GcConfig {
            young_threshold: 0,
            mark_alive,
            ..GcConfig::concurrent()
        });
        let m = Mutator::new(&collector).unwrap();
        live_chain(&collector, &m, 20_000);
        group.bench_function(BenchmarkId::from_parameter(mark_alive), |b| {
            b.iter(|| {
                dead_cycles(&m, 100);
                black_box(m.collect_full().unwrap());
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_full_collection,
    bench_incremental_pause,
    bench_mark_alive
);
criterion_main!(benches);
