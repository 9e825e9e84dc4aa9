//! AtomicCounter benchmarks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use forge_threads::{AtomicCounter, destroy_thread, spawn};

fn bench_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("counter_uncontended");
    let counter = AtomicCounter::new();
    group.bench_function("increment", |b| {
        b.iter(|| criterion::black_box(counter.increment()));
    });
    group.bench_function("decrement", |b| {
        b.iter(|| criterion::black_box(counter.decrement()));
    });
    group.bench_function("store", |b| {
        b.iter(|| counter.store(criterion::black_box(7)));
    });
    let std_counter = AtomicU32::new(0);
    group.bench_function("std_fetch_add", |b| {
        b.iter(|| criterion::black_box(std_counter.fetch_add(1, Ordering::SeqCst)));
    });
    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("counter_contended");
    for threads in [2usize, 4, 8] {
        group.bench_with_input(BenchmarkId::new("increment_1k", threads), &threads, |b, &n| {
            b.iter(|| {
                let counter = Arc::new(AtomicCounter::new());
                let handles: Vec<_> = (0..n)
                    .map(|_| {
                        let counter = Arc::clone(&counter);
                        spawn(move || {
                            for _ in 0..1_000 {
                                counter.increment();
                            }
                        })
                        .expect("spawn")
                    })
                    .collect();
                for handle in handles {
                    destroy_thread(handle).expect("join");
                }
                criterion::black_box(counter.load());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_uncontended, bench_contended);
criterion_main!(benches);
