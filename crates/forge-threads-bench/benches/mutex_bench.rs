//! Mutex benchmarks against `std::sync::Mutex`.

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use forge_threads::{Mutex, MutexKind, destroy_thread, spawn};

fn bench_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("mutex_uncontended");
    for kind in [MutexKind::Normal, MutexKind::Recursive, MutexKind::ErrorCheck] {
        let mutex = Mutex::with_kind(kind).expect("mutex init");
        group.bench_function(BenchmarkId::new("acquire_release", kind.as_str()), |b| {
            b.iter(|| {
                mutex.acquire();
                mutex.release();
            });
        });
    }
    let mutex = Mutex::new();
    group.bench_function("try_acquire_release", |b| {
        b.iter(|| {
            if mutex.try_acquire() {
                mutex.release();
            }
        });
    });
    let std_mutex = std::sync::Mutex::new(0u64);
    group.bench_function("std_lock", |b| {
        b.iter(|| {
            *std_mutex.lock().expect("poisoned") += 1;
        });
    });
    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("mutex_contended");
    for threads in [2usize, 4] {
        group.bench_with_input(BenchmarkId::new("guard_1k", threads), &threads, |b, &n| {
            b.iter(|| {
                let mutex = Arc::new(Mutex::new());
                let handles: Vec<_> = (0..n)
                    .map(|_| {
                        let mutex = Arc::clone(&mutex);
                        spawn(move || {
                            for _ in 0..1_000 {
                                let _guard = mutex.lock();
                            }
                        })
                        .expect("spawn")
                    })
                    .collect();
                for handle in handles {
                    destroy_thread(handle).expect("join");
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_uncontended, bench_contended);
criterion_main!(benches);
