//! Thread lifecycle and identity benchmarks.

use criterion::{Criterion, criterion_group, criterion_main};
use forge_threads::{current_thread_id, destroy_thread, is_main_thread, set_main_thread, spawn};

fn bench_spawn_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("thread_lifecycle");
    group.bench_function("spawn_join", |b| {
        b.iter(|| destroy_thread(spawn(|| {}).expect("spawn")).expect("join"));
    });
    group.bench_function("std_spawn_join", |b| {
        b.iter(|| std::thread::spawn(|| {}).join().expect("join"));
    });
    group.finish();
}

fn bench_identity(c: &mut Criterion) {
    set_main_thread();
    let mut group = c.benchmark_group("thread_identity");
    group.bench_function("current_thread_id", |b| {
        b.iter(|| criterion::black_box(current_thread_id()));
    });
    group.bench_function("is_main_thread", |b| {
        b.iter(|| criterion::black_box(is_main_thread()));
    });
    group.finish();
}

criterion_group!(benches, bench_spawn_join, bench_identity);
criterion_main!(benches);
