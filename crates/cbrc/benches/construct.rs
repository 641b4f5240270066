//! Construction and handle-traffic benchmarks.
//!
//! Compares the single-allocation inline path against adopting a boxed
//! pointee, with both the global heap and the page pool behind the block.

use cbrc::{PagePool, SharedPtr};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

#[derive(Clone, Copy)]
struct Payload {
    _words: [u64; 4],
}

const PAYLOAD: Payload = Payload { _words: [1, 2, 3, 4] };

fn bench_inline_global(c: &mut Criterion) {
    c.bench_function("inline_global", |b| {
        b.iter(|| black_box(SharedPtr::new(black_box(PAYLOAD))));
    });
}

fn bench_boxed_global(c: &mut Criterion) {
    c.bench_function("boxed_global", |b| {
        b.iter(|| black_box(SharedPtr::from_box(Box::new(black_box(PAYLOAD)))));
    });
}

fn bench_inline_pool(c: &mut Criterion) {
    let pool = PagePool::new();
    c.bench_function("inline_pool", |b| {
        b.iter(|| black_box(SharedPtr::new_in(black_box(PAYLOAD), pool.clone())));
    });
}

fn bench_clone_drop(c: &mut Criterion) {
    let p = SharedPtr::new(PAYLOAD);
    c.bench_function("clone_drop", |b| {
        b.iter(|| black_box(SharedPtr::clone(black_box(&p))));
    });
}

fn bench_weak_lock(c: &mut Criterion) {
    let p = SharedPtr::new(PAYLOAD);
    let weak = SharedPtr::downgrade(&p);
    c.bench_function("weak_lock", |b| {
        b.iter(|| black_box(weak.lock()));
    });
}

criterion_group!(
    construct,
    bench_inline_global,
    bench_boxed_global,
    bench_inline_pool,
    bench_clone_drop,
    bench_weak_lock
);
criterion_main!(construct);
