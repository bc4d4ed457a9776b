//! # Allocator Benchmarks
//!
//! Hot-path cost of each allocator against its typical per-frame workload.
//!
//! Run with: `cargo bench --package rancage_memory`

// Benchmarks don't need docs
#![allow(missing_docs)]
#![allow(unsafe_code)]

use std::alloc::Layout;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rancage_memory::{AllocShape, FixedPool, FrameArena, LinearArena, TrackingAllocator};

/// Allocations per iteration, roughly one frame's worth of scratch data.
const BATCH: usize = 1_000;

fn bench_linear_arena(c: &mut Criterion) {
    let mut group = c.benchmark_group("linear_arena");

    for align in [8usize, 16, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(align), &align, |b, &align| {
            let mut arena = LinearArena::new(BATCH * (64 + align)).unwrap();
            b.iter(|| {
                for _ in 0..BATCH {
                    black_box(arena.allocate(black_box(48), align).unwrap());
                }
                arena.reset();
            });
        });
    }

    group.finish();
}

fn bench_frame_arena(c: &mut Criterion) {
    let mut frame = FrameArena::new(BATCH * 64).unwrap();
    c.bench_function("frame_arena_cycle", |b| {
        b.iter(|| {
            frame.begin_cycle();
            for _ in 0..BATCH {
                black_box(frame.allocate(black_box(48), 16).unwrap());
            }
        });
    });
}

fn bench_fixed_pool(c: &mut Criterion) {
    let pool = FixedPool::new(64, BATCH).unwrap();
    let mut slots = Vec::with_capacity(BATCH);
    c.bench_function("fixed_pool_alloc_free", |b| {
        b.iter(|| {
            for _ in 0..BATCH {
                slots.push(pool.allocate().unwrap());
            }
            for slot in slots.drain(..) {
                unsafe { pool.deallocate(slot) };
            }
        });
    });
}

fn bench_tracking(c: &mut Criterion) {
    let tracker = TrackingAllocator::new();
    let layout = Layout::from_size_align(64, 8).unwrap();
    c.bench_function("tracking_alloc_free", |b| {
        b.iter(|| {
            let block = tracker.allocate(layout, AllocShape::Scalar).unwrap();
            unsafe { tracker.free(black_box(block).as_ptr(), layout, AllocShape::Scalar).unwrap() };
        });
    });
}

criterion_group!(
    benches,
    bench_linear_arena,
    bench_frame_arena,
    bench_fixed_pool,
    bench_tracking
);
criterion_main!(benches);
