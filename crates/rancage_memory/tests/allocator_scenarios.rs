//! End-to-end scenarios for the engine allocators.

#![allow(unsafe_code)]

use std::alloc::Layout;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use rancage_memory::{
    AllocShape, FixedPool, FrameArena, LinearArena, MemoryConfig, MemoryError, SourceLocation,
    TrackingAllocator,
};

#[test]
fn test_arena_grow_then_reset() {
    let mut arena = LinearArena::new(64).unwrap();

    let _ = arena.allocate(40, 8).unwrap();
    assert_eq!(arena.size(), 40);

    let _ = arena.allocate(40, 8).unwrap();
    assert!(arena.capacity() >= 128);
    assert_eq!(arena.size(), 80);

    arena.reset();
    assert_eq!(arena.size(), 0);
    assert!(arena.capacity() >= 128);
}

#[test]
fn test_frame_overflow_by_one_byte() {
    let mut frame = FrameArena::new(16).unwrap();
    frame.begin_cycle();
    let _ = frame.allocate(16, 16).unwrap();
    assert!(matches!(frame.allocate(1, 1), Err(MemoryError::OutOfSpace { .. })));
}

#[test]
fn test_frame_data_lifetime_across_cycles() {
    let mut frame = FrameArena::new(256).unwrap();

    frame.begin_cycle();
    let written = frame.allocate(64, 16).unwrap();
    unsafe { written.as_ptr().write_bytes(0x5A, 64) };

    frame.begin_cycle();
    // Fill the other buffer completely; cycle N's bytes are untouched.
    let other = frame.allocate(256, 16).unwrap();
    unsafe { other.as_ptr().write_bytes(0x00, 256) };
    let intact = unsafe { std::slice::from_raw_parts(written.as_ptr(), 64) };
    assert!(intact.iter().all(|&b| b == 0x5A));

    frame.begin_cycle();
    let recycled = frame.allocate(64, 16).unwrap();
    assert_eq!(recycled, written);
}

#[test]
fn test_pool_second_chunk_then_reuse() {
    let pool = FixedPool::new(24, 2).unwrap();

    let first = pool.allocate().unwrap();
    let second = pool.allocate().unwrap();
    assert_eq!(pool.chunk_count(), 1);
    let third = pool.allocate().unwrap();
    assert_eq!(pool.chunk_count(), 2);

    unsafe {
        pool.deallocate(first);
        pool.deallocate(second);
        pool.deallocate(third);
    }

    let again: Vec<_> = (0..3).map(|_| pool.allocate().unwrap()).collect();
    assert_eq!(pool.chunk_count(), 2);
    for slot in again {
        unsafe { pool.deallocate(slot) };
    }
    assert_eq!(pool.in_use(), 0);
}

#[test]
fn test_pool_concurrent_slots_are_unique() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 500;

    let pool = Arc::new(FixedPool::new(32, 16).unwrap());
    let live = Arc::new(Mutex::new(HashSet::new()));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let pool = Arc::clone(&pool);
            let live = Arc::clone(&live);
            thread::spawn(move || {
                let mut held = Vec::new();
                for round in 0..ROUNDS {
                    let slot = pool.allocate().unwrap();
                    let address = slot.as_ptr() as usize;
                    assert!(live.lock().insert(address), "slot handed out twice");
                    unsafe { slot.as_ptr().cast::<u64>().write((t * ROUNDS + round) as u64) };
                    held.push(address);

                    if round % 3 == 2 {
                        for address in held.drain(..) {
                            assert!(live.lock().remove(&address));
                            let slot = std::ptr::NonNull::new(address as *mut u8).unwrap();
                            unsafe { pool.deallocate(slot) };
                        }
                    }
                    assert!(pool.in_use() <= pool.capacity());
                }
                for address in held {
                    assert!(live.lock().remove(&address));
                    let slot = std::ptr::NonNull::new(address as *mut u8).unwrap();
                    unsafe { pool.deallocate(slot) };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(pool.in_use(), 0);
    assert!(live.lock().is_empty());
    // Each thread holds at most 3 slots at once.
    assert!(pool.capacity() <= (THREADS * 3).div_ceil(16) * 16 + 16);
}

#[test]
fn test_tracking_reports_exactly_the_unfreed() {
    let tracker = TrackingAllocator::new();
    let scalar = Layout::from_size_align(12, 4).unwrap();
    let array = Layout::from_size_align(96, 16).unwrap();

    let a = tracker
        .allocate_at(scalar, AllocShape::Scalar, SourceLocation::new("renderer.rs", 42))
        .unwrap();
    let b = tracker
        .allocate_at(array, AllocShape::Array, SourceLocation::new("logger.rs", 7))
        .unwrap();
    let c = tracker
        .allocate_at(scalar, AllocShape::Scalar, SourceLocation::new("renderer.rs", 43))
        .unwrap();

    unsafe { tracker.free(c.as_ptr(), scalar, AllocShape::Scalar).unwrap() };

    let report = tracker.report_leaks();
    let leaked: Vec<_> = report.leaks.iter().map(|&(address, record)| (address, record.location)).collect();
    assert_eq!(leaked.len(), 2);
    assert!(leaked.contains(&(a.as_ptr() as usize, SourceLocation::new("renderer.rs", 42))));
    assert!(leaked.contains(&(b.as_ptr() as usize, SourceLocation::new("logger.rs", 7))));
    assert_eq!(report.total_bytes, 108);
    assert_eq!(report.peak_bytes, 120);
    assert!(report.to_string().contains("logger.rs:7 (array)"));

    unsafe {
        tracker.free(a.as_ptr(), scalar, AllocShape::Scalar).unwrap();
        tracker.free(b.as_ptr(), array, AllocShape::Array).unwrap();
    }
    assert_eq!(tracker.live_count(), 0);
    assert!(tracker.report_leaks().is_clean());
}

#[test]
fn test_tracking_concurrent_balance() {
    let tracker = Arc::new(TrackingAllocator::new());
    let layout = Layout::from_size_align(64, 8).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                for _ in 0..200 {
                    let block = tracker.allocate(layout, AllocShape::Array).unwrap();
                    let snapshot = tracker.leak_report();
                    assert!(snapshot.peak_bytes >= snapshot.total_bytes);
                    unsafe { tracker.free(block.as_ptr(), layout, AllocShape::Array).unwrap() };
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(tracker.live_count(), 0);
    assert_eq!(tracker.total_bytes(), 0);
    assert!(tracker.peak_bytes() >= 64);
}

#[test]
fn test_arena_backed_by_tracker_leaves_no_leaks() {
    let tracker = TrackingAllocator::new();
    {
        let mut arena = LinearArena::with_allocator(32, &tracker).unwrap();
        let _ = arena.allocate(100, 8).unwrap();
        assert_eq!(tracker.live_count(), 1);
        assert!(tracker.total_bytes() >= 100);
    }
    assert!(tracker.leak_report().is_clean());
}

#[test]
fn test_tracker_backed_arena_reports_requesting_code() {
    let tracker = TrackingAllocator::new();
    let created_at = line!() + 1;
    let mut arena = LinearArena::with_allocator(16, &tracker).unwrap();

    let report = tracker.leak_report();
    assert_eq!(report.leaks.len(), 1);
    assert_eq!(report.leaks[0].1.location.line, created_at);
    assert!(report.leaks[0].1.location.file.ends_with("allocator_scenarios.rs"));

    let grown_at = line!() + 1;
    let _ = arena.allocate(100, 8).unwrap();
    let report = tracker.leak_report();
    assert_eq!(report.leaks.len(), 1);
    assert_eq!(report.leaks[0].1.location.line, grown_at);
    assert!(report.leaks[0].1.location.file.ends_with("allocator_scenarios.rs"));

    drop(arena);
    assert!(tracker.leak_report().is_clean());
}

#[test]
fn test_allocators_from_config() {
    let config = MemoryConfig::from_toml_str(
        "arena_initial_capacity = 128\nframe_buffer_size = 64\npool_slots_per_chunk = 4\n",
    )
    .unwrap();

    let arena = LinearArena::from_config(&config).unwrap();
    assert_eq!(arena.capacity(), 128);

    let frame = FrameArena::from_config(&config).unwrap();
    assert_eq!(frame.buffer_size(), 64);

    let pool = FixedPool::from_config(24, &config).unwrap();
    assert_eq!(pool.capacity(), 4);
}
