//! Property tests for the bump allocators.

use proptest::prelude::*;
use rancage_memory::{FrameArena, LinearArena};

/// Power-of-two alignments from 1 to 64.
fn alignment() -> impl Strategy<Value = usize> {
    (0u32..=6).prop_map(|shift| 1usize << shift)
}

fn requests() -> impl Strategy<Value = Vec<(usize, usize)>> {
    prop::collection::vec((0usize..96, alignment()), 1..32)
}

proptest! {
    #[test]
    fn arena_allocations_are_aligned_and_disjoint(requests in requests()) {
        // Large enough that nothing grows.
        let mut arena = LinearArena::new(32 * (96 + 64)).unwrap();
        // An empty byte-aligned request lands exactly on the head.
        let start = arena.allocate(0, 1).unwrap().as_ptr() as usize;
        let mut previous_end = start;

        for &(size, align) in &requests {
            let before = arena.size();
            let address = arena.allocate(size, align).unwrap().as_ptr() as usize;

            prop_assert_eq!(address % align, 0);
            prop_assert!(address >= previous_end);
            // Size grows by exactly the request plus its padding.
            let padding = address - (start + before);
            prop_assert!(padding < align);
            prop_assert_eq!(arena.size(), before + padding + size);
            previous_end = address + size;
        }
    }

    #[test]
    fn arena_reset_returns_first_address(requests in requests()) {
        let mut arena = LinearArena::new(32 * (96 + 64)).unwrap();
        let (size, align) = requests[0];
        let first = arena.allocate(size, align).unwrap();
        for &(size, align) in &requests[1..] {
            let _ = arena.allocate(size, align).unwrap();
        }

        arena.reset();
        prop_assert_eq!(arena.allocate(size, align).unwrap(), first);
    }

    #[test]
    fn borrowed_arena_never_grows(capacity in 0usize..256, size in 0usize..512) {
        let mut storage = vec![0u8; capacity];
        let mut arena = LinearArena::from_buffer(&mut storage);
        let result = arena.allocate(size, 1);
        prop_assert_eq!(result.is_ok(), size <= capacity);
        prop_assert_eq!(arena.capacity(), capacity);
    }

    #[test]
    fn frame_fill_is_bounded(buffer_size in 1usize..512, sizes in prop::collection::vec(0usize..64, 1..64)) {
        let mut frame = FrameArena::new(buffer_size).unwrap();
        frame.begin_cycle();
        for size in sizes {
            let before = frame.used();
            match frame.allocate(size, 1) {
                Ok(_) => prop_assert_eq!(frame.used(), before + size),
                Err(_) => {
                    prop_assert!(before + size > buffer_size);
                    prop_assert_eq!(frame.used(), before);
                }
            }
            prop_assert!(frame.used() <= buffer_size);
        }
    }
}
