//! # Memory Management
//!
//! Special-purpose allocators for the engine's hot paths.
//!
//! ## Design Philosophy
//!
//! Every allocator hands out raw, untyped bytes. Constructing and dropping
//! typed values in that storage is the caller's job.
//!
//! | Allocator             | Frees            | Threads        |
//! |-----------------------|------------------|----------------|
//! | [`LinearArena`]       | all at once      | single owner   |
//! | [`FrameArena`]        | every 2nd cycle  | single owner   |
//! | [`FixedPool`]         | per slot         | shared (mutex) |
//! | [`TrackingAllocator`] | per allocation   | shared (mutex) |
//!
//! All of them draw their backing memory from a [`RawAllocator`], which is
//! also the seam where [`TrackingAllocator`] can be injected.
//!
//! With the `leak-tracking` feature, `TrackingGlobal` extends the same
//! bookkeeping to the process allocator.

mod arena;
mod frame;
#[cfg(feature = "leak-tracking")]
mod global;
mod pool;
mod raw;
mod tracking;

pub mod debug_heap;

pub use arena::LinearArena;
pub use frame::FrameArena;
#[cfg(feature = "leak-tracking")]
pub use global::{TrackingGlobal, GLOBAL_SITE};
pub use pool::FixedPool;
pub use raw::{RawAllocator, SystemAllocator};
pub use tracking::{AllocShape, AllocationRecord, LeakReport, SourceLocation, TrackingAllocator};

/// Rounds `addr` up to the next multiple of `align`.
///
/// `align` must be a power of two. Returns `None` if the result would
/// overflow the address space.
#[inline]
#[must_use]
pub const fn align_up(addr: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    match addr.checked_add(align - 1) {
        Some(bumped) => Some(bumped & !(align - 1)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), Some(0));
        assert_eq!(align_up(1, 8), Some(8));
        assert_eq!(align_up(8, 8), Some(8));
        assert_eq!(align_up(17, 16), Some(32));
        assert_eq!(align_up(33, 32), Some(64));
        assert_eq!(align_up(5, 1), Some(5));
    }

    #[test]
    fn test_align_up_overflow() {
        assert_eq!(align_up(usize::MAX, 16), None);
    }
}
