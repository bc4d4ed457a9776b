//! # Debug Heap
//!
//! The process-wide allocation entry point for engine subsystems.
//!
//! With the `leak-tracking` feature every call is routed through one shared
//! [`TrackingAllocator`](super::TrackingAllocator), created by [`init`] or on
//! first use. Without it the calls go straight to
//! [`SystemAllocator`](super::SystemAllocator) and nothing is recorded.
//!
//! Call [`report_leaks`] once at shutdown.
//!
//! Only calls made through this module are seen here. To also record
//! ordinary `Box`/`Vec` traffic, install `TrackingGlobal` as the
//! `#[global_allocator]`.
//!
//! ```rust,ignore
//! use std::alloc::Layout;
//! use rancage_memory::{debug_heap, AllocShape};
//!
//! let layout = Layout::from_size_align(64, 16).unwrap();
//! let block = debug_heap::allocate(layout, AllocShape::Array).unwrap();
//! // SAFETY: block came from the debug heap with this layout.
//! unsafe { debug_heap::free(block.as_ptr(), layout, AllocShape::Array).unwrap() };
//! ```

// SAFETY: This module forwards raw blocks to the process heap.
#![allow(unsafe_code)]

use std::alloc::Layout;
use std::ptr::NonNull;

use super::tracking::{AllocShape, LeakReport};
use crate::error::MemoryResult;

#[cfg(feature = "leak-tracking")]
use super::tracking::TrackingAllocator;
#[cfg(not(feature = "leak-tracking"))]
use super::raw::{RawAllocator, SystemAllocator};

/// Whether allocations are being tracked in this build.
pub const ENABLED: bool = cfg!(feature = "leak-tracking");

#[cfg(feature = "leak-tracking")]
static TRACKER: std::sync::OnceLock<TrackingAllocator> = std::sync::OnceLock::new();

/// Returns the process-wide tracker, creating it on first use.
#[cfg(feature = "leak-tracking")]
#[must_use]
pub fn tracker() -> &'static TrackingAllocator {
    TRACKER.get_or_init(|| {
        tracing::debug!("leak tracking enabled");
        TrackingAllocator::new()
    })
}

/// Creates the process-wide tracker now instead of on first allocation.
///
/// Idempotent. A no-op without `leak-tracking`.
#[inline]
pub fn init() {
    #[cfg(feature = "leak-tracking")]
    let _ = tracker();
}

/// Allocates `layout`, recording the caller's location and `shape` when
/// tracking is enabled.
///
/// Returns `None` if the heap refuses the request.
#[track_caller]
#[inline]
#[must_use]
pub fn allocate(layout: Layout, shape: AllocShape) -> Option<NonNull<u8>> {
    #[cfg(feature = "leak-tracking")]
    {
        tracker().allocate(layout, shape)
    }
    #[cfg(not(feature = "leak-tracking"))]
    {
        let _ = shape;
        SystemAllocator.allocate(layout)
    }
}

/// Releases a block obtained from [`allocate`].
///
/// A null `ptr` is a no-op.
///
/// # Errors
///
/// With tracking enabled, returns the shape-mismatch or unknown-pointer
/// diagnostic from [`TrackingAllocator::free`](super::TrackingAllocator::free).
/// The block is released either way.
///
/// # Safety
///
/// `ptr` must be null or a block returned by [`allocate`] with `layout` and
/// not released since.
#[inline]
pub unsafe fn free(ptr: *mut u8, layout: Layout, shape: AllocShape) -> MemoryResult<()> {
    #[cfg(feature = "leak-tracking")]
    {
        // SAFETY: forwarded contract.
        unsafe { tracker().free(ptr, layout, shape) }
    }
    #[cfg(not(feature = "leak-tracking"))]
    {
        let _ = shape;
        if let Some(block) = NonNull::new(ptr) {
            // SAFETY: forwarded contract.
            unsafe { SystemAllocator.deallocate(block, layout) };
        }
        Ok(())
    }
}

/// Writes the leak report to stderr and returns it.
///
/// Returns `None` when tracking is compiled out.
pub fn report_leaks() -> Option<LeakReport> {
    #[cfg(feature = "leak-tracking")]
    {
        Some(tracker().report_leaks())
    }
    #[cfg(not(feature = "leak-tracking"))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_free() {
        init();
        let layout = Layout::from_size_align(40, 8).unwrap();
        let block = allocate(layout, AllocShape::Scalar).unwrap();
        assert_eq!(block.as_ptr() as usize % 8, 0);
        assert!(unsafe { free(block.as_ptr(), layout, AllocShape::Scalar) }.is_ok());
        assert!(unsafe { free(std::ptr::null_mut(), layout, AllocShape::Scalar) }.is_ok());
    }

    #[cfg(feature = "leak-tracking")]
    #[test]
    fn test_tracking_routes_through_tracker() {
        assert!(ENABLED);
        let layout = Layout::from_size_align(24, 8).unwrap();
        let block = allocate(layout, AllocShape::Array).unwrap();
        let record = tracker().record(block.as_ptr()).unwrap();
        assert_eq!(record.shape, AllocShape::Array);
        assert!(record.location.file.ends_with("debug_heap.rs"));

        let err = unsafe { free(block.as_ptr(), layout, AllocShape::Scalar) }.unwrap_err();
        assert!(matches!(err, crate::MemoryError::ShapeMismatch { .. }));
        assert!(tracker().record(block.as_ptr()).is_none());
        assert!(report_leaks().is_some());
    }

    #[cfg(not(feature = "leak-tracking"))]
    #[test]
    fn test_disabled_has_no_report() {
        assert!(!ENABLED);
        assert!(report_leaks().is_none());
    }
}
