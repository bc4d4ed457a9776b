//! # Global Heap Tracking
//!
//! A [`GlobalAlloc`] wrapper that records every ordinary heap allocation
//! (`Box`, `Vec`, `String`, ...) in a [`TrackingAllocator`]. Install it in
//! the binary:
//!
//! ```rust,ignore
//! use std::alloc::System;
//! use rancage_memory::TrackingGlobal;
//!
//! #[global_allocator]
//! static HEAP: TrackingGlobal = TrackingGlobal::new(System);
//!
//! fn main() {
//!     // ...
//!     HEAP.report_leaks();
//! }
//! ```
//!
//! Global allocations carry no caller information and are recorded as
//! scalar blocks at [`GLOBAL_SITE`].

// SAFETY: This module implements the process allocator.
// Every unsafe block documents the invariant it relies on.
#![allow(unsafe_code)]

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::OnceLock;

use super::tracking::{AllocShape, AllocationRecord, LeakReport, SourceLocation, TrackingAllocator};

/// Location recorded for allocations made through the global allocator.
pub const GLOBAL_SITE: SourceLocation = SourceLocation::new("<global heap>", 0);

thread_local! {
    /// Set while this thread is inside the tracker's bookkeeping.
    static IN_TRACKER: Cell<bool> = const { Cell::new(false) };
}

/// Marks this thread as inside the tracker. Returns `false` if it already
/// was (or its thread-locals are gone).
fn enter() -> bool {
    IN_TRACKER.try_with(|flag| !flag.replace(true)).unwrap_or(false)
}

fn leave() {
    let _ = IN_TRACKER.try_with(|flag| flag.set(false));
}

/// Runs `f` with this thread's heap traffic left unrecorded.
fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let entered = enter();
    let result = f();
    if entered {
        leave();
    }
    result
}

/// Process allocator that records live blocks.
///
/// The bookkeeping map itself lives on the heap; allocations made while a
/// thread is already updating it pass straight through unrecorded. Releases
/// of blocks the tracker never saw are forwarded without a diagnostic.
pub struct TrackingGlobal<A: GlobalAlloc = System> {
    inner: A,
    tracker: OnceLock<TrackingAllocator>,
}

impl<A: GlobalAlloc> TrackingGlobal<A> {
    /// Wraps `inner`.
    #[must_use]
    pub const fn new(inner: A) -> Self {
        Self {
            inner,
            tracker: OnceLock::new(),
        }
    }

    fn tracker(&self) -> &TrackingAllocator {
        self.tracker.get_or_init(TrackingAllocator::new)
    }

    /// Returns the record for a live block.
    #[must_use]
    pub fn record(&self, ptr: *const u8) -> Option<AllocationRecord> {
        untracked(|| self.tracker().record(ptr))
    }

    /// Returns the number of live blocks.
    #[must_use]
    pub fn live_count(&self) -> usize {
        untracked(|| self.tracker().live_count())
    }

    /// Returns the bytes currently live.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        untracked(|| self.tracker().total_bytes())
    }

    /// Returns the highest number of live bytes seen so far.
    #[must_use]
    pub fn peak_bytes(&self) -> usize {
        untracked(|| self.tracker().peak_bytes())
    }

    /// Takes a snapshot of every live block.
    #[must_use]
    pub fn leak_report(&self) -> LeakReport {
        untracked(|| self.tracker().leak_report())
    }

    /// Writes the leak report to stderr and returns it.
    pub fn report_leaks(&self) -> LeakReport {
        untracked(|| self.tracker().report_leaks())
    }
}

// SAFETY: every block comes from `inner` unchanged; bookkeeping never
// touches block contents.
unsafe impl<A: GlobalAlloc> GlobalAlloc for TrackingGlobal<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // SAFETY: forwarded contract.
        let ptr = unsafe { self.inner.alloc(layout) };
        if !ptr.is_null() && enter() {
            self.tracker()
                .track(ptr as usize, layout.size(), AllocShape::Scalar, GLOBAL_SITE);
            leave();
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // Forget the block before its address can be handed out again.
        if enter() {
            let _ = self.tracker().untrack(ptr as usize, AllocShape::Scalar);
            leave();
        }
        // SAFETY: forwarded contract.
        unsafe { self.inner.dealloc(ptr, layout) };
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let tracked = enter();
        if tracked {
            let _ = self.tracker().untrack(ptr as usize, AllocShape::Scalar);
            leave();
        }

        // SAFETY: forwarded contract.
        let new_ptr = unsafe { self.inner.realloc(ptr, layout, new_size) };
        if tracked && enter() {
            // On failure the old block is still live.
            let (address, size) = match NonNull::new(new_ptr) {
                Some(block) => (block.as_ptr() as usize, new_size),
                None => (ptr as usize, layout.size()),
            };
            self.tracker()
                .track(address, size, AllocShape::Scalar, GLOBAL_SITE);
            leave();
        }
        new_ptr
    }
}

impl<A: GlobalAlloc> std::fmt::Debug for TrackingGlobal<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingGlobal")
            .field("live", &self.live_count())
            .finish()
    }
}
