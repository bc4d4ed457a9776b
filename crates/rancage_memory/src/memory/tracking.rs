//! # Tracking Allocator
//!
//! Records every live allocation with its size, call site and shape so that
//! leaks and scalar/array mismatches show up instead of failing silently.
//!
//! Meant for diagnostic builds. The overhead is a mutex and a hash map
//! insert per allocation.

// SAFETY: This module forwards raw blocks to the wrapped allocator.
// Every unsafe block documents the invariant it relies on.
#![allow(unsafe_code)]

use std::alloc::Layout;
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::panic::Location;
use std::ptr::{self, NonNull};

use parking_lot::Mutex;

use super::raw::{RawAllocator, SystemAllocator};
use crate::error::{MemoryError, MemoryResult};

/// Whether an allocation holds one object or an array of them.
///
/// The shape given at release must match the one given at allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AllocShape {
    /// A single object.
    Scalar,
    /// An array of objects.
    Array,
}

impl fmt::Display for AllocShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar => f.write_str("scalar"),
            Self::Array => f.write_str("array"),
        }
    }
}

/// Source position of an allocation call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    /// Source file.
    pub file: &'static str,
    /// Line within `file`.
    pub line: u32,
}

impl SourceLocation {
    /// Creates a location from explicit parts.
    #[must_use]
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }

    /// Returns the location of the caller (through any chain of
    /// `#[track_caller]` functions).
    #[track_caller]
    #[must_use]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self {
            file: location.file(),
            line: location.line(),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Metadata kept for one live allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocationRecord {
    /// Requested size in bytes.
    pub size: usize,
    /// Where the allocation was made.
    pub location: SourceLocation,
    /// Shape declared at allocation.
    pub shape: AllocShape,
}

#[derive(Default)]
struct TrackingState {
    /// Live allocations keyed by address.
    live: HashMap<usize, AllocationRecord>,
    /// Bytes currently live.
    total: usize,
    /// Highest `total` observed.
    peak: usize,
}

/// Layout actually requested from the wrapped allocator for `layout`.
fn block_layout(layout: Layout) -> Layout {
    Layout::from_size_align(layout.size().max(1), layout.align()).unwrap_or(layout)
}

/// Snapshot of the allocations still live at report time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeakReport {
    /// Live allocations, sorted by address.
    pub leaks: Vec<(usize, AllocationRecord)>,
    /// Bytes still live.
    pub total_bytes: usize,
    /// Peak live bytes over the allocator's lifetime.
    pub peak_bytes: usize,
}

impl LeakReport {
    /// Returns `true` if nothing leaked.
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.leaks.is_empty()
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.leaks.is_empty() {
            writeln!(f, "No memory leaks detected.")?;
        } else {
            writeln!(
                f,
                "Memory leaks detected: {} allocations still active!",
                self.leaks.len()
            )?;
            for (address, record) in &self.leaks {
                writeln!(
                    f,
                    "  Leak at {address:#x} | size={} bytes | location: {} ({})",
                    record.size, record.location, record.shape
                )?;
            }
        }
        write!(f, "Peak memory usage: {} bytes", self.peak_bytes)
    }
}

/// An allocator wrapper that records every live allocation.
///
/// Each allocation stores its size, call site and [`AllocShape`]. A release
/// with the wrong shape or of an address that was never recorded is
/// diagnosed but still forwarded, so diagnostics never block teardown.
///
/// # Thread Safety
///
/// All bookkeeping sits behind one mutex; the wrapped allocator is called
/// outside of it.
///
/// # Example
///
/// ```rust,ignore
/// use std::alloc::Layout;
/// use rancage_memory::{AllocShape, TrackingAllocator};
///
/// let tracker = TrackingAllocator::new();
/// let layout = Layout::from_size_align(32, 8).unwrap();
/// let ptr = tracker.allocate(layout, AllocShape::Array).unwrap();
/// assert_eq!(tracker.live_count(), 1);
///
/// // SAFETY: ptr came from this tracker with this layout.
/// unsafe { tracker.free(ptr.as_ptr(), layout, AllocShape::Array).unwrap() };
/// assert!(tracker.leak_report().is_clean());
/// ```
pub struct TrackingAllocator<A: RawAllocator = SystemAllocator> {
    inner: A,
    state: Mutex<TrackingState>,
}

impl TrackingAllocator<SystemAllocator> {
    /// Creates a tracker over the system heap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_allocator(SystemAllocator)
    }
}

impl Default for TrackingAllocator<SystemAllocator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: RawAllocator> TrackingAllocator<A> {
    /// Creates a tracker over `inner`.
    #[must_use]
    pub fn with_allocator(inner: A) -> Self {
        Self {
            inner,
            state: Mutex::new(TrackingState::default()),
        }
    }

    /// Allocates `layout` and records it against the caller's location.
    ///
    /// Returns `None` if the wrapped allocator refuses; nothing is recorded
    /// in that case.
    #[track_caller]
    #[must_use]
    pub fn allocate(&self, layout: Layout, shape: AllocShape) -> Option<NonNull<u8>> {
        self.allocate_at(layout, shape, SourceLocation::caller())
    }

    /// Allocates `layout` and records it against an explicit location.
    ///
    /// Zero-sized requests are backed by a one-byte block so that every live
    /// record has its own address; the record keeps the requested size.
    #[must_use]
    pub fn allocate_at(
        &self,
        layout: Layout,
        shape: AllocShape,
        location: SourceLocation,
    ) -> Option<NonNull<u8>> {
        let ptr = self.inner.allocate(block_layout(layout))?;
        self.track(ptr.as_ptr() as usize, layout.size(), shape, location);
        Some(ptr)
    }

    /// Releases `ptr` after checking it against the records.
    ///
    /// A null `ptr` is a no-op. Otherwise the block is always handed back to
    /// the wrapped allocator, even when a diagnostic is returned:
    ///
    /// - recorded with a different shape: the entry is removed and
    ///   [`MemoryError::ShapeMismatch`] is returned;
    /// - never recorded: [`MemoryError::UnknownRelease`] is returned.
    ///
    /// # Errors
    ///
    /// The diagnostics above. They are also logged.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a block obtained from the wrapped allocator with
    /// `layout` and not released since. Releasing an unknown pointer is
    /// forwarded as-is.
    pub unsafe fn free(&self, ptr: *mut u8, layout: Layout, shape: AllocShape) -> MemoryResult<()> {
        let Some(block) = NonNull::new(ptr) else {
            return Ok(());
        };

        let outcome = self.untrack(ptr as usize, shape);
        let release_layout = match &outcome {
            Ok(()) => block_layout(layout),
            Err(error @ MemoryError::ShapeMismatch { .. }) => {
                tracing::warn!(%error, "tracked release");
                block_layout(layout)
            }
            Err(error) => {
                tracing::error!(%error, "tracked release");
                layout
            }
        };

        // SAFETY: caller guarantees block/layout came from the wrapped
        // allocator; recorded blocks were allocated with block_layout.
        unsafe { self.inner.deallocate(block, release_layout) };
        outcome
    }

    /// Records a live block of `size` bytes at `address`.
    pub(crate) fn track(
        &self,
        address: usize,
        size: usize,
        shape: AllocShape,
        location: SourceLocation,
    ) {
        let record = AllocationRecord {
            size,
            location,
            shape,
        };

        let mut state = self.state.lock();
        if let Some(stale) = state.live.insert(address, record) {
            // Released without passing through the tracker.
            state.total -= stale.size;
        }
        state.total += size;
        state.peak = state.peak.max(state.total);
    }

    /// Removes the record for `address`, checking its shape.
    ///
    /// A mismatched record is still removed.
    pub(crate) fn untrack(&self, address: usize, shape: AllocShape) -> MemoryResult<()> {
        let mut state = self.state.lock();
        let Some(record) = state.live.remove(&address) else {
            return Err(MemoryError::UnknownRelease { address });
        };
        state.total -= record.size;
        if record.shape == shape {
            Ok(())
        } else {
            Err(MemoryError::ShapeMismatch {
                file: record.location.file,
                line: record.location.line,
                expected: record.shape,
                actual: shape,
            })
        }
    }

    /// Returns the record for a live address.
    #[must_use]
    pub fn record(&self, ptr: *const u8) -> Option<AllocationRecord> {
        self.state.lock().live.get(&(ptr as usize)).copied()
    }

    /// Returns the number of live allocations.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Returns the bytes currently live.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.state.lock().total
    }

    /// Returns the highest number of live bytes seen so far.
    #[must_use]
    pub fn peak_bytes(&self) -> usize {
        self.state.lock().peak
    }

    /// Takes a snapshot of every live allocation.
    #[must_use]
    pub fn leak_report(&self) -> LeakReport {
        let state = self.state.lock();
        let mut leaks: Vec<_> = state.live.iter().map(|(&a, &r)| (a, r)).collect();
        leaks.sort_unstable_by_key(|&(address, _)| address);
        LeakReport {
            leaks,
            total_bytes: state.total,
            peak_bytes: state.peak,
        }
    }

    /// Writes the leak report to stderr and returns it.
    ///
    /// Conventionally called once at shutdown.
    pub fn report_leaks(&self) -> LeakReport {
        let report = self.leak_report();
        if !report.is_clean() {
            tracing::warn!(
                leaks = report.leaks.len(),
                bytes = report.total_bytes,
                "memory leaks detected"
            );
        }
        let mut stderr = std::io::stderr().lock();
        // Nothing sensible to do if stderr is gone.
        let _ = writeln!(stderr, "{report}");
        report
    }
}

// SAFETY: blocks come from the wrapped allocator; zero-sized requests get a
// real one-byte block, which satisfies the contract as well.
unsafe impl<A: RawAllocator> RawAllocator for TrackingAllocator<A> {
    #[track_caller]
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        self.allocate_at(layout, AllocShape::Scalar, SourceLocation::caller())
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // Diagnostics are logged inside `free`.
        // SAFETY: forwarded contract.
        let _ = unsafe { self.free(ptr.as_ptr(), layout, AllocShape::Scalar) };
    }

    #[track_caller]
    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let new_layout = Layout::from_size_align(new_size, old_layout.align()).ok()?;
        let new_ptr = self.allocate_at(new_layout, AllocShape::Scalar, SourceLocation::caller())?;
        // SAFETY: both blocks are live, distinct and at least this long.
        unsafe {
            ptr::copy_nonoverlapping(
                ptr.as_ptr(),
                new_ptr.as_ptr(),
                old_layout.size().min(new_size),
            );
            let _ = self.free(ptr.as_ptr(), old_layout, AllocShape::Scalar);
        }
        Some(new_ptr)
    }
}

impl<A: RawAllocator> fmt::Debug for TrackingAllocator<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TrackingAllocator")
            .field("live", &state.live.len())
            .field("total", &state.total)
            .field("peak", &state.peak)
            .finish()
    }
}
