//! # Frame Allocator
//!
//! Double-buffered linear allocator for per-cycle transient data.
//!
//! ```text
//!   cycle N      cycle N+1    cycle N+2
//!  ┌────────┐   ┌────────┐   ┌────────┐
//!  │ buf 0  │   │ buf 1  │   │ buf 0  │  <- active, offset reset
//!  └────────┘   └────────┘   └────────┘
//!   written ──► still readable ──► overwritten
//! ```

// SAFETY: This module hands out pointers into two raw buffers.
// Every unsafe block documents the invariant it relies on.
#![allow(unsafe_code)]

use std::alloc::Layout;
use std::ptr::NonNull;

use super::align_up;
use super::raw::{RawAllocator, SystemAllocator};
use crate::config::{MemoryConfig, DEFAULT_FRAME_ALIGNMENT};
use crate::error::{MemoryError, MemoryResult};

/// Alignment of both backing buffers.
const BUFFER_ALIGN: usize = 16;

/// Double-buffered per-cycle arena.
///
/// Call [`FrameArena::begin_cycle`] once at the start of every cycle (for
/// example once per rendered frame), then allocate freely. Nothing is freed
/// individually.
///
/// # Pointer lifetime
///
/// A pointer returned during cycle N stays valid through cycle N+1 and
/// becomes invalid at the `begin_cycle` that starts cycle N+2, when its
/// buffer is reused. Holding it longer is undefined behavior; the arena
/// does not detect it.
///
/// # Thread Safety
///
/// NOT thread-safe. One frame arena per thread.
pub struct FrameArena<A: RawAllocator = SystemAllocator> {
    /// The two buffers.
    buffers: [NonNull<u8>; 2],
    /// Bump offset of each buffer.
    offsets: [usize; 2],
    /// Index of the buffer receiving allocations (0 or 1).
    active: usize,
    /// Size of each buffer in bytes.
    buffer_size: usize,
    /// Number of `begin_cycle` calls so far.
    cycle: u64,
    /// Alignment used by [`FrameArena::allocate_bytes`].
    default_alignment: usize,
    allocator: A,
}

impl FrameArena<SystemAllocator> {
    /// Creates a frame arena with two buffers of `buffer_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfSpace`] if either buffer cannot be
    /// allocated.
    pub fn new(buffer_size: usize) -> MemoryResult<Self> {
        Self::with_allocator(buffer_size, SystemAllocator)
    }

    /// Creates a frame arena sized and aligned from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] if the config is invalid, or
    /// [`MemoryError::OutOfSpace`] if the buffers cannot be allocated.
    pub fn from_config(config: &MemoryConfig) -> MemoryResult<Self> {
        config.validate()?;
        let mut frame = Self::new(config.frame_buffer_size)?;
        frame.default_alignment = config.frame_alignment;
        Ok(frame)
    }
}

impl<A: RawAllocator> FrameArena<A> {
    /// Creates a frame arena whose buffers come from `allocator`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfSpace`] if either buffer is refused.
    #[track_caller]
    pub fn with_allocator(buffer_size: usize, allocator: A) -> MemoryResult<Self> {
        let layout = Self::buffer_layout(buffer_size)?;
        let first = allocator
            .allocate(layout)
            .ok_or_else(|| MemoryError::out_of_space(buffer_size, 0))?;
        let Some(second) = allocator.allocate(layout) else {
            // SAFETY: `first` was just allocated with `layout`.
            unsafe { allocator.deallocate(first, layout) };
            return Err(MemoryError::out_of_space(buffer_size, 0));
        };

        Ok(Self {
            buffers: [first, second],
            offsets: [0, 0],
            active: 0,
            buffer_size,
            cycle: 0,
            default_alignment: DEFAULT_FRAME_ALIGNMENT,
            allocator,
        })
    }

    fn buffer_layout(buffer_size: usize) -> MemoryResult<Layout> {
        Layout::from_size_align(buffer_size, BUFFER_ALIGN)
            .map_err(|_| MemoryError::out_of_space(buffer_size, 0))
    }

    /// Starts a new cycle: swaps the active buffer and rewinds it.
    ///
    /// Everything allocated two cycles ago is dead after this call.
    #[inline]
    pub fn begin_cycle(&mut self) {
        self.active ^= 1;
        self.offsets[self.active] = 0;
        self.cycle = self.cycle.wrapping_add(1);
    }

    /// Allocates `size` bytes aligned to `alignment` from the active buffer.
    ///
    /// `alignment` must be a power of two (unchecked in release builds).
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfSpace`] if the padded request does not
    /// fit in what is left of the active buffer. There is no growth path.
    pub fn allocate(&mut self, size: usize, alignment: usize) -> MemoryResult<NonNull<u8>> {
        debug_assert!(alignment.is_power_of_two(), "alignment must be a power of two");

        let base = self.buffers[self.active].as_ptr() as usize;
        let offset = self.offsets[self.active];
        let buffer_size = self.buffer_size;
        let out_of_space = || MemoryError::out_of_space(size, buffer_size - offset);

        let aligned = align_up(base + offset, alignment).ok_or_else(out_of_space)?;
        let start = aligned - base;
        let end = start.checked_add(size).ok_or_else(out_of_space)?;
        if end > buffer_size {
            return Err(out_of_space());
        }

        self.offsets[self.active] = end;
        // SAFETY: start <= end <= buffer_size, inside the active buffer.
        Ok(unsafe { NonNull::new_unchecked(self.buffers[self.active].as_ptr().add(start)) })
    }

    /// Allocates `size` bytes with the default alignment (16 unless
    /// configured otherwise).
    ///
    /// # Errors
    ///
    /// See [`FrameArena::allocate`].
    #[inline]
    pub fn allocate_bytes(&mut self, size: usize) -> MemoryResult<NonNull<u8>> {
        self.allocate(size, self.default_alignment)
    }

    /// Returns the index (0 or 1) of the buffer receiving allocations.
    #[inline]
    #[must_use]
    pub const fn active_index(&self) -> usize {
        self.active
    }

    /// Returns how many cycles have begun.
    #[inline]
    #[must_use]
    pub const fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Returns the bytes used in the active buffer.
    #[inline]
    #[must_use]
    pub const fn used(&self) -> usize {
        self.offsets[self.active]
    }

    /// Returns the bytes left in the active buffer (before padding).
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer_size - self.offsets[self.active]
    }

    /// Returns the size of each buffer.
    #[inline]
    #[must_use]
    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

impl<A: RawAllocator> Drop for FrameArena<A> {
    fn drop(&mut self) {
        if let Ok(layout) = Self::buffer_layout(self.buffer_size) {
            for buffer in self.buffers {
                // SAFETY: both buffers were allocated with this layout.
                unsafe { self.allocator.deallocate(buffer, layout) };
            }
        }
    }
}

impl<A: RawAllocator> std::fmt::Debug for FrameArena<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameArena")
            .field("active", &self.active)
            .field("offsets", &self.offsets)
            .field("buffer_size", &self.buffer_size)
            .field("cycle", &self.cycle)
            .finish()
    }
}
