//! # Arena Allocator
//!
//! A bump allocator for temporary allocations that are freed all at once.

// SAFETY: This module owns and resizes a raw byte buffer.
// Every unsafe block documents the invariant it relies on.
#![allow(unsafe_code)]

use std::alloc::Layout;
use std::marker::PhantomData;
use std::ptr::NonNull;

use super::align_up;
use super::raw::{RawAllocator, SystemAllocator};
use crate::config::{MemoryConfig, DEFAULT_ARENA_ALIGNMENT};
use crate::error::{MemoryError, MemoryResult};

/// Alignment of an owned arena's backing buffer.
///
/// Requests up to this alignment keep the same padding when growth moves
/// the buffer.
const BUFFER_ALIGN: usize = 16;

/// Where the arena's bytes come from.
enum Backing<'buf, A> {
    /// Heap buffer the arena may grow and must free.
    Owned { allocator: A },
    /// Caller storage; fixed capacity, never freed here.
    Borrowed(PhantomData<&'buf mut [u8]>),
}

/// A bump-pointer arena allocator.
///
/// Allocations are fast (just bump a pointer). Memory is freed all at once
/// when the arena is reset or dropped.
///
/// # Growth and pointer stability
///
/// An owned arena grows by reallocating its buffer, which may move it. Every
/// pointer previously returned by the arena is invalidated by an allocation
/// that grows it. Allocate a batch, use it, and treat all earlier pointers as
/// dead after any allocation that could have grown the arena.
///
/// # Thread Safety
///
/// This arena is NOT thread-safe. Use one arena per thread.
///
/// # Example
///
/// ```rust,ignore
/// use rancage_memory::LinearArena;
///
/// let mut arena = LinearArena::new(1024).unwrap();
/// let block = arena.allocate(64, 16).unwrap();
/// assert_eq!(block.as_ptr() as usize % 16, 0);
///
/// arena.reset();
/// assert_eq!(arena.size(), 0);
/// ```
pub struct LinearArena<'buf, A: RawAllocator = SystemAllocator> {
    /// Start of the addressable range.
    head: NonNull<u8>,
    /// Offset of the next free byte from `head`.
    tail: usize,
    /// Bytes addressable from `head`.
    capacity: usize,
    /// Alignment used by [`LinearArena::allocate_bytes`].
    default_alignment: usize,
    backing: Backing<'buf, A>,
}

impl LinearArena<'static, SystemAllocator> {
    /// Creates an owned, growable arena on the system heap.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfSpace`] if the initial buffer cannot be
    /// allocated.
    pub fn new(initial_capacity: usize) -> MemoryResult<Self> {
        Self::with_allocator(initial_capacity, SystemAllocator)
    }

    /// Creates an owned arena sized and aligned from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] if the config is invalid, or
    /// [`MemoryError::OutOfSpace`] if the buffer cannot be allocated.
    pub fn from_config(config: &MemoryConfig) -> MemoryResult<Self> {
        config.validate()?;
        let mut arena = Self::new(config.arena_initial_capacity)?;
        arena.default_alignment = config.arena_alignment;
        Ok(arena)
    }
}

impl<'buf> LinearArena<'buf, SystemAllocator> {
    /// Wraps caller-supplied storage.
    ///
    /// The arena never grows past `buffer.len()` and never frees the buffer.
    #[must_use]
    pub fn from_buffer(buffer: &'buf mut [u8]) -> Self {
        let capacity = buffer.len();
        let head = NonNull::new(buffer.as_mut_ptr()).unwrap_or(NonNull::dangling());
        Self {
            head,
            tail: 0,
            capacity,
            default_alignment: DEFAULT_ARENA_ALIGNMENT,
            backing: Backing::Borrowed(PhantomData),
        }
    }
}

impl<A: RawAllocator> LinearArena<'static, A> {
    /// Creates an owned arena whose buffer comes from `allocator`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfSpace`] if the allocator refuses the
    /// initial buffer.
    #[track_caller]
    pub fn with_allocator(initial_capacity: usize, allocator: A) -> MemoryResult<Self> {
        let layout = Layout::from_size_align(initial_capacity, BUFFER_ALIGN)
            .map_err(|_| MemoryError::out_of_space(initial_capacity, 0))?;
        let head = allocator
            .allocate(layout)
            .ok_or_else(|| MemoryError::out_of_space(initial_capacity, 0))?;
        Ok(Self {
            head,
            tail: 0,
            capacity: initial_capacity,
            default_alignment: DEFAULT_ARENA_ALIGNMENT,
            backing: Backing::Owned { allocator },
        })
    }
}

impl<'buf, A: RawAllocator> LinearArena<'buf, A> {
    /// Returns the bytes currently allocated, padding included.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.tail
    }

    /// Returns the total addressable bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the bytes left before the arena must grow or fail.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.capacity - self.tail
    }

    /// Returns whether the arena owns (and may grow) its buffer.
    #[inline]
    #[must_use]
    pub const fn is_owned(&self) -> bool {
        matches!(self.backing, Backing::Owned { .. })
    }

    /// Allocates `size` bytes aligned to `alignment`.
    ///
    /// `alignment` must be a power of two; anything else is a caller error
    /// and is not checked in release builds.
    ///
    /// If the request does not fit, an owned arena grows to
    /// `max(2 * capacity, bytes required)`. This may move the buffer and
    /// invalidate every pointer handed out so far. For alignments above 16
    /// the bytes required include `alignment - 1` of worst-case padding.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfSpace`] if the arena is borrowed and full,
    /// or if growth is refused. The arena is unchanged in that case.
    #[track_caller]
    pub fn allocate(&mut self, size: usize, alignment: usize) -> MemoryResult<NonNull<u8>> {
        debug_assert!(alignment.is_power_of_two(), "alignment must be a power of two");

        let mut offset = self.aligned_offset(alignment)?;
        let mut required = offset
            .checked_add(size)
            .ok_or_else(|| MemoryError::out_of_space(size, self.remaining()))?;

        if required > self.capacity {
            if alignment > BUFFER_ALIGN && self.is_owned() {
                // Growth may move the buffer and change the padding; reserve
                // the worst case so one growth always suffices.
                required = self
                    .tail
                    .checked_add(alignment - 1)
                    .and_then(|bytes| bytes.checked_add(size))
                    .ok_or_else(|| MemoryError::out_of_space(size, self.remaining()))?;
            }
            self.grow(required)?;
            offset = self.aligned_offset(alignment)?;
            required = offset + size;
            debug_assert!(required <= self.capacity);
        }

        self.tail = required;
        // SAFETY: offset <= required <= capacity, so the pointer stays
        // inside (or one past) the buffer.
        Ok(unsafe { NonNull::new_unchecked(self.head.as_ptr().add(offset)) })
    }

    /// Allocates `size` bytes with the arena's default alignment (8 unless
    /// configured otherwise).
    ///
    /// # Errors
    ///
    /// See [`LinearArena::allocate`].
    #[inline]
    #[track_caller]
    pub fn allocate_bytes(&mut self, size: usize) -> MemoryResult<NonNull<u8>> {
        self.allocate(size, self.default_alignment)
    }

    /// Allocates storage for `layout`.
    ///
    /// # Errors
    ///
    /// See [`LinearArena::allocate`].
    #[inline]
    #[track_caller]
    pub fn allocate_layout(&mut self, layout: Layout) -> MemoryResult<NonNull<u8>> {
        self.allocate(layout.size(), layout.align())
    }

    /// Resets the arena, invalidating all previous allocations.
    ///
    /// Capacity is kept and memory is not zeroed.
    #[inline]
    pub fn reset(&mut self) {
        self.tail = 0;
    }

    /// Offset from `head` of the first `alignment`-aligned address at or
    /// after the tail.
    #[inline]
    fn aligned_offset(&self, alignment: usize) -> MemoryResult<usize> {
        let base = self.head.as_ptr() as usize;
        let current = base + self.tail;
        align_up(current, alignment)
            .map(|aligned| aligned - base)
            .ok_or_else(|| MemoryError::out_of_space(alignment, self.remaining()))
    }

    /// Grows an owned buffer so at least `required` bytes are addressable.
    #[track_caller]
    fn grow(&mut self, required: usize) -> MemoryResult<()> {
        let Backing::Owned { allocator } = &self.backing else {
            return Err(MemoryError::out_of_space(required - self.tail, self.remaining()));
        };

        let new_capacity = self.capacity.saturating_mul(2).max(required);
        let old_layout = Layout::from_size_align(self.capacity, BUFFER_ALIGN)
            .map_err(|_| MemoryError::out_of_space(required, self.remaining()))?;
        if Layout::from_size_align(new_capacity, BUFFER_ALIGN).is_err() {
            return Err(MemoryError::out_of_space(required, self.remaining()));
        }

        // SAFETY: head was allocated by this allocator with old_layout, and
        // new_capacity forms a valid layout (checked above).
        let new_head = unsafe { allocator.reallocate(self.head, old_layout, new_capacity) }
            .ok_or_else(|| MemoryError::out_of_space(required, self.remaining()))?;

        tracing::debug!(
            old_capacity = self.capacity,
            new_capacity,
            moved = new_head != self.head,
            "linear arena grew"
        );
        self.head = new_head;
        self.capacity = new_capacity;
        Ok(())
    }
}

impl<'buf, A: RawAllocator> Drop for LinearArena<'buf, A> {
    fn drop(&mut self) {
        if let Backing::Owned { allocator } = &self.backing {
            if let Ok(layout) = Layout::from_size_align(self.capacity, BUFFER_ALIGN) {
                // SAFETY: head is the live buffer allocated with this layout.
                unsafe { allocator.deallocate(self.head, layout) };
            }
        }
    }
}

impl<'buf, A: RawAllocator> std::fmt::Debug for LinearArena<'buf, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinearArena")
            .field("size", &self.tail)
            .field("capacity", &self.capacity)
            .field("owned", &self.is_owned())
            .finish()
    }
}
