//! # Pool Allocator
//!
//! Fixed-size slot allocator for objects that are frequently allocated and
//! freed, shared between threads.
//!
//! ## Layout
//!
//! ```text
//! chunk 0: [slot][slot][slot]...   chunk 1: [slot][slot][slot]...
//!             │           ▲                    │
//!             └── next ───┘◄──── free head ────┘
//! ```
//!
//! A free slot stores the address of the next free slot in its first
//! `usize` (`0` terminates the list). An in-use slot belongs entirely to the
//! caller.

// SAFETY: This module threads a free list through raw chunk memory.
// Every unsafe block documents the invariant it relies on.
#![allow(unsafe_code)]

use std::alloc::Layout;
use std::mem;
use std::ptr::NonNull;

use parking_lot::Mutex;

use super::raw::{RawAllocator, SystemAllocator};
use crate::config::MemoryConfig;
use crate::error::{MemoryError, MemoryResult};

/// Free-list terminator.
const END_OF_LIST: usize = 0;

/// Mutable pool state, guarded by the pool's mutex.
struct PoolState {
    /// Every chunk ever allocated, in creation order.
    chunks: Vec<NonNull<u8>>,
    /// Address of the first free slot, or [`END_OF_LIST`].
    free_head: usize,
    /// Slots currently handed out.
    in_use: usize,
}

// SAFETY: the chunk pointers are owned heap blocks; all access to them goes
// through the pool's mutex.
unsafe impl Send for PoolState {}

/// A thread-safe pool of fixed-size slots.
///
/// Slots hold raw bytes; the pool never constructs or drops values in them.
/// When the free list runs dry a whole new chunk is allocated; chunks are
/// only released when the pool is dropped.
///
/// # Thread Safety
///
/// `allocate` and `deallocate` each hold the pool lock for their whole
/// duration, including chunk growth.
///
/// # Example
///
/// ```rust,ignore
/// use rancage_memory::FixedPool;
///
/// let pool = FixedPool::new(24, 64).unwrap();
/// let slot = pool.allocate().unwrap();
/// // SAFETY: `slot` came from this pool and is released once.
/// unsafe { pool.deallocate(slot) };
/// ```
pub struct FixedPool<A: RawAllocator = SystemAllocator> {
    /// Bytes per slot, a multiple of the pointer size.
    slot_size: usize,
    /// Slots per chunk.
    slots_per_chunk: usize,
    /// Layout of one chunk.
    chunk_layout: Layout,
    state: Mutex<PoolState>,
    allocator: A,
}

impl FixedPool<SystemAllocator> {
    /// Creates a pool of `element_size`-byte slots, `slots_per_chunk` per
    /// chunk, and allocates the first chunk.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] if `slots_per_chunk` is zero or
    /// a chunk would overflow the address space, and
    /// [`MemoryError::OutOfSpace`] if the first chunk cannot be allocated.
    pub fn new(element_size: usize, slots_per_chunk: usize) -> MemoryResult<Self> {
        Self::with_allocator(element_size, slots_per_chunk, SystemAllocator)
    }

    /// Creates a pool of `element_size`-byte slots sized from `config`.
    ///
    /// # Errors
    ///
    /// See [`FixedPool::new`].
    pub fn from_config(element_size: usize, config: &MemoryConfig) -> MemoryResult<Self> {
        config.validate()?;
        Self::new(element_size, config.pool_slots_per_chunk)
    }
}

impl<A: RawAllocator> FixedPool<A> {
    /// Creates a pool whose chunks come from `allocator`.
    ///
    /// # Errors
    ///
    /// See [`FixedPool::new`].
    #[track_caller]
    pub fn with_allocator(
        element_size: usize,
        slots_per_chunk: usize,
        allocator: A,
    ) -> MemoryResult<Self> {
        if slots_per_chunk == 0 {
            return Err(MemoryError::InvalidConfig(
                "pool chunk must hold at least one slot".to_string(),
            ));
        }

        let word = mem::size_of::<usize>();
        // Every slot must be able to hold the free-list link.
        let slot_size = element_size
            .max(word)
            .checked_next_multiple_of(word)
            .ok_or_else(|| MemoryError::InvalidConfig(format!("element size {element_size} too large")))?;
        let chunk_layout = slot_size
            .checked_mul(slots_per_chunk)
            .and_then(|bytes| Layout::from_size_align(bytes, mem::align_of::<usize>()).ok())
            .ok_or_else(|| {
                MemoryError::InvalidConfig(format!(
                    "chunk of {slots_per_chunk} x {slot_size} bytes is too large"
                ))
            })?;

        let pool = Self {
            slot_size,
            slots_per_chunk,
            chunk_layout,
            state: Mutex::new(PoolState {
                chunks: Vec::new(),
                free_head: END_OF_LIST,
                in_use: 0,
            }),
            allocator,
        };
        {
            let mut state = pool.state.lock();
            pool.grow(&mut state)?;
        }
        Ok(pool)
    }

    /// Returns the size of every slot (element size rounded up to pointer
    /// alignment).
    #[inline]
    #[must_use]
    pub const fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Returns the number of slots in each chunk.
    #[inline]
    #[must_use]
    pub const fn slots_per_chunk(&self) -> usize {
        self.slots_per_chunk
    }

    /// Returns the number of chunks allocated so far.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.state.lock().chunks.len()
    }

    /// Returns the total number of slots across all chunks.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.chunk_count() * self.slots_per_chunk
    }

    /// Returns the number of slots currently handed out.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.state.lock().in_use
    }

    /// Takes one slot off the free list.
    ///
    /// This is **O(1)** unless the free list is empty, in which case a new
    /// chunk is allocated and its slots are pushed first.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfSpace`] if a new chunk is needed and the
    /// underlying allocator refuses it.
    #[track_caller]
    pub fn allocate(&self) -> MemoryResult<NonNull<u8>> {
        let mut state = self.state.lock();
        if state.free_head == END_OF_LIST {
            self.grow(&mut state)?;
        }

        let slot = state.free_head as *mut u8;
        // SAFETY: free_head is the address of a free slot inside one of our
        // chunks; free slots hold the next link in their first word.
        state.free_head = unsafe { slot.cast::<usize>().read() };
        state.in_use += 1;
        // SAFETY: slot addresses are never zero (zero is the terminator).
        Ok(unsafe { NonNull::new_unchecked(slot) })
    }

    /// Returns a slot to the free list.
    ///
    /// # Safety
    ///
    /// `slot` must have been returned by [`FixedPool::allocate`] on this pool
    /// and not deallocated since. Anything else corrupts the free list; it is
    /// not detected.
    pub unsafe fn deallocate(&self, slot: NonNull<u8>) {
        let mut state = self.state.lock();
        // SAFETY: caller guarantees slot is one of our in-use slots, which
        // are word-aligned and at least a word long.
        unsafe { slot.as_ptr().cast::<usize>().write(state.free_head) };
        state.free_head = slot.as_ptr() as usize;
        debug_assert!(state.in_use > 0, "more slots released than allocated");
        state.in_use = state.in_use.saturating_sub(1);
    }

    /// Allocates a chunk and pushes its slots onto the free list.
    ///
    /// Slots are pushed back to front so they come out in address order.
    #[track_caller]
    fn grow(&self, state: &mut PoolState) -> MemoryResult<()> {
        let chunk = self
            .allocator
            .allocate(self.chunk_layout)
            .ok_or_else(|| MemoryError::out_of_space(self.chunk_layout.size(), 0))?;

        for index in (0..self.slots_per_chunk).rev() {
            // SAFETY: index * slot_size < chunk size, and every slot start is
            // word-aligned because slot_size is a multiple of the word size.
            unsafe {
                let slot = chunk.as_ptr().add(index * self.slot_size);
                slot.cast::<usize>().write(state.free_head);
                state.free_head = slot as usize;
            }
        }
        state.chunks.push(chunk);

        tracing::debug!(
            chunks = state.chunks.len(),
            slot_size = self.slot_size,
            slots_per_chunk = self.slots_per_chunk,
            "fixed pool grew"
        );
        Ok(())
    }
}

impl<A: RawAllocator> Drop for FixedPool<A> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for chunk in state.chunks.drain(..) {
            // SAFETY: every chunk was allocated with chunk_layout.
            unsafe { self.allocator.deallocate(chunk, self.chunk_layout) };
        }
    }
}

impl<A: RawAllocator> std::fmt::Debug for FixedPool<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FixedPool")
            .field("slot_size", &self.slot_size)
            .field("slots_per_chunk", &self.slots_per_chunk)
            .field("chunks", &state.chunks.len())
            .field("in_use", &state.in_use)
            .finish()
    }
}
