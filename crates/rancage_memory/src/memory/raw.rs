//! # Raw Allocator Seam
//!
//! The trait every allocator in this crate draws its backing memory from.
//! Swapping the implementation is how tracking gets injected.

// SAFETY: This module forwards to the system heap.
// Each unsafe block states the contract it relies on.
#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};

/// A source of raw heap memory.
///
/// # Safety
///
/// Implementors must return blocks that are valid for reads and writes of
/// `layout.size()` bytes, aligned to `layout.align()`, and that stay valid
/// until passed back to [`RawAllocator::deallocate`]. A zero-sized request
/// may return a dangling, well-aligned pointer that is never dereferenced.
pub unsafe trait RawAllocator {
    /// Allocates a block for `layout`, or `None` if the request is refused.
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Releases a block.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator for `layout` and not
    /// released since.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Resizes a block to `new_size` bytes, keeping `old_layout`'s alignment.
    ///
    /// On success the first `min(old, new)` bytes are preserved and `ptr` is
    /// no longer valid. On failure `ptr` is untouched.
    ///
    /// # Safety
    ///
    /// Same as [`RawAllocator::deallocate`]; `new_size` rounded up to the
    /// alignment must not overflow `isize`.
    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let new_layout = Layout::from_size_align(new_size, old_layout.align()).ok()?;
        let new_ptr = self.allocate(new_layout)?;
        // SAFETY: both blocks are live, distinct and at least this long.
        unsafe {
            ptr::copy_nonoverlapping(
                ptr.as_ptr(),
                new_ptr.as_ptr(),
                old_layout.size().min(new_size),
            );
            self.deallocate(ptr, old_layout);
        }
        Some(new_ptr)
    }
}

// SAFETY: forwards to the referenced allocator.
unsafe impl<A: RawAllocator + ?Sized> RawAllocator for &A {
    #[inline]
    #[track_caller]
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        (**self).allocate(layout)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: forwarded contract.
        unsafe { (**self).deallocate(ptr, layout) }
    }

    #[inline]
    #[track_caller]
    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        // SAFETY: forwarded contract.
        unsafe { (**self).reallocate(ptr, old_layout, new_size) }
    }
}

/// The process heap, via `std::alloc`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemAllocator;

/// Dangling pointer for zero-sized blocks.
#[inline]
fn dangling(layout: Layout) -> NonNull<u8> {
    // The alignment is non-zero, so this never yields null.
    NonNull::new(layout.align() as *mut u8).unwrap_or(NonNull::dangling())
}

// SAFETY: std::alloc upholds the trait contract for non-zero sizes;
// zero sizes never touch the heap.
unsafe impl RawAllocator for SystemAllocator {
    #[inline]
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            return Some(dangling(layout));
        }
        // SAFETY: non-zero size checked above.
        NonNull::new(unsafe { alloc::alloc(layout) })
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            // SAFETY: caller guarantees ptr came from `alloc` with `layout`.
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) }
        }
    }

    #[inline]
    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        if old_layout.size() == 0 || new_size == 0 {
            let new_layout = Layout::from_size_align(new_size, old_layout.align()).ok()?;
            let new_ptr = self.allocate(new_layout)?;
            // SAFETY: ptr is a live block of old_layout (possibly zero-sized).
            unsafe { self.deallocate(ptr, old_layout) };
            return Some(new_ptr);
        }
        // SAFETY: caller guarantees ptr/old_layout; sizes are non-zero.
        NonNull::new(unsafe { alloc::realloc(ptr.as_ptr(), old_layout, new_size) })
    }
}
