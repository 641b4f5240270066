//! Allocation strategies for control blocks.
//!
//! Every factory that takes an allocator stores it by value inside the
//! control block it allocated, and the block hands its own memory back to
//! that same allocator once both reference counts have reached zero.

use std::alloc::{alloc, dealloc, Layout};
use std::fmt;
use std::ptr::NonNull;

mod pool;

pub use pool::{PagePool, PoolOptions, SIZE_CLASSES};

/// The error returned when an allocator cannot satisfy a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocError;

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("memory allocation failed")
    }
}

impl std::error::Error for AllocError {}

/// A strategy for obtaining and releasing raw memory.
///
/// Control blocks are allocated through this trait. Callers never request
/// zero-sized layouts.
///
/// # Safety
///
/// A successful [`allocate`](Allocator::allocate) must return memory that is
/// valid for reads and writes of `layout.size()` bytes, aligned to
/// `layout.align()`, and not handed out again until it has been passed back
/// to [`deallocate`](Allocator::deallocate). Clones of an allocator must be
/// able to free each other's memory.
pub unsafe trait Allocator {
    /// Allocates a block of memory described by `layout`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the memory cannot be provided.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Returns memory obtained from [`allocate`](Allocator::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` on this allocator (or a
    /// clone of it) with the same `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The process-wide heap, through `std::alloc`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Global;

// SAFETY: forwards to the global allocator, which upholds the same contract.
unsafe impl Allocator for Global {
    #[inline]
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        debug_assert!(layout.size() != 0, "zero-sized allocation request");
        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc(layout) };
        NonNull::new(ptr).ok_or(AllocError)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: guaranteed by the caller.
        unsafe { dealloc(ptr.as_ptr(), layout) };
    }
}

/// Moves `value` into memory obtained from `alloc`.
///
/// This is the allocator-aware counterpart of `Box::new`, for callers that
/// want the pointee of a deleting block to come from the same strategy as
/// the block itself. Pair it with [`AllocDelete`](crate::AllocDelete).
/// Zero-sized values get a dangling, well-aligned pointer and no allocation.
///
/// # Errors
///
/// Returns [`AllocError`] (dropping `value`) if the allocation fails.
pub fn allocate_value<T, A: Allocator>(alloc: &A, value: T) -> Result<NonNull<T>, AllocError> {
    let layout = Layout::new::<T>();
    if layout.size() == 0 {
        std::mem::forget(value);
        return Ok(NonNull::dangling());
    }
    let ptr = alloc.allocate(layout)?.cast::<T>();
    // SAFETY: freshly allocated for exactly one T.
    unsafe { ptr.as_ptr().write(value) };
    Ok(ptr)
}
