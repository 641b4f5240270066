//! Control-block reference counting for Rust.
//!
//! `cbrc` provides [`SharedPtr<T>`], a shared-ownership pointer whose
//! bookkeeping lives in an explicit control block, and [`WeakPtr<T>`], an
//! observer that can be promoted back to ownership while the pointee lives.
//!
//! # Features
//!
//! - **Two block shapes**: [`SharedPtr::new`] places the pointee inside the
//!   block (one allocation); [`SharedPtr::from_box`] and
//!   [`SharedPtr::from_raw_with`] adopt an existing pointee and dispose of it
//!   through a [`Deleter`]
//! - **Pluggable allocators**: every factory has an `_in` form taking an
//!   [`Allocator`]; the block returns its memory to that allocator
//! - **Fallible construction**: `try_` factories report [`AllocError`]
//!   instead of aborting
//! - **Conversions**: [`SharedPtr::upcast`] to trait objects or embedded
//!   bases (see [`upcast!`]) and [`SharedPtr::map`] projections share the
//!   source block
//!
//! # Quick Start
//!
//! ```
//! use cbrc::{make_shared, SharedPtr, WeakPtr};
//!
//! let a = make_shared(vec![1, 2, 3]);
//! let b = SharedPtr::clone(&a);
//! assert_eq!(SharedPtr::use_count(&a), 2);
//!
//! let weak: WeakPtr<Vec<i32>> = SharedPtr::downgrade(&a);
//! drop(a);
//! assert_eq!(weak.lock().len(), 3);
//!
//! drop(b);
//! assert!(weak.expired());
//! ```
//!
//! # Custom Deleters
//!
//! ```
//! use std::ptr::NonNull;
//! use cbrc::SharedPtr;
//!
//! let raw = NonNull::from(Box::leak(Box::new(7_u32)));
//! // SAFETY: raw is a leaked box that nothing else owns.
//! let p = unsafe {
//!     SharedPtr::from_raw_with(raw, |ptr: NonNull<u32>| {
//!         drop(Box::from_raw(ptr.as_ptr()));
//!     })
//! };
//! assert_eq!(*p, 7);
//! ```
//!
//! # Thread Safety
//!
//! `SharedPtr<T>` and `WeakPtr<T>` are `!Send` and `!Sync`. Counts are plain
//! cells and every handle must stay on the thread that created its block.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

/// Allocators for control blocks.
pub mod alloc;
mod block;
mod deleter;
mod metrics;
mod strong;
mod tracing;
mod upcast;
mod weak;

// Re-export public API
pub use alloc::{allocate_value, AllocError, Allocator, Global, PagePool, PoolOptions, SIZE_CLASSES};
pub use block::BlockKind;
pub use deleter::{AllocDelete, DefaultDelete, Deleter};
pub use metrics::{AllocMetrics, Tracked};
pub use strong::SharedPtr;
pub use upcast::Upcast;
pub use weak::WeakPtr;

/// Creates a [`SharedPtr`] holding `value` in a single allocation.
///
/// Equivalent to [`SharedPtr::new`].
pub fn make_shared<T>(value: T) -> SharedPtr<T> {
    SharedPtr::new(value)
}

/// Creates a [`SharedPtr`] holding `value` in a single allocation obtained
/// from `alloc`.
///
/// Equivalent to [`SharedPtr::new_in`].
pub fn allocate_shared<T, A: Allocator + 'static>(alloc: A, value: T) -> SharedPtr<T> {
    SharedPtr::new_in(value, alloc)
}

/// Fallible form of [`allocate_shared`].
///
/// # Errors
///
/// Returns [`AllocError`] if `alloc` cannot provide the block.
pub fn try_allocate_shared<T, A: Allocator + 'static>(
    alloc: A,
    value: T,
) -> Result<SharedPtr<T>, AllocError> {
    SharedPtr::try_new_in(value, alloc)
}
