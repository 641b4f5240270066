//! Deleters: how a deleting control block disposes of its pointee.

use std::alloc::Layout;
use std::ptr::{self, NonNull};

use crate::alloc::Allocator;

/// Disposes of a pointee that was handed to a control block as a raw pointer.
///
/// The block calls [`delete`](Deleter::delete) exactly once, when the last
/// [`SharedPtr`](crate::SharedPtr) releases ownership. Any `FnOnce(NonNull<T>)`
/// closure is a deleter.
pub trait Deleter<T: ?Sized> {
    /// Destroys the pointee and releases its memory.
    ///
    /// # Safety
    ///
    /// `ptr` is the pointer the block was created with, the pointee is live,
    /// and nothing else will access it afterwards.
    unsafe fn delete(self, ptr: NonNull<T>);
}

impl<T: ?Sized, F: FnOnce(NonNull<T>)> Deleter<T> for F {
    unsafe fn delete(self, ptr: NonNull<T>) {
        self(ptr);
    }
}

/// The deleter used for pointers that came from `Box`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultDelete;

impl<T: ?Sized> Deleter<T> for DefaultDelete {
    unsafe fn delete(self, ptr: NonNull<T>) {
        // SAFETY: blocks built with DefaultDelete own a pointer from Box::into_raw.
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    }
}

/// Drops the pointee in place and returns its memory to an allocator.
///
/// The counterpart of [`allocate_value`](crate::allocate_value).
#[derive(Debug, Clone, Default)]
pub struct AllocDelete<A> {
    alloc: A,
}

impl<A> AllocDelete<A> {
    /// Creates a deleter that frees through `alloc`.
    pub const fn new(alloc: A) -> Self {
        Self { alloc }
    }
}

impl<T, A: Allocator> Deleter<T> for AllocDelete<A> {
    unsafe fn delete(self, ptr: NonNull<T>) {
        // SAFETY: the pointee is live and exclusively ours.
        unsafe { ptr::drop_in_place(ptr.as_ptr()) };
        let layout = Layout::new::<T>();
        if layout.size() != 0 {
            // SAFETY: the memory came from allocate_value with this allocator.
            unsafe { self.alloc.deallocate(ptr.cast::<u8>(), layout) };
        }
    }
}
