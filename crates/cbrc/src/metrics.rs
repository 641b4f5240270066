//! Allocation metrics.
//!
//! [`Tracked`] wraps any [`Allocator`] and records every request that passes
//! through it. Clones share one set of counters, so the allocator stored
//! inside a control block keeps reporting into the metrics of the handle the
//! caller kept.

use std::alloc::Layout;
use std::cell::Cell;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::alloc::{AllocError, Allocator, Global};

/// A snapshot of the counters of a [`Tracked`] allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocMetrics {
    /// Successful allocations.
    pub allocations: usize,
    /// Deallocations.
    pub deallocations: usize,
    /// Allocation requests the inner allocator refused.
    pub failed_allocations: usize,
    /// Total bytes handed out over the allocator's lifetime.
    pub bytes_allocated: usize,
    /// Bytes currently handed out and not yet returned.
    pub bytes_live: usize,
}

impl AllocMetrics {
    /// Create a new `AllocMetrics` with all counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            allocations: 0,
            deallocations: 0,
            failed_allocations: 0,
            bytes_allocated: 0,
            bytes_live: 0,
        }
    }

    /// Allocations that have not been returned yet.
    #[must_use]
    pub const fn live_allocations(&self) -> usize {
        self.allocations - self.deallocations
    }
}

#[derive(Default)]
struct Counters {
    allocations: Cell<usize>,
    deallocations: Cell<usize>,
    failed_allocations: Cell<usize>,
    bytes_allocated: Cell<usize>,
    bytes_live: Cell<usize>,
}

impl Counters {
    fn bump(cell: &Cell<usize>, by: usize) {
        cell.set(cell.get() + by);
    }
}

/// An allocator wrapper that counts the traffic reaching `A`.
///
/// # Examples
///
/// ```
/// use cbrc::{SharedPtr, Tracked};
///
/// let alloc = Tracked::default();
/// let p = SharedPtr::new_in(String::from("hi"), alloc.clone());
/// assert_eq!(alloc.metrics().allocations, 1);
///
/// drop(p);
/// assert_eq!(alloc.metrics().deallocations, 1);
/// assert_eq!(alloc.metrics().bytes_live, 0);
/// ```
#[derive(Clone)]
pub struct Tracked<A = Global> {
    inner: A,
    counters: Rc<Counters>,
}

impl<A> Tracked<A> {
    /// Wraps `inner`, starting with all counters at zero.
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            counters: Rc::new(Counters::default()),
        }
    }

    /// Returns the current counters.
    #[must_use]
    pub fn metrics(&self) -> AllocMetrics {
        let c = &self.counters;
        AllocMetrics {
            allocations: c.allocations.get(),
            deallocations: c.deallocations.get(),
            failed_allocations: c.failed_allocations.get(),
            bytes_allocated: c.bytes_allocated.get(),
            bytes_live: c.bytes_live.get(),
        }
    }

    /// Returns the wrapped allocator.
    pub const fn inner(&self) -> &A {
        &self.inner
    }
}

impl Default for Tracked<Global> {
    fn default() -> Self {
        Self::new(Global)
    }
}

impl<A> std::fmt::Debug for Tracked<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Tracked").field(&self.metrics()).finish()
    }
}

// SAFETY: every call is forwarded unchanged to `A`.
unsafe impl<A: Allocator> Allocator for Tracked<A> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let c = &self.counters;
        match self.inner.allocate(layout) {
            Ok(ptr) => {
                Counters::bump(&c.allocations, 1);
                Counters::bump(&c.bytes_allocated, layout.size());
                Counters::bump(&c.bytes_live, layout.size());
                Ok(ptr)
            }
            Err(err) => {
                Counters::bump(&c.failed_allocations, 1);
                Err(err)
            }
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        let c = &self.counters;
        debug_assert!(
            c.deallocations.get() < c.allocations.get(),
            "more deallocations than allocations"
        );
        Counters::bump(&c.deallocations, 1);
        c.bytes_live.set(c.bytes_live.get() - layout.size());
        // SAFETY: guaranteed by the caller.
        unsafe { self.inner.deallocate(ptr, layout) };
    }
}
