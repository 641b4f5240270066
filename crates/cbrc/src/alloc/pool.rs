//! A size-class pool carved out of OS pages.
//!
//! Memory is reserved from the operating system in regions (see
//! [`sys_alloc::Region`]). Every request is rounded up to the smallest size
//! class that covers both its size and its alignment, then served from that
//! class's free list or, failing that, by bumping through the current region.
//! When a region cannot fit a request, its remaining tail is split into
//! smaller slots before a new region is reserved.
//! Freed slots go back on their class's free list and are reused; regions are
//! only returned to the OS when the last clone of the pool is dropped.

use std::alloc::Layout;
use std::cell::RefCell;
use std::fmt;
use std::ptr::NonNull;
use std::rc::Rc;

use sys_alloc::Region;

use super::{AllocError, Allocator};
use crate::tracing::internal as trace;

/// Slot sizes served by a [`PagePool`].
///
/// Requests larger than the last class (or aligned more strictly) fail.
pub const SIZE_CLASSES: [usize; 8] = [16, 32, 64, 128, 256, 512, 1024, 2048];

/// Default size of each region reserved from the OS.
const DEFAULT_REGION_SIZE: usize = 64 * 1024;

/// Configuration for a [`PagePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    region_size: usize,
    max_regions: Option<usize>,
}

impl PoolOptions {
    /// Creates options with a 64 KiB region size and no region limit.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            region_size: DEFAULT_REGION_SIZE,
            max_regions: None,
        }
    }

    /// Sets the size of each region reserved from the OS.
    ///
    /// Values smaller than the largest size class are raised to it; the OS
    /// rounds the final value up to whole pages.
    #[must_use]
    pub const fn region_size(mut self, bytes: usize) -> Self {
        self.region_size = bytes;
        self
    }

    /// Caps the number of regions the pool may reserve.
    ///
    /// Once the cap is reached and no freed slot fits, allocation fails with
    /// [`AllocError`]. The unused tail of a region is handed to the smaller
    /// size classes when the pool moves on to the next one.
    #[must_use]
    pub const fn max_regions(mut self, regions: usize) -> Self {
        self.max_regions = Some(regions);
        self
    }

    /// Builds a pool with these options. No memory is reserved until the
    /// first allocation.
    #[must_use]
    pub fn build(self) -> PagePool {
        PagePool::with_options(self)
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// A freed slot, threaded onto its size class's free list.
struct FreeSlot {
    next: Option<NonNull<FreeSlot>>,
}

struct PoolState {
    regions: Vec<Region>,
    /// Bump offset into the last region.
    offset: usize,
    free_lists: [Option<NonNull<FreeSlot>>; SIZE_CLASSES.len()],
    live_slots: usize,
}

struct PoolInner {
    options: PoolOptions,
    state: RefCell<PoolState>,
}

/// A single-threaded size-class allocator over OS pages.
///
/// `PagePool` is a cheap handle: clones share the same regions, so a clone
/// stored inside a control block keeps the pool alive until that block is
/// freed.
///
/// # Examples
///
/// ```
/// use cbrc::{PoolOptions, SharedPtr};
///
/// let pool = PoolOptions::new().max_regions(1).build();
/// let a = SharedPtr::new_in(7_u32, pool.clone());
/// assert_eq!(*a, 7);
/// assert_eq!(pool.live_slots(), 1);
///
/// drop(a);
/// assert_eq!(pool.live_slots(), 0);
/// ```
#[derive(Clone)]
pub struct PagePool {
    inner: Rc<PoolInner>,
}

impl PagePool {
    /// Creates a pool with default [`PoolOptions`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(PoolOptions::new())
    }

    /// Creates a pool with the given options.
    #[must_use]
    pub fn with_options(options: PoolOptions) -> Self {
        Self {
            inner: Rc::new(PoolInner {
                options,
                state: RefCell::new(PoolState {
                    regions: Vec::new(),
                    offset: 0,
                    free_lists: [None; SIZE_CLASSES.len()],
                    live_slots: 0,
                }),
            }),
        }
    }

    /// Returns a builder for pool options.
    #[must_use]
    pub const fn builder() -> PoolOptions {
        PoolOptions::new()
    }

    /// Number of slots currently handed out.
    #[must_use]
    pub fn live_slots(&self) -> usize {
        self.inner.state.borrow().live_slots
    }

    /// Number of regions reserved from the OS so far.
    #[must_use]
    pub fn regions(&self) -> usize {
        self.inner.state.borrow().regions.len()
    }

    /// Returns the index of the size class serving `layout`, if any.
    #[must_use]
    pub fn size_class(layout: Layout) -> Option<usize> {
        let need = layout.size().max(layout.align());
        SIZE_CLASSES.iter().position(|&class| class >= need)
    }

    fn region_len(&self) -> usize {
        self.inner
            .options
            .region_size
            .max(SIZE_CLASSES[SIZE_CLASSES.len() - 1])
    }
}

impl PoolState {
    /// Threads whatever is left of the current region onto the free lists,
    /// largest fitting class first, so moving to a new region wastes nothing.
    fn retire_tail(&mut self) {
        let Some((base, len)) = self.regions.last().map(|r| (r.as_ptr(), r.len())) else {
            return;
        };
        // Offsets stay multiples of the smallest class and regions are whole
        // pages, so the 16-byte class always fits until the tail is used up.
        let mut offset = self.offset;
        while let Some(class) = SIZE_CLASSES
            .iter()
            .rposition(|&size| offset % size == 0 && offset + size <= len)
        {
            // SAFETY: offset + size <= len, so the slot lies inside the region.
            let slot = unsafe { base.add(offset) }.cast::<FreeSlot>();
            // SAFETY: the slot was never handed out and is aligned to its class.
            unsafe {
                slot.as_ptr().write(FreeSlot {
                    next: self.free_lists[class],
                });
            }
            self.free_lists[class] = Some(slot);
            offset += SIZE_CLASSES[class];
        }
        self.offset = len;
    }

    /// Bumps a fresh `class_size` slot out of the current region, reserving a
    /// new region when the current one is exhausted.
    fn bump(
        &mut self,
        class_size: usize,
        options: &PoolOptions,
        region_len: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        // Class sizes are powers of two no larger than a page and regions are
        // page aligned, so rounding the offset aligns the address.
        let start = (self.offset + class_size - 1) & !(class_size - 1);
        let fits = self
            .regions
            .last()
            .is_some_and(|region| start + class_size <= region.len());

        if fits {
            self.offset = start + class_size;
            let region = &self.regions[self.regions.len() - 1];
            // SAFETY: start + class_size <= region.len(), checked above.
            return Ok(unsafe { region.as_ptr().add(start) });
        }

        if options.max_regions.is_some_and(|max| self.regions.len() >= max) {
            trace::alloc_failed(class_size, class_size, "page pool region limit reached");
            return Err(AllocError);
        }

        self.retire_tail();
        let region = Region::reserve(region_len).map_err(|_err| {
            trace::alloc_failed(region_len, class_size, "page pool region reservation failed");
            AllocError
        })?;
        trace::region_reserved(region.len(), self.regions.len() + 1);

        let ptr = region.as_ptr();
        self.regions.push(region);
        self.offset = class_size;
        Ok(ptr)
    }
}

// SAFETY: slots are carved from live regions that outlive every clone of the
// pool, are aligned to their class size (which covers the request alignment),
// and are only reissued after being returned through `deallocate`.
unsafe impl Allocator for PagePool {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let Some(class) = Self::size_class(layout) else {
            trace::alloc_failed(layout.size(), layout.align(), "no size class fits request");
            return Err(AllocError);
        };

        let mut state = self.inner.state.borrow_mut();
        let ptr = if let Some(slot) = state.free_lists[class] {
            // SAFETY: free-list entries are vacant slots holding a FreeSlot.
            state.free_lists[class] = unsafe { slot.as_ptr().read().next };
            slot.cast::<u8>()
        } else {
            let region_len = self.region_len();
            state.bump(SIZE_CLASSES[class], &self.inner.options, region_len)?
        };
        state.live_slots += 1;
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        let Some(class) = Self::size_class(layout) else {
            debug_assert!(false, "deallocate called with a layout no class serves");
            return;
        };

        let mut state = self.inner.state.borrow_mut();
        debug_assert!(
            state.regions.iter().any(|r| r.contains(ptr.as_ptr())),
            "pointer was not allocated by this pool"
        );

        let slot = ptr.cast::<FreeSlot>();
        // SAFETY: the slot is at least 16 bytes, aligned to its class size,
        // and no longer in use by the caller.
        unsafe {
            slot.as_ptr().write(FreeSlot {
                next: state.free_lists[class],
            });
        }
        state.free_lists[class] = Some(slot);
        state.live_slots -= 1;
    }
}

impl Default for PagePool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PagePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("PagePool")
            .field("options", &self.inner.options)
            .field("regions", &state.regions.len())
            .field("live_slots", &state.live_slots)
            .finish_non_exhaustive()
    }
}
