//! Control blocks.
//!
//! Every block starts with a [`BlockHeader`]: the strong and weak counts plus
//! a static table of three type-erased operations. The two concrete shapes
//! are
//!
//! - [`DeletingBlock`]: owns a raw pointer to a separately allocated pointee
//!   and a [`Deleter`] that disposes of it;
//! - [`InlineBlock`]: stores the pointee inside the block itself, so the
//!   pointee and its metadata share one allocation.
//!
//! Handles only ever see `NonNull<BlockHeader>`. All operations work on raw
//! pointers so that no reference into a block is alive when the block frees
//! its own storage.

#![allow(clippy::ptr_as_ptr)]

use std::alloc::Layout;
use std::cell::Cell;
use std::mem::{self, ManuallyDrop, MaybeUninit};
use std::ptr::{self, NonNull};

use crate::alloc::{AllocError, Allocator};
use crate::deleter::Deleter;
use crate::tracing::internal as trace;

// ============================================================================
// BlockHeader - counts and dispatch
// ============================================================================

/// Which concrete block a header belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// The pointee lives in its own allocation and is released by a deleter.
    Deleting,
    /// The pointee lives inside the control block's allocation.
    Inline,
}

/// Type-erased operations of a concrete block.
pub(crate) struct BlockVTable {
    /// Destroys the pointee. Runs once, when the strong count reaches zero.
    destroy_pointee: unsafe fn(NonNull<BlockHeader>),
    /// Frees the block. Runs once, after both counts have reached zero.
    destroy_block: unsafe fn(NonNull<BlockHeader>),
    /// Address of the live pointee.
    address: unsafe fn(NonNull<BlockHeader>) -> NonNull<u8>,
    kind: BlockKind,
}

/// The prefix shared by every control block.
#[repr(C)]
pub(crate) struct BlockHeader {
    strong: Cell<usize>,
    weak: Cell<usize>,
    vtable: &'static BlockVTable,
}

impl BlockHeader {
    /// A fresh header: one strong owner, no observers.
    const fn new(vtable: &'static BlockVTable) -> Self {
        Self {
            strong: Cell::new(1),
            weak: Cell::new(0),
            vtable,
        }
    }

    /// Number of strong handles.
    #[inline]
    pub(crate) fn strong(&self) -> usize {
        self.strong.get()
    }

    /// Number of weak handles.
    #[inline]
    pub(crate) fn weak(&self) -> usize {
        self.weak.get()
    }

    #[inline]
    pub(crate) const fn kind(&self) -> BlockKind {
        self.vtable.kind
    }

    /// Adds a strong reference to a block whose pointee is alive.
    #[inline]
    pub(crate) fn inc_strong(&self) {
        let strong = self.strong.get();
        debug_assert!(strong > 0, "revived a block whose pointee is destroyed");
        self.strong.set(checked_inc(strong));
    }

    /// Adds a weak reference.
    #[inline]
    pub(crate) fn inc_weak(&self) {
        self.weak.set(checked_inc(self.weak.get()));
    }

    /// Adds a strong reference if the pointee is still alive.
    ///
    /// The count is checked before it is touched; a dead block is never
    /// incremented.
    #[inline]
    pub(crate) fn try_inc_strong(&self) -> bool {
        let strong = self.strong.get();
        if strong == 0 {
            return false;
        }
        self.strong.set(checked_inc(strong));
        true
    }
}

/// Counter overflow means billions of leaked handles; continuing would let
/// the count wrap to zero and free a live pointee.
#[inline]
fn checked_inc(count: usize) -> usize {
    match count.checked_add(1) {
        Some(count) => count,
        None => std::process::abort(),
    }
}

/// Returns the type-erased address of the pointee.
///
/// # Safety
///
/// `block` must be live and its strong count non-zero.
#[inline]
pub(crate) unsafe fn address(block: NonNull<BlockHeader>) -> NonNull<u8> {
    // SAFETY: guaranteed by the caller.
    unsafe {
        debug_assert!(block.as_ref().strong() > 0, "address of a destroyed pointee");
        (block.as_ref().vtable.address)(block)
    }
}

/// Drops one strong reference.
///
/// When it was the last one the pointee is destroyed, and when no weak
/// reference remains either the block is freed.
///
/// # Safety
///
/// `block` must be live and the caller must own one of its strong
/// references, which is consumed.
pub(crate) unsafe fn release_strong(block: NonNull<BlockHeader>) {
    // SAFETY: the caller's strong reference keeps the header alive.
    let header = unsafe { block.as_ref() };
    let strong = header.strong.get();
    debug_assert!(strong > 0, "released a strong reference twice");
    header.strong.set(strong - 1);
    if strong != 1 {
        return;
    }

    // Hold an implicit weak reference while the pointee is torn down, so a
    // weak handle dropped from inside its destructor cannot free the block.
    header.inc_weak();
    let vtable = header.vtable;
    // SAFETY: the strong count just reached zero; this is the only call.
    unsafe { (vtable.destroy_pointee)(block) };
    trace::pointee_destroyed(block.as_ptr() as *const u8, vtable.kind);

    // SAFETY: releases the implicit weak reference taken above.
    unsafe { release_weak(block) };
}

/// Drops one weak reference, freeing the block if it was the last reference
/// of any kind.
///
/// # Safety
///
/// `block` must be live and the caller must own one of its weak references,
/// which is consumed.
pub(crate) unsafe fn release_weak(block: NonNull<BlockHeader>) {
    // SAFETY: the caller's weak reference keeps the header alive.
    let header = unsafe { block.as_ref() };
    let weak = header.weak.get();
    debug_assert!(weak > 0, "released a weak reference twice");
    header.weak.set(weak - 1);

    if weak == 1 && header.strong.get() == 0 {
        let vtable = header.vtable;
        // SAFETY: both counts are zero and the pointee is already destroyed.
        unsafe { (vtable.destroy_block)(block) };
        trace::block_freed(block.as_ptr() as *const u8, vtable.kind);
    }
}

// ============================================================================
// DeletingBlock - separately allocated pointee plus deleter
// ============================================================================

/// A block owning an externally allocated pointee of type `U`.
#[repr(C)]
pub(crate) struct DeletingBlock<U: ?Sized, D, A> {
    header: BlockHeader,
    pointee: NonNull<U>,
    deleter: ManuallyDrop<D>,
    alloc: ManuallyDrop<A>,
}

impl<U: ?Sized, D: Deleter<U>, A: Allocator> DeletingBlock<U, D, A> {
    const VTABLE: &'static BlockVTable = &BlockVTable {
        destroy_pointee: Self::destroy_pointee,
        destroy_block: Self::destroy_block,
        address: Self::address,
        kind: BlockKind::Deleting,
    };

    /// Layout of the block allocation.
    pub(crate) const fn layout() -> Layout {
        Layout::new::<Self>()
    }

    /// Allocates a block taking ownership of `pointee`.
    ///
    /// On failure the deleter is handed back unused so the caller can dispose
    /// of the pointee before reporting the error.
    pub(crate) fn allocate(
        pointee: NonNull<U>,
        deleter: D,
        alloc: A,
    ) -> Result<NonNull<BlockHeader>, (AllocError, D)> {
        let raw = match alloc.allocate(Self::layout()) {
            Ok(raw) => raw.cast::<Self>(),
            Err(err) => return Err((err, deleter)),
        };

        // SAFETY: freshly allocated with this type's layout.
        unsafe {
            raw.as_ptr().write(Self {
                header: BlockHeader::new(Self::VTABLE),
                pointee,
                deleter: ManuallyDrop::new(deleter),
                alloc: ManuallyDrop::new(alloc),
            });
        }
        trace::block_created(raw.as_ptr() as *const u8, BlockKind::Deleting, mem::size_of::<Self>());
        Ok(raw.cast::<BlockHeader>())
    }

    unsafe fn destroy_pointee(block: NonNull<BlockHeader>) {
        let this = block.cast::<Self>().as_ptr();
        // SAFETY: runs once, so the deleter is still present; the header is
        // the first field, so the cast recovers the whole block.
        unsafe {
            let pointee = (*this).pointee;
            let deleter = ManuallyDrop::take(&mut (*this).deleter);
            deleter.delete(pointee);
        }
    }

    unsafe fn destroy_block(block: NonNull<BlockHeader>) {
        let this = block.cast::<Self>().as_ptr();
        // SAFETY: the deleter was consumed by destroy_pointee and the other
        // fields have no drop glue; only the allocator remains to move out
        // before the storage is released.
        unsafe {
            let alloc = ManuallyDrop::take(&mut (*this).alloc);
            alloc.deallocate(block.cast::<u8>(), Self::layout());
        }
    }

    unsafe fn address(block: NonNull<BlockHeader>) -> NonNull<u8> {
        // SAFETY: the block is live.
        unsafe { (*block.cast::<Self>().as_ptr()).pointee.cast::<u8>() }
    }
}

// ============================================================================
// InlineBlock - pointee stored inside the block
// ============================================================================

/// A block whose own allocation also holds the pointee.
#[repr(C)]
pub(crate) struct InlineBlock<T, A> {
    header: BlockHeader,
    alloc: ManuallyDrop<A>,
    value: MaybeUninit<T>,
}

/// Returns a block's memory if the pointee initializer unwinds.
struct DeallocOnUnwind<'a, A: Allocator> {
    alloc: &'a A,
    ptr: NonNull<u8>,
    layout: Layout,
}

impl<A: Allocator> Drop for DeallocOnUnwind<'_, A> {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated by alloc with layout and holds nothing live.
        unsafe { self.alloc.deallocate(self.ptr, self.layout) };
    }
}

impl<T, A: Allocator> InlineBlock<T, A> {
    const VTABLE: &'static BlockVTable = &BlockVTable {
        destroy_pointee: Self::destroy_pointee,
        destroy_block: Self::destroy_block,
        address: Self::address,
        kind: BlockKind::Inline,
    };

    /// Layout of the combined block-and-pointee allocation.
    pub(crate) const fn layout() -> Layout {
        Layout::new::<Self>()
    }

    /// Allocates a block and constructs the pointee in its storage.
    ///
    /// `init` runs after the allocation succeeded. If it panics, the memory
    /// is returned to `alloc` before the panic propagates.
    pub(crate) fn allocate_with<F: FnOnce() -> T>(
        init: F,
        alloc: A,
    ) -> Result<NonNull<BlockHeader>, AllocError> {
        let layout = Self::layout();
        let raw = alloc.allocate(layout)?.cast::<Self>();
        let this = raw.as_ptr();

        let guard = DeallocOnUnwind {
            alloc: &alloc,
            ptr: raw.cast::<u8>(),
            layout,
        };
        // SAFETY: the value slot lies inside the fresh allocation.
        unsafe { ptr::addr_of_mut!((*this).value).cast::<T>().write(init()) };
        mem::forget(guard);

        // SAFETY: header and allocator slots lie inside the fresh allocation.
        unsafe {
            ptr::addr_of_mut!((*this).header).write(BlockHeader::new(Self::VTABLE));
            ptr::addr_of_mut!((*this).alloc).write(ManuallyDrop::new(alloc));
        }
        trace::block_created(this as *const u8, BlockKind::Inline, mem::size_of::<Self>());
        Ok(raw.cast::<BlockHeader>())
    }

    unsafe fn destroy_pointee(block: NonNull<BlockHeader>) {
        let this = block.cast::<Self>().as_ptr();
        // SAFETY: the value was initialized at construction and runs its
        // destructor exactly once, in place; the memory stays allocated.
        unsafe { ptr::drop_in_place(ptr::addr_of_mut!((*this).value).cast::<T>()) };
    }

    unsafe fn destroy_block(block: NonNull<BlockHeader>) {
        let this = block.cast::<Self>().as_ptr();
        // SAFETY: the value slot is already dead; moving the allocator out is
        // the last access before the single combined allocation is released.
        unsafe {
            let alloc = ManuallyDrop::take(&mut (*this).alloc);
            alloc.deallocate(block.cast::<u8>(), Self::layout());
        }
    }

    unsafe fn address(block: NonNull<BlockHeader>) -> NonNull<u8> {
        let this = block.cast::<Self>().as_ptr();
        // SAFETY: addr_of_mut! on a live block never yields null.
        unsafe { NonNull::new_unchecked(ptr::addr_of_mut!((*this).value).cast::<u8>()) }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::alloc::Global;
    use crate::deleter::DefaultDelete;
    use crate::Tracked;

    struct Probe(Rc<Cell<usize>>);

    impl Drop for Probe {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_fresh_block_counts() {
        let block = InlineBlock::allocate_with(|| 5_u64, Global).unwrap();
        // SAFETY: block is live with one strong reference.
        unsafe {
            let header = block.as_ref();
            assert_eq!(header.strong(), 1);
            assert_eq!(header.weak(), 0);
            assert_eq!(header.kind(), BlockKind::Inline);
            assert_eq!(*address(block).cast::<u64>().as_ref(), 5);
            release_strong(block);
        }
    }

    #[test]
    fn test_inline_address_is_inside_block() {
        let block = InlineBlock::allocate_with(|| [0_u8; 32], Global).unwrap();
        let start = block.as_ptr() as usize;
        let end = start + InlineBlock::<[u8; 32], Global>::layout().size();
        // SAFETY: block is live.
        let addr = unsafe { address(block) }.as_ptr() as usize;
        assert!(addr > start && addr + 32 <= end);
        // SAFETY: consumes the only strong reference.
        unsafe { release_strong(block) };
    }

    #[test]
    fn test_weak_keeps_block_after_pointee() {
        let drops = Rc::new(Cell::new(0));
        let alloc = Tracked::default();
        let probe = Probe(Rc::clone(&drops));
        let block = InlineBlock::allocate_with(|| probe, alloc.clone()).unwrap();

        // SAFETY: block is live; each release consumes a reference we own.
        unsafe {
            block.as_ref().inc_weak();
            release_strong(block);
            assert_eq!(drops.get(), 1);
            assert_eq!(alloc.metrics().deallocations, 0);
            assert!(!block.as_ref().try_inc_strong());
            release_weak(block);
        }
        assert_eq!(alloc.metrics().deallocations, 1);
    }

    #[test]
    fn test_deleting_block_frees_both_pieces() {
        let drops = Rc::new(Cell::new(0));
        let alloc = Tracked::default();
        let pointee = NonNull::from(Box::leak(Box::new(Probe(Rc::clone(&drops)))));

        let Ok(block) = DeletingBlock::allocate(pointee, DefaultDelete, alloc.clone()) else {
            panic!("allocation failed");
        };
        // SAFETY: block is live.
        unsafe {
            assert_eq!(block.as_ref().kind(), BlockKind::Deleting);
            assert_eq!(address(block), pointee.cast::<u8>());
            release_strong(block);
        }
        assert_eq!(drops.get(), 1);
        assert_eq!(alloc.metrics().live_allocations(), 0);
    }

    #[test]
    fn test_failed_init_returns_memory() {
        let alloc = Tracked::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            InlineBlock::<u32, _>::allocate_with(|| panic!("constructor failed"), alloc.clone())
        }));
        assert!(result.is_err());
        assert_eq!(alloc.metrics().allocations, 1);
        assert_eq!(alloc.metrics().deallocations, 1);
    }
}
