//! The `SharedPtr<T>` owning handle.

use std::alloc::handle_alloc_error;
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop};
use std::ops::Deref;
use std::ptr::{self, NonNull};

use crate::alloc::{AllocError, Allocator, Global};
use crate::block::{self, BlockHeader, BlockKind, DeletingBlock, InlineBlock};
use crate::deleter::{DefaultDelete, Deleter};
use crate::upcast::Upcast;
use crate::weak::WeakPtr;

// ============================================================================
// Owner - the engaged state shared by both handle types
// ============================================================================

/// A typed pointee address together with the block that owns it.
///
/// Handles store `Option<Owner<T>>`, so a handle is either fully engaged or
/// fully empty.
pub(crate) struct Owner<T: ?Sized> {
    pub(crate) value: NonNull<T>,
    pub(crate) block: NonNull<BlockHeader>,
}

impl<T: ?Sized> Clone for Owner<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Owner<T> {}

impl<T: ?Sized> Owner<T> {
    #[inline]
    pub(crate) const fn header(&self) -> &BlockHeader {
        // SAFETY: an engaged handle holds a reference that keeps the header
        // allocated.
        unsafe { self.block.as_ref() }
    }

    /// Applies a derived-to-base conversion to the pointee address.
    pub(crate) fn upcast<B: ?Sized>(self) -> Owner<B>
    where
        T: Upcast<B>,
    {
        Owner {
            value: T::upcast_ptr(self.value),
            block: self.block,
        }
    }
}

/// Whether two optional owners refer to the same block (or are both empty).
pub(crate) fn same_block<T: ?Sized, U: ?Sized>(a: Option<Owner<T>>, b: Option<Owner<U>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.block == b.block,
        (None, None) => true,
        _ => false,
    }
}

// ============================================================================
// SharedPtr<T>
// ============================================================================

/// A single-threaded reference-counted pointer with an explicit control
/// block.
///
/// Every clone shares one control block holding a strong and a weak count.
/// The pointee is destroyed when the last `SharedPtr` releases it; the block
/// itself is freed once no [`WeakPtr`] observes it either.
///
/// A `SharedPtr` may also be *empty* (see [`SharedPtr::null`]). Dereferencing
/// an empty pointer panics; use [`SharedPtr::get`] to check first.
///
/// `SharedPtr` is `!Send` and `!Sync`: the counts are plain cells.
///
/// # Examples
///
/// ```
/// use cbrc::SharedPtr;
///
/// let a = SharedPtr::new(5);
/// let b = SharedPtr::clone(&a);
/// assert_eq!(SharedPtr::use_count(&a), 2);
///
/// let weak = SharedPtr::downgrade(&a);
/// drop(a);
/// drop(b);
/// assert!(weak.expired());
/// ```
pub struct SharedPtr<T: ?Sized> {
    owner: Option<Owner<T>>,
    _marker: PhantomData<T>,
}

impl<T> SharedPtr<T> {
    /// Moves `value` into a new control block on the global heap.
    ///
    /// The block and the value share a single allocation.
    ///
    /// ```
    /// use cbrc::SharedPtr;
    ///
    /// let p = SharedPtr::new(String::from("hello"));
    /// assert_eq!(p.len(), 5);
    /// ```
    pub fn new(value: T) -> Self {
        Self::new_in(value, Global)
    }

    /// Constructs the pointee with `init` directly inside a new control block.
    pub fn new_with<F: FnOnce() -> T>(init: F) -> Self {
        Self::new_with_in(init, Global)
    }

    /// Moves `value` into a new control block allocated by `alloc`.
    ///
    /// Aborts through [`handle_alloc_error`] if `alloc` fails; see
    /// [`try_new_in`](Self::try_new_in) for the fallible form.
    pub fn new_in<A: Allocator + 'static>(value: T, alloc: A) -> Self {
        Self::new_with_in(|| value, alloc)
    }

    /// Constructs the pointee with `init` inside a block allocated by `alloc`.
    pub fn new_with_in<F, A>(init: F, alloc: A) -> Self
    where
        F: FnOnce() -> T,
        A: Allocator + 'static,
    {
        match Self::try_new_with_in(init, alloc) {
            Ok(this) => this,
            Err(AllocError) => handle_alloc_error(InlineBlock::<T, A>::layout()),
        }
    }

    /// Fallible form of [`new_in`](Self::new_in).
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if `alloc` cannot provide the block; `value` is
    /// dropped.
    pub fn try_new_in<A: Allocator + 'static>(value: T, alloc: A) -> Result<Self, AllocError> {
        Self::try_new_with_in(|| value, alloc)
    }

    /// Fallible form of [`new_with_in`](Self::new_with_in).
    ///
    /// The allocation happens first; `init` only runs once memory is
    /// available. If `init` panics the memory is returned to `alloc`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if `alloc` cannot provide the block; `init` is
    /// not called.
    pub fn try_new_with_in<F, A>(init: F, alloc: A) -> Result<Self, AllocError>
    where
        F: FnOnce() -> T,
        A: Allocator + 'static,
    {
        let block = InlineBlock::allocate_with(init, alloc)?;
        // SAFETY: the block is fresh, its pointee is a live T.
        let value = unsafe { block::address(block) }.cast::<T>();
        Ok(Self::from_owner(Owner { value, block }))
    }
}

impl<T: ?Sized> SharedPtr<T> {
    /// Takes ownership of a boxed value. The box is dropped (with its
    /// boxed type) when the last strong handle is released.
    ///
    /// The pointee keeps its own allocation, so this costs one more
    /// allocation than [`SharedPtr::new`].
    pub fn from_box(value: Box<T>) -> Self {
        Self::from_box_in(value, Global)
    }

    /// Takes ownership of a boxed value, allocating the control block with
    /// `alloc`.
    pub fn from_box_in<A: Allocator + 'static>(value: Box<T>, alloc: A) -> Self {
        let ptr = NonNull::from(Box::leak(value));
        // SAFETY: ptr came from a Box, which is what DefaultDelete expects.
        unsafe { Self::from_raw_with_in(ptr, DefaultDelete, alloc) }
    }

    /// Fallible form of [`from_box_in`](Self::from_box_in).
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the block cannot be allocated; the box is
    /// dropped before returning.
    pub fn try_from_box_in<A: Allocator + 'static>(value: Box<T>, alloc: A) -> Result<Self, AllocError> {
        let ptr = NonNull::from(Box::leak(value));
        // SAFETY: ptr came from a Box, which is what DefaultDelete expects.
        unsafe { Self::try_from_raw_with_in(ptr, DefaultDelete, alloc) }
    }

    /// Takes ownership of `ptr`; `deleter` disposes of it when the last
    /// strong handle is released.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live `T` that nothing else owns or frees, and
    /// `deleter` must be able to dispose of it.
    pub unsafe fn from_raw_with<D>(ptr: NonNull<T>, deleter: D) -> Self
    where
        D: Deleter<T> + 'static,
    {
        // SAFETY: forwarded to the caller.
        unsafe { Self::from_raw_with_in(ptr, deleter, Global) }
    }

    /// Takes ownership of `ptr` with a custom deleter, allocating the control
    /// block with `alloc`.
    ///
    /// # Safety
    ///
    /// Same as [`from_raw_with`](Self::from_raw_with).
    pub unsafe fn from_raw_with_in<D, A>(ptr: NonNull<T>, deleter: D, alloc: A) -> Self
    where
        D: Deleter<T> + 'static,
        A: Allocator + 'static,
    {
        // SAFETY: forwarded to the caller.
        match unsafe { Self::try_from_raw_with_in(ptr, deleter, alloc) } {
            Ok(this) => this,
            Err(AllocError) => handle_alloc_error(DeletingBlock::<T, D, A>::layout()),
        }
    }

    /// Fallible form of [`from_raw_with_in`](Self::from_raw_with_in).
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the block cannot be allocated. The deleter
    /// has already been run on `ptr` by then, so nothing leaks.
    ///
    /// # Safety
    ///
    /// Same as [`from_raw_with`](Self::from_raw_with).
    pub unsafe fn try_from_raw_with_in<D, A>(
        ptr: NonNull<T>,
        deleter: D,
        alloc: A,
    ) -> Result<Self, AllocError>
    where
        D: Deleter<T> + 'static,
        A: Allocator + 'static,
    {
        match DeletingBlock::allocate(ptr, deleter, alloc) {
            Ok(block) => Ok(Self::from_owner(Owner { value: ptr, block })),
            Err((err, deleter)) => {
                // SAFETY: the caller handed us ownership of a live pointee.
                unsafe { deleter.delete(ptr) };
                Err(err)
            }
        }
    }

    /// An empty pointer: no pointee, no control block.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            owner: None,
            _marker: PhantomData,
        }
    }

    /// Wraps an owner whose strong reference has already been counted.
    #[inline]
    pub(crate) const fn from_owner(owner: Owner<T>) -> Self {
        Self {
            owner: Some(owner),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub(crate) const fn owner(this: &Self) -> Option<Owner<T>> {
        this.owner
    }

    /// Returns a reference to the pointee, or `None` if `this` is empty.
    #[must_use]
    pub fn get(this: &Self) -> Option<&T> {
        // SAFETY: an engaged handle keeps the pointee alive.
        this.owner.map(|owner| unsafe { &*owner.value.as_ptr() })
    }

    /// Returns the pointee's address, or `None` if `this` is empty.
    #[must_use]
    pub fn as_ptr(this: &Self) -> Option<NonNull<T>> {
        this.owner.map(|owner| owner.value)
    }

    /// Returns a mutable reference if no other strong or weak handle shares
    /// the block.
    ///
    /// ```
    /// use cbrc::SharedPtr;
    ///
    /// let mut p = SharedPtr::new(1);
    /// *SharedPtr::get_mut(&mut p).unwrap() += 1;
    ///
    /// let q = SharedPtr::clone(&p);
    /// assert!(SharedPtr::get_mut(&mut p).is_none());
    /// drop(q);
    /// assert_eq!(*p, 2);
    /// ```
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        let owner = this.owner?;
        let header = owner.header();
        if header.strong() == 1 && header.weak() == 0 {
            // SAFETY: this handle is the only reference of any kind.
            Some(unsafe { &mut *owner.value.as_ptr() })
        } else {
            None
        }
    }

    /// Returns `true` if `this` holds no pointee.
    #[must_use]
    pub const fn is_empty(this: &Self) -> bool {
        this.owner.is_none()
    }

    /// Number of strong handles sharing the block; 0 for an empty pointer.
    #[must_use]
    pub fn use_count(this: &Self) -> usize {
        this.owner.map_or(0, |owner| owner.header().strong())
    }

    /// Number of weak handles observing the block; 0 for an empty pointer.
    #[must_use]
    pub fn weak_count(this: &Self) -> usize {
        this.owner.map_or(0, |owner| owner.header().weak())
    }

    /// Which block shape owns the pointee; `None` for an empty pointer.
    ///
    /// ```
    /// use cbrc::{BlockKind, SharedPtr};
    ///
    /// assert_eq!(SharedPtr::block_kind(&SharedPtr::new(1)), Some(BlockKind::Inline));
    /// assert_eq!(SharedPtr::block_kind(&SharedPtr::from_box(Box::new(1))), Some(BlockKind::Deleting));
    /// ```
    #[must_use]
    pub fn block_kind(this: &Self) -> Option<BlockKind> {
        this.owner.map(|owner| owner.header().kind())
    }

    /// Returns `true` if both pointers address the same pointee (or are both
    /// empty).
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        match (this.owner, other.owner) {
            (Some(a), Some(b)) => ptr::addr_eq(a.value.as_ptr(), b.value.as_ptr()),
            (None, None) => true,
            _ => false,
        }
    }

    /// Returns `true` if both pointers share one control block, whatever
    /// their pointee types.
    #[must_use]
    pub fn owner_eq<U: ?Sized>(this: &Self, other: &SharedPtr<U>) -> bool {
        same_block(this.owner, other.owner)
    }

    /// Releases this handle's ownership, leaving it empty.
    ///
    /// Releasing the last strong handle destroys the pointee; the block is
    /// freed too if no weak handle remains.
    pub fn reset(this: &mut Self) {
        if let Some(owner) = this.owner.take() {
            // SAFETY: the handle owned one strong reference, and is empty now
            // so it cannot release it again.
            unsafe { block::release_strong(owner.block) };
        }
    }

    /// Creates a [`WeakPtr`] observing this pointer's block.
    #[must_use]
    pub fn downgrade(this: &Self) -> WeakPtr<T> {
        match this.owner {
            Some(owner) => {
                owner.header().inc_weak();
                WeakPtr::from_owner(owner)
            }
            None => WeakPtr::new(),
        }
    }

    /// Converts into a pointer to a base of `T`, sharing the same block.
    ///
    /// The strong count is unchanged: the ownership moves.
    pub fn upcast<B: ?Sized>(this: Self) -> SharedPtr<B>
    where
        T: Upcast<B> + 'static,
    {
        let this = ManuallyDrop::new(this);
        SharedPtr {
            owner: this.owner.map(Owner::upcast),
            _marker: PhantomData,
        }
    }

    /// Creates a new strong handle to a base of `T`, sharing the same block.
    #[must_use]
    pub fn upcast_ref<B: ?Sized>(this: &Self) -> SharedPtr<B>
    where
        T: Upcast<B> + 'static,
    {
        Self::upcast(this.clone())
    }

    /// Projects onto part of the pointee, keeping the whole block alive.
    ///
    /// An empty pointer maps to an empty pointer without calling `f`.
    ///
    /// ```
    /// use cbrc::SharedPtr;
    ///
    /// let pair = SharedPtr::new((1, String::from("two")));
    /// let second: SharedPtr<str> = SharedPtr::map(pair, |p| p.1.as_str());
    /// assert_eq!(&*second, "two");
    /// ```
    pub fn map<U: ?Sized, F>(this: Self, f: F) -> SharedPtr<U>
    where
        T: 'static,
        F: FnOnce(&T) -> &U,
    {
        let Some(owner) = this.owner else {
            return SharedPtr::null();
        };
        // SAFETY: this handle keeps the pointee alive for the call.
        let value = NonNull::from(f(unsafe { owner.value.as_ref() }));
        mem::forget(this);
        SharedPtr::from_owner(Owner {
            value,
            block: owner.block,
        })
    }

    /// Like [`map`](Self::map), but leaves `this` in place and adds a strong
    /// reference.
    #[must_use]
    pub fn map_ref<U: ?Sized, F>(this: &Self, f: F) -> SharedPtr<U>
    where
        T: 'static,
        F: FnOnce(&T) -> &U,
    {
        Self::map(this.clone(), f)
    }
}

impl<T: ?Sized> Clone for SharedPtr<T> {
    /// Makes another owner of the same block, incrementing the strong count.
    fn clone(&self) -> Self {
        if let Some(owner) = self.owner {
            owner.header().inc_strong();
        }
        Self {
            owner: self.owner,
            _marker: PhantomData,
        }
    }

    /// Copy-assignment. Assigning a pointer that already shares `self`'s
    /// block (including `self` itself) leaves the counts untouched.
    fn clone_from(&mut self, source: &Self) {
        if same_block(self.owner, source.owner) {
            self.owner = source.owner;
            return;
        }
        *self = source.clone();
    }
}

impl<T: ?Sized> Drop for SharedPtr<T> {
    fn drop(&mut self) {
        Self::reset(self);
    }
}

impl<T: ?Sized> Deref for SharedPtr<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match Self::get(self) {
            Some(value) => value,
            None => panic!("dereferenced an empty SharedPtr"),
        }
    }
}

impl<T: ?Sized> Default for SharedPtr<T> {
    /// An empty pointer.
    fn default() -> Self {
        Self::null()
    }
}

impl<T> From<T> for SharedPtr<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: ?Sized> From<Box<T>> for SharedPtr<T> {
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

impl<T: ?Sized> AsRef<T> for SharedPtr<T> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T: ?Sized> Borrow<T> for SharedPtr<T> {
    fn borrow(&self) -> &T {
        self
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Self::get(self) {
            Some(value) => f.debug_tuple("SharedPtr").field(&value).finish(),
            None => write!(f, "SharedPtr(<empty>)"),
        }
    }
}

impl<T: ?Sized + fmt::Display> fmt::Display for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Self::get(self) {
            Some(value) => fmt::Display::fmt(value, f),
            None => f.write_str("<empty>"),
        }
    }
}

impl<T: ?Sized> fmt::Pointer for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.owner {
            Some(owner) => fmt::Pointer::fmt(&owner.value, f),
            None => fmt::Pointer::fmt(&ptr::null::<u8>(), f),
        }
    }
}

// Comparisons look at the pointees; an empty pointer compares equal to
// another empty pointer and less than any engaged one.

impl<T: ?Sized + PartialEq> PartialEq for SharedPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        Self::get(self) == Self::get(other)
    }
}

impl<T: ?Sized + Eq> Eq for SharedPtr<T> {}

impl<T: ?Sized + PartialOrd> PartialOrd for SharedPtr<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Self::get(self).partial_cmp(&Self::get(other))
    }
}

impl<T: ?Sized + Ord> Ord for SharedPtr<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        Self::get(self).cmp(&Self::get(other))
    }
}

impl<T: ?Sized + Hash> Hash for SharedPtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Self::get(self).hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_pointer_state() {
        let p: SharedPtr<u32> = SharedPtr::null();
        assert!(SharedPtr::is_empty(&p));
        assert_eq!(SharedPtr::use_count(&p), 0);
        assert_eq!(SharedPtr::weak_count(&p), 0);
        assert!(SharedPtr::get(&p).is_none());
        assert!(SharedPtr::as_ptr(&p).is_none());
        assert!(SharedPtr::downgrade(&p).expired());
    }

    #[test]
    #[should_panic(expected = "dereferenced an empty SharedPtr")]
    fn test_deref_empty_panics() {
        let p: SharedPtr<u32> = SharedPtr::default();
        let _ = *p;
    }

    #[test]
    fn test_reset_twice_is_inert() {
        let mut p = SharedPtr::new(3);
        SharedPtr::reset(&mut p);
        SharedPtr::reset(&mut p);
        assert!(SharedPtr::is_empty(&p));
    }

    #[test]
    fn test_clone_from_empty_and_engaged() {
        let a = SharedPtr::new(1);
        let mut b: SharedPtr<i32> = SharedPtr::null();
        b.clone_from(&a);
        assert_eq!(SharedPtr::use_count(&a), 2);

        let empty = SharedPtr::null();
        b.clone_from(&empty);
        assert!(SharedPtr::is_empty(&b));
        assert_eq!(SharedPtr::use_count(&a), 1);
    }

    #[test]
    fn test_comparisons_follow_pointee() {
        let a = SharedPtr::new(1);
        let b = SharedPtr::new(1);
        let c = SharedPtr::new(2);
        let empty = SharedPtr::null();
        assert_eq!(a, b);
        assert!(a < c);
        assert!(empty < a);
        assert!(!SharedPtr::ptr_eq(&a, &b));
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", SharedPtr::new(4)), "SharedPtr(4)");
        assert_eq!(format!("{:?}", SharedPtr::<i32>::null()), "SharedPtr(<empty>)");
    }
}
