//! The `WeakPtr<T>` observing handle.

use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;

use crate::block;
use crate::strong::{same_block, Owner, SharedPtr};
use crate::tracing::internal as trace;
use crate::upcast::Upcast;

/// A non-owning observer of a [`SharedPtr`]'s control block.
///
/// A `WeakPtr` keeps the block allocated but not the pointee. Call
/// [`lock`](WeakPtr::lock) to obtain a `SharedPtr` if the pointee is still
/// alive.
///
/// # Examples
///
/// ```
/// use cbrc::{SharedPtr, WeakPtr};
///
/// let strong = SharedPtr::new(10);
/// let weak = WeakPtr::from(&strong);
/// assert_eq!(*weak.lock(), 10);
///
/// drop(strong);
/// assert!(weak.expired());
/// assert!(SharedPtr::is_empty(&weak.lock()));
/// ```
pub struct WeakPtr<T: ?Sized> {
    owner: Option<Owner<T>>,
    _marker: PhantomData<T>,
}

impl<T: ?Sized> WeakPtr<T> {
    /// An empty weak pointer that observes nothing.
    ///
    /// It is always [`expired`](Self::expired) and locks to an empty
    /// `SharedPtr`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            owner: None,
            _marker: PhantomData,
        }
    }

    /// Wraps an owner whose weak reference has already been counted.
    #[inline]
    pub(crate) const fn from_owner(owner: Owner<T>) -> Self {
        Self {
            owner: Some(owner),
            _marker: PhantomData,
        }
    }

    /// Returns `true` if the pointee has been destroyed, or if this pointer
    /// is empty.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.owner.is_none_or(|owner| owner.header().strong() == 0)
    }

    /// Number of strong handles sharing the block; 0 once expired.
    #[must_use]
    pub fn use_count(&self) -> usize {
        self.owner.map_or(0, |owner| owner.header().strong())
    }

    /// Number of weak handles observing the block; 0 for an empty pointer.
    #[must_use]
    pub fn weak_count(&self) -> usize {
        self.owner.map_or(0, |owner| owner.header().weak())
    }

    /// Attempts to take shared ownership of the pointee.
    ///
    /// Returns `None` if the pointee is gone. The strong count is checked
    /// before it is incremented, so a failed attempt leaves the block
    /// untouched.
    #[must_use]
    pub fn upgrade(&self) -> Option<SharedPtr<T>> {
        let owner = self.owner?;
        if owner.header().try_inc_strong() {
            Some(SharedPtr::from_owner(owner))
        } else {
            trace::lock_failed(owner.block.as_ptr().cast_const().cast::<u8>());
            None
        }
    }

    /// Like [`upgrade`](Self::upgrade), but returns an empty `SharedPtr`
    /// instead of `None`.
    #[must_use]
    pub fn lock(&self) -> SharedPtr<T> {
        self.upgrade().unwrap_or_default()
    }

    /// Stops observing, leaving this pointer empty.
    pub fn reset(&mut self) {
        if let Some(owner) = self.owner.take() {
            // SAFETY: this handle owned one weak reference and can no longer
            // release it.
            unsafe { block::release_weak(owner.block) };
        }
    }

    /// Returns `true` if both pointers observe the same block (or are both
    /// empty).
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        same_block(self.owner, other.owner)
    }

    /// Returns `true` if this pointer observes the block owned by `other`.
    #[must_use]
    pub fn owner_eq<U: ?Sized>(&self, other: &SharedPtr<U>) -> bool {
        same_block(self.owner, SharedPtr::owner(other))
    }

    /// Converts into a weak pointer to a base of `T`.
    ///
    /// Works whether or not the pointee is still alive; the conversion only
    /// adjusts the stored address.
    #[must_use]
    pub fn upcast<B: ?Sized>(self) -> WeakPtr<B>
    where
        T: Upcast<B> + 'static,
    {
        let this = ManuallyDrop::new(self);
        WeakPtr {
            owner: this.owner.map(Owner::upcast),
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> Clone for WeakPtr<T> {
    fn clone(&self) -> Self {
        if let Some(owner) = self.owner {
            owner.header().inc_weak();
        }
        Self {
            owner: self.owner,
            _marker: PhantomData,
        }
    }

    fn clone_from(&mut self, source: &Self) {
        if same_block(self.owner, source.owner) {
            self.owner = source.owner;
            return;
        }
        *self = source.clone();
    }
}

impl<T: ?Sized> Drop for WeakPtr<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized> Default for WeakPtr<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> From<&SharedPtr<T>> for WeakPtr<T> {
    fn from(strong: &SharedPtr<T>) -> Self {
        SharedPtr::downgrade(strong)
    }
}

impl<T: ?Sized> fmt::Debug for WeakPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(WeakPtr)")
    }
}
