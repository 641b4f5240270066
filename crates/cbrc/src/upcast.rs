//! Derived-to-base conversions.
//!
//! A [`SharedPtr<D>`](crate::SharedPtr) can become a `SharedPtr<B>` for any
//! base `B` that `D` declares through [`Upcast`]. The converted handle shares
//! the source control block; the block still knows the derived type and
//! deleter, so the pointee is destroyed as a `D`.

use std::ptr::NonNull;

/// Converts a pointer to `Self` into a pointer to its base `B`.
///
/// Two shapes of "base" are supported by the [`upcast!`](crate::upcast!)
/// macro: a trait object implemented by `Self`, and a field embedded in
/// `Self`.
///
/// # Safety
///
/// `upcast_ptr` must not dereference `ptr` (weak handles convert pointers to
/// pointees that may already be destroyed), and when `ptr` is live the result
/// must point into the same object.
pub unsafe trait Upcast<B: ?Sized> {
    /// Converts the pointer.
    fn upcast_ptr(ptr: NonNull<Self>) -> NonNull<B>;
}

/// Implements [`Upcast`] for a derived type.
///
/// ```
/// use cbrc::{upcast, SharedPtr};
///
/// trait Shape {
///     fn area(&self) -> f64;
/// }
///
/// struct Square(f64);
///
/// impl Shape for Square {
///     fn area(&self) -> f64 {
///         self.0 * self.0
///     }
/// }
///
/// struct Header {
///     id: u32,
/// }
///
/// struct Packet {
///     header: Header,
///     payload: Vec<u8>,
/// }
///
/// upcast!(Square => dyn Shape);
/// upcast!(Packet => Header, header);
///
/// let square = SharedPtr::new(Square(3.0));
/// let shape: SharedPtr<dyn Shape> = SharedPtr::upcast_ref(&square);
/// assert_eq!(shape.area(), 9.0);
/// assert_eq!(SharedPtr::use_count(&square), 2);
///
/// let packet = SharedPtr::new(Packet { header: Header { id: 7 }, payload: vec![1, 2] });
/// let header: SharedPtr<Header> = SharedPtr::upcast(packet);
/// assert_eq!(header.id, 7);
/// ```
///
/// The field form requires the base to be embedded by value. A field that
/// only dereferences to the base (a `Box`, an `Rc`, ...) is rejected:
///
/// ```compile_fail
/// use cbrc::upcast;
///
/// struct Base {
///     id: u32,
/// }
///
/// struct Holder {
///     tag: u64,
///     base: Box<Base>,
/// }
///
/// upcast!(Holder => Base, base);
/// ```
#[macro_export]
macro_rules! upcast {
    ($derived:ty => dyn $($base:tt)+) => {
        // SAFETY: unsizing coercion keeps the address and never dereferences.
        unsafe impl $crate::Upcast<dyn $($base)+> for $derived {
            fn upcast_ptr(ptr: ::core::ptr::NonNull<Self>) -> ::core::ptr::NonNull<dyn $($base)+> {
                ptr
            }
        }
    };
    ($derived:ty => $base:ty, $($field:ident).+) => {
        // SAFETY: the offset of an embedded field is applied with wrapping
        // arithmetic, so a dangling pointer is never dereferenced.
        unsafe impl $crate::Upcast<$base> for $derived {
            fn upcast_ptr(ptr: ::core::ptr::NonNull<Self>) -> ::core::ptr::NonNull<$base> {
                // Raw place projection: no deref coercion, so the field must
                // be declared with exactly the base type.
                let _field_has_base_type = |p: *const $derived| -> *const $base {
                    // SAFETY: only computes a field address; never called.
                    unsafe { ::core::ptr::addr_of!((*p).$($field).+) }
                };
                let offset = ::core::mem::offset_of!($derived, $($field).+);
                let raw = ptr.as_ptr().cast::<u8>().wrapping_add(offset).cast::<$base>();
                // SAFETY: a non-null object address plus an in-object offset is non-null.
                unsafe { ::core::ptr::NonNull::new_unchecked(raw) }
            }
        }
    };
}
