//! Anonymous page reservations.
//!
//! `sys_alloc` hands out page-aligned, zero-filled, read/write regions of
//! memory straight from the operating system. The `cbrc` page pool carves
//! control blocks out of these regions.

use std::io;
use std::ptr::NonNull;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

/// Returns the system page size in bytes.
#[must_use]
pub fn page_size() -> usize {
    os::page_size()
}

/// Rounds `len` up to a whole number of pages.
///
/// Returns `None` if the rounded length overflows `usize`.
#[must_use]
pub fn round_to_pages(len: usize) -> Option<usize> {
    let page = page_size();
    len.checked_add(page - 1).map(|n| n & !(page - 1))
}

/// An anonymous read/write mapping owned by this handle.
///
/// The pages are returned to the operating system when the `Region` is
/// dropped. Pointers derived from [`Region::as_ptr`] must not be used after
/// that.
pub struct Region {
    base: NonNull<u8>,
    len: usize,
}

impl Region {
    /// Reserves and commits at least `len` bytes of zeroed memory.
    ///
    /// The length is rounded up to the page size. The returned region starts
    /// on a page boundary.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::InvalidInput`] for a zero or overflowing
    /// length, and the OS error if the mapping itself fails.
    pub fn reserve(len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "region length must be greater than 0",
            ));
        }
        let len = round_to_pages(len).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "region length overflows")
        })?;

        // SAFETY: len is non-zero and page-rounded; the OS picks the address.
        let base = unsafe { os::map(len)? };
        Ok(Self { base, len })
    }

    /// Returns the first byte of the region.
    #[must_use]
    pub const fn as_ptr(&self) -> NonNull<u8> {
        self.base
    }

    /// Returns the length of the region in bytes (a multiple of the page size).
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Always `false`: a reserved region spans at least one page.
    #[must_use]
    #[allow(clippy::unused_self)]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Returns `true` if `ptr` lies inside this region.
    #[must_use]
    pub fn contains(&self, ptr: *const u8) -> bool {
        let start = self.base.as_ptr() as usize;
        let addr = ptr as usize;
        addr >= start && addr - start < self.len
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: base/len came from os::map and are released exactly once.
        unsafe { os::unmap(self.base, self.len) };
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("base", &self.base)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_power_of_two() {
        let ps = page_size();
        assert!(ps > 0);
        assert_eq!(ps & (ps - 1), 0, "page size should be a power of 2");
    }

    #[test]
    fn test_round_to_pages() {
        let ps = page_size();
        assert_eq!(round_to_pages(1), Some(ps));
        assert_eq!(round_to_pages(ps), Some(ps));
        assert_eq!(round_to_pages(ps + 1), Some(2 * ps));
        assert_eq!(round_to_pages(usize::MAX), None);
    }

    #[test]
    fn test_reserve_is_page_aligned_and_writable() {
        let region = Region::reserve(100).expect("failed to reserve");
        assert_eq!(region.len(), page_size());
        assert!(!region.is_empty());
        assert_eq!(region.as_ptr().as_ptr() as usize % page_size(), 0);

        let ptr = region.as_ptr().as_ptr();
        // SAFETY: ptr is inside a live read/write region.
        unsafe {
            assert_eq!(std::ptr::read_volatile(ptr), 0);
            std::ptr::write_volatile(ptr, 42);
            assert_eq!(std::ptr::read_volatile(ptr), 42);
        }
    }

    #[test]
    fn test_reserve_zero_len_fails() {
        let err = Region::reserve(0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_contains() {
        let region = Region::reserve(1).unwrap();
        let base = region.as_ptr().as_ptr();
        assert!(region.contains(base));
        assert!(region.contains(base.wrapping_add(region.len() - 1)));
        assert!(!region.contains(base.wrapping_add(region.len())));
    }
}
