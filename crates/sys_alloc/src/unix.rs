use std::io;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Returns the system page size, cached after the first query.
pub fn page_size() -> usize {
    static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            // SAFETY: sysconf has no preconditions.
            let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            let size = usize::try_from(raw).unwrap_or(4096);
            PAGE_SIZE.store(size, Ordering::Relaxed);
            size
        }
        size => size,
    }
}

/// Maps `len` bytes of private anonymous memory.
///
/// # Safety
///
/// `len` must be non-zero and a multiple of the page size.
pub unsafe fn map(len: usize) -> io::Result<NonNull<u8>> {
    let prot = libc::PROT_READ | libc::PROT_WRITE;
    let flags = libc::MAP_PRIVATE | libc::MAP_ANON;

    // SAFETY: anonymous mapping with a null hint; the kernel picks the address.
    let ptr = unsafe { libc::mmap(ptr::null_mut(), len, prot, flags, -1, 0) };

    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(ptr.cast::<u8>()).ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))
}

/// Unmaps a region previously returned by [`map`].
///
/// # Safety
///
/// `base` and `len` must describe exactly one live mapping from [`map`].
pub unsafe fn unmap(base: NonNull<u8>, len: usize) {
    // SAFETY: guaranteed by the caller.
    unsafe {
        libc::munmap(base.as_ptr().cast::<libc::c_void>(), len);
    }
}
