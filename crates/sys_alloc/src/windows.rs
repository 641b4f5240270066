use std::io;
use std::mem;
use std::ptr::{self, NonNull};

use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

pub fn page_size() -> usize {
    // SAFETY: GetSystemInfo fills a caller-provided struct.
    let size = unsafe {
        let mut info: SYSTEM_INFO = mem::zeroed();
        GetSystemInfo(&mut info);
        info.dwPageSize as usize
    };
    if size == 0 {
        4096
    } else {
        size
    }
}

/// Reserves and commits `len` bytes of read/write memory.
///
/// # Safety
///
/// `len` must be non-zero and a multiple of the page size.
pub unsafe fn map(len: usize) -> io::Result<NonNull<u8>> {
    // SAFETY: null address lets the OS choose the placement.
    let ptr = unsafe { VirtualAlloc(ptr::null(), len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) };
    NonNull::new(ptr.cast::<u8>()).ok_or_else(io::Error::last_os_error)
}

/// Releases a region previously returned by [`map`].
///
/// # Safety
///
/// `base` must be the start of one live reservation from [`map`].
pub unsafe fn unmap(base: NonNull<u8>, _len: usize) {
    // MEM_RELEASE requires dwSize to be 0.
    // SAFETY: guaranteed by the caller.
    unsafe {
        VirtualFree(base.as_ptr().cast::<std::ffi::c_void>(), 0, MEM_RELEASE);
    }
}
