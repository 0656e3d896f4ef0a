use std::io::{self, Error};
use std::mem;
use std::ptr;

use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_DECOMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

fn system_info() -> SYSTEM_INFO {
    unsafe {
        let mut info: SYSTEM_INFO = mem::zeroed();
        GetSystemInfo(&mut info);
        info
    }
}

/// Returns the system allocation granularity.
///
/// On Windows, `VirtualAlloc` addresses are aligned to this value (typically 64KB),
/// which is often larger than the page size (typically 4KB).
pub fn allocation_granularity() -> usize {
    match system_info().dwAllocationGranularity as usize {
        0 => 65536,
        gran => gran,
    }
}

pub fn page_size() -> usize {
    match system_info().dwPageSize as usize {
        0 => 4096,
        size => size,
    }
}

/// Decommits and recommits `[ptr, ptr + len)`; recommitted pages are zero.
///
/// # Safety
///
/// The range must be page aligned and inside a live `VirtualAlloc` reservation.
pub unsafe fn discard(ptr: *mut u8, len: usize) -> io::Result<()> {
    let addr = ptr.cast::<std::ffi::c_void>();
    if unsafe { VirtualFree(addr, len, MEM_DECOMMIT) } == 0 {
        return Err(Error::last_os_error());
    }
    if unsafe { VirtualAlloc(addr, len, MEM_COMMIT, PAGE_READWRITE) }.is_null() {
        return Err(Error::last_os_error());
    }
    Ok(())
}

pub struct MmapInner {
    ptr: *mut std::ffi::c_void,
    len: usize,
}

impl MmapInner {
    /// Creates a new anonymous memory mapping.
    pub unsafe fn map_anon(len: usize, _populate: bool, _no_reserve: bool) -> io::Result<Self> {
        // Windows requires MEM_RESERVE | MEM_COMMIT to actually get usable memory
        let ptr = unsafe { VirtualAlloc(ptr::null(), len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) };

        if ptr.is_null() {
            return Err(Error::last_os_error());
        }

        Ok(Self { ptr, len })
    }

    pub const fn ptr(&self) -> *mut u8 {
        self.ptr.cast::<u8>()
    }

    pub const fn len(&self) -> usize {
        self.len
    }
}

impl Drop for MmapInner {
    fn drop(&mut self) {
        if self.len > 0 {
            unsafe {
                // MEM_RELEASE requires dwSize to be 0
                VirtualFree(self.ptr, 0, MEM_RELEASE);
            }
        }
    }
}

unsafe impl Send for MmapInner {}
unsafe impl Sync for MmapInner {}
