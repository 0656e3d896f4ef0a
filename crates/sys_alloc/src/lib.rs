//! Low-level virtual memory primitives.
//!
//! Provides anonymous, zero-initialised mappings and the ability to hand
//! page-aligned subranges of them back to the operating system. GC side
//! tables (mark and live bitmaps) are reserved through this crate.

use std::io;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

pub use os::page_size;

/// Returns the system allocation granularity.
///
/// On Windows, this is typically 64KB. On Unix, this is typically the system page size.
#[must_use]
pub fn allocation_granularity() -> usize {
    #[cfg(windows)]
    {
        os::allocation_granularity()
    }
    #[cfg(unix)]
    {
        os::page_size()
    }
}

/// Returns the pages in `[ptr, ptr + len)` to the operating system.
///
/// After this call the range reads back as zero. Physical memory is released
/// where the platform supports it; otherwise the range is zeroed in place.
///
/// # Errors
///
/// Returns `InvalidInput` if `ptr` or `len` is not a multiple of [`page_size`],
/// or the OS error if the release fails.
///
/// # Safety
///
/// `[ptr, ptr + len)` must lie entirely inside a live read/write mapping, and
/// no other thread may access the range for the duration of the call.
pub unsafe fn discard(ptr: *mut u8, len: usize) -> io::Result<()> {
    let page = page_size();
    if ptr as usize % page != 0 || len % page != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "discard range must be page aligned",
        ));
    }
    if len == 0 {
        return Ok(());
    }
    // SAFETY: the caller guarantees the range is mapped and unshared.
    unsafe { os::discard(ptr, len) }
}

/// A handle to a memory mapped region.
///
/// The region is automatically unmapped when this handle is dropped.
pub struct Mmap {
    inner: os::MmapInner,
}

impl Mmap {
    /// Returns a pointer to the start of the memory mapping.
    #[must_use]
    pub fn ptr(&self) -> *mut u8 {
        self.inner.ptr()
    }

    /// Returns the length of the memory mapping in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the mapping has zero length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    /// Releases the pages in `[offset, offset + len)` of this mapping.
    ///
    /// See [`discard`] for the semantics.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the range is out of bounds or not page
    /// aligned, or the OS error if the release fails.
    ///
    /// # Safety
    ///
    /// No other thread may access the range for the duration of the call.
    pub unsafe fn discard(&self, offset: usize, len: usize) -> io::Result<()> {
        let in_bounds = offset
            .checked_add(len)
            .is_some_and(|end| end <= self.len());
        if !in_bounds {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "discard range exceeds mapping",
            ));
        }
        // SAFETY: the range was checked against this live mapping.
        unsafe { discard(self.ptr().add(offset), len) }
    }
}

impl std::fmt::Debug for Mmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mmap")
            .field("ptr", &self.ptr())
            .field("len", &self.len())
            .finish()
    }
}

unsafe impl Send for Mmap {}
unsafe impl Sync for Mmap {}

/// Configuration for creating a memory mapping.
#[derive(Debug, Clone)]
pub struct MmapOptions {
    len: usize,
    populate: bool,
    no_reserve: bool,
}

impl MmapOptions {
    /// Creates a new `MmapOptions` with default settings (length 0).
    /// You must set a length before mapping.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            len: 0,
            populate: false,
            no_reserve: false,
        }
    }

    /// Sets the length of the mapping in bytes.
    #[must_use]
    pub const fn len(mut self, len: usize) -> Self {
        self.len = len;
        self
    }

    /// Sets whether to pre-populate (prefault) the page tables.
    ///
    /// On Linux, this adds `MAP_POPULATE`.
    #[must_use]
    pub const fn populate(mut self, populate: bool) -> Self {
        self.populate = populate;
        self
    }

    /// Sets whether to skip reserving swap space (on supported platforms).
    ///
    /// On Linux, this adds `MAP_NORESERVE`.
    #[must_use]
    pub const fn no_reserve(mut self, no_reserve: bool) -> Self {
        self.no_reserve = no_reserve;
        self
    }

    /// Creates an anonymous, zero-initialised read/write mapping.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a zero length, or the OS error if the
    /// mapping cannot be created.
    pub fn map_anon(&self) -> io::Result<Mmap> {
        if self.len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "length must be greater than 0",
            ));
        }

        // SAFETY: a fresh anonymous mapping aliases no existing memory.
        let inner = unsafe { os::MmapInner::map_anon(self.len, self.populate, self.no_reserve)? };

        Ok(Mmap { inner })
    }
}

impl Default for MmapOptions {
    fn default() -> Self {
        Self::new()
    }
}
