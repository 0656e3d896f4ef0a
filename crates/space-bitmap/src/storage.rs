//! Backing words of a bitmap.

use std::sync::atomic::{AtomicUsize, Ordering};

use sys_alloc::Mmap;

use crate::index::WORD_BYTES;

/// Word storage of a [`SpaceBitmap`](crate::SpaceBitmap).
///
/// Owned storage is an anonymous mapping released when the bitmap drops.
/// Borrowed storage aliases the words of another bitmap for `'a`.
#[derive(Debug, Default)]
pub enum Storage<'a> {
    /// No storage; the bitmap is invalid.
    #[default]
    Empty,
    /// Mapping owned by this bitmap.
    Owned(Mmap),
    /// Words of another bitmap.
    Borrowed(&'a [AtomicUsize]),
}

impl Storage<'_> {
    /// All reserved words, including those past the current heap limit.
    #[must_use]
    pub fn words(&self) -> &[AtomicUsize] {
        match self {
            Self::Empty => &[],
            Self::Owned(map) => {
                // SAFETY: the mapping is page aligned, zero-initialised, lives as
                // long as `self`, and is only ever accessed through atomics.
                unsafe {
                    std::slice::from_raw_parts(
                        map.ptr().cast::<AtomicUsize>().cast_const(),
                        map.len() / WORD_BYTES,
                    )
                }
            }
            Self::Borrowed(words) => words,
        }
    }

    /// Returns `true` for owned storage.
    #[must_use]
    pub const fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }
}

/// Zeroes `words`, handing whole pages back to the OS where possible.
///
/// Words on partially covered pages are zeroed with atomic stores. If the OS
/// refuses to release the pages they are zeroed the same way.
pub(crate) fn zero_and_release(words: &[AtomicUsize]) {
    let page = sys_alloc::page_size();
    let start = words.as_ptr() as usize;
    let end = start + words.len() * WORD_BYTES;
    let page_start = start.next_multiple_of(page);
    let page_end = end - end % page;

    if page_start >= page_end {
        zero_words(words);
        return;
    }

    let head = (page_start - start) / WORD_BYTES;
    let tail = (page_end - start) / WORD_BYTES;
    zero_words(&words[..head]);
    zero_words(&words[tail..]);

    // SAFETY: `[page_start, page_end)` is page aligned and lies inside `words`,
    // which is backed by a live mapping. Callers hold exclusive access to the range.
    let released = unsafe { sys_alloc::discard(page_start as *mut u8, page_end - page_start) };
    if let Err(_err) = released {
        #[cfg(feature = "tracing")]
        crate::tracing::internal::log_release_failed(page_end - page_start, &_err);
        zero_words(&words[head..tail]);
    }
}

fn zero_words(words: &[AtomicUsize]) {
    for word in words {
        word.store(0, Ordering::Relaxed);
    }
}
