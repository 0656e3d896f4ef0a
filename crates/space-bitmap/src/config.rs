//! Tunables for bitmap reservation and sweeping.

/// Alignment of ordinary heap objects.
pub const OBJECT_ALIGNMENT: usize = 8;

/// Alignment of objects in a large-object space.
pub const LARGE_OBJECT_ALIGNMENT: usize = 4096;

/// Capacity of the address buffer handed to sweep callbacks.
///
/// A batch is flushed once fewer than one word's worth of entries remain
/// free, so no callback ever receives more than this many addresses.
pub const SWEEP_ARRAY_SIZE: usize = 512;

/// Default for [`BitmapConfig::populate`].
pub const DEFAULT_POPULATE: bool = false;
/// Default for [`BitmapConfig::no_reserve`].
pub const DEFAULT_NO_RESERVE: bool = true;

/// Mapping flags used when a bitmap reserves fresh storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapConfig {
    /// Prefault the bitmap's pages at creation.
    pub populate: bool,
    /// Do not reserve swap for the bitmap; large heaps leave most words untouched.
    pub no_reserve: bool,
}

impl Default for BitmapConfig {
    fn default() -> Self {
        Self {
            populate: DEFAULT_POPULATE,
            no_reserve: DEFAULT_NO_RESERVE,
        }
    }
}

const _: () = assert!(SWEEP_ARRAY_SIZE >= 2 * crate::index::BITS_PER_WORD);
