//! The space bitmap: one bit per `ALIGNMENT`-sized slot of a heap range.
//!
//! A set bit records that the slot holds the base address of an object. A
//! collector keeps two bitmaps per space, a live bitmap from the last
//! completed collection and a mark bitmap filled in by the current one, and
//! sweeps their difference (see [`SpaceBitmap::sweep_walk`]).

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

use sys_alloc::{Mmap, MmapOptions};

use crate::config::BitmapConfig;
use crate::index::{Geometry, WORD_BYTES};
use crate::storage::{self, Storage};

/// Atomic bitmap over the heap range `[heap_begin, heap_limit)`.
///
/// Single-bit operations take `&self` and are lock-free, so any number of
/// marker threads may share one bitmap. Range walks and sweeps require a
/// [`BitmapAccess`](crate::BitmapAccess) token proving the caller holds the
/// heap guards.
///
/// Bitmaps are move-only: [`std::mem::take`] moves the storage out and leaves
/// an invalid bitmap behind, and copying bits requires
/// [`copy_from`](Self::copy_from).
///
/// # Example
///
/// ```
/// use space_bitmap::ContinuousSpaceBitmap;
///
/// let bitmap = ContinuousSpaceBitmap::create("live", 0x1000, 0x100);
/// assert!(bitmap.has_address(0x1008));
/// assert!(!bitmap.set(0x1008));
/// assert!(bitmap.test(0x1008));
/// assert!(bitmap.clear(0x1008));
/// assert!(!bitmap.test(0x1008));
/// ```
pub struct SpaceBitmap<'a, const ALIGNMENT: usize> {
    /// Backing words, owned or borrowed from another bitmap.
    storage: Storage<'a>,
    /// Bytes of storage in use; words past this are outside the bitmap.
    bitmap_size: usize,
    /// Address of the slot tracked by bit 0 of word 0.
    heap_begin: usize,
    /// End of the covered heap range. Need not be on a word boundary.
    heap_limit: usize,
    name: String,
}

impl<const ALIGNMENT: usize> SpaceBitmap<'static, ALIGNMENT> {
    /// Reserve a zeroed bitmap covering `[heap_begin, heap_begin + heap_capacity)`.
    ///
    /// # Panics
    ///
    /// Panics if the storage cannot be reserved. A collector cannot run
    /// without its bitmaps.
    #[must_use]
    pub fn create(name: &str, heap_begin: usize, heap_capacity: usize) -> Self {
        Self::create_with_config(name, heap_begin, heap_capacity, BitmapConfig::default())
    }

    /// Like [`create`](Self::create) with explicit mapping flags.
    ///
    /// # Panics
    ///
    /// Panics if the storage cannot be reserved.
    #[must_use]
    pub fn create_with_config(
        name: &str,
        heap_begin: usize,
        heap_capacity: usize,
        config: BitmapConfig,
    ) -> Self {
        match Self::try_create_with_config(name, heap_begin, heap_capacity, config) {
            Ok(bitmap) => bitmap,
            Err(err) => panic!(
                "failed to allocate bitmap {name} ({} bytes): {err}",
                Geometry::<ALIGNMENT>::compute_bitmap_size(heap_capacity)
            ),
        }
    }

    /// Fallible form of [`create`](Self::create).
    ///
    /// # Errors
    ///
    /// Returns the OS error if the storage cannot be mapped.
    pub fn try_create(name: &str, heap_begin: usize, heap_capacity: usize) -> io::Result<Self> {
        Self::try_create_with_config(name, heap_begin, heap_capacity, BitmapConfig::default())
    }

    /// Fallible form of [`create_with_config`](Self::create_with_config).
    ///
    /// # Errors
    ///
    /// Returns the OS error if the storage cannot be mapped.
    pub fn try_create_with_config(
        name: &str,
        heap_begin: usize,
        heap_capacity: usize,
        config: BitmapConfig,
    ) -> io::Result<Self> {
        let () = Geometry::<ALIGNMENT>::VALID;
        let bitmap_size = Geometry::<ALIGNMENT>::compute_bitmap_size(heap_capacity);
        // Whole pages, and at least one, so an empty heap still maps.
        let map = MmapOptions::new()
            .len(
                bitmap_size
                    .max(WORD_BYTES)
                    .next_multiple_of(sys_alloc::page_size()),
            )
            .populate(config.populate)
            .no_reserve(config.no_reserve)
            .map_anon();
        let map = match map {
            Ok(map) => map,
            Err(err) => {
                #[cfg(feature = "tracing")]
                crate::tracing::internal::log_create_failed(name, bitmap_size, &err);
                return Err(err);
            }
        };
        Ok(Self::create_from_mem_map(name, map, heap_begin, heap_capacity))
    }

    /// Adopt `mem_map` as the bitmap's storage, covering
    /// `[heap_begin, heap_begin + heap_capacity)`.
    ///
    /// The mapping is used as is, without zeroing, and is unmapped when the
    /// bitmap drops.
    ///
    /// # Panics
    ///
    /// Panics if `mem_map` is too small for `heap_capacity` or the range
    /// overflows the address space.
    #[must_use]
    pub fn create_from_mem_map(
        name: &str,
        mem_map: Mmap,
        heap_begin: usize,
        heap_capacity: usize,
    ) -> Self {
        let () = Geometry::<ALIGNMENT>::VALID;
        let bitmap_size = Geometry::<ALIGNMENT>::compute_bitmap_size(heap_capacity);
        assert!(
            mem_map.len() >= bitmap_size,
            "bitmap {name}: mapping of {} bytes cannot hold {bitmap_size} bytes",
            mem_map.len()
        );
        let heap_limit = heap_begin
            .checked_add(heap_capacity)
            .unwrap_or_else(|| panic!("bitmap {name}: heap range overflows"));

        #[cfg(feature = "tracing")]
        crate::tracing::internal::log_created(name, heap_begin, heap_limit, bitmap_size);

        Self {
            storage: Storage::Owned(mem_map),
            bitmap_size,
            heap_begin,
            heap_limit,
            name: name.to_owned(),
        }
    }
}

impl<'a, const ALIGNMENT: usize> SpaceBitmap<'a, ALIGNMENT> {
    /// Borrow this bitmap's storage and range as a new, non-owning bitmap.
    ///
    /// Bits set through either are visible through both. Range changes made
    /// afterwards are not shared.
    #[must_use]
    pub fn view(&self) -> SpaceBitmap<'_, ALIGNMENT> {
        SpaceBitmap {
            storage: Storage::Borrowed(self.storage.words()),
            bitmap_size: self.bitmap_size,
            heap_begin: self.heap_begin,
            heap_limit: self.heap_limit,
            name: self.name.clone(),
        }
    }

    /// Re-point this bitmap at `other`'s storage and range without taking ownership.
    ///
    /// Storage previously owned by `self` is released.
    pub fn copy_view(&mut self, other: &'a SpaceBitmap<'_, ALIGNMENT>) {
        self.storage = Storage::Borrowed(other.storage.words());
        self.bitmap_size = other.bitmap_size;
        self.heap_begin = other.heap_begin;
        self.heap_limit = other.heap_limit;
        self.name.clone_from(&other.name);
    }

    /// Returns `true` if the bitmap has storage.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !matches!(self.storage, Storage::Empty)
    }

    /// Returns `true` if this bitmap owns its storage rather than viewing another's.
    #[must_use]
    pub const fn owns_storage(&self) -> bool {
        self.storage.is_owned()
    }

    /// The storage backing this bitmap.
    #[must_use]
    pub const fn storage(&self) -> &Storage<'a> {
        &self.storage
    }

    /// The words currently in use.
    #[inline]
    #[must_use]
    pub fn words(&self) -> &[AtomicUsize] {
        &self.storage.words()[..self.bitmap_size / WORD_BYTES]
    }

    /// Every reserved word, including those beyond the current heap limit.
    #[inline]
    pub(crate) fn reserved_words(&self) -> &[AtomicUsize] {
        self.storage.words()
    }

    /// Size of the bitmap in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.bitmap_size
    }

    /// Heap bytes spanned by the bitmap's words (a whole number of words).
    #[must_use]
    pub const fn heap_size(&self) -> usize {
        Geometry::<ALIGNMENT>::index_to_offset(self.bitmap_size / WORD_BYTES)
    }

    /// Lowest address the bitmap tracks.
    #[must_use]
    pub const fn heap_begin(&self) -> usize {
        self.heap_begin
    }

    /// Exclusive upper bound of tracked addresses.
    #[must_use]
    pub const fn heap_limit(&self) -> usize {
        self.heap_limit
    }

    /// Name used in diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the bitmap, e.g. after swapping live and mark roles.
    pub fn set_name(&mut self, name: &str) {
        name.clone_into(&mut self.name);
    }

    /// Returns `true` iff `addr` is in `[heap_begin, heap_limit)`, whether or not its bit is set.
    #[inline]
    #[must_use]
    pub fn has_address(&self, addr: usize) -> bool {
        // Below `heap_begin` the subtraction would wrap to a huge offset.
        let Some(offset) = addr.checked_sub(self.heap_begin) else {
            return false;
        };
        addr < self.heap_limit
            && Geometry::<ALIGNMENT>::offset_to_index(offset) < self.bitmap_size / WORD_BYTES
    }

    /// Set the bit for `addr`, returning its previous value.
    ///
    /// # Panics
    ///
    /// `addr` must satisfy [`has_address`](Self::has_address). Addresses past
    /// the reserved storage panic; other violations are only caught in debug builds.
    #[inline]
    pub fn set(&self, addr: usize) -> bool {
        self.modify::<true>(addr)
    }

    /// Clear the bit for `addr`, returning its previous value.
    ///
    /// # Panics
    ///
    /// See [`set`](Self::set).
    #[inline]
    pub fn clear(&self, addr: usize) -> bool {
        self.modify::<false>(addr)
    }

    /// Set the bit for `addr` and report whether it was already set.
    ///
    /// Exactly one of any number of racing callers observes `false`, which
    /// makes this the claim operation for parallel marking.
    ///
    /// # Panics
    ///
    /// See [`set`](Self::set).
    #[inline]
    pub fn atomic_test_and_set(&self, addr: usize) -> bool {
        self.modify::<true>(addr)
    }

    /// Returns `true` if the bit for `addr` is set.
    ///
    /// # Panics
    ///
    /// See [`set`](Self::set).
    #[inline]
    #[must_use]
    pub fn test(&self, addr: usize) -> bool {
        debug_assert!(self.has_address(addr), "{addr:#x} outside {self}");
        let offset = addr.wrapping_sub(self.heap_begin);
        let word = &self.reserved_words()[Geometry::<ALIGNMENT>::offset_to_index(offset)];
        word.load(Ordering::Relaxed) & Geometry::<ALIGNMENT>::offset_to_mask(offset) != 0
    }

    #[inline]
    fn modify<const SET: bool>(&self, addr: usize) -> bool {
        debug_assert!(self.has_address(addr), "{addr:#x} outside {self}");
        debug_assert_eq!(addr % ALIGNMENT, 0, "{addr:#x} is not {ALIGNMENT}-aligned");
        let offset = addr.wrapping_sub(self.heap_begin);
        let mask = Geometry::<ALIGNMENT>::offset_to_mask(offset);
        let word = &self.reserved_words()[Geometry::<ALIGNMENT>::offset_to_index(offset)];

        let mut old = word.load(Ordering::Relaxed);
        loop {
            let was_set = old & mask != 0;
            // Already in the requested state; leave the cache line clean.
            if was_set == SET {
                return was_set;
            }
            let new = if SET { old | mask } else { old & !mask };
            match word.compare_exchange_weak(old, new, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return was_set,
                Err(current) => old = current,
            }
        }
    }

    /// Zero every reserved word and return the pages to the OS.
    pub fn clear_all(&self) {
        storage::zero_and_release(self.reserved_words());

        #[cfg(feature = "tracing")]
        crate::tracing::internal::log_cleared(&self.name, self.bitmap_size);
    }

    /// Clear the bits of every slot in `[begin, end)`.
    ///
    /// Boundary words are cleared bit-exactly; whole words in between are
    /// zeroed and their pages released.
    ///
    /// # Panics
    ///
    /// Panics if `begin < heap_begin` or the range extends past the reserved storage.
    pub fn clear_range(&self, begin: usize, end: usize) {
        debug_assert_eq!(begin % ALIGNMENT, 0, "{begin:#x} is not {ALIGNMENT}-aligned");
        debug_assert_eq!(end % ALIGNMENT, 0, "{end:#x} is not {ALIGNMENT}-aligned");
        assert!(
            begin >= self.heap_begin,
            "{begin:#x} below heap begin of {self}"
        );
        let begin_offset = begin - self.heap_begin;
        let end_offset = end.saturating_sub(self.heap_begin);
        let Some(span) = Geometry::<ALIGNMENT>::word_span(begin_offset, end_offset) else {
            return;
        };
        let words = &self.reserved_words()[span.first_word..=span.last_word];

        if span.first_word == span.last_word {
            words[0].fetch_and(!span.mask_for(span.first_word), Ordering::Relaxed);
        } else {
            let mut full = 0..words.len();
            if span.first_mask != usize::MAX {
                words[0].fetch_and(!span.first_mask, Ordering::Relaxed);
                full.start += 1;
            }
            if span.last_mask != usize::MAX {
                words[words.len() - 1].fetch_and(!span.last_mask, Ordering::Relaxed);
                full.end -= 1;
            }
            storage::zero_and_release(&words[full]);
        }

        #[cfg(feature = "tracing")]
        crate::tracing::internal::log_range_cleared(&self.name, begin, end);
    }

    /// Overwrite this bitmap's words with `source`'s.
    ///
    /// # Panics
    ///
    /// Panics if the bitmaps differ in size.
    pub fn copy_from(&self, source: &SpaceBitmap<'_, ALIGNMENT>) {
        assert_eq!(
            self.size(),
            source.size(),
            "cannot copy {source} into {self}: sizes differ"
        );
        for (dest, src) in self.words().iter().zip(source.words()) {
            dest.store(src.load(Ordering::Relaxed), Ordering::Relaxed);
        }
    }

    /// Move the heap limit to `new_end`, growing or shrinking the bitmap
    /// within its reservation.
    ///
    /// # Panics
    ///
    /// Panics if `new_end < heap_begin` or the new size exceeds the reservation.
    pub fn set_heap_limit(&mut self, new_end: usize) {
        debug_assert_eq!(new_end % ALIGNMENT, 0, "{new_end:#x} is not {ALIGNMENT}-aligned");
        assert!(
            new_end >= self.heap_begin,
            "heap limit {new_end:#x} below heap begin of {self}"
        );
        let new_size = Geometry::<ALIGNMENT>::compute_bitmap_size(new_end - self.heap_begin);
        self.assert_reserved(new_size);
        self.bitmap_size = new_size;
        self.heap_limit = new_end;

        #[cfg(feature = "tracing")]
        crate::tracing::internal::log_resized(&self.name, self.heap_limit, self.bitmap_size);
    }

    /// Resize the covered range to exactly `bytes` from `heap_begin`.
    ///
    /// # Panics
    ///
    /// Panics unless `bytes` is a whole number of bitmap words' coverage
    /// (`ALIGNMENT * usize::BITS`), or if it exceeds the reservation.
    pub fn set_heap_size(&mut self, bytes: usize) {
        let new_size = Geometry::<ALIGNMENT>::offset_to_index(bytes) * WORD_BYTES;
        self.assert_reserved(new_size);
        self.heap_limit = self.heap_begin + bytes;
        self.bitmap_size = new_size;
        assert_eq!(
            self.heap_size(),
            bytes,
            "heap size of {self} does not round-trip"
        );

        #[cfg(feature = "tracing")]
        crate::tracing::internal::log_resized(&self.name, self.heap_limit, self.bitmap_size);
    }

    fn assert_reserved(&self, bitmap_size: usize) {
        let reserved = self.reserved_words().len() * WORD_BYTES;
        assert!(
            bitmap_size <= reserved,
            "{self}: {bitmap_size} bitmap bytes exceed the {reserved} reserved"
        );
    }

    /// Describe the words around `addr`: its offset, word index and mask,
    /// then the two words before its word, the word itself and the one after.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `addr` is outside the bitmap.
    #[must_use]
    pub fn dump_mem_around(&self, addr: usize) -> String {
        debug_assert!(self.has_address(addr), "{addr:#x} outside {self}");
        let offset = addr.wrapping_sub(self.heap_begin);
        let index = Geometry::<ALIGNMENT>::offset_to_index(offset);
        let mask = Geometry::<ALIGNMENT>::offset_to_mask(offset);
        let words = self.words();

        let mut out = format!("offset: {offset} index: {index} mask: {mask:016x} words {{");
        for word in words.iter().take(index + 2).skip(index.saturating_sub(2)) {
            out.push_str(&format!("{:016x} ", word.load(Ordering::Relaxed)));
        }
        out.push('}');
        out
    }
}

impl<const ALIGNMENT: usize> Default for SpaceBitmap<'_, ALIGNMENT> {
    fn default() -> Self {
        Self {
            storage: Storage::Empty,
            bitmap_size: 0,
            heap_begin: 0,
            heap_limit: 0,
            name: String::new(),
        }
    }
}

impl<const ALIGNMENT: usize> fmt::Display for SpaceBitmap<'_, ALIGNMENT> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} begin={:#x},end={:#x}",
            self.name, self.heap_begin, self.heap_limit
        )
    }
}

impl<const ALIGNMENT: usize> fmt::Debug for SpaceBitmap<'_, ALIGNMENT> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpaceBitmap")
            .field("name", &self.name)
            .field("alignment", &ALIGNMENT)
            .field("heap_begin", &format_args!("{:#x}", self.heap_begin))
            .field("heap_limit", &format_args!("{:#x}", self.heap_limit))
            .field("bitmap_size", &self.bitmap_size)
            .field("owned", &self.storage.is_owned())
            .finish()
    }
}
