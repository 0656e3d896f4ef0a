//! Range enumeration over a bitmap.
//!
//! Marked-range visits scan whole words and peel set bits off with
//! `trailing_zeros`, so cost is proportional to words scanned plus objects
//! found rather than to slots covered.

use std::sync::atomic::Ordering;

use crate::bitmap::SpaceBitmap;
use crate::index::{Geometry, SetBits, BITS_PER_WORD};
use crate::locks::BitmapAccess;

impl<const ALIGNMENT: usize> SpaceBitmap<'_, ALIGNMENT> {
    /// Call `visitor` on every `ALIGNMENT`-stepped address in `[visit_begin, visit_end)`,
    /// regardless of its bit.
    ///
    /// For callers that already know the range is densely populated.
    pub fn visit_range(&self, visit_begin: usize, visit_end: usize, mut visitor: impl FnMut(usize)) {
        let mut addr = visit_begin;
        while addr < visit_end {
            visitor(addr);
            addr += ALIGNMENT;
        }
    }

    /// Call `visitor` on the address of every set bit in `[visit_begin, visit_end)`,
    /// in increasing address order.
    ///
    /// `visitor` must not change bits or the heap limit of this bitmap.
    ///
    /// # Panics
    ///
    /// Panics if `visit_begin < heap_begin` or the range runs past the
    /// reserved storage.
    pub fn visit_marked_range(
        &self,
        visit_begin: usize,
        visit_end: usize,
        _access: &BitmapAccess<'_>,
        mut visitor: impl FnMut(usize),
    ) {
        self.scan_marked::<false>(visit_begin, visit_end, &mut visitor);
    }

    /// Like [`visit_marked_range`](Self::visit_marked_range) but stops after the
    /// first set bit. Returns `true` if `visitor` was called.
    ///
    /// # Panics
    ///
    /// See [`visit_marked_range`](Self::visit_marked_range).
    pub fn visit_marked_range_once(
        &self,
        visit_begin: usize,
        visit_end: usize,
        _access: &BitmapAccess<'_>,
        mut visitor: impl FnMut(usize),
    ) -> bool {
        self.scan_marked::<true>(visit_begin, visit_end, &mut visitor)
    }

    /// Visit every set bit in `[heap_begin, heap_limit)`.
    pub fn visit_all_marked(&self, access: &BitmapAccess<'_>, visitor: impl FnMut(usize)) {
        self.visit_marked_range(self.heap_begin(), self.heap_limit(), access, visitor);
    }

    /// Visit set bits in increasing address order.
    ///
    /// `visitor` must not change bits or the heap limit during the traversal.
    ///
    /// # Panics
    ///
    /// Panics if the bitmap is invalid.
    pub fn walk(&self, access: &BitmapAccess<'_>, visitor: impl FnMut(usize)) {
        assert!(self.is_valid(), "walk of invalid bitmap {self}");
        self.visit_all_marked(access, visitor);
    }

    fn scan_marked<const VISIT_ONCE: bool>(
        &self,
        visit_begin: usize,
        visit_end: usize,
        visitor: &mut impl FnMut(usize),
    ) -> bool {
        assert!(
            visit_begin >= self.heap_begin(),
            "{visit_begin:#x} below heap begin of {self}"
        );
        let begin_offset = visit_begin - self.heap_begin();
        let end_offset = visit_end.saturating_sub(self.heap_begin());
        let Some(span) = Geometry::<ALIGNMENT>::word_span(begin_offset, end_offset) else {
            return false;
        };

        let words = &self.reserved_words()[span.first_word..=span.last_word];
        for (index, word) in (span.first_word..).zip(words) {
            let bits = word.load(Ordering::Relaxed) & span.mask_for(index);
            if bits == 0 {
                continue;
            }
            let base = self.heap_begin() + Geometry::<ALIGNMENT>::index_to_offset(index);
            for shift in SetBits(bits) {
                visitor(base + shift * ALIGNMENT);
                if VISIT_ONCE {
                    return true;
                }
            }
        }
        false
    }

    /// Highest set slot at or below `visit_begin`, searching down to `heap_begin`.
    #[must_use]
    pub fn find_preceding_object(&self, visit_begin: usize) -> Option<usize> {
        self.find_preceding_object_in(visit_begin, self.heap_begin())
    }

    /// Highest set slot in `[visit_end, visit_begin]`, scanning backwards from `visit_begin`.
    ///
    /// Locates the object containing an interior address.
    ///
    /// # Panics
    ///
    /// Panics if `visit_begin` lies past the reserved storage.
    #[must_use]
    pub fn find_preceding_object_in(&self, visit_begin: usize, visit_end: usize) -> Option<usize> {
        let lowest = visit_end.max(self.heap_begin());
        if visit_begin < lowest {
            return None;
        }
        let hi_slot = (visit_begin - self.heap_begin()) / ALIGNMENT;
        let lo_slot = (lowest - self.heap_begin()).div_ceil(ALIGNMENT);
        if lo_slot > hi_slot {
            return None;
        }

        let words = self.reserved_words();
        let lo_word = lo_slot / BITS_PER_WORD;
        let mut index = hi_slot / BITS_PER_WORD;
        // Keep bits at or below `hi_slot`.
        let mut bits = words[index].load(Ordering::Relaxed)
            & (usize::MAX >> (BITS_PER_WORD - 1 - hi_slot % BITS_PER_WORD));
        loop {
            if index == lo_word {
                bits &= usize::MAX << (lo_slot % BITS_PER_WORD);
            }
            if bits != 0 {
                let shift = BITS_PER_WORD - 1 - bits.leading_zeros() as usize;
                let base = self.heap_begin() + Geometry::<ALIGNMENT>::index_to_offset(index);
                return Some(base + shift * ALIGNMENT);
            }
            if index == lo_word {
                return None;
            }
            index -= 1;
            bits = words[index].load(Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use crate::index::BITS_PER_WORD;
    use crate::{HeapLocks, SpaceBitmap};

    type Bitmap = SpaceBitmap<'static, 8>;

    const BEGIN: usize = 0x4000_0000;
    const WORD_SPAN: usize = 8 * BITS_PER_WORD;

    fn marked(bitmap: &Bitmap, begin: usize, end: usize) -> Vec<usize> {
        let locks = HeapLocks::new();
        let access = locks.shared_access();
        let mut seen = Vec::new();
        bitmap.visit_marked_range(begin, end, &access, |addr| seen.push(addr));
        seen
    }

    #[test]
    fn test_visit_range_unconditional() {
        let bitmap = Bitmap::create("live", BEGIN, 0x100);
        let mut seen = Vec::new();
        bitmap.visit_range(BEGIN + 0x10, BEGIN + 0x30, |addr| seen.push(addr));
        assert_eq!(seen, vec![BEGIN + 0x10, BEGIN + 0x18, BEGIN + 0x20, BEGIN + 0x28]);

        let mut count = 0;
        bitmap.visit_range(BEGIN + 0x30, BEGIN + 0x30, |_| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_visit_marked_range_masks_boundaries() {
        let bitmap = Bitmap::create("live", BEGIN, 4 * WORD_SPAN);
        let addrs = [
            BEGIN,
            BEGIN + 8,
            BEGIN + WORD_SPAN - 8,
            BEGIN + WORD_SPAN,
            BEGIN + 2 * WORD_SPAN + 16,
            BEGIN + 3 * WORD_SPAN - 8,
        ];
        for addr in addrs {
            bitmap.set(addr);
        }

        assert_eq!(marked(&bitmap, BEGIN, BEGIN + 4 * WORD_SPAN), addrs);
        // Begin inside word 0, end inside word 2.
        assert_eq!(
            marked(&bitmap, BEGIN + 8, BEGIN + 2 * WORD_SPAN + 16),
            vec![BEGIN + 8, BEGIN + WORD_SPAN - 8, BEGIN + WORD_SPAN]
        );
        // End is exclusive, begin inclusive.
        assert_eq!(
            marked(&bitmap, BEGIN + 2 * WORD_SPAN + 16, BEGIN + 2 * WORD_SPAN + 24),
            vec![BEGIN + 2 * WORD_SPAN + 16]
        );
        assert!(marked(&bitmap, BEGIN + 16, BEGIN + WORD_SPAN - 8).is_empty());
        assert!(marked(&bitmap, BEGIN + 8, BEGIN + 8).is_empty());
    }

    #[test]
    fn test_visit_marked_range_once() {
        let bitmap = Bitmap::create("live", BEGIN, 4 * WORD_SPAN);
        bitmap.set(BEGIN + WORD_SPAN + 40);
        bitmap.set(BEGIN + 2 * WORD_SPAN);

        let locks = HeapLocks::new();
        let access = locks.shared_access();
        let mut seen = Vec::new();
        let visited =
            bitmap.visit_marked_range_once(BEGIN, BEGIN + 4 * WORD_SPAN, &access, |a| seen.push(a));
        assert!(visited);
        assert_eq!(seen, vec![BEGIN + WORD_SPAN + 40]);

        let visited = bitmap.visit_marked_range_once(BEGIN, BEGIN + WORD_SPAN, &access, |_| {
            panic!("nothing is marked here")
        });
        assert!(!visited);
    }

    #[test]
    fn test_visit_all_marked_full_word() {
        let bitmap = Bitmap::create("live", BEGIN, 2 * WORD_SPAN);
        for addr in (BEGIN..BEGIN + 2 * WORD_SPAN).step_by(8) {
            bitmap.set(addr);
        }
        let locks = HeapLocks::new();
        let access = locks.shared_access();
        let mut count = 0;
        let mut last = None;
        bitmap.visit_all_marked(&access, |addr| {
            assert!(last.is_none_or(|prev| prev < addr));
            last = Some(addr);
            count += 1;
        });
        assert_eq!(count, 2 * BITS_PER_WORD);
    }

    #[test]
    fn test_walk_stops_at_heap_limit() {
        // The limit falls inside word 0; a stray bit past it is not reported.
        let bitmap = Bitmap::create("live", BEGIN, 0x40);
        bitmap.set(BEGIN + 0x38);
        bitmap.words()[0].fetch_or(1 << 8, Ordering::Relaxed);
        let locks = HeapLocks::new();
        let access = locks.shared_access();
        let mut seen = Vec::new();
        bitmap.walk(&access, |addr| seen.push(addr));
        assert_eq!(seen, vec![BEGIN + 0x38]);
    }

    #[test]
    fn test_find_preceding_object() {
        let bitmap = Bitmap::create("live", BEGIN, 4 * WORD_SPAN);
        assert_eq!(bitmap.find_preceding_object(BEGIN + 3 * WORD_SPAN), None);

        bitmap.set(BEGIN + 16);
        bitmap.set(BEGIN + WORD_SPAN + 8);

        // Inclusive of visit_begin.
        assert_eq!(
            bitmap.find_preceding_object(BEGIN + WORD_SPAN + 8),
            Some(BEGIN + WORD_SPAN + 8)
        );
        // Crosses a zero word on the way down.
        assert_eq!(
            bitmap.find_preceding_object(BEGIN + 3 * WORD_SPAN),
            Some(BEGIN + WORD_SPAN + 8)
        );
        // Interior address of the object at BEGIN + 16.
        assert_eq!(bitmap.find_preceding_object(BEGIN + WORD_SPAN), Some(BEGIN + 16));
        assert_eq!(bitmap.find_preceding_object(BEGIN + 8), None);
    }

    #[test]
    fn test_find_preceding_object_respects_visit_end() {
        let bitmap = Bitmap::create("live", BEGIN, 4 * WORD_SPAN);
        bitmap.set(BEGIN + 16);
        bitmap.set(BEGIN + WORD_SPAN - 8);

        assert_eq!(
            bitmap.find_preceding_object_in(BEGIN + 2 * WORD_SPAN, BEGIN + 24),
            Some(BEGIN + WORD_SPAN - 8)
        );
        assert_eq!(bitmap.find_preceding_object_in(BEGIN + WORD_SPAN - 16, BEGIN + 24), None);
        // Inclusive of visit_end.
        assert_eq!(bitmap.find_preceding_object_in(BEGIN + 40, BEGIN + 16), Some(BEGIN + 16));
        assert_eq!(bitmap.find_preceding_object_in(BEGIN + 8, BEGIN + 16), None);
    }

    #[test]
    fn test_find_preceding_object_top_bit() {
        let bitmap = Bitmap::create("live", BEGIN, 2 * WORD_SPAN);
        let top = BEGIN + WORD_SPAN - 8;
        bitmap.set(top);
        assert_eq!(bitmap.find_preceding_object(top), Some(top));
        assert_eq!(bitmap.find_preceding_object(BEGIN + 2 * WORD_SPAN - 8), Some(top));
    }
}
