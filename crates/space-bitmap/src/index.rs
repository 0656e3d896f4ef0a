//! Address to bit arithmetic.
//!
//! Every conversion here is a pure function of a byte offset relative to the
//! bitmap's `heap_begin`. Nothing touches storage, so marking and sweeping
//! code can inline them freely.

/// Number of bits in one bitmap word.
pub const BITS_PER_WORD: usize = usize::BITS as usize;

/// Size in bytes of one bitmap word.
pub const WORD_BYTES: usize = std::mem::size_of::<usize>();

/// Bit geometry for a bitmap whose tracked addresses are multiples of `ALIGNMENT`.
///
/// ```
/// use space_bitmap::Geometry;
///
/// type G = Geometry<8>;
/// // One word covers 64 slots of 8 bytes on 64-bit targets.
/// let offset = 8 * 70;
/// assert_eq!(G::offset_to_index(offset), 70 / usize::BITS as usize);
/// assert_eq!(G::offset_bit_index(offset), 70 % usize::BITS as usize);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Geometry<const ALIGNMENT: usize>;

impl<const ALIGNMENT: usize> Geometry<ALIGNMENT> {
    /// Evaluated on first use; rejects alignments that are not a power of two.
    pub const VALID: () = assert!(
        ALIGNMENT.is_power_of_two(),
        "bitmap alignment must be a power of two"
    );

    /// Heap bytes covered by one bitmap word.
    pub const BYTES_PER_WORD: usize = ALIGNMENT * BITS_PER_WORD;

    /// Word index holding the bit for `offset`.
    #[inline]
    #[must_use]
    pub const fn offset_to_index(offset: usize) -> usize {
        offset / ALIGNMENT / BITS_PER_WORD
    }

    /// Heap offset of the first slot covered by word `index`.
    #[inline]
    #[must_use]
    pub const fn index_to_offset(index: usize) -> usize {
        index * ALIGNMENT * BITS_PER_WORD
    }

    /// Bit position within its word of the slot at `offset`.
    #[inline]
    #[must_use]
    pub const fn offset_bit_index(offset: usize) -> usize {
        (offset / ALIGNMENT) % BITS_PER_WORD
    }

    /// Single-bit mask selecting the slot at `offset` within its word.
    #[inline]
    #[must_use]
    pub const fn offset_to_mask(offset: usize) -> usize {
        1 << Self::offset_bit_index(offset)
    }

    /// Bytes of bitmap needed to cover `capacity` heap bytes, rounded up to whole words.
    #[must_use]
    pub const fn compute_bitmap_size(capacity: usize) -> usize {
        capacity.div_ceil(Self::BYTES_PER_WORD) * WORD_BYTES
    }

    /// Heap bytes covered by `bitmap_bytes` of bitmap.
    #[must_use]
    pub const fn compute_heap_size(bitmap_bytes: usize) -> usize {
        bitmap_bytes * 8 * ALIGNMENT
    }

    /// Words and boundary masks covering the slots whose offsets fall in
    /// `[begin_offset, end_offset)`.
    ///
    /// A slot at offset `o` is included iff `begin_offset <= o < end_offset`.
    /// Returns `None` if no slot falls in the range.
    #[inline]
    #[must_use]
    pub const fn word_span(begin_offset: usize, end_offset: usize) -> Option<WordSpan> {
        let first_slot = begin_offset.div_ceil(ALIGNMENT);
        let end_slot = end_offset.div_ceil(ALIGNMENT);
        if first_slot >= end_slot {
            return None;
        }
        let last_slot = end_slot - 1;
        Some(WordSpan {
            first_word: first_slot / BITS_PER_WORD,
            last_word: last_slot / BITS_PER_WORD,
            first_mask: usize::MAX << (first_slot % BITS_PER_WORD),
            last_mask: usize::MAX >> (BITS_PER_WORD - 1 - last_slot % BITS_PER_WORD),
        })
    }
}

/// Inclusive run of bitmap words with the bits to keep in its boundary words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordSpan {
    /// First word touched.
    pub first_word: usize,
    /// Last word touched (inclusive).
    pub last_word: usize,
    /// Bits of `first_word` inside the range.
    pub first_mask: usize,
    /// Bits of `last_word` inside the range.
    pub last_mask: usize,
}

impl WordSpan {
    /// Mask of the in-range bits of word `index`, for `first_word <= index <= last_word`.
    #[inline]
    #[must_use]
    pub const fn mask_for(&self, index: usize) -> usize {
        let mut mask = usize::MAX;
        if index == self.first_word {
            mask &= self.first_mask;
        }
        if index == self.last_word {
            mask &= self.last_mask;
        }
        mask
    }
}

/// Iterator over the positions of the set bits of a word, lowest first.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SetBits(pub(crate) usize);

impl Iterator for SetBits {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        if self.0 == 0 {
            return None;
        }
        let shift = self.0.trailing_zeros() as usize;
        self.0 &= self.0 - 1;
        Some(shift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type G8 = Geometry<8>;
    type G4k = Geometry<4096>;

    #[test]
    fn test_offset_index_round_trip() {
        for index in [0, 1, 2, 17, 1000] {
            let offset = G8::index_to_offset(index);
            assert_eq!(G8::offset_to_index(offset), index);
            assert_eq!(G8::offset_bit_index(offset), 0);
            assert_eq!(G8::offset_to_mask(offset), 1);
        }
    }

    #[test]
    fn test_bit_positions_within_word() {
        for slot in 0..BITS_PER_WORD * 3 {
            let offset = slot * 8;
            assert_eq!(G8::offset_to_index(offset), slot / BITS_PER_WORD);
            assert_eq!(G8::offset_bit_index(offset), slot % BITS_PER_WORD);
            assert_eq!(G8::offset_to_mask(offset), 1 << (slot % BITS_PER_WORD));
            // Interior offsets map to the slot that contains them.
            assert_eq!(G8::offset_bit_index(offset + 7), slot % BITS_PER_WORD);
        }
    }

    #[test]
    fn test_large_alignment() {
        assert_eq!(G4k::BYTES_PER_WORD, 4096 * BITS_PER_WORD);
        assert_eq!(G4k::offset_to_index(4096 * BITS_PER_WORD), 1);
        assert_eq!(G4k::offset_bit_index(4096 * 5), 5);
    }

    #[test]
    fn test_compute_sizes() {
        assert_eq!(G8::compute_bitmap_size(0), 0);
        assert_eq!(G8::compute_bitmap_size(1), WORD_BYTES);
        assert_eq!(G8::compute_bitmap_size(G8::BYTES_PER_WORD), WORD_BYTES);
        assert_eq!(G8::compute_bitmap_size(G8::BYTES_PER_WORD + 8), 2 * WORD_BYTES);
        assert_eq!(G8::compute_heap_size(WORD_BYTES), G8::BYTES_PER_WORD);
        let capacity = 10 * G8::BYTES_PER_WORD;
        assert_eq!(
            G8::compute_heap_size(G8::compute_bitmap_size(capacity)),
            capacity
        );
    }

    #[test]
    fn test_word_span_single_word() {
        let span = G8::word_span(8, 32).unwrap();
        assert_eq!(span.first_word, 0);
        assert_eq!(span.last_word, 0);
        // Slots 1, 2 and 3.
        assert_eq!(span.mask_for(0), 0b1110);
    }

    #[test]
    fn test_word_span_multi_word() {
        let begin = 8 * (BITS_PER_WORD - 1);
        let end = 8 * (2 * BITS_PER_WORD + 1);
        let span = G8::word_span(begin, end).unwrap();
        assert_eq!(span.first_word, 0);
        assert_eq!(span.last_word, 2);
        assert_eq!(span.mask_for(0), 1 << (BITS_PER_WORD - 1));
        assert_eq!(span.mask_for(1), usize::MAX);
        assert_eq!(span.mask_for(2), 1);
    }

    #[test]
    fn test_word_span_word_aligned_end() {
        let span = G8::word_span(0, G8::BYTES_PER_WORD).unwrap();
        assert_eq!(span.last_word, 0);
        assert_eq!(span.mask_for(0), usize::MAX);
    }

    #[test]
    fn test_word_span_unaligned_bounds() {
        // Slot 1 (offset 8) is the first slot at or above 3; slot 2 (offset 16) is below 17.
        let span = G8::word_span(3, 17).unwrap();
        assert_eq!(span.mask_for(0), 0b110);
    }

    #[test]
    fn test_word_span_empty() {
        assert!(G8::word_span(16, 16).is_none());
        assert!(G8::word_span(24, 16).is_none());
        assert!(G8::word_span(9, 16).is_none());
    }

    #[test]
    fn test_set_bits_iteration() {
        let bits: Vec<_> = SetBits(0b1001_0110).collect();
        assert_eq!(bits, vec![1, 2, 4, 7]);
        assert_eq!(SetBits(0).count(), 0);
        assert_eq!(SetBits(usize::MAX).count(), BITS_PER_WORD);
        assert_eq!(SetBits(1 << (BITS_PER_WORD - 1)).next(), Some(BITS_PER_WORD - 1));
    }
}
