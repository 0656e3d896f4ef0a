//! Live/mark difference sweeping.

use std::sync::atomic::Ordering;

use crate::bitmap::SpaceBitmap;
use crate::config::SWEEP_ARRAY_SIZE;
use crate::index::{Geometry, SetBits, BITS_PER_WORD};
use crate::locks::BitmapAccess;

/// Totals from one [`SpaceBitmap::sweep_walk`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Word pairs compared.
    pub words_scanned: usize,
    /// Garbage addresses reported.
    pub objects_swept: usize,
    /// Callback invocations.
    pub batches: usize,
}

impl<const ALIGNMENT: usize> SpaceBitmap<'_, ALIGNMENT> {
    /// Report every slot in `[base, max)` that is set in `live` but clear in `mark`.
    ///
    /// Garbage addresses are gathered in increasing order into a buffer of
    /// [`SWEEP_ARRAY_SIZE`] entries and handed to `callback` in batches, once
    /// whenever the buffer might not fit another word's worth and once at the
    /// end. Each batch is non-empty and no address is reported twice.
    ///
    /// Neither bitmap's bits in the range or heap limit may change during
    /// the call; `access` proves the caller holds the heap guards.
    ///
    /// # Panics
    ///
    /// Panics if either bitmap is invalid, the two differ in heap begin or
    /// size, `base > max`, `base` is below the heap, or `max` lies beyond the
    /// bitmaps' storage.
    pub fn sweep_walk(
        live: &Self,
        mark: &SpaceBitmap<'_, ALIGNMENT>,
        base: usize,
        max: usize,
        _access: &BitmapAccess<'_>,
        mut callback: impl FnMut(&[usize]),
    ) -> SweepStats {
        assert!(live.is_valid(), "sweep of invalid live bitmap");
        assert!(mark.is_valid(), "sweep of invalid mark bitmap");
        assert_eq!(
            live.heap_begin(),
            mark.heap_begin(),
            "{live} and {mark} cover different heaps"
        );
        assert_eq!(live.size(), mark.size(), "{live} and {mark} differ in size");
        assert!(base <= max, "sweep range {base:#x}..{max:#x} is reversed");
        assert!(
            base >= live.heap_begin(),
            "sweep base {base:#x} below heap begin of {live}"
        );

        #[cfg(feature = "tracing")]
        let _span = crate::tracing::internal::trace_sweep_walk(live.name(), base, max);

        let mut stats = SweepStats::default();
        let Some(span) =
            Geometry::<ALIGNMENT>::word_span(base - live.heap_begin(), max - live.heap_begin())
        else {
            return stats;
        };
        let live_words = live.words();
        let mark_words = mark.words();
        assert!(
            span.last_word < live_words.len(),
            "sweep end {max:#x} beyond {live}"
        );

        let mut buffer = Vec::with_capacity(SWEEP_ARRAY_SIZE);
        let mut flush = |buffer: &mut Vec<usize>, stats: &mut SweepStats| {
            #[cfg(feature = "tracing")]
            crate::tracing::internal::log_sweep_batch(buffer.len());
            callback(buffer.as_slice());
            stats.batches += 1;
            stats.objects_swept += buffer.len();
            buffer.clear();
        };

        for index in span.first_word..=span.last_word {
            stats.words_scanned += 1;
            let garbage = live_words[index].load(Ordering::Relaxed)
                & !mark_words[index].load(Ordering::Relaxed)
                & span.mask_for(index);
            if garbage == 0 {
                continue;
            }
            let ptr_base = live.heap_begin() + Geometry::<ALIGNMENT>::index_to_offset(index);
            buffer.extend(SetBits(garbage).map(|shift| ptr_base + shift * ALIGNMENT));
            // Always leave room for a whole word of garbage.
            if buffer.len() > SWEEP_ARRAY_SIZE - BITS_PER_WORD {
                flush(&mut buffer, &mut stats);
            }
        }
        if !buffer.is_empty() {
            flush(&mut buffer, &mut stats);
        }

        #[cfg(feature = "tracing")]
        crate::tracing::internal::log_sweep_end(&stats);

        stats
    }
}
