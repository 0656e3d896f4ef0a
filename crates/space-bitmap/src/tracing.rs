//! Bitmap tracing support.
//!
//! When the `tracing` feature is enabled, this module provides structured
//! events for bitmap lifecycle changes and sweeps.

#[cfg(feature = "tracing")]
pub mod internal {
    use tracing::{span, Level};

    use crate::sweep::SweepStats;

    /// Log a freshly reserved or adopted bitmap.
    pub fn log_created(name: &str, heap_begin: usize, heap_limit: usize, bitmap_bytes: usize) {
        tracing::debug!(
            bitmap = name,
            heap_begin,
            heap_limit,
            bitmap_bytes,
            "bitmap_created"
        );
    }

    /// Log a reservation failure. The caller decides whether it is fatal.
    pub fn log_create_failed(name: &str, bitmap_bytes: usize, err: &std::io::Error) {
        tracing::error!(bitmap = name, bitmap_bytes, error = %err, "bitmap_reservation_failed");
    }

    /// Log a change of covered range.
    pub fn log_resized(name: &str, heap_limit: usize, bitmap_bytes: usize) {
        tracing::debug!(
            bitmap = name,
            heap_limit,
            bitmap_bytes,
            "bitmap_resized"
        );
    }

    /// Log a full clear.
    pub fn log_cleared(name: &str, bitmap_bytes: usize) {
        tracing::debug!(bitmap = name, bitmap_bytes, "bitmap_cleared");
    }

    /// Log a partial clear.
    pub fn log_range_cleared(name: &str, begin: usize, end: usize) {
        tracing::trace!(
            bitmap = name,
            begin,
            end,
            "bitmap_range_cleared"
        );
    }

    /// Log pages the OS refused to release.
    pub fn log_release_failed(bytes: usize, err: &std::io::Error) {
        tracing::warn!(bytes, error = %err, "page_release_failed");
    }

    /// Create a span for one sweep walk.
    pub fn trace_sweep_walk(name: &str, base: usize, max: usize) -> span::EnteredSpan {
        span!(
            Level::DEBUG,
            "sweep_walk",
            bitmap = name,
            base,
            max
        )
        .entered()
    }

    /// Log a batch handed to the sweep callback.
    pub fn log_sweep_batch(len: usize) {
        tracing::trace!(len, "sweep_batch");
    }

    /// Log the totals of a finished sweep.
    pub fn log_sweep_end(stats: &SweepStats) {
        tracing::debug!(
            words_scanned = stats.words_scanned,
            objects_swept = stats.objects_swept,
            batches = stats.batches,
            "sweep_end"
        );
    }
}
