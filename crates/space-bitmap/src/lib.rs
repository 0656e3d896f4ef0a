//! Accounting bitmaps for mark-sweep garbage collectors.
//!
//! A [`SpaceBitmap`] keeps one bit per `ALIGNMENT`-sized slot of a heap range,
//! recording which slots hold the start of an object. It never looks at heap
//! memory. A collector typically keeps two per space:
//!
//! - a **live** bitmap describing the heap after the last collection;
//! - a **mark** bitmap filled in by the marker threads of the current one.
//!
//! Slots set in the live bitmap but not in the mark bitmap are garbage, and
//! [`SpaceBitmap::sweep_walk`] enumerates them in batches.
//!
//! # Concurrency
//!
//! Bit operations ([`set`](SpaceBitmap::set), [`clear`](SpaceBitmap::clear),
//! [`atomic_test_and_set`](SpaceBitmap::atomic_test_and_set),
//! [`test`](SpaceBitmap::test)) are lock-free and may be called from any
//! number of threads. Range walks and sweeps require a [`BitmapAccess`]
//! token from [`HeapLocks`], so they cannot be called without holding the
//! heap guards.
//!
//! # Example
//!
//! ```
//! use space_bitmap::{ContinuousSpaceBitmap, HeapLocks};
//!
//! let live = ContinuousSpaceBitmap::create("live", 0x1000, 0x100);
//! let mark = ContinuousSpaceBitmap::create("mark", 0x1000, 0x100);
//! for addr in [0x1000, 0x1010, 0x1020] {
//!     live.set(addr);
//! }
//! mark.set(0x1010);
//!
//! let locks = HeapLocks::new();
//! let access = locks.exclusive_access();
//! let mut garbage = Vec::new();
//! ContinuousSpaceBitmap::sweep_walk(&live, &mark, 0x1000, 0x1030, &access, |batch| {
//!     garbage.extend_from_slice(batch);
//! });
//! assert_eq!(garbage, [0x1000, 0x1020]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod bitmap;
mod config;
mod index;
mod locks;
mod storage;
mod sweep;
mod tracing;
mod visit;

pub use bitmap::SpaceBitmap;
pub use config::{
    BitmapConfig, DEFAULT_NO_RESERVE, DEFAULT_POPULATE, LARGE_OBJECT_ALIGNMENT, OBJECT_ALIGNMENT,
    SWEEP_ARRAY_SIZE,
};
pub use index::{Geometry, WordSpan, BITS_PER_WORD, WORD_BYTES};
pub use locks::{BitmapAccess, HeapLocks};
pub use storage::Storage;
pub use sweep::SweepStats;

/// Bitmap for ordinary objects, one bit per [`OBJECT_ALIGNMENT`] bytes.
pub type ContinuousSpaceBitmap<'a> = SpaceBitmap<'a, OBJECT_ALIGNMENT>;

/// Bitmap for a large-object space, one bit per [`LARGE_OBJECT_ALIGNMENT`] bytes.
pub type LargeObjectBitmap<'a> = SpaceBitmap<'a, LARGE_OBJECT_ALIGNMENT>;
