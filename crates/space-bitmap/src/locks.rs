//! Heap guards required around bitmap walks and sweeps.
//!
//! The bitmap never takes these locks itself. Walks, visits and sweeps instead
//! take a [`BitmapAccess`] token, which can only be obtained from a
//! [`HeapLocks`] while its guards are held.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// The two locks a collector holds around range operations on its bitmaps.
///
/// - the heap-bitmap lock protects bitmap bits and heap limits;
/// - the heap-pause lock is held shared by anything that needs mutators to
///   stay out of the heap (a stop-the-world pause holds it for the duration).
#[derive(Debug, Default)]
pub struct HeapLocks {
    heap_bitmap: RwLock<()>,
    heap_pause: RwLock<()>,
}

impl HeapLocks {
    /// Create an unlocked pair of guards.
    #[must_use]
    pub fn new() -> Self {
        Self {
            heap_bitmap: RwLock::new(()),
            heap_pause: RwLock::new(()),
        }
    }

    /// Hold both locks shared.
    ///
    /// Sufficient for walks and visits of a bitmap nobody is mutating.
    pub fn shared_access(&self) -> BitmapAccess<'_> {
        let pause = self.heap_pause.read();
        let bitmap = self.heap_bitmap.read();
        BitmapAccess {
            bitmap: BitmapGuard::Shared(bitmap),
            _pause: pause,
        }
    }

    /// Hold the bitmap lock exclusively and the pause lock shared.
    ///
    /// Used by sweepers and anything that swaps or clears bitmaps.
    pub fn exclusive_access(&self) -> BitmapAccess<'_> {
        let pause = self.heap_pause.read();
        let bitmap = self.heap_bitmap.write();
        BitmapAccess {
            bitmap: BitmapGuard::Exclusive(bitmap),
            _pause: pause,
        }
    }

    /// Stop mutators: hold the pause lock exclusively.
    ///
    /// No [`BitmapAccess`] can be created while the returned guard is alive.
    pub fn pause(&self) -> RwLockWriteGuard<'_, ()> {
        self.heap_pause.write()
    }
}

#[derive(Debug)]
enum BitmapGuard<'a> {
    Shared(RwLockReadGuard<'a, ()>),
    Exclusive(RwLockWriteGuard<'a, ()>),
}

/// Proof that the caller holds the heap-bitmap and heap-pause guards.
///
/// Dropping the token releases both.
#[derive(Debug)]
pub struct BitmapAccess<'a> {
    bitmap: BitmapGuard<'a>,
    _pause: RwLockReadGuard<'a, ()>,
}

impl BitmapAccess<'_> {
    /// Returns `true` if the heap-bitmap lock is held exclusively.
    #[must_use]
    pub const fn is_exclusive(&self) -> bool {
        matches!(self.bitmap, BitmapGuard::Exclusive(_))
    }
}

#[cfg(test)]
mod tests {
    use super::HeapLocks;

    #[test]
    fn test_shared_access_is_reentrant_across_holders() {
        let locks = HeapLocks::new();
        let a = locks.shared_access();
        let b = locks.shared_access();
        assert!(!a.is_exclusive());
        assert!(!b.is_exclusive());
    }

    #[test]
    fn test_exclusive_access_excludes_shared() {
        let locks = HeapLocks::new();
        let access = locks.exclusive_access();
        assert!(access.is_exclusive());
        assert!(locks.heap_bitmap.try_read().is_none());
        drop(access);
        assert!(locks.heap_bitmap.try_read().is_some());
    }

    #[test]
    fn test_pause_blocks_access() {
        let locks = HeapLocks::new();
        let pause = locks.pause();
        assert!(locks.heap_pause.try_read().is_none());
        drop(pause);
        let _access = locks.shared_access();
        assert!(locks.heap_pause.try_write().is_none());
    }
}
