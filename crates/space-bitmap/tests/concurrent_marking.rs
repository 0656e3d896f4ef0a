//! Parallel marking and chunked sweeping.
//!
//! Markers race on a shared mark bitmap without locks while another thread
//! walks the quiescent live bitmap under the heap guards.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::queue::SegQueue;
use space_bitmap::{ContinuousSpaceBitmap, HeapLocks, BITS_PER_WORD};

const BEGIN: usize = 0x5000_0000;
const WORD_SPAN: usize = 8 * BITS_PER_WORD;
const WORKERS: usize = 8;

#[test]
fn test_racing_markers_claim_each_object_once() {
    let capacity = 256 * WORD_SPAN;
    let mark = ContinuousSpaceBitmap::create("mark", BEGIN, capacity);
    let claims = SegQueue::new();

    crossbeam::scope(|s| {
        for _ in 0..WORKERS {
            s.spawn(|_| {
                for addr in (BEGIN..BEGIN + capacity).step_by(8) {
                    if !mark.atomic_test_and_set(addr) {
                        claims.push(addr);
                    }
                }
            });
        }
    })
    .unwrap();

    let mut claimed: Vec<usize> = std::iter::from_fn(|| claims.pop()).collect();
    claimed.sort_unstable();
    let expected: Vec<usize> = (BEGIN..BEGIN + capacity).step_by(8).collect();
    assert_eq!(claimed, expected);
}

#[test]
fn test_interleaved_slots_in_shared_words() {
    // Every worker owns every WORKERS-th slot, so all of them hit every word.
    let capacity = 64 * WORD_SPAN;
    let bitmap = Arc::new(ContinuousSpaceBitmap::create("mark", BEGIN, capacity));
    let slots = capacity / 8;

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let bitmap = Arc::clone(&bitmap);
            thread::spawn(move || {
                for slot in (worker..slots).step_by(WORKERS) {
                    assert!(!bitmap.set(BEGIN + slot * 8));
                }
                // Clear half again; neighbours' bits must survive.
                for slot in (worker..slots).step_by(2 * WORKERS) {
                    assert!(bitmap.clear(BEGIN + slot * 8));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for slot in 0..slots {
        let cleared = slot % (2 * WORKERS) < WORKERS;
        assert_eq!(bitmap.test(BEGIN + slot * 8), !cleared, "slot {slot}");
    }
}

#[test]
fn test_walk_live_while_marking() {
    let capacity = 128 * WORD_SPAN;
    let live = ContinuousSpaceBitmap::create("live", BEGIN, capacity);
    let mark = ContinuousSpaceBitmap::create("mark", BEGIN, capacity);
    for addr in (BEGIN..BEGIN + capacity).step_by(24) {
        live.set(addr);
    }
    let locks = HeapLocks::new();
    let expected = (BEGIN..BEGIN + capacity).step_by(24).count();

    crossbeam::scope(|s| {
        for worker in 0..WORKERS {
            let mark = &mark;
            s.spawn(move |_| {
                for addr in (BEGIN + worker * 48..BEGIN + capacity).step_by(48 * WORKERS) {
                    mark.set(addr);
                }
            });
        }
        s.spawn(|_| {
            let access = locks.shared_access();
            let mut visited = 0;
            let mut last = 0;
            live.walk(&access, |addr| {
                assert!(addr > last);
                last = addr;
                visited += 1;
            });
            assert_eq!(visited, expected);
        });
    })
    .unwrap();

    let access = locks.shared_access();
    let mut marked = 0;
    mark.visit_all_marked(&access, |_| marked += 1);
    assert_eq!(marked, (BEGIN..BEGIN + capacity).step_by(48).count());
}

#[test]
fn test_chunked_parallel_sweep() {
    let chunks = 16;
    let chunk_span = 8 * WORD_SPAN;
    let capacity = chunks * chunk_span;
    let live = ContinuousSpaceBitmap::create("live", BEGIN, capacity);
    let mark = ContinuousSpaceBitmap::create("mark", BEGIN, capacity);
    for addr in (BEGIN..BEGIN + capacity).step_by(8) {
        live.set(addr);
        if (addr / 8) % 3 == 0 {
            mark.set(addr);
        }
    }

    let locks = HeapLocks::new();
    let garbage = SegQueue::new();
    let batches = AtomicUsize::new(0);
    let next_chunk = AtomicUsize::new(0);

    crossbeam::scope(|s| {
        for _ in 0..4 {
            s.spawn(|_| {
                let access = locks.shared_access();
                loop {
                    let chunk = next_chunk.fetch_add(1, Ordering::Relaxed);
                    if chunk >= chunks {
                        break;
                    }
                    let base = BEGIN + chunk * chunk_span;
                    ContinuousSpaceBitmap::sweep_walk(
                        &live,
                        &mark,
                        base,
                        base + chunk_span,
                        &access,
                        |batch| {
                            batches.fetch_add(1, Ordering::Relaxed);
                            for &addr in batch {
                                garbage.push(addr);
                            }
                        },
                    );
                }
            });
        }
    })
    .unwrap();

    let mut swept: Vec<usize> = std::iter::from_fn(|| garbage.pop()).collect();
    swept.sort_unstable();
    let expected: Vec<usize> = (BEGIN..BEGIN + capacity)
        .step_by(8)
        .filter(|addr| (addr / 8) % 3 != 0)
        .collect();
    assert_eq!(swept, expected);
    assert!(batches.load(Ordering::Relaxed) >= chunks);
}
