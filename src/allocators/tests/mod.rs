use self::format::{RecordEntryLayer, SimpleFormatter};

use super::*;
use crate::error::AllocError;
use crate::header::HEADER_SIZE;

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};


/// Routes the current thread's logs through [`SimpleFormatter`], filtered by `RUST_LOG`.
pub(crate) fn init_logging() -> DefaultGuard {
    let subscriber = Registry::default()
        .with(EnvFilter::from_default_env())
        .with(RecordEntryLayer::default())
        .with(
            tracing_subscriber::fmt::layer()
                .event_format(SimpleFormatter)
                .with_test_writer(),
        );
    tracing::subscriber::set_default(subscriber)
}

#[test]
fn test_1() {
    let _guard = init_logging();
    let heap = GlobalAllocator::new();

    let p = heap.allocate(100).unwrap();
    assert_eq!(p.as_ptr() as usize % HEADER_SIZE, 0);
    assert_eq!(heap.bytes_allocated(), 100 + HEADER_SIZE);

    let q = heap.allocate_raw(100).unwrap();
    assert_eq!(q.as_ptr() as usize % global::SYSTEM_ALIGN, 0);
    assert_eq!(heap.bytes_allocated(), 200 + HEADER_SIZE);
    assert_eq!(heap.peak_bytes_allocated(), 200 + HEADER_SIZE);

    unsafe {
        heap.deallocate(p);
        assert_eq!(heap.bytes_allocated(), 100);
        heap.deallocate_raw(q, 100);
    }
    assert_eq!(heap.bytes_allocated(), 0);
    assert_eq!(heap.peak_bytes_allocated(), 200 + HEADER_SIZE);
}

#[test]
fn test_2() {
    let _guard = init_logging();
    let heap = GlobalAllocator::with_config(BudgetConfig {
        allocation_limit: 1024,
        ..Default::default()
    });

    let p = heap.allocate_raw(1000).unwrap();
    assert!(!heap.is_out_of_memory());
    assert_eq!(
        heap.allocate_raw(25),
        Err(AllocError::LimitExceeded {
            requested: 25,
            allocated: 1000,
            limit: 1024
        })
    );
    // A rejected request leaves the counters alone.
    assert_eq!(heap.bytes_allocated(), 1000);

    // 16 + 8 header bytes fit exactly.
    let q = heap.allocate(16).unwrap();
    assert!(heap.is_out_of_memory());
    assert!(heap.allocate(0).is_err());

    unsafe {
        heap.deallocate(q);
        heap.deallocate_raw(p, 1000);
    }
    assert!(!heap.is_out_of_memory());
}

#[test]
fn test_3() {
    let heap = GlobalAllocator::new();
    heap.set_warn_watermark(64);
    assert!(!heap.is_warn_watermark_reached());

    let p = heap.allocate_raw(64).unwrap();
    assert!(heap.is_warn_watermark_reached());
    unsafe { heap.deallocate_raw(p, 64) };
    assert!(!heap.is_warn_watermark_reached());

    assert_eq!(
        heap.config(),
        BudgetConfig {
            allocation_limit: usize::MAX,
            warn_watermark: 64
        }
    );
}

#[test]
fn test_4() {
    let heap = GlobalAllocator::new();
    let z = heap.allocate_raw(0).unwrap();
    assert_eq!(heap.bytes_allocated(), 0);
    unsafe { heap.deallocate_raw(z, 0) };

    // A tracked zero-sized request still carries its header.
    let t = heap.allocate(0).unwrap();
    assert_eq!(heap.bytes_allocated(), HEADER_SIZE);
    unsafe { heap.deallocate(t) };

    let c = heap.allocate_cleared(4096).unwrap();
    let bytes = unsafe { core::slice::from_raw_parts(c.as_ptr(), 4096) };
    assert!(bytes.iter().all(|&b| b == 0));
    unsafe { heap.deallocate(c) };

    let c = heap.allocate_raw_cleared(4096).unwrap();
    let bytes = unsafe { core::slice::from_raw_parts(c.as_ptr(), 4096) };
    assert!(bytes.iter().all(|&b| b == 0));
    unsafe { heap.deallocate_raw(c, 4096) };
    assert_eq!(heap.bytes_allocated(), 0);
}

#[test]
fn test_5() {
    let heap = GlobalAllocator::new();
    assert_eq!(heap.allocate(usize::MAX), Err(AllocError::SizeOverflow));
    assert_eq!(heap.bytes_allocated(), 0);
}

#[test]
fn test_6() {
    let a = GlobalAllocator::shared();
    let b = GlobalAllocator::shared();
    assert!(Rc::ptr_eq(&a, &b));
    assert!(a.is_same_heap(&b));
    assert!(!GlobalAllocator::new().is_same_heap(&GlobalAllocator::new()));
}

// Pool round-trip: random allocate/deallocate sequences keep pointers unique
// and `bytes_allocated` equal to `block_size` times the live count.
#[test]
fn test_7() {
    let _guard = init_logging();
    let mut rng = StdRng::seed_from_u64(7);
    let heap = GlobalAllocator::new();
    let pool = FixedBlockPool::new_in(24, 16, &heap);

    let mut live: Vec<core::ptr::NonNull<u8>> = vec![];
    for _ in 0..10_000 {
        if live.is_empty() || rng.gen_bool(0.6) {
            live.push(pool.allocate().unwrap());
        } else {
            let i = rng.gen_range(0..live.len());
            let p = live.swap_remove(i);
            unsafe { pool.deallocate(p) };
        }
        assert_eq!(pool.bytes_allocated(), pool.block_size() * live.len());
        assert!(pool.bytes_allocated() <= pool.bytes_claimed());
    }

    let unique: HashSet<usize> = live.iter().map(|p| p.as_ptr() as usize).collect();
    assert_eq!(unique.len(), live.len());
    assert_eq!(heap.bytes_allocated(), pool.bytes_claimed());
}

// Compaction soundness: every fully free chunk is returned and nothing else.
#[test]
fn test_8() {
    let heap = GlobalAllocator::new();
    let pool = FixedBlockPool::new_in(8, 8, &heap);
    assert_eq!(pool.bytes_claimed(), 0);

    let blocks: Vec<_> = (0..64).map(|_| pool.allocate().unwrap()).collect();
    assert_eq!(pool.chunk_count(), 8);
    let chunk_size = pool.bytes_claimed() / 8;

    // Free the whole of chunks 1 and 5, and half of chunk 3.
    for (i, &b) in blocks.iter().enumerate() {
        let chunk = i / 8;
        if chunk == 1 || chunk == 5 || (chunk == 3 && i % 2 == 0) {
            unsafe { pool.deallocate(b) };
        }
    }
    let claimed = pool.bytes_claimed();
    assert_eq!(pool.garbage_collect(), 2);
    assert_eq!(pool.bytes_claimed(), claimed - 2 * chunk_size);
    assert_eq!(pool.objects_allocated(), 64 - 20);

    // The four recycled blocks of chunk 3 are still served before any new chunk.
    let recycled: HashSet<usize> = (0..4)
        .map(|_| pool.allocate().unwrap().as_ptr() as usize)
        .collect();
    let expected: HashSet<usize> = (24..32)
        .step_by(2)
        .map(|i| blocks[i].as_ptr() as usize)
        .collect();
    assert_eq!(recycled, expected);
    assert_eq!(pool.chunk_count(), 6);
}

#[test]
fn test_9() {
    let heap = GlobalAllocator::new();
    let small = SmallObjectAllocator::new_in(&heap);
    let pool = FixedBlockPool::new_in(48, 4, &small);

    let blocks: Vec<_> = (0..9).map(|_| pool.allocate().unwrap()).collect();
    // Three chunks of 16 + 4 * 48 = 208 bytes live in the 208-byte bucket.
    assert_eq!(small.bytes_allocated(), 3 * 208);
    assert_eq!(small.page_count(), 1);

    for b in blocks {
        unsafe { pool.deallocate(b) };
    }
    assert_eq!(pool.garbage_collect(), 3);
    assert_eq!(small.bytes_allocated(), 0);
    assert_eq!(small.garbage_collect(), 1);
    assert_eq!(heap.bytes_allocated(), 0);
}

#[test]
fn test_10() {
    let heap = GlobalAllocator::with_config(BudgetConfig {
        allocation_limit: 100,
        warn_watermark: 50,
    });
    let pool = FixedBlockPool::new_in(32, 8, &heap);
    let err = pool.allocate().unwrap_err();
    assert!(err.is_out_of_memory());
    assert_eq!(pool.chunk_count(), 0);
    assert_eq!(pool.objects_allocated(), 0);
}
