use pooled_hash::allocators::{FixedBlockPool, GlobalAllocator, RawHeap};
use pooled_hash::primes::next_prime_at_least;
use pooled_hash::table::{
    HashEngine, OccupancyPolicy, Restricted, Segregated, Unified, INITIAL_CAPACITY, RESIZE_FACTOR,
};

use tracing_subscriber::EnvFilter;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn id(v: &u64) -> u64 {
    *v
}

fn insert<P: OccupancyPolicy<u64>, H: RawHeap>(e: &mut HashEngine<u64, P, H>, k: u64) -> usize {
    let (index, rejected) = e.insert(k, k, |v| *v == k, id).unwrap();
    assert!(rejected.is_none());
    index
}

fn find<P: OccupancyPolicy<u64>, H: RawHeap>(e: &HashEngine<u64, P, H>, k: u64) -> Option<usize> {
    e.find(k, |v| *v == k)
}

fn erase<P: OccupancyPolicy<u64>, H: RawHeap>(e: &mut HashEngine<u64, P, H>, k: u64) {
    let index = find(e, k).unwrap();
    assert_eq!(e.erase(index, id).unwrap(), k);
}

// A: five blocks force a second chunk, and both chunks go back once every block is free.
#[test]
fn scenario_a() {
    init_logging();
    let heap = GlobalAllocator::new();
    let pool = FixedBlockPool::new_in(16, 4, &heap);

    let blocks: Vec<_> = (0..5).map(|_| pool.allocate().unwrap()).collect();
    assert_eq!(pool.chunk_count(), 2);
    assert_eq!(pool.bytes_allocated(), 5 * 16);

    for block in blocks {
        unsafe { pool.deallocate(block) };
    }
    assert_eq!(pool.garbage_collect(), 2);
    assert_eq!(pool.bytes_claimed(), 0);
    assert_eq!(heap.bytes_allocated(), 0);
}

// B: a request for 10 slots gets 19. Thirteen entries fit under the 0.717 load limit, so the
// fourteenth insertion grows the table.
fn scenario_b<P: OccupancyPolicy<u64>>(policy: P) {
    let mut e = HashEngine::with_capacity(10, policy).unwrap();
    assert_eq!(e.capacity(), 19);

    for k in 0..13 {
        insert(&mut e, k);
    }
    assert_eq!(e.capacity(), 19);
    insert(&mut e, 13);
    assert_eq!(e.capacity(), 37);

    assert!((0..14).all(|k| find(&e, k).is_some()));
    assert!((14..50).all(|k| find(&e, k).is_none()));
}

#[test]
fn scenario_b_all_policies() {
    init_logging();
    scenario_b(Unified);
    scenario_b(Segregated);
    scenario_b(Restricted::<u64>::new(u64::MAX, u64::MAX - 1));
}

// C: B starts probing where A was, so it reuses A's tombstone.
fn scenario_c<P: OccupancyPolicy<u64>>(policy: P) {
    const A: u64 = 3;
    const B: u64 = A + 19;

    let mut e = HashEngine::with_capacity(0, policy).unwrap();
    let a = insert(&mut e, A);
    // Enough other entries that erasing A leaves a tombstone instead of shrinking.
    insert(&mut e, 5);
    insert(&mut e, 7);

    erase(&mut e, A);
    assert_eq!(e.tombstones(), 1);

    let b = insert(&mut e, B);
    assert_eq!(b, a);
    assert_eq!(e.tombstones(), 0);
    assert_eq!(find(&e, A), None);
    assert_eq!(find(&e, B), Some(b));
}

#[test]
fn scenario_c_all_policies() {
    scenario_c(Unified);
    scenario_c(Segregated);
    scenario_c(Restricted::<u64>::new(u64::MAX, u64::MAX - 1));
}

// D: erasing below a tenth of the capacity shrinks the table to the size a resize for the
// remaining entries would pick, with no tombstones left.
fn scenario_d<P: OccupancyPolicy<u64>>(policy: P) {
    let heap = GlobalAllocator::new();
    let mut e = HashEngine::new_in(policy, &heap);
    for k in 0..500 {
        insert(&mut e, k);
    }

    let mut shrinks = 0;
    for k in 0..498 {
        let before = e.capacity();
        erase(&mut e, k);
        if e.capacity() < before {
            shrinks += 1;
            let used = e.len();
            assert!((used as f64) < 0.1 * before as f64);
            let wanted = ((used as f64 * RESIZE_FACTOR).ceil() as u64).max(INITIAL_CAPACITY as u64);
            assert_eq!(e.capacity() as u64, next_prime_at_least(wanted).unwrap());
            assert_eq!(e.tombstones(), 0);
        }
        assert!(e.len() + e.tombstones() <= e.capacity());
    }
    assert!(shrinks >= 2, "only {shrinks} shrinks");
    assert_eq!(e.capacity(), INITIAL_CAPACITY);
    assert!(find(&e, 498).is_some() && find(&e, 499).is_some());
}

#[test]
fn scenario_d_all_policies() {
    init_logging();
    scenario_d(Unified);
    scenario_d(Segregated);
    scenario_d(Restricted::<u64>::new(u64::MAX, u64::MAX - 1));
}
