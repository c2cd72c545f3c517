//! The open-addressing [`HashEngine`] every associative container of the crate is built on.
//!
//! The engine owns a slot array of prime capacity and probes it with double hashing. It knows
//! nothing about keys or hash functions: callers hand it a 64-bit hash plus an equality predicate,
//! and a `hasher` closure for the operations that may move entries to a new array. How a slot
//! records whether it is empty, occupied or a tombstone is up to the [`OccupancyPolicy`].

pub mod policy;

mod iter;


pub use iter::{IntoIter, Iter, IterMut};
pub use policy::{KeyOf, OccupancyPolicy, PairKey, Restricted, Segregated, Unified, WholeValue};

use crate::allocators::{GlobalAllocator, RawHeap};
use crate::error::{AllocError, Result};
use crate::primes::next_prime_at_least;

use core::fmt::Debug;
use core::marker::PhantomData;
use core::mem::{align_of, size_of};
use core::ptr::NonNull;
use std::rc::Rc;

use tracing::{debug, instrument, Level};

/// Inserting past `MAX_LOAD_FACTOR × capacity` entries grows the table.
pub const MAX_LOAD_FACTOR: f64 = 0.717;

/// Erasing below `MIN_LOAD_FACTOR × capacity` entries shrinks the table.
pub const MIN_LOAD_FACTOR: f64 = 0.1;

/// Erasing until `tombstones ≥ MAX_TOMBSTONE_RATIO × (capacity − len)` rebuilds the table in place.
pub const MAX_TOMBSTONE_RATIO: f64 = 0.5;

/// A table resized for `n` entries gets about `RESIZE_FACTOR × n` slots.
pub const RESIZE_FACTOR: f64 = 2.414;

/// The smallest capacity a table is ever allocated with.
pub const INITIAL_CAPACITY: usize = 19;

const PROBE_MULTIPLIER: u64 = 0x9e37_79b9_7f4a_7c15;

/// The double-hashing probe sequence of a hash in a table of prime `capacity`:
/// `h1, h1 + h2, h1 + 2·h2, …` modulo the capacity, visiting every slot exactly once.
#[derive(Clone, Debug)]
struct ProbeSeq {
    index: usize,
    step: usize,
    capacity: usize,
    remaining: usize,
}

impl ProbeSeq {
    #[inline]
    fn new(hash: u64, capacity: usize) -> Self {
        if capacity < 2 {
            return ProbeSeq {
                index: 0,
                step: 1,
                capacity,
                remaining: capacity,
            };
        }
        let m = capacity as u64;
        let h1 = hash % m;
        let h2 = 1 + ((h1 as u128 * PROBE_MULTIPLIER as u128) % (m - 1) as u128) as u64;
        ProbeSeq {
            index: h1 as usize,
            step: h2 as usize,
            capacity,
            remaining: capacity,
        }
    }
}

impl Iterator for ProbeSeq {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let index = self.index;
        let room = self.capacity - index;
        self.index = if self.step >= room {
            self.step - room
        } else {
            index + self.step
        };
        Some(index)
    }
}

/// Rounds `n` up to a prime no smaller than [`INITIAL_CAPACITY`].
fn prime_capacity(n: u64) -> Result<usize> {
    let p = next_prime_at_least(n.max(INITIAL_CAPACITY as u64))?;
    usize::try_from(p).map_err(|_| AllocError::SizeOverflow)
}

/// The capacity a resize for `len` entries targets.
fn sized_for(len: usize) -> Result<usize> {
    prime_capacity((len as f64 * RESIZE_FACTOR).ceil() as u64)
}

fn allocate_table<S, H: RawHeap>(heap: &H, capacity: usize) -> Result<NonNull<S>> {
    if align_of::<S>() > H::ALIGN {
        return Err(AllocError::Unaligned {
            align: align_of::<S>(),
            supported: H::ALIGN,
        });
    }
    let size = capacity
        .checked_mul(size_of::<S>())
        .ok_or(AllocError::SizeOverflow)?;
    Ok(heap.allocate_raw(size)?.cast())
}

/// The first slot on `hash`'s probe sequence that is not occupied.
///
/// # Safety
/// `table` must hold `capacity` slots initialized by `policy`.
unsafe fn find_vacant<T, P: OccupancyPolicy<T>>(
    policy: &P,
    marks: &P::Marks,
    table: NonNull<P::Slot>,
    capacity: usize,
    hash: u64,
) -> usize {
    let vacant = ProbeSeq::new(hash, capacity)
        .find(|&i| !policy.is_occupied(marks, &*table.as_ptr().add(i), i));
    match vacant {
        Some(i) => i,
        None => unreachable!("a table below its load limit has a vacant slot"),
    }
}

/// An open-addressing hash table of `T`s with double-hash probing.
///
/// * `capacity` is 0 before the first allocation and prime afterwards, so that every probe step
///   is coprime with it and a probe sequence reaches every slot.
/// * `len + tombstones ≤ capacity`, and only resizes change the capacity.
/// * Every occupied slot lies at or after [`first_occupied`](Self::first_occupied).
///
/// Operations that may need memory return [`Result`]. Whenever one fails the table is left as it
/// was before the call.
pub struct HashEngine<T, P: OccupancyPolicy<T>, H: RawHeap = Rc<GlobalAllocator>> {
    table: NonNull<P::Slot>,
    capacity: usize,
    used: usize,
    tombstones: usize,
    first_occupied: usize,
    marks: P::Marks,
    policy: P,
    heap: H,
    marker: PhantomData<T>,
}

impl<T, P: OccupancyPolicy<T>> HashEngine<T, P> {
    /// Creates an empty table drawing from the thread's shared budget. Nothing is allocated.
    pub fn new(policy: P) -> Self {
        HashEngine::new_in(policy, GlobalAllocator::shared())
    }

    /// Creates a table with room for at least `capacity` slots (and at least
    /// [`INITIAL_CAPACITY`]), drawing from the thread's shared budget.
    pub fn with_capacity(capacity: usize, policy: P) -> Result<Self> {
        HashEngine::with_capacity_in(capacity, policy, GlobalAllocator::shared())
    }
}

impl<T, P: OccupancyPolicy<T>, H: RawHeap> HashEngine<T, P, H> {
    /// Creates an empty table drawing from `heap`. Nothing is allocated.
    pub fn new_in(policy: P, heap: H) -> Self {
        HashEngine {
            table: NonNull::dangling(),
            capacity: 0,
            used: 0,
            tombstones: 0,
            first_occupied: 0,
            marks: policy.begin_resize(0),
            policy,
            heap,
            marker: PhantomData,
        }
    }

    /// Creates a table of `next_prime_at_least(max(capacity, INITIAL_CAPACITY))` slots.
    pub fn with_capacity_in(capacity: usize, policy: P, heap: H) -> Result<Self> {
        let mut engine = HashEngine::new_in(policy, heap);
        let capacity = prime_capacity(capacity as u64)?;
        // An empty table never calls the hasher.
        engine.resize(capacity, &|_: &T| 0_u64)?;
        Ok(engine)
    }

    /// Number of occupied slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.used
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn tombstones(&self) -> usize {
        self.tombstones
    }

    /// Index of the first occupied slot, or [`capacity`](Self::capacity) if there is none.
    /// Iteration starts here.
    #[inline]
    pub fn first_occupied(&self) -> usize {
        self.first_occupied
    }

    pub fn load_factor(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.used as f64 / self.capacity as f64
        }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn heap(&self) -> &H {
        &self.heap
    }

    #[inline(always)]
    fn slot_ptr(&self, index: usize) -> *mut P::Slot {
        debug_assert!(index < self.capacity);
        unsafe { self.table.as_ptr().add(index) }
    }

    #[inline(always)]
    fn slot(&self, index: usize) -> &P::Slot {
        // Every slot below `capacity` has been initialized by `mark_empty`.
        unsafe { &*self.slot_ptr(index) }
    }

    /// Returns whether the slot at `index` holds a value.
    #[inline]
    pub fn is_occupied(&self, index: usize) -> bool {
        index < self.capacity && self.policy.is_occupied(&self.marks, self.slot(index), index)
    }

    /// Returns the value at `index`, if that slot is occupied.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        if !self.is_occupied(index) {
            return None;
        }
        Some(unsafe { self.policy.value(self.slot(index)) })
    }

    /// Returns the value at `index`, if that slot is occupied.
    /// Whatever the value's equality is based on must not be changed through the reference.
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if !self.is_occupied(index) {
            return None;
        }
        Some(unsafe { self.policy.value_mut(&mut *self.slot_ptr(index)) })
    }

    /// Returns the index of the value that hashes to `hash` and satisfies `eq`.
    ///
    /// Probing stops at the first empty slot and never takes more than `capacity` steps.
    pub fn find(&self, hash: u64, mut eq: impl FnMut(&T) -> bool) -> Option<usize> {
        for i in ProbeSeq::new(hash, self.capacity) {
            let slot = self.slot(i);
            if self.policy.is_empty(&self.marks, slot, i) {
                return None;
            }
            if !self.policy.is_occupied(&self.marks, slot, i) {
                continue;
            }
            if eq(unsafe { self.policy.value(slot) }) {
                return Some(i);
            }
        }
        None
    }

    /// Inserts `value` unless `find(hash, eq)` already locates an equal one.
    ///
    /// Returns the index of the value in the table, and `value` itself when an equal value was
    /// already present (the table is not modified in that case).
    ///
    /// # Errors
    /// Fails if the table needs to grow and no memory is available. `value` is dropped.
    pub fn insert(
        &mut self,
        hash: u64,
        value: T,
        eq: impl FnMut(&T) -> bool,
        hasher: impl Fn(&T) -> u64,
    ) -> Result<(usize, Option<T>)> {
        if let Some(index) = self.find(hash, eq) {
            return Ok((index, Some(value)));
        }
        Ok((self.insert_unique(hash, value, hasher)?, None))
    }

    /// Inserts `value`, which the caller guarantees is not in the table yet, and returns its index.
    ///
    /// Grows the table first if the insertion would push the load factor past
    /// [`MAX_LOAD_FACTOR`]. The value lands in the first empty or tombstone slot of its probe
    /// sequence.
    pub fn insert_unique(
        &mut self,
        hash: u64,
        value: T,
        hasher: impl Fn(&T) -> u64,
    ) -> Result<usize> {
        if self.exceeds_load(self.used + 1) {
            let capacity = sized_for(self.used + 1)?;
            self.resize(capacity, &hasher)?;
        }

        unsafe {
            let index = find_vacant(&self.policy, &self.marks, self.table, self.capacity, hash);
            let slot = &mut *self.slot_ptr(index);
            if self.policy.is_tombstone(&self.marks, slot, index) {
                self.tombstones -= 1;
            }
            self.policy.mark_occupied(&mut self.marks, slot, index, value);
            self.used += 1;
            self.first_occupied = self.first_occupied.min(index);
            Ok(index)
        }
    }

    /// Removes and returns the value at `index`, leaving a tombstone.
    ///
    /// If tombstones now make up half of the free slots, the table is rebuilt at the same
    /// capacity; if the load factor fell below [`MIN_LOAD_FACTOR`], it is rebuilt smaller.
    /// Either way indices obtained before the call are invalidated.
    ///
    /// # Errors
    /// Fails if a rebuild is due and no memory is available. The value stays in the table.
    ///
    /// # Panics
    /// Panics if the slot at `index` is not occupied.
    pub fn erase(&mut self, index: usize, hasher: impl Fn(&T) -> u64) -> Result<T> {
        assert!(self.is_occupied(index), "slot {index} is not occupied");

        let slot = self.slot_ptr(index);
        let value = unsafe { self.policy.mark_tombstone(&mut self.marks, &mut *slot, index) };
        self.used -= 1;
        self.tombstones += 1;

        match self.rehash_target() {
            Some(target) => {
                if let Err(e) = target.and_then(|capacity| self.resize(capacity, &hasher)) {
                    unsafe { self.policy.mark_occupied(&mut self.marks, &mut *slot, index, value) };
                    self.used += 1;
                    self.tombstones -= 1;
                    return Err(e);
                }
            }
            None if index == self.first_occupied => {
                self.first_occupied = self.next_occupied(index + 1);
            }
            None => {}
        }
        Ok(value)
    }

    /// Makes room for `len` entries in total without growing on the way.
    pub fn reserve(&mut self, len: usize, hasher: impl Fn(&T) -> u64) -> Result<()> {
        if self.exceeds_load(len) {
            let capacity = sized_for(len)?;
            self.resize(capacity, &hasher)?;
        }
        Ok(())
    }

    /// Rebuilds the table with at least `capacity` slots, or more if the current entries need
    /// them. Tombstones are purged.
    pub fn rehash(&mut self, capacity: usize, hasher: impl Fn(&T) -> u64) -> Result<()> {
        let needed = (self.used as f64 / MAX_LOAD_FACTOR).ceil() as u64;
        let capacity = prime_capacity(needed.max(capacity as u64))?;
        self.resize(capacity, &hasher)
    }

    /// Shrinks the table to the capacity a resize for the current length would pick, purging
    /// tombstones. An empty table gives its memory back entirely.
    pub fn shrink_to_fit(&mut self, hasher: impl Fn(&T) -> u64) -> Result<()> {
        if self.used == 0 {
            self.release_table();
            return Ok(());
        }
        let capacity = sized_for(self.used)?;
        if capacity < self.capacity || self.tombstones != 0 {
            self.resize(capacity.min(self.capacity), &hasher)?;
        }
        Ok(())
    }

    /// Keeps only the values for which `f` returns `true`.
    ///
    /// The rebuild checks of [`erase`](Self::erase) run once, at the end.
    /// If that rebuild fails the removals still stand.
    pub fn retain(
        &mut self,
        mut f: impl FnMut(&mut T) -> bool,
        hasher: impl Fn(&T) -> u64,
    ) -> Result<()> {
        for i in self.first_occupied..self.capacity {
            unsafe {
                let slot = &mut *self.slot_ptr(i);
                if self.policy.is_occupied(&self.marks, slot, i) && !f(self.policy.value_mut(slot)) {
                    let value = self.policy.mark_tombstone(&mut self.marks, slot, i);
                    self.used -= 1;
                    self.tombstones += 1;
                    drop(value);
                }
            }
        }
        self.first_occupied = self.next_occupied(self.first_occupied);

        match self.rehash_target() {
            Some(target) => self.resize(target?, &hasher),
            None => Ok(()),
        }
    }

    /// Drops every value. The capacity is kept.
    pub fn clear(&mut self) {
        for i in 0..self.capacity {
            let slot = self.slot_ptr(i);
            unsafe {
                self.policy.drop_slot(&self.marks, slot, i);
                self.policy.mark_empty(&mut self.marks, slot, i);
            }
        }
        self.used = 0;
        self.tombstones = 0;
        self.first_occupied = self.capacity;
    }

    /// Iterates over the values in slot order.
    pub fn iter(&self) -> Iter<'_, T, P> {
        Iter::new(
            &self.policy,
            &self.marks,
            self.table,
            self.first_occupied,
            self.capacity,
            self.used,
        )
    }

    /// Iterates over the values in slot order.
    /// Whatever the values' equality is based on must not be changed through the references.
    pub fn iter_mut(&mut self) -> IterMut<'_, T, P> {
        IterMut::new(
            &self.policy,
            &self.marks,
            self.table,
            self.first_occupied,
            self.capacity,
            self.used,
        )
    }

    #[inline]
    fn exceeds_load(&self, len: usize) -> bool {
        len as f64 > MAX_LOAD_FACTOR * self.capacity as f64
    }

    /// The capacity the table should be rebuilt with after removals, if any.
    fn rehash_target(&self) -> Option<Result<usize>> {
        if self.capacity == 0 {
            None
        } else if (self.used as f64) < MIN_LOAD_FACTOR * self.capacity as f64 {
            Some(sized_for(self.used))
        } else if self.tombstones as f64 >= MAX_TOMBSTONE_RATIO * (self.capacity - self.used) as f64
        {
            Some(Ok(self.capacity))
        } else {
            None
        }
    }

    fn next_occupied(&self, from: usize) -> usize {
        (from..self.capacity)
            .find(|&i| self.policy.is_occupied(&self.marks, self.slot(i), i))
            .unwrap_or(self.capacity)
    }

    /// Moves every value into a new array of `capacity` slots, dropping the tombstones.
    /// Nothing changes if the new array cannot be allocated.
    #[instrument(
        level = "debug",
        skip(self, hasher),
        fields(from = self.capacity, len = self.used, tombstones = self.tombstones),
        err(Debug, level = Level::ERROR)
    )]
    fn resize(&mut self, capacity: usize, hasher: &impl Fn(&T) -> u64) -> Result<()> {
        debug_assert!(capacity > self.used);

        let table = allocate_table::<P::Slot, H>(&self.heap, capacity)?;
        let mut marks = self.policy.begin_resize(capacity);
        for i in 0..capacity {
            unsafe { self.policy.mark_empty(&mut marks, table.as_ptr().add(i), i) };
        }

        let mut first_occupied = capacity;
        for i in self.first_occupied..self.capacity {
            unsafe {
                let slot = &mut *self.slot_ptr(i);
                if !self.policy.is_occupied(&self.marks, slot, i) {
                    continue;
                }
                let value = self.policy.take(&mut self.marks, slot, i);
                let j = find_vacant(&self.policy, &marks, table, capacity, hasher(&value));
                self.policy
                    .mark_occupied(&mut marks, &mut *table.as_ptr().add(j), j, value);
                first_occupied = first_occupied.min(j);
            }
        }

        self.drop_table();
        self.table = table;
        self.capacity = capacity;
        self.tombstones = 0;
        self.first_occupied = first_occupied;
        self.policy.end_resize(&mut self.marks, marks);
        debug!(capacity, "Table resized.");
        Ok(())
    }

    /// Drops every slot and returns the array to the heap. The fields are left stale.
    fn drop_table(&mut self) {
        if self.capacity == 0 {
            return;
        }
        for i in 0..self.capacity {
            unsafe { self.policy.drop_slot(&self.marks, self.slot_ptr(i), i) };
        }
        let size = self.capacity * size_of::<P::Slot>();
        unsafe { self.heap.deallocate_raw(self.table.cast(), size) };
    }

    /// Frees the array and returns to the unallocated state.
    fn release_table(&mut self) {
        self.drop_table();
        self.table = NonNull::dangling();
        self.capacity = 0;
        self.used = 0;
        self.tombstones = 0;
        self.first_occupied = 0;
        let marks = self.policy.begin_resize(0);
        self.policy.end_resize(&mut self.marks, marks);
    }
}

impl<T: Clone, X: KeyOf<T>, H: RawHeap> HashEngine<T, Restricted<T, X>, H> {
    /// Changes the tombstone sentinel, rewriting every tombstone slot. O(capacity).
    ///
    /// The new sentinel must not equal the empty sentinel or any stored value; what happens
    /// otherwise is unspecified.
    pub fn set_tombstone_value(&mut self, tombstone: T) {
        for i in 0..self.capacity {
            let slot = unsafe { &mut *self.slot_ptr(i) };
            if self.policy.is_tombstone(&(), slot, i) {
                *slot = tombstone.clone();
            }
        }
        self.policy.replace_tombstone_value(tombstone);
    }

    /// Changes the empty sentinel, rewriting every empty slot. O(capacity).
    ///
    /// The new sentinel must not equal the tombstone sentinel or any stored value; what happens
    /// otherwise is unspecified.
    pub fn set_empty_value(&mut self, empty: T) {
        for i in 0..self.capacity {
            let slot = unsafe { &mut *self.slot_ptr(i) };
            if self.policy.is_empty(&(), slot, i) {
                *slot = empty.clone();
            }
        }
        self.policy.replace_empty_value(empty);
    }
}

impl<T, P: OccupancyPolicy<T>, H: RawHeap> Drop for HashEngine<T, P, H> {
    fn drop(&mut self) {
        self.drop_table();
    }
}

impl<T, P: OccupancyPolicy<T>, H: RawHeap> Debug for HashEngine<T, P, H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HashEngine")
            .field("capacity", &self.capacity)
            .field("len", &self.used)
            .field("tombstones", &self.tombstones)
            .field("first_occupied", &self.first_occupied)
            .finish()
    }
}

impl<'a, T, P: OccupancyPolicy<T>, H: RawHeap> IntoIterator for &'a HashEngine<T, P, H> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T, P>;

    fn into_iter(self) -> Iter<'a, T, P> {
        self.iter()
    }
}

impl<T, P: OccupancyPolicy<T>, H: RawHeap> IntoIterator for HashEngine<T, P, H> {
    type Item = T;
    type IntoIter = IntoIter<T, P, H>;

    fn into_iter(self) -> IntoIter<T, P, H> {
        IntoIter::new(self)
    }
}
