//! Occupancy policies: how a [`HashEngine`](super::HashEngine) knows whether a slot is empty,
//! occupied or a tombstone.
//!
//! | Policy         | State storage                | Value restriction                          |
//! |----------------|------------------------------|--------------------------------------------|
//! | [`Unified`]    | a status byte in every slot  | none                                       |
//! | [`Segregated`] | two bitsets beside the table | none                                       |
//! | [`Restricted`] | two sentinel values          | no real value may equal either sentinel    |

use core::fmt::Debug;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr;

/// The occupancy contract the hash engine is written against.
///
/// Every method receives the policy's side state (`marks`), the slot, and the slot's index, so a
/// policy may keep its state in the slot, beside the table, or nowhere at all.
///
/// A slot moves through three states. [`mark_empty`](Self::mark_empty) initializes a freshly
/// allocated slot as empty, [`mark_occupied`](Self::mark_occupied) stores a value in an empty or
/// tombstone slot, and [`mark_tombstone`](Self::mark_tombstone) moves the value back out and
/// leaves a tombstone.
///
/// # Safety
/// The engine reads values out of slots that the policy reports as occupied, so implementors
/// must report a slot as occupied exactly when it holds a value stored by `mark_occupied` and not
/// yet moved out. Exactly one of `is_empty`, `is_tombstone`, `is_occupied` must hold for an
/// initialized slot.
pub unsafe trait OccupancyPolicy<T> {
    /// What the table stores per slot.
    type Slot;
    /// Side state kept beside the table.
    type Marks;

    /// Creates side state for a table of `capacity` slots. Called before the new table is filled.
    fn begin_resize(&self, capacity: usize) -> Self::Marks;

    /// Swaps the side state built by [`begin_resize`](Self::begin_resize) in, once every entry has
    /// moved to the new table.
    fn end_resize(&self, marks: &mut Self::Marks, fresh: Self::Marks) {
        *marks = fresh;
    }

    /// Initializes `slot` as empty.
    ///
    /// # Safety
    /// `slot` must be valid for writes and must not hold a value that still needs dropping.
    unsafe fn mark_empty(&self, marks: &mut Self::Marks, slot: *mut Self::Slot, index: usize);

    fn is_empty(&self, marks: &Self::Marks, slot: &Self::Slot, index: usize) -> bool;

    fn is_tombstone(&self, marks: &Self::Marks, slot: &Self::Slot, index: usize) -> bool;

    #[inline]
    fn is_occupied(&self, marks: &Self::Marks, slot: &Self::Slot, index: usize) -> bool {
        !self.is_empty(marks, slot, index) && !self.is_tombstone(marks, slot, index)
    }

    /// Stores `value` in `slot`.
    ///
    /// # Safety
    /// `slot` must be empty or a tombstone.
    unsafe fn mark_occupied(
        &self,
        marks: &mut Self::Marks,
        slot: &mut Self::Slot,
        index: usize,
        value: T,
    );

    /// Moves the value out of `slot` and leaves a tombstone.
    ///
    /// # Safety
    /// `slot` must be occupied.
    unsafe fn mark_tombstone(&self, marks: &mut Self::Marks, slot: &mut Self::Slot, index: usize)
        -> T;

    /// Moves the value out of `slot` and leaves it in a state that
    /// [`drop_slot`](Self::drop_slot) will not drop twice. The slot must not be probed afterwards.
    ///
    /// # Safety
    /// `slot` must be occupied.
    unsafe fn take(&self, marks: &mut Self::Marks, slot: &mut Self::Slot, index: usize) -> T;

    /// # Safety
    /// `slot` must be occupied.
    unsafe fn value<'a>(&self, slot: &'a Self::Slot) -> &'a T;

    /// # Safety
    /// `slot` must be occupied, and the value's equality key must not change through the
    /// returned reference.
    unsafe fn value_mut<'a>(&self, slot: &'a mut Self::Slot) -> &'a mut T;

    /// Drops whatever `slot` owns. The slot is left uninitialized.
    ///
    /// # Safety
    /// `slot` must have been initialized by [`mark_empty`](Self::mark_empty) and must not be used
    /// again before being re-initialized.
    unsafe fn drop_slot(&self, marks: &Self::Marks, slot: *mut Self::Slot, index: usize);
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
enum Status {
    Empty,
    Occupied,
    Tombstone,
}

/// A slot carrying its own status byte.
pub struct UnifiedSlot<T> {
    status: Status,
    value: MaybeUninit<T>,
}

/// Keeps a status field next to every value. No restriction on values, one extra field per slot.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Unified;

unsafe impl<T> OccupancyPolicy<T> for Unified {
    type Slot = UnifiedSlot<T>;
    type Marks = ();

    #[inline]
    fn begin_resize(&self, _capacity: usize) {}

    #[inline]
    unsafe fn mark_empty(&self, _: &mut (), slot: *mut UnifiedSlot<T>, _: usize) {
        ptr::addr_of_mut!((*slot).status).write(Status::Empty);
    }

    #[inline]
    fn is_empty(&self, _: &(), slot: &UnifiedSlot<T>, _: usize) -> bool {
        slot.status == Status::Empty
    }

    #[inline]
    fn is_tombstone(&self, _: &(), slot: &UnifiedSlot<T>, _: usize) -> bool {
        slot.status == Status::Tombstone
    }

    #[inline]
    fn is_occupied(&self, _: &(), slot: &UnifiedSlot<T>, _: usize) -> bool {
        slot.status == Status::Occupied
    }

    #[inline]
    unsafe fn mark_occupied(&self, _: &mut (), slot: &mut UnifiedSlot<T>, _: usize, value: T) {
        debug_assert_ne!(slot.status, Status::Occupied);
        slot.value.write(value);
        slot.status = Status::Occupied;
    }

    #[inline]
    unsafe fn mark_tombstone(&self, _: &mut (), slot: &mut UnifiedSlot<T>, _: usize) -> T {
        debug_assert_eq!(slot.status, Status::Occupied);
        slot.status = Status::Tombstone;
        slot.value.assume_init_read()
    }

    #[inline]
    unsafe fn take(&self, _: &mut (), slot: &mut UnifiedSlot<T>, _: usize) -> T {
        debug_assert_eq!(slot.status, Status::Occupied);
        slot.status = Status::Empty;
        slot.value.assume_init_read()
    }

    #[inline]
    unsafe fn value<'a>(&self, slot: &'a UnifiedSlot<T>) -> &'a T {
        slot.value.assume_init_ref()
    }

    #[inline]
    unsafe fn value_mut<'a>(&self, slot: &'a mut UnifiedSlot<T>) -> &'a mut T {
        slot.value.assume_init_mut()
    }

    #[inline]
    unsafe fn drop_slot(&self, _: &(), slot: *mut UnifiedSlot<T>, _: usize) {
        if (*slot).status == Status::Occupied {
            (*slot).value.assume_init_drop();
        }
    }
}

/// The two bitsets of the [`Segregated`] policy.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bitsets {
    empty: Vec<u64>,
    tombstone: Vec<u64>,
}

impl Bitsets {
    fn with_capacity(capacity: usize) -> Self {
        let words = capacity.div_ceil(64);
        Bitsets {
            empty: vec![0; words],
            tombstone: vec![0; words],
        }
    }

    #[inline(always)]
    fn get(bits: &[u64], i: usize) -> bool {
        bits[i / 64] & (1 << (i % 64)) != 0
    }

    #[inline(always)]
    fn set(bits: &mut [u64], i: usize) {
        bits[i / 64] |= 1 << (i % 64);
    }

    #[inline(always)]
    fn clear(bits: &mut [u64], i: usize) {
        bits[i / 64] &= !(1 << (i % 64));
    }
}

/// Keeps occupancy in two bitsets sized to the table, so slots hold bare values.
/// No restriction on values; the bitsets are rebuilt on every resize.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Segregated;

unsafe impl<T> OccupancyPolicy<T> for Segregated {
    type Slot = MaybeUninit<T>;
    type Marks = Bitsets;

    fn begin_resize(&self, capacity: usize) -> Bitsets {
        Bitsets::with_capacity(capacity)
    }

    #[inline]
    unsafe fn mark_empty(&self, marks: &mut Bitsets, _: *mut MaybeUninit<T>, index: usize) {
        Bitsets::set(&mut marks.empty, index);
        Bitsets::clear(&mut marks.tombstone, index);
    }

    #[inline]
    fn is_empty(&self, marks: &Bitsets, _: &MaybeUninit<T>, index: usize) -> bool {
        Bitsets::get(&marks.empty, index)
    }

    #[inline]
    fn is_tombstone(&self, marks: &Bitsets, _: &MaybeUninit<T>, index: usize) -> bool {
        Bitsets::get(&marks.tombstone, index)
    }

    #[inline]
    unsafe fn mark_occupied(
        &self,
        marks: &mut Bitsets,
        slot: &mut MaybeUninit<T>,
        index: usize,
        value: T,
    ) {
        slot.write(value);
        Bitsets::clear(&mut marks.empty, index);
        Bitsets::clear(&mut marks.tombstone, index);
    }

    #[inline]
    unsafe fn mark_tombstone(&self, marks: &mut Bitsets, slot: &mut MaybeUninit<T>, index: usize) -> T {
        Bitsets::set(&mut marks.tombstone, index);
        slot.assume_init_read()
    }

    #[inline]
    unsafe fn take(&self, marks: &mut Bitsets, slot: &mut MaybeUninit<T>, index: usize) -> T {
        Bitsets::set(&mut marks.empty, index);
        slot.assume_init_read()
    }

    #[inline]
    unsafe fn value<'a>(&self, slot: &'a MaybeUninit<T>) -> &'a T {
        slot.assume_init_ref()
    }

    #[inline]
    unsafe fn value_mut<'a>(&self, slot: &'a mut MaybeUninit<T>) -> &'a mut T {
        slot.assume_init_mut()
    }

    #[inline]
    unsafe fn drop_slot(&self, marks: &Bitsets, slot: *mut MaybeUninit<T>, index: usize) {
        if self.is_occupied(marks, &*slot, index) {
            (*slot).assume_init_drop();
        }
    }
}

/// Selects the part of a stored value that a [`Restricted`] policy compares with its sentinels.
pub trait KeyOf<T> {
    type Key: ?Sized + PartialEq;

    fn key(value: &T) -> &Self::Key;
}

/// Compares whole values.
#[derive(Copy, Clone, Debug, Default)]
pub struct WholeValue;

impl<T: PartialEq> KeyOf<T> for WholeValue {
    type Key = T;

    #[inline(always)]
    fn key(value: &T) -> &T {
        value
    }
}

/// Compares the first half of `(key, value)` pairs.
#[derive(Copy, Clone, Debug, Default)]
pub struct PairKey;

impl<K: PartialEq, V> KeyOf<(K, V)> for PairKey {
    type Key = K;

    #[inline(always)]
    fn key(value: &(K, V)) -> &K {
        &value.0
    }
}

/// Marks slot states with two caller-chosen sentinel values: a slot is empty when its key equals
/// the empty sentinel's, a tombstone when it equals the tombstone sentinel's, and occupied
/// otherwise. No per-slot overhead at all.
///
/// Storing a value whose key equals either sentinel is a contract violation, checked only in
/// debug builds.
pub struct Restricted<T, X = WholeValue> {
    tombstone: T,
    empty: T,
    key: PhantomData<X>,
}

impl<T, X: KeyOf<T>> Restricted<T, X> {
    pub fn new(tombstone: T, empty: T) -> Self {
        debug_assert!(
            X::key(&tombstone) != X::key(&empty),
            "the two sentinels must differ"
        );
        Restricted {
            tombstone,
            empty,
            key: PhantomData,
        }
    }

    pub fn tombstone_value(&self) -> &T {
        &self.tombstone
    }

    pub fn empty_value(&self) -> &T {
        &self.empty
    }

    /// Whether `value` may be stored under this policy.
    #[inline]
    pub fn admits(&self, value: &T) -> bool {
        X::key(value) != X::key(&self.tombstone) && X::key(value) != X::key(&self.empty)
    }

    pub(super) fn replace_tombstone_value(&mut self, tombstone: T) -> T {
        core::mem::replace(&mut self.tombstone, tombstone)
    }

    pub(super) fn replace_empty_value(&mut self, empty: T) -> T {
        core::mem::replace(&mut self.empty, empty)
    }
}

impl<T: Clone, X> Clone for Restricted<T, X> {
    fn clone(&self) -> Self {
        Restricted {
            tombstone: self.tombstone.clone(),
            empty: self.empty.clone(),
            key: PhantomData,
        }
    }
}

impl<T: Debug, X> Debug for Restricted<T, X> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Restricted")
            .field("tombstone", &self.tombstone)
            .field("empty", &self.empty)
            .finish()
    }
}

unsafe impl<T: Clone, X: KeyOf<T>> OccupancyPolicy<T> for Restricted<T, X> {
    type Slot = T;
    type Marks = ();

    #[inline]
    fn begin_resize(&self, _capacity: usize) {}

    #[inline]
    unsafe fn mark_empty(&self, _: &mut (), slot: *mut T, _: usize) {
        slot.write(self.empty.clone());
    }

    #[inline]
    fn is_empty(&self, _: &(), slot: &T, _: usize) -> bool {
        X::key(slot) == X::key(&self.empty)
    }

    #[inline]
    fn is_tombstone(&self, _: &(), slot: &T, _: usize) -> bool {
        X::key(slot) == X::key(&self.tombstone)
    }

    #[inline]
    unsafe fn mark_occupied(&self, _: &mut (), slot: &mut T, _: usize, value: T) {
        debug_assert!(self.admits(&value), "a sentinel value cannot be stored");
        *slot = value;
    }

    #[inline]
    unsafe fn mark_tombstone(&self, _: &mut (), slot: &mut T, _: usize) -> T {
        core::mem::replace(slot, self.tombstone.clone())
    }

    #[inline]
    unsafe fn take(&self, _: &mut (), slot: &mut T, _: usize) -> T {
        core::mem::replace(slot, self.empty.clone())
    }

    #[inline]
    unsafe fn value<'a>(&self, slot: &'a T) -> &'a T {
        slot
    }

    #[inline]
    unsafe fn value_mut<'a>(&self, slot: &'a mut T) -> &'a mut T {
        slot
    }

    #[inline]
    unsafe fn drop_slot(&self, _: &(), slot: *mut T, _: usize) {
        slot.drop_in_place();
    }
}
