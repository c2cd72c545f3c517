use super::keyed::KeyedTable;
use crate::allocators::{GlobalAllocator, RawHeap};
use crate::error::Result;
use crate::hash::FnvBuildHasher;
use crate::table::{IntoIter, Iter, OccupancyPolicy, Restricted, Segregated, Unified, WholeValue};

use core::borrow::Borrow;
use core::fmt::Debug;
use core::hash::{BuildHasher, Hash};
use std::rc::Rc;

/// A hash set stored in a [`HashEngine`](crate::table::HashEngine) with the occupancy policy `P`.
///
/// Operations that may allocate return a [`Result`]; when one fails the set is unchanged.
/// The trait impls that cannot report failure ([`Extend`], [`FromIterator`], [`Clone`]) panic
/// instead.
pub struct UnorderedSet<
    T,
    P: OccupancyPolicy<T> = Unified,
    S = FnvBuildHasher,
    H: RawHeap = Rc<GlobalAllocator>,
> {
    table: KeyedTable<T, WholeValue, P, S, H>,
}

pub type UnifiedUnorderedSet<T, S = FnvBuildHasher, H = Rc<GlobalAllocator>> =
    UnorderedSet<T, Unified, S, H>;

pub type SegregatedUnorderedSet<T, S = FnvBuildHasher, H = Rc<GlobalAllocator>> =
    UnorderedSet<T, Segregated, S, H>;

/// A set whose empty and tombstone slots hold two sentinel values, which can never be inserted.
pub type RestrictedUnorderedSet<T, S = FnvBuildHasher, H = Rc<GlobalAllocator>> =
    UnorderedSet<T, Restricted<T>, S, H>;

impl<T: Hash + Eq, P: OccupancyPolicy<T> + Default, S: BuildHasher + Default> UnorderedSet<T, P, S> {
    /// Creates an empty set on the thread's shared budget. Nothing is allocated.
    pub fn new() -> Self {
        UnorderedSet::new_in(GlobalAllocator::shared())
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Ok(UnorderedSet {
            table: KeyedTable::with_capacity_in(
                capacity,
                P::default(),
                S::default(),
                GlobalAllocator::shared(),
            )?,
        })
    }
}

impl<T: Hash + Eq, P: OccupancyPolicy<T> + Default, S: BuildHasher + Default> Default
    for UnorderedSet<T, P, S>
{
    fn default() -> Self {
        UnorderedSet::new()
    }
}

impl<T: Hash + Eq + Clone, S: BuildHasher + Default> UnorderedSet<T, Restricted<T>, S> {
    /// Creates an empty set on the thread's shared budget whose slots are marked by the two
    /// sentinels. Neither can be inserted afterwards.
    pub fn with_sentinels(tombstone: T, empty: T) -> Self {
        UnorderedSet::with_policy_in(
            Restricted::new(tombstone, empty),
            S::default(),
            GlobalAllocator::shared(),
        )
    }
}

impl<T, P, S, H> UnorderedSet<T, P, S, H>
where
    T: Hash + Eq,
    P: OccupancyPolicy<T>,
    S: BuildHasher,
    H: RawHeap,
{
    /// Creates an empty set drawing from `heap`.
    pub fn new_in(heap: H) -> Self
    where
        P: Default,
        S: Default,
    {
        UnorderedSet::with_policy_in(P::default(), S::default(), heap)
    }

    pub fn with_policy_in(policy: P, build_hasher: S, heap: H) -> Self {
        UnorderedSet {
            table: KeyedTable::new_in(policy, build_hasher, heap),
        }
    }

    /// Adds `value` to the set. Returns whether it was not present yet; if it was, the set keeps
    /// the old value.
    pub fn insert(&mut self, value: T) -> Result<bool> {
        let (_, rejected) = self.table.insert(value)?;
        Ok(rejected.is_none())
    }

    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.find(value).is_some()
    }

    pub fn get<Q>(&self, value: &Q) -> Option<&T>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.get(value)
    }

    /// Removes `value`. Returns whether it was present.
    pub fn remove<Q>(&mut self, value: &Q) -> Result<bool>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        Ok(self.table.remove(value)?.is_some())
    }

    /// Removes and returns the value equal to `value`.
    pub fn take<Q>(&mut self, value: &Q) -> Result<Option<T>>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.remove(value)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Number of slots in the table.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    pub fn clear(&mut self) {
        self.table.clear()
    }

    /// Makes room for `additional` more values without growing in between.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        self.table.reserve(additional)
    }

    /// Rebuilds the table with at least `capacity` slots.
    pub fn rehash(&mut self, capacity: usize) -> Result<()> {
        self.table.rehash(capacity)
    }

    pub fn shrink_to_fit(&mut self) -> Result<()> {
        self.table.shrink_to_fit()
    }

    pub fn retain(&mut self, mut f: impl FnMut(&T) -> bool) -> Result<()> {
        self.table.retain(|v| f(v))
    }

    /// Iterates over the values in table order.
    pub fn iter(&self) -> Iter<'_, T, P> {
        self.table.iter()
    }

    pub fn hasher(&self) -> &S {
        self.table.hasher()
    }

    pub fn policy(&self) -> &P {
        self.table.engine().policy()
    }

    pub fn heap(&self) -> &H {
        self.table.engine().heap()
    }

    /// Inserts every value of `iter`, stopping at the first failure.
    pub fn try_extend(&mut self, iter: impl IntoIterator<Item = T>) -> Result<()> {
        let iter = iter.into_iter();
        let (lower, _) = iter.size_hint();
        self.reserve(lower)?;
        for value in iter {
            self.insert(value)?;
        }
        Ok(())
    }

    pub fn try_clone(&self) -> Result<Self>
    where
        T: Clone,
        P: Clone,
        S: Clone,
        H: Clone,
    {
        Ok(UnorderedSet {
            table: self.table.try_clone()?,
        })
    }
}

impl<T, S, H> UnorderedSet<T, Restricted<T>, S, H>
where
    T: Hash + Eq + Clone,
    S: BuildHasher,
    H: RawHeap,
{
    pub fn tombstone_value(&self) -> &T {
        self.policy().tombstone_value()
    }

    pub fn empty_value(&self) -> &T {
        self.policy().empty_value()
    }

    /// Replaces the tombstone sentinel. O(capacity).
    ///
    /// `tombstone` must not be in the set or equal the empty sentinel.
    pub fn set_tombstone_value(&mut self, tombstone: T) {
        debug_assert!(!self.contains(&tombstone));
        self.table.engine_mut().set_tombstone_value(tombstone)
    }

    /// Replaces the empty sentinel. O(capacity).
    ///
    /// `empty` must not be in the set or equal the tombstone sentinel.
    pub fn set_empty_value(&mut self, empty: T) {
        debug_assert!(!self.contains(&empty));
        self.table.engine_mut().set_empty_value(empty)
    }
}

impl<T, P, S, H> Extend<T> for UnorderedSet<T, P, S, H>
where
    T: Hash + Eq,
    P: OccupancyPolicy<T>,
    S: BuildHasher,
    H: RawHeap,
{
    /// # Panics
    /// Panics if the table cannot grow. Use [`try_extend`](UnorderedSet::try_extend) to handle
    /// the failure instead.
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        if let Err(e) = self.try_extend(iter) {
            panic!("cannot extend set: {e}");
        }
    }
}

impl<T, P, S> FromIterator<T> for UnorderedSet<T, P, S>
where
    T: Hash + Eq,
    P: OccupancyPolicy<T> + Default,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = UnorderedSet::new();
        set.extend(iter);
        set
    }
}

impl<T, P, S, H> Clone for UnorderedSet<T, P, S, H>
where
    T: Hash + Eq + Clone,
    P: OccupancyPolicy<T> + Clone,
    S: BuildHasher + Clone,
    H: RawHeap + Clone,
{
    /// # Panics
    /// Panics if the copy cannot be allocated.
    fn clone(&self) -> Self {
        match self.try_clone() {
            Ok(set) => set,
            Err(e) => panic!("cannot clone set: {e}"),
        }
    }
}

impl<T, P, S, H> PartialEq for UnorderedSet<T, P, S, H>
where
    T: Hash + Eq,
    P: OccupancyPolicy<T>,
    S: BuildHasher,
    H: RawHeap,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|v| other.contains(v))
    }
}

impl<T, P, S, H> Eq for UnorderedSet<T, P, S, H>
where
    T: Hash + Eq,
    P: OccupancyPolicy<T>,
    S: BuildHasher,
    H: RawHeap,
{
}

impl<T: Debug, P: OccupancyPolicy<T>, S, H: RawHeap> Debug for UnorderedSet<T, P, S, H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.table.engine().iter()).finish()
    }
}

impl<'a, T, P, S, H> IntoIterator for &'a UnorderedSet<T, P, S, H>
where
    T: Hash + Eq,
    P: OccupancyPolicy<T>,
    S: BuildHasher,
    H: RawHeap,
{
    type Item = &'a T;
    type IntoIter = Iter<'a, T, P>;

    fn into_iter(self) -> Iter<'a, T, P> {
        self.iter()
    }
}

impl<T, P: OccupancyPolicy<T>, S, H: RawHeap> IntoIterator for UnorderedSet<T, P, S, H> {
    type Item = T;
    type IntoIter = IntoIter<T, P, H>;

    fn into_iter(self) -> IntoIter<T, P, H> {
        self.table.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AllocError;

    fn exercise<P: OccupancyPolicy<u32>>(
        mut set: UnorderedSet<u32, P, FnvBuildHasher, &GlobalAllocator>,
    ) {
        for v in 0..50 {
            assert!(set.insert(v).unwrap());
        }
        assert!(!set.insert(7).unwrap());
        assert_eq!(set.len(), 50);
        assert!(set.contains(&49));
        assert!(!set.contains(&50));

        assert!(set.remove(&10).unwrap());
        assert!(!set.remove(&10).unwrap());
        assert_eq!(set.take(&11).unwrap(), Some(11));
        set.retain(|v| v % 2 == 0).unwrap();
        assert_eq!(set.len(), 24);

        let mut values: Vec<u32> = set.iter().copied().collect();
        values.sort_unstable();
        let expected: Vec<u32> = (0..50).filter(|v| v % 2 == 0 && *v != 10).collect();
        assert_eq!(values, expected);

        set.clear();
        assert!(set.is_empty());
        set.shrink_to_fit().unwrap();
        assert_eq!(set.capacity(), 0);
    }

    #[test]
    fn same_behaviour_under_every_policy() {
        let heap = GlobalAllocator::new();
        exercise::<Unified>(UnorderedSet::new_in(&heap));
        exercise::<Segregated>(UnorderedSet::new_in(&heap));
        exercise::<Restricted<u32>>(UnorderedSet::with_policy_in(
            Restricted::new(u32::MAX, u32::MAX - 1),
            FnvBuildHasher::default(),
            &heap,
        ));
        assert_eq!(heap.bytes_allocated(), 0);
    }

    #[test]
    fn sentinels() {
        let mut set: RestrictedUnorderedSet<i64> = UnorderedSet::with_sentinels(-1, -2);
        assert_eq!((*set.tombstone_value(), *set.empty_value()), (-1, -2));
        set.extend([1, 2, 3]);
        set.remove(&2).unwrap();

        set.set_tombstone_value(-3);
        set.set_empty_value(-4);
        assert!(set.insert(-1).unwrap());
        assert!(set.insert(-2).unwrap());
        assert!(set.contains(&-1) && set.contains(&-2) && set.contains(&3));
        assert!(!set.contains(&2));
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn equality_and_clone() {
        let a: UnorderedSet<String> = ["x", "y", "z"].iter().map(|s| s.to_string()).collect();
        let mut b = a.clone();
        assert_eq!(a, b);
        assert!(b.contains("y"));
        b.remove("y").unwrap();
        assert_ne!(a, b);
        let one: UnorderedSet<u8> = [4].into_iter().collect();
        assert_eq!(format!("{one:?}"), "{4}");
    }

    // Formatting asks nothing of the set but `T: Debug`.
    fn describe<T: Debug, P: OccupancyPolicy<T>>(
        set: &UnorderedSet<T, P, FnvBuildHasher, &GlobalAllocator>,
    ) -> String {
        format!("{set:?}")
    }

    #[test]
    fn debug_lists_the_values() {
        let heap = GlobalAllocator::new();
        let mut set: UnorderedSet<u8, Segregated, FnvBuildHasher, _> = UnorderedSet::new_in(&heap);
        assert_eq!(describe(&set), "{}");
        set.insert(9).unwrap();
        assert_eq!(describe(&set), "{9}");
    }

    #[test]
    fn failed_insert_leaves_set_unchanged() {
        let heap = GlobalAllocator::new();
        let mut set: UnifiedUnorderedSet<u64, FnvBuildHasher, &GlobalAllocator> =
            UnorderedSet::new_in(&heap);
        set.insert(1).unwrap();
        heap.set_allocation_limit(heap.bytes_allocated());

        let err = set.try_extend(2..100).unwrap_err();
        assert!(matches!(err, AllocError::LimitExceeded { .. }));
        assert_eq!(set.len(), 1);
        assert!(set.contains(&1));
    }
}
