use super::sorted::{Iter, SortedTable};
use crate::allocators::{FixedBlockPool, GlobalAllocator, RawHeap};
use crate::error::Result;
use crate::hash::FnvBuildHasher;
use crate::table::WholeValue;

use core::borrow::Borrow;
use core::cmp::Ordering;
use core::fmt::Debug;
use core::hash::{BuildHasher, Hash};
use std::rc::Rc;

/// A hash set that iterates in ascending order.
///
/// Values live in nodes drawn from a [`FixedBlockPool`]. Membership tests go through a hash index
/// of the nodes, while iteration, [`first`](Self::first), [`last`](Self::last) and the bounds
/// follow [`Ord`]. Insertion is constant time; the new values are sorted in on the next call that
/// needs the order.
pub struct OrderedSet<T, S = FnvBuildHasher, H: RawHeap + Clone = Rc<GlobalAllocator>> {
    table: SortedTable<T, WholeValue, S, H>,
}

impl<T: Hash + Ord, S: BuildHasher + Default> OrderedSet<T, S> {
    /// Creates an empty set on the thread's shared budget. Nothing is allocated.
    pub fn new() -> Self {
        OrderedSet::new_in(GlobalAllocator::shared())
    }
}

impl<T: Hash + Ord, S: BuildHasher + Default> Default for OrderedSet<T, S> {
    fn default() -> Self {
        OrderedSet::new()
    }
}

impl<T, S, H> OrderedSet<T, S, H>
where
    T: Hash + Ord,
    S: BuildHasher,
    H: RawHeap + Clone,
{
    /// Creates an empty set drawing its nodes and its index from `heap`.
    ///
    /// # Panics
    /// Panics if `T` is aligned more strictly than a pool over `H` supports.
    pub fn new_in(heap: H) -> Self
    where
        S: Default,
    {
        OrderedSet::with_hasher_in(S::default(), heap)
    }

    pub fn with_hasher_in(build_hasher: S, heap: H) -> Self {
        OrderedSet {
            table: SortedTable::new_in(build_hasher, heap),
        }
    }

    /// Adds `value`. Returns whether it was not present yet.
    pub fn insert(&mut self, value: T) -> Result<bool> {
        Ok(self.table.insert(value)?.is_none())
    }

    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.get(value).is_some()
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

    pub fn take<Q>(&mut self, value: &Q) -> Result<Option<T>>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.remove(value)
    }

    /// The smallest value.
    pub fn first(&self) -> Option<&T> {
        self.table.first()
    }

    /// The largest value.
    pub fn last(&self) -> Option<&T> {
        self.table.last()
    }

    pub fn pop_first(&mut self) -> Result<Option<T>> {
        self.table.pop_first()
    }

    pub fn pop_last(&mut self) -> Result<Option<T>> {
        self.table.pop_last()
    }

    /// Iterates in ascending order.
    pub fn iter(&self) -> Iter<'_, T> {
        self.table.iter()
    }

    /// Iterates over the values not less than `value`, in ascending order.
    pub fn lower_bound<Q>(&self, value: &Q) -> Iter<'_, T>
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.table.lower_bound(value)
    }

    /// Iterates over the values greater than `value`, in ascending order.
    pub fn upper_bound<Q>(&self, value: &Q) -> Iter<'_, T>
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.table.upper_bound(value)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table.len() == 0
    }

    pub fn clear(&mut self) {
        self.table.clear()
    }

    /// Returns node chunks holding no value to the heap. Returns how many were freed.
    pub fn garbage_collect(&self) -> usize {
        self.table.garbage_collect()
    }

    /// The pool the nodes are drawn from.
    pub fn nodes(&self) -> &FixedBlockPool<H> {
        self.table.nodes()
    }

    pub fn hasher(&self) -> &S {
        self.table.hasher()
    }

    /// Inserts every value of `iter`, stopping at the first failure.
    pub fn try_extend(&mut self, iter: impl IntoIterator<Item = T>) -> Result<()> {
        for value in iter {
            self.insert(value)?;
        }
        Ok(())
    }
}

impl<T, S, H> Extend<T> for OrderedSet<T, S, H>
where
    T: Hash + Ord,
    S: BuildHasher,
    H: RawHeap + Clone,
{
    /// # Panics
    /// Panics if memory runs out. Use [`try_extend`](OrderedSet::try_extend) to handle the
    /// failure instead.
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        if let Err(e) = self.try_extend(iter) {
            panic!("cannot extend set: {e}");
        }
    }
}

impl<T: Hash + Ord, S: BuildHasher + Default> FromIterator<T> for OrderedSet<T, S> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = OrderedSet::new();
        set.extend(iter);
        set
    }
}

impl<T, S, H> PartialEq for OrderedSet<T, S, H>
where
    T: Hash + Ord,
    S: BuildHasher,
    H: RawHeap + Clone,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl<T, S, H> Eq for OrderedSet<T, S, H>
where
    T: Hash + Ord,
    S: BuildHasher,
    H: RawHeap + Clone,
{
}

impl<T, S, H> PartialOrd for OrderedSet<T, S, H>
where
    T: Hash + Ord,
    S: BuildHasher,
    H: RawHeap + Clone,
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sets compare lexicographically, value by value in ascending order.
impl<T, S, H> Ord for OrderedSet<T, S, H>
where
    T: Hash + Ord,
    S: BuildHasher,
    H: RawHeap + Clone,
{
    fn cmp(&self, other: &Self) -> Ordering {
        self.iter().cmp(other.iter())
    }
}

impl<T, S, H> Debug for OrderedSet<T, S, H>
where
    T: Hash + Ord + Debug,
    S: BuildHasher,
    H: RawHeap + Clone,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<'a, T, S, H> IntoIterator for &'a OrderedSet<T, S, H>
where
    T: Hash + Ord,
    S: BuildHasher,
    H: RawHeap + Clone,
{
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs<'a>(iter: Iter<'a, String>) -> Vec<&'a str> {
        iter.map(String::as_str).collect()
    }

    #[test]
    fn iterates_in_ascending_order() {
        let heap = GlobalAllocator::new();
        let mut set: OrderedSet<u64, FnvBuildHasher, _> = OrderedSet::new_in(&heap);
        for v in [5, 1, 4, 2, 3] {
            assert!(set.insert(v).unwrap());
        }
        assert!(!set.insert(4).unwrap());
        assert_eq!(set.iter().copied().collect::<Vec<_>>(), [1, 2, 3, 4, 5]);
        assert_eq!((set.first(), set.last()), (Some(&1), Some(&5)));

        assert!(set.remove(&4).unwrap());
        assert!(!set.remove(&4).unwrap());
        assert!(set.insert(0).unwrap());
        assert_eq!(set.iter().rev().copied().collect::<Vec<_>>(), [5, 3, 2, 1, 0]);

        assert_eq!(set.pop_first().unwrap(), Some(0));
        assert_eq!(set.pop_last().unwrap(), Some(5));
        assert_eq!(format!("{set:?}"), "{1, 2, 3}");
        assert!(set.contains(&3) && !set.contains(&5));
    }

    #[test]
    fn bounds() {
        let set: OrderedSet<String> = ["pear", "apple", "fig", "kiwi"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(strs(set.lower_bound("fig")), ["fig", "kiwi", "pear"]);
        assert_eq!(strs(set.upper_bound("fig")), ["kiwi", "pear"]);
        assert_eq!(strs(set.lower_bound("b")), ["fig", "kiwi", "pear"]);
        assert_eq!(strs(set.lower_bound("")), ["apple", "fig", "kiwi", "pear"]);
        assert!(set.upper_bound("zebra").next().is_none());
    }

    #[test]
    fn compares_in_order() {
        let a: OrderedSet<u8> = [3, 1, 2].into_iter().collect();
        let b: OrderedSet<u8> = [2, 3, 1].into_iter().collect();
        let c: OrderedSet<u8> = [1, 2, 4].into_iter().collect();
        let d: OrderedSet<u8> = [1, 2].into_iter().collect();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a < c);
        assert!(d < a);
        assert_eq!(a.cmp(&b), Ordering::Equal);
    }

    #[test]
    fn empty_set() {
        let mut set: OrderedSet<String> = OrderedSet::new();
        assert!(set.is_empty());
        assert_eq!(set.first(), None);
        assert_eq!(set.pop_last().unwrap(), None);
        assert_eq!(set.iter().len(), 0);
        assert_eq!(set.lower_bound("a").len(), 0);
    }

    #[test]
    fn nodes_are_recycled() {
        let heap = GlobalAllocator::new();
        let mut set: OrderedSet<u64, FnvBuildHasher, _> = OrderedSet::new_in(&heap);
        set.extend((0..64).rev());
        let chunks = set.nodes().chunk_count();

        for _ in 0..10 {
            for v in 0..64 {
                set.remove(&v).unwrap();
            }
            set.extend(0..64);
        }
        // Every round reuses the blocks the previous one freed.
        assert_eq!(set.nodes().chunk_count(), chunks);
        assert_eq!(set.len(), 64);
        assert!(set.iter().copied().eq(0..64));

        set.clear();
        assert_eq!(set.garbage_collect(), chunks);
        assert_eq!(set.nodes().bytes_claimed(), 0);
    }
}
