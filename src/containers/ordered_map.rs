use super::sorted::{self, SortedTable};
use crate::allocators::{FixedBlockPool, GlobalAllocator, RawHeap};
use crate::error::Result;
use crate::hash::FnvBuildHasher;
use crate::table::PairKey;

use core::borrow::Borrow;
use core::cmp::Ordering;
use core::fmt::Debug;
use core::hash::{BuildHasher, Hash};
use core::iter::FusedIterator;
use core::ops::Index;
use std::rc::Rc;

/// A hash map that iterates in ascending key order.
///
/// Lookups hash the key. Iteration, [`first`](Self::first), [`last`](Self::last) and the bounds
/// follow the keys' [`Ord`].
pub struct OrderedMap<K, V, S = FnvBuildHasher, H: RawHeap + Clone = Rc<GlobalAllocator>> {
    table: SortedTable<(K, V), PairKey, S, H>,
}

impl<K: Hash + Ord, V, S: BuildHasher + Default> OrderedMap<K, V, S> {
    /// Creates an empty map on the thread's shared budget. Nothing is allocated.
    pub fn new() -> Self {
        OrderedMap::new_in(GlobalAllocator::shared())
    }
}

impl<K: Hash + Ord, V, S: BuildHasher + Default> Default for OrderedMap<K, V, S> {
    fn default() -> Self {
        OrderedMap::new()
    }
}

impl<K, V, S, H> OrderedMap<K, V, S, H>
where
    K: Hash + Ord,
    S: BuildHasher,
    H: RawHeap + Clone,
{
    /// Creates an empty map drawing its nodes and its index from `heap`.
    ///
    /// # Panics
    /// Panics if `(K, V)` is aligned more strictly than a pool over `H` supports.
    pub fn new_in(heap: H) -> Self
    where
        S: Default,
    {
        OrderedMap::with_hasher_in(S::default(), heap)
    }

    pub fn with_hasher_in(build_hasher: S, heap: H) -> Self {
        OrderedMap {
            table: SortedTable::new_in(build_hasher, heap),
        }
    }

    /// Maps `key` to `value`. Returns the value `key` was mapped to before, if any.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>> {
        if let Some((_, old)) = self.table.get_mut(&key) {
            return Ok(Some(core::mem::replace(old, value)));
        }
        self.table.insert((key, value))?;
        Ok(None)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.get(key).map(|(_, v)| v)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.get_mut(key).map(|(_, v)| v)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.get(key).is_some()
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Result<Option<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        Ok(self.table.remove(key)?.map(|(_, v)| v))
    }

    pub fn remove_entry<Q>(&mut self, key: &Q) -> Result<Option<(K, V)>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.remove(key)
    }

    /// The entry with the smallest key.
    pub fn first(&self) -> Option<(&K, &V)> {
        self.table.first().map(|(k, v)| (k, v))
    }

    /// The entry with the largest key.
    pub fn last(&self) -> Option<(&K, &V)> {
        self.table.last().map(|(k, v)| (k, v))
    }

    pub fn pop_first(&mut self) -> Result<Option<(K, V)>> {
        self.table.pop_first()
    }

    pub fn pop_last(&mut self) -> Result<Option<(K, V)>> {
        self.table.pop_last()
    }

    /// Iterates in ascending key order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.table.iter(),
        }
    }

    /// Iterates over the entries whose key is not less than `key`.
    pub fn lower_bound<Q>(&self, key: &Q) -> Iter<'_, K, V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        Iter {
            inner: self.table.lower_bound(key),
        }
    }

    /// Iterates over the entries whose key is greater than `key`.
    pub fn upper_bound<Q>(&self, key: &Q) -> Iter<'_, K, V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        Iter {
            inner: self.table.upper_bound(key),
        }
    }

    pub fn keys(&self) -> impl DoubleEndedIterator<Item = &K> + ExactSizeIterator + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl DoubleEndedIterator<Item = &V> + ExactSizeIterator + '_ {
        self.iter().map(|(_, v)| v)
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

    /// Returns node chunks holding no entry to the heap. Returns how many were freed.
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

    /// Inserts every pair of `iter`, stopping at the first failure.
    pub fn try_extend(&mut self, iter: impl IntoIterator<Item = (K, V)>) -> Result<()> {
        for (k, v) in iter {
            self.insert(k, v)?;
        }
        Ok(())
    }
}

impl<K, Q, V, S, H> Index<&Q> for OrderedMap<K, V, S, H>
where
    K: Hash + Ord + Borrow<Q>,
    Q: Hash + Eq + ?Sized,
    S: BuildHasher,
    H: RawHeap + Clone,
{
    type Output = V;

    /// # Panics
    /// Panics if `key` is not in the map.
    fn index(&self, key: &Q) -> &V {
        match self.get(key) {
            Some(v) => v,
            None => panic!("key not found in map"),
        }
    }
}

impl<K, V, S, H> Extend<(K, V)> for OrderedMap<K, V, S, H>
where
    K: Hash + Ord,
    S: BuildHasher,
    H: RawHeap + Clone,
{
    /// # Panics
    /// Panics if memory runs out. Use [`try_extend`](OrderedMap::try_extend) to handle the
    /// failure instead.
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        if let Err(e) = self.try_extend(iter) {
            panic!("cannot extend map: {e}");
        }
    }
}

impl<K: Hash + Ord, V, S: BuildHasher + Default> FromIterator<(K, V)> for OrderedMap<K, V, S> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = OrderedMap::new();
        map.extend(iter);
        map
    }
}

impl<K, V, S, H> PartialEq for OrderedMap<K, V, S, H>
where
    K: Hash + Ord,
    V: PartialEq,
    S: BuildHasher,
    H: RawHeap + Clone,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl<K, V, S, H> Eq for OrderedMap<K, V, S, H>
where
    K: Hash + Ord,
    V: Eq,
    S: BuildHasher,
    H: RawHeap + Clone,
{
}

impl<K, V, S, H> PartialOrd for OrderedMap<K, V, S, H>
where
    K: Hash + Ord,
    V: PartialOrd,
    S: BuildHasher,
    H: RawHeap + Clone,
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.iter().partial_cmp(other.iter())
    }
}

impl<K, V, S, H> Ord for OrderedMap<K, V, S, H>
where
    K: Hash + Ord,
    V: Ord,
    S: BuildHasher,
    H: RawHeap + Clone,
{
    fn cmp(&self, other: &Self) -> Ordering {
        self.iter().cmp(other.iter())
    }
}

impl<K, V, S, H> Debug for OrderedMap<K, V, S, H>
where
    K: Hash + Ord + Debug,
    V: Debug,
    S: BuildHasher,
    H: RawHeap + Clone,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, K, V, S, H> IntoIterator for &'a OrderedMap<K, V, S, H>
where
    K: Hash + Ord,
    S: BuildHasher,
    H: RawHeap + Clone,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Iter<'a, K, V> {
        self.iter()
    }
}

/// Iterator over `(&K, &V)`, smallest key first.
pub struct Iter<'a, K, V> {
    inner: sorted::Iter<'a, (K, V)>,
}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Iter {
            inner: self.inner.clone(),
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    #[inline]
    fn next(&mut self) -> Option<(&'a K, &'a V)> {
        self.inner.next().map(|(k, v)| (k, v))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a, K, V> DoubleEndedIterator for Iter<'a, K, V> {
    #[inline]
    fn next_back(&mut self) -> Option<(&'a K, &'a V)> {
        self.inner.next_back().map(|(k, v)| (k, v))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<K, V> FusedIterator for Iter<'_, K, V> {}
