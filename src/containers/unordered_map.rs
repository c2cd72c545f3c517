use super::keyed::KeyedTable;
use crate::allocators::{GlobalAllocator, RawHeap};
use crate::error::Result;
use crate::hash::FnvBuildHasher;
use crate::table::{self, OccupancyPolicy, PairKey, Restricted, Segregated, Unified};

use core::borrow::Borrow;
use core::fmt::Debug;
use core::hash::{BuildHasher, Hash};
use core::iter::FusedIterator;
use core::ops::Index;
use std::rc::Rc;

/// A hash map storing `(K, V)` pairs in a [`HashEngine`](crate::table::HashEngine) with the
/// occupancy policy `P`.
///
/// Operations that may allocate return a [`Result`]; when one fails the map is unchanged.
pub struct UnorderedMap<
    K,
    V,
    P: OccupancyPolicy<(K, V)> = Unified,
    S = FnvBuildHasher,
    H: RawHeap = Rc<GlobalAllocator>,
> {
    table: KeyedTable<(K, V), PairKey, P, S, H>,
}

pub type UnifiedUnorderedMap<K, V, S = FnvBuildHasher, H = Rc<GlobalAllocator>> =
    UnorderedMap<K, V, Unified, S, H>;

pub type SegregatedUnorderedMap<K, V, S = FnvBuildHasher, H = Rc<GlobalAllocator>> =
    UnorderedMap<K, V, Segregated, S, H>;

/// A map whose empty and tombstone slots hold pairs with two sentinel keys, which can never be
/// inserted.
pub type RestrictedUnorderedMap<K, V, S = FnvBuildHasher, H = Rc<GlobalAllocator>> =
    UnorderedMap<K, V, Restricted<(K, V), PairKey>, S, H>;

impl<K, V, P, S> UnorderedMap<K, V, P, S>
where
    K: Hash + Eq,
    P: OccupancyPolicy<(K, V)> + Default,
    S: BuildHasher + Default,
{
    /// Creates an empty map on the thread's shared budget. Nothing is allocated.
    pub fn new() -> Self {
        UnorderedMap::new_in(GlobalAllocator::shared())
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Ok(UnorderedMap {
            table: KeyedTable::with_capacity_in(
                capacity,
                P::default(),
                S::default(),
                GlobalAllocator::shared(),
            )?,
        })
    }
}

impl<K, V, P, S> Default for UnorderedMap<K, V, P, S>
where
    K: Hash + Eq,
    P: OccupancyPolicy<(K, V)> + Default,
    S: BuildHasher + Default,
{
    fn default() -> Self {
        UnorderedMap::new()
    }
}

impl<K, V, S> UnorderedMap<K, V, Restricted<(K, V), PairKey>, S>
where
    K: Hash + Eq + Clone,
    V: Default + Clone,
    S: BuildHasher + Default,
{
    /// Creates an empty map on the thread's shared budget whose slots are marked by the two
    /// sentinel keys. Neither can be inserted afterwards.
    pub fn with_sentinels(tombstone: K, empty: K) -> Self {
        UnorderedMap::with_policy_in(
            Restricted::new((tombstone, V::default()), (empty, V::default())),
            S::default(),
            GlobalAllocator::shared(),
        )
    }
}

impl<K, V, P, S, H> UnorderedMap<K, V, P, S, H>
where
    K: Hash + Eq,
    P: OccupancyPolicy<(K, V)>,
    S: BuildHasher,
    H: RawHeap,
{
    /// Creates an empty map drawing from `heap`.
    pub fn new_in(heap: H) -> Self
    where
        P: Default,
        S: Default,
    {
        UnorderedMap::with_policy_in(P::default(), S::default(), heap)
    }

    pub fn with_policy_in(policy: P, build_hasher: S, heap: H) -> Self {
        UnorderedMap {
            table: KeyedTable::new_in(policy, build_hasher, heap),
        }
    }

    /// Maps `key` to `value`. Returns the value `key` was mapped to before, if any; the stored
    /// key is kept in that case.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>> {
        if let Some((_, old)) = self.table.get_mut(&key) {
            return Ok(Some(core::mem::replace(old, value)));
        }
        self.table.insert_unique((key, value))?;
        Ok(None)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.get(key).map(|(_, v)| v)
    }

    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.get(key).map(|(k, v)| (k, v))
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.get_mut(key).map(|(_, v)| v)
    }

    /// Returns the value of `key`, inserting `f()` first if `key` is absent.
    pub fn get_or_insert_with(&mut self, key: K, f: impl FnOnce() -> V) -> Result<&mut V> {
        let index = match self.table.find(&key) {
            Some(index) => index,
            None => self.table.insert_unique((key, f()))?,
        };
        match self.table.engine_mut().get_mut(index) {
            Some((_, v)) => Ok(v),
            None => unreachable!("slot {index} was just located"),
        }
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.find(key).is_some()
    }

    /// Removes `key` and returns the value it was mapped to.
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

    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        self.table.reserve(additional)
    }

    pub fn rehash(&mut self, capacity: usize) -> Result<()> {
        self.table.rehash(capacity)
    }

    pub fn shrink_to_fit(&mut self) -> Result<()> {
        self.table.shrink_to_fit()
    }

    pub fn retain(&mut self, mut f: impl FnMut(&K, &mut V) -> bool) -> Result<()> {
        self.table.retain(|(k, v)| f(k, v))
    }

    pub fn iter(&self) -> Iter<'_, K, V, P> {
        Iter {
            inner: self.table.iter(),
        }
    }

    pub fn iter_mut(&mut self) -> IterMut<'_, K, V, P> {
        IterMut {
            inner: self.table.iter_mut(),
        }
    }

    pub fn keys(&self) -> impl DoubleEndedIterator<Item = &K> + ExactSizeIterator + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl DoubleEndedIterator<Item = &V> + ExactSizeIterator + '_ {
        self.iter().map(|(_, v)| v)
    }

    pub fn values_mut(
        &mut self,
    ) -> impl DoubleEndedIterator<Item = &mut V> + ExactSizeIterator + '_ {
        self.iter_mut().map(|(_, v)| v)
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

    /// Inserts every pair of `iter`, stopping at the first failure.
    pub fn try_extend(&mut self, iter: impl IntoIterator<Item = (K, V)>) -> Result<()> {
        let iter = iter.into_iter();
        let (lower, _) = iter.size_hint();
        self.reserve(lower)?;
        for (k, v) in iter {
            self.insert(k, v)?;
        }
        Ok(())
    }

    pub fn try_clone(&self) -> Result<Self>
    where
        K: Clone,
        V: Clone,
        P: Clone,
        S: Clone,
        H: Clone,
    {
        Ok(UnorderedMap {
            table: self.table.try_clone()?,
        })
    }
}

impl<K, V, S, H> UnorderedMap<K, V, Restricted<(K, V), PairKey>, S, H>
where
    K: Hash + Eq + Clone,
    V: Default + Clone,
    S: BuildHasher,
    H: RawHeap,
{
    pub fn tombstone_value(&self) -> &K {
        &self.policy().tombstone_value().0
    }

    pub fn empty_value(&self) -> &K {
        &self.policy().empty_value().0
    }

    /// Replaces the tombstone sentinel key. O(capacity).
    ///
    /// `tombstone` must not be in the map or equal the empty sentinel.
    pub fn set_tombstone_value(&mut self, tombstone: K) {
        debug_assert!(!self.contains_key(&tombstone));
        self.table
            .engine_mut()
            .set_tombstone_value((tombstone, V::default()))
    }

    /// Replaces the empty sentinel key. O(capacity).
    ///
    /// `empty` must not be in the map or equal the tombstone sentinel.
    pub fn set_empty_value(&mut self, empty: K) {
        debug_assert!(!self.contains_key(&empty));
        self.table.engine_mut().set_empty_value((empty, V::default()))
    }
}

impl<K, Q, V, P, S, H> Index<&Q> for UnorderedMap<K, V, P, S, H>
where
    K: Hash + Eq + Borrow<Q>,
    Q: Hash + Eq + ?Sized,
    P: OccupancyPolicy<(K, V)>,
    S: BuildHasher,
    H: RawHeap,
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

impl<K, V, P, S, H> Extend<(K, V)> for UnorderedMap<K, V, P, S, H>
where
    K: Hash + Eq,
    P: OccupancyPolicy<(K, V)>,
    S: BuildHasher,
    H: RawHeap,
{
    /// # Panics
    /// Panics if the table cannot grow. Use [`try_extend`](UnorderedMap::try_extend) to handle
    /// the failure instead.
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        if let Err(e) = self.try_extend(iter) {
            panic!("cannot extend map: {e}");
        }
    }
}

impl<K, V, P, S> FromIterator<(K, V)> for UnorderedMap<K, V, P, S>
where
    K: Hash + Eq,
    P: OccupancyPolicy<(K, V)> + Default,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = UnorderedMap::new();
        map.extend(iter);
        map
    }
}

impl<K, V, P, S, H> Clone for UnorderedMap<K, V, P, S, H>
where
    K: Hash + Eq + Clone,
    V: Clone,
    P: OccupancyPolicy<(K, V)> + Clone,
    S: BuildHasher + Clone,
    H: RawHeap + Clone,
{
    /// # Panics
    /// Panics if the copy cannot be allocated.
    fn clone(&self) -> Self {
        match self.try_clone() {
            Ok(map) => map,
            Err(e) => panic!("cannot clone map: {e}"),
        }
    }
}

impl<K, V, P, S, H> PartialEq for UnorderedMap<K, V, P, S, H>
where
    K: Hash + Eq,
    V: PartialEq,
    P: OccupancyPolicy<(K, V)>,
    S: BuildHasher,
    H: RawHeap,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K, V, P, S, H> Eq for UnorderedMap<K, V, P, S, H>
where
    K: Hash + Eq,
    V: Eq,
    P: OccupancyPolicy<(K, V)>,
    S: BuildHasher,
    H: RawHeap,
{
}

impl<K: Debug, V: Debug, P: OccupancyPolicy<(K, V)>, S, H: RawHeap> Debug
    for UnorderedMap<K, V, P, S, H>
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map()
            .entries(self.table.engine().iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

/// Iterator over `(&K, &V)`, in table order.
pub struct Iter<'a, K, V, P: OccupancyPolicy<(K, V)>> {
    inner: table::Iter<'a, (K, V), P>,
}

impl<K, V, P: OccupancyPolicy<(K, V)>> Clone for Iter<'_, K, V, P> {
    fn clone(&self) -> Self {
        Iter {
            inner: self.inner.clone(),
        }
    }
}

impl<'a, K, V, P: OccupancyPolicy<(K, V)>> Iterator for Iter<'a, K, V, P> {
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

impl<'a, K, V, P: OccupancyPolicy<(K, V)>> DoubleEndedIterator for Iter<'a, K, V, P> {
    #[inline]
    fn next_back(&mut self) -> Option<(&'a K, &'a V)> {
        self.inner.next_back().map(|(k, v)| (k, v))
    }
}

impl<K, V, P: OccupancyPolicy<(K, V)>> ExactSizeIterator for Iter<'_, K, V, P> {}

impl<K, V, P: OccupancyPolicy<(K, V)>> FusedIterator for Iter<'_, K, V, P> {}

/// Iterator over `(&K, &mut V)`, in table order.
pub struct IterMut<'a, K, V, P: OccupancyPolicy<(K, V)>> {
    inner: table::IterMut<'a, (K, V), P>,
}

impl<'a, K, V, P: OccupancyPolicy<(K, V)>> Iterator for IterMut<'a, K, V, P> {
    type Item = (&'a K, &'a mut V);

    #[inline]
    fn next(&mut self) -> Option<(&'a K, &'a mut V)> {
        self.inner.next().map(|(k, v)| (&*k, v))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a, K, V, P: OccupancyPolicy<(K, V)>> DoubleEndedIterator for IterMut<'a, K, V, P> {
    #[inline]
    fn next_back(&mut self) -> Option<(&'a K, &'a mut V)> {
        self.inner.next_back().map(|(k, v)| (&*k, v))
    }
}

impl<K, V, P: OccupancyPolicy<(K, V)>> ExactSizeIterator for IterMut<'_, K, V, P> {}

impl<K, V, P: OccupancyPolicy<(K, V)>> FusedIterator for IterMut<'_, K, V, P> {}

impl<'a, K, V, P, S, H> IntoIterator for &'a UnorderedMap<K, V, P, S, H>
where
    K: Hash + Eq,
    P: OccupancyPolicy<(K, V)>,
    S: BuildHasher,
    H: RawHeap,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V, P>;

    fn into_iter(self) -> Iter<'a, K, V, P> {
        self.iter()
    }
}

impl<'a, K, V, P, S, H> IntoIterator for &'a mut UnorderedMap<K, V, P, S, H>
where
    K: Hash + Eq,
    P: OccupancyPolicy<(K, V)>,
    S: BuildHasher,
    H: RawHeap,
{
    type Item = (&'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V, P>;

    fn into_iter(self) -> IterMut<'a, K, V, P> {
        self.iter_mut()
    }
}

impl<K, V, P: OccupancyPolicy<(K, V)>, S, H: RawHeap> IntoIterator for UnorderedMap<K, V, P, S, H> {
    type Item = (K, V);
    type IntoIter = table::IntoIter<(K, V), P, H>;

    fn into_iter(self) -> table::IntoIter<(K, V), P, H> {
        self.table.into_iter()
    }
}
