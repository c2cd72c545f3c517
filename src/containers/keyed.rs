//! Hashing and key comparison on top of a [`HashEngine`].

use crate::allocators::RawHeap;
use crate::error::Result;
use crate::table::{HashEngine, IntoIter, Iter, IterMut, KeyOf, OccupancyPolicy};

use core::borrow::Borrow;
use core::fmt::Debug;
use core::hash::{BuildHasher, Hash};
use core::marker::PhantomData;

/// A [`HashEngine`] whose values are found by the key `X` selects from them.
///
/// The unordered containers are thin wrappers over this type: a set keys its values by the whole
/// value ([`WholeValue`](crate::table::WholeValue)), a map its `(key, value)` pairs by the first
/// half ([`PairKey`](crate::table::PairKey)).
pub struct KeyedTable<T, X, P: OccupancyPolicy<T>, S, H: RawHeap> {
    engine: HashEngine<T, P, H>,
    build_hasher: S,
    key: PhantomData<X>,
}

impl<T, X, P, S, H> KeyedTable<T, X, P, S, H>
where
    X: KeyOf<T>,
    X::Key: Hash + Eq,
    P: OccupancyPolicy<T>,
    S: BuildHasher,
    H: RawHeap,
{
    pub fn new_in(policy: P, build_hasher: S, heap: H) -> Self {
        KeyedTable {
            engine: HashEngine::new_in(policy, heap),
            build_hasher,
            key: PhantomData,
        }
    }

    pub fn with_capacity_in(capacity: usize, policy: P, build_hasher: S, heap: H) -> Result<Self> {
        Ok(KeyedTable {
            engine: HashEngine::with_capacity_in(capacity, policy, heap)?,
            build_hasher,
            key: PhantomData,
        })
    }

    /// The engine itself. Values must not be moved to slots their key does not hash to.
    #[inline]
    pub fn engine_mut(&mut self) -> &mut HashEngine<T, P, H> {
        &mut self.engine
    }

    #[inline]
    pub fn hasher(&self) -> &S {
        &self.build_hasher
    }

    #[inline]
    pub fn hash<Q: Hash + ?Sized>(&self, key: &Q) -> u64 {
        self.build_hasher.hash_one(key)
    }

    /// Returns the slot index of the value whose key equals `key`.
    pub fn find<Q>(&self, key: &Q) -> Option<usize>
    where
        X::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash(key);
        self.engine.find(hash, |v| <X::Key as Borrow<Q>>::borrow(X::key(v)) == key)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&T>
    where
        X::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key).and_then(|i| self.engine.get(i))
    }

    /// The key of the returned value must not be changed.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut T>
    where
        X::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let i = self.find(key)?;
        self.engine.get_mut(i)
    }

    /// Inserts `value` unless a value with an equal key is present, in which case `value` is
    /// handed back. Returns the slot index of the value with that key.
    pub fn insert(&mut self, value: T) -> Result<(usize, Option<T>)> {
        if let Some(i) = self.find(X::key(&value)) {
            return Ok((i, Some(value)));
        }
        Ok((self.insert_unique(value)?, None))
    }

    /// Inserts `value`, whose key the caller guarantees is not present yet.
    pub fn insert_unique(&mut self, value: T) -> Result<usize> {
        let hash = self.hash(X::key(&value));
        let build_hasher = &self.build_hasher;
        self.engine.insert_unique(hash, value, |v| build_hasher.hash_one(X::key(v)))
    }

    /// Removes the value at slot `index`. See [`HashEngine::erase`].
    pub fn erase(&mut self, index: usize) -> Result<T> {
        let build_hasher = &self.build_hasher;
        self.engine.erase(index, |v| build_hasher.hash_one(X::key(v)))
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Result<Option<T>>
    where
        X::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.find(key) {
            Some(i) => self.erase(i).map(Some),
            None => Ok(None),
        }
    }

    /// Makes room for `additional` more values.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        let len = self.engine.len().saturating_add(additional);
        let build_hasher = &self.build_hasher;
        self.engine.reserve(len, |v| build_hasher.hash_one(X::key(v)))
    }

    pub fn rehash(&mut self, capacity: usize) -> Result<()> {
        let build_hasher = &self.build_hasher;
        self.engine.rehash(capacity, |v| build_hasher.hash_one(X::key(v)))
    }

    pub fn shrink_to_fit(&mut self) -> Result<()> {
        let build_hasher = &self.build_hasher;
        self.engine.shrink_to_fit(|v| build_hasher.hash_one(X::key(v)))
    }

    pub fn retain(&mut self, f: impl FnMut(&mut T) -> bool) -> Result<()> {
        let build_hasher = &self.build_hasher;
        self.engine.retain(f, |v| build_hasher.hash_one(X::key(v)))
    }

    #[inline]
    pub fn clear(&mut self) {
        self.engine.clear()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.engine.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.engine.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.engine.capacity()
    }

    #[inline]
    pub fn iter(&self) -> Iter<'_, T, P> {
        self.engine.iter()
    }

    #[inline]
    pub fn iter_mut(&mut self) -> IterMut<'_, T, P> {
        self.engine.iter_mut()
    }

    #[inline]
    pub fn into_engine(self) -> HashEngine<T, P, H> {
        self.engine
    }

    /// A copy of the table with the same capacity, policy, hasher and heap.
    pub fn try_clone(&self) -> Result<Self>
    where
        T: Clone,
        P: Clone,
        S: Clone,
        H: Clone,
    {
        let mut copy = KeyedTable::with_capacity_in(
            self.capacity(),
            self.engine.policy().clone(),
            self.build_hasher.clone(),
            self.engine.heap().clone(),
        )?;
        for value in self.iter() {
            copy.insert_unique(value.clone())?;
        }
        Ok(copy)
    }
}

impl<T, X, P: OccupancyPolicy<T>, S, H: RawHeap> KeyedTable<T, X, P, S, H> {
    #[inline]
    pub fn engine(&self) -> &HashEngine<T, P, H> {
        &self.engine
    }
}

impl<T, X, P: OccupancyPolicy<T>, S, H: RawHeap> IntoIterator for KeyedTable<T, X, P, S, H> {
    type Item = T;
    type IntoIter = IntoIter<T, P, H>;

    fn into_iter(self) -> IntoIter<T, P, H> {
        self.engine.into_iter()
    }
}

impl<T, X, P: OccupancyPolicy<T>, S, H: RawHeap> Debug for KeyedTable<T, X, P, S, H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyedTable")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocators::GlobalAllocator;
    use crate::hash::FnvBuildHasher;
    use crate::table::{PairKey, Segregated, Unified, WholeValue};

    type Names<'h> = KeyedTable<String, WholeValue, Unified, FnvBuildHasher, &'h GlobalAllocator>;
    type Scores<'h> =
        KeyedTable<(String, u32), PairKey, Segregated, FnvBuildHasher, &'h GlobalAllocator>;

    #[test]
    fn lookups_borrow_the_key() {
        let heap = GlobalAllocator::new();
        let mut names = Names::new_in(Unified, FnvBuildHasher::default(), &heap);
        for name in ["ada", "grace", "barbara"] {
            assert!(names.insert(name.to_string()).unwrap().1.is_none());
        }
        let (_, rejected) = names.insert("ada".to_string()).unwrap();
        assert_eq!(rejected.as_deref(), Some("ada"));

        assert_eq!(names.get("grace").map(String::as_str), Some("grace"));
        assert_eq!(names.remove("grace").unwrap().as_deref(), Some("grace"));
        assert_eq!(names.remove("grace").unwrap(), None);
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn pairs_are_keyed_by_their_first_half() {
        let heap = GlobalAllocator::new();
        let mut scores = Scores::new_in(Segregated, FnvBuildHasher::default(), &heap);
        scores.insert(("ada".into(), 1)).unwrap();
        let (i, rejected) = scores.insert(("ada".into(), 2)).unwrap();
        assert_eq!(rejected, Some(("ada".into(), 2)));
        assert_eq!(scores.engine().get(i).map(|p| p.1), Some(1));

        scores.get_mut("ada").unwrap().1 = 3;
        assert_eq!(scores.get("ada").map(|p| p.1), Some(3));

        scores.reserve(100).unwrap();
        assert!(scores.capacity() as f64 * crate::table::MAX_LOAD_FACTOR >= 101.0);
        let copy = scores.try_clone().unwrap();
        assert_eq!(copy.get("ada"), Some(&("ada".to_string(), 3)));
        assert_eq!(copy.capacity(), scores.capacity());
    }
}
