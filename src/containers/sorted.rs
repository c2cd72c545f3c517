//! Key-ordered storage shared by [`OrderedSet`](super::OrderedSet) and
//! [`OrderedMap`](super::OrderedMap).
//!
//! Every value lives in a node taken from a [`FixedBlockPool`], and a [`HashEngine`] of node
//! pointers indexes the nodes by key. The engine uses the [`Restricted`] policy with two addresses
//! no pool block can have as its sentinels, so an index slot costs exactly one pointer.
//!
//! The nodes form two doubly linked lists. The sorted list holds the nodes in ascending key order.
//! New nodes go to the back of the pending list, which is sorted and merged into the sorted list
//! the next time anything looks at the order. Lookups go through the index and never merge.

use crate::allocators::pool::DEFAULT_OBJECTS_PER_CHUNK;
use crate::allocators::{FixedBlockPool, RawHeap};
use crate::error::Result;
use crate::table::{HashEngine, KeyOf, Restricted};
use crate::util::dangling;

use core::alloc::Layout;
use core::borrow::Borrow;
use core::cell::Cell;
use core::hash::{BuildHasher, Hash};
use core::iter::FusedIterator;
use core::marker::PhantomData;
use core::mem::align_of;
use core::ptr::NonNull;

use tracing::trace;

struct Node<T> {
    value: T,
    prev: Option<Link<T>>,
    next: Option<Link<T>>,
}

type Link<T> = NonNull<Node<T>>;

/// The sentinel addresses of the index. Pool blocks come from real allocations and never sit
/// in the first two alignment units of the address space.
fn sentinels<T>() -> Restricted<Link<T>> {
    let align = align_of::<Node<T>>();
    Restricted::new(dangling(align).cast(), dangling(2 * align).cast())
}

/// # Safety
/// `node` must be live for `'a`.
#[inline]
unsafe fn key_of<'a, T: 'a, X: KeyOf<T>>(node: Link<T>) -> &'a X::Key {
    X::key(&(*node.as_ptr()).value)
}

#[inline]
fn node_hash<T, X, S>(build_hasher: &S, node: &Link<T>) -> u64
where
    X: KeyOf<T>,
    X::Key: Hash,
    S: BuildHasher,
{
    // Indexed nodes are live.
    build_hasher.hash_one(unsafe { key_of::<T, X>(*node) })
}

/// Sorts the chain of `len` nodes starting at `head` by key and returns its new head. Only the
/// `next` links are followed and rewritten.
///
/// # Safety
/// The chain must hold at least `len` live nodes.
unsafe fn sort_chain<T, X>(head: Option<Link<T>>, len: usize) -> Option<Link<T>>
where
    X: KeyOf<T>,
    X::Key: Ord,
{
    if len <= 1 {
        if let Some(node) = head {
            (*node.as_ptr()).next = None;
        }
        return head;
    }
    let mut cut = head?;
    for _ in 1..len / 2 {
        cut = (*cut.as_ptr()).next?;
    }
    let second = (*cut.as_ptr()).next.take();
    let first = sort_chain::<T, X>(head, len / 2);
    let second = sort_chain::<T, X>(second, len - len / 2);
    merge_chains::<T, X>(first, second)
}

/// Merges two `None`-terminated chains sorted by key into one, following `next` links only.
///
/// # Safety
/// Both chains must consist of live nodes.
unsafe fn merge_chains<T, X>(mut a: Option<Link<T>>, mut b: Option<Link<T>>) -> Option<Link<T>>
where
    X: KeyOf<T>,
    X::Key: Ord,
{
    let mut head = None;
    let mut tail: Option<Link<T>> = None;
    loop {
        let taken = match (a, b) {
            (Some(x), Some(y)) => {
                if key_of::<T, X>(y) < key_of::<T, X>(x) {
                    b = (*y.as_ptr()).next;
                    y
                } else {
                    a = (*x.as_ptr()).next;
                    x
                }
            }
            (rest, None) | (None, rest) => {
                match tail {
                    Some(tail) => (*tail.as_ptr()).next = rest,
                    None => head = rest,
                }
                return head;
            }
        };
        match tail {
            Some(tail) => (*tail.as_ptr()).next = Some(taken),
            None => head = Some(taken),
        }
        tail = Some(taken);
    }
}

pub(crate) struct SortedTable<T, X, S, H: RawHeap + Clone> {
    index: HashEngine<Link<T>, Restricted<Link<T>>, H>,
    nodes: FixedBlockPool<H>,
    // The lists are relinked by `&self` methods when pending nodes get merged. That only happens
    // while the pending list is non-empty, which is never the case once an `Iter` exists.
    head: Cell<Option<Link<T>>>,
    tail: Cell<Option<Link<T>>>,
    pending_head: Cell<Option<Link<T>>>,
    pending_tail: Cell<Option<Link<T>>>,
    build_hasher: S,
    marker: PhantomData<(Box<Node<T>>, X)>,
}

impl<T, X, S, H> SortedTable<T, X, S, H>
where
    X: KeyOf<T>,
    X::Key: Hash + Ord,
    S: BuildHasher,
    H: RawHeap + Clone,
{
    /// # Panics
    /// Panics if `T` needs a stricter alignment than a pool over `H` provides.
    pub(crate) fn new_in(build_hasher: S, heap: H) -> Self {
        let layout = Layout::new::<Node<T>>();
        let nodes = FixedBlockPool::for_layout_in(layout, DEFAULT_OBJECTS_PER_CHUNK, heap.clone());
        let nodes = match nodes {
            Ok(nodes) => nodes,
            Err(e) => panic!("cannot pool nodes of {layout:?}: {e}"),
        };
        SortedTable {
            index: HashEngine::new_in(sentinels(), heap),
            nodes,
            head: Cell::new(None),
            tail: Cell::new(None),
            pending_head: Cell::new(None),
            pending_tail: Cell::new(None),
            build_hasher,
            marker: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub(crate) fn hasher(&self) -> &S {
        &self.build_hasher
    }

    pub(crate) fn nodes(&self) -> &FixedBlockPool<H> {
        &self.nodes
    }

    fn find<Q>(&self, key: &Q) -> Option<Link<T>>
    where
        X::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.build_hasher.hash_one(key);
        let slot = self.index.find(hash, |node| {
            let stored = unsafe { key_of::<T, X>(*node) };
            <X::Key as Borrow<Q>>::borrow(stored) == key
        })?;
        self.index.get(slot).copied()
    }

    pub(crate) fn get<Q>(&self, key: &Q) -> Option<&T>
    where
        X::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let node = self.find(key)?;
        Some(unsafe { &(*node.as_ptr()).value })
    }

    /// The key of the returned value must not be changed.
    pub(crate) fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut T>
    where
        X::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let node = self.find(key)?;
        Some(unsafe { &mut (*node.as_ptr()).value })
    }

    /// Adds `value` unless a value with an equal key is present, in which case nothing changes
    /// and `value` is handed back.
    pub(crate) fn insert(&mut self, value: T) -> Result<Option<T>> {
        if self.find(X::key(&value)).is_some() {
            return Ok(Some(value));
        }
        let hash = self.build_hasher.hash_one(X::key(&value));

        // A key above every sorted key can go straight to the back of the sorted list.
        let in_order = self.pending_head.get().is_none()
            && self
                .tail
                .get()
                .map_or(true, |tail| unsafe { key_of::<T, X>(tail) < X::key(&value) });
        let (head, tail) = if in_order {
            (&self.head, &self.tail)
        } else {
            (&self.pending_head, &self.pending_tail)
        };

        let node = self.nodes.allocate_object(Node {
            value,
            prev: tail.get(),
            next: None,
        })?;
        let build_hasher = &self.build_hasher;
        let indexed = self
            .index
            .insert_unique(hash, node, |n| node_hash::<T, X, S>(build_hasher, n));
        if let Err(e) = indexed {
            unsafe { self.nodes.deallocate_object(node) };
            return Err(e);
        }

        match tail.get() {
            Some(last) => unsafe { (*last.as_ptr()).next = Some(node) },
            None => head.set(Some(node)),
        }
        tail.set(Some(node));
        Ok(None)
    }

    /// Sorts the pending nodes and merges them into the sorted list.
    fn merge_pending(&self) {
        let Some(pending) = self.pending_head.take() else {
            return;
        };
        self.pending_tail.set(None);

        unsafe {
            let mut count = 0;
            let mut cursor = Some(pending);
            while let Some(node) = cursor {
                count += 1;
                cursor = (*node.as_ptr()).next;
            }
            let pending = sort_chain::<T, X>(Some(pending), count);
            let head = merge_chains::<T, X>(self.head.get(), pending);

            let mut prev = None;
            let mut cursor = head;
            while let Some(node) = cursor {
                (*node.as_ptr()).prev = prev;
                prev = Some(node);
                cursor = (*node.as_ptr()).next;
            }
            self.head.set(head);
            self.tail.set(prev);
            trace!(merged = count, len = self.len(), "Pending nodes merged.");
        }
    }

    /// Removes `node` from the index and from whichever list holds it, and returns its value.
    fn remove_node(&mut self, node: Link<T>) -> Result<T> {
        let build_hasher = &self.build_hasher;
        let hash = node_hash::<T, X, S>(build_hasher, &node);
        let slot = match self.index.find(hash, |n| *n == node) {
            Some(slot) => slot,
            None => unreachable!("listed node missing from the index"),
        };
        self.index.erase(slot, |n| node_hash::<T, X, S>(build_hasher, n))?;

        let Node { value, prev, next } = unsafe { node.as_ptr().read() };
        match prev {
            Some(prev) => unsafe { (*prev.as_ptr()).next = next },
            None if self.head.get() == Some(node) => self.head.set(next),
            None => self.pending_head.set(next),
        }
        match next {
            Some(next) => unsafe { (*next.as_ptr()).prev = prev },
            None if self.tail.get() == Some(node) => self.tail.set(prev),
            None => self.pending_tail.set(prev),
        }
        unsafe { self.nodes.deallocate(node.cast()) };
        Ok(value)
    }

    pub(crate) fn remove<Q>(&mut self, key: &Q) -> Result<Option<T>>
    where
        X::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.find(key) {
            Some(node) => self.remove_node(node).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) fn first(&self) -> Option<&T> {
        self.merge_pending();
        self.head.get().map(|node| unsafe { &(*node.as_ptr()).value })
    }

    pub(crate) fn last(&self) -> Option<&T> {
        self.merge_pending();
        self.tail.get().map(|node| unsafe { &(*node.as_ptr()).value })
    }

    pub(crate) fn pop_first(&mut self) -> Result<Option<T>> {
        self.merge_pending();
        match self.head.get() {
            Some(node) => self.remove_node(node).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) fn pop_last(&mut self) -> Result<Option<T>> {
        self.merge_pending();
        match self.tail.get() {
            Some(node) => self.remove_node(node).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) fn iter(&self) -> Iter<'_, T> {
        self.merge_pending();
        Iter {
            head: self.head.get(),
            tail: self.tail.get(),
            len: self.len(),
            marker: PhantomData,
        }
    }

    /// Iterates from the first value whose key is not below `key`.
    pub(crate) fn lower_bound<Q>(&self, key: &Q) -> Iter<'_, T>
    where
        X::Key: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.iter_from(|stored| <X::Key as Borrow<Q>>::borrow(stored) >= key)
    }

    /// Iterates from the first value whose key is above `key`.
    pub(crate) fn upper_bound<Q>(&self, key: &Q) -> Iter<'_, T>
    where
        X::Key: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.iter_from(|stored| <X::Key as Borrow<Q>>::borrow(stored) > key)
    }

    fn iter_from(&self, starts: impl Fn(&X::Key) -> bool) -> Iter<'_, T> {
        let mut iter = self.iter();
        while let Some(node) = iter.head.filter(|_| iter.len > 0) {
            if starts(unsafe { key_of::<T, X>(node) }) {
                break;
            }
            iter.head = unsafe { (*node.as_ptr()).next };
            iter.len -= 1;
        }
        iter
    }

    /// Returns the node chunks that no longer hold a value to the heap.
    pub(crate) fn garbage_collect(&self) -> usize {
        self.nodes.garbage_collect()
    }
}

impl<T, X, S, H: RawHeap + Clone> SortedTable<T, X, S, H> {
    /// Drops every value. The index keeps its capacity and the pool its chunks.
    pub(crate) fn clear(&mut self) {
        for list in [&self.head, &self.pending_head] {
            let mut cursor = list.take();
            while let Some(node) = cursor {
                unsafe {
                    cursor = (*node.as_ptr()).next;
                    self.nodes.deallocate_object(node);
                }
            }
        }
        self.tail.set(None);
        self.pending_tail.set(None);
        self.index.clear();
    }
}

impl<T, X, S, H: RawHeap + Clone> Drop for SortedTable<T, X, S, H> {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Iterator over the values of an ordered container, smallest key first.
pub struct Iter<'a, T> {
    head: Option<Link<T>>,
    tail: Option<Link<T>>,
    len: usize,
    marker: PhantomData<&'a Node<T>>,
}

impl<T> Clone for Iter<'_, T> {
    fn clone(&self) -> Self {
        Iter { ..*self }
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    #[inline]
    fn next(&mut self) -> Option<&'a T> {
        if self.len == 0 {
            return None;
        }
        let node = self.head?.as_ptr();
        self.len -= 1;
        unsafe {
            self.head = (*node).next;
            Some(&(*node).value)
        }
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.len, Some(self.len))
    }
}

impl<'a, T> DoubleEndedIterator for Iter<'a, T> {
    #[inline]
    fn next_back(&mut self) -> Option<&'a T> {
        if self.len == 0 {
            return None;
        }
        let node = self.tail?.as_ptr();
        self.len -= 1;
        unsafe {
            self.tail = (*node).prev;
            Some(&(*node).value)
        }
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

impl<T> FusedIterator for Iter<'_, T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocators::GlobalAllocator;
    use crate::hash::FnvBuildHasher;
    use crate::table::WholeValue;

    type Words<'h> = SortedTable<String, WholeValue, FnvBuildHasher, &'h GlobalAllocator>;
    type Numbers<'h> = SortedTable<u32, WholeValue, FnvBuildHasher, &'h GlobalAllocator>;

    fn words(table: &Words<'_>) -> Vec<String> {
        table.iter().cloned().collect()
    }

    fn numbers(iter: Iter<'_, u32>) -> Vec<u32> {
        iter.copied().collect()
    }

    #[test]
    fn iterates_in_key_order() {
        let heap = GlobalAllocator::new();
        let mut table = Words::new_in(FnvBuildHasher::default(), &heap);
        for w in ["one", "two", "three", "four"] {
            assert_eq!(table.insert(w.to_string()).unwrap(), None);
        }
        assert_eq!(table.insert("two".into()).unwrap().as_deref(), Some("two"));
        assert_eq!(words(&table), ["four", "one", "three", "two"]);

        assert_eq!(table.remove("three").unwrap().as_deref(), Some("three"));
        assert_eq!(table.pop_first().unwrap().as_deref(), Some("four"));
        assert_eq!(table.pop_last().unwrap().as_deref(), Some("two"));
        assert_eq!(table.first(), table.last());
        assert_eq!(words(&table), ["one"]);

        table.insert("five".into()).unwrap();
        let backwards: Vec<&String> = table.iter().rev().collect();
        assert_eq!(backwards, ["one", "five"]);
    }

    #[test]
    fn pending_nodes_can_be_removed_before_a_merge() {
        let heap = GlobalAllocator::new();
        let mut table = Numbers::new_in(FnvBuildHasher::default(), &heap);
        table.insert(10).unwrap();
        table.insert(20).unwrap();
        // Below the sorted tail, so these wait in the pending list.
        for v in [15, 5, 12, 1] {
            table.insert(v).unwrap();
        }
        assert_eq!(table.remove(&5).unwrap(), Some(5));
        assert_eq!(table.remove(&1).unwrap(), Some(1));
        assert_eq!(table.remove(&20).unwrap(), Some(20));
        assert_eq!(table.get(&12), Some(&12));

        assert_eq!(numbers(table.iter()), [10, 12, 15]);
        assert_eq!(table.iter().rev().copied().collect::<Vec<_>>(), [15, 12, 10]);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn bounds_start_at_the_right_node() {
        let heap = GlobalAllocator::new();
        let mut table = Numbers::new_in(FnvBuildHasher::default(), &heap);
        for v in [40, 10, 30, 20] {
            table.insert(v).unwrap();
        }
        assert_eq!(numbers(table.lower_bound(&20)), [20, 30, 40]);
        assert_eq!(numbers(table.upper_bound(&20)), [30, 40]);
        assert_eq!(numbers(table.lower_bound(&25)), [30, 40]);
        assert_eq!(numbers(table.lower_bound(&0)), [10, 20, 30, 40]);
        assert_eq!(table.upper_bound(&40).len(), 0);
        assert_eq!(table.lower_bound(&20).rev().next(), Some(&40));
        assert_eq!(table.upper_bound(&40).next_back(), None);
    }

    #[test]
    fn merges_keep_every_node() {
        let heap = GlobalAllocator::new();
        let mut table = Numbers::new_in(FnvBuildHasher::default(), &heap);
        let mut expected = vec![];
        for round in 0..20_u32 {
            for i in 0..37 {
                let v = (i * 7919 + round * 104_729) % 1000;
                if table.insert(v).unwrap().is_none() {
                    expected.push(v);
                }
            }
            expected.sort_unstable();
            assert_eq!(numbers(table.iter()), expected);
            assert_eq!(table.first(), expected.first());
            assert_eq!(table.last(), expected.last());
        }
    }

    #[test]
    fn nodes_return_to_the_pool() {
        let heap = GlobalAllocator::new();
        let mut table = Words::new_in(FnvBuildHasher::default(), &heap);
        for i in 0..100 {
            table.insert(i.to_string()).unwrap();
        }
        assert_eq!(table.nodes().objects_allocated(), 100);
        let chunks = table.nodes().chunk_count();

        for i in 0..100 {
            table.remove(&i.to_string()).unwrap();
        }
        assert_eq!(table.nodes().objects_allocated(), 0);
        assert_eq!(table.garbage_collect(), chunks);
        assert_eq!(table.first(), None);

        // One value in each list.
        table.insert("b".into()).unwrap();
        table.insert("a".into()).unwrap();
        table.clear();
        assert_eq!(table.len(), 0);
        assert!(table.iter().next().is_none());
        drop(table);
        assert_eq!(heap.bytes_allocated(), 0);
    }
}
