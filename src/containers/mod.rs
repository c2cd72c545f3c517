//! Associative containers built on the [`HashEngine`](crate::table::HashEngine).
//!
//! * [`UnorderedSet`] and [`UnorderedMap`] store their values directly in the engine's slots and
//!   take the occupancy policy as a type parameter. Each comes with an alias per policy.
//! * [`OrderedSet`] and [`OrderedMap`] keep their values in pooled nodes linked in ascending key
//!   order, and index the nodes with an engine of pointers.
//!
//! Every container draws its memory from a [`RawHeap`](crate::allocators::RawHeap): the thread's
//! shared [`GlobalAllocator`](crate::allocators::GlobalAllocator) for `new`, or whatever heap is
//! handed to the `*_in` constructors.

pub mod keyed;
pub mod ordered_map;
pub mod ordered_set;
pub mod unordered_map;
pub mod unordered_set;

mod sorted;

pub use keyed::KeyedTable;
pub use sorted::Iter as OrderedIter;
pub use ordered_map::OrderedMap;
pub use ordered_set::OrderedSet;
pub use unordered_map::{
    RestrictedUnorderedMap, SegregatedUnorderedMap, UnifiedUnorderedMap, UnorderedMap,
};
pub use unordered_set::{
    RestrictedUnorderedSet, SegregatedUnorderedSet, UnifiedUnorderedSet, UnorderedSet,
};
