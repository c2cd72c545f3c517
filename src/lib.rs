//! Budget-tracked pool allocators and an open-addressing hash table engine with pluggable
//! occupancy policies, plus the containers built on them.
//!
//! Everything here is single-threaded: allocators keep their counters in `Cell`s and no type is
//! `Sync`. Share a budget between containers with `&` or `Rc`.
//!
//! # Usage
//! ```toml
//! [dependencies]
//! pooled_hash = "0.1"
//! ```
//!
//! ```
//! use pooled_hash::containers::UnorderedMap;
//!
//! let mut ages: UnorderedMap<&str, u32> = UnorderedMap::new();
//! ages.insert("ada", 36)?;
//! ages.insert("alan", 41)?;
//! assert_eq!(ages["ada"], 36);
//! assert_eq!(ages.insert("ada", 37)?, Some(36));
//! # Ok::<(), pooled_hash::AllocError>(())
//! ```
//!
//! # Allocators
//! Memory flows through three layers:
//! - [`GlobalAllocator`] wraps `malloc` and keeps a *budget*: it counts the bytes it hands out,
//!   refuses requests that would cross the allocation limit and logs a warning when the warn
//!   watermark is crossed. Tracked allocations carry an 8 byte [header](#headers) with their
//!   size; raw ones carry nothing and the caller passes the size back on free.
//! - [`FixedBlockPool`] serves blocks of one size out of chunks it takes from a heap. Freed
//!   blocks go onto an intrusive free list and are handed out again before any new chunk is
//!   carved; [`garbage_collect`](FixedBlockPool::garbage_collect) returns the chunks that hold no
//!   live block.
//! - [`SmallObjectAllocator`] is a set of pools, one per 8 byte size class, sharing 16 KiB
//!   pages. Requests above its ceiling go straight to the heap below it.
//!
//! The layers meet at the [`RawHeap`](allocators::RawHeap) trait. Every type that needs memory
//! is generic over one, so the budget is chosen by the caller and not hidden in a global:
//!
//! ```
//! use pooled_hash::allocators::{BudgetConfig, GlobalAllocator};
//! use pooled_hash::containers::UnorderedSet;
//! use pooled_hash::hash::FnvBuildHasher;
//! use pooled_hash::table::Segregated;
//!
//! let budget = GlobalAllocator::with_config(BudgetConfig {
//!     allocation_limit: 4096,
//!     ..Default::default()
//! });
//! let mut set: UnorderedSet<u64, Segregated, FnvBuildHasher, &GlobalAllocator> =
//!     UnorderedSet::new_in(&budget);
//!
//! set.try_extend(0..100)?;
//! let err = set.try_extend(0..10_000).unwrap_err();
//! assert!(err.is_out_of_memory());
//! assert_eq!(set.len(), 100);
//! # Ok::<(), pooled_hash::AllocError>(())
//! ```
//!
//! The `new()` constructors use [`GlobalAllocator::shared`], a per-thread budget with no limit.
//!
//! ## Headers
//! A tracked block is laid out as `[payload size: u64][payload]`, and the pointer handed out
//! points at the payload. [`GlobalAllocator::deallocate`] steps back over the header to learn
//! how much to give back to the budget.
//!
//! ## Free lists
//! While a pool block is free its first word holds the address of the next free block, so a
//! pool's bookkeeping costs no memory beyond a two-word header per chunk. This is also why
//! pool blocks are at least one pointer wide.
//!
//! # Hash engine
//! [`HashEngine`] is an open-addressing table with double-hash probing over a prime number of
//! slots. It is keyless: callers pass a 64-bit hash and an equality predicate, which lets the
//! same engine back sets, maps and pointer indexes. The table grows past a load factor of 0.717,
//! shrinks below 0.1, and is rebuilt in place once tombstones fill half of the free slots.
//!
//! How a slot records its state is up to the [occupancy policy](table::policy):
//! - [`Unified`](table::Unified) keeps a status byte in every slot.
//! - [`Segregated`](table::Segregated) keeps two bitsets beside the table.
//! - [`Restricted`](table::Restricted) reserves two values of the stored type as sentinels and
//!   needs no extra memory at all.
//!
//! # Containers
//! [`UnorderedSet`] and [`UnorderedMap`] take the policy as a type parameter.
//! [`OrderedSet`] and [`OrderedMap`] iterate in ascending key order. Their values sit in nodes
//! drawn from a [`FixedBlockPool`], indexed by a `Restricted` engine of node pointers.

pub use crate::allocators::{BudgetConfig, FixedBlockPool, GlobalAllocator, SmallObjectAllocator};
pub use crate::containers::{OrderedMap, OrderedSet, UnorderedMap, UnorderedSet};
pub use crate::error::{AllocError, Result};
pub use crate::table::HashEngine;

pub mod allocators;
pub mod containers;
pub mod error;
mod freelist;
pub mod hash;
mod header;
pub mod primes;
pub mod table;
mod util;
