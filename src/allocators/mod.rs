//! The [`GlobalAllocator`], [`FixedBlockPool`] and [`SmallObjectAllocator`] allocators,
//! and the [`RawHeap`] trait that connects them.

use core::ptr::NonNull;
use std::rc::Rc;

use crate::error::Result;

pub mod global;
pub mod pool;
pub mod small_object;

mod bucket;

pub use global::{BudgetConfig, GlobalAllocator};
pub use pool::FixedBlockPool;
pub use small_object::SmallObjectAllocator;

/// A source of untracked-size ("raw") memory.
///
/// Everything in this crate that needs memory is generic over a `RawHeap`, which lets callers decide
/// which budget pays for it: a shared [`GlobalAllocator`], a private one, or a
/// [`SmallObjectAllocator`] sitting on top of either.
///
/// Raw memory carries no header, so callers must hand the original size back on
/// [`deallocate_raw`](RawHeap::deallocate_raw).
///
/// # Safety
/// Implementors must return blocks that are valid for reads and writes of `size` bytes,
/// aligned to at least [`ALIGN`](RawHeap::ALIGN) bytes and disjoint from every other live block.
/// Zero-sized requests must succeed with a dangling, aligned pointer.
pub unsafe trait RawHeap {
    /// The alignment every returned block is guaranteed to have.
    const ALIGN: usize;

    /// Allocates `size` bytes of uninitialized memory.
    fn allocate_raw(&self, size: usize) -> Result<NonNull<u8>>;

    /// Allocates `size` bytes of zeroed memory.
    fn allocate_raw_cleared(&self, size: usize) -> Result<NonNull<u8>>;

    /// Returns a block to the heap.
    ///
    /// # Safety
    /// `ptr` must have been returned by this heap's `allocate_raw*` with exactly `size` bytes
    /// and must not be used afterwards.
    unsafe fn deallocate_raw(&self, ptr: NonNull<u8>, size: usize);

    /// Returns whether `self` and `other` hand out memory from the same budget,
    /// i.e. a block obtained from one may be returned to the other.
    fn is_same_heap(&self, other: &Self) -> bool;
}

unsafe impl<T: RawHeap + ?Sized> RawHeap for &T {
    const ALIGN: usize = T::ALIGN;

    #[inline]
    fn allocate_raw(&self, size: usize) -> Result<NonNull<u8>> {
        (**self).allocate_raw(size)
    }

    #[inline]
    fn allocate_raw_cleared(&self, size: usize) -> Result<NonNull<u8>> {
        (**self).allocate_raw_cleared(size)
    }

    #[inline]
    unsafe fn deallocate_raw(&self, ptr: NonNull<u8>, size: usize) {
        (**self).deallocate_raw(ptr, size)
    }

    #[inline]
    fn is_same_heap(&self, other: &Self) -> bool {
        (**self).is_same_heap(*other)
    }
}

unsafe impl<T: RawHeap + ?Sized> RawHeap for Rc<T> {
    const ALIGN: usize = T::ALIGN;

    #[inline]
    fn allocate_raw(&self, size: usize) -> Result<NonNull<u8>> {
        (**self).allocate_raw(size)
    }

    #[inline]
    fn allocate_raw_cleared(&self, size: usize) -> Result<NonNull<u8>> {
        (**self).allocate_raw_cleared(size)
    }

    #[inline]
    unsafe fn deallocate_raw(&self, ptr: NonNull<u8>, size: usize) {
        (**self).deallocate_raw(ptr, size)
    }

    #[inline]
    fn is_same_heap(&self, other: &Self) -> bool {
        (**self).is_same_heap(&**other)
    }
}

#[cfg(test)]
pub(crate) mod tests;
