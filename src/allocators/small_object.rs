//! Defines the [`SmallObjectAllocator`].

use super::bucket::{Bucket, Geometry, CHUNK_OVERHEAD};
use super::{GlobalAllocator, RawHeap};
use crate::error::{AllocError, Result};
use crate::util::{dangling, round_up};

use core::cell::UnsafeCell;
use core::fmt::Debug;
use core::ptr::NonNull;
use std::rc::Rc;

use tracing::{instrument, trace, Level};

/// Size of every chunk.
pub const PAGE_SIZE: usize = 16 * 1024;

/// Requests up to this many bytes are bucketed unless another ceiling is configured.
pub const DEFAULT_CEILING: usize = 256;

/// Bucket `i` serves blocks of `(i + 1) << ALIGNMENT_SHIFT` bytes.
pub const ALIGNMENT_SHIFT: u32 = 3;

pub const ALIGNMENT: usize = 1 << ALIGNMENT_SHIFT;

/// An allocator for many small size classes at once.
///
/// Requests of at most [`ceiling`](Self::ceiling) bytes are rounded up to a multiple of
/// [`ALIGNMENT`] and served by the bucket of that size, each bucket running the
/// [`FixedBlockPool`](super::FixedBlockPool) algorithm over [`PAGE_SIZE`] chunks.
/// Larger requests go straight to the underlying heap.
///
/// Nothing records which path served a pointer: [`deallocate`](Self::deallocate) makes the same
/// decision again from the size the caller passes, so that size must be the one requested.
pub struct SmallObjectAllocator<H: RawHeap = Rc<GlobalAllocator>> {
    buckets: UnsafeCell<Box<[Bucket]>>,
    ceiling: usize,
    heap: H,
}

impl SmallObjectAllocator {
    pub fn new() -> Self {
        SmallObjectAllocator::with_ceiling_in(DEFAULT_CEILING, GlobalAllocator::shared())
    }

    /// # Panics
    /// Panics if `ceiling` is 0 or a block of `ceiling` bytes does not fit in a page.
    pub fn with_ceiling(ceiling: usize) -> Self {
        SmallObjectAllocator::with_ceiling_in(ceiling, GlobalAllocator::shared())
    }
}

impl Default for SmallObjectAllocator {
    fn default() -> Self {
        SmallObjectAllocator::new()
    }
}

impl<H: RawHeap> SmallObjectAllocator<H> {
    pub fn new_in(heap: H) -> Self {
        SmallObjectAllocator::with_ceiling_in(DEFAULT_CEILING, heap)
    }

    /// Creates an allocator bucketing requests of up to `ceiling` bytes, rounded up to a
    /// multiple of [`ALIGNMENT`].
    ///
    /// # Panics
    /// Panics if `ceiling` is 0 or a block of `ceiling` bytes does not fit in a page.
    pub fn with_ceiling_in(ceiling: usize, heap: H) -> Self {
        assert!(H::ALIGN >= ALIGNMENT, "the heap must align blocks to {ALIGNMENT} bytes");
        let ceiling = match round_up(ceiling, ALIGNMENT) {
            Some(c) if c != 0 && c <= PAGE_SIZE - CHUNK_OVERHEAD => c,
            _ => panic!("invalid small object ceiling: {ceiling}"),
        };
        let buckets = (0..ceiling >> ALIGNMENT_SHIFT).map(|_| Bucket::new()).collect();
        SmallObjectAllocator {
            buckets: UnsafeCell::new(buckets),
            ceiling,
            heap,
        }
    }

    /// Largest request served from a bucket.
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn heap(&self) -> &H {
        &self.heap
    }

    #[inline(always)]
    fn bucket_index(size: usize) -> usize {
        (size - 1) >> ALIGNMENT_SHIFT
    }

    #[inline(always)]
    fn geometry(index: usize) -> Geometry {
        Geometry::new((index + 1) << ALIGNMENT_SHIFT, PAGE_SIZE)
    }

    /// Returns a block of at least `size` bytes aligned to [`ALIGNMENT`].
    /// A zero-sized request returns a dangling pointer.
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>> {
        if size == 0 {
            return Ok(dangling(ALIGNMENT));
        }
        if size > self.ceiling {
            trace!(size, "Forwarding large request.");
            return self.heap.allocate_raw(size);
        }
        let index = Self::bucket_index(size);
        // SAFETY: the allocator is `!Sync` and the buckets are never borrowed across calls.
        let buckets = unsafe { &mut *self.buckets.get() };
        buckets[index].allocate(Self::geometry(index), &self.heap)
    }

    /// Like [`allocate`](Self::allocate) but the memory is zeroed.
    pub fn allocate_cleared(&self, size: usize) -> Result<NonNull<u8>> {
        if size > self.ceiling {
            return self.heap.allocate_raw_cleared(size);
        }
        let p = self.allocate(size)?;
        unsafe { p.as_ptr().write_bytes(0, size) };
        Ok(p)
    }

    /// Returns a block to its bucket, or to the heap if `size` is above the ceiling.
    ///
    /// # Safety
    /// `ptr` must have been returned by this allocator (or by one merged into it)
    /// for a request of exactly `size` bytes, and must not be used afterwards.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        if size == 0 {
            return;
        }
        if size > self.ceiling {
            return self.heap.deallocate_raw(ptr, size);
        }
        let index = Self::bucket_index(size);
        let buckets = &mut *self.buckets.get();
        buckets[index].deallocate(ptr, Self::geometry(index));
    }

    /// Returns every page that contains no live block to the heap, bucket by bucket.
    /// Returns the number of pages freed.
    ///
    /// Like [`FixedBlockPool::garbage_collect`](super::FixedBlockPool::garbage_collect) this is
    /// expensive.
    #[instrument(level = "debug", skip(self), ret(level = Level::DEBUG))]
    pub fn garbage_collect(&self) -> usize {
        let buckets = unsafe { &mut *self.buckets.get() };
        buckets
            .iter_mut()
            .enumerate()
            .map(|(i, bucket)| unsafe { bucket.garbage_collect(Self::geometry(i), &self.heap) })
            .sum()
    }

    /// Frees every page, live blocks included. Requests above the ceiling are not tracked and
    /// stay allocated.
    pub fn reset(&mut self) {
        for (i, bucket) in self.buckets.get_mut().iter_mut().enumerate() {
            unsafe { bucket.release(Self::geometry(i), &self.heap) };
        }
    }

    /// Takes over every page and free block of `other`, bucket by bucket.
    /// `other` is left freshly constructed.
    ///
    /// # Errors
    /// Fails with [`AllocError::PoolMismatch`] if the ceilings differ and with
    /// [`AllocError::HeapMismatch`] if the two allocators draw from different heaps.
    #[instrument(level = "debug", skip_all, err(Debug, level = Level::ERROR))]
    pub fn merge(&mut self, other: &mut Self, collect_garbage: bool) -> Result<()> {
        if self.ceiling != other.ceiling {
            return Err(AllocError::PoolMismatch {
                expected: self.ceiling,
                found: other.ceiling,
            });
        }
        if !self.heap.is_same_heap(&other.heap) {
            return Err(AllocError::HeapMismatch);
        }

        let ours = self.buckets.get_mut().iter_mut();
        let theirs = other.buckets.get_mut().iter_mut();
        for (i, (a, b)) in ours.zip(theirs).enumerate() {
            a.merge(b, Self::geometry(i));
        }
        if collect_garbage {
            self.garbage_collect();
        }
        Ok(())
    }

    /// Bytes in bucketed blocks currently handed out, counted at their rounded size.
    /// Forwarded requests are accounted by the heap only.
    pub fn bytes_allocated(&self) -> usize {
        let buckets = unsafe { &*self.buckets.get() };
        buckets
            .iter()
            .enumerate()
            .map(|(i, b)| b.live() * Self::geometry(i).block_size)
            .sum()
    }

    /// Bytes held in pages.
    pub fn bytes_claimed(&self) -> usize {
        self.page_count() * PAGE_SIZE
    }

    pub fn page_count(&self) -> usize {
        let buckets = unsafe { &*self.buckets.get() };
        buckets.iter().map(Bucket::chunk_count).sum()
    }
}

unsafe impl<H: RawHeap> RawHeap for SmallObjectAllocator<H> {
    const ALIGN: usize = ALIGNMENT;

    #[inline]
    fn allocate_raw(&self, size: usize) -> Result<NonNull<u8>> {
        self.allocate(size)
    }

    #[inline]
    fn allocate_raw_cleared(&self, size: usize) -> Result<NonNull<u8>> {
        self.allocate_cleared(size)
    }

    #[inline]
    unsafe fn deallocate_raw(&self, ptr: NonNull<u8>, size: usize) {
        self.deallocate(ptr, size)
    }

    #[inline]
    fn is_same_heap(&self, other: &Self) -> bool {
        core::ptr::eq(self, other)
    }
}

impl<H: RawHeap> Debug for SmallObjectAllocator<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SmallObjectAllocator")
            .field("ceiling", &self.ceiling)
            .field("bytes_allocated", &self.bytes_allocated())
            .field("pages", &self.page_count())
            .finish()
    }
}

impl<H: RawHeap> Drop for SmallObjectAllocator<H> {
    fn drop(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_1() {
        let heap = GlobalAllocator::new();
        let small = SmallObjectAllocator::new_in(&heap);
        assert_eq!(small.ceiling(), DEFAULT_CEILING);

        let p = small.allocate(13).unwrap();
        assert_eq!(p.as_ptr() as usize % ALIGNMENT, 0);
        assert_eq!(small.bytes_allocated(), 16);
        assert_eq!(small.page_count(), 1);
        assert_eq!(heap.bytes_allocated(), PAGE_SIZE);

        // Same bucket.
        let q = small.allocate(16).unwrap();
        assert_eq!(q.as_ptr() as usize - p.as_ptr() as usize, 16);
        assert_eq!(small.page_count(), 1);

        // Different bucket, different page.
        let r = small.allocate(17).unwrap();
        assert_eq!(small.page_count(), 2);
        assert_eq!(small.bytes_allocated(), 56);

        unsafe {
            small.deallocate(p, 13);
            small.deallocate(q, 16);
            small.deallocate(r, 17);
        }
        assert_eq!(small.bytes_allocated(), 0);
        assert_eq!(small.garbage_collect(), 2);
        assert_eq!(heap.bytes_allocated(), 0);
    }

    #[test]
    fn test_2() {
        let heap = GlobalAllocator::new();
        let small = SmallObjectAllocator::with_ceiling_in(64, &heap);

        let big = small.allocate(65).unwrap();
        assert_eq!(small.bytes_allocated(), 0);
        assert_eq!(small.page_count(), 0);
        assert_eq!(heap.bytes_allocated(), 65);

        unsafe { small.deallocate(big, 65) };
        assert_eq!(heap.bytes_allocated(), 0);
    }

    #[test]
    fn test_3() {
        let small = SmallObjectAllocator::new();
        let z = small.allocate(0).unwrap();
        assert_eq!(small.page_count(), 0);
        unsafe { small.deallocate(z, 0) };

        let p = small.allocate_cleared(100).unwrap();
        let bytes = unsafe { core::slice::from_raw_parts(p.as_ptr(), 100) };
        assert!(bytes.iter().all(|&b| b == 0));
        unsafe { small.deallocate(p, 100) };
    }

    #[test]
    fn test_4() {
        let heap = GlobalAllocator::new();
        let mut a = SmallObjectAllocator::new_in(&heap);
        let mut b = SmallObjectAllocator::new_in(&heap);

        let p = b.allocate(40).unwrap();
        a.merge(&mut b, false).unwrap();
        assert_eq!(b.page_count(), 0);
        assert_eq!(a.page_count(), 1);
        assert_eq!(a.bytes_allocated(), 40);

        unsafe { a.deallocate(p, 40) };
        a.merge(&mut b, true).unwrap();
        assert_eq!(a.page_count(), 0);
        assert_eq!(heap.bytes_allocated(), 0);

        let mut c = SmallObjectAllocator::with_ceiling_in(128, &heap);
        assert_eq!(
            a.merge(&mut c, false),
            Err(AllocError::PoolMismatch {
                expected: 256,
                found: 128
            })
        );
    }

    #[test]
    #[should_panic]
    fn test_5() {
        let _ = SmallObjectAllocator::with_ceiling(PAGE_SIZE);
    }
}
