//! Defines the [`FixedBlockPool`] allocator.

use super::bucket::{Bucket, Geometry, CHUNK_OVERHEAD};
use super::{GlobalAllocator, RawHeap};
use crate::error::{AllocError, Result};
use crate::freelist::NODE_SIZE;
use crate::util::round_up;

use core::alloc::Layout;
use core::cell::UnsafeCell;
use core::fmt::Debug;
use core::mem::{align_of, size_of};
use core::ptr::NonNull;
use std::rc::Rc;

use tracing::{instrument, Level};

/// Number of blocks per chunk used when none is given.
pub const DEFAULT_OBJECTS_PER_CHUNK: usize = 32;

/// Every block size is a multiple of this.
pub const BLOCK_ALIGN: usize = 8;

/// A single-size-class allocator.
///
/// Blocks are bump-allocated from chunks of `objects_per_chunk` blocks obtained from the heap's
/// raw path, and recycled through an intrusive free list: while a block is free its first word
/// links it to the next free block. Freeing a block never returns memory to the heap by itself;
/// [`garbage_collect`](Self::garbage_collect) does that for chunks that are entirely free.
///
/// All allocation methods take `&self`, so a pool can be shared by several containers through
/// `&FixedBlockPool` or `Rc<FixedBlockPool>`. The pool must outlive every block it handed out.
pub struct FixedBlockPool<H: RawHeap = Rc<GlobalAllocator>> {
    bucket: UnsafeCell<Bucket>,
    geometry: Geometry,
    heap: H,
}

impl FixedBlockPool {
    /// Creates a pool of `object_size` blocks drawing from the thread's shared budget.
    ///
    /// # Panics
    /// Panics if `objects_per_chunk` is 0 or if a chunk would not fit in the address space.
    pub fn new(object_size: usize, objects_per_chunk: usize) -> Self {
        FixedBlockPool::new_in(object_size, objects_per_chunk, GlobalAllocator::shared())
    }

    /// Creates a pool whose blocks can hold values of `layout`.
    pub fn for_layout(layout: Layout, objects_per_chunk: usize) -> Result<Self> {
        FixedBlockPool::for_layout_in(layout, objects_per_chunk, GlobalAllocator::shared())
    }
}

impl<H: RawHeap> FixedBlockPool<H> {
    /// The strictest block alignment a pool over `H` can guarantee.
    pub const MAX_ALIGN: usize = if H::ALIGN < CHUNK_OVERHEAD {
        H::ALIGN
    } else {
        CHUNK_OVERHEAD
    };

    /// Creates a pool of `object_size` blocks drawing from `heap`.
    /// The object size is rounded up to a multiple of [`BLOCK_ALIGN`].
    ///
    /// # Panics
    /// Panics if `objects_per_chunk` is 0 or if a chunk would not fit in the address space.
    pub fn new_in(object_size: usize, objects_per_chunk: usize, heap: H) -> Self {
        match Self::geometry(object_size, BLOCK_ALIGN, objects_per_chunk) {
            Some(geometry) => FixedBlockPool {
                bucket: UnsafeCell::new(Bucket::new()),
                geometry,
                heap,
            },
            None => panic!("invalid pool geometry: {object_size} bytes x {objects_per_chunk}"),
        }
    }

    /// Creates a pool whose blocks can hold values of `layout`, drawing from `heap`.
    ///
    /// # Errors
    /// Fails with [`AllocError::Unaligned`] if `layout` needs a stricter alignment than
    /// [`MAX_ALIGN`](Self::MAX_ALIGN), and with [`AllocError::SizeOverflow`] if `objects_per_chunk`
    /// is 0 or a chunk would not fit in the address space.
    pub fn for_layout_in(layout: Layout, objects_per_chunk: usize, heap: H) -> Result<Self> {
        if layout.align() > Self::MAX_ALIGN {
            return Err(AllocError::Unaligned {
                align: layout.align(),
                supported: Self::MAX_ALIGN,
            });
        }
        let align = layout.align().max(BLOCK_ALIGN);
        let geometry = Self::geometry(layout.size(), align, objects_per_chunk)
            .ok_or(AllocError::SizeOverflow)?;
        Ok(FixedBlockPool {
            bucket: UnsafeCell::new(Bucket::new()),
            geometry,
            heap,
        })
    }

    fn geometry(object_size: usize, align: usize, objects_per_chunk: usize) -> Option<Geometry> {
        if objects_per_chunk == 0 {
            return None;
        }
        let block_size = round_up(object_size.max(NODE_SIZE), align)?;
        let chunk_size = block_size
            .checked_mul(objects_per_chunk)?
            .checked_add(CHUNK_OVERHEAD)?;
        Some(Geometry::new(block_size, chunk_size))
    }

    /// Returns a block of [`block_size`](Self::block_size) bytes.
    ///
    /// # Errors
    /// Fails only when a new chunk is needed and the heap refuses it.
    #[inline]
    pub fn allocate(&self) -> Result<NonNull<u8>> {
        // SAFETY: the pool is `!Sync` and the bucket is never borrowed across calls.
        let bucket = unsafe { &mut *self.bucket.get() };
        bucket.allocate(self.geometry, &self.heap)
    }

    /// Returns a block to the pool.
    ///
    /// # Safety
    /// `ptr` must have been returned by [`allocate`](Self::allocate) on this pool
    /// (or on a pool merged into it) and must not be used afterwards.
    #[inline]
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        let bucket = &mut *self.bucket.get();
        bucket.deallocate(ptr, self.geometry)
    }

    /// Moves `value` into a fresh block.
    ///
    /// # Panics
    /// Panics if a `T` does not fit in a block.
    pub fn allocate_object<T>(&self, value: T) -> Result<NonNull<T>> {
        assert!(
            self.fits(Layout::new::<T>()),
            "a value of {} bytes aligned to {} does not fit in a {}-byte block",
            size_of::<T>(),
            align_of::<T>(),
            self.block_size()
        );
        let p = self.allocate()?.cast::<T>();
        unsafe { p.as_ptr().write(value) };
        Ok(p)
    }

    /// Drops the value at `ptr` and returns its block to the pool.
    ///
    /// # Safety
    /// `ptr` must have been returned by [`allocate_object`](Self::allocate_object) on this pool
    /// and must not be used afterwards.
    pub unsafe fn deallocate_object<T>(&self, ptr: NonNull<T>) {
        ptr.as_ptr().drop_in_place();
        self.deallocate(ptr.cast());
    }

    /// Returns whether a value of `layout` fits in one block.
    pub fn fits(&self, layout: Layout) -> bool {
        let block_align = 1 << self.geometry.block_size.trailing_zeros();
        layout.size() <= self.geometry.block_size
            && layout.align() <= block_align
            && layout.align() <= Self::MAX_ALIGN
    }

    /// Returns every chunk that contains no live block to the heap.
    /// Returns the number of chunks freed.
    ///
    /// This walks the free list once per chunk, so it is expensive: call it when memory is
    /// actually needed back, not after every deallocation.
    #[instrument(level = "debug", skip(self), fields(block_size = self.geometry.block_size), ret(level = Level::DEBUG))]
    pub fn garbage_collect(&self) -> usize {
        let bucket = unsafe { &mut *self.bucket.get() };
        unsafe { bucket.garbage_collect(self.geometry, &self.heap) }
    }

    /// Frees every chunk, live blocks included, and returns the pool to its freshly constructed
    /// state.
    pub fn reset(&mut self) {
        unsafe { self.bucket.get_mut().release(self.geometry, &self.heap) }
    }

    /// Takes over every block and chunk of `other`, which is left freshly constructed.
    /// Blocks allocated from `other` may afterwards be returned to `self`.
    ///
    /// When `collect_garbage` is set, [`garbage_collect`](Self::garbage_collect) runs afterwards.
    ///
    /// # Errors
    /// Fails with [`AllocError::PoolMismatch`] if the two pools do not have the same block size
    /// and chunk capacity, and with [`AllocError::HeapMismatch`] if they draw from different heaps.
    #[instrument(level = "debug", skip_all, err(Debug, level = Level::ERROR))]
    pub fn merge(&mut self, other: &mut Self, collect_garbage: bool) -> Result<()> {
        if self.geometry != other.geometry {
            return Err(AllocError::PoolMismatch {
                expected: self.geometry.block_size,
                found: other.geometry.block_size,
            });
        }
        if !self.heap.is_same_heap(&other.heap) {
            return Err(AllocError::HeapMismatch);
        }

        self.bucket
            .get_mut()
            .merge(other.bucket.get_mut(), self.geometry);
        if collect_garbage {
            self.garbage_collect();
        }
        Ok(())
    }

    /// Size of every block, [`BLOCK_ALIGN`]-rounded.
    pub fn block_size(&self) -> usize {
        self.geometry.block_size
    }

    pub fn objects_per_chunk(&self) -> usize {
        self.geometry.blocks_per_chunk()
    }

    /// Number of blocks handed out and not yet returned.
    pub fn objects_allocated(&self) -> usize {
        unsafe { (*self.bucket.get()).live() }
    }

    /// Bytes in blocks handed out and not yet returned.
    pub fn bytes_allocated(&self) -> usize {
        self.objects_allocated() * self.geometry.block_size
    }

    /// Bytes held from the heap, chunk headers included.
    pub fn bytes_claimed(&self) -> usize {
        self.chunk_count() * self.geometry.chunk_size
    }

    pub fn chunk_count(&self) -> usize {
        unsafe { (*self.bucket.get()).chunk_count() }
    }

    pub fn heap(&self) -> &H {
        &self.heap
    }
}

impl<H: RawHeap> Debug for FixedBlockPool<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FixedBlockPool")
            .field("block_size", &self.block_size())
            .field("objects_per_chunk", &self.objects_per_chunk())
            .field("objects_allocated", &self.objects_allocated())
            .field("chunks", &self.chunk_count())
            .finish()
    }
}

impl<H: RawHeap> Drop for FixedBlockPool<H> {
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
        let pool = FixedBlockPool::new_in(13, 4, &heap);
        assert_eq!(pool.block_size(), 16);
        assert_eq!(pool.objects_per_chunk(), 4);
        assert_eq!(pool.bytes_claimed(), 0);

        let p = pool.allocate().unwrap();
        assert_eq!(pool.bytes_allocated(), 16);
        assert_eq!(pool.bytes_claimed(), CHUNK_OVERHEAD + 64);
        assert_eq!(heap.bytes_allocated(), pool.bytes_claimed());
        unsafe { pool.deallocate(p) };
        assert_eq!(pool.bytes_allocated(), 0);
    }

    #[test]
    fn test_2() {
        let heap = GlobalAllocator::new();
        let pool = FixedBlockPool::new_in(0, 1, &heap);
        assert_eq!(pool.block_size(), BLOCK_ALIGN);
    }

    #[test]
    #[should_panic]
    fn test_3() {
        let _ = FixedBlockPool::new_in(16, 0, GlobalAllocator::shared());
    }

    #[test]
    fn test_4() {
        let heap = GlobalAllocator::new();
        let l = Layout::from_size_align(24, 16).unwrap();
        let pool = FixedBlockPool::for_layout_in(l, 8, &heap).unwrap();
        assert_eq!(pool.block_size(), 32);
        for _ in 0..20 {
            let p = pool.allocate().unwrap();
            assert_eq!(p.as_ptr() as usize % 16, 0);
        }

        let l = Layout::from_size_align(64, 64).unwrap();
        assert_eq!(
            FixedBlockPool::for_layout_in(l, 8, &heap).unwrap_err(),
            AllocError::Unaligned {
                align: 64,
                supported: 16
            }
        );
    }

    #[test]
    fn test_5() {
        let heap = GlobalAllocator::new();
        let pool = FixedBlockPool::new_in(size_of::<String>(), 2, &heap);
        let objects: Vec<_> = (0..5)
            .map(|i| pool.allocate_object(format!("object {i}")).unwrap())
            .collect();
        for (i, p) in objects.iter().enumerate() {
            assert_eq!(unsafe { p.as_ref() }, &format!("object {i}"));
        }
        for p in objects {
            unsafe { pool.deallocate_object(p) };
        }
        assert_eq!(pool.objects_allocated(), 0);
        assert_eq!(pool.garbage_collect(), 3);
        assert_eq!(heap.bytes_allocated(), 0);
    }

    #[test]
    #[should_panic]
    fn test_6() {
        let pool = FixedBlockPool::new(8, 4);
        let _ = pool.allocate_object([0_u64; 4]);
    }

    #[test]
    fn test_7() {
        let heap = GlobalAllocator::new();
        // Outlives `a`, which borrows `c` mutably during the merge.
        let other_heap = GlobalAllocator::new();
        let mut a = FixedBlockPool::new_in(16, 4, &heap);
        let mut b = FixedBlockPool::new_in(24, 4, &heap);
        assert_eq!(
            a.merge(&mut b, false),
            Err(AllocError::PoolMismatch {
                expected: 16,
                found: 24
            })
        );

        let mut c = FixedBlockPool::new_in(16, 4, &other_heap);
        assert_eq!(a.merge(&mut c, false), Err(AllocError::HeapMismatch));
    }

    #[test]
    fn test_8() {
        let heap = GlobalAllocator::new();
        let mut pool = FixedBlockPool::new_in(64, 16, &heap);
        for _ in 0..100 {
            pool.allocate().unwrap();
        }
        assert_eq!(pool.chunk_count(), 7);
        pool.reset();
        assert_eq!(pool.chunk_count(), 0);
        assert_eq!(pool.objects_allocated(), 0);
        assert_eq!(heap.bytes_allocated(), 0);
        assert!(pool.allocate().is_ok());
    }
}
