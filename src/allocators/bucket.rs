//! Chunk lists and free lists shared by [`FixedBlockPool`](super::FixedBlockPool) and
//! [`SmallObjectAllocator`](super::SmallObjectAllocator).
//!
//! A [`Bucket`] serves blocks of a single size. Blocks are carved out of chunks obtained from a
//! [`RawHeap`]; every chunk starts with a [`ChunkHeader`] followed by its blocks:
//!
//! ```text
//!  chunk                cursor                   chunk + chunk_size
//!  |  next  | cursor |  block | block | ... |        (not carved yet)        |
//!                    ^ data
//! ```
//!
//! Blocks in `[data, cursor)` have been carved: each of them is either live or on the free list.
//! Only the newest chunk (the head of the chunk list) is ever bumped further.

use super::RawHeap;
use crate::error::Result;
use crate::freelist::{Freelist, NODE_ALIGN, NODE_SIZE};

use core::mem::size_of;
use core::ptr::{null_mut, NonNull};

use static_assertions::const_assert_eq;
use tracing::{debug, instrument, trace, Level};

/// Bytes taken by the header at the start of every chunk.
pub const CHUNK_OVERHEAD: usize = size_of::<ChunkHeader>();

const_assert_eq!(CHUNK_OVERHEAD, 2 * size_of::<usize>());

#[repr(C)]
struct ChunkHeader {
    next: *mut ChunkHeader,
    cursor: *mut u8,
}

/// Block and chunk sizes of a bucket.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Geometry {
    pub block_size: usize,
    pub chunk_size: usize,
}

impl Geometry {
    pub fn new(block_size: usize, chunk_size: usize) -> Self {
        debug_assert!(block_size >= NODE_SIZE && block_size % NODE_ALIGN == 0);
        debug_assert!(chunk_size >= CHUNK_OVERHEAD + block_size);
        Geometry {
            block_size,
            chunk_size,
        }
    }

    /// Number of blocks a fresh chunk can hold.
    pub fn blocks_per_chunk(&self) -> usize {
        (self.chunk_size - CHUNK_OVERHEAD) / self.block_size
    }

    #[inline(always)]
    fn data(&self, chunk: *mut ChunkHeader) -> *mut u8 {
        chunk.cast::<u8>().wrapping_add(CHUNK_OVERHEAD)
    }

    #[inline(always)]
    fn end(&self, chunk: *mut ChunkHeader) -> *mut u8 {
        chunk.cast::<u8>().wrapping_add(self.chunk_size)
    }
}

/// The blocks of one size class.
///
/// A bucket does not remember its geometry or its heap: the owner passes them to every call,
/// and must pass the same ones every time.
#[derive(Debug)]
pub(crate) struct Bucket {
    chunks: *mut ChunkHeader,
    free: Freelist,
    chunk_count: usize,
    live: usize,
}

impl Default for Bucket {
    fn default() -> Self {
        Bucket::new()
    }
}

impl Bucket {
    pub const fn new() -> Self {
        Bucket {
            chunks: null_mut(),
            free: Freelist::new(),
            chunk_count: 0,
            live: 0,
        }
    }

    /// Number of blocks handed out and not returned yet.
    #[inline]
    pub fn live(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    #[cfg(test)]
    pub fn free_blocks(&self) -> usize {
        self.free.len()
    }

    /// Hands out a block: a recycled one if possible, else one carved from the newest chunk,
    /// else one carved from a brand new chunk.
    pub fn allocate<H: RawHeap>(&mut self, geometry: Geometry, heap: &H) -> Result<NonNull<u8>> {
        let p = match self.free.pop_front() {
            Some(node) => node.cast(),
            None => match self.bump(geometry) {
                Some(p) => p,
                None => self.grow(geometry, heap)?,
            },
        };
        self.live += 1;
        trace!(?p, block_size = geometry.block_size, "Block allocated.");
        Ok(p)
    }

    /// Puts a block on the free list. No chunk bookkeeping takes place.
    ///
    /// # Safety
    /// `p` must have been returned by [`allocate`](Self::allocate) on this bucket (or on a bucket
    /// merged into it) and must not be used afterwards.
    pub unsafe fn deallocate(&mut self, p: NonNull<u8>, geometry: Geometry) {
        // Ownership is not checked: that would walk the whole chunk list.
        debug_assert!(self.live > 0);

        self.free.push_front(p.as_ptr().cast());
        self.live -= 1;
        trace!(?p, block_size = geometry.block_size, "Block freed.");
    }

    /// Carves the next block out of the newest chunk, if it has room for one.
    fn bump(&mut self, geometry: Geometry) -> Option<NonNull<u8>> {
        let chunk = NonNull::new(self.chunks)?;
        unsafe {
            let header = &mut *chunk.as_ptr();
            let room = geometry.end(chunk.as_ptr()) as usize - header.cursor as usize;
            if room < geometry.block_size {
                return None;
            }
            let p = header.cursor;
            header.cursor = p.add(geometry.block_size);
            Some(NonNull::new_unchecked(p))
        }
    }

    /// Links a new chunk in front of the chunk list and returns its first block.
    #[instrument(level = "debug", skip_all, fields(chunk_size = geometry.chunk_size), err(Debug, level = Level::ERROR))]
    fn grow<H: RawHeap>(&mut self, geometry: Geometry, heap: &H) -> Result<NonNull<u8>> {
        debug_assert!(H::ALIGN >= NODE_ALIGN);

        let chunk = heap.allocate_raw(geometry.chunk_size)?.cast::<ChunkHeader>();
        unsafe {
            let data = geometry.data(chunk.as_ptr());
            chunk.as_ptr().write(ChunkHeader {
                next: self.chunks,
                cursor: data.add(geometry.block_size),
            });
            self.chunks = chunk.as_ptr();
            self.chunk_count += 1;
            debug!(chunks = self.chunk_count, "New chunk.");
            Ok(NonNull::new_unchecked(data))
        }
    }

    /// Returns every chunk whose carved blocks are all on the free list to the heap,
    /// along with the free list entries that pointed into it. Returns the number of chunks freed.
    ///
    /// This has a time complexity of *O*(chunks × free blocks).
    ///
    /// # Safety
    /// `heap` must be the heap the chunks were obtained from.
    #[instrument(level = "debug", skip_all, fields(block_size = geometry.block_size), ret(level = Level::DEBUG))]
    pub unsafe fn garbage_collect<H: RawHeap>(&mut self, geometry: Geometry, heap: &H) -> usize {
        let mut freed = 0;
        let mut link: *mut *mut ChunkHeader = &mut self.chunks;
        while !(*link).is_null() {
            let chunk = *link;
            let low = geometry.data(chunk);
            let high = (*chunk).cursor;
            let carved = (high as usize - low as usize) / geometry.block_size;

            if self.free.count_in_range(low, high) == carved {
                self.free.remove_in_range(low, high);
                *link = (*chunk).next;
                heap.deallocate_raw(NonNull::new_unchecked(chunk.cast()), geometry.chunk_size);
                self.chunk_count -= 1;
                freed += 1;
            } else {
                link = &mut (*chunk).next;
            }
        }
        freed
    }

    /// Returns every chunk to the heap and forgets every block, live or not.
    ///
    /// # Safety
    /// `heap` must be the heap the chunks were obtained from, and no block of this bucket may be
    /// used afterwards.
    pub unsafe fn release<H: RawHeap>(&mut self, geometry: Geometry, heap: &H) {
        let mut chunk = self.chunks;
        while !chunk.is_null() {
            let next = (*chunk).next;
            heap.deallocate_raw(NonNull::new_unchecked(chunk.cast()), geometry.chunk_size);
            chunk = next;
        }
        if self.chunk_count != 0 {
            debug!(chunks = self.chunk_count, live = self.live, "Bucket released.");
        }
        *self = Bucket::new();
    }

    /// Takes over every chunk and free block of `other`, leaving it empty.
    ///
    /// The uncarved tail of `other`'s newest chunk is carved into the free list first,
    /// so that only `self`'s newest chunk keeps a bump cursor.
    /// `other` must use the same geometry and heap as `self`.
    pub fn merge(&mut self, other: &mut Bucket, geometry: Geometry) {
        while let Some(p) = other.bump(geometry) {
            // `p` was just carved and nobody else has seen it.
            unsafe { other.free.push_front(p.as_ptr().cast()) };
        }
        self.free.splice(&mut other.free);

        if let Some(other_head) = NonNull::new(other.chunks) {
            let mut tail = other_head.as_ptr();
            unsafe {
                while !(*tail).next.is_null() {
                    tail = (*tail).next;
                }
                match NonNull::new(self.chunks) {
                    // Keep our newest chunk in front, it is the one with a cursor.
                    Some(head) => {
                        (*tail).next = (*head.as_ptr()).next;
                        (*head.as_ptr()).next = other_head.as_ptr();
                    }
                    None => self.chunks = other_head.as_ptr(),
                }
            }
        }

        self.chunk_count += other.chunk_count;
        self.live += other.live;
        *other = Bucket::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocators::GlobalAllocator;
    use crate::util::in_range;

    const GEOMETRY: Geometry = Geometry {
        block_size: 16,
        chunk_size: CHUNK_OVERHEAD + 4 * 16,
    };

    /// Whether `p` is one of the blocks carved by `bucket`.
    fn carved(bucket: &Bucket, p: NonNull<u8>, geometry: Geometry) -> bool {
        let mut chunk = bucket.chunks;
        while !chunk.is_null() {
            let data = geometry.data(chunk);
            let cursor = unsafe { (*chunk).cursor };
            if in_range(p.as_ptr(), data, cursor) {
                let offset = p.as_ptr() as usize - data as usize;
                return offset % geometry.block_size == 0;
            }
            chunk = unsafe { (*chunk).next };
        }
        false
    }

    #[test]
    fn test_1() {
        let heap = GlobalAllocator::new();
        let mut bucket = Bucket::new();
        assert_eq!(GEOMETRY.blocks_per_chunk(), 4);

        let blocks: Vec<_> = (0..5)
            .map(|_| bucket.allocate(GEOMETRY, &heap).unwrap())
            .collect();
        assert_eq!(bucket.chunk_count(), 2);
        assert_eq!(bucket.live(), 5);
        assert_eq!(heap.bytes_allocated(), 2 * GEOMETRY.chunk_size);

        // The first four blocks are contiguous.
        for w in blocks[..4].windows(2) {
            assert_eq!(w[1].as_ptr() as usize - w[0].as_ptr() as usize, 16);
        }
        for &b in &blocks {
            assert!(carved(&bucket, b, GEOMETRY));
        }

        for &b in &blocks {
            unsafe { bucket.deallocate(b, GEOMETRY) };
        }
        assert_eq!(bucket.free_blocks(), 5);
        assert_eq!(unsafe { bucket.garbage_collect(GEOMETRY, &heap) }, 2);
        assert_eq!(bucket.chunk_count(), 0);
        assert_eq!(bucket.free_blocks(), 0);
        assert_eq!(heap.bytes_allocated(), 0);
    }

    #[test]
    fn test_2() {
        let heap = GlobalAllocator::new();
        let mut bucket = Bucket::new();

        let a = bucket.allocate(GEOMETRY, &heap).unwrap();
        let b = bucket.allocate(GEOMETRY, &heap).unwrap();
        unsafe { bucket.deallocate(a, GEOMETRY) };

        // `b` is still live, so the chunk stays.
        assert_eq!(unsafe { bucket.garbage_collect(GEOMETRY, &heap) }, 0);
        assert_eq!(bucket.chunk_count(), 1);

        // The freed block is recycled first.
        assert_eq!(bucket.allocate(GEOMETRY, &heap).unwrap(), a);

        unsafe {
            bucket.deallocate(a, GEOMETRY);
            bucket.deallocate(b, GEOMETRY);
            bucket.release(GEOMETRY, &heap);
        }
        assert_eq!(heap.bytes_allocated(), 0);
        assert_eq!(bucket.live(), 0);
    }

    #[test]
    fn test_3() {
        let heap = GlobalAllocator::new();
        let mut a = Bucket::new();
        let mut b = Bucket::new();

        let pa = a.allocate(GEOMETRY, &heap).unwrap();
        let pb = b.allocate(GEOMETRY, &heap).unwrap();

        a.merge(&mut b, GEOMETRY);
        assert_eq!(b.chunk_count(), 0);
        assert_eq!(b.live(), 0);
        assert_eq!(a.chunk_count(), 2);
        assert_eq!(a.live(), 2);
        // The three uncarved blocks of b's chunk were moved to the free list.
        assert_eq!(a.free_blocks(), 3);
        assert!(carved(&a, pb, GEOMETRY));

        unsafe {
            a.deallocate(pb, GEOMETRY);
            assert_eq!(a.garbage_collect(GEOMETRY, &heap), 1);
            a.deallocate(pa, GEOMETRY);
            assert_eq!(a.garbage_collect(GEOMETRY, &heap), 1);
        }
        assert_eq!(heap.bytes_allocated(), 0);
    }

    #[test]
    fn test_4() {
        let heap = GlobalAllocator::new();
        let mut bucket = Bucket::new();
        let blocks: Vec<_> = (0..40_000)
            .map(|_| bucket.allocate(GEOMETRY, &heap).unwrap())
            .collect();
        assert_eq!(bucket.chunk_count(), 10_000);

        // The oldest blocks sit in the last chunk of the list. Freeing them costs the same as
        // freeing the newest ones.
        for &b in &blocks {
            unsafe { bucket.deallocate(b, GEOMETRY) };
        }
        assert_eq!(bucket.live(), 0);
        assert_eq!(bucket.free_blocks(), 40_000);
        assert_eq!(bucket.allocate(GEOMETRY, &heap).unwrap(), blocks[39_999]);

        unsafe { bucket.release(GEOMETRY, &heap) };
        assert_eq!(heap.bytes_allocated(), 0);
    }
}
