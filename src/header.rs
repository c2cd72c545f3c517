//! Defines the [`Header`] that prefixes tracked allocations.

use core::mem::{align_of, size_of};

use static_assertions::const_assert_eq;

pub const HEADER_SIZE: usize = size_of::<Header>();
pub const HEADER_ALIGN: usize = align_of::<Header>();

// Tracked allocations promise an 8-byte prefix on every target.
const_assert_eq!(HEADER_SIZE, 8);

/// Stores the payload size of a tracked allocation so that
/// [`GlobalAllocator::deallocate`](crate::allocators::GlobalAllocator::deallocate)
/// can recover it without the caller restating it.
///
/// The header sits immediately before the pointer handed to the caller.
/// Raw allocations have no header at all.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct Header {
    payload_size: u64,
}

impl Header {
    #[inline(always)]
    pub fn new(payload_size: usize) -> Header {
        Header {
            payload_size: payload_size as u64,
        }
    }

    /// Returns the size the caller asked for.
    #[inline(always)]
    pub fn payload_size(&self) -> usize {
        self.payload_size as usize
    }

    /// Returns the number of bytes the allocation occupies, header included.
    #[inline(always)]
    pub fn block_size(&self) -> usize {
        self.payload_size() + HEADER_SIZE
    }
}
