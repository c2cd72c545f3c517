//! A budget-tracking allocator on top of the system heap.
//
// Every other allocator in the crate obtains its memory here, so the counters below see every
// byte the crate holds. The counters are plain `Cell`s: the allocator is single threaded and
// `!Sync`, and sharing it across threads is not supported.

use super::RawHeap;
use crate::error::{AllocError, Result};
use crate::header::{Header, HEADER_ALIGN, HEADER_SIZE};
use crate::util::dangling;

use core::cell::Cell;
use core::fmt::Debug;
use core::mem::size_of;
use core::ptr::NonNull;
use std::rc::Rc;

use static_assertions::const_assert;
use tracing::{error, instrument, trace, warn, Level};

/// Alignment of every block handed out by `malloc` on the supported targets.
pub const SYSTEM_ALIGN: usize = 2 * size_of::<usize>();

const_assert!(SYSTEM_ALIGN % HEADER_ALIGN == 0);

thread_local! {
    static SHARED: Rc<GlobalAllocator> = Rc::new(GlobalAllocator::new());
}

/// Budget settings of a [`GlobalAllocator`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BudgetConfig {
    /// Requests that would push the allocated total past this many bytes fail.
    pub allocation_limit: usize,
    /// Once the allocated total reaches this many bytes a warning is logged and
    /// [`GlobalAllocator::is_warn_watermark_reached`] starts returning `true`.
    pub warn_watermark: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        BudgetConfig {
            allocation_limit: usize::MAX,
            warn_watermark: usize::MAX,
        }
    }
}

/// The root allocator: serves requests from the system heap and keeps track of a byte budget.
///
/// Two flavours of allocation exist:
/// * tracked ([`allocate`](Self::allocate)): prefixed with an 8-byte header recording the size,
///   freed with [`deallocate`](Self::deallocate);
/// * raw ([`allocate_raw`](Self::allocate_raw)): no header, the caller passes the size back to
///   [`deallocate_raw`](Self::deallocate_raw).
///
/// Every request is first checked against the allocation limit and fails with
/// [`AllocError::LimitExceeded`] instead of reaching the system heap when it does not fit.
pub struct GlobalAllocator {
    allocated: Cell<usize>,
    peak: Cell<usize>,
    limit: Cell<usize>,
    warn_watermark: Cell<usize>,
}

impl Debug for GlobalAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GlobalAllocator")
            .field("allocated", &self.allocated.get())
            .field("peak", &self.peak.get())
            .field("limit", &self.limit.get())
            .field("warn_watermark", &self.warn_watermark.get())
            .finish()
    }
}

impl Default for GlobalAllocator {
    fn default() -> Self {
        GlobalAllocator::new()
    }
}

impl GlobalAllocator {
    /// Creates an allocator with no limit and no watermark.
    pub const fn new() -> Self {
        GlobalAllocator {
            allocated: Cell::new(0),
            peak: Cell::new(0),
            limit: Cell::new(usize::MAX),
            warn_watermark: Cell::new(usize::MAX),
        }
    }

    pub fn with_config(config: BudgetConfig) -> Self {
        let allocator = GlobalAllocator::new();
        allocator.configure(config);
        allocator
    }

    /// Returns the calling thread's default budget, used by every `new()` constructor in the crate.
    pub fn shared() -> Rc<GlobalAllocator> {
        SHARED.with(Rc::clone)
    }

    pub fn configure(&self, config: BudgetConfig) {
        self.limit.set(config.allocation_limit);
        self.warn_watermark.set(config.warn_watermark);
    }

    pub fn config(&self) -> BudgetConfig {
        BudgetConfig {
            allocation_limit: self.limit.get(),
            warn_watermark: self.warn_watermark.get(),
        }
    }

    pub fn set_allocation_limit(&self, allocation_limit: usize) {
        self.limit.set(allocation_limit);
    }

    pub fn set_warn_watermark(&self, warn_watermark: usize) {
        self.warn_watermark.set(warn_watermark);
    }

    pub fn allocation_limit(&self) -> usize {
        self.limit.get()
    }

    pub fn warn_watermark(&self) -> usize {
        self.warn_watermark.get()
    }

    /// Bytes currently held, headers of tracked allocations included.
    pub fn bytes_allocated(&self) -> usize {
        self.allocated.get()
    }

    /// The largest value [`bytes_allocated`](Self::bytes_allocated) has ever had.
    pub fn peak_bytes_allocated(&self) -> usize {
        self.peak.get()
    }

    pub fn is_out_of_memory(&self) -> bool {
        self.allocated.get() >= self.limit.get()
    }

    pub fn is_warn_watermark_reached(&self) -> bool {
        self.allocated.get() >= self.warn_watermark.get()
    }

    /// Allocates `size` bytes prefixed with a size header.
    /// The returned pointer is aligned to [`HEADER_SIZE`] bytes.
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>> {
        self.allocate_tracked(size, false)
    }

    /// Like [`allocate`](Self::allocate) but the memory is zeroed.
    pub fn allocate_cleared(&self, size: usize) -> Result<NonNull<u8>> {
        self.allocate_tracked(size, true)
    }

    /// Allocates `size` bytes without a header, aligned to [`SYSTEM_ALIGN`].
    pub fn allocate_raw(&self, size: usize) -> Result<NonNull<u8>> {
        self.allocate_untracked(size, false)
    }

    /// Like [`allocate_raw`](Self::allocate_raw) but the memory is zeroed.
    pub fn allocate_raw_cleared(&self, size: usize) -> Result<NonNull<u8>> {
        self.allocate_untracked(size, true)
    }

    /// Frees a block returned by [`allocate`](Self::allocate) or
    /// [`allocate_cleared`](Self::allocate_cleared).
    ///
    /// # Safety
    /// `ptr` must come from one of the tracked allocation functions of this allocator
    /// and must not be used afterwards.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        debug_assert_eq!(ptr.as_ptr() as usize % HEADER_ALIGN, 0);
        let block_start = ptr.as_ptr().sub(HEADER_SIZE);
        let header: Header = block_start.cast::<Header>().read();
        trace!(?ptr, size = header.payload_size(), "Tracked deallocation.");
        self.release(header.block_size());
        libc::free(block_start.cast());
    }

    /// Frees a block returned by [`allocate_raw`](Self::allocate_raw) or
    /// [`allocate_raw_cleared`](Self::allocate_raw_cleared).
    ///
    /// # Safety
    /// `ptr` must come from one of the raw allocation functions of this allocator,
    /// `size` must be the size it was requested with, and `ptr` must not be used afterwards.
    pub unsafe fn deallocate_raw(&self, ptr: NonNull<u8>, size: usize) {
        if size == 0 {
            return;
        }
        trace!(?ptr, size, "Raw deallocation.");
        self.release(size);
        libc::free(ptr.as_ptr().cast());
    }

    fn allocate_tracked(&self, size: usize, cleared: bool) -> Result<NonNull<u8>> {
        let block_size = size
            .checked_add(HEADER_SIZE)
            .ok_or(AllocError::SizeOverflow)?;
        let block_start = self.acquire(block_size, cleared)?;
        unsafe {
            block_start.cast::<Header>().as_ptr().write(Header::new(size));
            Ok(NonNull::new_unchecked(block_start.as_ptr().add(HEADER_SIZE)))
        }
    }

    fn allocate_untracked(&self, size: usize, cleared: bool) -> Result<NonNull<u8>> {
        if size == 0 {
            return Ok(dangling(SYSTEM_ALIGN));
        }
        self.acquire(size, cleared)
    }

    /// Checks the budget, then asks the system heap for `size` bytes.
    #[instrument(level = "trace", skip(self), err(Debug, level = Level::ERROR))]
    fn acquire(&self, size: usize, cleared: bool) -> Result<NonNull<u8>> {
        let allocated = self.allocated.get();
        let limit = self.limit.get();
        let total = match allocated.checked_add(size) {
            Some(total) if total <= limit => total,
            _ => {
                error!(size, allocated, limit, "Request rejected by the budget.");
                return Err(AllocError::LimitExceeded {
                    requested: size,
                    allocated,
                    limit,
                });
            }
        };

        let p = unsafe {
            if cleared {
                libc::calloc(size, 1)
            } else {
                libc::malloc(size)
            }
        };
        let Some(p) = NonNull::new(p.cast::<u8>()) else {
            error!(size, "The system heap is exhausted.");
            return Err(AllocError::HeapExhausted { requested: size });
        };
        debug_assert_eq!(p.as_ptr() as usize % SYSTEM_ALIGN, 0);

        self.allocated.set(total);
        if total > self.peak.get() {
            self.peak.set(total);
        }
        let watermark = self.warn_watermark.get();
        if allocated < watermark && total >= watermark {
            warn!(total, watermark, "Allocation watermark reached.");
        }
        Ok(p)
    }

    #[inline]
    fn release(&self, size: usize) {
        let allocated = self.allocated.get();
        debug_assert!(size <= allocated, "Releasing more than was allocated.");
        self.allocated.set(allocated.saturating_sub(size));
    }
}

unsafe impl RawHeap for GlobalAllocator {
    const ALIGN: usize = SYSTEM_ALIGN;

    #[inline]
    fn allocate_raw(&self, size: usize) -> Result<NonNull<u8>> {
        GlobalAllocator::allocate_raw(self, size)
    }

    #[inline]
    fn allocate_raw_cleared(&self, size: usize) -> Result<NonNull<u8>> {
        GlobalAllocator::allocate_raw_cleared(self, size)
    }

    #[inline]
    unsafe fn deallocate_raw(&self, ptr: NonNull<u8>, size: usize) {
        GlobalAllocator::deallocate_raw(self, ptr, size)
    }

    #[inline]
    fn is_same_heap(&self, other: &Self) -> bool {
        core::ptr::eq(self, other)
    }
}

impl Drop for GlobalAllocator {
    fn drop(&mut self) {
        let allocated = self.allocated.get();
        if allocated != 0 {
            warn!(allocated, "Budget dropped while memory is still allocated.");
        }
    }
}
