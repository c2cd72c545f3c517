//! Utility functions.

use core::ptr::NonNull;

/// Returns the smallest integer `z` such that `z ≥ x` and `z = y.k` for some integer `k`
/// or `None` if that integer can not be contained in a `usize`.
///
/// # Panics
/// Panics if `y` is 0.
#[inline]
pub(crate) fn round_up(x: usize, y: usize) -> Option<usize> {
    if x % y == 0 {
        Some(x)
    } else {
        ((x / y) * y).checked_add(y)
    }
}

/// A non-null pointer aligned to `align` that must never be dereferenced.
/// Handed out for zero-sized requests.
///
/// # Panics
/// Panics if `align` is 0.
#[inline(always)]
pub(crate) fn dangling(align: usize) -> NonNull<u8> {
    // `align` is nonzero, so the address is too.
    NonNull::new(align as *mut u8).expect("alignment must be nonzero")
}

/// Returns whether `ptr` lies in the half-open range `[low, high)`.
#[inline(always)]
pub(crate) fn in_range(ptr: *const u8, low: *const u8, high: *const u8) -> bool {
    low <= ptr && ptr < high
}
