//! The crate-wide [`AllocError`] type.

use thiserror::Error;

/// Result type used across the crate.
pub type Result<T, E = AllocError> = core::result::Result<T, E>;

/// Failures surfaced by the allocators, the prime oracle and the hash engine.
///
/// Nothing in the crate retries or swallows one of these: every variant reaches the
/// immediate caller, which decides whether to free memory and retry, shrink the request or give up.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The request would push the budget past its allocation limit.
    #[error("allocation of {requested} bytes exceeds the budget ({allocated} of {limit} bytes in use)")]
    LimitExceeded {
        requested: usize,
        allocated: usize,
        limit: usize,
    },

    /// The underlying heap refused the request.
    #[error("the system heap could not satisfy a request of {requested} bytes")]
    HeapExhausted { requested: usize },

    /// A size computation overflowed `usize`.
    #[error("requested size overflows the address space")]
    SizeOverflow,

    /// The requested alignment is stricter than what the heap guarantees.
    #[error("alignment of {align} bytes is not supported (at most {supported})")]
    Unaligned { align: usize, supported: usize },

    /// No representable prime exists at or above the requested bound.
    #[error("no representable prime at or above {bound}")]
    PrimeOverflow { bound: u64 },

    /// Two pools with different block geometry cannot be merged.
    #[error("pool block size mismatch: expected {expected} bytes, found {found}")]
    PoolMismatch { expected: usize, found: usize },

    /// Two pools drawing from different heaps cannot be merged.
    #[error("pools draw from different heaps")]
    HeapMismatch,
}

impl AllocError {
    /// Returns whether this error means "no more memory", which is how callers are expected to
    /// treat both budget/heap exhaustion and prime-sizing exhaustion.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(
            self,
            AllocError::LimitExceeded { .. }
                | AllocError::HeapExhausted { .. }
                | AllocError::SizeOverflow
                | AllocError::PrimeOverflow { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_memory_grouping() {
        assert!(AllocError::HeapExhausted { requested: 8 }.is_out_of_memory());
        assert!(AllocError::PrimeOverflow { bound: u64::MAX }.is_out_of_memory());
        assert!(!AllocError::Unaligned { align: 64, supported: 16 }.is_out_of_memory());
        assert!(!AllocError::PoolMismatch { expected: 8, found: 16 }.is_out_of_memory());
        assert!(!AllocError::HeapMismatch.is_out_of_memory());
    }

    #[test]
    fn messages_name_the_numbers() {
        let e = AllocError::LimitExceeded {
            requested: 24,
            allocated: 1000,
            limit: 1016,
        };
        assert_eq!(
            e.to_string(),
            "allocation of 24 bytes exceeds the budget (1000 of 1016 bytes in use)"
        );
    }
}
