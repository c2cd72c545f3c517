//! Prime sizing for hash tables.
//!
//! Table capacities are always prime so that every double-hashing step size is coprime with the
//! capacity. [`next_prime_at_least`] is the only entry point the engine uses.

use crate::error::{AllocError, Result};

/// The largest prime representable in a `u64`.
pub const LARGEST_PRIME: u64 = 18_446_744_073_709_551_557;

// Deterministic Miller-Rabin witnesses for every 64-bit integer.
const WITNESSES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

/// Returns the smallest prime `p` such that `p ≥ n`.
///
/// # Errors
/// Fails with [`AllocError::PrimeOverflow`] if `n` is larger than [`LARGEST_PRIME`].
pub fn next_prime_at_least(n: u64) -> Result<u64> {
    if n > LARGEST_PRIME {
        return Err(AllocError::PrimeOverflow { bound: n });
    }
    if n <= 2 {
        return Ok(2);
    }

    // `LARGEST_PRIME` is odd, so the candidate never walks past it.
    let mut candidate = n | 1;
    while !is_prime(candidate) {
        candidate += 2;
    }
    Ok(candidate)
}

/// Returns whether `n` is prime.
pub fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    for &p in &WITNESSES {
        if n % p == 0 {
            return n == p;
        }
    }

    let s = (n - 1).trailing_zeros();
    let d = (n - 1) >> s;

    'witness: for &a in &WITNESSES {
        let mut x = pow_mod(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..s {
            x = mul_mod(x, x, n);
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

#[inline(always)]
fn mul_mod(a: u64, b: u64, m: u64) -> u64 {
    ((a as u128 * b as u128) % m as u128) as u64
}

fn pow_mod(mut base: u64, mut exp: u64, m: u64) -> u64 {
    let mut acc = 1;
    base %= m;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = mul_mod(acc, base, m);
        }
        base = mul_mod(base, base, m);
        exp >>= 1;
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_prime_slow(n: u64) -> bool {
        n >= 2 && (2..).take_while(|d| d * d <= n).all(|d| n % d != 0)
    }

    #[test]
    fn test_1() {
        let primes: Vec<u64> = (0..60).filter(|&n| is_prime(n)).collect();
        assert_eq!(
            primes,
            [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59]
        );
    }

    #[test]
    fn test_2() {
        for n in 0..20_000 {
            assert_eq!(is_prime(n), is_prime_slow(n), "disagreement at {n}");
        }
    }

    #[test]
    fn test_3() {
        // Carmichael numbers and strong pseudoprimes to small bases.
        for n in [561, 1105, 1729, 2047, 3_215_031_751, 341_550_071_728_321] {
            assert!(!is_prime(n), "{n} is composite");
        }
        assert!(is_prime((1 << 61) - 1));
        assert!(is_prime(LARGEST_PRIME));
        assert!(!is_prime(u64::MAX));
    }

    #[test]
    fn test_4() {
        assert_eq!(next_prime_at_least(0), Ok(2));
        assert_eq!(next_prime_at_least(2), Ok(2));
        assert_eq!(next_prime_at_least(10), Ok(11));
        assert_eq!(next_prime_at_least(19), Ok(19));
        assert_eq!(next_prime_at_least(20), Ok(23));
        assert_eq!(next_prime_at_least(46), Ok(47));
        assert_eq!(next_prime_at_least(1 << 32), Ok(4_294_967_311));
    }

    #[test]
    fn test_5() {
        assert_eq!(next_prime_at_least(LARGEST_PRIME - 1), Ok(LARGEST_PRIME));
        assert_eq!(next_prime_at_least(LARGEST_PRIME), Ok(LARGEST_PRIME));
        assert_eq!(
            next_prime_at_least(LARGEST_PRIME + 1),
            Err(AllocError::PrimeOverflow {
                bound: LARGEST_PRIME + 1
            })
        );
    }
}
