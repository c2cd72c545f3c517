//! The FNV-1a hasher used by default in every container of the crate.

use core::hash::{BuildHasherDefault, Hasher};

const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a. Cheap for the short keys hash tables usually see; not DoS resistant.
#[derive(Copy, Clone, Debug)]
pub struct FnvHasher(u64);

impl FnvHasher {
    /// Starts from a custom offset basis instead of the standard one.
    pub const fn with_key(key: u64) -> Self {
        FnvHasher(key)
    }
}

impl Default for FnvHasher {
    #[inline]
    fn default() -> Self {
        FnvHasher(OFFSET_BASIS)
    }
}

impl Hasher for FnvHasher {
    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        let mut hash = self.0;
        for &byte in bytes {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(PRIME);
        }
        self.0 = hash;
    }

    #[inline]
    fn finish(&self) -> u64 {
        self.0
    }
}

pub type FnvBuildHasher = BuildHasherDefault<FnvHasher>;
