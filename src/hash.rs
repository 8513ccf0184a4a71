//! Stable FNV-1a hashing for crash fingerprints.
//!
//! A failing seed or corpus buffer must name the same artifact file on every
//! run and platform, so fingerprints cannot come from the randomly keyed
//! `DefaultHasher`.
//!
//! ```
//! use fortress_turns::hash::{fnv1a_bytes, fnv1a_hash, DeterministicHasher};
//! use std::hash::{Hash, Hasher};
//!
//! let mut hasher = DeterministicHasher::new();
//! 1234u64.hash(&mut hasher);
//! assert_eq!(hasher.finish(), fnv1a_hash(&1234u64));
//! assert_eq!(fnv1a_bytes(b""), 0xcbf2_9ce4_8422_2325);
//! ```

use std::hash::{Hash, Hasher};

const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const PRIME: u64 = 0x0100_0000_01b3;

/// 64-bit FNV-1a. Not collision resistant against an adversary.
#[derive(Debug, Clone)]
pub struct DeterministicHasher {
    state: u64,
}

impl DeterministicHasher {
    /// A hasher at the FNV-1a offset basis.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: OFFSET_BASIS,
        }
    }
}

impl Default for DeterministicHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for DeterministicHasher {
    #[inline]
    fn finish(&self) -> u64 {
        self.state
    }

    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        self.state = bytes.iter().fold(self.state, |acc, &byte| {
            (acc ^ u64::from(byte)).wrapping_mul(PRIME)
        });
    }
}

/// Fingerprint of any [`Hash`] value; used for seeds.
#[inline]
pub fn fnv1a_hash<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DeterministicHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Fingerprint of a corpus buffer.
///
/// Hashes the bytes alone; `fnv1a_hash(&bytes)` would also mix in the length.
#[inline]
#[must_use]
pub fn fnv1a_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = DeterministicHasher::new();
    hasher.write(bytes);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_fingerprint_apart() {
        assert_eq!(fnv1a_hash(&4242u64), fnv1a_hash(&4242u64));
        assert_ne!(fnv1a_hash(&4242u64), fnv1a_hash(&4243u64));
        assert_ne!(fnv1a_hash("White"), fnv1a_hash("Black"));
    }

    #[test]
    fn split_writes_match_one_write() {
        let mut hasher = DeterministicHasher::default();
        hasher.write(b"crash-");
        hasher.write(b"max-steps");
        assert_eq!(hasher.finish(), fnv1a_bytes(b"crash-max-steps"));
        assert_eq!(DeterministicHasher::new().finish(), OFFSET_BASIS);
    }

    #[test]
    fn published_vectors() {
        assert_eq!(fnv1a_bytes(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(fnv1a_bytes(b"foobar"), 0x8594_4171_f739_67e8);
    }

    #[test]
    fn buffer_fingerprint_skips_length_prefix() {
        let buffer: &[u8] = &[0, 0, 0, 7];
        assert_ne!(fnv1a_bytes(buffer), fnv1a_hash(buffer));
    }
}
