//! Entropy sources for the fuzz driver.
//!
//! Every random decision the driver makes goes through an [`EntropySource`],
//! so a run is reproducible from whatever the source was built from: one
//! integer for [`SeededEntropy`], or a corpus file for [`BufferEntropy`].

use crate::hash::{fnv1a_bytes, fnv1a_hash};
use crate::rng::{ExtendedRng, Rng};

/// Supplies the fuzz driver's random decisions.
pub trait EntropySource {
    /// Returns an integer in `[min, max]`. Returns `min` when `max <= min`.
    fn consume_integral_in_range(&mut self, min: u64, max: u64) -> u64;

    /// Bytes left; `usize::MAX` for sources that never run dry.
    fn remaining_bytes(&self) -> usize;

    /// Stable hash of what the source was built from, used to name artifacts.
    fn fingerprint(&self) -> u64;

    /// Returns an index in `[0, len)`, or `None` for an empty collection.
    fn pick_index(&mut self, len: usize) -> Option<usize> {
        let last = len.checked_sub(1)?;
        let index = self.consume_integral_in_range(0, last as u64);
        Some(index as usize)
    }

    /// Picks one element of `values`, or `None` if it is empty.
    fn pick_value<'v, T>(&mut self, values: &'v [T]) -> Option<&'v T>
    where
        Self: Sized,
    {
        let index = self.pick_index(values.len())?;
        values.get(index)
    }

    /// Returns `true` once the source has nothing more to give.
    fn is_exhausted(&self) -> bool {
        self.remaining_bytes() == 0
    }
}

/// Entropy from the extended-precision generator; never runs dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeededEntropy {
    initial: u64,
    rng: ExtendedRng,
}

impl SeededEntropy {
    /// Creates a source reproducible from `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            initial: seed,
            rng: ExtendedRng::new(seed),
        }
    }

    /// The seed this source was created from.
    #[must_use]
    pub fn initial_seed(&self) -> u64 {
        self.initial
    }
}

impl EntropySource for SeededEntropy {
    fn consume_integral_in_range(&mut self, min: u64, max: u64) -> u64 {
        if max <= min {
            return min;
        }
        match (max - min).checked_add(1) {
            Some(range) => min + self.rng.next(range),
            None => self.rng.advance(),
        }
    }

    fn remaining_bytes(&self) -> usize {
        usize::MAX
    }

    fn fingerprint(&self) -> u64 {
        fnv1a_hash(&self.initial)
    }
}

/// Entropy read from a byte buffer, the way libFuzzer's `FuzzedDataProvider`
/// consumes integers: bytes are taken from the end of the buffer, most
/// significant first, and reduced modulo the range.
///
/// An exhausted buffer keeps answering `min`.
///
/// # Examples
///
/// ```
/// use fortress_turns::{BufferEntropy, EntropySource};
///
/// let mut entropy = BufferEntropy::new(vec![0x01, 0x02]);
/// assert_eq!(entropy.consume_integral_in_range(0, 255), 0x02);
/// assert_eq!(entropy.consume_integral_in_range(0, 255), 0x01);
/// assert!(entropy.is_exhausted());
/// assert_eq!(entropy.consume_integral_in_range(10, 20), 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferEntropy {
    data: Vec<u8>,
    remaining: usize,
    fingerprint: u64,
}

impl BufferEntropy {
    /// Wraps a corpus buffer.
    #[must_use]
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        Self {
            remaining: data.len(),
            fingerprint: fnv1a_bytes(&data),
            data,
        }
    }

    /// The whole buffer, consumed or not.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl EntropySource for BufferEntropy {
    fn consume_integral_in_range(&mut self, min: u64, max: u64) -> u64 {
        if max <= min {
            return min;
        }
        let range = max - min;
        let mut result: u64 = 0;
        let mut offset = 0u32;
        while offset < u64::BITS && (range >> offset) > 0 && self.remaining != 0 {
            self.remaining -= 1;
            result = (result << 8) | u64::from(self.data[self.remaining]);
            offset += 8;
        }
        if range != u64::MAX {
            result %= range + 1;
        }
        min + result
    }

    fn remaining_bytes(&self) -> usize {
        self.remaining
    }

    fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn buffer_reads_big_endian_from_the_back() {
        let mut entropy = BufferEntropy::new(vec![0xAA, 0x12, 0x34]);
        // Range needs two bytes: 0x34 then 0x12.
        assert_eq!(entropy.consume_integral_in_range(0, 0xFFFF), 0x3412);
        assert_eq!(entropy.remaining_bytes(), 1);
        assert_eq!(entropy.consume_integral_in_range(0, 9), 0xAA % 10);
        assert!(entropy.is_exhausted());
    }

    #[test]
    fn buffer_offsets_by_min() {
        let mut entropy = BufferEntropy::new(vec![7]);
        assert_eq!(entropy.consume_integral_in_range(100, 104), 100 + 7 % 5);
    }

    #[test]
    fn degenerate_range_consumes_nothing() {
        let mut buffer = BufferEntropy::new(vec![1, 2, 3]);
        assert_eq!(buffer.consume_integral_in_range(5, 5), 5);
        assert_eq!(buffer.remaining_bytes(), 3);

        let mut seeded = SeededEntropy::new(9);
        let before = seeded;
        assert_eq!(seeded.consume_integral_in_range(4, 2), 4);
        assert_eq!(seeded, before);
    }

    #[test]
    fn seeded_matches_extended_generator() {
        let mut entropy = SeededEntropy::new(42);
        let drawn: Vec<u64> = (0..4)
            .map(|_| entropy.consume_integral_in_range(1, 6))
            .collect();
        // ExtendedRng(42).next(6) gives 2, 4, 1, 5.
        assert_eq!(drawn, vec![3, 5, 2, 6]);
        assert_eq!(entropy.remaining_bytes(), usize::MAX);
    }

    #[test]
    fn pick_value_handles_empty_and_singletons() {
        let mut entropy = SeededEntropy::new(1);
        let empty: [u8; 0] = [];
        assert!(entropy.pick_value(&empty).is_none());
        assert_eq!(entropy.pick_value(&["only"]), Some(&"only"));
    }

    #[test]
    fn fingerprints_are_stable_and_distinct() {
        assert_eq!(
            SeededEntropy::new(5).fingerprint(),
            SeededEntropy::new(5).fingerprint()
        );
        assert_ne!(
            SeededEntropy::new(5).fingerprint(),
            SeededEntropy::new(6).fingerprint()
        );
        assert_eq!(
            BufferEntropy::new(b"abc".to_vec()).fingerprint(),
            fnv1a_bytes(b"abc")
        );
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: buffer draws always land in range.
        #[test]
        fn prop_buffer_in_range(data in proptest::collection::vec(any::<u8>(), 0..64), min in 0u64..1000, span in 0u64..100_000) {
            let mut entropy = BufferEntropy::new(data);
            for _ in 0..16 {
                let v = entropy.consume_integral_in_range(min, min + span);
                prop_assert!(v >= min && v <= min + span);
            }
        }

        /// Property: the same buffer yields the same draws.
        #[test]
        fn prop_buffer_deterministic(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let mut a = BufferEntropy::new(data.clone());
            let mut b = BufferEntropy::new(data);
            for i in 0..16u64 {
                prop_assert_eq!(
                    a.consume_integral_in_range(0, i * 37),
                    b.consume_integral_in_range(0, i * 37)
                );
            }
        }

        /// Property: seeded draws always land in range.
        #[test]
        fn prop_seeded_in_range(seed in 1u64..1_000_000, min in 0u64..1000, span in 1u64..1_000_000) {
            let mut entropy = SeededEntropy::new(seed);
            for _ in 0..16 {
                let v = entropy.consume_integral_in_range(min, min + span);
                prop_assert!(v >= min && v <= min + span);
            }
        }
    }
}
