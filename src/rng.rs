//! Deterministic multiplicative congruential generators.
//!
//! Every random decision a rules module makes must be reproducible from the
//! `seed` stored in its state: live play, offline replay and fuzzing all call
//! the same generator with the same seed and must see bit-for-bit identical
//! results on every platform.
//!
//! Two interchangeable generators are provided:
//!
//! - [`StandardRng`]: `seed = seed * 200105 mod (2^35 - 31)`. Fits in native
//!   64-bit arithmetic.
//! - [`ExtendedRng`]: `seed = seed * 5667072534355537 mod (2^53 - 111)`. The
//!   product overflows 64 bits, so the multiply-mod step is done in `u128`.
//!
//! Both return `seed mod range` from [`Rng::next`].
//!
//! # Usage
//!
//! ```rust
//! use fortress_turns::rng::{Rng, StandardRng};
//!
//! let mut rng = StandardRng::new(1);
//! assert_eq!(rng.next(100), 5);
//! assert_eq!(rng.next(100), 88);
//! assert_eq!(rng.next(100), 36);
//!
//! let mut deck = vec!['a', 'b', 'c', 'd'];
//! StandardRng::new(7).shuffle(&mut deck);
//! assert_eq!(deck.len(), 4);
//! ```

use crate::{
    report_violation,
    telemetry::{ViolationKind, ViolationSeverity},
};

/// Modulus of [`StandardRng`], the prime `2^35 - 31`.
pub const STANDARD_MODULUS: u64 = (1 << 35) - 31;

/// Multiplier of [`StandardRng`].
pub const STANDARD_MULTIPLIER: u64 = 200_105;

/// Modulus of [`ExtendedRng`], the prime `2^53 - 111`.
pub const EXTENDED_MODULUS: u64 = (1 << 53) - 111;

/// Multiplier of [`ExtendedRng`].
pub const EXTENDED_MULTIPLIER: u64 = 5_667_072_534_355_537;

/// Trait for the seeded generators that rules modules draw from.
pub trait Rng {
    /// Advances the seed one step and returns the new seed.
    fn advance(&mut self) -> u64;

    /// Returns the current seed, to be written back into the game state.
    fn seed(&self) -> u64;

    /// Returns an integer in `[0, range)` and advances the seed.
    ///
    /// # Empty Range Behavior
    /// If `range == 0`, reports a violation via telemetry, leaves the seed
    /// untouched and returns `0`.
    fn next(&mut self, range: u64) -> u64 {
        if range == 0 {
            report_violation!(
                ViolationSeverity::Error,
                ViolationKind::Random,
                "next called with empty range (seed {})",
                self.seed()
            );
            return 0;
        }
        self.advance() % range
    }

    /// [`Rng::next`] for collection indices.
    fn next_index(&mut self, range: usize) -> usize {
        // usize -> u64 is lossless on every supported target, and the result is < range.
        #[allow(clippy::cast_possible_truncation)]
        let index = self.next(range as u64) as usize;
        index
    }

    /// Fisher-Yates shuffle in place, walking from the back of the slice.
    ///
    /// Slices of length 0 or 1 consume no randomness.
    fn shuffle<T>(&mut self, items: &mut [T]) {
        for k in (1..items.len()).rev() {
            let j = self.next_index(k + 1);
            items.swap(j, k);
        }
    }
}

/// The 35-bit generator: `seed * 200105 mod (2^35 - 31)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StandardRng {
    seed: u64,
}

impl StandardRng {
    /// Creates a generator, reducing `seed` into the modulus first.
    ///
    /// A seed that reduces to zero is degenerate (every draw returns 0) and
    /// is reported as a warning.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        let seed = seed % STANDARD_MODULUS;
        if seed == 0 {
            report_violation!(
                ViolationSeverity::Warning,
                ViolationKind::Random,
                "StandardRng seeded with a multiple of its modulus; output is constant"
            );
        }
        Self { seed }
    }

    /// Creates a generator from a non-deterministic seed.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self::new(seed_from_entropy())
    }
}

impl Rng for StandardRng {
    #[inline]
    fn advance(&mut self) -> u64 {
        // seed < 2^35 and the multiplier < 2^18, so the product fits in u64.
        self.seed = self.seed * STANDARD_MULTIPLIER % STANDARD_MODULUS;
        self.seed
    }

    #[inline]
    fn seed(&self) -> u64 {
        self.seed
    }
}

/// The 53-bit generator: `seed * 5667072534355537 mod (2^53 - 111)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtendedRng {
    seed: u64,
}

impl ExtendedRng {
    /// Creates a generator, reducing `seed` into the modulus first.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        let seed = seed % EXTENDED_MODULUS;
        if seed == 0 {
            report_violation!(
                ViolationSeverity::Warning,
                ViolationKind::Random,
                "ExtendedRng seeded with a multiple of its modulus; output is constant"
            );
        }
        Self { seed }
    }
}

impl Rng for ExtendedRng {
    #[inline]
    fn advance(&mut self) -> u64 {
        let product = u128::from(self.seed) * u128::from(EXTENDED_MULTIPLIER);
        // The remainder is < 2^53.
        #[allow(clippy::cast_possible_truncation)]
        let next = (product % u128::from(EXTENDED_MODULUS)) as u64;
        self.seed = next;
        next
    }

    #[inline]
    fn seed(&self) -> u64 {
        self.seed
    }
}

/// Gets a timing-based seed in `[1, STANDARD_MODULUS - 1]`, valid for both generators.
///
/// # Non-Determinism Warning
///
/// This function is intentionally non-deterministic. Use it to pick the seed
/// of a *new* game; once chosen, the seed lives in the game state and every
/// later draw is deterministic.
#[must_use]
pub fn seed_from_entropy() -> u64 {
    use crate::hash::DeterministicHasher;
    use std::hash::{Hash, Hasher};
    use web_time::{Instant, SystemTime, UNIX_EPOCH};

    let now = Instant::now();

    let thread_hash = {
        let mut hasher = DeterministicHasher::new();
        std::thread::current().id().hash(&mut hasher);
        hasher.finish()
    };

    let timing_hash = {
        let mut hasher = DeterministicHasher::new();
        if let Ok(since_epoch) = SystemTime::now().duration_since(UNIX_EPOCH) {
            since_epoch.as_nanos().hash(&mut hasher);
        }
        now.elapsed().as_nanos().hash(&mut hasher);
        hasher.finish()
    };

    let mixed = thread_hash
        .wrapping_mul(timing_hash | 1)
        .wrapping_add(0x9e37_79b9_7f4a_7c15);
    mixed % (STANDARD_MODULUS - 1) + 1
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
    fn test_standard_reference_vector() {
        let mut rng = StandardRng::new(1);
        let draws: Vec<u64> = (0..5).map(|_| rng.next(100)).collect();
        assert_eq!(draws, vec![5, 88, 36, 39, 96]);
        assert_eq!(rng.seed(), 24_521_784_696);
    }

    #[test]
    fn test_standard_seed_sequence() {
        let mut rng = StandardRng::new(1);
        assert_eq!(rng.advance(), 200_105);
        assert_eq!(rng.advance(), 5_682_272_688);
        assert_eq!(rng.advance(), 18_715_184_236);
        assert_eq!(rng.advance(), 30_980_980_139);
    }

    #[test]
    fn test_extended_reference_vector() {
        let mut rng = ExtendedRng::new(1);
        let draws: Vec<u64> = (0..5).map(|_| rng.next(100)).collect();
        assert_eq!(draws, vec![37, 34, 79, 77, 7]);
        assert_eq!(rng.seed(), 591_033_942_526_607);
    }

    #[test]
    fn test_extended_seed_sequence() {
        let mut rng = ExtendedRng::new(1);
        assert_eq!(rng.advance(), 5_667_072_534_355_537);
        assert_eq!(rng.advance(), 928_173_953_693_534);
        assert_eq!(rng.advance(), 4_186_320_372_898_579);
    }

    #[test]
    fn test_extended_small_range() {
        let mut rng = ExtendedRng::new(42);
        let draws: Vec<u64> = (0..4).map(|_| rng.next(6)).collect();
        assert_eq!(draws, vec![2, 4, 1, 5]);
    }

    #[test]
    fn test_shuffle_reference_vector() {
        let mut rng = StandardRng::new(1);
        let mut items = [0, 1, 2, 3, 4, 5];
        rng.shuffle(&mut items);
        assert_eq!(items, [1, 4, 2, 0, 3, 5]);
        // Five swaps, five draws.
        assert_eq!(rng.seed(), 24_521_784_696);
    }

    #[test]
    fn test_shuffle_short_slices_consume_nothing() {
        let mut rng = StandardRng::new(99);
        let mut empty: [u8; 0] = [];
        let mut single = [7];
        rng.shuffle(&mut empty);
        rng.shuffle(&mut single);
        assert_eq!(rng.seed(), 99);
        assert_eq!(single, [7]);
    }

    #[test]
    fn test_zero_range_does_not_advance() {
        let mut rng = StandardRng::new(5);
        assert_eq!(rng.next(0), 0);
        assert_eq!(rng.seed(), 5);
    }

    #[test]
    fn test_seed_reduced_into_modulus() {
        let rng = StandardRng::new(STANDARD_MODULUS + 3);
        assert_eq!(rng.seed(), 3);
        let rng = ExtendedRng::new(EXTENDED_MODULUS + 9);
        assert_eq!(rng.seed(), 9);
    }

    #[test]
    fn test_range_one_always_zero() {
        let mut rng = ExtendedRng::new(12_345);
        for _ in 0..50 {
            assert_eq!(rng.next(1), 0);
        }
    }

    #[test]
    fn test_entropy_seed_in_bounds() {
        for _ in 0..100 {
            let seed = seed_from_entropy();
            assert!((1..STANDARD_MODULUS).contains(&seed));
        }
    }
}

// =============================================================================
// Property-Based Tests
// =============================================================================

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
        /// Property: Same seed always produces identical sequence.
        ///
        /// Replay and fuzz reproduction depend on this.
        #[test]
        fn prop_determinism_same_seed_same_sequence(seed in 1u64..STANDARD_MODULUS) {
            let mut rng1 = StandardRng::new(seed);
            let mut rng2 = StandardRng::new(seed);

            for _ in 0..100 {
                prop_assert_eq!(rng1.next(1000), rng2.next(1000));
            }
        }

        /// Property: next output is always within the specified range.
        #[test]
        fn prop_next_within_bounds(seed in 1u64..EXTENDED_MODULUS, range in 1u64..1_000_000) {
            let mut standard = StandardRng::new(seed);
            let mut extended = ExtendedRng::new(seed);

            for _ in 0..50 {
                prop_assert!(standard.next(range) < range);
                prop_assert!(extended.next(range) < range);
            }
        }

        /// Property: a non-zero seed never degenerates to zero.
        ///
        /// Both moduli are prime, so the multiplicative group has no zero divisors.
        #[test]
        fn prop_nonzero_seed_stays_nonzero(seed in 1u64..STANDARD_MODULUS) {
            let mut standard = StandardRng::new(seed);
            let mut extended = ExtendedRng::new(seed);
            for _ in 0..100 {
                prop_assert_ne!(standard.advance(), 0);
                prop_assert_ne!(extended.advance(), 0);
            }
        }

        /// Property: shuffle produces a permutation of its input.
        #[test]
        fn prop_shuffle_is_permutation(seed in 1u64..STANDARD_MODULUS, len in 0usize..64) {
            let mut items: Vec<usize> = (0..len).collect();
            StandardRng::new(seed).shuffle(&mut items);
            let mut sorted = items.clone();
            sorted.sort_unstable();
            prop_assert_eq!(sorted, (0..len).collect::<Vec<_>>());
        }

        /// Property: shuffle with the same seed produces the same order.
        #[test]
        fn prop_shuffle_deterministic(seed in 1u64..EXTENDED_MODULUS, len in 0usize..64) {
            let mut a: Vec<usize> = (0..len).collect();
            let mut b = a.clone();
            ExtendedRng::new(seed).shuffle(&mut a);
            ExtendedRng::new(seed).shuffle(&mut b);
            prop_assert_eq!(a, b);
        }
    }
}
