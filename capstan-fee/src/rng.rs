//! Deterministic PRNG for reproducible sampling.

use sha2::{Digest, Sha256};

/// A hash-counter PRNG: draw `n` is the first eight bytes of
/// `SHA-256(seed || n)`.
///
/// The stream is a pure function of the seed, independent of any
/// process-global randomness, so two observers seeding from the same
/// block hash draw identical sequences.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    seed: Vec<u8>,
    counter: u64,
}

impl DeterministicRng {
    /// Create a generator from a seed.
    pub fn new(seed: &[u8]) -> Self {
        Self {
            seed: seed.to_vec(),
            counter: 0,
        }
    }

    /// Next 64-bit draw.
    pub fn next_u64(&mut self) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(&self.seed);
        hasher.update(self.counter.to_be_bytes());
        self.counter += 1;

        let digest = hasher.finalize();
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(word)
    }

    /// Uniform draw in `[0, bound)`. `bound` must be positive.
    pub fn below(&mut self, bound: u64) -> u64 {
        debug_assert!(bound > 0);
        self.next_u64() % bound
    }
}
