//! Evaluation order policy.
//!
//! The gateway serves problems in a permutation of the input order,
//! computed once at run start. Public-style runs shuffle with fresh OS
//! entropy; private-style runs use a pre-committed seed so the permutation
//! is reproducible without being derivable from any public run.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Deterministic-or-random permutation policy for the problem sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingPolicy {
    /// Fresh random permutation per run.
    Random,
    /// Fixed permutation derived from a pre-committed seed.
    FixedSeeded(u64),
}

impl OrderingPolicy {
    /// Compute the evaluation order for `n` problems as a permutation of
    /// `0..n`. Called once at gateway start; the result is immutable for
    /// the run.
    pub fn evaluation_order(&self, n: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..n).collect();
        let mut rng = match self {
            OrderingPolicy::Random => ChaCha8Rng::from_rng(&mut rand::rng()),
            OrderingPolicy::FixedSeeded(seed) => ChaCha8Rng::seed_from_u64(*seed),
        };
        indices.shuffle(&mut rng);
        indices
    }
}
