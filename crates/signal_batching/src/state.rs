use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Deterministic handle that fully determines the next output of a batch
/// iterator.
///
/// Two states compare equal iff any future iteration from them yields
/// identical sequences, so equality is structural and the type is a plain
/// value: a base seed plus the number of items already drawn. It is cloned
/// at every boundary; nothing ever mutates a shared state.
///
/// Iterators derive a fresh RNG per draw from `seed + step`, the same seed
/// derivation used per epoch by the samplers this design follows, which is
/// what makes `next` a pure function of the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IterationState {
    seed: u64,
    step: u64,
}

impl IterationState {
    /// Starts an iteration at `step = 0` for the given base seed.
    pub fn seed(seed: u64) -> Self {
        Self { seed, step: 0 }
    }

    /// The state after producing one more item.
    pub fn advanced(&self) -> Self {
        Self {
            seed: self.seed,
            step: self.step + 1,
        }
    }

    /// Number of items drawn since `seed()`.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Derives the RNG that produces the item at this state.
    pub fn rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.seed.wrapping_add(self.step))
    }
}
