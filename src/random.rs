//! Process-wide seeded random source.
//!
//! Every test reseeds it from entropy so workers forked from one test never
//! replay the sequence of another.

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

struct Seeded {
    seed: u64,
    rng: StdRng,
}

impl Seeded {
    fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

static SHARED: Lazy<Mutex<Seeded>> = Lazy::new(|| Mutex::new(Seeded::new(rand::random())));

/// Reseeds with `seed`, making the following draws reproducible
pub fn seed(seed: u64) {
    *SHARED.lock().unwrap_or_else(PoisonError::into_inner) = Seeded::new(seed);
}

/// Reseeds from entropy and returns the new seed
pub fn reset_random_seed() -> u64 {
    let new_seed = rand::random();
    seed(new_seed);
    debug!("random seed reset to {}", new_seed);
    new_seed
}

/// The seed the current sequence started from
pub fn current_seed() -> u64 {
    SHARED.lock().unwrap_or_else(PoisonError::into_inner).seed
}

/// Runs `f` with the shared generator
pub fn with_rng<T>(f: impl FnOnce(&mut StdRng) -> T) -> T {
    f(&mut SHARED.lock().unwrap_or_else(PoisonError::into_inner).rng)
}
