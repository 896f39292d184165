// File: constructor/src/orchestrator/rng.rs
//
// Seeded Random Source
//
// All randomness of a run (new address decisions, transfer amounts) flows
// through SeededRng so a run can be replayed from its seed.

use num_bigint::{BigUint, RandBigInt};
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Environment variable read by [`SeededRng::from_env_or_random`].
pub const SEED_ENV_VAR: &str = "CONSTRUCTION_SEED";

/// Seeded RNG shared by the scenario generator.
///
/// # Examples
///
/// ```rust
/// use construction_tester::orchestrator::rng::SeededRng;
/// use num_bigint::BigUint;
///
/// let rng = SeededRng::with_seed(0x1234567890abcdef);
/// let value = rng
///     .gen_biguint_range(&BigUint::from(10u32), &BigUint::from(20u32))
///     .unwrap();
/// assert!(value >= BigUint::from(10u32) && value <= BigUint::from(20u32));
/// ```
pub struct SeededRng {
    inner: Mutex<StdRng>,
    seed: u64,
}

impl SeededRng {
    /// Create a new SeededRng with an explicit seed
    pub fn with_seed(seed: u64) -> Self {
        Self {
            inner: Mutex::new(StdRng::seed_from_u64(seed)),
            seed,
        }
    }

    /// Create from `CONSTRUCTION_SEED` (hex, `0x` prefix optional) or a random seed
    ///
    /// The seed is logged so a run can be replayed.
    pub fn from_env_or_random() -> Self {
        let seed = std::env::var(SEED_ENV_VAR)
            .ok()
            .and_then(|s| {
                let trimmed = s.trim().trim_start_matches("0x");
                u64::from_str_radix(trimmed, 16).ok()
            })
            .unwrap_or_else(|| rand::thread_rng().gen());

        if log::log_enabled!(log::Level::Info) {
            log::info!(
                "Construction seed: 0x{:016x} (replay with {}=0x{:016x})",
                seed,
                SEED_ENV_VAR,
                seed
            );
        }

        Self::with_seed(seed)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Uniform float in `[0, 1)`
    pub fn gen_f64(&self) -> f64 {
        self.inner.lock().gen()
    }

    /// Uniform integer in the inclusive range `[min, max]`
    ///
    /// Returns `None` when `min > max`.
    pub fn gen_biguint_range(&self, min: &BigUint, max: &BigUint) -> Option<BigUint> {
        if min > max {
            return None;
        }
        let upper = max + 1u32;
        Some(self.inner.lock().gen_biguint_range(min, &upper))
    }
}

impl std::fmt::Debug for SeededRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeededRng")
            .field("seed", &format_args!("0x{:016x}", self.seed))
            .finish_non_exhaustive()
    }
}
