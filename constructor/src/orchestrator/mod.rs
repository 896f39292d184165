// File: constructor/src/orchestrator/mod.rs
//
// Orchestrator Module
//
// Time and randomness sources injected into the constructor so that a run
// can be replayed from its seed and polling loops can be tested on paused time.

/// Clock abstractions and cancellable sleeps
pub mod clock;
/// Seeded random number generation
pub mod rng;

pub use clock::{ensure_active, sleep_or_cancel, Clock, PausedClock, SystemClock};
pub use rng::SeededRng;
