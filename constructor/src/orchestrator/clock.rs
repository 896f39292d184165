// File: constructor/src/orchestrator/clock.rs
//
// Waiting Primitives
//
// Funding polls and broadcast backoff wait through a Clock so the polling
// loops can be driven on paused tokio time, and every wait races the
// cancellation token of the run.

use futures::future::BoxFuture;
use tokio::time::{self, Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{ConstructorError, ConstructorResult};

/// Time source used by every wait of the constructor.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn sleep(&self, d: Duration) -> BoxFuture<'_, ()>;
}

/// Wall-clock time, used by [`crate::Constructor::new`].
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) -> BoxFuture<'_, ()> {
        Box::pin(time::sleep(d))
    }
}

/// Paused tokio time for tests.
///
/// Once the runtime has nothing else to do, tokio jumps to the next timer,
/// so a funding poll every 10 seconds completes instantly.
pub struct PausedClock;

impl PausedClock {
    /// Pause the time of the current runtime and return a clock over it.
    ///
    /// # Panics
    ///
    /// Panics when called outside a `current_thread` runtime, or when time
    /// is already paused (a second `new()` on the same runtime, or a runtime
    /// built with `start_paused = true`). Use [`PausedClock::attach`] there.
    pub fn new() -> Self {
        time::pause();
        Self
    }

    /// Clock over a runtime whose time is already paused.
    pub fn attach() -> Self {
        Self
    }

    /// Move paused time forward, firing every timer that falls due.
    pub async fn advance(&self, d: Duration) {
        time::advance(d).await
    }
}

impl Default for PausedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for PausedClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) -> BoxFuture<'_, ()> {
        Box::pin(time::sleep(d))
    }
}

/// Fail with [`ConstructorError::Cancelled`] once the token has fired.
pub fn ensure_active(cancel: &CancellationToken) -> ConstructorResult<()> {
    if cancel.is_cancelled() {
        return Err(ConstructorError::Cancelled);
    }
    Ok(())
}

/// Sleep on `clock` unless `cancel` fires first.
pub async fn sleep_or_cancel(
    clock: &dyn Clock,
    cancel: &CancellationToken,
    d: Duration,
) -> ConstructorResult<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ConstructorError::Cancelled),
        _ = clock.sleep(d) => Ok(()),
    }
}
