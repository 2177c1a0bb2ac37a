//! Time source used for timestamps and blocking delays.

use std::time::{Duration, Instant};

/// Monotonic time plus blocking sleep.
///
/// Swapped for [`MockClock`](crate::MockClock) in tests so that retry
/// backoff and dimming windows can be checked without waiting.
pub trait Clock: Send + Sync {
    /// Current monotonic time.
    fn now(&self) -> Instant;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
