//! Minimum-spacing rate limiter for outbound provider calls.
//!
//! Before each call the limiter measures the time since the previous call
//! *completed* and sleeps off any deficit. The lock is held for the whole
//! call, so at most one call is in flight per limiter and the last-call
//! timestamp has a single writer.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_completed: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_completed: Mutex::new(None),
        }
    }

    /// Spacing derived from a per-minute quota. A zero quota is treated as one.
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self::new(Duration::from_secs(60) / requests_per_minute.max(1))
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Run `call` once the minimum spacing since the previous call has elapsed.
    pub fn run<T>(&self, call: impl FnOnce() -> T) -> T {
        let mut last = self
            .last_completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "rate limiter sleeping");
                std::thread::sleep(wait);
            }
        }

        let out = call();
        *last = Some(Instant::now());
        out
    }
}
