//! Exponential backoff with jitter between handled failures.

use std::time::Duration;
use rand::Rng;

/// Backoff settings. A zero base disables the pause entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Backoff {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self { base_ms, max_ms }
    }

    pub fn is_enabled(&self) -> bool {
        self.base_ms > 0
    }

    /// Pause before the attempt following the `failures`-th handled failure.
    pub fn delay(&self, failures: u32) -> Duration {
        if !self.is_enabled() || failures == 0 {
            return Duration::ZERO;
        }

        let exponential_base = 2u64.saturating_pow(failures - 1);
        let delay_ms = self.base_ms.saturating_mul(exponential_base);
        let capped_delay = delay_ms.min(self.max_ms.max(self.base_ms));

        // Up to 10% jitter
        let jitter_range = capped_delay / 10;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };

        Duration::from_millis(capped_delay + jitter)
    }
}
