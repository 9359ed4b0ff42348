//! Reconnect delay policy

use std::time::Duration;

/// Exponential backoff without jitter or retry limit.
///
/// Each consecutive close doubles the delay up to `max`; a successful open
/// resets it to `base`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base.min(max),
        }
    }

    /// Delay the next reconnect will wait
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Take the delay for the reconnect being scheduled and double the next one
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base.min(self.max);
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_millis(60_000))
    }
}
