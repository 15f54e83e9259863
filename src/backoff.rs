//! Delay policy between failed reconnect attempts.

use std::time::Duration;

/// Bounded exponential backoff.
///
/// Each call to [`next_delay`](Backoff::next_delay) returns the current delay
/// and grows it by `multiplier`, never beyond `max_delay`. A successful
/// connect should call [`reset`](Backoff::reset).
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound for the delay
    pub max_delay: Duration,
    /// Growth factor applied after each failure
    pub multiplier: f64,
    current: Duration,
    failures: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 2.0)
    }
}

impl Backoff {
    /// Creates a backoff policy.
    ///
    /// A multiplier below 1.0 is treated as 1.0 (constant delay).
    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        let max_delay = max_delay.max(initial_delay);
        Self {
            initial_delay,
            max_delay,
            multiplier: if multiplier.is_finite() { multiplier.max(1.0) } else { 1.0 },
            current: initial_delay,
            failures: 0,
        }
    }

    /// Returns the delay to wait before the next attempt and advances the policy.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.failures = self.failures.saturating_add(1);
        self.current = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        delay
    }

    /// Number of failures recorded since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Restarts from `initial_delay`.
    pub fn reset(&mut self) {
        self.current = self.initial_delay;
        self.failures = 0;
    }
}
