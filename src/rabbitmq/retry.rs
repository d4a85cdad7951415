use std::time::Duration;

/// Attempt budget plus linear, attempt-scaled backoff.
///
/// The publish loop and queue declaration each own one of these so their
/// tuning never moves together by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            // zero attempts would never touch the broker at all
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay to wait after failed `attempt` (1-based) before the next one.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    pub fn has_attempts_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    pub fn attempts(&self) -> impl Iterator<Item = u32> {
        1..=self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}
