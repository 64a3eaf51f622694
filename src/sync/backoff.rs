//! Retry backoff policy for upstream calls

use std::time::Duration;

/// Exponential backoff: 60s, 120s, 240s for attempts 0, 1, 2.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub max_retries: u32,
    pub base: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base: Duration::from_secs(60),
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based), or `None` when the
    /// retry budget is spent.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        Some(self.base * 2u32.saturating_pow(attempt))
    }
}
