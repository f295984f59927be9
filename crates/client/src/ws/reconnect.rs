//! Retry delays for unexpected closes.

use std::time::Duration;

use bookline_shared::NORMAL_CLOSURE;
use rand::Rng;

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay for the first retry; later retries grow linearly from it.
    pub base_interval: Duration,
    /// Upper bound of the delay before jitter.
    pub max_delay: Duration,
    /// Upper bound of the uniform random delay added to every retry.
    pub jitter: Duration,
    /// Stop retrying once this many attempts have been made (`None` = never).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// `min(base * max(1, attempt), cap)`, before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.base_interval
            .saturating_mul(attempt.max(1))
            .min(self.max_delay)
    }

    /// Calculate delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    pub fn delay_with_rng<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        self.base_delay(attempt) + Duration::from_millis(rng.gen_range(0..=jitter_ms))
    }

    /// Whether another attempt is allowed after `attempt` failed ones.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

/// Only closes the application did not ask for are retried.
pub fn is_unexpected_close(code: u16) -> bool {
    code != NORMAL_CLOSURE
}
