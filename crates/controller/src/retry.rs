//! Provider-call retry policy.
//!
//! Decides from a [`ProviderError`]'s classification whether a failed call is
//! re-issued, and how long to back off first.

use std::time::Duration;

use rand::Rng;

use agentmesh_core::{config::RetrySettings, error::ProviderError};

/// Exponential backoff for retryable provider failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Consecutive retries allowed before giving up.
    pub max_retries: u32,
    /// Delay before the first retry. Doubles per retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Spread delays by up to ±10%.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter: settings.jitter,
        }
    }
}

impl RetryPolicy {
    /// Disable jitter.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether a call that failed with `error` may be retried, given the number
    /// of consecutive retries already spent.
    pub fn should_retry(&self, error: &ProviderError, consecutive: u32) -> bool {
        error.is_retryable() && consecutive < self.max_retries
    }

    /// Delay before retry number `attempt` (zero-based).
    ///
    /// A retry-after hint on the error raises the delay to at least the hint.
    /// The result never exceeds `max_delay`.
    pub fn next_delay(&self, attempt: u32, error: &ProviderError) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let mut delay = self.base_delay.saturating_mul(factor).min(self.max_delay);

        if self.jitter {
            let spread = rand::thread_rng().gen_range(0.9..=1.1);
            delay = delay.mul_f64(spread);
        }
        if let Some(hint) = error.retry_after {
            delay = delay.max(hint);
        }
        delay.min(self.max_delay)
    }
}
