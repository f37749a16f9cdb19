// src/core/retry.rs — Pacing between stage retries
//
// A stage that fails validation or transport is re-queried with the same
// prompt. Attempts are spaced by exponential backoff with deterministic
// jitter; a provider rate-limit hint overrides the computed delay.

use std::time::Duration;

use crate::infra::config::RetriesConfig;
use crate::infra::errors::QueryFailure;

const JITTER_FRACTION: f64 = 0.2;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetriesConfig::default())
    }
}

impl From<&RetriesConfig> for RetryPolicy {
    fn from(cfg: &RetriesConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            backoff_factor: cfg.backoff_factor,
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            jitter_fraction: JITTER_FRACTION,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts. Used by headless and test runs.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            backoff_factor: 1.0,
            max_delay: Duration::ZERO,
            jitter_fraction: 0.0,
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32, rate_limit_hint: Option<Duration>) -> Duration {
        if let Some(hint) = rate_limit_hint {
            let wait = hint.saturating_add(Duration::from_millis(100));
            if self.max_delay.is_zero() {
                return wait;
            }
            return wait.min(self.max_delay);
        }
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }

        let base_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(attempt as i32);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);

        let jitter = deterministic_jitter(attempt, self.jitter_fraction);
        let final_ms = (capped_ms * jitter).max(100.0);

        Duration::from_millis(final_ms as u64)
    }
}

/// Rate-limit hint carried by a query failure, if any.
pub fn rate_limit_hint(failure: &QueryFailure) -> Option<Duration> {
    match failure {
        QueryFailure::RateLimited { retry_after_ms } if *retry_after_ms > 0 => {
            Some(Duration::from_millis(*retry_after_ms))
        }
        _ => None,
    }
}

/// Deterministic jitter for a given attempt to keep retries reproducible in tests.
/// Returns a multiplier in [1 - fraction, 1 + fraction].
fn deterministic_jitter(attempt: u32, fraction: f64) -> f64 {
    let hash = (attempt.wrapping_mul(2654435761)) as f64 / u32::MAX as f64;
    1.0 + fraction * (2.0 * hash - 1.0)
}
