//! Backoff policy for failing periodic tasks

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::duration_millis;

/// Extra wait inserted after consecutive failures of a periodic task
///
/// A periodic task that keeps failing (store unreachable, timeouts) waits
/// its normal interval plus this backoff before the next attempt. The
/// backoff grows exponentially with jitter, is capped, and resets after the
/// first success.
///
/// # Example
///
/// ```
/// use pacer::BackoffPolicy;
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::exponential()
///     .with_initial_interval(Duration::from_millis(250))
///     .with_max_interval(Duration::from_secs(5));
///
/// // First failure: no extra wait (the next tick retries naturally)
/// // Second consecutive failure: ~250ms
/// // Third: ~500ms, and so on up to 5s
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffPolicy {
    /// Backoff after the second consecutive failure
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Maximum backoff
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier (e.g., 2.0 for exponential)
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0) to add randomness
    ///
    /// A value of 0.1 means +/-10% randomness.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl BackoffPolicy {
    /// Create an exponential backoff policy with sensible defaults
    ///
    /// - 250ms initial interval
    /// - 5 second max interval
    /// - 2x backoff coefficient
    /// - 10% jitter
    pub fn exponential() -> Self {
        Self {
            initial_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(5),
            backoff_coefficient: 2.0,
            jitter: 0.1,
        }
    }

    /// Never wait beyond the regular interval
    pub fn none() -> Self {
        Self {
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    /// Set the initial backoff interval
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Set the maximum backoff interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set the backoff coefficient
    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient.max(1.0);
        self
    }

    /// Set the jitter factor (0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Extra delay after `consecutive_failures` failures in a row
    pub fn delay_for_failures(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures <= 1 || self.max_interval.is_zero() {
            return Duration::ZERO;
        }

        let exponent = (consecutive_failures - 2).min(i32::MAX as u32) as i32;
        let base = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter_range = capped * self.jitter;
            let jitter_offset = rng.gen_range(-jitter_range..jitter_range);
            (capped + jitter_offset).clamp(0.0, self.max_interval.as_secs_f64())
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }
}
