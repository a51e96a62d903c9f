//! Adaptive delay control
//!
//! The coordinator measures the population's aggregate completion rate over
//! each control window and nudges the shared delay: a large step up when the
//! rate is at or near the ceiling, a small step down when there is headroom.
//!
//! ```text
//!   rate > 0.9 * rate_max   ──►  delay + 50
//!   rate < 0.9 * rate_max   ──►  max(delay - 10, delay_min)
//!   rate = 0.9 * rate_max   ──►  unchanged
//! ```

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::store::{StoreClient, StoreError};

/// Asymmetric-step control law
///
/// # Example
///
/// ```
/// use pacer::coordinator::{Adjustment, ControlLaw};
///
/// let law = ControlLaw::new(0.25);
/// // 1000 tasks in 1000ms is 1.0 task/ms, far above 0.9 * 0.25
/// let adjustment = law.adjust(1000, 1000.0, 500.0);
/// assert_eq!(adjustment, Adjustment::Increase { from: 500.0, to: 550.0 });
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlLaw {
    /// Target ceiling for the aggregate rate, in tasks per millisecond
    pub rate_max: f64,

    /// Floor for the shared delay in milliseconds
    pub delay_min_ms: f64,

    /// Fraction of `rate_max` that separates backing off from probing
    pub threshold_ratio: f64,

    /// Delay added when the rate is above the threshold
    pub step_up_ms: f64,

    /// Delay removed when the rate is below the threshold
    pub step_down_ms: f64,
}

impl Default for ControlLaw {
    fn default() -> Self {
        Self::new(0.25)
    }
}

impl ControlLaw {
    /// Law for a target rate, with `delay_min = 1 / rate_max`
    pub fn new(rate_max: f64) -> Self {
        Self {
            rate_max,
            delay_min_ms: min_delay_for_rate(rate_max),
            threshold_ratio: 0.9,
            step_up_ms: 50.0,
            step_down_ms: 10.0,
        }
    }

    /// Override the delay floor
    pub fn with_delay_min(mut self, delay_min_ms: f64) -> Self {
        self.delay_min_ms = delay_min_ms.max(0.0);
        self
    }

    /// Override the step sizes
    pub fn with_steps(mut self, up_ms: f64, down_ms: f64) -> Self {
        self.step_up_ms = up_ms.max(0.0);
        self.step_down_ms = down_ms.max(0.0);
        self
    }

    /// Rate at which the law switches direction
    pub fn threshold(&self) -> f64 {
        self.rate_max * self.threshold_ratio
    }

    /// Compute the next delay for one control window
    ///
    /// A current delay below the floor is treated as the floor, so every
    /// step is exactly one step from `from` and never lands below it.
    pub fn adjust(&self, tasks_complete: u64, elapsed_ms: f64, delay_current: f64) -> Adjustment {
        let delay_current = delay_current.max(self.delay_min_ms);
        let rate = tasks_complete as f64 / elapsed_ms;
        let threshold = self.threshold();

        if rate > threshold {
            Adjustment::Increase {
                from: delay_current,
                to: delay_current + self.step_up_ms,
            }
        } else if rate < threshold {
            Adjustment::Decrease {
                from: delay_current,
                to: (delay_current - self.step_down_ms).max(self.delay_min_ms),
            }
        } else {
            Adjustment::Hold {
                delay: delay_current,
            }
        }
    }
}

/// Minimum delay that keeps a single producer under `rate_max`
pub fn min_delay_for_rate(rate_max: f64) -> f64 {
    if rate_max > 0.0 {
        1.0 / rate_max
    } else {
        0.0
    }
}

/// Outcome of applying the control law
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Adjustment {
    /// Rate above the threshold; back off
    Increase { from: f64, to: f64 },
    /// Rate below the threshold; probe a shorter delay
    Decrease { from: f64, to: f64 },
    /// Rate exactly at the threshold; leave the delay alone
    Hold { delay: f64 },
}

impl Adjustment {
    /// Delay after the adjustment
    pub fn next_delay(&self) -> f64 {
        match *self {
            Self::Increase { to, .. } | Self::Decrease { to, .. } => to,
            Self::Hold { delay } => delay,
        }
    }

    /// Whether the shared delay must be rewritten
    pub fn changes_delay(&self) -> bool {
        !matches!(self, Self::Hold { .. })
    }
}

/// Result of one controller tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// Tasks counted in the window that just closed
    pub tasks_complete: u64,
    /// Length of that window
    pub elapsed: Duration,
    /// Observed aggregate rate, tasks per millisecond
    pub rate: f64,
    /// Delay decision
    pub adjustment: Adjustment,
}

/// Periodically republishes the shared delay
///
/// Owns the control window: the window starts when the controller seeds the
/// store and restarts every time the aggregate counter is read-and-reset.
pub struct DelayController {
    client: StoreClient,
    law: ControlLaw,
    initial_delay_ms: f64,
    started_at: Instant,
    segment_start: Mutex<Instant>,
}

impl DelayController {
    /// Create a controller; nothing is written until [`seed`](Self::seed)
    pub fn new(client: StoreClient, law: ControlLaw, initial_delay_ms: f64) -> Self {
        let now = Instant::now();
        Self {
            client,
            law,
            initial_delay_ms,
            started_at: now,
            segment_start: Mutex::new(now),
        }
    }

    /// Control law in use
    pub fn law(&self) -> &ControlLaw {
        &self.law
    }

    /// Initial delay, raised to the floor if configured below it
    pub fn initial_delay(&self) -> f64 {
        self.initial_delay_ms.max(self.law.delay_min_ms)
    }

    /// Publish the initial delay and open a fresh control window
    #[instrument(skip(self))]
    pub async fn seed(&self) -> Result<f64, StoreError> {
        let delay = self.initial_delay();
        self.client.write_delay(delay).await?;
        let stale = self.client.take_task_count().await?;
        *self.segment_start.lock() = Instant::now();

        info!(delay_ms = delay, discarded_tasks = stale, "Seeded shared delay");
        Ok(delay)
    }

    /// Run one control step
    ///
    /// Returns `Ok(None)` when no time has passed since the window opened.
    /// A failed read leaves both the delay and the counter untouched.
    pub async fn tick(&self) -> Result<Option<TickReport>, StoreError> {
        let window_start = *self.segment_start.lock();
        if Instant::now() <= window_start {
            debug!("Control window is empty, skipping tick");
            return Ok(None);
        }

        let delay_current = match self.client.read_delay().await? {
            Some(delay) => delay,
            None => {
                warn!(
                    fallback_ms = self.initial_delay(),
                    "Shared delay missing, using initial delay"
                );
                self.initial_delay()
            }
        };

        let tasks_complete = self.client.take_task_count().await?;
        let now = Instant::now();
        let elapsed = now.duration_since(window_start);
        *self.segment_start.lock() = now;

        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let rate = tasks_complete as f64 / elapsed_ms;
        let adjustment = self.law.adjust(tasks_complete, elapsed_ms, delay_current);

        if adjustment.changes_delay() {
            self.client.write_delay(adjustment.next_delay()).await?;
        }

        info!(
            total_elapsed_ms = now.duration_since(self.started_at).as_millis() as u64,
            tasks_complete,
            rate,
            delay_next = adjustment.next_delay(),
            "Control tick"
        );

        Ok(Some(TickReport {
            tasks_complete,
            elapsed,
            rate,
            adjustment,
        }))
    }
}
