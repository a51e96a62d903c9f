//! Periodic task scheduling with cooperative cancellation
//!
//! Every background activity (liveness scans, control ticks, heartbeats) runs
//! through [`run_periodic`]: a tokio ticker raced against a [`Shutdown`]
//! signal. Under a paused tokio clock, tests drive these loops by advancing
//! time instead of sleeping.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::reliability::BackoffPolicy;

/// Cancellation source shared by a component's background tasks
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Signal every listener to stop
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether shutdown has been signaled
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Create a listener for a background task
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a [`Shutdown`]
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Check if shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is signaled (or the source is dropped)
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep for `duration`, returning early with `true` on shutdown
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.wait() => true,
        }
    }
}

/// Run `step` every `interval` until shutdown
///
/// The first run happens one interval after the call. A failing step is
/// logged and skipped; the next tick retries. After consecutive failures
/// `backoff` inserts an additional, bounded wait. Missed ticks are delayed
/// rather than bursted.
pub async fn run_periodic<F, Fut, T, E>(
    name: &'static str,
    interval: Duration,
    backoff: BackoffPolicy,
    mut shutdown: ShutdownListener,
    mut step: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let period = interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut consecutive_failures: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.wait() => {
                debug!(task = name, "Shutdown requested");
                break;
            }
        }

        match step().await {
            Ok(_) => {
                if consecutive_failures > 0 {
                    info!(
                        task = name,
                        after_failures = consecutive_failures,
                        "Periodic task recovered"
                    );
                }
                consecutive_failures = 0;
            }
            Err(e) => {
                consecutive_failures = consecutive_failures.saturating_add(1);
                warn!(
                    task = name,
                    consecutive_failures,
                    error = %e,
                    "Periodic task failed, skipping this cycle"
                );

                let pause = backoff.delay_for_failures(consecutive_failures);
                if !pause.is_zero() && shutdown.sleep(pause).await {
                    break;
                }
            }
        }
    }

    debug!(task = name, "Periodic task exited");
}
