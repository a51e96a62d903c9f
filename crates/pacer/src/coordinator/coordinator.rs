//! Coordinator process: liveness tracking plus delay control
//!
//! Runs two independently scheduled tasks that share no in-process state;
//! everything they know about each other goes through the store.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use super::control::{ControlLaw, DelayController};
use super::liveness::LivenessTracker;
use crate::config::duration_millis;
use crate::reliability::BackoffPolicy;
use crate::schedule::{run_periodic, Shutdown};
use crate::store::StoreClient;

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoordinatorConfig {
    /// Interval between liveness scans
    #[serde(with = "duration_millis")]
    pub scan_interval: Duration,

    /// Interval between control ticks
    #[serde(with = "duration_millis")]
    pub control_tick: Duration,

    /// Shared delay published at startup, in milliseconds
    pub initial_delay_ms: f64,

    /// Control law parameters
    pub law: ControlLaw,

    /// Extra wait after consecutive failed cycles
    pub backoff: BackoffPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_millis(5000),
            control_tick: Duration::from_millis(1000),
            initial_delay_ms: 500.0,
            law: ControlLaw::default(),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Create a configuration for a target rate (tasks per millisecond)
    pub fn new(rate_max: f64) -> Self {
        Self {
            law: ControlLaw::new(rate_max),
            ..Default::default()
        }
    }

    /// Set the liveness scan interval
    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    /// Set the control tick interval
    pub fn with_control_tick(mut self, interval: Duration) -> Self {
        self.control_tick = interval;
        self
    }

    /// Set the delay seeded at startup
    pub fn with_initial_delay(mut self, delay_ms: f64) -> Self {
        self.initial_delay_ms = delay_ms;
        self
    }

    /// Set the control law
    pub fn with_law(mut self, law: ControlLaw) -> Self {
        self.law = law;
        self
    }

    /// Set the failure backoff
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Coordinator status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorStatus {
    /// Background tasks are running
    Running,
    /// Not started, or shut down
    Stopped,
}

/// Coordinator errors
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// Coordinator already running
    #[error("coordinator is already running")]
    AlreadyRunning,
}

/// The single logical coordinator
///
/// # Example
///
/// ```ignore
/// use pacer::coordinator::{Coordinator, CoordinatorConfig};
///
/// let coordinator = Coordinator::new(client, CoordinatorConfig::new(0.25));
/// coordinator.start().await?;
///
/// // ... later
/// coordinator.shutdown().await;
/// ```
pub struct Coordinator {
    client: StoreClient,
    config: CoordinatorConfig,
    controller: Arc<DelayController>,
    tracker: Arc<LivenessTracker>,
    shutdown: parking_lot::Mutex<Shutdown>,
    status: parking_lot::RwLock<CoordinatorStatus>,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    /// Create a new coordinator
    pub fn new(client: StoreClient, config: CoordinatorConfig) -> Self {
        let controller = Arc::new(DelayController::new(
            client.clone(),
            config.law.clone(),
            config.initial_delay_ms,
        ));
        let tracker = Arc::new(LivenessTracker::new(client.clone()));

        Self {
            client,
            config,
            controller,
            tracker,
            shutdown: parking_lot::Mutex::new(Shutdown::new()),
            status: parking_lot::RwLock::new(CoordinatorStatus::Stopped),
            handles: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Seed the shared delay and start both periodic tasks
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), CoordinatorError> {
        {
            let mut status = self.status.write();
            if *status == CoordinatorStatus::Running {
                return Err(CoordinatorError::AlreadyRunning);
            }
            *status = CoordinatorStatus::Running;
        }

        info!(
            rate_max = self.config.law.rate_max,
            delay_min_ms = self.config.law.delay_min_ms,
            scan_interval_ms = self.config.scan_interval.as_millis() as u64,
            control_tick_ms = self.config.control_tick.as_millis() as u64,
            "Starting coordinator"
        );

        // Producers fall back to their own default until a later tick writes the delay
        if let Err(e) = self.controller.seed().await {
            warn!(error = %e, "Failed to seed shared delay");
        }

        let shutdown = Shutdown::new();
        let liveness_listener = shutdown.listener();
        let control_listener = shutdown.listener();
        *self.shutdown.lock() = shutdown;

        let tracker = Arc::clone(&self.tracker);
        let liveness = tokio::spawn(run_periodic(
            "liveness_scan",
            self.config.scan_interval,
            self.config.backoff.clone(),
            liveness_listener,
            move || {
                let tracker = Arc::clone(&tracker);
                async move { tracker.scan().await }
            },
        ));

        let controller = Arc::clone(&self.controller);
        let control = tokio::spawn(run_periodic(
            "delay_control",
            self.config.control_tick,
            self.config.backoff.clone(),
            control_listener,
            move || {
                let controller = Arc::clone(&controller);
                async move { controller.tick().await }
            },
        ));

        self.handles.lock().extend([liveness, control]);
        Ok(())
    }

    /// Stop both periodic tasks and wait for them to exit
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        if *self.status.read() == CoordinatorStatus::Stopped {
            return;
        }

        info!("Stopping coordinator");
        self.shutdown.lock().trigger();

        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Coordinator task ended abnormally");
            }
        }

        *self.status.write() = CoordinatorStatus::Stopped;
        info!("Coordinator stopped");
    }

    /// Current status
    pub fn status(&self) -> CoordinatorStatus {
        *self.status.read()
    }

    /// Configuration in use
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Store client in use
    pub fn client(&self) -> &StoreClient {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{keys, CoordinationStore, InMemoryCoordinationStore};

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.scan_interval, Duration::from_millis(5000));
        assert_eq!(config.control_tick, Duration::from_millis(1000));
        assert_eq!(config.initial_delay_ms, 500.0);
        assert_eq!(config.law.rate_max, 0.25);
        assert_eq!(config.law.delay_min_ms, 4.0);
    }

    #[test]
    fn test_config_builder() {
        let config = CoordinatorConfig::new(0.5)
            .with_scan_interval(Duration::from_secs(2))
            .with_control_tick(Duration::from_millis(250))
            .with_initial_delay(100.0)
            .with_backoff(BackoffPolicy::none());

        assert_eq!(config.law.rate_max, 0.5);
        assert_eq!(config.law.delay_min_ms, 2.0);
        assert_eq!(config.scan_interval, Duration::from_secs(2));
        assert_eq!(config.control_tick, Duration::from_millis(250));
        assert_eq!(config.initial_delay_ms, 100.0);
        assert_eq!(config.backoff, BackoffPolicy::none());
    }

    #[test]
    fn test_config_serialization() {
        let config = CoordinatorConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["scan_interval"], 5000);
        assert_eq!(json["control_tick"], 1000);

        let parsed: CoordinatorConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_seeds_and_ticks() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let client = StoreClient::new(store.clone(), Duration::from_secs(1));
        let coordinator = Coordinator::new(client, CoordinatorConfig::default());

        coordinator.start().await.unwrap();
        assert_eq!(coordinator.status(), CoordinatorStatus::Running);
        assert!(matches!(
            coordinator.start().await,
            Err(CoordinatorError::AlreadyRunning)
        ));
        assert_eq!(store.get(keys::DELAY).await.unwrap().as_deref(), Some("500"));

        // Three idle control ticks probe downwards by 10 each
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(store.get(keys::DELAY).await.unwrap().as_deref(), Some("470"));
        assert_eq!(store.get(keys::CLIENTS_ALIVE).await.unwrap(), None);

        // First liveness scan at 5s
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(
            store.get(keys::CLIENTS_ALIVE).await.unwrap().as_deref(),
            Some("0")
        );

        coordinator.shutdown().await;
        assert_eq!(coordinator.status(), CoordinatorStatus::Stopped);

        // No more ticks once stopped
        let frozen = store.get(keys::DELAY).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.get(keys::DELAY).await.unwrap(), frozen);
    }
}
