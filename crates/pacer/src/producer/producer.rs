//! Throttled producer loop
//!
//! Registers with a TTL heartbeat, executes work in concurrent batches, and
//! sleeps for the shared delay between batches.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::source::{WorkResult, WorkSource};
use crate::config::duration_millis;
use crate::reliability::BackoffPolicy;
use crate::schedule::{run_periodic, Shutdown};
use crate::store::{delay_duration, StoreClient, StoreError};

/// Producer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProducerConfig {
    /// Worker identity (generated if not provided)
    pub worker_id: String,

    /// Heartbeat renewal period
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,

    /// Extra lifetime of a heartbeat record beyond the renewal period
    #[serde(with = "duration_millis")]
    pub heartbeat_leeway: Duration,

    /// Maximum units of work per batch (all run concurrently)
    pub concurrency: usize,

    /// Pause used when the shared delay cannot be read, in milliseconds
    pub fallback_delay_ms: f64,

    /// Keep heartbeating after the work source is exhausted
    pub keep_alive_when_drained: bool,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            heartbeat_interval: Duration::from_millis(10_000),
            heartbeat_leeway: Duration::from_millis(1_000),
            concurrency: 100,
            fallback_delay_ms: 4.0,
            keep_alive_when_drained: false,
        }
    }
}

impl ProducerConfig {
    /// Create a new producer configuration with a generated identity
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker ID
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Set the heartbeat renewal period
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the heartbeat leeway
    pub fn with_heartbeat_leeway(mut self, leeway: Duration) -> Self {
        self.heartbeat_leeway = leeway;
        self
    }

    /// Set the batch concurrency ceiling
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the fallback delay
    pub fn with_fallback_delay(mut self, delay_ms: f64) -> Self {
        self.fallback_delay_ms = delay_ms.max(0.0);
        self
    }

    /// Keep heartbeating after draining
    pub fn with_keep_alive_when_drained(mut self, keep_alive: bool) -> Self {
        self.keep_alive_when_drained = keep_alive;
        self
    }

    /// TTL written with every heartbeat
    pub fn heartbeat_ttl(&self) -> Duration {
        self.heartbeat_interval + self.heartbeat_leeway
    }
}

/// Producer lifecycle
///
/// ```text
/// Registering ──► Steady ──► Drained
///                   │
///                   └──────► Stopped (shutdown requested)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerState {
    /// Writing the first heartbeat
    Registering,
    /// Heartbeat active, batches running
    Steady,
    /// Work source exhausted
    Drained,
    /// Stopped by shutdown before draining
    Stopped,
}

impl std::fmt::Display for ProducerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registering => write!(f, "registering"),
            Self::Steady => write!(f, "steady"),
            Self::Drained => write!(f, "drained"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Producer errors
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    /// `run` was called twice on the same producer
    #[error("producer {0} has already run")]
    AlreadyStarted(String),
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerReport {
    pub worker_id: String,
    pub final_state: ProducerState,
    pub batches: u64,
    pub tasks: u64,
    pub failures: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Failures observed in a single batch
#[derive(Debug, Default)]
struct BatchOutcome {
    size: usize,
    errors: Vec<String>,
}

/// A rate-paced worker
///
/// # Example
///
/// ```ignore
/// use pacer::producer::{IterSource, Producer, ProducerConfig};
///
/// let producer = Producer::new(client, ProducerConfig::new().with_concurrency(100));
///
/// let report = producer
///     .run(IterSource::new(jobs.into_iter()), |job| async move {
///         call_rate_limited_api(job).await.map_err(|e| e.to_string())
///     })
///     .await?;
/// ```
pub struct Producer {
    client: StoreClient,
    config: ProducerConfig,
    started: AtomicBool,
    state_tx: watch::Sender<ProducerState>,
    shutdown: Shutdown,
    heartbeat_shutdown: Shutdown,
    heartbeat_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Producer {
    /// Create a new producer
    pub fn new(client: StoreClient, config: ProducerConfig) -> Self {
        let (state_tx, _) = watch::channel(ProducerState::Registering);
        Self {
            client,
            config,
            started: AtomicBool::new(false),
            state_tx,
            shutdown: Shutdown::new(),
            heartbeat_shutdown: Shutdown::new(),
            heartbeat_handle: parking_lot::Mutex::new(None),
        }
    }

    /// The worker identity
    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProducerState {
        *self.state_tx.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ProducerState> {
        self.state_tx.subscribe()
    }

    /// Whether the heartbeat activity is still running
    pub fn is_heartbeating(&self) -> bool {
        self.heartbeat_handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the batch loop and the heartbeat
    ///
    /// The batch in flight finishes; the heartbeat record is left to expire.
    pub async fn shutdown(&self) {
        info!(worker_id = %self.config.worker_id, "Stopping producer");
        self.shutdown.trigger();
        self.stop_heartbeat().await;
    }

    /// Run until the source drains or shutdown is requested
    #[instrument(skip_all, fields(worker_id = %self.config.worker_id))]
    pub async fn run<S, H, Fut>(
        &self,
        mut source: S,
        handler: H,
    ) -> Result<ProducerReport, ProducerError>
    where
        S: WorkSource,
        H: Fn(S::Item) -> Fut + Send + Sync,
        Fut: Future<Output = WorkResult> + Send + 'static,
    {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ProducerError::AlreadyStarted(self.config.worker_id.clone()));
        }

        let started_at = Utc::now();
        let mut report = ProducerReport {
            worker_id: self.config.worker_id.clone(),
            final_state: ProducerState::Registering,
            batches: 0,
            tasks: 0,
            failures: 0,
            started_at,
            finished_at: started_at,
        };

        info!(
            concurrency = self.config.concurrency,
            heartbeat_interval_ms = self.config.heartbeat_interval.as_millis() as u64,
            "Starting producer"
        );

        if let Err(e) = beat(&self.client, &self.config.worker_id, self.config.heartbeat_ttl()).await
        {
            error!(error = %e, "Initial registration failed, heartbeat will retry");
        }
        self.start_heartbeat_loop();
        self.state_tx.send_replace(ProducerState::Steady);

        let mut shutdown = self.shutdown.listener();
        let final_state = loop {
            if shutdown.is_shutdown() {
                break ProducerState::Stopped;
            }

            // An idle channel source may wait indefinitely
            let batch = tokio::select! {
                batch = source.next_batch(self.config.concurrency.max(1)) => batch,
                _ = shutdown.wait() => break ProducerState::Stopped,
            };
            if batch.is_empty() {
                break ProducerState::Drained;
            }

            let outcome = execute_batch(batch, &handler).await;
            report.batches += 1;
            report.tasks += outcome.size as u64;
            report.failures += outcome.errors.len() as u64;

            if let Some(first) = outcome.errors.first() {
                warn!(
                    batch_size = outcome.size,
                    failed = outcome.errors.len(),
                    first_error = %first,
                    "Batch completed with failures"
                );
            }

            // Failed units still consumed rate budget
            if let Err(e) = self.client.add_tasks(outcome.size).await {
                error!(error = %e, tasks = outcome.size, "Failed to report completed tasks");
            }

            let delay = self.current_delay().await;
            debug!(delay_ms = delay, batch_size = outcome.size, "Pausing before next batch");
            if shutdown.sleep(delay_duration(delay)).await {
                break ProducerState::Stopped;
            }
        };

        if final_state == ProducerState::Stopped || !self.config.keep_alive_when_drained {
            self.stop_heartbeat().await;
        }
        self.state_tx.send_replace(final_state);

        report.final_state = final_state;
        report.finished_at = Utc::now();
        info!(
            state = %final_state,
            batches = report.batches,
            tasks = report.tasks,
            failures = report.failures,
            "Producer finished"
        );
        Ok(report)
    }

    /// Shared delay, or the configured fallback when it cannot be read
    async fn current_delay(&self) -> f64 {
        match self.client.read_delay().await {
            Ok(Some(delay)) => delay,
            Ok(None) => {
                debug!(
                    fallback_ms = self.config.fallback_delay_ms,
                    "Shared delay unset, using fallback"
                );
                self.config.fallback_delay_ms
            }
            Err(e) => {
                warn!(
                    error = %e,
                    fallback_ms = self.config.fallback_delay_ms,
                    "Failed to read shared delay, using fallback"
                );
                self.config.fallback_delay_ms
            }
        }
    }

    /// Start the heartbeat renewal loop
    fn start_heartbeat_loop(&self) {
        let client = self.client.clone();
        let worker_id = self.config.worker_id.clone();
        let ttl = self.config.heartbeat_ttl();

        let handle = tokio::spawn(run_periodic(
            "heartbeat",
            self.config.heartbeat_interval,
            BackoffPolicy::none(),
            self.heartbeat_shutdown.listener(),
            move || {
                let client = client.clone();
                let worker_id = worker_id.clone();
                async move { beat(&client, &worker_id, ttl).await }
            },
        ));

        *self.heartbeat_handle.lock() = Some(handle);
    }

    async fn stop_heartbeat(&self) {
        self.heartbeat_shutdown.trigger();
        let handle = self.heartbeat_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Heartbeat task ended abnormally");
            }
        }
    }
}

/// Register membership and refresh the heartbeat record, concurrently
async fn beat(client: &StoreClient, worker_id: &str, ttl: Duration) -> Result<(), StoreError> {
    let (registered, refreshed) = tokio::join!(
        client.register_member(worker_id),
        client.refresh_heartbeat(worker_id, ttl),
    );
    if registered? {
        debug!(worker_id = %worker_id, "Joined membership set");
    }
    refreshed
}

/// Run every item concurrently and wait for all of them
async fn execute_batch<T, H, Fut>(batch: Vec<T>, handler: &H) -> BatchOutcome
where
    T: Send + 'static,
    H: Fn(T) -> Fut,
    Fut: Future<Output = WorkResult> + Send + 'static,
{
    let size = batch.len();
    let handles: Vec<_> = batch
        .into_iter()
        .map(|item| tokio::spawn(handler(item)))
        .collect();

    let errors = join_all(handles)
        .await
        .into_iter()
        .filter_map(|joined| match joined {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(error),
            Err(join_error) => Some(format!("work unit aborted: {join_error}")),
        })
        .collect();

    BatchOutcome { size, errors }
}
