// Process roles: coordinator, producer, or a single-process demo of both

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use pacer::store::{CoordinationStore, InMemoryCoordinationStore, StoreClient};
use pacer::{
    Coordinator, IterSource, PacerConfig, Producer, ProducerConfig, ProducerReport, StoreConfig,
    WorkResult,
};
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Which part of the system this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Coordinator,
    Producer,
    Demo,
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "coordinator" => Ok(Self::Coordinator),
            "producer" => Ok(Self::Producer),
            "demo" => Ok(Self::Demo),
            other => bail!("unknown PACER_ROLE {other:?}, expected coordinator, producer or demo"),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coordinator => write!(f, "coordinator"),
            Self::Producer => write!(f, "producer"),
            Self::Demo => write!(f, "demo"),
        }
    }
}

/// Synthetic workload settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoConfig {
    /// Producers started by the demo role
    pub producers: usize,
    /// Jobs queued per producer
    pub tasks: u64,
}

impl DemoConfig {
    /// Environment variables:
    /// - `PACER_DEMO_PRODUCERS`: producers in the demo fleet (default: 10)
    /// - `PACER_DEMO_TASKS`: jobs per producer (default: 100000)
    pub fn from_env() -> Result<Self> {
        let producers = match std::env::var("PACER_DEMO_PRODUCERS") {
            Ok(v) => v
                .trim()
                .parse()
                .with_context(|| format!("invalid PACER_DEMO_PRODUCERS {v:?}"))?,
            Err(_) => 10,
        };
        let tasks = match std::env::var("PACER_DEMO_TASKS") {
            Ok(v) => v
                .trim()
                .parse()
                .with_context(|| format!("invalid PACER_DEMO_TASKS {v:?}"))?,
            Err(_) => 100_000,
        };
        Ok(Self { producers, tasks })
    }
}

/// Stand-in for a call to the rate-limited service: 1 to 100ms of latency
pub async fn api_call(_job: u64) -> WorkResult {
    let latency = Duration::from_millis(rand::thread_rng().gen_range(1..=100));
    tokio::time::sleep(latency).await;
    Ok(())
}

pub async fn run_coordinator(config: PacerConfig) -> Result<()> {
    let client = connect(&config.store, true).await?;
    let coordinator = Coordinator::new(client, config.coordinator);
    coordinator.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    coordinator.shutdown().await;
    Ok(())
}

pub async fn run_producer(config: PacerConfig) -> Result<()> {
    let demo = DemoConfig::from_env()?;
    let client = connect(&config.store, true).await?;
    let producer = Arc::new(Producer::new(client, config.producer));

    let signal = shutdown_on_signal(vec![Arc::clone(&producer)]);
    let report = producer
        .run(IterSource::new(0..demo.tasks), api_call)
        .await?;
    signal.abort();

    log_report(&report);
    Ok(())
}

pub async fn run_demo(config: PacerConfig, demo: DemoConfig) -> Result<()> {
    let client = connect(&config.store, false).await?;
    let coordinator = Coordinator::new(client.clone(), config.coordinator.clone());
    coordinator.start().await?;

    info!(
        producers = demo.producers,
        tasks_per_producer = demo.tasks,
        rate_max = config.coordinator.law.rate_max,
        "Starting demo fleet"
    );

    let producers: Vec<Arc<Producer>> = (0..demo.producers)
        .map(|i| {
            let producer_config = ProducerConfig {
                worker_id: format!("{}-{i}", config.producer.worker_id),
                ..config.producer.clone()
            };
            Arc::new(Producer::new(client.clone(), producer_config))
        })
        .collect();

    let started = Instant::now();
    let runs = producers.iter().map(|producer| {
        let producer = Arc::clone(producer);
        let tasks = demo.tasks;
        tokio::spawn(async move { producer.run(IterSource::new(0..tasks), api_call).await })
    });

    let signal = shutdown_on_signal(producers.clone());
    let results = join_all(runs).await;
    signal.abort();

    let mut total_tasks = 0u64;
    let mut total_failures = 0u64;
    for result in results {
        match result {
            Ok(Ok(report)) => {
                total_tasks += report.tasks;
                total_failures += report.failures;
                log_report(&report);
            }
            Ok(Err(e)) => error!(error = %e, "Producer failed to run"),
            Err(e) => error!(error = %e, "Producer task ended abnormally"),
        }
    }

    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    let final_delay_ms = client.read_delay().await.ok().flatten();
    info!(
        total_tasks,
        total_failures,
        elapsed_ms = elapsed_ms as u64,
        mean_rate = total_tasks as f64 / elapsed_ms.max(1.0),
        final_delay_ms = ?final_delay_ms,
        "Demo finished"
    );

    coordinator.shutdown().await;
    Ok(())
}

/// Stop every producer on ctrl-c
fn shutdown_on_signal(producers: Vec<Arc<Producer>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                for producer in producers {
                    producer.shutdown().await;
                }
            }
            Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
        }
    })
}

fn log_report(report: &ProducerReport) {
    info!(
        worker_id = %report.worker_id,
        state = %report.final_state,
        batches = report.batches,
        tasks = report.tasks,
        failures = report.failures,
        duration_ms = (report.finished_at - report.started_at).num_milliseconds(),
        "Producer report"
    );
}

async fn connect(config: &StoreConfig, shared: bool) -> Result<StoreClient> {
    let store: Arc<dyn CoordinationStore> = match &config.redis_url {
        Some(url) => connect_redis(url).await?,
        None if shared => bail!("PACER_REDIS_URL must be set for this role"),
        None => {
            info!("Using in-memory coordination store");
            Arc::new(InMemoryCoordinationStore::new())
        }
    };
    Ok(StoreClient::new(store, config.timeout))
}

#[cfg(feature = "redis")]
async fn connect_redis(url: &str) -> Result<Arc<dyn CoordinationStore>> {
    let store = pacer::RedisCoordinationStore::connect(url)
        .await
        .context("Failed to connect to Redis")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(_url: &str) -> Result<Arc<dyn CoordinationStore>> {
    bail!("PACER_REDIS_URL is set but pacer-node was built without the `redis` feature")
}
