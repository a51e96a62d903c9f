//! Typed, timeout-bounded access to the shared coordination keys

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::store::{CoordinationStore, StoreError};

/// Shared key layout
///
/// Producers and the coordinator agree on these names; changing any of them
/// partitions the population.
pub mod keys {
    /// Set of registered worker identities
    pub const MEMBERSHIP_SET: &str = "client_list";
    /// Shared per-batch delay in milliseconds
    pub const DELAY: &str = "delay";
    /// Tasks completed since the last control-window reset
    pub const TASKS_COMPLETE: &str = "tasks_complete";
    /// Informational gauge of members with a live heartbeat
    pub const CLIENTS_ALIVE: &str = "clients_alive";
    /// Value stored in heartbeat records
    pub const HEARTBEAT_SENTINEL: &str = "true";

    /// Heartbeat record key for a worker identity
    pub fn heartbeat_key(worker_id: &str) -> String {
        format!("node:{worker_id}")
    }
}

/// Store handle shared by every component
///
/// Wraps the injected [`CoordinationStore`] and bounds every call with a
/// timeout so a slow or partitioned store cannot stall a periodic task.
#[derive(Clone)]
pub struct StoreClient {
    store: Arc<dyn CoordinationStore>,
    timeout: Duration,
}

impl StoreClient {
    /// Create a client with the given per-call timeout
    pub fn new(store: Arc<dyn CoordinationStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Per-call timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    async fn timed<T, F>(&self, op: &'static str, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                op,
                after: self.timeout,
            }),
        }
    }

    // =========================================================================
    // Membership
    // =========================================================================

    /// Add a worker to the membership set
    pub async fn register_member(&self, worker_id: &str) -> Result<bool, StoreError> {
        self.timed("sadd", self.store.sadd(keys::MEMBERSHIP_SET, worker_id))
            .await
    }

    /// Write or refresh a worker's heartbeat record
    pub async fn refresh_heartbeat(&self, worker_id: &str, ttl: Duration) -> Result<(), StoreError> {
        let key = keys::heartbeat_key(worker_id);
        self.timed(
            "set_with_ttl",
            self.store
                .set_with_ttl(&key, keys::HEARTBEAT_SENTINEL, ttl),
        )
        .await
    }

    /// All registered worker identities
    pub async fn members(&self) -> Result<Vec<String>, StoreError> {
        self.timed("smembers", self.store.smembers(keys::MEMBERSHIP_SET))
            .await
    }

    /// Whether a worker's heartbeat record still exists
    pub async fn is_alive(&self, worker_id: &str) -> Result<bool, StoreError> {
        let key = keys::heartbeat_key(worker_id);
        Ok(self.timed("get", self.store.get(&key)).await?.is_some())
    }

    /// Remove a worker from the membership set
    pub async fn evict(&self, worker_id: &str) -> Result<bool, StoreError> {
        self.timed("srem", self.store.srem(keys::MEMBERSHIP_SET, worker_id))
            .await
    }

    /// Publish the alive-count gauge
    pub async fn publish_alive_count(&self, alive: usize) -> Result<(), StoreError> {
        self.timed(
            "set",
            self.store.set(keys::CLIENTS_ALIVE, &alive.to_string()),
        )
        .await
    }

    /// Read the alive-count gauge (`None` before the first scan)
    pub async fn alive_count(&self) -> Result<Option<usize>, StoreError> {
        let raw = self.timed("get", self.store.get(keys::CLIENTS_ALIVE)).await?;
        Ok(raw.and_then(|v| v.parse().ok()))
    }

    // =========================================================================
    // Shared delay
    // =========================================================================

    /// Read the shared delay in milliseconds
    ///
    /// Returns `None` when the key is unset or does not hold a finite,
    /// non-negative number; callers substitute their fallback.
    pub async fn read_delay(&self) -> Result<Option<f64>, StoreError> {
        let raw = self.timed("get", self.store.get(keys::DELAY)).await?;
        Ok(raw.and_then(|value| match value.trim().parse::<f64>() {
            Ok(ms) if ms.is_finite() && ms >= 0.0 => Some(ms),
            _ => {
                warn!(value = %value, "Ignoring malformed shared delay");
                None
            }
        }))
    }

    /// Publish a new shared delay in milliseconds
    pub async fn write_delay(&self, delay_ms: f64) -> Result<(), StoreError> {
        self.timed("set", self.store.set(keys::DELAY, &delay_ms.to_string()))
            .await
    }

    // =========================================================================
    // Task counter
    // =========================================================================

    /// Add a completed batch to the aggregate counter
    pub async fn add_tasks(&self, count: usize) -> Result<i64, StoreError> {
        let delta = i64::try_from(count).unwrap_or(i64::MAX);
        self.timed("incr_by", self.store.incr_by(keys::TASKS_COMPLETE, delta))
            .await
    }

    /// Atomically read the aggregate counter and reset it to zero
    pub async fn take_task_count(&self) -> Result<u64, StoreError> {
        let previous = self
            .timed("get_set", self.store.get_set(keys::TASKS_COMPLETE, "0"))
            .await?;
        Ok(match previous {
            None => 0,
            Some(value) => value.parse::<i64>().map(|n| n.max(0) as u64).unwrap_or_else(|_| {
                warn!(value = %value, "Discarding malformed task counter");
                0
            }),
        })
    }
}

/// Convert a delay in milliseconds to a sleepable duration
pub fn delay_duration(delay_ms: f64) -> Duration {
    if delay_ms.is_finite() && delay_ms > 0.0 {
        Duration::from_secs_f64(delay_ms / 1000.0)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCoordinationStore;
    use async_trait::async_trait;

    fn client() -> (Arc<InMemoryCoordinationStore>, StoreClient) {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let client = StoreClient::new(store.clone(), Duration::from_secs(1));
        (store, client)
    }

    /// Store whose reads never complete
    struct HangingStore;

    #[async_trait]
    impl CoordinationStore for HangingStore {
        async fn sadd(&self, _: &str, _: &str) -> Result<bool, StoreError> {
            std::future::pending().await
        }
        async fn smembers(&self, _: &str) -> Result<Vec<String>, StoreError> {
            std::future::pending().await
        }
        async fn srem(&self, _: &str, _: &str) -> Result<bool, StoreError> {
            std::future::pending().await
        }
        async fn set(&self, _: &str, _: &str) -> Result<(), StoreError> {
            std::future::pending().await
        }
        async fn set_with_ttl(&self, _: &str, _: &str, _: Duration) -> Result<(), StoreError> {
            std::future::pending().await
        }
        async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
            std::future::pending().await
        }
        async fn incr_by(&self, _: &str, _: i64) -> Result<i64, StoreError> {
            std::future::pending().await
        }
        async fn get_set(&self, _: &str, _: &str) -> Result<Option<String>, StoreError> {
            std::future::pending().await
        }
    }

    #[test]
    fn test_heartbeat_key() {
        assert_eq!(keys::heartbeat_key("worker-1"), "node:worker-1");
    }

    #[tokio::test]
    async fn test_delay_round_trip_and_fallback() {
        let (store, client) = client();
        assert_eq!(client.read_delay().await.unwrap(), None);

        client.write_delay(490.0).await.unwrap();
        assert_eq!(store.get(keys::DELAY).await.unwrap().as_deref(), Some("490"));
        assert_eq!(client.read_delay().await.unwrap(), Some(490.0));

        store.set(keys::DELAY, "undefined").await.unwrap();
        assert_eq!(client.read_delay().await.unwrap(), None);

        store.set(keys::DELAY, "-5").await.unwrap();
        assert_eq!(client.read_delay().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_take_task_count_resets_window() {
        let (_store, client) = client();
        assert_eq!(client.take_task_count().await.unwrap(), 0);

        client.add_tasks(100).await.unwrap();
        client.add_tasks(37).await.unwrap();
        assert_eq!(client.take_task_count().await.unwrap(), 137);
        assert_eq!(client.take_task_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_heartbeat_liveness() {
        let (_store, client) = client();
        assert!(!client.is_alive("w").await.unwrap());
        client
            .refresh_heartbeat("w", Duration::from_secs(11))
            .await
            .unwrap();
        assert!(client.is_alive("w").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_are_bounded_by_timeout() {
        let client = StoreClient::new(Arc::new(HangingStore), Duration::from_millis(250));
        let err = client.read_delay().await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Timeout {
                op: "get",
                after: Duration::from_millis(250)
            }
        );
    }

    #[test]
    fn test_delay_duration() {
        assert_eq!(delay_duration(500.0), Duration::from_millis(500));
        assert_eq!(delay_duration(0.0), Duration::ZERO);
        assert_eq!(delay_duration(f64::NAN), Duration::ZERO);
    }
}
