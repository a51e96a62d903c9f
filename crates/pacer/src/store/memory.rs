//! In-memory implementation of CoordinationStore for testing and single-process runs

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::Instant;

use super::store::*;

/// Internal value state
struct ValueState {
    value: String,
    expires_at: Option<Instant>,
}

impl ValueState {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-memory implementation of CoordinationStore
///
/// Expiry is measured with [`tokio::time::Instant`], so tests running with a
/// paused clock see keys expire exactly when time is advanced past their TTL.
/// Expired keys are invisible to every operation and are removed when
/// next read or overwritten.
///
/// # Example
///
/// ```
/// use pacer::InMemoryCoordinationStore;
///
/// let store = InMemoryCoordinationStore::new();
/// ```
pub struct InMemoryCoordinationStore {
    values: RwLock<HashMap<String, ValueState>>,
    sets: RwLock<HashMap<String, HashSet<String>>>,
    available: AtomicBool,
}

impl InMemoryCoordinationStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            sets: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: while unavailable every operation fails
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live (non-expired) keys
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.values
            .read()
            .values()
            .filter(|v| v.is_live(now))
            .count()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.values.write().clear();
        self.sets.write().clear();
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store marked unavailable".into()))
        }
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        {
            let values = self.values.read();
            match values.get(key) {
                None => return None,
                Some(state) if state.is_live(now) => return Some(state.value.clone()),
                Some(_) => {}
            }
        }

        // Expired: drop it unless it was rewritten in the meantime
        let mut values = self.values.write();
        if values.get(key).is_some_and(|state| !state.is_live(now)) {
            values.remove(key);
        }
        None
    }
}

impl Default for InMemoryCoordinationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn sadd(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut sets = self.sets.write();
        Ok(sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn smembers(&self, set: &str) -> Result<Vec<String>, StoreError> {
        self.check_available()?;
        let sets = self.sets.read();
        Ok(sets
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn srem(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut sets = self.sets.write();
        let removed = match sets.get_mut(set) {
            Some(members) => members.remove(member),
            None => false,
        };
        if sets.get(set).is_some_and(|members| members.is_empty()) {
            sets.remove(set);
        }
        Ok(removed)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check_available()?;
        self.values.write().insert(
            key.to_string(),
            ValueState {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        self.values.write().insert(
            key.to_string(),
            ValueState {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_available()?;
        Ok(self.live_value(key))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.check_available()?;
        let now = Instant::now();
        let mut values = self.values.write();

        // Redis semantics: an existing TTL survives the increment
        let (current, expires_at) = match values.get(key).filter(|v| v.is_live(now)) {
            Some(state) => {
                let parsed = state
                    .value
                    .parse::<i64>()
                    .map_err(|_| StoreError::NotAnInteger {
                        key: key.to_string(),
                    })?;
                (parsed, state.expires_at)
            }
            None => (0, None),
        };

        let next = current
            .checked_add(delta)
            .ok_or_else(|| StoreError::Backend(format!("increment overflow at key {key}")))?;
        values.insert(
            key.to_string(),
            ValueState {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn get_set(&self, key: &str, value: &str) -> Result<Option<String>, StoreError> {
        self.check_available()?;
        let now = Instant::now();
        let previous = self.values.write().insert(
            key.to_string(),
            ValueState {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(previous.filter(|v| v.is_live(now)).map(|v| v.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_membership_is_idempotent() {
        let store = InMemoryCoordinationStore::new();

        assert!(store.sadd("client_list", "a").await.unwrap());
        assert!(!store.sadd("client_list", "a").await.unwrap());
        assert!(store.sadd("client_list", "b").await.unwrap());

        let mut members = store.smembers("client_list").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a", "b"]);

        assert!(store.srem("client_list", "a").await.unwrap());
        assert!(!store.srem("client_list", "a").await.unwrap());
        assert_eq!(store.smembers("client_list").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_smembers_of_missing_set_is_empty() {
        let store = InMemoryCoordinationStore::new();
        assert!(store.smembers("nope").await.unwrap().is_empty());
        assert!(!store.srem("nope", "x").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = InMemoryCoordinationStore::new();
        store
            .set_with_ttl("node:a", "true", Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(store.get("node:a").await.unwrap().as_deref(), Some("true"));

        tokio::time::advance(Duration::from_millis(99)).await;
        assert!(store.get("node:a").await.unwrap().is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(store.get("node:a").await.unwrap().is_none());
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_heartbeats_are_removed_on_read() {
        let store = InMemoryCoordinationStore::new();
        for i in 0..50 {
            store
                .set_with_ttl(&format!("node:{i}"), "true", Duration::from_millis(100))
                .await
                .unwrap();
        }
        store.set("delay", "500").await.unwrap();
        assert_eq!(store.values.read().len(), 51);

        tokio::time::advance(Duration::from_millis(100)).await;
        for i in 0..50 {
            assert_eq!(store.get(&format!("node:{i}")).await.unwrap(), None);
        }

        assert_eq!(store.values.read().len(), 1);
        assert_eq!(store.key_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_plain_set_clears_ttl() {
        let store = InMemoryCoordinationStore::new();
        store
            .set_with_ttl("k", "1", Duration::from_millis(10))
            .await
            .unwrap();
        store.set("k", "2").await.unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_incr_by() {
        let store = InMemoryCoordinationStore::new();
        assert_eq!(store.incr_by("tasks_complete", 100).await.unwrap(), 100);
        assert_eq!(store.incr_by("tasks_complete", 20).await.unwrap(), 120);
        assert_eq!(
            store.get("tasks_complete").await.unwrap().as_deref(),
            Some("120")
        );
    }

    #[tokio::test]
    async fn test_incr_by_rejects_non_integer() {
        let store = InMemoryCoordinationStore::new();
        store.set("delay", "500.5").await.unwrap();
        let err = store.incr_by("delay", 1).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::NotAnInteger {
                key: "delay".into()
            }
        );
    }

    #[tokio::test]
    async fn test_get_set_swaps_atomically() {
        let store = InMemoryCoordinationStore::new();
        assert_eq!(store.get_set("tasks_complete", "0").await.unwrap(), None);

        store.incr_by("tasks_complete", 42).await.unwrap();
        assert_eq!(
            store.get_set("tasks_complete", "0").await.unwrap().as_deref(),
            Some("42")
        );
        assert_eq!(
            store.get("tasks_complete").await.unwrap().as_deref(),
            Some("0")
        );
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_operation() {
        let store = InMemoryCoordinationStore::new();
        store.set("delay", "500").await.unwrap();
        store.set_available(false);

        assert!(matches!(
            store.get("delay").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.sadd("s", "m").await.is_err());
        assert!(store.incr_by("c", 1).await.is_err());

        store.set_available(true);
        assert_eq!(store.get("delay").await.unwrap().as_deref(), Some("500"));
    }
}
