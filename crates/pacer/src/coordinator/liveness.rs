//! Membership liveness tracking

use tracing::{debug, info, instrument};

use crate::store::{StoreClient, StoreError};

/// Result of one liveness scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Members listed at the start of the scan
    pub members: usize,
    /// Members whose heartbeat record was present
    pub alive: usize,
    /// Members removed because their heartbeat had expired
    pub evicted: Vec<String>,
}

/// Evicts members whose heartbeat has expired and publishes the alive-count
///
/// TTL enforcement is store-side, so a crashed producer disappears from the
/// membership set within one scan interval of its heartbeat expiring.
pub struct LivenessTracker {
    client: StoreClient,
}

impl LivenessTracker {
    pub fn new(client: StoreClient) -> Self {
        Self { client }
    }

    /// Scan the membership set once
    ///
    /// Any store failure aborts the scan before the alive-count is
    /// published; the next scheduled scan starts over.
    #[instrument(skip(self))]
    pub async fn scan(&self) -> Result<ScanReport, StoreError> {
        let members = self.client.members().await?;
        let mut report = ScanReport {
            members: members.len(),
            ..Default::default()
        };

        for member in members {
            if self.client.is_alive(&member).await? {
                report.alive += 1;
            } else {
                // A producer re-registering right now may reappear; tolerated
                self.client.evict(&member).await?;
                debug!(worker_id = %member, "Evicted expired member");
                report.evicted.push(member);
            }
        }

        self.client.publish_alive_count(report.alive).await?;

        if report.evicted.is_empty() {
            debug!(alive = report.alive, "Liveness scan complete");
        } else {
            info!(
                alive = report.alive,
                evicted = report.evicted.len(),
                "Liveness scan evicted expired members"
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::store::{keys, CoordinationStore, InMemoryCoordinationStore};

    fn tracker() -> (Arc<InMemoryCoordinationStore>, StoreClient, LivenessTracker) {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let client = StoreClient::new(store.clone(), Duration::from_secs(1));
        (store, client.clone(), LivenessTracker::new(client))
    }

    #[tokio::test]
    async fn test_empty_membership_publishes_zero() {
        let (store, _client, tracker) = tracker();
        let report = tracker.scan().await.unwrap();
        assert_eq!(report, ScanReport::default());
        assert_eq!(
            store.get(keys::CLIENTS_ALIVE).await.unwrap().as_deref(),
            Some("0")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_members_are_evicted() {
        let (store, client, tracker) = tracker();
        for (id, ttl) in [("a", 11_000), ("b", 11_000), ("c", 500)] {
            client.register_member(id).await.unwrap();
            client
                .refresh_heartbeat(id, Duration::from_millis(ttl))
                .await
                .unwrap();
        }

        let report = tracker.scan().await.unwrap();
        assert_eq!(report.alive, 3);
        assert!(report.evicted.is_empty());

        tokio::time::advance(Duration::from_millis(600)).await;

        let report = tracker.scan().await.unwrap();
        assert_eq!(report.members, 3);
        assert_eq!(report.alive, 2);
        assert_eq!(report.evicted, vec!["c".to_string()]);

        let mut members = store.smembers(keys::MEMBERSHIP_SET).await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a", "b"]);
        assert_eq!(client.alive_count().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_member_without_heartbeat_is_evicted() {
        let (_store, client, tracker) = tracker();
        client.register_member("ghost").await.unwrap();

        let report = tracker.scan().await.unwrap();
        assert_eq!(report.alive, 0);
        assert_eq!(report.evicted, vec!["ghost".to_string()]);
        assert!(client.members().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_scan_publishes_nothing() {
        let (store, client, tracker) = tracker();
        client.register_member("a").await.unwrap();
        store.set_available(false);

        assert!(tracker.scan().await.is_err());

        store.set_available(true);
        assert_eq!(client.alive_count().await.unwrap(), None);
        assert_eq!(client.members().await.unwrap(), vec!["a".to_string()]);
    }
}
