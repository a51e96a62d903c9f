//! Redis implementation of CoordinationStore

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

use super::store::*;

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

/// Redis-backed coordination store
///
/// Each operation maps to a single Redis command, so per-key atomicity is
/// the server's. The connection manager reconnects transparently after a
/// dropped connection.
#[derive(Clone)]
pub struct RedisCoordinationStore {
    conn: ConnectionManager,
}

impl RedisCoordinationStore {
    /// Connect to a Redis server, e.g. `redis://127.0.0.1:6379`
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(url = %url, "Connected to Redis coordination store");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn sadd(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let added: i64 = conn.sadd(set, member).await?;
        Ok(added > 0)
    }

    async fn smembers(&self, set: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(set).await?)
    }

    async fn srem(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.srem(set, member).await?;
        Ok(removed > 0)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let _: () = conn.pset_ex(key, value, millis).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        conn.incr(key, delta).await.map_err(|err| {
            if err.kind() == redis::ErrorKind::TypeError
                || err.to_string().contains("not an integer")
            {
                StoreError::NotAnInteger {
                    key: key.to_string(),
                }
            } else {
                err.into()
            }
        })
    }

    async fn get_set(&self, key: &str, value: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.getset(key, value).await?)
    }
}
