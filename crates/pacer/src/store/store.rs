//! CoordinationStore trait definition

use std::time::Duration;

use async_trait::async_trait;

/// Error type for store operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Store cannot be reached
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    /// Call did not complete within the per-call timeout
    #[error("store operation {op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    /// Increment on a key holding a non-integer value
    #[error("value at key {key} is not an integer")]
    NotAnInteger { key: String },

    /// Backend-specific failure
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Key/value + set store with per-key expiry
///
/// Every operation is atomic per key; no cross-key transactions are offered
/// or required. Implementations must be thread-safe and support concurrent
/// access from many producers and a coordinator.
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    // =========================================================================
    // Set Operations
    // =========================================================================

    /// Add a member to a set. Returns `true` if it was not already present.
    async fn sadd(&self, set: &str, member: &str) -> Result<bool, StoreError>;

    /// List all members of a set (empty when the set does not exist)
    async fn smembers(&self, set: &str) -> Result<Vec<String>, StoreError>;

    /// Remove a member from a set. Returns `true` if it was present.
    async fn srem(&self, set: &str, member: &str) -> Result<bool, StoreError>;

    // =========================================================================
    // Key/Value Operations
    // =========================================================================

    /// Write a value with no expiry, replacing any previous value and TTL
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Write a value that expires after `ttl`
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration)
        -> Result<(), StoreError>;

    /// Read a value; `None` if missing or expired
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Atomically add `delta` to an integer key, treating a missing key as 0.
    ///
    /// Returns the value after the increment.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// Atomically replace a value and return the previous one
    async fn get_set(&self, key: &str, value: &str) -> Result<Option<String>, StoreError>;
}
