//! Coordination store layer
//!
//! This module provides:
//! - [`CoordinationStore`] trait: sets, TTL keys, atomic increment and swap
//! - [`InMemoryCoordinationStore`] for tests and single-process runs
//! - [`RedisCoordinationStore`] for deployments (feature `redis`)
//! - [`StoreClient`]: the shared key layout with per-call timeouts

mod client;
mod memory;
#[cfg(feature = "redis")]
mod redis;
#[allow(clippy::module_inception)]
mod store;

pub use client::{delay_duration, keys, StoreClient};
pub use memory::InMemoryCoordinationStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisCoordinationStore;
pub use store::{CoordinationStore, StoreError};
