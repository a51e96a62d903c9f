//! # Pacer
//!
//! Distributed admission-rate control for a fleet of producers calling a
//! shared, rate-limited service.
//!
//! ## Features
//!
//! - **Membership with TTL heartbeats**: producers register and refresh a
//!   self-expiring liveness record; the coordinator evicts the dead
//! - **Shared delay**: one number every producer sleeps between batches
//! - **Asymmetric control law**: back off fast (+50ms) when above 90% of the
//!   target rate, probe slowly (-10ms) when below, never under `1 / rate`
//! - **Pluggable store**: in-memory for tests, Redis for deployments
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Coordinator                          │
//! │   LivenessTracker (5s)            DelayController (1s)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CoordinationStore                       │
//! │  client_list  node:<id>  clients_alive  tasks_complete  delay│
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Producer (× N)                          │
//! │   heartbeat (10s)      batch → INCRBY → GET delay → sleep   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use pacer::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = Arc::new(InMemoryCoordinationStore::new());
//! let client = StoreClient::new(store, Duration::from_secs(2));
//!
//! let producer = Producer::new(client, ProducerConfig::new().with_worker_id("doc"));
//! let report = producer
//!     .run(IterSource::new(0..10u32), |_job| async { Ok::<(), String>(()) })
//!     .await
//!     .unwrap();
//!
//! assert_eq!(report.tasks, 10);
//! assert_eq!(report.final_state, ProducerState::Drained);
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod producer;
pub mod reliability;
pub mod schedule;
pub mod store;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{ConfigError, PacerConfig, StoreConfig};
    pub use crate::coordinator::{
        Adjustment, ControlLaw, Coordinator, CoordinatorConfig, CoordinatorError,
        CoordinatorStatus, DelayController, LivenessTracker,
    };
    pub use crate::producer::{
        IterSource, Producer, ProducerConfig, ProducerError, ProducerReport, ProducerState,
        WorkResult, WorkSource,
    };
    pub use crate::reliability::BackoffPolicy;
    pub use crate::schedule::{Shutdown, ShutdownListener};
    pub use crate::store::{
        CoordinationStore, InMemoryCoordinationStore, StoreClient, StoreError,
    };
}

// Re-export key types at crate root
pub use config::{ConfigError, PacerConfig, StoreConfig};
pub use coordinator::{
    Adjustment, ControlLaw, Coordinator, CoordinatorConfig, CoordinatorError, CoordinatorStatus,
    DelayController, LivenessTracker, ScanReport, TickReport,
};
pub use producer::{
    IterSource, Producer, ProducerConfig, ProducerError, ProducerReport, ProducerState,
    WorkResult, WorkSource,
};
pub use reliability::BackoffPolicy;
pub use schedule::{Shutdown, ShutdownListener};
#[cfg(feature = "redis")]
pub use store::RedisCoordinationStore;
pub use store::{CoordinationStore, InMemoryCoordinationStore, StoreClient, StoreError};
