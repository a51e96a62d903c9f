//! Coordinator side of the rate controller
//!
//! This module provides:
//! - [`LivenessTracker`] - Evicts members whose heartbeat expired
//! - [`DelayController`] - Republishes the shared delay from observed throughput
//! - [`Coordinator`] - Schedules both independently
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                      Coordinator                      │
//! │  ┌──────────────────────┐   ┌──────────────────────┐  │
//! │  │   LivenessTracker    │   │   DelayController    │  │
//! │  │        (5s)          │   │        (1s)          │  │
//! │  └──────────┬───────────┘   └──────────┬───────────┘  │
//! └─────────────┼──────────────────────────┼──────────────┘
//!               ▼                          ▼
//!     client_list, node:<id>      tasks_complete, delay
//!     clients_alive
//! ```

mod control;
#[allow(clippy::module_inception)]
mod coordinator;
mod liveness;

pub use control::{min_delay_for_rate, Adjustment, ControlLaw, DelayController, TickReport};
pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorError, CoordinatorStatus};
pub use liveness::{LivenessTracker, ScanReport};
