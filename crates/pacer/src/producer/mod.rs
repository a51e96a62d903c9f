//! Producer side of the rate controller
//!
//! This module provides:
//! - [`Producer`] - Heartbeating, batch-executing, delay-paced worker
//! - [`WorkSource`] - Pluggable supply of work items ([`IterSource`], channels)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Producer                          │
//! │  ┌─────────────────────┐    ┌──────────────────────────┐ │
//! │  │  Heartbeat (10s)    │    │       Batch loop         │ │
//! │  │  SADD client_list   │    │  next_batch(100)         │ │
//! │  │  PSETEX node:<id>   │    │  run all, join all       │ │
//! │  └─────────────────────┘    │  INCRBY tasks_complete   │ │
//! │                             │  GET delay, sleep        │ │
//! │                             └──────────────────────────┘ │
//! └──────────────────────────────────────────────────────────┘
//! ```

#[allow(clippy::module_inception)]
mod producer;
mod source;

pub use producer::{Producer, ProducerConfig, ProducerError, ProducerReport, ProducerState};
pub use source::{IterSource, WorkResult, WorkSource};
