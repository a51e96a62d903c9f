//! Reliability patterns for periodic tasks
//!
//! This module provides:
//! - [`BackoffPolicy`] - Bounded exponential backoff after consecutive failures

mod backoff;

pub use backoff::BackoffPolicy;
