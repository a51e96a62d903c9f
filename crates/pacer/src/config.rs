//! Configuration for the store, the coordinator and producers
//!
//! Everything can be built programmatically with the `with_*` builders or
//! loaded from `PACER_*` environment variables via [`PacerConfig::from_env`].
//!
//! Environment variables:
//! - `PACER_STORE_TIMEOUT_MS`: per-call store timeout (default: 2000)
//! - `PACER_REDIS_URL`: Redis URL; unset means the in-memory store
//! - `PACER_SCAN_INTERVAL_MS`: liveness scan interval (default: 5000)
//! - `PACER_CONTROL_TICK_MS`: control tick interval (default: 1000)
//! - `PACER_TARGET_TASKS_PER_MS`: aggregate rate ceiling (default: 0.25)
//! - `PACER_MIN_DELAY_MS`: delay floor (default: 1 / target)
//! - `PACER_INITIAL_DELAY_MS`: delay seeded at startup (default: 500)
//! - `PACER_WORKER_ID`: producer identity (default: generated)
//! - `PACER_HEARTBEAT_INTERVAL_MS`: heartbeat period (default: 10000)
//! - `PACER_HEARTBEAT_LEEWAY_MS`: heartbeat TTL beyond the period (default: 1000)
//! - `PACER_CONCURRENCY`: units of work per batch (default: 100)
//! - `PACER_KEEP_ALIVE_WHEN_DRAINED`: keep heartbeating after draining (default: false)

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coordinator::{ControlLaw, CoordinatorConfig};
use crate::producer::ProducerConfig;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed
    #[error("invalid value for {var}: {value:?}")]
    InvalidVar { var: &'static str, value: String },

    /// A value parsed but is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Store connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Deadline applied to every store call
    #[serde(with = "duration_millis")]
    pub timeout: Duration,

    /// Redis connection URL; `None` selects the in-memory store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(2000),
            redis_url: None,
        }
    }
}

impl StoreConfig {
    /// Set the per-call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use a Redis backend
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }
}

/// Complete configuration for one process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PacerConfig {
    pub store: StoreConfig,
    pub coordinator: CoordinatorConfig,
    pub producer: ProducerConfig,
}

impl Default for PacerConfig {
    fn default() -> Self {
        let coordinator = CoordinatorConfig::default();
        let producer =
            ProducerConfig::default().with_fallback_delay(coordinator.law.delay_min_ms);
        Self {
            store: StoreConfig::default(),
            coordinator,
            producer,
        }
    }
}

impl PacerConfig {
    /// Load configuration from `PACER_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };
        let defaults = Self::default();

        let store = StoreConfig {
            timeout: vars.millis("PACER_STORE_TIMEOUT_MS", defaults.store.timeout)?,
            redis_url: vars.raw("PACER_REDIS_URL"),
        };

        let rate_max = vars.parse("PACER_TARGET_TASKS_PER_MS", defaults.coordinator.law.rate_max)?;
        let mut law = ControlLaw::new(rate_max);
        if let Some(delay_min) = vars.parse_opt::<f64>("PACER_MIN_DELAY_MS")? {
            law = law.with_delay_min(delay_min);
        }

        let coordinator = CoordinatorConfig {
            scan_interval: vars.millis("PACER_SCAN_INTERVAL_MS", defaults.coordinator.scan_interval)?,
            control_tick: vars.millis("PACER_CONTROL_TICK_MS", defaults.coordinator.control_tick)?,
            initial_delay_ms: vars.parse(
                "PACER_INITIAL_DELAY_MS",
                defaults.coordinator.initial_delay_ms,
            )?,
            law,
            backoff: defaults.coordinator.backoff,
        };

        let mut producer = defaults.producer;
        if let Some(worker_id) = vars.raw("PACER_WORKER_ID") {
            producer.worker_id = worker_id;
        }
        producer.heartbeat_interval =
            vars.millis("PACER_HEARTBEAT_INTERVAL_MS", producer.heartbeat_interval)?;
        producer.heartbeat_leeway =
            vars.millis("PACER_HEARTBEAT_LEEWAY_MS", producer.heartbeat_leeway)?;
        producer.concurrency = vars.parse("PACER_CONCURRENCY", producer.concurrency)?;
        producer.keep_alive_when_drained =
            vars.flag("PACER_KEEP_ALIVE_WHEN_DRAINED", producer.keep_alive_when_drained)?;
        producer.fallback_delay_ms = coordinator.law.delay_min_ms;

        Ok(Self {
            store,
            coordinator,
            producer,
        })
    }

    /// Reject settings the control loops cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let law = &self.coordinator.law;
        if !(law.rate_max.is_finite() && law.rate_max > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "target rate must be positive, got {}",
                law.rate_max
            )));
        }
        if !law.delay_min_ms.is_finite() || law.delay_min_ms < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "minimum delay must be non-negative, got {}",
                law.delay_min_ms
            )));
        }
        if !self.coordinator.initial_delay_ms.is_finite() || self.coordinator.initial_delay_ms < 0.0
        {
            return Err(ConfigError::Invalid(format!(
                "initial delay must be non-negative, got {}",
                self.coordinator.initial_delay_ms
            )));
        }

        let intervals = [
            ("store timeout", self.store.timeout),
            ("scan interval", self.coordinator.scan_interval),
            ("control tick", self.coordinator.control_tick),
            ("heartbeat interval", self.producer.heartbeat_interval),
            ("heartbeat leeway", self.producer.heartbeat_leeway),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }

        if self.producer.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        Ok(())
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    pub fn with_coordinator(mut self, coordinator: CoordinatorConfig) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn with_producer(mut self, producer: ProducerConfig) -> Self {
        self.producer = producer;
        self
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty trimmed value
    fn raw(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_opt<T: FromStr>(&self, var: &'static str) -> Result<Option<T>, ConfigError> {
        match self.raw(var) {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::InvalidVar { var, value }),
        }
    }

    fn parse<T: FromStr>(&self, var: &'static str, default: T) -> Result<T, ConfigError> {
        Ok(self.parse_opt(var)?.unwrap_or(default))
    }

    fn millis(&self, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self
            .parse_opt::<u64>(var)?
            .map(Duration::from_millis)
            .unwrap_or(default))
    }

    fn flag(&self, var: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.raw(var) {
            None => Ok(default),
            Some(value) => match value.to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(ConfigError::InvalidVar { var, value }),
            },
        }
    }
}

/// Serialize a `Duration` as integer milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_from_empty_environment() {
        let config = PacerConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.store.timeout, Duration::from_millis(2000));
        assert_eq!(config.store.redis_url, None);
        assert_eq!(config.coordinator.scan_interval, Duration::from_millis(5000));
        assert_eq!(config.coordinator.control_tick, Duration::from_millis(1000));
        assert_eq!(config.coordinator.initial_delay_ms, 500.0);
        assert_eq!(config.coordinator.law.rate_max, 0.25);
        assert_eq!(config.coordinator.law.delay_min_ms, 4.0);
        assert_eq!(config.producer.heartbeat_interval, Duration::from_millis(10_000));
        assert_eq!(config.producer.heartbeat_leeway, Duration::from_millis(1_000));
        assert_eq!(config.producer.concurrency, 100);
        assert_eq!(config.producer.fallback_delay_ms, 4.0);
        assert!(!config.producer.keep_alive_when_drained);
        assert!(config.producer.worker_id.starts_with("worker-"));
        config.validate().unwrap();
    }

    #[test]
    fn test_overrides() {
        let config = PacerConfig::from_lookup(lookup(&[
            ("PACER_STORE_TIMEOUT_MS", "750"),
            ("PACER_REDIS_URL", "redis://localhost:6379"),
            ("PACER_TARGET_TASKS_PER_MS", "0.5"),
            ("PACER_CONTROL_TICK_MS", "250"),
            ("PACER_WORKER_ID", "node-a"),
            ("PACER_CONCURRENCY", "20"),
            ("PACER_KEEP_ALIVE_WHEN_DRAINED", "TRUE"),
        ]))
        .unwrap();

        assert_eq!(config.store.timeout, Duration::from_millis(750));
        assert_eq!(config.store.redis_url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(config.coordinator.law.rate_max, 0.5);
        assert_eq!(config.coordinator.law.delay_min_ms, 2.0);
        assert_eq!(config.coordinator.control_tick, Duration::from_millis(250));
        assert_eq!(config.producer.worker_id, "node-a");
        assert_eq!(config.producer.concurrency, 20);
        assert_eq!(config.producer.fallback_delay_ms, 2.0);
        assert!(config.producer.keep_alive_when_drained);
    }

    #[test]
    fn test_explicit_min_delay_wins() {
        let config = PacerConfig::from_lookup(lookup(&[
            ("PACER_TARGET_TASKS_PER_MS", "0.25"),
            ("PACER_MIN_DELAY_MS", "10"),
        ]))
        .unwrap();

        assert_eq!(config.coordinator.law.delay_min_ms, 10.0);
        assert_eq!(config.producer.fallback_delay_ms, 10.0);
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let config =
            PacerConfig::from_lookup(lookup(&[("PACER_REDIS_URL", "  "), ("PACER_CONCURRENCY", "")]))
                .unwrap();
        assert_eq!(config.store.redis_url, None);
        assert_eq!(config.producer.concurrency, 100);
    }

    #[test]
    fn test_malformed_value_is_rejected() {
        let err = PacerConfig::from_lookup(lookup(&[("PACER_SCAN_INTERVAL_MS", "5s")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidVar {
                var: "PACER_SCAN_INTERVAL_MS",
                value: "5s".into()
            }
        );

        let err =
            PacerConfig::from_lookup(lookup(&[("PACER_KEEP_ALIVE_WHEN_DRAINED", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_rate = PacerConfig::from_lookup(lookup(&[("PACER_TARGET_TASKS_PER_MS", "0")])).unwrap();
        assert!(zero_rate.validate().is_err());

        let negative_rate =
            PacerConfig::from_lookup(lookup(&[("PACER_TARGET_TASKS_PER_MS", "-1")])).unwrap();
        assert!(negative_rate.validate().is_err());

        let zero_tick = PacerConfig::from_lookup(lookup(&[("PACER_CONTROL_TICK_MS", "0")])).unwrap();
        assert!(zero_tick.validate().is_err());

        let zero_leeway =
            PacerConfig::from_lookup(lookup(&[("PACER_HEARTBEAT_LEEWAY_MS", "0")])).unwrap();
        assert!(zero_leeway.validate().is_err());

        let mut no_concurrency = PacerConfig::default();
        no_concurrency.producer.concurrency = 0;
        assert!(no_concurrency.validate().is_err());
    }

    #[test]
    fn test_serialization_uses_millis() {
        let config = PacerConfig::default().with_store(
            StoreConfig::default()
                .with_timeout(Duration::from_millis(300))
                .with_redis_url("redis://cache:6379"),
        );
        let json = serde_json::to_value(&config).unwrap();

        assert_eq!(json["store"]["timeout"], 300);
        assert_eq!(json["store"]["redis_url"], "redis://cache:6379");
        assert_eq!(json["producer"]["heartbeat_interval"], 10_000);

        let parsed: PacerConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }
}
