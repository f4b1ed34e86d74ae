//! Worker pool configuration
//!
//! Configuration is fixed at construction time. Durations serialize as whole
//! milliseconds so configs can live in JSON/TOML files or env vars alike.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;

/// Environment variable holding the worker count
pub const ENV_WORKERS: &str = "WORKERPOOL_WORKERS";
/// Environment variable holding the base polling interval in milliseconds
pub const ENV_POLL_INTERVAL_MS: &str = "WORKERPOOL_POLL_INTERVAL_MS";
/// Environment variable holding the polling interval ceiling in milliseconds
pub const ENV_MAX_POLL_INTERVAL_MS: &str = "WORKERPOOL_MAX_POLL_INTERVAL_MS";

/// Polling configuration for the timed dispatcher
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    /// Interval between dispatcher calls while work is being found
    #[serde(with = "duration_millis")]
    pub base_interval: Duration,

    /// Optional ceiling for the backed-off interval.
    ///
    /// `None` lets the interval grow by the backoff factor on every empty
    /// tick (saturating at `Duration::MAX`).
    #[serde(default, with = "option_duration_millis")]
    pub max_interval: Option<Duration>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            max_interval: None,
        }
    }
}

impl PollerConfig {
    /// Create a new poller configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base poll interval
    pub fn with_base_interval(mut self, interval: Duration) -> Self {
        self.base_interval = interval;
        self
    }

    /// Set the base poll interval in whole milliseconds
    pub fn with_base_interval_ms(self, millis: u64) -> Self {
        self.with_base_interval(Duration::from_millis(millis))
    }

    /// Cap the backed-off poll interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = Some(interval);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.base_interval.is_zero() {
            return Err(PoolError::InvalidConfig(
                "base_interval must be positive".into(),
            ));
        }
        if let Some(max) = self.max_interval {
            if max < self.base_interval {
                return Err(PoolError::InvalidConfig(
                    "max_interval must not be shorter than base_interval".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Worker pool configuration
///
/// # Example
///
/// ```
/// use everruns_workerpool::{PollerConfig, WorkerPoolConfig};
///
/// let config = WorkerPoolConfig::new(4)
///     .with_poller(PollerConfig::new().with_base_interval_ms(250));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers; also the queue capacity
    pub workers: usize,

    /// Timed dispatcher settings (ignored by a plain `WorkerPool`)
    #[serde(default)]
    pub poller: PollerConfig,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            poller: PollerConfig::default(),
        }
    }
}

impl WorkerPoolConfig {
    /// Create a configuration with the given worker count
    pub fn new(workers: usize) -> Self {
        Self::default().with_workers(workers)
    }

    /// Load configuration from `WORKERPOOL_*` environment variables.
    ///
    /// Unset or unparsable variables fall back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        let mut config = Self::default();
        if let Some(workers) = parse(ENV_WORKERS).and_then(|n| usize::try_from(n).ok()) {
            config = config.with_workers(workers);
        }
        if let Some(millis) = parse(ENV_POLL_INTERVAL_MS) {
            config.poller = config.poller.with_base_interval_ms(millis);
        }
        if let Some(millis) = parse(ENV_MAX_POLL_INTERVAL_MS) {
            config.poller = config
                .poller
                .with_max_interval(Duration::from_millis(millis));
        }
        config
    }

    /// Set the worker count (at least one)
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set poller configuration
    pub fn with_poller(mut self, config: PollerConfig) -> Self {
        self.poller = config;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.workers == 0 {
            return Err(PoolError::InvalidConfig("workers must be positive".into()));
        }
        self.poller.validate()
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
