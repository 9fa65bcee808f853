//! Pool configuration

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;

/// Default sleep between poll cycles
pub const CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Pool configuration
///
/// # Example
///
/// ```
/// use runpool::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::default()
///     .with_max_simultaneous(4)
///     .with_poll_interval(Duration::from_millis(50));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Maximum runs admitted at once (None = unbounded)
    #[serde(default)]
    pub max_simultaneous: Option<usize>,

    /// Sleep between poll cycles in `run` loops
    #[serde(with = "duration_millis", default = "default_poll_interval")]
    pub poll_interval: Duration,
}

fn default_poll_interval() -> Duration {
    CHECK_INTERVAL
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_simultaneous: None,
            poll_interval: CHECK_INTERVAL,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `RUNPOOL_MAX_SIMULTANEOUS`: Admission limit (unset, empty or `0` = unbounded)
    /// - `RUNPOOL_POLL_INTERVAL_MS`: Sleep between poll cycles (default: 100)
    pub fn from_env() -> Result<Self, PoolError> {
        let mut config = Self::default();

        if let Ok(value) = env::var("RUNPOOL_MAX_SIMULTANEOUS") {
            let value = value.trim();
            if !value.is_empty() {
                let max: usize = value.parse().map_err(|e| {
                    PoolError::InvalidConfig(format!("RUNPOOL_MAX_SIMULTANEOUS={}: {}", value, e))
                })?;
                config.max_simultaneous = (max > 0).then_some(max);
            }
        }

        if let Ok(value) = env::var("RUNPOOL_POLL_INTERVAL_MS") {
            let millis: u64 = value.trim().parse().map_err(|e| {
                PoolError::InvalidConfig(format!("RUNPOOL_POLL_INTERVAL_MS={}: {}", value, e))
            })?;
            config.poll_interval = Duration::from_millis(millis);
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the admission limit
    pub fn with_max_simultaneous(mut self, max: usize) -> Self {
        self.max_simultaneous = Some(max);
        self
    }

    /// Remove the admission limit
    pub fn unbounded(mut self) -> Self {
        self.max_simultaneous = None;
        self
    }

    /// Set the poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_simultaneous == Some(0) {
            return Err(PoolError::InvalidConfig(
                "max_simultaneous must be at least 1".into(),
            ));
        }
        Ok(())
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
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
