//! Configuration types for the micro-batching engine.

use std::time::Duration;

use crate::error::{MicroBatchError, Result};

/// Smallest accepted batch size.
pub const MIN_BATCH_SIZE: usize = 1;
/// Largest accepted batch size.
pub const MAX_BATCH_SIZE: usize = 10_000;
/// Longest accepted interval between drains.
pub const MAX_BATCH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Environment variable read by [`EngineConfig::from_env`] for the batch size.
pub const ENV_BATCH_SIZE: &str = "MICROBATCH_BATCH_SIZE";
/// Environment variable read by [`EngineConfig::from_env`] for the interval, in milliseconds.
pub const ENV_BATCH_INTERVAL_MS: &str = "MICROBATCH_BATCH_INTERVAL_MS";

/// Configuration for the MicroBatchingEngine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of jobs handed to the processor at once.
    pub batch_size: usize,
    /// Pause between drains while the dispatcher is running.
    pub batch_interval: Duration,
    /// Wake the dispatcher early once `batch_size` jobs are pending.
    pub flush_when_full: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_interval: Duration::from_secs(1),
            flush_when_full: false,
        }
    }
}

impl EngineConfig {
    /// Create a config with the given size and interval.
    pub fn new(batch_size: usize, batch_interval: Duration) -> Self {
        Self {
            batch_size,
            batch_interval,
            ..Default::default()
        }
    }

    /// Create a new builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Load the config from `MICROBATCH_*` environment variables.
    ///
    /// Unset variables keep their defaults. The result is validated.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_BATCH_SIZE) {
            config.batch_size = raw.trim().parse().map_err(|_| {
                MicroBatchError::invalid_config(
                    "batch_size",
                    format!("{} is not a valid integer: {:?}", ENV_BATCH_SIZE, raw),
                )
            })?;
        }

        if let Some(raw) = lookup(ENV_BATCH_INTERVAL_MS) {
            let millis: u64 = raw.trim().parse().map_err(|_| {
                MicroBatchError::invalid_config(
                    "batch_interval",
                    format!("{} is not a valid integer: {:?}", ENV_BATCH_INTERVAL_MS, raw),
                )
            })?;
            config.batch_interval = Duration::from_millis(millis);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the size and interval against their fixed bounds.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(MicroBatchError::invalid_config(
                "batch_size",
                format!(
                    "Batch size must be between {} and {}.",
                    MIN_BATCH_SIZE, MAX_BATCH_SIZE
                ),
            ));
        }

        if self.batch_interval.is_zero() || self.batch_interval > MAX_BATCH_INTERVAL {
            return Err(MicroBatchError::invalid_config(
                "batch_interval",
                format!(
                    "Batch interval must be greater than 0 and at most {} milliseconds.",
                    MAX_BATCH_INTERVAL.as_millis()
                ),
            ));
        }

        Ok(())
    }
}

/// Builder for EngineConfig.
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the batch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set the interval between drains.
    pub fn batch_interval(mut self, interval: Duration) -> Self {
        self.config.batch_interval = interval;
        self
    }

    /// Wake the dispatcher as soon as a full batch is pending.
    pub fn flush_when_full(mut self, enabled: bool) -> Self {
        self.config.flush_when_full = enabled;
        self
    }

    /// Build and validate the EngineConfig.
    pub fn build(self) -> Result<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
