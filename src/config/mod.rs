//! Queue configuration
//!
//! Timer intervals, batch sizing and the retry budget for the command queue.
//! All fields have serde defaults, so a configuration file only needs to name
//! the values it wants to override.

use serde::{Deserialize, Serialize};

use crate::error::{SledboxError, SledboxResult};

/// Environment variable consulted by [`load_config`] when no explicit path is given.
pub const CONFIG_ENV_VAR: &str = "SLEDBOX_CONFIG";

/// Configuration for a command queue instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    /// Milliseconds between retry sweeps over the backlog
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Maximum number of records claimed per sweep
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Milliseconds between scans for stale locks
    #[serde(default = "default_reclaim_interval_ms")]
    pub reclaim_interval_ms: u64,
    /// Age in milliseconds after which a held lock is considered abandoned
    #[serde(default = "default_stale_timeout_ms")]
    pub stale_timeout_ms: u64,
    /// Failed execution attempts allowed before a command is given up on
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_retry_interval_ms() -> u64 {
    5000
}

fn default_batch_size() -> usize {
    10
}

fn default_reclaim_interval_ms() -> u64 {
    30000
}

fn default_stale_timeout_ms() -> u64 {
    30000
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval_ms(),
            batch_size: default_batch_size(),
            reclaim_interval_ms: default_reclaim_interval_ms(),
            stale_timeout_ms: default_stale_timeout_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl QueueConfig {
    /// Set the retry sweep interval
    pub fn with_retry_interval_ms(mut self, millis: u64) -> Self {
        self.retry_interval_ms = millis;
        self
    }

    /// Set the per-sweep claim batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the stale-lock scan interval
    pub fn with_reclaim_interval_ms(mut self, millis: u64) -> Self {
        self.reclaim_interval_ms = millis;
        self
    }

    /// Set the age at which a held lock counts as abandoned
    pub fn with_stale_timeout_ms(mut self, millis: u64) -> Self {
        self.stale_timeout_ms = millis;
        self
    }

    /// Set the attempt budget per command
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Retry sweep interval as a [`std::time::Duration`]
    pub fn retry_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_interval_ms)
    }

    /// Stale-lock scan interval as a [`std::time::Duration`]
    pub fn reclaim_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reclaim_interval_ms)
    }

    /// Stale-lock age threshold as a [`std::time::Duration`]
    pub fn stale_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.stale_timeout_ms)
    }

    /// Validate the configuration.
    ///
    /// A zero `stale_timeout_ms` is allowed (reclaim then frees every held
    /// lock it sees), but zero intervals, batch size or attempt budget would
    /// make the queue spin or do nothing and are rejected.
    pub fn validate(&self) -> SledboxResult<()> {
        if self.batch_size == 0 {
            return Err(SledboxError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(SledboxError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry_interval_ms == 0 {
            return Err(SledboxError::InvalidConfig(
                "retry_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.reclaim_interval_ms == 0 {
            return Err(SledboxError::InvalidConfig(
                "reclaim_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Read and validate a configuration from a JSON file.
    pub fn from_file(path: &str) -> SledboxResult<Self> {
        let config_str = std::fs::read_to_string(path)?;
        match serde_json::from_str::<QueueConfig>(&config_str) {
            Ok(config) => {
                config.validate()?;
                Ok(config)
            }
            Err(e) => {
                log::error!("Failed to parse queue configuration: {}", e);
                Err(SledboxError::InvalidConfig(e.to_string()))
            }
        }
    }
}

/// Load a queue configuration from the given path or from the `SLEDBOX_CONFIG`
/// environment variable.
///
/// If neither names an existing file, the defaults are returned. A file that
/// exists but fails to read, parse or validate is an error rather than a
/// silent fallback.
pub fn load_config(path: Option<&str>) -> SledboxResult<QueueConfig> {
    let config_path = path
        .map(|p| p.to_string())
        .or_else(|| std::env::var(CONFIG_ENV_VAR).ok())
        .unwrap_or_else(|| "config/sledbox.json".to_string());

    if std::path::Path::new(&config_path).exists() {
        QueueConfig::from_file(&config_path)
    } else {
        Ok(QueueConfig::default())
    }
}
