// src/config.rs
//
// Scheduler configuration: capacity, executor concurrency, retry
// defaults, and storage location. Structured as `serde_yaml`-loadable
// config, validated once at startup before any component is built from
// it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    pub cpu_units: u32,
    pub memory_mb: u32,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            cpu_units: 8,
            memory_mb: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub max_concurrent: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { max_concurrent: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub max_attempts: u32,
    pub backoff_multiplier: f64,
    pub timeout_seconds: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_multiplier: 2.0,
            timeout_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_seconds: u64,
    pub min_delay_seconds: u64,
    pub max_delay_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_seconds: 1,
            min_delay_seconds: 1,
            max_delay_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub event_buffer: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("taskforge.db"),
            event_buffer: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SchedulerConfig {
    pub capacity: CapacityConfig,
    pub executor: ExecutorConfig,
    pub defaults: DefaultsConfig,
    pub retry: RetryConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

impl SchedulerConfig {
    pub fn from_yaml_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: SchedulerConfig = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity.cpu_units == 0 || self.capacity.memory_mb == 0 {
            return Err(ConfigError::Invalid("capacity must be positive".into()));
        }
        if self.executor.max_concurrent == 0 {
            return Err(ConfigError::Invalid("executor.max_concurrent must be positive".into()));
        }
        if self.defaults.max_attempts == 0 {
            return Err(ConfigError::Invalid("defaults.max_attempts must be positive".into()));
        }
        if self.defaults.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid("defaults.backoff_multiplier must be >= 1".into()));
        }
        if self.defaults.timeout_seconds == 0 {
            return Err(ConfigError::Invalid("defaults.timeout_seconds must be positive".into()));
        }
        if self.storage.event_buffer == 0 {
            return Err(ConfigError::Invalid("storage.event_buffer must be positive".into()));
        }
        if self.retry.base_delay_seconds == 0 {
            return Err(ConfigError::Invalid("retry.base_delay_seconds must be positive".into()));
        }
        if self.retry.min_delay_seconds == 0 {
            return Err(ConfigError::Invalid("retry.min_delay_seconds must be positive".into()));
        }
        if self.retry.min_delay_seconds > self.retry.max_delay_seconds {
            return Err(ConfigError::Invalid(
                "retry.min_delay_seconds must not exceed retry.max_delay_seconds".into(),
            ));
        }
        Ok(())
    }
}
