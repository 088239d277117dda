//! Shop configuration, loaded from JSON.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::classifier::{DEFAULT_RETRYABLE_CODES, ErrorClassifier};
use super::purchase::DEFAULT_MAX_RETRIES;
use super::retry::RetryPolicy;
use crate::impls::StoreConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShopConfig {
    /// Retry budget of optimistic purchases.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay at the start of every purchase attempt.
    #[serde(default = "default_think_time_ms")]
    pub think_time_ms: u64,

    /// 0 retries immediately.
    #[serde(default)]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Row lock wait limit of pessimistic transactions. Unset waits forever.
    #[serde(default)]
    pub lock_wait_timeout_ms: Option<u64>,

    /// Store error numbers an optimistic call retries on.
    #[serde(default = "default_retryable_codes")]
    pub retryable_codes: Vec<u16>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_think_time_ms() -> u64 {
    1000
}

fn default_retry_multiplier() -> f64 {
    2.0
}

fn default_retry_max_delay_ms() -> u64 {
    5000
}

fn default_retryable_codes() -> Vec<u16> {
    DEFAULT_RETRYABLE_CODES.iter().map(|code| code.number()).collect()
}

impl Default for ShopConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            think_time_ms: default_think_time_ms(),
            retry_base_delay_ms: 0,
            retry_multiplier: default_retry_multiplier(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            lock_wait_timeout_ms: None,
            retryable_codes: default_retryable_codes(),
        }
    }
}

impl ShopConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// An empty `retryable_codes` is accepted and disables retries.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.retry_multiplier.is_finite() || self.retry_multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry_multiplier must be a finite number >= 1.0, got {}",
                self.retry_multiplier
            )));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry_base_delay_ms ({}) exceeds retry_max_delay_ms ({})",
                self.retry_base_delay_ms, self.retry_max_delay_ms
            )));
        }
        Ok(())
    }

    pub fn think_time(&self) -> Duration {
        Duration::from_millis(self.think_time_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            Duration::from_millis(self.retry_base_delay_ms),
            self.retry_multiplier,
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }

    pub fn classifier(&self) -> ErrorClassifier {
        ErrorClassifier::new(self.retryable_codes.iter().copied())
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            lock_wait_timeout: self.lock_wait_timeout_ms.map(Duration::from_millis),
        }
    }
}
