//! Pool configuration, read from `<root>/pool.toml`.
//!
//! Every section is optional; a missing file yields [`PoolConfig::default`].

use crate::core::error::PoolError;
use crate::core::schemas;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Generated names append 16 characters; provider identity names cap at 30.
pub const MAX_ACCOUNT_PREFIX_LEN: usize = 14;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pub admission: AdmissionConfig,
    pub readiness: ReadinessConfig,
    pub provisioning: ProvisioningConfig,
    pub refresh: RefreshConfig,
    pub project: ProjectConfig,
    pub index: IndexConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Headroom required beyond the write size before an account qualifies.
    pub safety_buffer_bytes: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            safety_buffer_bytes: GIB,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay between every attempt.
    Fixed,
    /// Delay grows by the base delay each attempt.
    Linear,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReadinessConfig {
    pub max_attempts: u32,
    pub delay_secs: u64,
    pub backoff: Backoff,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            delay_secs: 5,
            backoff: Backoff::Fixed,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// One account at a time; the first failure aborts the rest of the batch.
    Sequential,
    /// A bounded worker pool drains the batch; failures are collected.
    Pooled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProvisioningConfig {
    pub batch_policy: BatchPolicy,
    pub workers: usize,
    pub account_prefix: String,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            batch_policy: BatchPolicy::Pooled,
            workers: 4,
            account_prefix: "sa".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RefreshConfig {
    pub workers: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProjectConfig {
    pub required_apis: Vec<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            required_apis: vec![
                "iam.googleapis.com".to_string(),
                "drive.googleapis.com".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    pub page_size: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { page_size: 500 }
    }
}

impl ReadinessConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

impl PoolConfig {
    pub fn from_toml(content: &str) -> Result<Self, PoolError> {
        let config: PoolConfig =
            toml::from_str(content).map_err(|e| PoolError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.readiness.max_attempts == 0 {
            return Err(PoolError::Config(
                "readiness.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.provisioning.workers == 0 || self.refresh.workers == 0 {
            return Err(PoolError::Config(
                "worker counts must be at least 1".to_string(),
            ));
        }
        if self.index.page_size == 0 {
            return Err(PoolError::Config("index.page_size must be at least 1".to_string()));
        }
        let prefix = &self.provisioning.account_prefix;
        if prefix.is_empty()
            || prefix.len() > MAX_ACCOUNT_PREFIX_LEN
            || !prefix.starts_with(|c: char| c.is_ascii_lowercase())
            || !prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(PoolError::Config(format!(
                "provisioning.account_prefix '{}' must be 1-{} lowercase alphanumeric characters starting with a letter",
                prefix, MAX_ACCOUNT_PREFIX_LEN
            )));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, PoolError> {
        toml::to_string_pretty(self).map_err(|e| PoolError::Config(e.to_string()))
    }
}

/// Load the pool config from `<root>/pool.toml`. No file means defaults.
pub fn load_config(root: &Path) -> Result<PoolConfig, PoolError> {
    let config_path = root.join(schemas::CONFIG_FILE_NAME);
    if !config_path.exists() {
        return Ok(PoolConfig::default());
    }
    let content = fs::read_to_string(&config_path)?;
    PoolConfig::from_toml(&content)
}
