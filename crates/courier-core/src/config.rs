//! Worker configuration.
//!
//! Loaded from TOML. Every key has a default, so a file containing only
//! `account_id` is a valid configuration. Durations are whole seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::{AccountId, ExhaustedPolicy, RetryPolicy, WorkerId};

/// Allowed range for `batch_size`.
pub const BATCH_SIZE_RANGE: std::ops::RangeInclusive<usize> = 5..=50;

/// Upper bound for `lease_ttl_secs` (one day).
pub const MAX_LEASE_TTL_SECS: u64 = 86_400;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// Account credited on successful delivery. A worker will not start without it.
    #[serde(default)]
    pub account_id: Option<AccountId>,

    /// Fixed worker identity; generated at startup when absent.
    #[serde(default)]
    pub worker_id: Option<WorkerId>,

    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Candidates fetched per poll cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// `sending` tasks inspected per cycle for expired leases.
    #[serde(default = "default_expiry_scan_window")]
    pub expiry_scan_window: usize,

    #[serde(default = "default_max_leases_per_cycle")]
    pub max_leases_per_cycle: usize,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Store watch is re-attached this often even when healthy.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    #[serde(default = "default_store_retry_delay_secs")]
    pub store_retry_delay_secs: u64,

    #[serde(default = "default_max_transaction_attempts")]
    pub max_transaction_attempts: u32,

    /// Balance credited per delivered task.
    #[serde(default = "default_credit_amount")]
    pub credit_amount: f64,

    /// Characters per transport unit; longer payloads go out as multipart.
    #[serde(default = "default_segment_length")]
    pub segment_length: usize,

    #[serde(default)]
    pub exhausted_at_lease: ExhaustedPolicy,
}

fn default_lease_ttl_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    crate::domain::MAX_RETRIES
}

fn default_batch_size() -> usize {
    10
}

fn default_expiry_scan_window() -> usize {
    20
}

fn default_max_leases_per_cycle() -> usize {
    5
}

fn default_poll_interval_secs() -> u64 {
    900
}

fn default_keepalive_secs() -> u64 {
    300
}

fn default_store_retry_delay_secs() -> u64 {
    30
}

fn default_max_transaction_attempts() -> u32 {
    5
}

fn default_credit_amount() -> f64 {
    0.20
}

fn default_segment_length() -> usize {
    160
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            account_id: None,
            worker_id: None,
            lease_ttl_secs: default_lease_ttl_secs(),
            max_retries: default_max_retries(),
            batch_size: default_batch_size(),
            expiry_scan_window: default_expiry_scan_window(),
            max_leases_per_cycle: default_max_leases_per_cycle(),
            poll_interval_secs: default_poll_interval_secs(),
            keepalive_secs: default_keepalive_secs(),
            store_retry_delay_secs: default_store_retry_delay_secs(),
            max_transaction_attempts: default_max_transaction_attempts(),
            credit_amount: default_credit_amount(),
            segment_length: default_segment_length(),
            exhausted_at_lease: ExhaustedPolicy::default(),
        }
    }
}

impl WorkerConfig {
    /// Defaults bound to `account`.
    pub fn for_account(account: impl Into<String>) -> Self {
        Self {
            account_id: Some(AccountId::new(account)),
            ..Self::default()
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: WorkerConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(account) = &self.account_id
            && account.as_str().trim().is_empty()
        {
            return Err(ConfigError::invalid("account_id", "must not be blank"));
        }
        if self.lease_ttl_secs == 0 || self.lease_ttl_secs > MAX_LEASE_TTL_SECS {
            return Err(ConfigError::invalid(
                "lease_ttl_secs",
                format!("must be between 1 and {MAX_LEASE_TTL_SECS}"),
            ));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::invalid("max_retries", "must be positive"));
        }
        if !BATCH_SIZE_RANGE.contains(&self.batch_size) {
            return Err(ConfigError::invalid(
                "batch_size",
                format!(
                    "must be between {} and {}, got {}",
                    BATCH_SIZE_RANGE.start(),
                    BATCH_SIZE_RANGE.end(),
                    self.batch_size
                ),
            ));
        }
        if self.max_leases_per_cycle == 0 {
            return Err(ConfigError::invalid("max_leases_per_cycle", "must be positive"));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::invalid("poll_interval_secs", "must be positive"));
        }
        if self.keepalive_secs == 0 {
            return Err(ConfigError::invalid("keepalive_secs", "must be positive"));
        }
        if self.max_transaction_attempts == 0 {
            return Err(ConfigError::invalid(
                "max_transaction_attempts",
                "must be positive",
            ));
        }
        if !self.credit_amount.is_finite() || self.credit_amount < 0.0 {
            return Err(ConfigError::invalid(
                "credit_amount",
                "must be a non-negative number",
            ));
        }
        if self.segment_length == 0 {
            return Err(ConfigError::invalid("segment_length", "must be positive"));
        }
        Ok(())
    }

    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.lease_ttl_secs).unwrap_or(86_400))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn store_retry_delay(&self) -> Duration {
        Duration::from_secs(self.store_retry_delay_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.exhausted_at_lease)
    }
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<WorkerConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    WorkerConfig::from_toml_str(&raw)
}
