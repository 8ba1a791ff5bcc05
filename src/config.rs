//! Engine configuration
//!
//! The engine accepts a single configuration record. Unknown keys are rejected
//! at parse time so that typos never silently fall back to defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::storage::Bucket;

/// Size of the P2PKH change output added when funding leaves change
pub const ESTIMATED_CHANGE_OUTPUT_SIZE: u64 = 34;

/// Fee rate expressed as `sats` per `per_bytes` bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeeRate {
    pub sats: u64,
    pub per_bytes: u64,
}

impl FeeRate {
    pub fn new(sats: u64, per_bytes: u64) -> Self {
        Self { sats, per_bytes }
    }

    /// Fee for a transaction of `size` bytes, rounding partial units up
    pub fn fee_for_size(&self, size: u64) -> u64 {
        if self.per_bytes == 0 {
            return 0;
        }
        size.div_ceil(self.per_bytes).saturating_mul(self.sats)
    }
}

impl Default for FeeRate {
    fn default() -> Self {
        Self {
            sats: 1,
            per_bytes: 1000,
        }
    }
}

fn default_paymail_cache_ttl() -> u64 {
    120
}

fn default_paymail_http_timeout() -> u64 {
    10
}

fn default_broadcaster_timeout() -> u64 {
    15
}

fn default_forbidden_bucket() -> String {
    Bucket::Data.as_str().to_string()
}

/// Configuration record for the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub fee_rate: FeeRate,
    #[serde(default = "default_paymail_cache_ttl")]
    pub paymail_cache_ttl_seconds: u64,
    #[serde(default = "default_paymail_http_timeout")]
    pub paymail_http_timeout_seconds: u64,
    pub broadcaster_endpoint: String,
    #[serde(default = "default_broadcaster_timeout")]
    pub broadcaster_timeout_seconds: u64,
    #[serde(default)]
    pub broadcaster_token: Option<String>,
    #[serde(default)]
    pub broadcaster_callback_url: Option<String>,
    #[serde(default = "default_forbidden_bucket")]
    pub forbidden_bucket: String,
    /// SQLite file path, in-memory database when absent
    #[serde(default)]
    pub database_path: Option<String>,
}

impl EngineConfig {
    /// Create a config with defaults for everything except the broadcaster endpoint
    pub fn new(broadcaster_endpoint: impl Into<String>) -> Self {
        Self {
            fee_rate: FeeRate::default(),
            paymail_cache_ttl_seconds: default_paymail_cache_ttl(),
            paymail_http_timeout_seconds: default_paymail_http_timeout(),
            broadcaster_endpoint: broadcaster_endpoint.into(),
            broadcaster_timeout_seconds: default_broadcaster_timeout(),
            broadcaster_token: None,
            broadcaster_callback_url: None,
            forbidden_bucket: default_forbidden_bucket(),
            database_path: None,
        }
    }

    /// Parse and validate a JSON config document
    pub fn from_json_str(json: &str) -> WalletResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| WalletError::InvalidConfig(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the fee rate
    pub fn with_fee_rate(mut self, fee_rate: FeeRate) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    /// Set the paymail capability cache TTL
    pub fn with_paymail_cache_ttl(mut self, seconds: u64) -> Self {
        self.paymail_cache_ttl_seconds = seconds;
        self
    }

    /// Set the SQLite database path
    pub fn with_database_path(mut self, path: impl Into<String>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Set the broadcaster bearer token
    pub fn with_broadcaster_token(mut self, token: impl Into<String>) -> Self {
        self.broadcaster_token = Some(token.into());
        self
    }

    pub fn validate(&self) -> WalletResult<()> {
        if self.fee_rate.per_bytes == 0 {
            return Err(WalletError::InvalidConfig(
                "fee_rate.per_bytes must be greater than zero".to_string(),
            ));
        }
        if self.broadcaster_endpoint.trim().is_empty() {
            return Err(WalletError::InvalidConfig(
                "broadcaster_endpoint is required".to_string(),
            ));
        }
        if self.forbidden_bucket != Bucket::Data.as_str() {
            return Err(WalletError::InvalidConfig(format!(
                "forbidden_bucket must be \"{}\", got \"{}\"",
                Bucket::Data.as_str(),
                self.forbidden_bucket
            )));
        }
        Ok(())
    }

    pub fn paymail_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.paymail_cache_ttl_seconds)
    }

    pub fn paymail_http_timeout(&self) -> Duration {
        Duration::from_secs(self.paymail_http_timeout_seconds)
    }

    pub fn broadcaster_timeout(&self) -> Duration {
        Duration::from_secs(self.broadcaster_timeout_seconds)
    }
}
