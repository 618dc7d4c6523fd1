//! Engine configuration, loaded from TOML with per-field defaults.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Longest bid lifetime accepted. Expiry instants must stay inside what a
/// record can store.
pub const MAX_BID_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub negotiation: NegotiationConfig,
    pub sweeper: SweeperConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Highest round number a bid may reach. Placement is round 1, so the
    /// default of 2 allows exactly one counter.
    pub max_negotiation_rounds: u32,
    pub bid_ttl_secs: u64,
    pub reset_expiry_on_counter: bool,
    pub max_message_len: usize,
    pub order_number_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: String,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            max_negotiation_rounds: 2,
            bid_ttl_secs: 7 * 24 * 60 * 60, // a week
            reset_expiry_on_counter: true,
            max_message_len: 500,
            order_number_prefix: "ORD".into(),
        }
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "bids.db".into(),
        }
    }
}

impl NegotiationConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_negotiation_rounds == 0 {
            return Err(ValidationError::Config(
                "max_negotiation_rounds must be at least 1".into(),
            ));
        }
        if self.bid_ttl_secs == 0 {
            return Err(ValidationError::Config("bid_ttl_secs must be non-zero".into()));
        }
        if self.bid_ttl_secs > MAX_BID_TTL_SECS {
            return Err(ValidationError::Config(format!(
                "bid_ttl_secs must be at most {MAX_BID_TTL_SECS}"
            )));
        }
        if self.order_number_prefix.trim().is_empty() {
            return Err(ValidationError::Config(
                "order_number_prefix must not be empty".into(),
            ));
        }
        Ok(())
    }
}

impl SweeperConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.interval_secs == 0 {
            return Err(ValidationError::Config("interval_secs must be non-zero".into()));
        }
        Ok(())
    }
}

impl Config {
    /// Parse a TOML document; missing sections and fields take their defaults.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(toml_str).context("malformed configuration")?;
        config.negotiation.validate()?;
        config.sweeper.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        Self::from_toml(&raw)
    }
}
