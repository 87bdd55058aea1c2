//! Tower configuration with layered loading.
//!
//! Values resolve in this order (later overrides earlier):
//!
//! 1. **Compiled defaults** in the `Default` implementation
//! 2. **Config file**: TOML path handed to [`PisaConfig::load`]
//! 3. **Environment variables**: `PISA_*` overrides per field
//!
//! Configuration is validated at load time; a parameter that violates a
//! core invariant aborts startup rather than failing later mid-pipeline.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A constructor invariant was violated. Fatal at startup.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// All tunables of the watchtower core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PisaConfig {
    /// Maximum concurrent response transactions in the gas queue.
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: u32,

    /// Minimum relative gas-price increase (percent) the node demands to
    /// replace a pending transaction at the same nonce.
    #[serde(default = "default_replacement_rate_pct")]
    pub replacement_rate_pct: u32,

    /// Depth at which an observed event triggers the response. At least 1.
    #[serde(default = "default_confirmations_before_response")]
    pub confirmations_before_response: u32,

    /// Depth at which a responded appointment is evicted from the store.
    #[serde(default = "default_confirmations_before_removal")]
    pub confirmations_before_removal: u32,

    /// Blocks retained in the fork-aware cache.
    #[serde(default = "default_block_cache_depth")]
    pub block_cache_depth: u32,

    /// Wall-clock bound (milliseconds) on new-block arrival for the
    /// dedicated miner.
    #[serde(default = "default_new_block_timeout_ms")]
    pub new_block_timeout_ms: u64,

    /// Blocks the dedicated miner waits for an inclusion before bumping
    /// gas and retrying.
    #[serde(default = "default_wait_blocks_before_retrying")]
    pub wait_blocks_before_retrying: u32,

    /// Fixed gas limit stamped into every queued response transaction.
    #[serde(default = "default_response_gas_limit")]
    pub response_gas_limit: u64,

    /// Cap on the gas limit a customer may request for an appointment.
    #[serde(default = "default_max_appointment_gas_limit")]
    pub max_appointment_gas_limit: u64,

    /// Acceptance bounds on an appointment's challenge period, in blocks.
    #[serde(default = "default_min_challenge_period")]
    pub min_challenge_period: u64,
    #[serde(default = "default_max_challenge_period")]
    pub max_challenge_period: u64,
}

fn default_max_queue_depth() -> u32 {
    12
}

fn default_replacement_rate_pct() -> u32 {
    13
}

fn default_confirmations_before_response() -> u32 {
    2
}

fn default_confirmations_before_removal() -> u32 {
    10
}

fn default_block_cache_depth() -> u32 {
    100
}

fn default_new_block_timeout_ms() -> u64 {
    120_000
}

fn default_wait_blocks_before_retrying() -> u32 {
    20
}

fn default_response_gas_limit() -> u64 {
    400_000
}

fn default_max_appointment_gas_limit() -> u64 {
    6_000_000
}

fn default_min_challenge_period() -> u64 {
    100
}

fn default_max_challenge_period() -> u64 {
    60_000
}

impl Default for PisaConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: default_max_queue_depth(),
            replacement_rate_pct: default_replacement_rate_pct(),
            confirmations_before_response: default_confirmations_before_response(),
            confirmations_before_removal: default_confirmations_before_removal(),
            block_cache_depth: default_block_cache_depth(),
            new_block_timeout_ms: default_new_block_timeout_ms(),
            wait_blocks_before_retrying: default_wait_blocks_before_retrying(),
            response_gas_limit: default_response_gas_limit(),
            max_appointment_gas_limit: default_max_appointment_gas_limit(),
            min_challenge_period: default_min_challenge_period(),
            max_challenge_period: default_max_challenge_period(),
        }
    }
}

impl PisaConfig {
    /// Loads configuration from defaults, an optional TOML file, and
    /// `PISA_*` environment variables, then validates it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Load` on unreadable input and
    /// `ConfigError::Invalid` when a core invariant is violated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(Environment::with_prefix("PISA"));

        let loaded: Self = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Checks every constructor invariant the components rely on.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.confirmations_before_response == 0 {
            return Err(ConfigError::Invalid(
                "confirmations_before_response must be at least 1".to_string(),
            ));
        }
        if self.confirmations_before_response > self.confirmations_before_removal {
            return Err(ConfigError::Invalid(format!(
                "confirmations_before_response ({}) must not exceed confirmations_before_removal ({})",
                self.confirmations_before_response, self.confirmations_before_removal
            )));
        }
        if self.block_cache_depth < self.confirmations_before_removal {
            return Err(ConfigError::Invalid(format!(
                "block_cache_depth ({}) must cover confirmations_before_removal ({})",
                self.block_cache_depth, self.confirmations_before_removal
            )));
        }
        if self.max_queue_depth == 0 {
            return Err(ConfigError::Invalid("max_queue_depth must be non-zero".to_string()));
        }
        if self.replacement_rate_pct == 0 {
            return Err(ConfigError::Invalid(
                "replacement_rate_pct must be non-zero".to_string(),
            ));
        }
        if self.response_gas_limit == 0 {
            return Err(ConfigError::Invalid("response_gas_limit must be non-zero".to_string()));
        }
        if self.min_challenge_period > self.max_challenge_period {
            return Err(ConfigError::Invalid(format!(
                "min_challenge_period ({}) exceeds max_challenge_period ({})",
                self.min_challenge_period, self.max_challenge_period
            )));
        }
        Ok(())
    }
}
