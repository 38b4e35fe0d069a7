//! Configuration management for the feeder
//!
//! Loads from YAML files + environment variables via .env

mod types;

pub use types::*;

use anyhow::{Context, Result};
use config::{builder::DefaultState, Config, ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ConfigError;
use crate::types::SettlementAsset;
use crate::window::Resolution;

/// Environment variable prefix (ORACLE_FEEDER__FEEDER__RESOLUTION_SECS=300)
pub const ENV_PREFIX: &str = "ORACLE_FEEDER";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub feeder: FeederConfig,
    pub store: StoreConfig,
    pub ledger: LedgerConfig,
    pub logging: LoggingConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeederConfig {
    /// Window width in seconds
    pub resolution_secs: i64,
    /// Maximum entries per ledger transaction
    pub max_batch_size: usize,
    /// Run lease length in seconds, twice the resolution when unset
    #[serde(default)]
    pub lock_ttl_secs: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file shared with the scraping jobs
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Ledger gateway base URL
    pub endpoint: String,
    /// Per-submission timeout in seconds
    pub timeout_secs: u64,
    /// Public identity of the signing account
    #[serde(default)]
    pub signer: Option<String>,
    /// Settlement asset -> oracle contract id
    #[serde(default)]
    pub contracts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Listen address of the ingest API
    pub bind: String,
}

impl AppConfig {
    /// Builder preloaded with every default
    pub fn builder() -> Result<ConfigBuilder<DefaultState>> {
        let builder = Config::builder()
            // Feeder defaults
            .set_default("feeder.resolution_secs", 600)?
            .set_default("feeder.max_batch_size", 10)?
            // Store defaults
            .set_default("store.db_path", "./data/prices.sqlite3")?
            // Ledger defaults
            .set_default("ledger.endpoint", "http://127.0.0.1:8000")?
            .set_default("ledger.timeout_secs", 60)?
            // Logging / API defaults
            .set_default("logging.format", "pretty")?
            .set_default("api.bind", "127.0.0.1:8080")?;
        Ok(builder)
    }

    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::builder()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (ORACLE_FEEDER__*)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(app_config)
    }

    /// Check values the deserializer cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        Resolution::new(self.feeder.resolution_secs)?;
        if self.feeder.max_batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        let lock_ttl = self.lock_ttl_secs();
        if lock_ttl <= 0 {
            return Err(ConfigError::InvalidLockTtl(lock_ttl));
        }
        if self.ledger.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("ledger.endpoint is empty".to_string()));
        }
        ContractBook::from_map(&self.ledger.contracts)?;
        Ok(())
    }

    pub fn resolution(&self) -> Result<Resolution, ConfigError> {
        Resolution::new(self.feeder.resolution_secs)
    }

    /// Effective run lease length
    pub fn lock_ttl_secs(&self) -> i64 {
        self.feeder
            .lock_ttl_secs
            .unwrap_or_else(|| self.feeder.resolution_secs.saturating_mul(2))
    }

    pub fn contract_book(&self) -> Result<ContractBook, ConfigError> {
        ContractBook::from_map(&self.ledger.contracts)
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        let assets: Vec<&str> = self
            .ledger
            .contracts
            .keys()
            .filter_map(|k| SettlementAsset::from_str(k).map(|a| a.as_str()))
            .collect();
        format!(
            "resolution={}s max_batch={} lock_ttl={}s db={} ledger={} contracts={:?}",
            self.feeder.resolution_secs,
            self.feeder.max_batch_size,
            self.lock_ttl_secs(),
            self.store.db_path,
            self.ledger.endpoint,
            assets
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
