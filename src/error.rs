//! Error taxonomy for the feeder
//!
//! Configuration problems abort a run before any submission, store problems are
//! runtime failures, and ledger problems are recorded per batch by the coordinator.

use thiserror::Error;

use crate::types::SettlementAsset;

/// Fatal configuration problems. Never retried automatically.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("resolution must be a positive number of seconds, got {0}")]
    InvalidResolution(i64),
    #[error("max batch size must be at least 1")]
    InvalidBatchSize,
    #[error("lock ttl must be a positive number of seconds, got {0}")]
    InvalidLockTtl(i64),
    #[error("unsupported settlement asset '{0}'")]
    UnknownSettlementAsset(String),
    #[error("no oracle contract configured for settlement asset {0}")]
    MissingContract(SettlementAsset),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv export failed: {0}")]
    Csv(#[from] csv::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised while talking to the ledger. The coordinator records these as failed attempts.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger transport error: {0}")]
    Transport(String),
    #[error("invalid price entry: {0}")]
    InvalidEntry(String),
    #[error("ledger client setup failed: {0}")]
    Setup(String),
}

impl From<reqwest::Error> for LedgerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LedgerError::Transport(format!("request timed out: {}", e))
        } else {
            LedgerError::Transport(e.to_string())
        }
    }
}

/// Errors that end a reconciliation pass
#[derive(Debug, Error)]
pub enum FeederError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("run lock of {holder} was taken over mid-run")]
    LeaseLost { holder: String },
}

pub type FeederResult<T> = Result<T, FeederError>;

/// Process exit codes understood by the scheduler
pub mod exit_code {
    pub const OK: u8 = 0;
    pub const FAILURE: u8 = 1;
    pub const BLOCKED: u8 = 2;
    pub const CONFIG: u8 = 3;
}

impl FeederError {
    pub fn exit_code(&self) -> u8 {
        match self {
            FeederError::Config(_) => exit_code::CONFIG,
            FeederError::Store(_) | FeederError::Encode(_) | FeederError::LeaseLost { .. } => {
                exit_code::FAILURE
            }
        }
    }
}

impl From<rusqlite::Error> for FeederError {
    fn from(e: rusqlite::Error) -> Self {
        FeederError::Store(StoreError::Sqlite(e))
    }
}
