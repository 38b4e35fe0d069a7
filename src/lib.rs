//! Oracle Feeder Library
//!
//! Reconciles locally scraped price observations into on-chain oracle contracts,
//! one resolution window at a time.

pub mod clock;
pub mod config;
pub mod error;
pub mod feeder;
pub mod ledger;
pub mod store;
pub mod types;
pub mod window;

#[cfg(feature = "api")]
pub mod api;

pub use error::{ConfigError, FeederError, FeederResult, LedgerError, StoreError};
pub use feeder::{FeederSettings, Reconciler, RunOutcome, RunSummary, SkipReason};
pub use ledger::{HttpLedgerClient, LedgerClient, LedgerOutcome, PriceEntry};
pub use store::PriceStore;
