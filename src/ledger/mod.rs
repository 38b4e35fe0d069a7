//! Ledger client boundary
//!
//! The feeder never builds or signs transactions itself. It hands a typed batch
//! to a [`LedgerClient`], which blocks until the chain confirms or the call fails.

mod http;

pub use http::HttpLedgerClient;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::types::{AssetType, ContractRef, OutcomeKind, UnixSeconds};

/// Fractional digits of the contract's fixed-point price
pub const PRICE_DECIMALS: u32 = 18;

/// One price as the oracle contract's `add_prices` expects it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub source: u32,
    pub asset_type: AssetType,
    pub asset: String,
    pub price: Decimal,
    pub timestamp: UnixSeconds,
}

impl PriceEntry {
    /// Price as an integer scaled by 10^18
    pub fn scaled_price(&self) -> Result<i128, LedgerError> {
        scale_price(self.price)
    }
}

/// Convert a decimal price to the contract's fixed-point integer.
pub fn scale_price(price: Decimal) -> Result<i128, LedgerError> {
    let price = price.normalize();
    let scale = price.scale();
    if scale > PRICE_DECIMALS {
        return Err(LedgerError::InvalidEntry(format!(
            "price {} has more than {} decimal places",
            price, PRICE_DECIMALS
        )));
    }
    10i128
        .checked_pow(PRICE_DECIMALS - scale)
        .and_then(|factor| price.mantissa().checked_mul(factor))
        .ok_or_else(|| LedgerError::InvalidEntry(format!("price {} is out of range", price)))
}

/// Classified reply of one submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerOutcome {
    pub kind: OutcomeKind,
    pub raw_response: String,
}

impl LedgerOutcome {
    pub fn success(raw: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Success,
            raw_response: raw.into(),
        }
    }

    pub fn failure(raw: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Failure,
            raw_response: raw.into(),
        }
    }

    pub fn insufficient_balance(raw: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::InsufficientBalance,
            raw_response: raw.into(),
        }
    }
}

/// Contract invocation client
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Client name for logging
    fn name(&self) -> &'static str;

    /// Submit one batch to the contract instance and wait for the outcome
    async fn submit_price_batch(
        &self,
        contract: &ContractRef,
        entries: &[PriceEntry],
    ) -> Result<LedgerOutcome, LedgerError>;
}
