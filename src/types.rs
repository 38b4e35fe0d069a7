//! Core types used throughout the feeder
//!
//! Defines price observations, settlement assets and the run log record.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Unix timestamp in whole seconds
pub type UnixSeconds = i64;

/// Settlement assets with a deployed oracle contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementAsset {
    XLM,
    USD,
}

impl SettlementAsset {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementAsset::XLM => "XLM",
            SettlementAsset::USD => "USD",
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "XLM" => Some(SettlementAsset::XLM),
            "USD" => Some(SettlementAsset::USD),
            _ => None,
        }
    }
}

impl fmt::Display for SettlementAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the quoted asset lives on the ledger (needs an address) or is an opaque symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Stellar,
    Other,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Stellar => "stellar",
            AssetType::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "stellar" => Some(AssetType::Stellar),
            "other" => Some(AssetType::Other),
            _ => None,
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceStatus {
    Active,
    Inactive,
}

impl PriceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceStatus::Active => "active",
            PriceStatus::Inactive => "inactive",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(PriceStatus::Active),
            "inactive" => Some(PriceStatus::Inactive),
            _ => None,
        }
    }
}

impl Default for PriceStatus {
    fn default() -> Self {
        PriceStatus::Active
    }
}

/// Opaque handle of a deployed oracle contract instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractRef(String);

impl ContractRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContractRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical form of a price: trailing zeros stripped so equal values compare equal as text.
pub fn normalize_price(price: Decimal) -> Decimal {
    price.normalize()
}

/// One stored price sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    /// Row id, doubles as insertion order
    pub id: i64,
    pub source: u32,
    pub symbol: String,
    pub sell_asset: String,
    pub buy_asset: String,
    pub price: Decimal,
    pub status: PriceStatus,
    pub asset_type: AssetType,
    pub updated_at: UnixSeconds,
    pub added_to_blockchain: bool,
}

impl Observation {
    pub fn is_pending(&self) -> bool {
        self.status == PriceStatus::Active && !self.added_to_blockchain
    }
}

/// Producer-side observation shape accepted by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewObservation {
    pub source: u32,
    pub symbol: String,
    pub sell_asset: String,
    pub buy_asset: String,
    pub price: Decimal,
    #[serde(default)]
    pub status: PriceStatus,
    pub asset_type: AssetType,
    #[serde(default)]
    pub timeframe: Option<String>,
    #[serde(default)]
    pub bid: Option<Decimal>,
    #[serde(default)]
    pub offer: Option<Decimal>,
    /// Defaults to the insert time when omitted
    #[serde(default)]
    pub updated_at: Option<UnixSeconds>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObservationError {
    #[error("symbol must not be empty")]
    EmptySymbol,
    #[error("symbol '{symbol}' must begin with its sell asset '{sell_asset}'")]
    SymbolMismatch { symbol: String, sell_asset: String },
    #[error("unsupported settlement asset '{0}', must be one of: XLM, USD")]
    UnsupportedSettlementAsset(String),
    #[error("buy asset must not be empty")]
    EmptyBuyAsset,
}

impl NewObservation {
    /// Shape checks applied at the ingest boundary
    pub fn validate(&self) -> Result<(), ObservationError> {
        let symbol = self.symbol.trim();
        if symbol.is_empty() {
            return Err(ObservationError::EmptySymbol);
        }
        if self.buy_asset.trim().is_empty() {
            return Err(ObservationError::EmptyBuyAsset);
        }
        if SettlementAsset::from_str(&self.sell_asset).is_none() {
            return Err(ObservationError::UnsupportedSettlementAsset(
                self.sell_asset.clone(),
            ));
        }
        if !symbol.starts_with(self.sell_asset.trim()) {
            return Err(ObservationError::SymbolMismatch {
                symbol: self.symbol.clone(),
                sell_asset: self.sell_asset.clone(),
            });
        }
        Ok(())
    }
}

/// Classified result of one ledger submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Failure,
    InsufficientBalance,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::Failure => "failure",
            OutcomeKind::InsufficientBalance => "insufficient_balance",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(OutcomeKind::Success),
            "failure" => Some(OutcomeKind::Failure),
            "insufficient_balance" => Some(OutcomeKind::InsufficientBalance),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OutcomeKind::Success)
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit row to append to the submission log
#[derive(Debug, Clone, PartialEq)]
pub struct NewLogEntry {
    pub run_id: String,
    pub settlement_asset: Option<SettlementAsset>,
    pub command: String,
    pub output: String,
    pub outcome: OutcomeKind,
    pub entries: usize,
    /// Window the attempt was made for
    pub window_start: UnixSeconds,
    pub created_at: UnixSeconds,
}

/// Persisted submission attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub id: i64,
    pub run_id: String,
    pub settlement_asset: Option<String>,
    pub command: String,
    pub output: String,
    pub success: bool,
    pub outcome: String,
    pub entries: u32,
    pub window_start: UnixSeconds,
    pub created_at: UnixSeconds,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> NewObservation {
        NewObservation {
            source: 0,
            symbol: "XLMUSD".to_string(),
            sell_asset: "XLM".to_string(),
            buy_asset: "USD".to_string(),
            price: dec!(0.12),
            status: PriceStatus::Active,
            asset_type: AssetType::Other,
            timeframe: None,
            bid: None,
            offer: None,
            updated_at: None,
        }
    }

    #[test]
    fn normalized_prices_compare_equal_as_text() {
        assert_eq!(normalize_price(dec!(0.120)).to_string(), "0.12");
        assert_eq!(normalize_price(dec!(5.000)).to_string(), "5");
        assert_eq!(normalize_price(dec!(0.12)), normalize_price(dec!(0.1200)));
    }

    #[test]
    fn validate_accepts_well_formed_observation() {
        assert_eq!(sample().validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_unknown_settlement_asset() {
        let mut obs = sample();
        obs.sell_asset = "BTC".to_string();
        obs.symbol = "BTCUSD".to_string();
        assert_eq!(
            obs.validate(),
            Err(ObservationError::UnsupportedSettlementAsset("BTC".to_string()))
        );
    }

    #[test]
    fn validate_rejects_symbol_not_prefixed_by_sell_asset() {
        let mut obs = sample();
        obs.symbol = "USDXLM".to_string();
        assert!(matches!(
            obs.validate(),
            Err(ObservationError::SymbolMismatch { .. })
        ));
    }

    #[test]
    fn new_observation_deserializes_with_defaults() {
        let json = r#"{
            "source": 1,
            "symbol": "XLMEUR",
            "sell_asset": "XLM",
            "buy_asset": "EUR",
            "price": "0.1100",
            "asset_type": "other"
        }"#;
        let obs: NewObservation = serde_json::from_str(json).unwrap();
        assert_eq!(obs.status, PriceStatus::Active);
        assert_eq!(obs.price, dec!(0.11));
        assert_eq!(obs.updated_at, None);
    }

    #[test]
    fn outcome_kind_round_trips_through_text() {
        for kind in [
            OutcomeKind::Success,
            OutcomeKind::Failure,
            OutcomeKind::InsufficientBalance,
        ] {
            assert_eq!(OutcomeKind::from_str(kind.as_str()), Some(kind));
        }
    }
}
