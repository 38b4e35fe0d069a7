//! Settlement asset to contract mapping

use std::collections::{BTreeMap, HashMap};

use crate::error::ConfigError;
use crate::types::{ContractRef, SettlementAsset};

/// Validated settlement asset -> contract lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractBook {
    contracts: HashMap<SettlementAsset, ContractRef>,
}

impl ContractBook {
    /// Build from raw config keys. Unknown asset names and empty ids are rejected.
    pub fn from_map(raw: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let mut contracts = HashMap::with_capacity(raw.len());
        for (asset, contract) in raw {
            let settlement = SettlementAsset::from_str(asset)
                .ok_or_else(|| ConfigError::UnknownSettlementAsset(asset.clone()))?;
            let contract = contract.trim();
            if contract.is_empty() {
                return Err(ConfigError::MissingContract(settlement));
            }
            contracts.insert(settlement, ContractRef::new(contract));
        }
        Ok(Self { contracts })
    }

    pub fn with(mut self, asset: SettlementAsset, contract: impl Into<String>) -> Self {
        self.contracts.insert(asset, ContractRef::new(contract));
        self
    }

    pub fn contract_for(&self, asset: SettlementAsset) -> Option<&ContractRef> {
        self.contracts.get(&asset)
    }

    /// Resolve an observation's `sell_asset` to its settlement asset and contract
    pub fn resolve(&self, sell_asset: &str) -> Result<(SettlementAsset, ContractRef), ConfigError> {
        let asset = SettlementAsset::from_str(sell_asset)
            .ok_or_else(|| ConfigError::UnknownSettlementAsset(sell_asset.to_string()))?;
        let contract = self
            .contract_for(asset)
            .cloned()
            .ok_or(ConfigError::MissingContract(asset))?;
        Ok((asset, contract))
    }
}
