//! Batch partitioning by settlement asset

use crate::config::ContractBook;
use crate::error::ConfigError;
use crate::ledger::PriceEntry;
use crate::types::{ContractRef, Observation, SettlementAsset, UnixSeconds};

/// One ledger transaction's worth of observations for a single contract
#[derive(Debug, Clone, PartialEq)]
pub struct PriceBatch {
    pub settlement_asset: SettlementAsset,
    pub contract: ContractRef,
    /// Window start stamped on every entry
    pub timestamp: UnixSeconds,
    pub observations: Vec<Observation>,
}

impl PriceBatch {
    /// Invocation form of the batch, `asset` is the buy side of each pair
    pub fn entries(&self) -> Vec<PriceEntry> {
        self.observations
            .iter()
            .map(|obs| PriceEntry {
                source: obs.source,
                asset_type: obs.asset_type,
                asset: obs.buy_asset.clone(),
                price: obs.price,
                timestamp: self.timestamp,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// Split the eligible sequence into per-asset batches of at most `max_batch_size`.
///
/// Assets appear in order of first occurrence and each batch keeps the input order.
/// Fails before producing anything if an asset is unsupported or has no contract.
pub fn partition(
    eligible: &[Observation],
    max_batch_size: usize,
    window_start: UnixSeconds,
    contracts: &ContractBook,
) -> Result<Vec<PriceBatch>, ConfigError> {
    if max_batch_size == 0 {
        return Err(ConfigError::InvalidBatchSize);
    }

    let mut groups: Vec<(SettlementAsset, ContractRef, Vec<Observation>)> = Vec::new();
    for obs in eligible {
        let (asset, contract) = contracts.resolve(&obs.sell_asset)?;
        match groups.iter_mut().find(|(a, _, _)| *a == asset) {
            Some((_, _, members)) => members.push(obs.clone()),
            None => groups.push((asset, contract, vec![obs.clone()])),
        }
    }

    let batches = groups
        .into_iter()
        .flat_map(|(asset, contract, members)| {
            members
                .chunks(max_batch_size)
                .map(|chunk| PriceBatch {
                    settlement_asset: asset,
                    contract: contract.clone(),
                    timestamp: window_start,
                    observations: chunk.to_vec(),
                })
                .collect::<Vec<_>>()
        })
        .collect();

    Ok(batches)
}
