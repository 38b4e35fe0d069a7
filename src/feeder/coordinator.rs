//! Submission coordinator
//!
//! Drives batches through the ledger one at a time. Every attempt leaves a row in
//! the submission log before its observations are marked, so an interrupted run
//! never marks prices the log does not account for. When a lease length is set
//! the run lease is renewed before each batch and the run stops once it is lost.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::partition::PriceBatch;
use crate::clock::Clock;
use crate::error::{FeederError, FeederResult};
use crate::ledger::{LedgerClient, LedgerOutcome};
use crate::store::PriceStore;
use crate::types::{NewLogEntry, OutcomeKind};

/// Tally of one coordinator pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Rows flagged as submitted in the store
    pub marked: usize,
    /// Batches never sent because the signer ran out of funds
    pub not_attempted: usize,
    pub blocked: bool,
}

pub struct SubmissionCoordinator<L: LedgerClient + ?Sized> {
    store: PriceStore,
    ledger: Arc<L>,
    clock: Arc<dyn Clock>,
    lease_ttl_secs: Option<i64>,
}

impl<L: LedgerClient + ?Sized> SubmissionCoordinator<L> {
    pub fn new(store: PriceStore, ledger: Arc<L>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            ledger,
            clock,
            lease_ttl_secs: None,
        }
    }

    /// Renew the run lease held under the run id before every batch
    pub fn with_lease(mut self, ttl_secs: i64) -> Self {
        self.lease_ttl_secs = Some(ttl_secs);
        self
    }

    fn renew_lease(&self, run_id: &str, batch: usize) -> FeederResult<()> {
        let Some(ttl_secs) = self.lease_ttl_secs else {
            return Ok(());
        };
        let now = self.clock.now();
        if self.store.renew_run_lock(run_id, now, ttl_secs)? {
            debug!(run_id, batch, expires_at = now.saturating_add(ttl_secs), "Run lock renewed");
            return Ok(());
        }
        error!(run_id, batch, "Run lock lost, stopping before the next batch");
        Err(FeederError::LeaseLost {
            holder: run_id.to_string(),
        })
    }

    /// Submit `batches` strictly in order. Stops early on insufficient balance, or
    /// with [`FeederError::LeaseLost`] when another pass took the lease over.
    pub async fn submit_all(
        &self,
        run_id: &str,
        batches: &[PriceBatch],
    ) -> FeederResult<SubmissionReport> {
        let mut report = SubmissionReport::default();

        for (index, batch) in batches.iter().enumerate() {
            self.renew_lease(run_id, index)?;
            let entries = batch.entries();
            let command = describe_command(batch)?;

            let outcome = match self
                .ledger
                .submit_price_batch(&batch.contract, &entries)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(
                        run_id,
                        batch = index,
                        asset = %batch.settlement_asset,
                        ledger = self.ledger.name(),
                        error = %e,
                        "Ledger call failed"
                    );
                    LedgerOutcome::failure(e.to_string())
                }
            };
            report.attempted += 1;

            self.store.append_log(&NewLogEntry {
                run_id: run_id.to_string(),
                settlement_asset: Some(batch.settlement_asset),
                command,
                output: outcome.raw_response.clone(),
                outcome: outcome.kind,
                entries: batch.len(),
                window_start: batch.timestamp,
                created_at: self.clock.now(),
            })?;

            match outcome.kind {
                OutcomeKind::Success => {
                    let marked = self.store.mark_submitted(&batch.observations)?;
                    report.succeeded += 1;
                    report.marked += marked;
                    info!(
                        run_id,
                        batch = index,
                        asset = %batch.settlement_asset,
                        contract = %batch.contract,
                        entries = batch.len(),
                        marked,
                        "Batch submitted"
                    );
                }
                OutcomeKind::Failure => {
                    report.failed += 1;
                    warn!(
                        run_id,
                        batch = index,
                        asset = %batch.settlement_asset,
                        entries = batch.len(),
                        "Batch failed, continuing"
                    );
                }
                OutcomeKind::InsufficientBalance => {
                    report.failed += 1;
                    report.blocked = true;
                    report.not_attempted = batches.len() - index - 1;
                    error!(
                        run_id,
                        batch = index,
                        asset = %batch.settlement_asset,
                        skipped = report.not_attempted,
                        "Insufficient balance, stopping run"
                    );
                    break;
                }
            }
        }

        Ok(report)
    }
}

/// Audit form of an invocation: target, entry count, payload digest and the
/// base64 JSON payload itself.
pub fn describe_command(batch: &PriceBatch) -> FeederResult<String> {
    let payload = serde_json::to_vec(&batch.entries())?;
    let digest = hex::encode(Sha256::digest(&payload));
    Ok(format!(
        "add_prices contract={} asset={} entries={} sha256={} payload={}",
        batch.contract,
        batch.settlement_asset,
        batch.len(),
        digest,
        STANDARD.encode(&payload)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::LedgerError;
    use crate::ledger::{MockLedgerClient, PriceEntry};
    use crate::store::tests::xlm_obs;
    use crate::types::{ContractRef, Observation, SettlementAsset};
    use mockall::predicate::always;
    use rust_decimal_macros::dec;

    fn seeded_store(count: usize) -> (PriceStore, Vec<Observation>) {
        let store = PriceStore::open_in_memory().unwrap();
        let mut rows = Vec::new();
        for i in 0..count {
            let id = store
                .insert_observation(&xlm_obs(i as u32, "USD", dec!(0.12), 1_000))
                .unwrap();
            rows.push(store.observation(id).unwrap().unwrap());
        }
        (store, rows)
    }

    fn batch(asset: SettlementAsset, contract: &str, observations: Vec<Observation>) -> PriceBatch {
        PriceBatch {
            settlement_asset: asset,
            contract: ContractRef::new(contract),
            timestamp: 1_800,
            observations,
        }
    }

    fn coordinator(store: &PriceStore, ledger: MockLedgerClient) -> SubmissionCoordinator<MockLedgerClient> {
        SubmissionCoordinator::new(
            store.clone(),
            Arc::new(ledger),
            Arc::new(FixedClock::new(2_000)),
        )
    }

    #[tokio::test]
    async fn success_logs_then_marks() {
        let (store, rows) = seeded_store(2);
        let mut ledger = MockLedgerClient::new();
        ledger.expect_name().return_const("mock");
        ledger
            .expect_submit_price_batch()
            .withf(|contract: &ContractRef, entries: &[PriceEntry]| {
                contract.as_str() == "CXLM" && entries.len() == 2
            })
            .times(1)
            .returning(|_, _| Ok(LedgerOutcome::success("tx ok")));

        let report = coordinator(&store, ledger)
            .submit_all("run-1", &[batch(SettlementAsset::XLM, "CXLM", rows)])
            .await
            .unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.marked, 2);
        assert!(!report.blocked);
        assert!(store.pending_observations().unwrap().is_empty());

        let log = store.recent_log(10).unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].success);
        assert_eq!(log[0].created_at, 2_000);
        assert_eq!(log[0].window_start, 1_800);
        assert_eq!(log[0].output, "tx ok");
        assert!(log[0].command.starts_with("add_prices contract=CXLM asset=XLM entries=2"));
    }

    #[tokio::test]
    async fn ledger_error_is_recorded_and_run_continues() {
        let (store, rows) = seeded_store(2);
        let first = vec![rows[0].clone()];
        let second = vec![rows[1].clone()];

        let mut ledger = MockLedgerClient::new();
        ledger.expect_name().return_const("mock");
        let mut seq = mockall::Sequence::new();
        ledger
            .expect_submit_price_batch()
            .with(always(), always())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(LedgerError::Transport("connection reset".to_string())));
        ledger
            .expect_submit_price_batch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(LedgerOutcome::success("tx ok")));

        let report = coordinator(&store, ledger)
            .submit_all(
                "run-2",
                &[
                    batch(SettlementAsset::XLM, "CXLM", first),
                    batch(SettlementAsset::XLM, "CXLM", second),
                ],
            )
            .await
            .unwrap();

        assert_eq!(report.attempted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);

        let pending = store.pending_observations().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, rows[0].id);

        let log = store.log_since(0).unwrap();
        assert_eq!(log.len(), 2);
        assert!(!log[0].success);
        assert!(log[0].output.contains("connection reset"));
        assert!(log[1].success);
    }

    #[tokio::test]
    async fn insufficient_balance_stops_remaining_batches() {
        let (store, rows) = seeded_store(3);
        let batches: Vec<PriceBatch> = rows
            .into_iter()
            .map(|row| batch(SettlementAsset::XLM, "CXLM", vec![row]))
            .collect();

        let mut ledger = MockLedgerClient::new();
        ledger.expect_name().return_const("mock");
        ledger
            .expect_submit_price_batch()
            .times(1)
            .returning(|_, _| Ok(LedgerOutcome::insufficient_balance("txINSUFFICIENT_BALANCE")));

        let report = coordinator(&store, ledger)
            .submit_all("run-3", &batches)
            .await
            .unwrap();

        assert!(report.blocked);
        assert_eq!(report.attempted, 1);
        assert_eq!(report.not_attempted, 2);
        assert_eq!(store.pending_observations().unwrap().len(), 3);

        let log = store.recent_log(10).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].outcome, "insufficient_balance");
    }

    #[tokio::test]
    async fn lease_is_renewed_before_each_batch() {
        let (store, rows) = seeded_store(3);
        let batches: Vec<PriceBatch> = rows
            .into_iter()
            .map(|row| batch(SettlementAsset::XLM, "CXLM", vec![row]))
            .collect();
        let clock = Arc::new(FixedClock::new(2_000));
        assert!(store.try_acquire_run_lock("run-4", 2_000, 600).unwrap());

        let mut ledger = MockLedgerClient::new();
        ledger.expect_name().return_const("mock");
        let slow_clock = clock.clone();
        ledger
            .expect_submit_price_batch()
            .times(3)
            .returning(move |_, _| {
                slow_clock.advance(500);
                Ok(LedgerOutcome::success("tx ok"))
            });

        let report = SubmissionCoordinator::new(store.clone(), Arc::new(ledger), clock.clone())
            .with_lease(600)
            .submit_all("run-4", &batches)
            .await
            .unwrap();

        assert_eq!(report.succeeded, 3);
        // last renewal at 3_000 keeps the lease until 3_600
        assert_eq!(clock.now(), 3_500);
        assert!(!store.try_acquire_run_lock("other", 3_500, 600).unwrap());
        assert!(store.release_run_lock("run-4").unwrap());
    }

    #[tokio::test]
    async fn lost_lease_stops_before_the_next_batch() {
        let (store, rows) = seeded_store(2);
        let batches: Vec<PriceBatch> = rows
            .into_iter()
            .map(|row| batch(SettlementAsset::XLM, "CXLM", vec![row]))
            .collect();
        assert!(store.try_acquire_run_lock("run-5", 2_000, 600).unwrap());

        let mut ledger = MockLedgerClient::new();
        ledger.expect_name().return_const("mock");
        let intruder = store.clone();
        ledger
            .expect_submit_price_batch()
            .times(1)
            .returning(move |_, _| {
                assert!(intruder.try_acquire_run_lock("other", 9_000, 600).unwrap());
                Ok(LedgerOutcome::success("tx ok"))
            });

        let err = coordinator(&store, ledger)
            .with_lease(600)
            .submit_all("run-5", &batches)
            .await
            .unwrap_err();

        assert!(matches!(err, FeederError::LeaseLost { ref holder } if holder == "run-5"));
        assert_eq!(store.recent_log(10).unwrap().len(), 1);
        assert_eq!(store.pending_observations().unwrap().len(), 1);
    }

    #[test]
    fn command_embeds_digest_and_payload() {
        let obs = Observation {
            id: 1,
            source: 0,
            symbol: "XLMUSD".to_string(),
            sell_asset: "XLM".to_string(),
            buy_asset: "USD".to_string(),
            price: dec!(0.13),
            status: Default::default(),
            asset_type: crate::types::AssetType::Other,
            updated_at: 1_100,
            added_to_blockchain: false,
        };
        let b = batch(SettlementAsset::XLM, "CXLM", vec![obs]);
        let command = describe_command(&b).unwrap();

        let payload = command.rsplit("payload=").next().unwrap();
        let decoded = STANDARD.decode(payload).unwrap();
        let entries: Vec<PriceEntry> = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(entries, b.entries());

        let digest = hex::encode(Sha256::digest(&decoded));
        assert!(command.contains(&format!("sha256={}", digest)));
    }
}
