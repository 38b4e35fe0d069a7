//! Reconciliation pass
//!
//! One call to [`Reconciler::run_once`] takes the run lease, checks whether the
//! current window was already served, selects and partitions pending
//! observations, and hands the batches to the [`SubmissionCoordinator`].

mod coordinator;
mod partition;
mod selection;

pub use coordinator::{describe_command, SubmissionCoordinator, SubmissionReport};
pub use partition::{partition, PriceBatch};
pub use selection::{select_eligible, window_already_served};

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{AppConfig, ContractBook};
use crate::error::{exit_code, ConfigError, FeederResult};
use crate::ledger::LedgerClient;
use crate::store::PriceStore;
use crate::types::UnixSeconds;
use crate::window::Resolution;

/// Validated knobs of a reconciliation pass
#[derive(Debug, Clone)]
pub struct FeederSettings {
    pub resolution: Resolution,
    pub max_batch_size: usize,
    pub lock_ttl_secs: i64,
    pub contracts: ContractBook,
}

impl FeederSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            resolution: config.resolution()?,
            max_batch_size: config.feeder.max_batch_size,
            lock_ttl_secs: config.lock_ttl_secs(),
            contracts: config.contract_book()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another pass holds a live lease
    LockHeld,
    /// A successful submission already landed in this window
    WindowAlreadyServed,
    /// No observation is eligible
    NothingToSubmit,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::LockHeld => write!(f, "run lock held"),
            SkipReason::WindowAlreadyServed => write!(f, "window already served"),
            SkipReason::NothingToSubmit => write!(f, "nothing to submit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: String,
    pub window_start: UnixSeconds,
    pub selected: usize,
    pub batches: usize,
    pub report: SubmissionReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Skipped(SkipReason),
    Completed(RunSummary),
    /// Stopped on insufficient balance
    Blocked(RunSummary),
}

impl RunOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Skipped(_) | RunOutcome::Completed(_) => exit_code::OK,
            RunOutcome::Blocked(_) => exit_code::BLOCKED,
        }
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            RunOutcome::Skipped(_) => None,
            RunOutcome::Completed(s) | RunOutcome::Blocked(s) => Some(s),
        }
    }
}

/// Reconciliation engine
pub struct Reconciler<L: LedgerClient + ?Sized> {
    store: PriceStore,
    settings: FeederSettings,
    clock: Arc<dyn Clock>,
    coordinator: SubmissionCoordinator<L>,
}

impl<L: LedgerClient + ?Sized> Reconciler<L> {
    pub fn new(
        store: PriceStore,
        ledger: Arc<L>,
        settings: FeederSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let coordinator = SubmissionCoordinator::new(store.clone(), ledger, clock.clone())
            .with_lease(settings.lock_ttl_secs);
        Self {
            store,
            settings,
            clock,
            coordinator,
        }
    }

    /// Run one pass. The lease is released on every path once taken.
    pub async fn run_once(&self) -> FeederResult<RunOutcome> {
        let run_id = Uuid::new_v4().to_string();
        let now = self.clock.now();

        if !self
            .store
            .try_acquire_run_lock(&run_id, now, self.settings.lock_ttl_secs)?
        {
            info!(run_id = %run_id, "Another reconciliation pass is running, skipping");
            return Ok(RunOutcome::Skipped(SkipReason::LockHeld));
        }

        let result = self.run_locked(&run_id, now).await;

        match self.store.release_run_lock(&run_id) {
            Ok(true) => debug!(run_id = %run_id, "Run lock released"),
            Ok(false) => warn!(run_id = %run_id, "Run lock was taken over before release"),
            Err(e) => warn!(run_id = %run_id, error = %e, "Failed to release run lock"),
        }

        result
    }

    async fn run_locked(&self, run_id: &str, now: UnixSeconds) -> FeederResult<RunOutcome> {
        let resolution = self.settings.resolution;
        let window_start = resolution.floor(now);

        let last_served = self.store.latest_served_window()?;
        if window_already_served(last_served, window_start) {
            info!(
                run_id,
                window_start,
                last_served = ?last_served,
                "Window already served, nothing to do"
            );
            return Ok(RunOutcome::Skipped(SkipReason::WindowAlreadyServed));
        }

        let pending = self.store.pending_observations()?;
        let candidates = pending.len();
        let eligible = select_eligible(pending, window_start, resolution);
        if eligible.is_empty() {
            info!(run_id, window_start, candidates, "No eligible observations");
            return Ok(RunOutcome::Skipped(SkipReason::NothingToSubmit));
        }

        let batches = partition(
            &eligible,
            self.settings.max_batch_size,
            window_start,
            &self.settings.contracts,
        )?;
        info!(
            run_id,
            window_start,
            resolution = %resolution,
            candidates,
            selected = eligible.len(),
            batches = batches.len(),
            "Submitting window"
        );

        let report = self.coordinator.submit_all(run_id, &batches).await?;
        let summary = RunSummary {
            run_id: run_id.to_string(),
            window_start,
            selected: eligible.len(),
            batches: batches.len(),
            report,
        };

        info!(
            run_id,
            succeeded = summary.report.succeeded,
            failed = summary.report.failed,
            marked = summary.report.marked,
            blocked = summary.report.blocked,
            "Reconciliation pass finished"
        );

        if summary.report.blocked {
            Ok(RunOutcome::Blocked(summary))
        } else {
            Ok(RunOutcome::Completed(summary))
        }
    }
}
