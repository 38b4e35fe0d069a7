//! Oracle feeder CLI
//!
//! Usage:
//!   oracle-feeder run                  one reconciliation pass (for cron/systemd timers)
//!   oracle-feeder pending              observations awaiting submission
//!   oracle-feeder log --limit 20       recent submission attempts
//!   oracle-feeder export-log --out log.csv [--since 1700000000]
//!   oracle-feeder ingest prices.json   load observations from a JSON array
//!   oracle-feeder config               print the resolved configuration
//!   oracle-feeder serve                ingest API (feature "api")
//!
//! Exit codes:
//!   0 - completed or skipped
//!   1 - runtime failure
//!   2 - blocked on insufficient balance
//!   3 - configuration error

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use oracle_feeder::clock::SystemClock;
use oracle_feeder::config::{AppConfig, LogFormat};
use oracle_feeder::error::exit_code;
use oracle_feeder::store::{export_log_csv, PriceStore};
use oracle_feeder::types::NewObservation;
use oracle_feeder::{
    ConfigError, FeederError, FeederSettings, HttpLedgerClient, Reconciler, RunOutcome,
};

#[derive(Parser, Debug)]
#[command(name = "oracle-feeder")]
#[command(about = "Feeds scraped prices into on-chain oracle contracts", version)]
struct Cli {
    /// Database path, overrides store.db_path
    #[arg(long, global = true, env = "ORACLE_FEEDER_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one reconciliation pass
    Run,
    /// List observations awaiting submission
    Pending,
    /// Show recent submission attempts
    Log {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Export the submission log as CSV
    ExportLog {
        #[arg(short, long)]
        out: PathBuf,
        /// Only entries created at or after this unix timestamp
        #[arg(long, default_value_t = 0)]
        since: i64,
    },
    /// Insert observations from a JSON file
    Ingest { file: PathBuf },
    /// Print the resolved configuration as YAML
    Config,
    /// Serve the ingest API
    #[cfg(feature = "api")]
    Serve {
        /// Listen address, overrides api.bind
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {:#}", e);
            return ExitCode::from(exit_code::CONFIG);
        }
    };
    if let Some(db) = &cli.db {
        config.store.db_path = db.display().to_string();
    }

    init_tracing(config.logging.format);

    match execute(cli.command, config).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            let code = classify_error(&e);
            let message = format!("{:#}", e);
            error!(error = %message, exit_code = code, "Command failed");
            ExitCode::from(code)
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "oracle_feeder=info".into());

    let (pretty, json) = match format {
        LogFormat::Pretty => (
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json)
        .init();
}

fn classify_error(e: &anyhow::Error) -> u8 {
    if let Some(feeder) = e.downcast_ref::<FeederError>() {
        return feeder.exit_code();
    }
    if e.downcast_ref::<ConfigError>().is_some() {
        return exit_code::CONFIG;
    }
    exit_code::FAILURE
}

async fn execute(command: Command, config: AppConfig) -> Result<u8> {
    match command {
        Command::Run => run_pass(&config).await,
        Command::Pending => {
            let store = PriceStore::open(&config.store.db_path)?;
            let pending = store.pending_observations()?;
            println!("{}", serde_json::to_string_pretty(&pending)?);
            Ok(exit_code::OK)
        }
        Command::Log { limit } => {
            let store = PriceStore::open(&config.store.db_path)?;
            let rows = store.recent_log(limit)?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
            Ok(exit_code::OK)
        }
        Command::ExportLog { out, since } => {
            let store = PriceStore::open(&config.store.db_path)?;
            let rows = store.log_since(since)?;
            let written = export_log_csv(&rows, &out)?;
            println!("{} rows written to {}", written, out.display());
            Ok(exit_code::OK)
        }
        Command::Ingest { file } => {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let observations: Vec<NewObservation> = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse {}", file.display()))?;
            for (index, obs) in observations.iter().enumerate() {
                obs.validate()
                    .with_context(|| format!("entry {} ({}) rejected", index, obs.symbol))?;
            }
            let store = PriceStore::open(&config.store.db_path)?;
            let ids = store.insert_observations(&observations)?;
            info!(count = ids.len(), file = %file.display(), "Observations ingested");
            Ok(exit_code::OK)
        }
        Command::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(exit_code::OK)
        }
        #[cfg(feature = "api")]
        Command::Serve { bind } => {
            let store = PriceStore::open(&config.store.db_path)?;
            let addr = bind.unwrap_or_else(|| config.api.bind.clone());
            oracle_feeder::api::serve(store, &addr).await?;
            Ok(exit_code::OK)
        }
    }
}

async fn run_pass(config: &AppConfig) -> Result<u8> {
    let settings = FeederSettings::from_config(config)?;
    info!(config = %config, "Starting reconciliation pass");

    let store = PriceStore::open(&config.store.db_path)?;
    let ledger = Arc::new(HttpLedgerClient::from_config(&config.ledger)?);
    let reconciler = Reconciler::new(store, ledger, settings, Arc::new(SystemClock));

    let outcome = reconciler.run_once().await?;
    match &outcome {
        RunOutcome::Skipped(reason) => info!(reason = %reason, "Pass skipped"),
        RunOutcome::Completed(summary) => info!(
            run_id = %summary.run_id,
            batches = summary.batches,
            succeeded = summary.report.succeeded,
            failed = summary.report.failed,
            "Pass completed"
        ),
        RunOutcome::Blocked(summary) => error!(
            run_id = %summary.run_id,
            not_attempted = summary.report.not_attempted,
            "Pass blocked on insufficient balance"
        ),
    }
    Ok(outcome.exit_code())
}
