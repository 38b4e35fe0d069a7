//! SQLite observation store
//!
//! Holds three tables in one database file:
//! - `prices`: observations written by the scraping jobs, flagged once submitted
//! - `submission_log`: append-only audit trail of ledger attempts
//! - `run_lock`: single-row lease that keeps reconciliation passes from overlapping
//!
//! The connection is shared behind a mutex; every method holds it only for the
//! duration of its own statements.

mod export;
mod run_log;

pub use export::{export_log_csv, write_log_csv};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, Row};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::types::{
    normalize_price, AssetType, NewObservation, Observation, PriceStatus, UnixSeconds,
};

const SCHEMA_SQL: &str = r#"
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS prices (
    id                  INTEGER PRIMARY KEY,
    created_at          INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    updated_at          INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    timeframe           TEXT,
    status              TEXT NOT NULL DEFAULT 'active',
    source              INTEGER NOT NULL,
    asset_type          TEXT NOT NULL,
    symbol              TEXT NOT NULL,
    price               TEXT NOT NULL,
    bid                 TEXT NOT NULL,
    offer               TEXT NOT NULL,
    sell_asset          TEXT NOT NULL,
    buy_asset           TEXT NOT NULL,
    added_to_blockchain INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_prices_pending
    ON prices(added_to_blockchain, status, updated_at DESC);

CREATE INDEX IF NOT EXISTS idx_prices_key
    ON prices(source, symbol, updated_at DESC);

CREATE TABLE IF NOT EXISTS submission_log (
    id               INTEGER PRIMARY KEY,
    run_id           TEXT NOT NULL,
    settlement_asset TEXT,
    command          TEXT NOT NULL,
    output           TEXT NOT NULL,
    success          INTEGER NOT NULL,
    outcome          TEXT NOT NULL,
    entries          INTEGER NOT NULL DEFAULT 0,
    window_start     INTEGER NOT NULL,
    created_at       INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_submission_log_success
    ON submission_log(success, created_at DESC);

CREATE INDEX IF NOT EXISTS idx_submission_log_window
    ON submission_log(success, window_start DESC);

CREATE TABLE IF NOT EXISTS run_lock (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    holder      TEXT NOT NULL,
    acquired_at INTEGER NOT NULL,
    expires_at  INTEGER NOT NULL
);
"#;

const PRICE_COLUMNS: &str = "id, source, symbol, sell_asset, buy_asset, price, status, \
                             asset_type, updated_at, added_to_blockchain";

/// Shared handle to the feeder database
#[derive(Clone)]
pub struct PriceStore {
    conn: Arc<Mutex<Connection>>,
}

impl PriceStore {
    /// Open (or create) the database file and apply the schema
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;

        let journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            warn!(journal_mode = %journal_mode, "WAL mode not active");
        }

        let store = Self::init(conn)?;
        info!(db_path = %path.display(), "Price store opened");
        Ok(store)
    }

    /// Private in-memory database, used by tests and dry runs
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Producer-side insert. The price is stored in canonical form.
    pub fn insert_observation(&self, obs: &NewObservation) -> StoreResult<i64> {
        let conn = self.conn.lock();
        insert_row(&conn, obs)?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert several observations in one transaction
    pub fn insert_observations(&self, observations: &[NewObservation]) -> StoreResult<Vec<i64>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(observations.len());
        for obs in observations {
            insert_row(&tx, obs)?;
            ids.push(tx.last_insert_rowid());
        }
        tx.commit()?;
        debug!(count = ids.len(), "Inserted observations");
        Ok(ids)
    }

    /// Active observations not yet included in a confirmed submission,
    /// newest first with insertion order breaking ties.
    pub fn pending_observations(&self) -> StoreResult<Vec<Observation>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM prices
             WHERE status = 'active' AND added_to_blockchain = 0
             ORDER BY updated_at DESC, id ASC",
            PRICE_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], observation_from_row)?;
        collect_observations(rows)
    }

    /// Flag a submitted batch.
    ///
    /// Scoped per (source, symbol) to unsubmitted rows no newer than the submitted
    /// observation: rows a producer wrote after selection stay pending, while older
    /// stale rows of the same key are retired with it.
    pub fn mark_submitted(&self, observations: &[Observation]) -> StoreResult<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE prices SET added_to_blockchain = 1
                 WHERE source = ?1 AND symbol = ?2
                   AND added_to_blockchain = 0
                   AND updated_at <= ?3",
            )?;
            for obs in observations {
                changed += stmt.execute(params![obs.source, obs.symbol, obs.updated_at])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    /// Most recent submitted observation per (source, symbol)
    pub fn latest_submitted(&self) -> StoreResult<Vec<Observation>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {cols} FROM prices p
             WHERE p.added_to_blockchain = 1
               AND p.id = (
                   SELECT q.id FROM prices q
                   WHERE q.source = p.source AND q.symbol = p.symbol
                     AND q.added_to_blockchain = 1
                   ORDER BY q.updated_at DESC, q.id DESC
                   LIMIT 1
               )
             ORDER BY p.source ASC, p.symbol ASC",
            cols = PRICE_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], observation_from_row)?;
        collect_observations(rows)
    }

    /// Row lookup, mostly for diagnostics
    pub fn observation(&self, id: i64) -> StoreResult<Option<Observation>> {
        use rusqlite::OptionalExtension;

        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM prices WHERE id = ?1", PRICE_COLUMNS);
        let row = conn
            .query_row(&sql, params![id], observation_from_row)
            .optional()?;
        Ok(row.flatten())
    }
}

fn insert_row(conn: &Connection, obs: &NewObservation) -> StoreResult<()> {
    let price = normalize_price(obs.price);
    let bid = obs.bid.map(normalize_price).unwrap_or(price);
    let offer = obs.offer.map(normalize_price).unwrap_or(price);
    let updated_at: Option<UnixSeconds> = obs.updated_at;

    conn.execute(
        "INSERT INTO prices (
            updated_at, timeframe, status, source, asset_type, symbol,
            price, bid, offer, sell_asset, buy_asset
         ) VALUES (
            COALESCE(?1, strftime('%s', 'now')), ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11
         )",
        params![
            updated_at,
            obs.timeframe,
            obs.status.as_str(),
            obs.source,
            obs.asset_type.as_str(),
            obs.symbol.trim(),
            price.to_string(),
            bid.to_string(),
            offer.to_string(),
            obs.sell_asset.trim(),
            obs.buy_asset.trim(),
        ],
    )?;
    Ok(())
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

/// Rows whose stored price cannot be represented exactly are skipped with a warning.
fn collect_observations(
    rows: impl Iterator<Item = rusqlite::Result<Option<Observation>>>,
) -> StoreResult<Vec<Observation>> {
    let mut out = Vec::new();
    for row in rows {
        if let Some(obs) = row? {
            out.push(obs);
        }
    }
    Ok(out)
}

fn observation_from_row(row: &Row<'_>) -> rusqlite::Result<Option<Observation>> {
    let id: i64 = row.get(0)?;
    let price_text: String = row.get(5)?;
    let price = match Decimal::from_str_exact(price_text.trim()) {
        Ok(price) => price,
        Err(e) => {
            warn!(id, price = %price_text, error = %e, "Skipping row with unrepresentable price");
            return Ok(None);
        }
    };

    let status_text: String = row.get(6)?;
    let status = PriceStatus::from_str(&status_text)
        .ok_or_else(|| conversion_error(6, format!("invalid status '{}'", status_text)))?;

    let asset_type_text: String = row.get(7)?;
    let asset_type = AssetType::from_str(&asset_type_text).ok_or_else(|| {
        conversion_error(7, format!("invalid asset_type '{}'", asset_type_text))
    })?;

    Ok(Some(Observation {
        id,
        source: row.get(1)?,
        symbol: row.get(2)?,
        sell_asset: row.get(3)?,
        buy_asset: row.get(4)?,
        price,
        status,
        asset_type,
        updated_at: row.get(8)?,
        added_to_blockchain: row.get(9)?,
    }))
}
