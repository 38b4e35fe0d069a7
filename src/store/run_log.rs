//! Submission log and run lock

use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;

use super::PriceStore;
use crate::error::StoreResult;
use crate::types::{NewLogEntry, RunLogEntry, UnixSeconds};

const LOG_COLUMNS: &str = "id, run_id, settlement_asset, command, output, success, outcome, \
                           entries, window_start, created_at";

impl PriceStore {
    /// Append an audit row. Rows are never updated afterwards.
    pub fn append_log(&self, entry: &NewLogEntry) -> StoreResult<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO submission_log
                (run_id, settlement_asset, command, output, success, outcome, entries,
                 window_start, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.run_id,
                entry.settlement_asset.map(|a| a.as_str()),
                entry.command,
                entry.output,
                entry.outcome.is_success(),
                entry.outcome.as_str(),
                entry.entries as i64,
                entry.window_start,
                entry.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// `created_at` of the most recent successful submission
    pub fn latest_success_at(&self) -> StoreResult<Option<UnixSeconds>> {
        let conn = self.conn.lock();
        let ts = conn
            .query_row(
                "SELECT created_at FROM submission_log
                 WHERE success = 1
                 ORDER BY created_at DESC, id DESC
                 LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(ts)
    }

    /// Latest window a successful submission was made for. A pass that outlives
    /// its window still counts for the window it started in.
    pub fn latest_served_window(&self) -> StoreResult<Option<UnixSeconds>> {
        let conn = self.conn.lock();
        let window = conn.query_row(
            "SELECT MAX(window_start) FROM submission_log WHERE success = 1",
            [],
            |row| row.get::<_, Option<UnixSeconds>>(0),
        )?;
        Ok(window)
    }

    /// Newest entries first
    pub fn recent_log(&self, limit: usize) -> StoreResult<Vec<RunLogEntry>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM submission_log ORDER BY created_at DESC, id DESC LIMIT ?1",
            LOG_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![limit as i64], log_entry_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Entries created at or after `since`, oldest first
    pub fn log_since(&self, since: UnixSeconds) -> StoreResult<Vec<RunLogEntry>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM submission_log WHERE created_at >= ?1 ORDER BY created_at ASC, id ASC",
            LOG_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![since], log_entry_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Take the run lease for `holder`. Returns false while another holder's lease is live.
    pub fn try_acquire_run_lock(
        &self,
        holder: &str,
        now: UnixSeconds,
        ttl_secs: i64,
    ) -> StoreResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<(String, UnixSeconds)> = tx
            .query_row(
                "SELECT holder, expires_at FROM run_lock WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((current_holder, expires_at)) = current {
            if current_holder != holder && expires_at > now {
                debug!(
                    holder = %current_holder,
                    expires_at,
                    "Run lock held by another pass"
                );
                return Ok(false);
            }
        }

        tx.execute(
            "INSERT INTO run_lock (id, holder, acquired_at, expires_at)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                holder = excluded.holder,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at",
            params![holder, now, now.saturating_add(ttl_secs)],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Extend the lease of `holder` to `now + ttl_secs`. Returns false if another
    /// pass has taken the lease over.
    pub fn renew_run_lock(
        &self,
        holder: &str,
        now: UnixSeconds,
        ttl_secs: i64,
    ) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let renewed = conn.execute(
            "UPDATE run_lock SET expires_at = ?2 WHERE id = 1 AND holder = ?1",
            params![holder, now.saturating_add(ttl_secs)],
        )?;
        Ok(renewed > 0)
    }

    /// Drop the lease if `holder` still owns it
    pub fn release_run_lock(&self, holder: &str) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM run_lock WHERE id = 1 AND holder = ?1", [holder])?;
        Ok(removed > 0)
    }
}

fn log_entry_from_row(row: &Row<'_>) -> rusqlite::Result<RunLogEntry> {
    Ok(RunLogEntry {
        id: row.get(0)?,
        run_id: row.get(1)?,
        settlement_asset: row.get(2)?,
        command: row.get(3)?,
        output: row.get(4)?,
        success: row.get(5)?,
        outcome: row.get(6)?,
        entries: row.get(7)?,
        window_start: row.get(8)?,
        created_at: row.get(9)?,
    })
}
