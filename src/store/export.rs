//! CSV export of the submission log

use csv::WriterBuilder;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::error::StoreResult;
use crate::types::RunLogEntry;

/// Serialize entries with a header row. Returns the number of rows written.
pub fn write_log_csv<W: Write>(entries: &[RunLogEntry], writer: W) -> StoreResult<usize> {
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(writer);
    for entry in entries {
        writer.serialize(entry)?;
    }
    writer.flush()?;
    Ok(entries.len())
}

/// Write entries to `path`, replacing any previous export
pub fn export_log_csv(entries: &[RunLogEntry], path: &Path) -> StoreResult<usize> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;

    let written = write_log_csv(entries, file)?;
    info!(path = %path.display(), rows = written, "Submission log exported");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, success: bool) -> RunLogEntry {
        RunLogEntry {
            id,
            run_id: "run-7".to_string(),
            settlement_asset: Some("XLM".to_string()),
            command: "add_prices contract=C1".to_string(),
            output: "tx 00ff".to_string(),
            success,
            outcome: if success { "success" } else { "failure" }.to_string(),
            entries: 2,
            window_start: 1_699_999_800,
            created_at: 1_700_000_000 + id,
        }
    }

    #[test]
    fn writes_header_and_rows() {
        let mut buf = Vec::new();
        let written = write_log_csv(&[row(1, true), row(2, false)], &mut buf).unwrap();
        assert_eq!(written, 2);

        let content = String::from_utf8(buf).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "id,run_id,settlement_asset,command,output,success,outcome,entries,window_start,created_at"
        );
        assert_eq!(
            lines.next().unwrap(),
            "1,run-7,XLM,add_prices contract=C1,tx 00ff,true,success,2,1699999800,1700000001"
        );
        assert!(lines.next().unwrap().contains(",false,failure,"));
        assert!(lines.next().is_none());
    }

    #[test]
    fn export_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exports").join("log.csv");
        export_log_csv(&[row(1, true), row(2, true)], &path).unwrap();
        export_log_csv(&[row(3, false)], &path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("run-7"));
    }
}
