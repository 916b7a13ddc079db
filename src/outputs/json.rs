//! JSON snapshots of a session's parsed records.
//!
//! Each run writes its records before the correction step sees them, so the
//! fetched data survives a failed correction or load. [`read_snapshot`]
//! reads such a file (or a JSON Lines export) back for a later load.
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! └── 2025-09-23/
//!     ├── bulk_061502.json
//!     └── incremental_181007.json
//! ```

use crate::models::{Mode, ParsedRecord};
use chrono::Local;
use serde::Serialize;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument, warn};

/// A record as written to the snapshot: its key plus every field.
#[derive(Debug, Serialize)]
struct SnapshotRecord<'a> {
    natural_key: String,
    #[serde(flatten)]
    record: &'a ParsedRecord,
}

fn mode_label(mode: &Mode) -> &'static str {
    match mode {
        Mode::Bulk { .. } => "bulk",
        Mode::Incremental => "incremental",
    }
}

/// Write `records` as a pretty JSON array and return the file's path.
///
/// The file lands at `{output_dir}/{date}/{mode}_{HHMMSS}.json`; a numeric
/// suffix is added if a run in the same second already wrote that name.
#[instrument(level = "info", skip_all, fields(output_dir = %output_dir.display(), records = records.len()))]
pub async fn write_snapshot(
    records: &[ParsedRecord],
    output_dir: &Path,
    mode: &Mode,
) -> Result<PathBuf, Box<dyn Error + Send + Sync>> {
    let rows: Vec<SnapshotRecord<'_>> = records
        .iter()
        .map(|record| SnapshotRecord {
            natural_key: record.natural_key(),
            record,
        })
        .collect();
    let json = serde_json::to_string_pretty(&rows)?;

    let now = Local::now();
    let dated_dir = output_dir.join(now.date_naive().to_string());
    if let Err(e) = fs::create_dir_all(&dated_dir).await {
        error!(dir = %dated_dir.display(), error = %e, "Failed to create snapshot dir");
        return Err(e.into());
    }

    let stem = format!("{}_{}", mode_label(mode), now.format("%H%M%S"));
    let mut path = dated_dir.join(format!("{stem}.json"));
    let mut n = 2;
    while fs::try_exists(&path).await? {
        path = dated_dir.join(format!("{stem}_{n}.json"));
        n += 1;
    }

    fs::write(&path, json).await?;
    info!(path = %path.display(), "Wrote snapshot");
    Ok(path)
}

/// Read records back from a snapshot.
///
/// # Arguments
/// * `path` - A file written by [`write_snapshot`] (a JSON array), or a JSON
///   Lines file with one record per line.
///
/// # Returns
/// The records in file order. The stored `natural_key` field is ignored and
/// recomputed on load. JSON Lines input skips lines that do not parse; a
/// JSON array must parse as a whole.
#[instrument(level = "info", fields(path = %path.display()))]
pub async fn read_snapshot(
    path: &Path,
) -> Result<Vec<ParsedRecord>, Box<dyn Error + Send + Sync>> {
    let body = fs::read_to_string(path).await?;
    if body.trim_start().starts_with('[') {
        let records: Vec<ParsedRecord> = serde_json::from_str(&body)?;
        info!(records = records.len(), "Read snapshot");
        return Ok(records);
    }

    let mut records = Vec::new();
    for (n, line) in body.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<ParsedRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(line = n + 1, error = %e, "Skipping unreadable snapshot line"),
        }
    }
    info!(records = records.len(), "Read JSON Lines snapshot");
    Ok(records)
}
