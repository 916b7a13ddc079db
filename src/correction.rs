//! Correction step: normalizes institution and program names outside the
//! pipeline.
//!
//! The pipeline writes its records to a snapshot file first. A
//! [`CommandCorrector`] runs `<program> <args…> <snapshot>` and reads JSON
//! Lines from its stdout, one object per corrected record:
//!
//! ```text
//! {"natural_key":"result:103","institution":"Stanford University","program":"Computer Science"}
//! ```
//!
//! `llm-generated-university` and `llm-generated-program` are accepted as
//! field aliases. Lines that do not parse are skipped; records nobody
//! corrected keep their extracted values.

use crate::error::CorrectionError;
use crate::models::ParsedRecord;
use crate::utils::{looks_truncated, truncate_for_log};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Anything that can correct a batch of records.
pub trait Corrector {
    async fn correct(
        &self,
        records: Vec<ParsedRecord>,
        snapshot: &Path,
    ) -> Result<Vec<ParsedRecord>, CorrectionError>;
}

/// Leaves records untouched. Used when no command is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Corrector for Passthrough {
    async fn correct(
        &self,
        records: Vec<ParsedRecord>,
        _snapshot: &Path,
    ) -> Result<Vec<ParsedRecord>, CorrectionError> {
        debug!(records = records.len(), "No corrector configured; passing through");
        Ok(records)
    }
}

/// Runs an external command over the snapshot file.
#[derive(Debug, Clone)]
pub struct CommandCorrector {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandCorrector {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Corrector for CommandCorrector {
    #[instrument(level = "info", skip(self, records), fields(command = %self.program, records = records.len()))]
    async fn correct(
        &self,
        records: Vec<ParsedRecord>,
        snapshot: &Path,
    ) -> Result<Vec<ParsedRecord>, CorrectionError> {
        let command = self.command_line();
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(snapshot)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CorrectionError::Spawn {
                command: command.clone(),
                source,
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| CorrectionError::Timeout {
                command: command.clone(),
                secs: self.timeout.as_secs(),
            })?
            .map_err(|source| CorrectionError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CorrectionError::Exit {
                command,
                code: output.status.code(),
                stderr: truncate_for_log(stderr.trim(), 500),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(apply_corrections(records, &stdout))
    }
}

/// The corrector selected by configuration.
#[derive(Debug, Clone)]
pub enum AnyCorrector {
    Passthrough(Passthrough),
    Command(CommandCorrector),
}

impl Corrector for AnyCorrector {
    async fn correct(
        &self,
        records: Vec<ParsedRecord>,
        snapshot: &Path,
    ) -> Result<Vec<ParsedRecord>, CorrectionError> {
        match self {
            AnyCorrector::Passthrough(c) => c.correct(records, snapshot).await,
            AnyCorrector::Command(c) => c.correct(records, snapshot).await,
        }
    }
}

/// One line of corrector output.
#[derive(Debug, Deserialize)]
struct Correction {
    natural_key: String,
    #[serde(default, alias = "llm-generated-university")]
    institution: Option<String>,
    #[serde(default, alias = "llm-generated-program")]
    program: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Merge JSON Lines corrections into `records` by natural key.
pub fn apply_corrections(mut records: Vec<ParsedRecord>, jsonl: &str) -> Vec<ParsedRecord> {
    let mut corrections: HashMap<String, Correction> = HashMap::new();
    let mut bad_lines = 0usize;

    for (i, line) in jsonl.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Correction>(line) {
            Ok(c) => {
                corrections.entry(c.natural_key.clone()).or_insert(c);
            }
            Err(e) if looks_truncated(&e) => {
                bad_lines += 1;
                warn!(line = i + 1, error = %e, "Truncated correction line; skipping");
            }
            Err(e) => {
                bad_lines += 1;
                warn!(
                    line = i + 1,
                    error = %e,
                    preview = %truncate_for_log(line, 200),
                    "Unparseable correction line; skipping"
                );
            }
        }
    }

    let mut applied = 0usize;
    for record in &mut records {
        if let Some(c) = corrections.remove(&record.natural_key()) {
            record.corrected_institution = non_blank(c.institution);
            record.corrected_program = non_blank(c.program);
            applied += 1;
        }
    }
    info!(
        applied,
        uncorrected = records.len() - applied,
        bad_lines,
        unmatched = corrections.len(),
        "Applied corrections"
    );
    records
}
