//! Loader: deduplicates a corrected batch and upserts it into the store.

use crate::error::LoadError;
use crate::models::ParsedRecord;
use crate::store::RecordStore;
use itertools::Itertools;
use serde::Serialize;
use tracing::{info, instrument};

/// Counts from one load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Records handed to the loader.
    pub received: usize,
    pub inserted: usize,
    /// Repeats within the batch plus keys already stored.
    pub duplicates: usize,
}

/// Loads batches into a [`RecordStore`].
pub struct Loader<'a, S> {
    store: &'a mut S,
}

impl<'a, S: RecordStore> Loader<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        Self { store }
    }

    /// Deduplicate by natural key (first occurrence wins) and upsert the
    /// batch in one transaction.
    #[instrument(level = "info", skip_all, fields(batch = records.len()))]
    pub fn load(&mut self, records: Vec<ParsedRecord>) -> Result<LoadReport, LoadError> {
        let received = records.len();
        let unique = records
            .into_iter()
            .unique_by(ParsedRecord::natural_key)
            .collect::<Vec<ParsedRecord>>();
        let repeated = received - unique.len();

        let outcome = self.store.upsert_batch(&unique)?;
        let report = LoadReport {
            received,
            inserted: outcome.inserted,
            duplicates: repeated + outcome.skipped,
        };
        info!(
            received,
            inserted = report.inserted,
            duplicates = report.duplicates,
            "Loaded batch"
        );
        Ok(report)
    }
}
