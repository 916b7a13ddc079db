//! One ingestion run: permission, paging, snapshot, correction, load.
//!
//! ```text
//! CrawlPolicy ─► SessionController ─► write_snapshot ─► Corrector ─► Loader
//!                 (PageSource, StopRule)                              (RecordStore)
//! ```
//!
//! Records fetched before a stop are never discarded: a failed correction
//! leaves them in the snapshot file and in the error's session summary.
//! [`Pipeline::load_snapshot`] loads such a file later, optionally merging a
//! corrections file first.

use crate::correction::{Corrector, apply_corrections};
use crate::error::PipelineError;
use crate::loader::{LoadReport, Loader};
use crate::models::{Mode, RunSummary, StopReason};
use crate::outputs::json::{read_snapshot, write_snapshot};
use crate::scrapers::fetch::PageSource;
use crate::scrapers::robots::CrawlPolicy;
use crate::session::{AlreadyStored, BulkCutoff, ModeRule, SessionConfig, SessionController};
use crate::store::RecordStore;
use crate::utils::ensure_writable_dir;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Run-level settings.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub session: SessionConfig,
    /// Cutoff for incremental runs that find the store empty.
    pub default_cutoff: NaiveDate,
    pub output_dir: PathBuf,
}

pub struct Pipeline<F, P, C, S> {
    source: F,
    policy: P,
    corrector: C,
    store: S,
    settings: PipelineSettings,
}

impl<F, P, C, S> Pipeline<F, P, C, S>
where
    F: PageSource,
    P: CrawlPolicy,
    C: Corrector,
    S: RecordStore,
{
    pub fn new(source: F, policy: P, corrector: C, store: S, settings: PipelineSettings) -> Self {
        Self {
            source,
            policy,
            corrector,
            store,
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The mode a request actually runs in: incremental against an empty
    /// store becomes bulk with the default cutoff.
    pub fn effective_mode(&self, requested: Mode) -> Result<Mode, PipelineError> {
        match requested {
            Mode::Incremental if self.store.latest_date_added()?.is_none() => {
                info!(
                    cutoff = %self.settings.default_cutoff,
                    "Store is empty; running bulk instead of incremental"
                );
                Ok(Mode::Bulk {
                    cutoff: self.settings.default_cutoff,
                })
            }
            mode => Ok(mode),
        }
    }

    #[instrument(level = "info", skip(self, cancel), fields(mode = %requested))]
    pub async fn run(
        &mut self,
        requested: Mode,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        if let Err(e) = ensure_writable_dir(&self.settings.output_dir).await {
            error!(
                path = %self.settings.output_dir.display(),
                error = %e,
                "Output directory is not writable"
            );
            return Err(PipelineError::Output {
                source: e,
                session: None,
            });
        }

        let mode = self.effective_mode(requested)?;
        let session = {
            let rule = match mode {
                Mode::Bulk { cutoff } => ModeRule::Bulk(BulkCutoff { cutoff }),
                Mode::Incremental => ModeRule::Incremental(AlreadyStored::new(&self.store)?),
            };
            SessionController::new(&self.source, self.settings.session.clone())
                .run(&self.policy, &rule, cancel)
                .await
        };

        let summary = session.summary();
        if let Some(StopReason::PermissionDenied { detail }) = session.stop_reason() {
            return Err(PipelineError::PermissionDenied {
                reason: detail.clone(),
            });
        }
        let records = session.into_records();
        let fetched = records.len();
        info!(
            pages = summary.pages_fetched,
            records = fetched,
            malformed = summary.malformed_blocks,
            "Session finished"
        );

        if records.is_empty() {
            return Ok(RunSummary {
                mode,
                session: summary,
                records_fetched: 0,
                records_loaded: 0,
                duplicates_skipped: 0,
                snapshot: None,
            });
        }

        let snapshot = match write_snapshot(&records, &self.settings.output_dir, &mode).await {
            Ok(path) => path,
            Err(source) => {
                error!(error = %source, records = fetched, "Could not write snapshot");
                return Err(PipelineError::Output {
                    source,
                    session: Some(summary),
                });
            }
        };

        let corrected = match self.corrector.correct(records, &snapshot).await {
            Ok(corrected) => corrected,
            Err(source) => {
                warn!(
                    error = %source,
                    snapshot = %snapshot.display(),
                    "Correction failed; skipping load, records kept in snapshot"
                );
                return Err(PipelineError::Correction {
                    source,
                    session: summary,
                    snapshot: Some(snapshot),
                });
            }
        };

        let report = match Loader::new(&mut self.store).load(corrected) {
            Ok(report) => report,
            Err(source) => {
                return Err(PipelineError::Load {
                    source,
                    session: summary,
                    snapshot: Some(snapshot),
                });
            }
        };

        Ok(RunSummary {
            mode,
            session: summary,
            records_fetched: fetched,
            records_loaded: report.inserted,
            duplicates_skipped: report.duplicates,
            snapshot: Some(snapshot),
        })
    }

    /// Load a snapshot written by an earlier run, without fetching.
    ///
    /// # Arguments
    /// * `snapshot` - JSON array snapshot or JSON Lines export.
    /// * `corrections` - Optional JSON Lines corrections keyed by natural key,
    ///   merged before loading.
    ///
    /// # Returns
    /// The loader's counts. Records already stored count as duplicates, so
    /// loading the same file twice inserts nothing the second time.
    #[instrument(level = "info", skip(self))]
    pub async fn load_snapshot(
        &mut self,
        snapshot: &Path,
        corrections: Option<&Path>,
    ) -> Result<LoadReport, PipelineError> {
        let mut records = read_snapshot(snapshot)
            .await
            .map_err(|source| PipelineError::Output {
                source,
                session: None,
            })?;
        if let Some(path) = corrections {
            let jsonl = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| PipelineError::Output {
                    source: e.into(),
                    session: None,
                })?;
            records = apply_corrections(records, &jsonl);
        }

        Loader::new(&mut self.store)
            .load(records)
            .map_err(|source| PipelineError::SnapshotLoad {
                source,
                snapshot: snapshot.to_path_buf(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correction::Passthrough;
    use crate::error::{CorrectionError, LoadError, StoreError};
    use crate::fixtures::{Entry, FakeListing, entries_on, record, ymd};
    use crate::models::ParsedRecord;
    use crate::scrapers::robots::Permission;
    use crate::store::{SqliteStore, UpsertOutcome};
    use std::cell::Cell;
    use std::time::Duration;
    use url::Url;

    struct Failing;

    impl Corrector for Failing {
        async fn correct(
            &self,
            _records: Vec<ParsedRecord>,
            _snapshot: &Path,
        ) -> Result<Vec<ParsedRecord>, CorrectionError> {
            Err(CorrectionError::Exit {
                command: "normalize".to_string(),
                code: Some(1),
                stderr: "model unavailable".to_string(),
            })
        }
    }

    /// Uppercases institutions, as a stand-in for a real normalizer.
    struct Shouting;

    impl Corrector for Shouting {
        async fn correct(
            &self,
            mut records: Vec<ParsedRecord>,
            _snapshot: &Path,
        ) -> Result<Vec<ParsedRecord>, CorrectionError> {
            for r in &mut records {
                r.corrected_institution = Some(r.institution.to_uppercase());
            }
            Ok(records)
        }
    }

    fn settings(output_dir: &Path) -> PipelineSettings {
        PipelineSettings {
            session: SessionConfig {
                base_url: Url::parse("https://www.thegradcafe.com/").unwrap(),
                start_page: 1,
                max_pages: 0,
                page_delay: Duration::ZERO,
                expected_rows_per_page: 20,
            },
            default_cutoff: ymd("2025-09-01"),
            output_dir: output_dir.to_path_buf(),
        }
    }

    fn listing() -> FakeListing {
        FakeListing::new("2025-09-24")
            .with_page(1, &entries_on(1, 3, "2025-09-23"))
            .with_page(2, &entries_on(4, 3, "2025-09-22"))
    }

    fn allowed() -> Permission {
        Permission::Allowed { crawl_delay: None }
    }

    #[tokio::test]
    async fn test_second_incremental_run_loads_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(
            listing(),
            allowed(),
            Passthrough,
            SqliteStore::open_in_memory().unwrap(),
            settings(tmp.path()),
        );

        let first = pipeline
            .run(Mode::Incremental, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            first.mode,
            Mode::Bulk {
                cutoff: ymd("2025-09-01")
            }
        );
        assert_eq!(first.records_fetched, 6);
        assert_eq!(first.records_loaded, 6);
        assert_eq!(first.session.stop_reason, Some(StopReason::EndOfListing));
        assert!(first.snapshot.as_ref().unwrap().exists());

        let second = pipeline
            .run(Mode::Incremental, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(second.mode, Mode::Incremental);
        assert_eq!(second.records_loaded, 0);
        assert_eq!(second.session.pages_fetched, 1);
        assert!(matches!(
            second.session.stop_reason,
            Some(StopReason::DuplicateBoundary { .. })
        ));
        assert_eq!(pipeline.store().count().unwrap(), 6);
    }

    #[tokio::test]
    async fn test_incremental_loads_only_new_postings() {
        let tmp = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(
            listing(),
            allowed(),
            Passthrough,
            SqliteStore::open_in_memory().unwrap(),
            settings(tmp.path()),
        );
        pipeline
            .run(Mode::Incremental, &CancellationToken::new())
            .await
            .unwrap();

        // Two new postings appear at the top of page 1.
        let mut page_one = vec![Entry::new(100, "2025-09-24"), Entry::new(101, "2025-09-24")];
        page_one.extend(entries_on(1, 3, "2025-09-23"));
        pipeline.source = FakeListing::new("2025-09-24")
            .with_page(1, &page_one)
            .with_page(2, &entries_on(4, 3, "2025-09-22"));

        let run = pipeline
            .run(Mode::Incremental, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(run.records_loaded, 2);
        assert_eq!(pipeline.source.calls(), vec![1]);
        assert_eq!(pipeline.store().count().unwrap(), 8);
    }

    #[tokio::test]
    async fn test_bulk_never_loads_before_cutoff() {
        let tmp = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(
            listing(),
            allowed(),
            Passthrough,
            SqliteStore::open_in_memory().unwrap(),
            settings(tmp.path()),
        );
        let run = pipeline
            .run(
                Mode::Bulk {
                    cutoff: ymd("2025-09-23"),
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(run.records_loaded, 3);
        let stored = pipeline.store().records().unwrap();
        assert!(stored.iter().all(|r| r.date_added >= ymd("2025-09-23")));
    }

    #[tokio::test]
    async fn test_permission_denied_is_fatal_before_fetching() {
        let tmp = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(
            listing(),
            Permission::Denied {
                reason: "Disallow: /survey/".to_string(),
            },
            Passthrough,
            SqliteStore::open_in_memory().unwrap(),
            settings(tmp.path()),
        );
        let err = pipeline
            .run(Mode::Incremental, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PermissionDenied { .. }));
        assert!(pipeline.source.calls().is_empty());
        assert_eq!(pipeline.store().count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_correction_failure_keeps_records_and_skips_load() {
        let tmp = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(
            listing(),
            allowed(),
            Failing,
            SqliteStore::open_in_memory().unwrap(),
            settings(tmp.path()),
        );
        let err = pipeline
            .run(Mode::Incremental, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            PipelineError::Correction {
                session, snapshot, ..
            } => {
                assert_eq!(session.records, 6);
                let body = std::fs::read_to_string(snapshot.unwrap()).unwrap();
                let rows: Vec<serde_json::Value> = serde_json::from_str(&body).unwrap();
                assert_eq!(rows.len(), 6);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(pipeline.store().count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_run_recovers_from_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(
            listing(),
            allowed(),
            Failing,
            SqliteStore::open_in_memory().unwrap(),
            settings(tmp.path()),
        );
        let snapshot = match pipeline
            .run(Mode::Incremental, &CancellationToken::new())
            .await
        {
            Err(PipelineError::Correction { snapshot, .. }) => snapshot.unwrap(),
            other => panic!("unexpected result: {other:?}"),
        };

        let corrections = tmp.path().join("corrections.jsonl");
        std::fs::write(
            &corrections,
            "{\"natural_key\":\"result:1\",\"institution\":\"Stanford University\"}\n",
        )
        .unwrap();

        let report = pipeline
            .load_snapshot(&snapshot, Some(&corrections))
            .await
            .unwrap();
        assert_eq!(report.inserted, 6);
        let stored = pipeline.store().records().unwrap();
        let first = stored.iter().find(|r| r.result_id == Some(1)).unwrap();
        assert_eq!(
            first.corrected_institution.as_deref(),
            Some("Stanford University")
        );

        let again = pipeline.load_snapshot(&snapshot, None).await.unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(again.duplicates, 6);
    }

    #[tokio::test]
    async fn test_load_snapshot_missing_file_is_output_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(
            listing(),
            allowed(),
            Passthrough,
            SqliteStore::open_in_memory().unwrap(),
            settings(tmp.path()),
        );
        let err = pipeline
            .load_snapshot(&tmp.path().join("absent.json"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Output { session: None, .. }));
    }

    /// Answers lookups until the given call, then fails every one.
    struct FlakyStore {
        inner: SqliteStore,
        lookups: Cell<usize>,
        fail_from: usize,
    }

    impl RecordStore for FlakyStore {
        fn contains_key(&self, natural_key: &str) -> Result<bool, StoreError> {
            let n = self.lookups.get() + 1;
            self.lookups.set(n);
            if n >= self.fail_from {
                return Err(StoreError::Decode("disk I/O error".to_string()));
            }
            self.inner.contains_key(natural_key)
        }

        fn latest_date_added(&self) -> Result<Option<NaiveDate>, StoreError> {
            self.inner.latest_date_added()
        }

        fn upsert_batch(&mut self, records: &[ParsedRecord]) -> Result<UpsertOutcome, LoadError> {
            self.inner.upsert_batch(records)
        }

        fn count(&self) -> Result<usize, StoreError> {
            self.inner.count()
        }
    }

    #[tokio::test]
    async fn test_store_lookup_failure_still_loads_earlier_pages() {
        let tmp = tempfile::tempdir().unwrap();
        let mut inner = SqliteStore::open_in_memory().unwrap();
        inner.upsert_batch(&[record(9, 9, "2025-09-20")]).unwrap();
        let store = FlakyStore {
            inner,
            lookups: Cell::new(0),
            fail_from: 4,
        };
        let mut pipeline = Pipeline::new(
            listing(),
            allowed(),
            Passthrough,
            store,
            settings(tmp.path()),
        );

        let run = pipeline
            .run(Mode::Incremental, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(run.mode, Mode::Incremental);
        assert_eq!(pipeline.source.calls(), vec![1, 2]);
        assert_eq!(run.records_fetched, 3);
        assert_eq!(run.records_loaded, 3);
        assert!(matches!(
            run.session.stop_reason,
            Some(StopReason::StoreFailed { page: 2, .. })
        ));
        assert!(run.snapshot.is_some());
        assert_eq!(pipeline.store().count().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_corrections_are_stored() {
        let tmp = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(
            listing(),
            allowed(),
            Shouting,
            SqliteStore::open_in_memory().unwrap(),
            settings(tmp.path()),
        );
        pipeline
            .run(Mode::Incremental, &CancellationToken::new())
            .await
            .unwrap();
        let stored = pipeline.store().records().unwrap();
        assert!(
            stored
                .iter()
                .all(|r| r.corrected_institution.as_deref() == Some("TEST UNIVERSITY"))
        );
    }

    #[tokio::test]
    async fn test_nothing_fetched_writes_no_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(
            FakeListing::new("2025-09-24"),
            allowed(),
            Failing,
            SqliteStore::open_in_memory().unwrap(),
            settings(tmp.path()),
        );
        let run = pipeline
            .run(Mode::Incremental, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(run.records_fetched, 0);
        assert_eq!(run.snapshot, None);
        assert_eq!(run.session.stop_reason, Some(StopReason::EndOfListing));
    }
}
