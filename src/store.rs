//! Persistent store of loaded postings.
//!
//! The [`RecordStore`] trait is what the session controller and loader see.
//! [`SqliteStore`] backs it with a single `applicants` table keyed by the
//! record's natural key.

use crate::error::{LoadError, StoreError};
use crate::models::{Origin, ParsedRecord, Status};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use tracing::{debug, info, instrument, warn};

const DATE_FORMAT: &str = "%Y-%m-%d";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS applicants (
        id                    INTEGER PRIMARY KEY AUTOINCREMENT,
        natural_key           TEXT NOT NULL UNIQUE,
        result_id             INTEGER,
        institution           TEXT NOT NULL,
        program               TEXT NOT NULL,
        degree_level          TEXT NOT NULL,
        status                TEXT NOT NULL
            CHECK(status IN ('Accepted','Rejected','Wait listed','Interview','Other')),
        status_date           TEXT,
        date_added            TEXT NOT NULL,
        term                  TEXT,
        origin                TEXT CHECK(origin IN ('Domestic','International','Other')),
        gpa                   REAL CHECK(gpa IS NULL OR gpa BETWEEN 0 AND 5),
        gre_total             INTEGER,
        gre_verbal            INTEGER,
        gre_quant             INTEGER,
        gre_writing           REAL,
        comment               TEXT,
        url                   TEXT,
        source_page           INTEGER NOT NULL,
        source_rank           INTEGER NOT NULL,
        corrected_institution TEXT,
        corrected_program     TEXT,
        loaded_at             TEXT NOT NULL DEFAULT (datetime('now'))
    );
    CREATE INDEX IF NOT EXISTS idx_applicants_date_added ON applicants(date_added);
    CREATE INDEX IF NOT EXISTS idx_applicants_result_id ON applicants(result_id);
";

const INSERT: &str = "
    INSERT INTO applicants (
        natural_key, result_id, institution, program, degree_level, status,
        status_date, date_added, term, origin, gpa, gre_total, gre_verbal,
        gre_quant, gre_writing, comment, url, source_page, source_rank,
        corrected_institution, corrected_program
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
              ?16, ?17, ?18, ?19, ?20, ?21)
    ON CONFLICT(natural_key) DO NOTHING
";

/// Counts from one batch upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub inserted: usize,
    /// Records whose natural key was already stored.
    pub skipped: usize,
}

/// Storage the pipeline reads stop-rule facts from and loads into.
pub trait RecordStore {
    /// Whether a record with this natural key has been loaded before.
    fn contains_key(&self, natural_key: &str) -> Result<bool, StoreError>;

    /// Newest `date_added` stored, or `None` for an empty store.
    fn latest_date_added(&self) -> Result<Option<NaiveDate>, StoreError>;

    /// Insert records in one transaction, skipping keys already present.
    ///
    /// Any other constraint failure rolls back the whole batch.
    fn upsert_batch(&mut self, records: &[ParsedRecord]) -> Result<UpsertOutcome, LoadError>;

    /// Number of stored records.
    fn count(&self) -> Result<usize, StoreError>;
}

/// SQLite-backed [`RecordStore`].
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self::init(conn)?;
        info!(rows = store.count()?, "Opened store");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Every stored record in load order.
    pub fn records(&self) -> Result<Vec<ParsedRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT institution, program, degree_level, status, status_date, date_added,
                    term, origin, gpa, gre_total, gre_verbal, gre_quant, gre_writing,
                    comment, result_id, url, source_page, source_rank,
                    corrected_institution, corrected_program
             FROM applicants ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], RawRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawRow::decode).collect()
    }
}

impl RecordStore for SqliteStore {
    fn contains_key(&self, natural_key: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM applicants WHERE natural_key = ?1",
                params![natural_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn latest_date_added(&self) -> Result<Option<NaiveDate>, StoreError> {
        let latest: Option<String> =
            self.conn
                .query_row("SELECT MAX(date_added) FROM applicants", [], |row| {
                    row.get(0)
                })?;
        latest.as_deref().map(parse_date).transpose()
    }

    #[instrument(level = "info", skip_all, fields(batch = records.len()))]
    fn upsert_batch(&mut self, records: &[ParsedRecord]) -> Result<UpsertOutcome, LoadError> {
        let tx = self.conn.transaction().map_err(StoreError::from)?;
        let mut outcome = UpsertOutcome::default();
        {
            let mut stmt = tx.prepare(INSERT).map_err(StoreError::from)?;
            for r in records {
                let key = r.natural_key();
                let changed = stmt
                    .execute(params![
                        key,
                        r.result_id,
                        r.institution,
                        r.program,
                        r.degree_level,
                        r.status.as_str(),
                        r.status_date.map(|d| d.format(DATE_FORMAT).to_string()),
                        r.date_added.format(DATE_FORMAT).to_string(),
                        r.term,
                        r.origin.map(|o| o.as_str()),
                        r.gpa,
                        r.gre_total,
                        r.gre_verbal,
                        r.gre_quant,
                        r.gre_writing,
                        r.comment,
                        r.url,
                        r.source_page,
                        r.source_rank,
                        r.corrected_institution,
                        r.corrected_program,
                    ])
                    .map_err(|source| {
                        warn!(natural_key = %key, error = %source, "Insert failed; rolling back batch");
                        LoadError::Conflict {
                            natural_key: key.clone(),
                            source,
                        }
                    })?;
                if changed == 0 {
                    debug!(natural_key = %key, "Already stored; skipping");
                    outcome.skipped += 1;
                } else {
                    outcome.inserted += changed;
                }
            }
        }
        tx.commit().map_err(StoreError::from)?;
        info!(
            inserted = outcome.inserted,
            skipped = outcome.skipped,
            "Batch committed"
        );
        Ok(outcome)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM applicants", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|e| StoreError::Decode(format!("date {s:?}: {e}")))
}

fn parse_status(s: &str) -> Result<Status, StoreError> {
    [
        Status::Accepted,
        Status::Rejected,
        Status::WaitListed,
        Status::Interview,
        Status::Other,
    ]
    .into_iter()
    .find(|st| st.as_str() == s)
    .ok_or_else(|| StoreError::Decode(format!("status {s:?}")))
}

fn parse_origin(s: &str) -> Result<Origin, StoreError> {
    [Origin::Domestic, Origin::International, Origin::Other]
        .into_iter()
        .find(|o| o.as_str() == s)
        .ok_or_else(|| StoreError::Decode(format!("origin {s:?}")))
}

/// Column values as SQLite hands them back, before decoding.
struct RawRow {
    institution: String,
    program: String,
    degree_level: String,
    status: String,
    status_date: Option<String>,
    date_added: String,
    term: Option<String>,
    origin: Option<String>,
    gpa: Option<f64>,
    gre_total: Option<u16>,
    gre_verbal: Option<u16>,
    gre_quant: Option<u16>,
    gre_writing: Option<f64>,
    comment: Option<String>,
    result_id: Option<i64>,
    url: Option<String>,
    source_page: u32,
    source_rank: u32,
    corrected_institution: Option<String>,
    corrected_program: Option<String>,
}

impl RawRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            institution: row.get(0)?,
            program: row.get(1)?,
            degree_level: row.get(2)?,
            status: row.get(3)?,
            status_date: row.get(4)?,
            date_added: row.get(5)?,
            term: row.get(6)?,
            origin: row.get(7)?,
            gpa: row.get(8)?,
            gre_total: row.get(9)?,
            gre_verbal: row.get(10)?,
            gre_quant: row.get(11)?,
            gre_writing: row.get(12)?,
            comment: row.get(13)?,
            result_id: row.get(14)?,
            url: row.get(15)?,
            source_page: row.get(16)?,
            source_rank: row.get(17)?,
            corrected_institution: row.get(18)?,
            corrected_program: row.get(19)?,
        })
    }

    fn decode(self) -> Result<ParsedRecord, StoreError> {
        Ok(ParsedRecord {
            institution: self.institution,
            program: self.program,
            degree_level: self.degree_level,
            status: parse_status(&self.status)?,
            status_date: self.status_date.as_deref().map(parse_date).transpose()?,
            date_added: parse_date(&self.date_added)?,
            term: self.term,
            origin: self.origin.as_deref().map(parse_origin).transpose()?,
            gpa: self.gpa,
            gre_total: self.gre_total,
            gre_verbal: self.gre_verbal,
            gre_quant: self.gre_quant,
            gre_writing: self.gre_writing,
            comment: self.comment,
            result_id: self.result_id,
            url: self.url,
            source_page: self.source_page,
            source_rank: self.source_rank,
            corrected_institution: self.corrected_institution,
            corrected_program: self.corrected_program,
        })
    }
}
