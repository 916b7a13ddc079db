//! Data models shared by every stage of the pipeline.
//!
//! - [`RawPage`]: one fetched listing page, consumed immediately by the segmenter
//! - [`ParsedRecord`]: one applicant posting after field extraction
//! - [`Mode`], [`StopReason`]: how a session pages and why it ended
//! - [`ScrapeSummary`], [`RunSummary`]: what the pipeline reports back
//!
//! Row-groups ([`crate::scrapers::segment::EntryBlock`]) live with the
//! segmenter because nothing outside parsing needs to see raw rows.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Institution value used when the status row does not name one.
pub const UNKNOWN_INSTITUTION: &str = "Unknown";

/// A listing page as returned by the fetcher.
#[derive(Debug, Clone)]
pub struct RawPage {
    /// 1-based page index.
    pub index: u32,
    /// Raw HTML body.
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

impl RawPage {
    pub fn new(index: u32, body: impl Into<String>) -> Self {
        Self {
            index,
            body: body.into(),
            fetched_at: Utc::now(),
        }
    }
}

/// Admission decision vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Accepted,
    Rejected,
    #[serde(rename = "Wait listed")]
    WaitListed,
    Interview,
    /// Anything the status parser did not recognize.
    Other,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Accepted => "Accepted",
            Status::Rejected => "Rejected",
            Status::WaitListed => "Wait listed",
            Status::Interview => "Interview",
            Status::Other => "Other",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the applicant applied from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    Domestic,
    International,
    Other,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Domestic => "Domestic",
            Origin::International => "International",
            Origin::Other => "Other",
        }
    }
}

/// One applicant posting.
///
/// Optional fields are `None` whenever their sub-parser could not make sense
/// of the source text; a record is never dropped because of a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedRecord {
    /// Institution name, or [`UNKNOWN_INSTITUTION`].
    pub institution: String,
    /// Program name; empty when absent.
    pub program: String,
    /// Degree level such as `MS` or `PhD`; empty when absent.
    pub degree_level: String,
    pub status: Status,
    pub status_date: Option<NaiveDate>,
    /// Date the posting appeared on the listing.
    pub date_added: NaiveDate,
    /// Admission term such as `Fall 2021`.
    pub term: Option<String>,
    pub origin: Option<Origin>,
    pub gpa: Option<f64>,
    pub gre_total: Option<u16>,
    pub gre_verbal: Option<u16>,
    pub gre_quant: Option<u16>,
    pub gre_writing: Option<f64>,
    /// Verbatim third-row commentary.
    pub comment: Option<String>,
    /// Site-assigned id from the `/result/<id>` link.
    pub result_id: Option<i64>,
    pub url: Option<String>,
    pub source_page: u32,
    /// 1-based position of the posting on its page.
    pub source_rank: u32,
    /// Institution as normalized by the correction step.
    #[serde(default)]
    pub corrected_institution: Option<String>,
    /// Program as normalized by the correction step.
    #[serde(default)]
    pub corrected_program: Option<String>,
}

impl ParsedRecord {
    /// Key used to recognize a previously stored posting.
    ///
    /// Prefers the site's result id. Otherwise the listed fields form the
    /// key, lower-cased. The page position (`page:rank`) is only added when
    /// the decision date is missing, since without it two same-day postings
    /// for one program would collide. Position keys are not stable: newer
    /// postings push an entry down the listing, so an id-less posting
    /// without a decision date can be stored twice if it is seen again on
    /// the newest stored day.
    pub fn natural_key(&self) -> String {
        if let Some(id) = self.result_id {
            return format!("result:{id}");
        }
        let listed = format!("{}|{}", self.institution.trim(), self.program.trim());
        match self.status_date {
            Some(decided) => format!("{listed}|{decided}|{}", self.date_added),
            None => format!(
                "{listed}||{}|{}:{}",
                self.date_added, self.source_page, self.source_rank
            ),
        }
        .to_lowercase()
    }
}

/// How a session decides where to stop paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Mode {
    /// Initial load bounded by a fixed historical cutoff date.
    Bulk { cutoff: NaiveDate },
    /// Subsequent load bounded by "already stored" detection.
    Incremental,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Bulk { cutoff } => write!(f, "bulk (cutoff {cutoff})"),
            Mode::Incremental => f.write_str("incremental"),
        }
    }
}

/// Why a session stopped paging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    PermissionDenied { detail: String },
    CutoffReached { cutoff: NaiveDate },
    DuplicateBoundary { natural_key: String },
    EndOfListing,
    FetchFailed { page: u32, error: String },
    /// The store could not answer a stop-rule lookup.
    StoreFailed { page: u32, error: String },
    PageLimitReached { limit: u32 },
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::PermissionDenied { detail } => write!(f, "permission denied ({detail})"),
            StopReason::CutoffReached { cutoff } => write!(f, "cutoff date {cutoff} reached"),
            StopReason::DuplicateBoundary { natural_key } => {
                write!(f, "already-stored record {natural_key} reached")
            }
            StopReason::EndOfListing => f.write_str("end of listing"),
            StopReason::FetchFailed { page, error } => {
                write!(f, "fetch of page {page} failed: {error}")
            }
            StopReason::StoreFailed { page, error } => {
                write!(f, "store lookup on page {page} failed: {error}")
            }
            StopReason::PageLimitReached { limit } => write!(f, "page limit {limit} reached"),
            StopReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Progress of a finished scrape session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeSummary {
    pub pages_fetched: u32,
    /// Records kept by the session.
    pub records: usize,
    pub malformed_blocks: usize,
    pub stop_reason: Option<StopReason>,
}

/// What a pipeline run reports back to its trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub mode: Mode,
    pub session: ScrapeSummary,
    pub records_fetched: usize,
    pub records_loaded: usize,
    /// Records that were already stored, or repeated within the batch.
    pub duplicates_skipped: usize,
    pub snapshot: Option<PathBuf>,
}
