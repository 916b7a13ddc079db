//! Typed errors for each stage of the ingestion pipeline.
//!
//! Local, recoverable conditions (a malformed row-group, an unparseable
//! field) are not errors here: the segmenter and extractor log and degrade
//! instead. Everything in this module either ends a session or is surfaced
//! to the caller of [`crate::pipeline::Pipeline::run`].

use crate::models::ScrapeSummary;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to retrieve one listing page (or the crawl policy).
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request did not complete within the configured timeout.
    #[error("timed out fetching {url}")]
    Timeout { url: String },

    /// The server answered with a non-success status.
    #[error("HTTP {status} fetching {url}")]
    Status { url: String, status: u16 },

    /// DNS, TLS, or socket level failure.
    #[error("connection error fetching {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The body could not be read as text.
    #[error("failed to read body of {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl FetchError {
    /// Whether a retry policy may try this request again.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Connection { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Body { .. } | FetchError::InvalidUrl(_) => false,
        }
    }

    /// A 404 on a listing page means the listing has run out.
    pub fn is_end_of_listing(&self) -> bool {
        matches!(self, FetchError::Status { status: 404, .. })
    }

    /// Classify a transport error from `reqwest`.
    pub fn from_reqwest(url: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else if let Some(status) = e.status() {
            FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else {
            FetchError::Connection {
                url: url.to_string(),
                source: e,
            }
        }
    }
}

/// Errors raised by the persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored value could not be decoded: {0}")]
    Decode(String),
}

/// Errors raised while loading a batch.
#[derive(Debug, Error)]
pub enum LoadError {
    /// A non-duplicate constraint violation; the whole batch was rolled back.
    #[error("constraint violation loading record {natural_key}: {source}")]
    Conflict {
        natural_key: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The external correction step failed as a whole.
#[derive(Debug, Error)]
pub enum CorrectionError {
    #[error("failed to spawn correction command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("correction command `{command}` exited with {code:?}: {stderr}")]
    Exit {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("correction command `{command}` timed out after {secs}s")]
    Timeout { command: String, secs: u64 },
}

/// The configuration file could not be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid {field} URL: {source}")]
    Url {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },
}

/// Failure of a whole pipeline run.
///
/// Variants raised after paging carry the [`ScrapeSummary`] so callers can
/// still report progress.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("crawling disallowed: {reason}")]
    PermissionDenied { reason: String },

    #[error("correction step failed after fetching {} records: {source}", .session.records)]
    Correction {
        #[source]
        source: CorrectionError,
        session: ScrapeSummary,
        snapshot: Option<PathBuf>,
    },

    #[error("load failed after fetching {} records: {source}", .session.records)]
    Load {
        #[source]
        source: LoadError,
        session: ScrapeSummary,
        snapshot: Option<PathBuf>,
    },

    /// The store could not be queried before paging started.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Snapshot files could not be written or read. `session` is set when
    /// the failure came after paging.
    #[error("output error: {source}")]
    Output {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
        session: Option<ScrapeSummary>,
    },

    /// Loading a saved snapshot back into the store failed.
    #[error("loading snapshot {} failed: {source}", .snapshot.display())]
    SnapshotLoad {
        #[source]
        source: LoadError,
        snapshot: PathBuf,
    },
}
