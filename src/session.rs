//! Session Controller: pages through the listing until a stop rule fires.
//!
//! One session is a sequence of `Fetching → Parsing → Deciding` rounds, one
//! per page, ending in `Stopped`. Paging and parsing are shared by both
//! modes; what differs is the [`StopRule`] consulted after each page:
//!
//! - [`BulkCutoff`]: stop on the page that reaches postings older than a
//!   fixed date.
//! - [`AlreadyStored`]: stop at the first posting the store already holds.
//!
//! The controller never stops mid-page and never drops records it has
//! already kept, whatever the stop reason. Fetch and store failures end the
//! session with a [`StopReason`] rather than an error.

use crate::error::StoreError;
use crate::models::{ParsedRecord, ScrapeSummary, StopReason};
use crate::scrapers::extract::extract_page;
use crate::scrapers::fetch::PageSource;
use crate::scrapers::robots::{CrawlPolicy, Permission};
use crate::scrapers::segment::segment_page;
use crate::store::RecordStore;
use chrono::NaiveDate;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub const MIN_PAGE_DELAY: Duration = Duration::from_millis(250);
pub const MAX_PAGE_DELAY: Duration = Duration::from_secs(60);

/// Keep the inter-page delay polite but bounded.
pub fn clamp_delay(delay: Duration) -> Duration {
    delay.clamp(MIN_PAGE_DELAY, MAX_PAGE_DELAY)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Fetching,
    Parsing,
    Deciding,
    Stopped,
}

/// What a stop rule decided about one page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageVerdict {
    /// Records from the page that belong in this session.
    pub kept: Vec<ParsedRecord>,
    /// Set when paging must end after this page.
    pub stop: Option<StopReason>,
}

impl PageVerdict {
    fn keep_all(records: Vec<ParsedRecord>) -> Self {
        Self {
            kept: records,
            stop: None,
        }
    }
}

/// Per-page stop predicate.
pub trait StopRule {
    fn judge(&self, records: Vec<ParsedRecord>) -> Result<PageVerdict, StoreError>;
}

/// Bulk mode: keep postings on or after `cutoff`, stop on the first page
/// that holds anything older.
#[derive(Debug, Clone, Copy)]
pub struct BulkCutoff {
    pub cutoff: NaiveDate,
}

impl StopRule for BulkCutoff {
    fn judge(&self, records: Vec<ParsedRecord>) -> Result<PageVerdict, StoreError> {
        let total = records.len();
        let kept: Vec<ParsedRecord> = records
            .into_iter()
            .filter(|r| r.date_added >= self.cutoff)
            .collect();
        if kept.len() == total {
            return Ok(PageVerdict::keep_all(kept));
        }
        debug!(
            cutoff = %self.cutoff,
            discarded = total - kept.len(),
            "Page reaches past cutoff"
        );
        Ok(PageVerdict {
            kept,
            stop: Some(StopReason::CutoffReached {
                cutoff: self.cutoff,
            }),
        })
    }
}

/// Incremental mode: stop at the first posting that is already stored, or
/// that is older than anything stored.
pub struct AlreadyStored<'a, S> {
    store: &'a S,
    floor: Option<NaiveDate>,
}

impl<'a, S: RecordStore> AlreadyStored<'a, S> {
    pub fn new(store: &'a S) -> Result<Self, StoreError> {
        Ok(Self {
            floor: store.latest_date_added()?,
            store,
        })
    }

    /// Newest `date_added` in the store when the session started.
    pub fn floor(&self) -> Option<NaiveDate> {
        self.floor
    }
}

impl<S: RecordStore> StopRule for AlreadyStored<'_, S> {
    fn judge(&self, records: Vec<ParsedRecord>) -> Result<PageVerdict, StoreError> {
        let mut kept = Vec::with_capacity(records.len());
        for r in records {
            let key = r.natural_key();
            let older = self.floor.is_some_and(|floor| r.date_added < floor);
            if older || self.store.contains_key(&key)? {
                debug!(natural_key = %key, older, "Reached stored postings");
                return Ok(PageVerdict {
                    kept,
                    stop: Some(StopReason::DuplicateBoundary { natural_key: key }),
                });
            }
            kept.push(r);
        }
        Ok(PageVerdict::keep_all(kept))
    }
}

/// The rule for a run, picked at runtime.
pub enum ModeRule<'a, S> {
    Bulk(BulkCutoff),
    Incremental(AlreadyStored<'a, S>),
}

impl<S: RecordStore> StopRule for ModeRule<'_, S> {
    fn judge(&self, records: Vec<ParsedRecord>) -> Result<PageVerdict, StoreError> {
        match self {
            ModeRule::Bulk(rule) => rule.judge(records),
            ModeRule::Incremental(rule) => rule.judge(records),
        }
    }
}

/// Paging settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Resolves relative result links.
    pub base_url: Url,
    pub start_page: u32,
    /// Upper bound on pages fetched; `0` means no bound.
    pub max_pages: u32,
    pub page_delay: Duration,
    /// Postings a full page normally carries. Only used for warnings.
    pub expected_rows_per_page: usize,
}

/// State and output of one paging session.
#[derive(Debug)]
pub struct ScrapeSession {
    state: SessionState,
    next_page: u32,
    records: Vec<ParsedRecord>,
    pages_fetched: u32,
    malformed_blocks: usize,
    stop_reason: Option<StopReason>,
}

impl ScrapeSession {
    fn new(start_page: u32) -> Self {
        Self {
            state: SessionState::Fetching,
            next_page: start_page,
            records: Vec::new(),
            pages_fetched: 0,
            malformed_blocks: 0,
            stop_reason: None,
        }
    }

    fn enter(&mut self, state: SessionState) {
        debug!(from = ?self.state, to = ?state, page = self.next_page, "Session transition");
        self.state = state;
    }

    fn stop(&mut self, reason: StopReason) {
        info!(%reason, pages = self.pages_fetched, records = self.records.len(), "Session stopped");
        self.stop_reason = Some(reason);
        self.enter(SessionState::Stopped);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn records(&self) -> &[ParsedRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ParsedRecord> {
        self.records
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    pub fn summary(&self) -> ScrapeSummary {
        ScrapeSummary {
            pages_fetched: self.pages_fetched,
            records: self.records.len(),
            malformed_blocks: self.malformed_blocks,
            stop_reason: self.stop_reason.clone(),
        }
    }
}

/// Drives a [`PageSource`] page by page under a [`StopRule`].
pub struct SessionController<'a, F> {
    source: &'a F,
    config: SessionConfig,
}

impl<'a, F: PageSource> SessionController<'a, F> {
    pub fn new(source: &'a F, config: SessionConfig) -> Self {
        Self { source, config }
    }

    /// Delay between pages: the configured delay or the site's crawl delay,
    /// whichever is longer, clamped.
    pub fn effective_delay(&self, crawl_delay: Option<Duration>) -> Duration {
        let delay = match crawl_delay {
            Some(site) => self.config.page_delay.max(site),
            None => self.config.page_delay,
        };
        clamp_delay(delay)
    }

    #[instrument(level = "info", skip_all, fields(start = self.config.start_page))]
    pub async fn run<P, R>(
        &self,
        policy: &P,
        rule: &R,
        cancel: &CancellationToken,
    ) -> ScrapeSession
    where
        P: CrawlPolicy,
        R: StopRule,
    {
        let mut session = ScrapeSession::new(self.config.start_page);

        let delay = match policy.permission().await {
            Permission::Allowed { crawl_delay } => self.effective_delay(crawl_delay),
            Permission::Denied { reason } => {
                session.stop(StopReason::PermissionDenied { detail: reason });
                return session;
            }
        };
        debug!(?delay, "Inter-page delay");

        loop {
            if cancel.is_cancelled() {
                session.stop(StopReason::Cancelled);
                break;
            }
            if self.config.max_pages > 0 && session.pages_fetched >= self.config.max_pages {
                session.stop(StopReason::PageLimitReached {
                    limit: self.config.max_pages,
                });
                break;
            }
            if session.pages_fetched > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        session.stop(StopReason::Cancelled);
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            session.enter(SessionState::Fetching);
            let page = session.next_page;
            let raw = match self.source.fetch_page(page).await {
                Ok(raw) => raw,
                Err(e) if e.is_end_of_listing() => {
                    session.stop(StopReason::EndOfListing);
                    break;
                }
                Err(e) => {
                    warn!(page, error = %e, "Fetch failed; keeping partial results");
                    session.stop(StopReason::FetchFailed {
                        page,
                        error: e.to_string(),
                    });
                    break;
                }
            };
            session.pages_fetched += 1;

            session.enter(SessionState::Parsing);
            let segmentation = segment_page(&raw.body);
            if segmentation.boundaries == 0 {
                session.stop(StopReason::EndOfListing);
                break;
            }
            let expected = self.config.expected_rows_per_page;
            if segmentation.boundaries > expected {
                warn!(
                    page,
                    postings = segmentation.boundaries,
                    expected,
                    "More postings than a page normally holds"
                );
            } else if segmentation.boundaries < expected {
                debug!(page, postings = segmentation.boundaries, expected, "Short page");
            }
            session.malformed_blocks += segmentation.malformed.len();
            let records = extract_page(&raw, &segmentation.blocks, &self.config.base_url);

            session.enter(SessionState::Deciding);
            let parsed = records.len();
            let verdict = match rule.judge(records) {
                Ok(verdict) => verdict,
                Err(e) => {
                    warn!(page, error = %e, "Store lookup failed; keeping partial results");
                    session.stop(StopReason::StoreFailed {
                        page,
                        error: e.to_string(),
                    });
                    break;
                }
            };
            info!(
                page,
                parsed,
                kept = verdict.kept.len(),
                malformed = segmentation.malformed.len(),
                "Page processed"
            );
            session.records.extend(verdict.kept);
            if let Some(reason) = verdict.stop {
                session.stop(reason);
                break;
            }
            session.next_page += 1;
        }

        session
    }
}
