//! Page Fetcher: retrieves one listing page per call.
//!
//! [`PageSource`] is the seam the session controller pages through. The HTTP
//! implementation does no retrying of its own; wrap it in
//! [`crate::retry::RetryFetch`] to add a backoff policy.

use crate::error::FetchError;
use crate::models::RawPage;
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

/// Anything that can produce listing pages by index.
pub trait PageSource {
    /// Fetch page `page` (1-based).
    async fn fetch_page(&self, page: u32) -> Result<RawPage, FetchError>;
}

/// Fetches listing pages over HTTP with an identifying user agent.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    listing_url: Url,
}

impl HttpFetcher {
    /// Build a fetcher for `listing_url` (e.g. `https://www.thegradcafe.com/survey/index.php`).
    pub fn new(listing_url: Url, user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|source| FetchError::Connection {
                url: listing_url.to_string(),
                source,
            })?;
        Ok(Self {
            client,
            listing_url,
        })
    }

    /// The underlying client, shared with the permission gate.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn listing_url(&self) -> &Url {
        &self.listing_url
    }

    /// URL of page `page`: the listing URL with `page=N` set.
    pub fn page_url(&self, page: u32) -> Url {
        let mut url = self.listing_url.clone();
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "page")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair("page", &page.to_string());
        url
    }
}

impl PageSource for HttpFetcher {
    #[instrument(level = "info", skip(self))]
    async fn fetch_page(&self, page: u32) -> Result<RawPage, FetchError> {
        let url = self.page_url(page);
        debug!(%url, "Requesting listing page");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|source| FetchError::Body {
            url: url.to_string(),
            source,
        })?;
        info!(bytes = body.len(), "Fetched listing page");
        Ok(RawPage::new(page, body))
    }
}
