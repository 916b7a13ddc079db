//! Permission Gate: consults the site's `robots.txt` once per run.
//!
//! The gate fails closed. A policy that cannot be fetched (transport error,
//! 5xx) or parsed denies the run, and so does an explicit 401/403. A site that
//! publishes no policy (other 4xx) allows it, as crawlers conventionally do.

use crate::session::MAX_PAGE_DELAY;
use std::time::Duration;
use texting_robots::Robot;
use tracing::{info, instrument, warn};
use url::Url;

/// Outcome of the permission check.
#[derive(Debug, Clone, PartialEq)]
pub enum Permission {
    Allowed {
        /// `Crawl-delay` published for our agent, if any.
        crawl_delay: Option<Duration>,
    },
    Denied {
        reason: String,
    },
}

impl Permission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Permission::Allowed { .. })
    }
}

/// Source of the per-run crawl permission.
pub trait CrawlPolicy {
    async fn permission(&self) -> Permission;
}

/// A fixed decision, for callers that have already checked.
impl CrawlPolicy for Permission {
    async fn permission(&self) -> Permission {
        self.clone()
    }
}

/// Location of the crawl policy for a site.
pub fn policy_url(base_url: &Url) -> Result<Url, url::ParseError> {
    base_url.join("/robots.txt")
}

/// Decide from a fetched policy body.
///
/// A published `Crawl-delay` is capped at [`MAX_PAGE_DELAY`]; non-positive or
/// non-finite values are ignored.
pub fn evaluate_policy(body: &str, user_agent: &str, target: &Url) -> Permission {
    let robot = match Robot::new(user_agent, body.as_bytes()) {
        Ok(robot) => robot,
        Err(e) => {
            return Permission::Denied {
                reason: format!("unparseable robots.txt: {e}"),
            };
        }
    };
    if robot.allowed(target.as_str()) {
        Permission::Allowed {
            crawl_delay: robot
                .delay
                .filter(|d| d.is_finite() && *d > 0.0)
                .map(|d| Duration::from_secs_f32(d.min(MAX_PAGE_DELAY.as_secs_f32()))),
        }
    } else {
        Permission::Denied {
            reason: format!("robots.txt disallows {} for {user_agent}", target.path()),
        }
    }
}

/// Decide from an HTTP status and, for 2xx, the body.
pub fn evaluate_response(status: u16, body: &str, user_agent: &str, target: &Url) -> Permission {
    match status {
        200..=299 => evaluate_policy(body, user_agent, target),
        401 | 403 => Permission::Denied {
            reason: format!("robots.txt answered HTTP {status}"),
        },
        400..=499 => Permission::Allowed { crawl_delay: None },
        _ => Permission::Denied {
            reason: format!("robots.txt unavailable (HTTP {status})"),
        },
    }
}

/// Fetches and evaluates `robots.txt` over HTTP.
#[derive(Debug, Clone)]
pub struct RobotsGate {
    client: reqwest::Client,
    base_url: Url,
    target: Url,
    user_agent: String,
}

impl RobotsGate {
    pub fn new(client: reqwest::Client, base_url: Url, target: Url, user_agent: &str) -> Self {
        Self {
            client,
            base_url,
            target,
            user_agent: user_agent.to_string(),
        }
    }
}

impl CrawlPolicy for RobotsGate {
    #[instrument(level = "info", skip(self), fields(target = %self.target))]
    async fn permission(&self) -> Permission {
        let url = match policy_url(&self.base_url) {
            Ok(url) => url,
            Err(e) => {
                return Permission::Denied {
                    reason: format!("invalid base URL: {e}"),
                };
            }
        };
        info!(%url, "Checking crawl policy");

        let response = match self.client.get(url.clone()).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(%url, error = %e, "Could not fetch robots.txt; denying");
                return Permission::Denied {
                    reason: format!("robots.txt fetch failed: {e}"),
                };
            }
        };
        let status = response.status().as_u16();
        let body = if response.status().is_success() {
            match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(%url, error = %e, "Could not read robots.txt; denying");
                    return Permission::Denied {
                        reason: format!("robots.txt unreadable: {e}"),
                    };
                }
            }
        } else {
            String::new()
        };

        let decision = evaluate_response(status, &body, &self.user_agent, &self.target);
        match &decision {
            Permission::Allowed { crawl_delay } => {
                info!(status, ?crawl_delay, "Crawling allowed by robots.txt")
            }
            Permission::Denied { reason } => warn!(status, %reason, "Crawling denied"),
        }
        decision
    }
}
