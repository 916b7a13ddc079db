//! Runtime configuration.
//!
//! Values come from built-in defaults, overridden by an optional YAML file,
//! overridden in turn by command-line flags (see [`crate::cli::Cli::apply`]).
//!
//! ```yaml
//! base_url: https://www.thegradcafe.com/
//! listing_path: survey/index.php
//! page_delay_ms: 1500
//! default_cutoff: 2020-01-01
//! database: data/gradcafe.sqlite
//! retry:
//!   max_retries: 5
//! corrector:
//!   command: python3
//!   args: [normalize.py, --file]
//!   timeout_secs: 900
//! ```

use crate::correction::{AnyCorrector, CommandCorrector, Passthrough};
use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use crate::session::{SessionConfig, clamp_delay};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};
use url::Url;

/// External correction command settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectorConfig {
    /// Program to run; no command means records pass through uncorrected.
    pub command: Option<String>,
    /// Arguments placed before the snapshot path.
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for CorrectorConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub base_url: String,
    /// Listing path relative to `base_url`.
    pub listing_path: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    /// Delay between page fetches, clamped to 250 ms..60 s.
    pub page_delay_ms: u64,
    /// Upper bound on pages per session; `0` means no bound.
    pub max_pages: u32,
    pub start_page: u32,
    pub expected_rows_per_page: usize,
    /// Bulk cutoff when none is given, and for incremental runs against an
    /// empty store.
    pub default_cutoff: NaiveDate,
    pub database: PathBuf,
    pub output_dir: PathBuf,
    pub retry: RetryPolicy,
    pub corrector: CorrectorConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.thegradcafe.com/".to_string(),
            listing_path: "survey/index.php".to_string(),
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_secs: 30,
            page_delay_ms: 1_000,
            max_pages: 0,
            start_page: 1,
            expected_rows_per_page: 20,
            default_cutoff: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default(),
            database: PathBuf::from("gradcafe.sqlite"),
            output_dir: PathBuf::from("output"),
            retry: RetryPolicy::default(),
            corrector: CorrectorConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from `path`, or return the defaults when no file is given.
    #[instrument(level = "info", skip_all, fields(path = ?path))]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&text, path)?;
        info!("Loaded configuration");
        Ok(config)
    }

    /// Parse YAML text; `origin` is only used in error messages.
    pub fn from_yaml(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.base_url).map_err(|source| ConfigError::Url {
            field: "base_url",
            source,
        })
    }

    pub fn listing_url(&self) -> Result<Url, ConfigError> {
        self.base_url()?
            .join(&self.listing_path)
            .map_err(|source| ConfigError::Url {
                field: "listing_path",
                source,
            })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn page_delay(&self) -> Duration {
        clamp_delay(Duration::from_millis(self.page_delay_ms))
    }

    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        Ok(SessionConfig {
            base_url: self.base_url()?,
            start_page: self.start_page.max(1),
            max_pages: self.max_pages,
            page_delay: self.page_delay(),
            expected_rows_per_page: self.expected_rows_per_page,
        })
    }

    pub fn corrector(&self) -> AnyCorrector {
        match &self.corrector.command {
            Some(command) if !command.trim().is_empty() => AnyCorrector::Command(CommandCorrector::new(
                command.trim(),
                self.corrector.args.clone(),
                Duration::from_secs(self.corrector.timeout_secs),
            )),
            _ => AnyCorrector::Passthrough(Passthrough),
        }
    }
}
