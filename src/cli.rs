//! Command-line interface definitions.
//!
//! Flags override the YAML config file, which overrides built-in defaults.
//! Paths and the corrector command can also come from the environment.

use crate::config::PipelineConfig;
use crate::models::Mode;
use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Page back to a cutoff date
    Bulk,
    /// Page back to the newest already-stored posting
    Incremental,
}

/// Command-line arguments.
///
/// # Examples
///
/// ```sh
/// # First load, everything since 2020
/// gradcafe_ingest --mode bulk --cutoff 2020-01-01 -d applicants.sqlite
///
/// # Scheduled update with a name normalizer
/// gradcafe_ingest -c config.yaml --corrector "python3 normalize.py --file"
///
/// # Load a run's snapshot after its correction step failed
/// gradcafe_ingest --load-snapshot output/2025-09-23/incremental_181007.json \
///     --corrections fixed.jsonl
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// How far back to page
    #[arg(short, long, value_enum, default_value_t = ModeArg::Incremental)]
    pub mode: ModeArg,

    /// Oldest date_added kept in bulk mode (YYYY-MM-DD)
    #[arg(long)]
    pub cutoff: Option<NaiveDate>,

    /// Optional path to config.yaml file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// SQLite database file
    #[arg(short, long, env = "GRADCAFE_DATABASE")]
    pub database: Option<PathBuf>,

    /// Directory for JSON snapshots
    #[arg(short, long, env = "GRADCAFE_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Stop after this many pages (0 for no limit)
    #[arg(long)]
    pub max_pages: Option<u32>,

    /// First listing page to fetch
    #[arg(long)]
    pub start_page: Option<u32>,

    /// Milliseconds between page fetches
    #[arg(long)]
    pub page_delay_ms: Option<u64>,

    /// Correction command; the snapshot path is appended as its last argument
    #[arg(long, env = "GRADCAFE_CORRECTOR")]
    pub corrector: Option<String>,

    /// User agent for robots.txt matching and requests
    #[arg(long, env = "GRADCAFE_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Load a saved snapshot (JSON or JSON Lines) instead of scraping
    #[arg(long, value_name = "PATH")]
    pub load_snapshot: Option<PathBuf>,

    /// Corrections (JSON Lines) to merge into the snapshot before loading
    #[arg(long, value_name = "PATH", requires = "load_snapshot")]
    pub corrections: Option<PathBuf>,
}

impl Cli {
    /// Layer the flags that were given over `config`.
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(database) = &self.database {
            config.database = database.clone();
        }
        if let Some(output_dir) = &self.output_dir {
            config.output_dir = output_dir.clone();
        }
        if let Some(max_pages) = self.max_pages {
            config.max_pages = max_pages;
        }
        if let Some(start_page) = self.start_page {
            config.start_page = start_page;
        }
        if let Some(delay) = self.page_delay_ms {
            config.page_delay_ms = delay;
        }
        if let Some(user_agent) = &self.user_agent {
            config.user_agent = user_agent.clone();
        }
        if let Some(corrector) = &self.corrector {
            let mut parts = corrector.split_whitespace().map(str::to_string);
            config.corrector.command = parts.next();
            config.corrector.args = parts.collect();
        }
    }

    /// The requested mode; bulk without `--cutoff` uses the configured default.
    pub fn mode(&self, config: &PipelineConfig) -> Mode {
        match self.mode {
            ModeArg::Bulk => Mode::Bulk {
                cutoff: self.cutoff.unwrap_or(config.default_cutoff),
            },
            ModeArg::Incremental => Mode::Incremental,
        }
    }
}
