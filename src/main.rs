//! # gradcafe_ingest
//!
//! Pages through The GradCafe's admissions listing, parses each posting into
//! a structured record, hands the batch to an optional name-correction
//! command and loads it into SQLite without duplicating earlier runs.
//!
//! ## Usage
//!
//! ```sh
//! gradcafe_ingest --mode bulk --cutoff 2020-01-01 -d applicants.sqlite
//! gradcafe_ingest -d applicants.sqlite          # incremental update
//! gradcafe_ingest --load-snapshot output/2025-09-23/bulk_061502.json
//! ```
//!
//! ## Architecture
//!
//! 1. **Permission**: check `robots.txt` for the listing path
//! 2. **Paging**: fetch, segment and extract pages until the mode's stop rule fires
//! 3. **Snapshot**: write the parsed records as JSON
//! 4. **Correction**: run the configured command over the snapshot
//! 5. **Load**: upsert into the store keyed by natural key

use clap::Parser;
use gradcafe_ingest::cli::Cli;
use gradcafe_ingest::config::PipelineConfig;
use gradcafe_ingest::pipeline::{Pipeline, PipelineSettings};
use gradcafe_ingest::retry::RetryFetch;
use gradcafe_ingest::scrapers::fetch::HttpFetcher;
use gradcafe_ingest::scrapers::robots::RobotsGate;
use gradcafe_ingest::store::SqliteStore;
use std::error::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("gradcafe_ingest starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let mut config = PipelineConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    let mode = args.mode(&config);
    info!(
        %mode,
        database = %config.database.display(),
        output_dir = %config.output_dir.display(),
        "Configuration ready"
    );

    // ---- Wire the stages ----
    let base_url = config.base_url()?;
    let listing_url = config.listing_url()?;
    let fetcher = HttpFetcher::new(
        listing_url.clone(),
        &config.user_agent,
        config.request_timeout(),
    )?;
    let gate = RobotsGate::new(
        fetcher.client().clone(),
        base_url,
        listing_url,
        &config.user_agent,
    );
    let source = RetryFetch::from_policy(fetcher, config.retry);
    let store = SqliteStore::open(&config.database)?;
    let settings = PipelineSettings {
        session: config.session_config()?,
        default_cutoff: config.default_cutoff,
        output_dir: config.output_dir.clone(),
    };
    let mut pipeline = Pipeline::new(source, gate, config.corrector(), store, settings);

    if let Some(snapshot) = &args.load_snapshot {
        info!(snapshot = %snapshot.display(), "Loading saved snapshot");
        let report = match pipeline
            .load_snapshot(snapshot, args.corrections.as_deref())
            .await
        {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Snapshot load failed");
                return Err(e.into());
            }
        };
        let elapsed = start_time.elapsed();
        info!(
            received = report.received,
            loaded = report.inserted,
            duplicates = report.duplicates,
            secs = elapsed.as_secs(),
            "Snapshot loaded"
        );
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    // ---- Ctrl-C stops between pages ----
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current page");
            trigger.cancel();
        }
    });

    let result = pipeline.run(mode, &cancel).await;
    let elapsed = start_time.elapsed();

    match result {
        Ok(summary) => {
            info!(
                mode = %summary.mode,
                pages = summary.session.pages_fetched,
                fetched = summary.records_fetched,
                loaded = summary.records_loaded,
                duplicates = summary.duplicates_skipped,
                malformed = summary.session.malformed_blocks,
                stop_reason = ?summary.session.stop_reason.as_ref().map(ToString::to_string),
                secs = elapsed.as_secs(),
                millis = elapsed.subsec_millis(),
                "Execution complete"
            );
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, secs = elapsed.as_secs(), "Run failed");
            Err(e.into())
        }
    }
}
