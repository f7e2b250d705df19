//! # archfeed
//!
//! Ingests architecture and design publications that offer no usable feeds.
//! Each run discovers article links on every registered source, skips the
//! ones already in the dedup ledger, renders the rest, asks a cheap model
//! whether they belong in the digest, asks a stronger model for a structured
//! summary, and files accepted candidates into a date-partitioned object
//! store (`YYYY/MonthName/Week-N/YYYY-MM-DD/candidates/`).
//!
//! ## Usage
//!
//! ```sh
//! archfeed                                  # full run (R2 + Postgres from env)
//! archfeed --sources domus --no-filter      # one source, no relevance filter
//! archfeed --dry-run -o ./out               # local trial run
//! archfeed --ledger-stats                   # maintenance
//! ```
//!
//! ## Architecture
//!
//! 1. **Discovery**: each source scraper turns listing pages into candidate URLs
//! 2. **Gate**: the ledger drops URLs seen on earlier runs
//! 3. **Fetch**: headless render (with HTTP fallback where a source needs it)
//! 4. **Filter / Summarize**: two model tiers via `awful_aj`
//! 5. **Store**: hero image, then the candidate record, then the day manifest

use chrono::Local;
use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod browser;
mod cli;
mod config;
mod error;
mod fetcher;
mod filter;
mod ledger;
mod models;
mod pipeline;
mod recorder;
mod registry;
mod report;
mod scrapers;
mod storage;
mod summarizer;
mod utils;

use api::{AwfulAsk, RetryAsk};
use browser::renderer_chain;
use cli::Cli;
use config::PipelineConfig;
use fetcher::ArticleFetcher;
use filter::AiFilter;
use ledger::{DedupLedger, MemorySeenStore, PgSeenStore};
use pipeline::{Orchestrator, PipelineDeps};
use recorder::{FetchRecorder, NoopRecorder, PgRecorder};
use registry::ScraperRegistry;
use report::write_report;
use storage::{FsStore, ObjectStore, S3Settings, S3Store, StorageWriter};
use summarizer::Summarizer;

const DRY_RUN_OUTPUT_DIR: &str = "./archfeed-out";

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
    info!("archfeed starting up");

    let args = Cli::parse();
    debug!(sources = ?args.sources, dry_run = args.dry_run, "Parsed CLI arguments");
    let config = PipelineConfig::resolve(&args)?;

    let mut registry = ScraperRegistry::new();
    scrapers::register_builtin(&mut registry)?;
    info!(sources = registry.len(), "Registered sources");

    if args.list_sources {
        for d in registry.descriptors() {
            println!("{:<34} {:<36} {:<14} {}", d.source_id, d.display_name, d.region, d.homepage_url);
        }
        return Ok(());
    }

    // ---- Ledger ----
    let pg = if args.dry_run {
        None
    } else {
        let url = args
            .database_url
            .as_deref()
            .ok_or("DATABASE_URL is required unless --dry-run is given")?;
        Some(PgSeenStore::connect(url, config.db_max_connections).await?)
    };
    let recorder: Arc<dyn FetchRecorder> = match (&pg, args.record_fetches) {
        (Some(store), true) => Arc::new(PgRecorder::new(store.pool().clone())),
        (None, true) => {
            warn!("--record-fetches needs the Postgres ledger; not recording");
            Arc::new(NoopRecorder)
        }
        _ => Arc::new(NoopRecorder),
    };
    let ledger = match pg {
        Some(store) => DedupLedger::new(Arc::new(store), args.test_mode),
        None => {
            info!("Dry run: using an in-memory ledger");
            DedupLedger::new(Arc::new(MemorySeenStore::new()), args.test_mode)
        }
    };

    if args.is_maintenance() {
        return maintenance(&args, &ledger).await;
    }

    // ---- Object store ----
    let store = open_store(&args).await?;
    info!(store = %store.describe(), "Object store ready");
    let writer = StorageWriter::new(store, config.store_retries, config.retry_base_delay());

    // ---- Renderers ----
    let (primary, fallback) = renderer_chain(
        args.browserless_url.as_deref(),
        args.browser_token.as_deref(),
        config.navigation_timeout(),
    )?;
    let fetcher = Arc::new(ArticleFetcher::new(primary, fallback, config.image_timeout())?);

    // ---- Models ----
    let filter = if args.no_filter {
        info!("Relevance filter disabled");
        AiFilter::pass_through()
    } else {
        let tier = AwfulAsk::load(args.filter_config.as_deref(), &args.filter_template).await?;
        AiFilter::model(Box::new(RetryAsk::new(
            tier,
            config.filter_retries,
            config.retry_base_delay(),
        )))
    };
    let summary_tier = AwfulAsk::load(args.summary_config.as_deref(), &args.summary_template).await?;
    let summarizer = Summarizer::new(Box::new(RetryAsk::new(
        summary_tier,
        config.summary_retries,
        config.retry_base_delay(),
    )));

    // ---- Run ----
    let mut snapshot = registry.snapshot();
    if !args.sources.is_empty() {
        let (selected, unknown) = snapshot.select(&args.sources);
        for id in &unknown {
            warn!(source_id = %id, "Unknown source id; ignoring");
        }
        snapshot = selected;
    }
    if snapshot.is_empty() {
        error!("No sources selected; nothing to do");
        return Err("no sources selected".into());
    }

    let processing_date = args.date.unwrap_or_else(|| Local::now().date_naive());
    let orchestrator = Orchestrator::new(
        PipelineDeps {
            pages: fetcher.clone(),
            fetcher,
            ledger,
            filter,
            summarizer,
            writer,
            recorder,
        },
        &config,
    );
    let report = orchestrator.run(&snapshot, processing_date).await;
    report.log();

    if let Some(path) = args.report_json.as_deref() {
        if let Err(e) = write_report(&report, path).await {
            error!(%path, error = %e, "Failed to write run report");
        }
    }

    let elapsed = start_time.elapsed();
    info!(?elapsed, secs = elapsed.as_secs(), "Execution complete");
    Ok(())
}

/// Local directory for `--output-dir` or `--dry-run`, otherwise the bucket.
async fn open_store(args: &Cli) -> Result<Arc<dyn ObjectStore>, Box<dyn Error>> {
    let local_dir = match (&args.output_dir, args.dry_run) {
        (Some(dir), _) => Some(dir.as_str()),
        (None, true) => Some(DRY_RUN_OUTPUT_DIR),
        (None, false) => None,
    };
    if let Some(dir) = local_dir {
        return Ok(Arc::new(FsStore::open(dir).await?));
    }

    let bucket = args.r2_bucket_name.as_deref().ok_or("R2_BUCKET_NAME is required")?;
    let key = args.r2_access_key_id.as_deref().ok_or("R2_ACCESS_KEY_ID is required")?;
    let secret = args
        .r2_secret_access_key
        .as_deref()
        .ok_or("R2_SECRET_ACCESS_KEY is required")?;
    let settings = match (args.s3_endpoint.as_deref(), args.r2_account_id.as_deref()) {
        (Some(endpoint), _) => S3Settings {
            bucket: bucket.to_string(),
            endpoint: endpoint.to_string(),
            region: "auto".to_string(),
            access_key_id: key.to_string(),
            secret_access_key: secret.to_string(),
        },
        (None, Some(account)) => S3Settings::r2(account, bucket, key, secret),
        (None, None) => return Err("either R2_ACCOUNT_ID or S3_ENDPOINT is required".into()),
    };
    Ok(Arc::new(S3Store::new(&settings)?))
}

#[instrument(level = "info", skip_all)]
async fn maintenance(args: &Cli, ledger: &DedupLedger) -> Result<(), Box<dyn Error>> {
    if let Some(source_id) = args.clear_source.as_deref() {
        let deleted = ledger.clear_source(source_id).await?;
        println!("cleared {deleted} tracked URLs for {source_id}");
    }

    if args.ledger_stats {
        let stats = ledger.stats(None).await?;
        println!("total tracked URLs: {}", stats.total);
        if let (Some(oldest), Some(newest)) = (stats.oldest_seen, stats.newest_seen) {
            println!("first seen between {oldest} and {newest}");
        }
        for (source_id, count) in ledger.source_counts().await? {
            println!("{source_id:<34} {count}");
        }
    }
    Ok(())
}
