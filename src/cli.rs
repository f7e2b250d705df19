//! Command-line interface definitions for archfeed.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Every credential and endpoint can also be provided through an environment
//! variable, so scheduled runs need no flags at all.

use chrono::NaiveDate;
use clap::Parser;

/// Command-line arguments for archfeed.
///
/// # Examples
///
/// ```sh
/// # Full run against R2 and the Postgres ledger (credentials from env)
/// archfeed
///
/// # Two sources only, without the relevance filter
/// archfeed --sources domus,bauwelt --no-filter
///
/// # Local trial run: in-memory ledger, files under ./out
/// archfeed --dry-run --output-dir ./out
///
/// # Maintenance
/// archfeed --list-sources
/// archfeed --ledger-stats
/// archfeed --clear-source domus
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a pipeline config YAML (concurrency, retries, timeouts)
    #[arg(short, long, env = "ARCHFEED_CONFIG")]
    pub config: Option<String>,

    /// Only run these source ids (comma separated or repeated)
    #[arg(short, long, value_delimiter = ',', num_args = 1..)]
    pub sources: Vec<String>,

    /// Skip the relevance filter and summarize every new article
    #[arg(long)]
    pub no_filter: bool,

    /// Print the registered sources and exit
    #[arg(long)]
    pub list_sources: bool,

    /// Print ledger statistics and exit
    #[arg(long)]
    pub ledger_stats: bool,

    /// Forget every ledger row of one source and exit
    #[arg(long, value_name = "SOURCE_ID")]
    pub clear_source: Option<String>,

    /// Use an in-memory ledger and write to --output-dir (default ./archfeed-out)
    #[arg(long)]
    pub dry_run: bool,

    /// Write objects to this local directory instead of the S3 bucket
    #[arg(short, long)]
    pub output_dir: Option<String>,

    /// Also write the run report as JSON to this path
    #[arg(long)]
    pub report_json: Option<String>,

    /// Processing date (YYYY-MM-DD) used for storage paths; defaults to today
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// Ignore the ledger when gating discovered URLs (articles are still marked)
    #[arg(long, env = "SCRAPER_TEST_MODE")]
    pub test_mode: bool,

    /// Record every fetched article in the fetch_log table
    #[arg(long, env = "RECORD_FETCHES")]
    pub record_fetches: bool,

    /// Postgres URL of the dedup ledger
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Browserless base URL (e.g. https://production-sfo.browserless.io)
    #[arg(long, env = "BROWSERLESS_URL")]
    pub browserless_url: Option<String>,

    /// Browserless API token
    #[arg(long, env = "BROWSER_TOKEN", hide_env_values = true)]
    pub browser_token: Option<String>,

    /// Cloudflare account id; derives the R2 endpoint
    #[arg(long, env = "R2_ACCOUNT_ID")]
    pub r2_account_id: Option<String>,

    /// Explicit S3 endpoint; overrides the R2 endpoint
    #[arg(long, env = "S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    #[arg(long, env = "R2_ACCESS_KEY_ID", hide_env_values = true)]
    pub r2_access_key_id: Option<String>,

    #[arg(long, env = "R2_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub r2_secret_access_key: Option<String>,

    #[arg(long, env = "R2_BUCKET_NAME")]
    pub r2_bucket_name: Option<String>,

    /// awful_aj config for the filter model (defaults to the awful_aj config dir)
    #[arg(long, env = "FILTER_MODEL_CONFIG")]
    pub filter_config: Option<String>,

    /// awful_aj template name for the filter model
    #[arg(long, env = "FILTER_MODEL_TEMPLATE", default_value = "arch_filter")]
    pub filter_template: String,

    /// awful_aj config for the summary model
    #[arg(long, env = "SUMMARY_MODEL_CONFIG")]
    pub summary_config: Option<String>,

    /// awful_aj template name for the summary model
    #[arg(long, env = "SUMMARY_MODEL_TEMPLATE", default_value = "arch_summary")]
    pub summary_template: String,

    /// Override: sources processed at once
    #[arg(long)]
    pub source_concurrency: Option<usize>,

    /// Override: articles in flight per source
    #[arg(long)]
    pub article_concurrency: Option<usize>,

    /// Override: new articles per source per run
    #[arg(long)]
    pub max_new_articles: Option<usize>,

    /// Override: whole-run deadline in seconds
    #[arg(long)]
    pub run_timeout_secs: Option<u64>,
}

impl Cli {
    /// True when the invocation is a maintenance command rather than a run.
    pub fn is_maintenance(&self) -> bool {
        self.list_sources || self.ledger_stats || self.clear_source.is_some()
    }
}
