//! Babble-Ingest main entry point
//!
//! This is the command-line interface for the Babble-Ingest content acquisition service.

use anyhow::{bail, Context, Result};
use babble_ingest::config::{load_config_with_hash, Config};
use babble_ingest::crawler::run_ingest;
use babble_ingest::storage::{open_link_store, LinkStore};
use babble_ingest::url::normalize_all;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Babble-Ingest: polite content acquisition for foreign-language news
///
/// Babble-Ingest claims links one domain at a time under a politeness
/// cooldown, fetches and parses each page, stores its HTML and text, and
/// feeds discovered links back into its link store.
#[derive(Parser, Debug)]
#[command(name = "babble-ingest")]
#[command(version = "1.0.0")]
#[command(about = "Polite content acquisition for a news crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the ingestion workers until Ctrl-C (default)
    Run,

    /// Add seed URLs, making already-known ones eligible for fetching again
    Seed {
        /// URLs to seed
        #[arg(value_name = "URL")]
        urls: Vec<String>,

        /// File with one URL per line
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,

        /// Identifier of the source these URLs came from
        #[arg(long)]
        source_id: Option<String>,

        /// Seed ingest time as Unix seconds (defaults to now)
        #[arg(long, value_name = "SECS")]
        timestamp: Option<i64>,
    },

    /// Show statistics from the link store and exit
    Stats,

    /// Validate config and show the effective settings without running
    DryRun,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => handle_run(config).await,
        Command::Seed {
            urls,
            file,
            source_id,
            timestamp,
        } => handle_seed(&config, urls, file.as_deref(), source_id.as_deref(), timestamp),
        Command::Stats => handle_stats(&config),
        Command::DryRun => handle_dry_run(&config),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("babble_ingest=info,warn"),
            1 => EnvFilter::new("babble_ingest=debug,info"),
            2 => EnvFilter::new("babble_ingest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the default mode: runs the worker pool
async fn handle_run(config: Config) -> Result<()> {
    tracing::info!(
        "Cooldown {}s, refresh every {}s, {} workers",
        config.scheduler.cooldown_secs,
        config.scheduler.refresh_period_secs,
        config.ingest.workers
    );

    run_ingest(config).await.context("Ingestion failed")?;
    Ok(())
}

/// Handles the seed subcommand: upserts seed URLs into the link store
fn handle_seed(
    config: &Config,
    mut urls: Vec<String>,
    file: Option<&Path>,
    source_id: Option<&str>,
    timestamp: Option<i64>,
) -> Result<()> {
    if let Some(file) = file {
        let contents = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read seed file {}", file.display()))?;
        urls.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }

    if urls.is_empty() {
        bail!("No seed URLs given");
    }

    let links = normalize_all(urls.iter().map(String::as_str));
    let dropped = urls.len() - links.len();
    if dropped > 0 {
        tracing::warn!("Dropped {} URLs that could not be normalized", dropped);
    }

    let mut store = open_link_store(
        Path::new(&config.storage.database_path),
        config.ingest.fetch_version(),
    )?;
    let timestamp = timestamp.unwrap_or_else(|| Utc::now().timestamp());
    store.upsert_seed_links(&links, source_id, Some(timestamp))?;

    println!("✓ Seeded {} links", links.len());
    Ok(())
}

/// Handles the stats subcommand: shows statistics from the link store
fn handle_stats(config: &Config) -> Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let version = config.ingest.fetch_version();
    let store = open_link_store(Path::new(&config.storage.database_path), version)?;
    let stats = store.stats()?;

    println!("Fetch version:         {}", version);
    println!("Total links:           {}", stats.total_links);
    println!("Fetched links:         {}", stats.fetched_links);
    println!("Eligible links:        {}", stats.eligible_links);
    println!("Domains:               {}", stats.domains);
    println!("Domains with work:     {}", stats.eligible_domains);

    Ok(())
}

/// Handles the dry-run subcommand: validates config and shows the settings
fn handle_dry_run(config: &Config) -> Result<()> {
    println!("=== Babble-Ingest Dry Run ===\n");

    println!("Scheduler:");
    println!("  Cooldown: {}s", config.scheduler.cooldown_secs);
    println!("  Refresh period: {}s", config.scheduler.refresh_period_secs);
    println!("  Error backoff: {}s", config.scheduler.error_backoff_secs);
    println!(
        "  Release claim on fetch error: {}",
        config.scheduler.release_claim_on_fetch_error
    );

    println!("\nIngest:");
    println!("  Workers: {}", config.ingest.workers);
    println!("  Fetch version: {}", config.ingest.fetch_version());
    println!("  Relative links: {:?}", config.parser.relative_links);
    println!("  Paywall classes: {:?}", config.parser.paywall_classes);

    println!("\nFetcher:");
    println!("  User agent: {}", config.fetcher.user_agent());
    println!("  Timeout: {}s", config.fetcher.timeout_secs);
    println!("  HTTPS only: {}", config.fetcher.https_only);

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);
    println!("  Blobs: {}", config.storage.blob_dir);

    println!("\n✓ Configuration is valid");
    Ok(())
}
