//! Reply-Trawl main entry point
//!
//! This is the command-line interface for the Reply-Trawl conversation crawler.

use anyhow::Context;
use clap::Parser;
use reply_trawl::config::{load_config_with_hash, validate, Config};
use reply_trawl::crawler::{build_scorer, crawl, score_missing, EnrichmentStage};
use reply_trawl::output::{load_statistics, print_report, print_statistics};
use reply_trawl::storage::{ceil_percent, SqliteStorage, Storage};
use reply_trawl::Collection;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Reply-Trawl: a rate-governed conversation crawler
///
/// Reply-Trawl searches a topic, crawls the replies of its most engaging
/// conversations, backfills the roots those replies point at and stores
/// everything, optionally sentiment-labelled, in SQLite.
#[derive(Parser, Debug)]
#[command(name = "reply-trawl")]
#[command(version = "1.0.0")]
#[command(about = "A rate-governed conversation crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Override the search query
    #[arg(long)]
    query: Option<String>,

    /// Stop the primary search after this many posts
    #[arg(long)]
    limit: Option<usize>,

    /// Share of top-engagement posts whose replies are crawled
    #[arg(long)]
    top_percent: Option<u32>,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with_all = ["stats", "score_missing"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "score_missing"])]
    stats: bool,

    /// Label stored posts that have no sentiment yet and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    score_missing: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    apply_overrides(&mut config, &cli)?;

    if cli.dry_run {
        handle_dry_run(&config)?;
    } else if cli.stats {
        handle_stats(&config)?;
    } else if cli.score_missing {
        handle_score_missing(&config).await?;
    } else {
        handle_crawl(config, &config_hash).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("reply_trawl=info,warn"),
            1 => EnvFilter::new("reply_trawl=debug,info"),
            2 => EnvFilter::new("reply_trawl=trace,debug"),
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

/// Applies command-line overrides and re-validates
fn apply_overrides(config: &mut Config, cli: &Cli) -> anyhow::Result<()> {
    if let Some(query) = &cli.query {
        config.search.query = query.clone();
    }
    if let Some(limit) = cli.limit {
        config.search.limit = Some(limit);
    }
    if let Some(percent) = cli.top_percent {
        config.search.top_percent = percent;
    }

    validate(config).context("invalid command-line override")?;
    Ok(())
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Reply-Trawl Dry Run ===\n");

    println!("Search:");
    println!("  Query: {}", config.search.query);
    println!("  Method: {:?}", config.api.search_method);
    if let Some(start) = &config.search.start_time {
        println!("  From: {}", start);
    }
    if let Some(end) = &config.search.end_time {
        println!("  Until: {}", end);
    }
    match config.search.limit {
        Some(limit) => println!("  Limit: {} posts", limit),
        None => println!("  Limit: none"),
    }
    println!("  Top engagement share: {}%", config.search.top_percent);

    println!("\nRate Windows:");
    for window in &config.rate_limit.windows {
        println!(
            "  - {} requests / {}s",
            window.max_requests, window.period_secs
        );
    }
    println!("  Safety margin: {}ms", config.rate_limit.safety_margin_ms);

    println!("\nSentiment:");
    match &config.sentiment {
        Some(sentiment) => println!(
            "  {} (batches of {})",
            sentiment.endpoint, sentiment.batch_size
        ),
        None => println!("  disabled"),
    }

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    if Path::new(&config.output.database_path).exists() {
        let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;
        let posts = storage.count_posts(Collection::Posts)?;
        println!(
            "  Already stored: {} posts, {} replies",
            posts,
            storage.count_posts(Collection::Replies)?
        );
        println!(
            "  Replies would be crawled for {} stored roots",
            ceil_percent(posts, config.search.top_percent)
        );
    }

    println!("\n✓ Configuration is valid");

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --score-missing mode: labels unscored rows
async fn handle_score_missing(config: &Config) -> anyhow::Result<()> {
    let stage = EnrichmentStage::new(build_scorer(config)?);
    let batch_size = config.sentiment.as_ref().map_or(1, |s| s.batch_size);

    let mut storage = SqliteStorage::new(Path::new(&config.output.database_path))?;
    let labelled = score_missing(&mut storage, &stage, batch_size).await?;

    println!("✓ Labelled {} stored posts", labelled);
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: &str) -> anyhow::Result<()> {
    tracing::info!(
        "Searching {:?}, crawling replies of the top {}%",
        config.search.query,
        config.search.top_percent
    );

    match crawl(config, config_hash).await {
        Ok(report) => {
            tracing::info!("Crawl completed successfully");
            print_report(&report);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
