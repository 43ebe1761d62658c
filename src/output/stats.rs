//! Statistics generation from crawl database
//!
//! This module provides functionality for extracting and displaying
//! crawl statistics from the storage layer.

use crate::crawler::CrawlReport;
use crate::storage::{Collection, RunRecord, Storage};
use crate::TrawlError;

/// Counts for one of the post tables
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionStatistics {
    pub total: u64,

    /// Rows carrying a sentiment label
    pub scored: u64,

    /// Label -> count, most frequent first
    pub sentiment: Vec<(String, u64)>,
}

impl CollectionStatistics {
    fn load(storage: &dyn Storage, collection: Collection) -> Result<Self, TrawlError> {
        Ok(Self {
            total: storage.count_posts(collection)?,
            scored: storage.count_scored(collection)?,
            sentiment: storage.sentiment_breakdown(collection)?,
        })
    }

    pub fn scored_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.scored as f64 / self.total as f64 * 100.0
        }
    }
}

/// Crawl statistics summary
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    pub posts: CollectionStatistics,
    pub replies: CollectionStatistics,
    pub users: u64,

    /// Conversation roots referenced by replies but not stored
    pub missing_roots: u64,

    pub latest_run: Option<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(CrawlStatistics)` - Successfully loaded statistics
/// * `Err(TrawlError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<CrawlStatistics, TrawlError> {
    Ok(CrawlStatistics {
        posts: CollectionStatistics::load(storage, Collection::Posts)?,
        replies: CollectionStatistics::load(storage, Collection::Replies)?,
        users: storage.count_users()?,
        missing_roots: storage.count_missing_roots()?,
        latest_run: storage.get_latest_run()?,
    })
}

fn print_collection(name: &str, stats: &CollectionStatistics) {
    println!("{}:", name);
    println!("  Stored: {}", stats.total);
    println!(
        "  Labelled: {} ({:.1}%)",
        stats.scored,
        stats.scored_percent()
    );
    for (label, count) in &stats.sentiment {
        println!("    {}: {}", label, count);
    }
    println!();
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    if let Some(run) = &stats.latest_run {
        println!("Latest Run:");
        println!("  Id: {}", run.id);
        println!("  Query: {}", run.query);
        println!("  Started: {}", run.started_at);
        if let Some(finished) = &run.finished_at {
            println!("  Finished: {}", finished);
        }
        println!("  Status: {}", run.status.to_db_string());
        println!("  Last phase: {}", run.phase);
        println!();
    }

    print_collection("Posts", &stats.posts);
    print_collection("Replies", &stats.replies);

    println!("Users: {}", stats.users);
    println!("Missing conversation roots: {}", stats.missing_roots);
}

/// Prints the outcome of a finished run
pub fn print_report(report: &CrawlReport) {
    println!("=== Run {} ===\n", report.run_id);

    println!(
        "Search: {} new posts from {} pages ({} records skipped)",
        report.search.stored, report.search.pages, report.search.skipped
    );
    println!(
        "Replies: {} new replies across {} conversations ({} roots selected)",
        report.replies.stored, report.conversations, report.roots_selected
    );
    println!(
        "Backfill: {} of {} missing roots recovered",
        report.backfill.stored, report.gaps_found
    );
    if report.gaps_remaining > 0 {
        println!(
            "  {} roots could not be fetched (deleted or protected)",
            report.gaps_remaining
        );
    }

    let scored = report.search.scored + report.replies.scored + report.backfill.scored;
    println!("Sentiment labels: {}", scored);
    println!(
        "Requests: {} ({} rate-limit pauses) in {:.1}s",
        report.requests,
        report.rate_limit_hits,
        report.elapsed.as_secs_f64()
    );
}
