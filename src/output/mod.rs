//! Output module for crawl summaries and reports
//!
//! This module handles:
//! - Loading statistics about stored posts, replies and users
//! - Printing them, and the outcome of a run, to stdout

pub mod stats;

pub use stats::{
    load_statistics, print_report, print_statistics, CollectionStatistics, CrawlStatistics,
};
