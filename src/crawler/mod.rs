//! Crawler module for API fetching and processing
//!
//! This module contains the core crawling logic, including:
//! - HTTP transport with rate-limit and retry handling
//! - Paginated search cursors
//! - Record parsing and sentiment enrichment
//! - Request rate limiting across several windows
//! - Overall crawl coordination

mod coordinator;
mod cursor;
mod enrichment;
mod fetcher;
mod parser;
mod rate_limiter;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{
    build_scorer, run_crawl, score_missing, Coordinator, CrawlReport, PassStats,
};
pub use cursor::{
    reply_query, search_endpoint, CursorKind, FetchContext, Page, RetryPolicy, SearchCursor,
    TimeRange, MAX_LOOKUP_IDS,
};
pub use enrichment::{
    EnrichmentError, EnrichmentStage, HttpSentimentScorer, Sentiment, SentimentScorer,
};
pub use fetcher::{
    build_http_client, ApiClient, Endpoint, FetchError, PageRequest, PageSource, RawPage,
};
pub use parser::{classify_media_url, parse_page, parse_post, parse_user, MediaKind, ParseError};
pub use rate_limiter::{LimiterStats, RateLimiter};

use crate::config::Config;

/// Runs a complete crawl operation
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Open the store and record a new run
/// 2. Search the configured query
/// 3. Crawl the replies of the top-engagement conversations
/// 4. Backfill conversation roots the replies point at
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `config_hash` - Hash of the configuration file
///
/// # Returns
///
/// * `Ok(CrawlReport)` - Crawl completed successfully
/// * `Err(TrawlError)` - Crawl failed; the error names the phase
pub async fn crawl(config: Config, config_hash: &str) -> crate::Result<CrawlReport> {
    run_crawl(config, config_hash).await
}
