//! Crawler coordinator - main crawl orchestration logic
//!
//! This module drives one run through its phases:
//! - Search: the primary query, stored as posts
//! - Rank roots and crawl replies: the top-engagement conversations, stored as
//!   replies
//! - Find gaps and backfill: conversation roots replies point at but posts lack
//!
//! Phases only talk to each other through the store. Within a phase, a
//! producer task walks the cursor while the caller parses, enriches and
//! persists each page, so fetching never waits on the database.

use crate::config::{resolve_bearer_token, Config};
use crate::crawler::cursor::{
    search_endpoint, FetchContext, RetryPolicy, SearchCursor, TimeRange,
};
use crate::crawler::enrichment::{EnrichmentStage, HttpSentimentScorer, SentimentScorer};
use crate::crawler::fetcher::{ApiClient, PageSource};
use crate::crawler::parser::parse_page;
use crate::crawler::{Page, RateLimiter, MAX_LOOKUP_IDS};
use crate::state::CrawlPhase;
use crate::storage::{Collection, EngagementWeights, Pager, RunStatus, SqliteStorage, Storage};
use crate::{ConfigError, Result, TrawlError};
use std::collections::HashSet;
use std::ops::AddAssign;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Counters for one pass of fetching and persisting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Pages received from the API
    pub pages: usize,
    /// Post records received
    pub fetched: usize,
    /// Posts newly stored
    pub stored: usize,
    /// User profiles written
    pub users: usize,
    /// Records rejected by the parser
    pub skipped: usize,
    /// Posts given a sentiment label
    pub scored: usize,
}

impl AddAssign for PassStats {
    fn add_assign(&mut self, other: Self) {
        self.pages += other.pages;
        self.fetched += other.fetched;
        self.stored += other.stored;
        self.users += other.users;
        self.skipped += other.skipped;
        self.scored += other.scored;
    }
}

/// Outcome of a complete run
#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    pub run_id: i64,
    pub search: PassStats,
    /// Roots selected for reply crawling
    pub roots_selected: u64,
    /// Distinct conversations whose replies were searched
    pub conversations: usize,
    pub replies: PassStats,
    /// Missing roots found before backfill
    pub gaps_found: u64,
    pub backfill: PassStats,
    /// Missing roots the API could not return
    pub gaps_remaining: u64,
    pub requests: u64,
    pub rate_limit_hits: u64,
    pub elapsed: Duration,
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    storage: Arc<Mutex<SqliteStorage>>,
    fetch: FetchContext,
    enrichment: EnrichmentStage,
    run_id: i64,
    phase: CrawlPhase,
}

impl Coordinator {
    /// Creates a coordinator over explicit collaborators
    ///
    /// A new run is recorded in the store in the `Search` phase.
    ///
    /// # Arguments
    ///
    /// * `config` - The validated configuration
    /// * `config_hash` - Hash of the configuration file, stored with the run
    /// * `storage` - The store receiving every record
    /// * `source` - Where pages come from
    /// * `scorer` - Optional sentiment scorer
    pub fn new(
        config: Config,
        config_hash: &str,
        mut storage: SqliteStorage,
        source: Arc<dyn PageSource>,
        scorer: Option<Arc<dyn SentimentScorer>>,
    ) -> Result<Self> {
        let run_id = storage.create_run(config_hash, &config.search.query)?;

        let fetch = FetchContext {
            source,
            limiter: Arc::new(RateLimiter::from_config(&config.rate_limit)),
            retry: RetryPolicy {
                max_retries: config.api.max_retries,
                base_delay: Duration::from_millis(config.api.retry_backoff_ms),
            },
        };

        Ok(Self {
            config: Arc::new(config),
            storage: Arc::new(Mutex::new(storage)),
            fetch,
            enrichment: EnrichmentStage::new(scorer),
            run_id,
            phase: CrawlPhase::Search,
        })
    }

    /// Creates a coordinator talking to the configured API and database
    pub fn from_config(config: Config, config_hash: &str) -> Result<Self> {
        let token = resolve_bearer_token(&config.api)?;
        let source = Arc::new(ApiClient::new(
            &config.api,
            token,
            longest_window(&config),
        )?);
        let scorer = build_scorer(&config)?;
        let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;

        Self::new(config, config_hash, storage, source, scorer)
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    pub fn phase(&self) -> CrawlPhase {
        self.phase
    }

    /// Shared handle on the store
    pub fn storage(&self) -> Arc<Mutex<SqliteStorage>> {
        Arc::clone(&self.storage)
    }

    fn lock_storage(&self) -> Result<MutexGuard<'_, SqliteStorage>> {
        self.storage
            .lock()
            .map_err(|_| TrawlError::Pipeline("storage lock poisoned".to_string()))
    }

    /// Runs every phase in order and marks the run finished
    ///
    /// The run is marked failed if any phase aborts; the error names the phase.
    pub async fn run(&mut self) -> Result<CrawlReport> {
        tracing::info!(
            "Starting crawl run {} for query {:?}",
            self.run_id,
            self.config.search.query
        );

        let start = Instant::now();
        let result = self.run_phases().await;

        let status = if result.is_ok() {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        let finished = self.lock_storage().and_then(|mut storage| {
            storage
                .finish_run(self.run_id, status)
                .map_err(TrawlError::from)
        });

        let mut report = match result {
            Ok(report) => {
                finished?;
                report
            }
            Err(e) => {
                if let Err(finish_err) = finished {
                    tracing::warn!(
                        "Could not mark run {} as failed: {}",
                        self.run_id,
                        finish_err
                    );
                }
                tracing::error!("Run {} failed: {}", self.run_id, e);
                return Err(e);
            }
        };

        let limiter = self.fetch.limiter.stats().await;
        report.requests = limiter.granted;
        report.rate_limit_hits = limiter.penalties;
        report.elapsed = start.elapsed();

        tracing::info!(
            "Run {} completed in {:?}: {} posts, {} replies, {} roots backfilled, {} requests",
            self.run_id,
            report.elapsed,
            report.search.stored,
            report.replies.stored,
            report.backfill.stored,
            report.requests
        );

        Ok(report)
    }

    async fn run_phases(&mut self) -> Result<CrawlReport> {
        let mut report = CrawlReport {
            run_id: self.run_id,
            ..CrawlReport::default()
        };

        report.search = self
            .search()
            .await
            .map_err(|e| e.in_phase(CrawlPhase::Search))?;

        self.advance_to(CrawlPhase::RankRoots)?;
        report.roots_selected = self
            .rank_roots()
            .map_err(|e| e.in_phase(CrawlPhase::RankRoots))?;

        self.advance_to(CrawlPhase::CrawlReplies)?;
        let (conversations, replies) = self
            .crawl_replies()
            .await
            .map_err(|e| e.in_phase(CrawlPhase::CrawlReplies))?;
        report.conversations = conversations;
        report.replies = replies;

        self.advance_to(CrawlPhase::FindGaps)?;
        report.gaps_found = self
            .find_gaps()
            .map_err(|e| e.in_phase(CrawlPhase::FindGaps))?;

        self.advance_to(CrawlPhase::BackfillRoots)?;
        report.backfill = self
            .backfill_roots()
            .await
            .map_err(|e| e.in_phase(CrawlPhase::BackfillRoots))?;
        report.gaps_remaining = self
            .lock_storage()
            .and_then(|storage| storage.count_missing_roots().map_err(TrawlError::from))
            .map_err(|e| e.in_phase(CrawlPhase::BackfillRoots))?;

        self.advance_to(CrawlPhase::Complete)?;

        Ok(report)
    }

    /// Moves to the next phase and records it
    ///
    /// A failure to record the move is reported against the phase entered.
    fn advance_to(&mut self, next: CrawlPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(TrawlError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }

        self.lock_storage()
            .and_then(|mut storage| {
                storage
                    .update_run_phase(self.run_id, next)
                    .map_err(TrawlError::from)
            })
            .map_err(|e| e.in_phase(next))?;
        tracing::info!("Phase {} -> {}", self.phase, next);
        self.phase = next;
        Ok(())
    }

    fn read_page_size(&self) -> usize {
        self.config.output.read_page_size
    }

    /// Phase 1: the primary search, stored as posts
    async fn search(&self) -> Result<PassStats> {
        let search = &self.config.search;
        let range = TimeRange {
            start: search
                .start_time
                .as_deref()
                .map(|t| crate::config::parse_timestamp("start-time", t))
                .transpose()?,
            end: search
                .end_time
                .as_deref()
                .map(|t| crate::config::parse_timestamp("end-time", t))
                .transpose()?,
        };

        let cursor = SearchCursor::search(
            self.fetch.clone(),
            search_endpoint(self.config.api.search_method),
            &search.query,
            range,
            search.page_size,
            search.limit,
        );

        let stats = self.drain(cursor, Collection::Posts).await?;
        tracing::info!(
            "Search stored {} new posts from {} pages ({} skipped)",
            stats.stored,
            stats.pages,
            stats.skipped
        );
        Ok(stats)
    }

    /// Phase 2a: size of the top-engagement selection
    fn rank_roots(&self) -> Result<u64> {
        let storage = self.lock_storage()?;
        let total = storage.count_posts(Collection::Posts)?;
        let selected = crate::storage::ceil_percent(total, self.config.search.top_percent);

        tracing::info!(
            "Selected top {}% of {} posts: {} conversation roots",
            self.config.search.top_percent,
            total,
            selected
        );
        Ok(selected)
    }

    /// Phase 2b: replies of every selected root, stored as replies
    ///
    /// Returns the number of distinct conversations searched.
    async fn crawl_replies(&self) -> Result<(usize, PassStats)> {
        let weights = EngagementWeights::from(&self.config.ranking);
        let percent = self.config.search.top_percent;
        let endpoint = search_endpoint(self.config.api.search_method);
        let mut pager = Pager::new(self.read_page_size());
        let mut seen = HashSet::new();
        let mut stats = PassStats::default();

        loop {
            let chunk = {
                let storage = self.lock_storage()?;
                pager.next_page(
                    |after, limit| storage.top_engagement_roots(percent, &weights, after, limit),
                    |root| *root,
                )?
            };
            let Some(roots) = chunk else { break };

            for root in roots {
                let conversation = root.conversation();
                if !seen.insert(conversation) {
                    continue;
                }

                tracing::debug!(
                    "Crawling replies of conversation {} (engagement {})",
                    conversation,
                    root.engagement
                );
                let cursor = SearchCursor::replies(
                    self.fetch.clone(),
                    endpoint,
                    conversation,
                    self.config.search.page_size,
                );
                stats += self.drain(cursor, Collection::Replies).await?;
            }
        }

        tracing::info!(
            "Stored {} new replies across {} conversations",
            stats.stored,
            seen.len()
        );
        Ok((seen.len(), stats))
    }

    /// Phase 3a: how many conversation roots are missing
    fn find_gaps(&self) -> Result<u64> {
        let missing = self.lock_storage()?.count_missing_roots()?;
        tracing::info!("{} conversation roots missing from posts", missing);
        Ok(missing)
    }

    /// Phase 3b: fetches missing roots by id, stored as posts
    async fn backfill_roots(&self) -> Result<PassStats> {
        let mut pager = Pager::new(self.read_page_size().min(MAX_LOOKUP_IDS));
        let mut stats = PassStats::default();

        loop {
            let chunk = {
                let storage = self.lock_storage()?;
                pager.next_page(
                    |after, limit| storage.missing_conversation_roots(after.copied(), limit),
                    |id| *id,
                )?
            };
            let Some(ids) = chunk else { break };

            tracing::debug!("Looking up {} missing roots", ids.len());
            let cursor = SearchCursor::lookup(self.fetch.clone(), &ids);
            stats += self.drain(cursor, Collection::Posts).await?;
        }

        tracing::info!("Backfilled {} conversation roots", stats.stored);
        Ok(stats)
    }

    /// Pulls every page of a cursor through parse, enrich and persist
    ///
    /// The cursor runs in its own task, at most `pipeline.depth` pages ahead.
    async fn drain(&self, mut cursor: SearchCursor, collection: Collection) -> Result<PassStats> {
        let (tx, mut rx) = mpsc::channel::<Page>(self.config.pipeline.depth.max(1));

        let producer = tokio::spawn(async move {
            let mut pages = 0usize;
            while let Some(page) = cursor.advance().await? {
                pages += 1;
                if tx.send(page).await.is_err() {
                    break;
                }
            }
            tracing::debug!(
                "{:?} cursor finished: {} requests, {} records",
                cursor.kind(),
                cursor.pages_fetched(),
                cursor.items_emitted()
            );
            Ok::<usize, TrawlError>(pages)
        });

        let mut stats = PassStats::default();
        while let Some(page) = rx.recv().await {
            match self.persist_page(page, collection).await {
                Ok(page_stats) => stats += page_stats,
                Err(e) => {
                    producer.abort();
                    return Err(e);
                }
            }
        }

        stats.pages = producer
            .await
            .map_err(|e| TrawlError::Pipeline(format!("page producer panicked: {}", e)))??;

        Ok(stats)
    }

    async fn persist_page(&self, page: Page, collection: Collection) -> Result<PassStats> {
        let fetched = page.posts.len();
        let batch = parse_page(&page);
        let mut posts = batch.posts;
        let scored = self.enrichment.enrich(&mut posts).await;

        let mut storage = self.lock_storage()?;
        let users = storage.insert_users(&batch.users)?;
        let stored = storage.insert_posts(collection, &posts)?;

        Ok(PassStats {
            pages: 0,
            fetched,
            stored,
            users,
            skipped: batch.skipped,
            scored,
        })
    }
}

/// Labels stored posts that have no sentiment yet
///
/// Unlike in-crawl enrichment, a scoring failure aborts.
///
/// # Arguments
///
/// * `storage` - The store to scan and update
/// * `stage` - Enrichment stage; must have a scorer
/// * `batch_size` - Rows read and scored per call
///
/// # Returns
///
/// The number of posts labelled
pub async fn score_missing(
    storage: &mut dyn Storage,
    stage: &EnrichmentStage,
    batch_size: usize,
) -> Result<usize> {
    if !stage.is_enabled() {
        let message = "no [sentiment] endpoint configured".to_string();
        return Err(ConfigError::Validation(message).into());
    }

    let mut labelled = 0;

    for collection in [Collection::Posts, Collection::Replies] {
        let mut pager = Pager::new(batch_size);

        while let Some(rows) = pager.next_page(
            |after, limit| storage.unscored_posts(collection, after.copied(), limit),
            |row: &(i64, String)| row.0,
        )? {
            let (ids, texts): (Vec<i64>, Vec<String>) = rows.into_iter().unzip();
            let Some(scores) = stage.score_texts(&texts).await? else {
                break;
            };

            for (id, sentiment) in ids.into_iter().zip(scores) {
                if storage.update_sentiment(collection, id, &sentiment.label, sentiment.score)? {
                    labelled += 1;
                }
            }
        }

        tracing::info!("Labelled {} rows after scanning {}", labelled, collection.table());
    }

    Ok(labelled)
}

/// Fallback back-off for a 429 without usable headers
fn longest_window(config: &Config) -> Duration {
    config
        .rate_limit
        .windows
        .iter()
        .map(|w| Duration::from_secs(w.period_secs))
        .max()
        .unwrap_or(Duration::from_secs(900))
}

/// Builds the HTTP scorer if a sentiment endpoint is configured
pub fn build_scorer(config: &Config) -> Result<Option<Arc<dyn SentimentScorer>>> {
    match &config.sentiment {
        Some(sentiment) => {
            let scorer: Arc<dyn SentimentScorer> = Arc::new(HttpSentimentScorer::new(
                sentiment,
                Duration::from_secs(config.api.timeout_secs),
            )?);
            Ok(Some(scorer))
        }
        None => Ok(None),
    }
}

/// Runs a complete crawl operation against the configured API
pub async fn run_crawl(config: Config, config_hash: &str) -> Result<CrawlReport> {
    let mut coordinator = Coordinator::from_config(config, config_hash)?;
    coordinator.run().await
}
