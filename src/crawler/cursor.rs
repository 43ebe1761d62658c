//! Paginated search cursors
//!
//! A cursor walks one query page by page, following the server's continuation
//! token. Every request goes through the shared rate limiter; rate-limit
//! rejections replay the same token after the imposed wait and transient
//! failures are retried with exponential back-off.

use crate::config::SearchMethod;
use crate::crawler::fetcher::{Endpoint, FetchError, PageRequest, PageSource, RawPage};
use crate::crawler::RateLimiter;
use crate::{Result, TrawlError};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Most ids one lookup request may carry
pub const MAX_LOOKUP_IDS: usize = 100;

const MIN_PAGE_SIZE: u32 = 10;
const MAX_PAGE_SIZE: u32 = 100;

/// What a cursor is walking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    /// The primary topic search
    Search,
    /// Replies within one conversation
    Replies,
    /// Posts fetched by id
    Lookup,
}

/// Bounded exponential back-off for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1).min(10))
    }
}

/// Everything a cursor needs to issue requests
#[derive(Clone)]
pub struct FetchContext {
    pub source: Arc<dyn PageSource>,
    pub limiter: Arc<RateLimiter>,
    pub retry: RetryPolicy,
}

/// Optional bounds of a search
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// One page of raw records
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub posts: Vec<Value>,
    pub users: Vec<Value>,
    /// Place id -> display name
    pub places: HashMap<String, String>,
}

impl From<RawPage> for Page {
    fn from(raw: RawPage) -> Self {
        let places = raw.places();
        Self {
            posts: raw.data,
            users: raw.includes.users,
            places,
        }
    }
}

/// The search endpoint matching a configured method
pub fn search_endpoint(method: SearchMethod) -> Endpoint {
    match method {
        SearchMethod::All => Endpoint::SearchAll,
        SearchMethod::Recent => Endpoint::SearchRecent,
    }
}

/// Reply query for one conversation
pub fn reply_query(conversation_id: i64) -> String {
    format!("conversation_id:{} is:reply", conversation_id)
}

/// Lazy, finite sequence of pages for one query
pub struct SearchCursor {
    ctx: FetchContext,
    kind: CursorKind,
    request: PageRequest,

    /// Stop once this many records were emitted
    item_limit: Option<usize>,

    next_token: Option<String>,

    /// Comma-joined id batches a lookup cursor has yet to send
    pending_ids: VecDeque<String>,

    items_emitted: usize,
    pages_fetched: usize,
    exhausted: bool,
}

impl SearchCursor {
    pub fn new(
        ctx: FetchContext,
        kind: CursorKind,
        request: PageRequest,
        item_limit: Option<usize>,
    ) -> Self {
        Self {
            ctx,
            kind,
            request,
            item_limit,
            next_token: None,
            pending_ids: VecDeque::new(),
            items_emitted: 0,
            pages_fetched: 0,
            exhausted: false,
        }
    }

    /// Cursor over the primary search
    ///
    /// `max_results` is the page size, lowered to the item limit when that is
    /// smaller, clamped to what the API accepts.
    pub fn search(
        ctx: FetchContext,
        endpoint: Endpoint,
        query: &str,
        range: TimeRange,
        page_size: u32,
        item_limit: Option<usize>,
    ) -> Self {
        let max_results = item_limit
            .map_or(page_size, |limit| {
                page_size.min(u32::try_from(limit).unwrap_or(u32::MAX))
            })
            .clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE);

        let mut request = PageRequest::new(endpoint)
            .with_param("query", query)
            .with_param("max_results", max_results.to_string());

        if let Some(start) = range.start {
            request.set_param("start_time", start.to_rfc3339_opts(SecondsFormat::Secs, true));
        }
        if let Some(end) = range.end {
            request.set_param("end_time", end.to_rfc3339_opts(SecondsFormat::Secs, true));
        }

        Self::new(ctx, CursorKind::Search, request, item_limit)
    }

    /// Cursor over the replies of one conversation
    pub fn replies(
        ctx: FetchContext,
        endpoint: Endpoint,
        conversation_id: i64,
        page_size: u32,
    ) -> Self {
        let request = PageRequest::new(endpoint)
            .with_param("query", reply_query(conversation_id))
            .with_param(
                "max_results",
                page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE).to_string(),
            );

        Self::new(ctx, CursorKind::Replies, request, None)
    }

    /// Cursor fetching specific posts by id
    ///
    /// Sends one request per [`MAX_LOOKUP_IDS`] ids, yielding one page each.
    pub fn lookup(ctx: FetchContext, ids: &[i64]) -> Self {
        let mut cursor = Self::new(
            ctx,
            CursorKind::Lookup,
            PageRequest::new(Endpoint::Lookup),
            None,
        );

        cursor.pending_ids = ids
            .chunks(MAX_LOOKUP_IDS)
            .map(|chunk| {
                chunk
                    .iter()
                    .map(i64::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect();
        cursor.exhausted = cursor.pending_ids.is_empty();
        cursor
    }

    pub fn kind(&self) -> CursorKind {
        self.kind
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    pub fn items_emitted(&self) -> usize {
        self.items_emitted
    }

    /// Whether `advance` will return `None` without a request
    pub fn is_done(&self) -> bool {
        self.exhausted || self.item_limit.map_or(false, |limit| self.items_emitted >= limit)
    }

    /// Fetches the next page
    ///
    /// # Returns
    ///
    /// * `Ok(Some(page))` - The next page of records
    /// * `Ok(None)` - The sequence is over; no request was made if it already was
    /// * `Err(TrawlError)` - A fatal failure, or transient retries ran out
    pub async fn advance(&mut self) -> Result<Option<Page>> {
        if self.is_done() {
            return Ok(None);
        }

        let mut request = self.request.clone();
        if self.kind == CursorKind::Lookup {
            let Some(ids) = self.pending_ids.pop_front() else {
                self.exhausted = true;
                return Ok(None);
            };
            request.set_param("ids", ids);
        } else if let Some(token) = &self.next_token {
            request.set_param("next_token", token.clone());
        }

        let raw = self.fetch_with_retry(&request).await?;
        self.pages_fetched += 1;

        tracing::debug!(
            "{:?} page {}: {} records (server count {:?})",
            self.kind,
            self.pages_fetched,
            raw.data.len(),
            raw.meta.result_count
        );

        self.next_token = raw.meta.next_token.clone().filter(|t| !t.is_empty());
        let finished = match self.kind {
            CursorKind::Lookup => self.pending_ids.is_empty(),
            CursorKind::Search | CursorKind::Replies => self.next_token.is_none(),
        };
        if finished {
            self.exhausted = true;
        }

        if raw.data.is_empty() && self.kind == CursorKind::Replies {
            tracing::debug!(
                "Empty reply page for {:?}, ending conversation",
                request.param("query")
            );
            self.exhausted = true;
            return Ok(None);
        }

        self.items_emitted += raw.data.len();

        Ok(Some(Page::from(raw)))
    }

    async fn fetch_with_retry(&self, request: &PageRequest) -> Result<RawPage> {
        let mut failures = 0u32;

        loop {
            self.ctx.limiter.acquire().await;

            match self.ctx.source.fetch_page(request).await {
                Ok(page) => return Ok(page),
                Err(FetchError::RateLimited { retry_after }) => {
                    self.ctx.limiter.penalize(retry_after).await;
                }
                Err(FetchError::Transient(message)) => {
                    failures += 1;
                    if failures > self.ctx.retry.max_retries {
                        return Err(TrawlError::RetriesExhausted {
                            attempts: failures,
                            last: message,
                        });
                    }

                    let delay = self.ctx.retry.delay(failures);
                    tracing::warn!(
                        "Transient failure ({}), retry {}/{} in {:?}",
                        message,
                        failures,
                        self.ctx.retry.max_retries,
                        delay
                    );
                    sleep(delay).await;
                }
                Err(fatal) => return Err(fatal.into()),
            }
        }
    }
}
