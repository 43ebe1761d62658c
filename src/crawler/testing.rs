//! Test doubles for the crawler

use crate::crawler::enrichment::{EnrichmentError, Sentiment, SentimentScorer};
use crate::crawler::fetcher::{FetchError, PageRequest, PageSource, RawMeta, RawPage};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Builds a page with the given records and continuation token
pub fn page(data: Vec<Value>, next_token: Option<&str>) -> RawPage {
    RawPage {
        data,
        meta: RawMeta {
            next_token: next_token.map(str::to_string),
            result_count: None,
        },
        ..RawPage::default()
    }
}

/// Page source replaying a fixed script of responses
///
/// Once the script runs out every request gets an empty final page.
pub struct ScriptedSource {
    responses: Mutex<VecDeque<Result<RawPage, FetchError>>>,
    requests: Mutex<Vec<PageRequest>>,
}

impl ScriptedSource {
    pub fn new(responses: Vec<Result<RawPage, FetchError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    async fn fetch_page(&self, request: &PageRequest) -> Result<RawPage, FetchError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(RawPage::default()))
    }
}

/// Scorer labelling texts by a keyword, counting its calls
pub struct KeywordScorer {
    pub calls: Mutex<Vec<usize>>,
}

impl KeywordScorer {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_sizes(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SentimentScorer for KeywordScorer {
    async fn score(&self, texts: &[String]) -> Result<Vec<Sentiment>, EnrichmentError> {
        self.calls.lock().unwrap().push(texts.len());
        Ok(texts
            .iter()
            .map(|text| {
                if text.contains("bad") {
                    Sentiment::new("NEGATIVE", 0.9)
                } else {
                    Sentiment::new("POSITIVE", 0.8)
                }
            })
            .collect())
    }
}

/// Scorer that always fails
pub struct FailingScorer;

#[async_trait]
impl SentimentScorer for FailingScorer {
    async fn score(&self, _texts: &[String]) -> Result<Vec<Sentiment>, EnrichmentError> {
        Err(EnrichmentError::Request("model unavailable".to_string()))
    }
}

/// Scorer that drops the last score of every batch
pub struct ShortScorer;

#[async_trait]
impl SentimentScorer for ShortScorer {
    async fn score(&self, texts: &[String]) -> Result<Vec<Sentiment>, EnrichmentError> {
        Ok(texts
            .iter()
            .skip(1)
            .map(|_| Sentiment::new("NEUTRAL", 0.5))
            .collect())
    }
}
