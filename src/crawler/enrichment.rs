//! Sentiment enrichment
//!
//! Posts are labelled in batches by a pluggable scorer. Scoring is best
//! effort: a failed or inconsistent batch is logged and stored unlabelled.

use crate::config::SentimentConfig;
use crate::storage::Post;
use crate::{ConfigError, TrawlError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A sentiment label with its confidence
#[derive(Debug, Clone, PartialEq)]
pub struct Sentiment {
    pub label: String,
    pub score: f64,
}

impl Sentiment {
    pub fn new(label: impl Into<String>, score: f64) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("Scoring request failed: {0}")]
    Request(String),

    #[error("Scorer returned {got} results for {expected} texts")]
    Misaligned { expected: usize, got: usize },

    #[error("Score {0} outside [0, 1]")]
    ScoreOutOfRange(f64),
}

/// Labels a batch of texts, one result per text in order
#[async_trait]
pub trait SentimentScorer: Send + Sync {
    async fn score(&self, texts: &[String]) -> Result<Vec<Sentiment>, EnrichmentError>;
}

/// Applies an optional scorer to batches of posts
#[derive(Clone, Default)]
pub struct EnrichmentStage {
    scorer: Option<Arc<dyn SentimentScorer>>,
}

impl EnrichmentStage {
    pub fn new(scorer: Option<Arc<dyn SentimentScorer>>) -> Self {
        Self { scorer }
    }

    pub fn disabled() -> Self {
        Self { scorer: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.scorer.is_some()
    }

    /// Scores a batch with a single scorer call
    ///
    /// # Returns
    ///
    /// * `Ok(None)` - No scorer configured
    /// * `Ok(Some(scores))` - Exactly one valid score per text
    /// * `Err(EnrichmentError)` - The scorer failed or answered inconsistently
    pub async fn score_texts(
        &self,
        texts: &[String],
    ) -> Result<Option<Vec<Sentiment>>, EnrichmentError> {
        let Some(scorer) = &self.scorer else {
            return Ok(None);
        };
        if texts.is_empty() {
            return Ok(Some(Vec::new()));
        }

        let scores = scorer.score(texts).await?;

        if scores.len() != texts.len() {
            return Err(EnrichmentError::Misaligned {
                expected: texts.len(),
                got: scores.len(),
            });
        }
        if let Some(bad) = scores
            .iter()
            .find(|s| !(0.0..=1.0).contains(&s.score))
        {
            return Err(EnrichmentError::ScoreOutOfRange(bad.score));
        }

        Ok(Some(scores))
    }

    /// Labels posts in place
    ///
    /// Failures leave every post of the batch unlabelled.
    ///
    /// # Returns
    ///
    /// The number of posts labelled
    pub async fn enrich(&self, posts: &mut [Post]) -> usize {
        let texts: Vec<String> = posts.iter().map(|p| p.text.clone()).collect();

        match self.score_texts(&texts).await {
            Ok(Some(scores)) => {
                for (post, sentiment) in posts.iter_mut().zip(scores) {
                    post.sentiment_label = Some(sentiment.label);
                    post.sentiment_score = Some(sentiment.score);
                }
                posts.len()
            }
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!("Sentiment scoring failed for {} posts: {}", posts.len(), e);
                0
            }
        }
    }
}

#[derive(Serialize)]
struct ScoreRequest<'a> {
    inputs: &'a [String],
}

#[derive(Debug, Deserialize)]
struct RawScore {
    label: String,
    score: f64,
}

/// One label per input, or every candidate label per input
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScoreResponse {
    Nested(Vec<Vec<RawScore>>),
    Flat(Vec<RawScore>),
}

impl ScoreResponse {
    /// Keeps the most confident label per input
    fn into_sentiments(self) -> Vec<Sentiment> {
        match self {
            Self::Flat(scores) => scores
                .into_iter()
                .map(|s| Sentiment::new(s.label, s.score))
                .collect(),
            Self::Nested(candidates) => candidates
                .into_iter()
                .map(|options| {
                    options
                        .into_iter()
                        .max_by(|a, b| a.score.total_cmp(&b.score))
                        .map(|s| Sentiment::new(s.label, s.score))
                        .unwrap_or_else(|| Sentiment::new("UNKNOWN", 0.0))
                })
                .collect(),
        }
    }
}

/// Scorer backed by an HTTP text-classification endpoint
///
/// Sends `{"inputs": [...]}` in chunks of the configured batch size.
pub struct HttpSentimentScorer {
    client: Client,
    endpoint: String,
    token: Option<String>,
    batch_size: usize,
}

impl HttpSentimentScorer {
    pub fn new(config: &SentimentConfig, timeout: Duration) -> Result<Self, TrawlError> {
        let token = match &config.token_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                ConfigError::MissingCredential(format!("environment variable {} is not set", var))
            })?),
            None => None,
        };

        let client = Client::builder()
            .user_agent(concat!("reply-trawl/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            token,
            batch_size: config.batch_size.max(1),
        })
    }

    async fn score_chunk(&self, texts: &[String]) -> Result<Vec<Sentiment>, EnrichmentError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&ScoreRequest { inputs: texts });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EnrichmentError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnrichmentError::Request(format!(
                "HTTP {} from {}",
                status, self.endpoint
            )));
        }

        let parsed: ScoreResponse = response
            .json()
            .await
            .map_err(|e| EnrichmentError::Request(format!("malformed response: {}", e)))?;

        Ok(parsed.into_sentiments())
    }
}

#[async_trait]
impl SentimentScorer for HttpSentimentScorer {
    async fn score(&self, texts: &[String]) -> Result<Vec<Sentiment>, EnrichmentError> {
        let mut scores = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let chunk_scores = self.score_chunk(chunk).await?;
            if chunk_scores.len() != chunk.len() {
                return Err(EnrichmentError::Misaligned {
                    expected: chunk.len(),
                    got: chunk_scores.len(),
                });
            }
            scores.extend(chunk_scores);
        }
        Ok(scores)
    }
}
