use serde::Deserialize;

/// Main configuration structure for Reply-Trawl
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub search: SearchConfig,
    #[serde(rename = "rate-limit", default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub sentiment: Option<SentimentConfig>,
    pub output: OutputConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Which search endpoint the primary query runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    /// Full-archive search
    #[default]
    All,
    /// Last seven days only
    Recent,
}

/// Remote API access configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the API, e.g. `https://api.twitter.com/2`
    #[serde(rename = "base-url", default = "default_base_url")]
    pub base_url: String,

    /// Bearer token given inline
    #[serde(rename = "bearer-token", default)]
    pub bearer_token: Option<String>,

    /// Name of an environment variable holding the bearer token
    #[serde(rename = "bearer-token-env", default)]
    pub bearer_token_env: Option<String>,

    #[serde(rename = "search-method", default)]
    pub search_method: SearchMethod,

    /// Per-request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// How many times a transient failure is retried before giving up
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between transient retries, doubled on every attempt (milliseconds)
    #[serde(rename = "retry-backoff-ms", default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// What to search for
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    pub query: String,

    /// RFC 3339 lower bound of the search window
    #[serde(rename = "start-time", default)]
    pub start_time: Option<String>,

    /// RFC 3339 upper bound of the search window
    #[serde(rename = "end-time", default)]
    pub end_time: Option<String>,

    /// Stop the primary search after this many posts
    #[serde(default)]
    pub limit: Option<usize>,

    /// Share of top-engagement posts whose replies are crawled
    #[serde(rename = "top-percent", default = "default_top_percent")]
    pub top_percent: u32,

    /// `max_results` per search request
    #[serde(rename = "page-size", default = "default_page_size")]
    pub page_size: u32,
}

/// One request-rate window, e.g. 300 requests per 900 seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct WindowConfig {
    #[serde(rename = "max-requests")]
    pub max_requests: u32,

    #[serde(rename = "period-secs")]
    pub period_secs: u64,
}

/// Shared rate budget configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Added to every server-imposed wait (milliseconds)
    #[serde(rename = "safety-margin-ms", default = "default_safety_margin_ms")]
    pub safety_margin_ms: u64,

    #[serde(rename = "window", default = "default_windows")]
    pub windows: Vec<WindowConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            safety_margin_ms: default_safety_margin_ms(),
            windows: default_windows(),
        }
    }
}

/// Weights of the engagement score used to rank conversation roots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RankingConfig {
    #[serde(rename = "like-weight", default = "one")]
    pub like_weight: u32,

    #[serde(rename = "retweet-weight", default = "one")]
    pub retweet_weight: u32,

    #[serde(rename = "quote-weight", default = "one")]
    pub quote_weight: u32,

    #[serde(rename = "reply-weight", default)]
    pub reply_weight: u32,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            like_weight: 1,
            retweet_weight: 1,
            quote_weight: 1,
            reply_weight: 0,
        }
    }
}

/// Sentiment inference endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct SentimentConfig {
    pub endpoint: String,

    /// Name of an environment variable holding the endpoint token
    #[serde(rename = "token-env", default)]
    pub token_env: Option<String>,

    /// Largest number of texts sent in one scoring request
    #[serde(rename = "batch-size", default = "default_sentiment_batch")]
    pub batch_size: usize,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Chunk size for paged reads from the store
    #[serde(rename = "read-page-size", default = "default_read_page_size")]
    pub read_page_size: usize,
}

/// Fetch/persist pipeline tuning
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Pages buffered between the fetcher and the persister
    #[serde(default = "default_pipeline_depth")]
    pub depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            depth: default_pipeline_depth(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.twitter.com/2".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    5000
}

fn default_top_percent() -> u32 {
    5
}

fn default_page_size() -> u32 {
    100
}

fn default_safety_margin_ms() -> u64 {
    crate::DEFAULT_SAFETY_MARGIN.as_millis() as u64
}

fn default_windows() -> Vec<WindowConfig> {
    vec![
        WindowConfig {
            max_requests: 1,
            period_secs: 1,
        },
        WindowConfig {
            max_requests: 300,
            period_secs: 900,
        },
    ]
}

fn one() -> u32 {
    1
}

fn default_sentiment_batch() -> usize {
    64
}

fn default_read_page_size() -> usize {
    500
}

fn default_pipeline_depth() -> usize {
    2
}
