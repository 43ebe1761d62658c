//! API transport
//!
//! This module handles every HTTP request the crawler makes against the
//! search API, including:
//! - Building the HTTP client with authentication and timeouts
//! - Addressing the search and lookup endpoints
//! - Decoding response pages
//! - Classifying failures into rate-limit rejections, transient and fatal errors

use crate::config::ApiConfig;
use crate::TrawlError;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const TWEET_FIELDS: &str = "attachments,author_id,context_annotations,conversation_id,created_at,\
entities,geo,id,in_reply_to_user_id,lang,public_metrics,possibly_sensitive,referenced_tweets,\
reply_settings,source,text,withheld";

const USER_FIELDS: &str = "created_at,description,entities,id,location,name,pinned_tweet_id,\
profile_image_url,protected,public_metrics,url,username,verified,withheld";

const PLACE_FIELDS: &str = "contained_within,country,country_code,full_name,geo,id,name,place_type";

const EXPANSIONS: &str = "author_id,geo.place_id";

/// Errors reported by a page source
#[derive(Debug, Error)]
pub enum FetchError {
    /// The server says the request budget is spent
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Timeouts, connection failures and 5xx responses
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Anything retrying cannot fix
    #[error("Fatal failure: {0}")]
    Fatal(String),
}

/// API endpoints the crawler talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Full-archive search
    SearchAll,
    /// Recent search
    SearchRecent,
    /// Posts by id
    Lookup,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Self::SearchAll => "tweets/search/all",
            Self::SearchRecent => "tweets/search/recent",
            Self::Lookup => "tweets",
        }
    }
}

/// One request against an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub endpoint: Endpoint,
    pub params: Vec<(String, String)>,
}

impl PageRequest {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_param(key, value);
        self
    }

    /// Sets a parameter, replacing any previous value
    pub fn set_param(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.params.push((key.to_string(), value)),
        }
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A place referenced by a post's geo tag
#[derive(Debug, Clone, Deserialize)]
pub struct RawPlace {
    pub id: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawIncludes {
    #[serde(default)]
    pub users: Vec<Value>,
    #[serde(default)]
    pub places: Vec<RawPlace>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMeta {
    #[serde(default)]
    pub next_token: Option<String>,
    #[serde(default)]
    pub result_count: Option<u64>,
}

/// A decoded response page
///
/// Records stay as JSON values so that one malformed record can be skipped
/// without losing the rest of the page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPage {
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub includes: RawIncludes,
    #[serde(default)]
    pub meta: RawMeta,
    /// Partial errors, e.g. ids a lookup could not resolve
    #[serde(default)]
    pub errors: Vec<Value>,
}

impl RawPage {
    /// Place id -> display name
    pub fn places(&self) -> HashMap<String, String> {
        self.includes
            .places
            .iter()
            .filter_map(|place| {
                place
                    .full_name
                    .clone()
                    .or_else(|| place.name.clone())
                    .map(|name| (place.id.clone(), name))
            })
            .collect()
    }
}

/// Anything that can serve API pages
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> Result<RawPage, FetchError>;
}

/// Builds an HTTP client for the API
pub fn build_http_client(config: &ApiConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(concat!("reply-trawl/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Page source backed by the remote HTTP API
pub struct ApiClient {
    client: Client,
    base_url: Url,
    token: String,
    /// Wait used when a 429 carries no usable reset header
    fallback_retry_after: Duration,
}

impl ApiClient {
    /// Creates a new API client
    ///
    /// # Arguments
    ///
    /// * `config` - API configuration
    /// * `token` - Bearer token
    /// * `fallback_retry_after` - Back-off for rate-limit rejections without headers
    pub fn new(
        config: &ApiConfig,
        token: String,
        fallback_retry_after: Duration,
    ) -> Result<Self, TrawlError> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| {
            crate::ConfigError::InvalidUrl(format!("Invalid base-url {}: {}", config.base_url, e))
        })?;

        Ok(Self {
            client: build_http_client(config)?,
            base_url,
            token,
            fallback_retry_after,
        })
    }

    /// Full URL of an endpoint
    pub fn endpoint_url(&self, endpoint: Endpoint) -> Result<Url, FetchError> {
        self.base_url
            .join(endpoint.path())
            .map_err(|e| FetchError::Fatal(format!("bad endpoint URL: {}", e)))
    }
}

#[async_trait]
impl PageSource for ApiClient {
    async fn fetch_page(&self, request: &PageRequest) -> Result<RawPage, FetchError> {
        let url = self.endpoint_url(request.endpoint)?;

        tracing::debug!("GET {} {:?}", url, request.params);

        let response = self
            .client
            .get(url.clone())
            .bearer_auth(&self.token)
            .query(&request.params)
            .query(&[
                ("tweet.fields", TWEET_FIELDS),
                ("user.fields", USER_FIELDS),
                ("place.fields", PLACE_FIELDS),
                ("expansions", EXPANSIONS),
            ])
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after(response.headers(), self.fallback_retry_after);
            return Err(FetchError::RateLimited { retry_after });
        }

        if status.is_server_error() {
            return Err(FetchError::Transient(format!("HTTP {} from {}", status, url)));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Fatal(format!(
                "HTTP {} from {}: {}",
                status, url, body
            )));
        }

        let page: RawPage = response
            .json()
            .await
            .map_err(|e| FetchError::Fatal(format!("malformed page from {}: {}", url, e)))?;

        if !page.errors.is_empty() {
            tracing::debug!("{} partial errors in page from {}", page.errors.len(), url);
        }

        Ok(page)
    }
}

/// Maps a reqwest failure onto the retry taxonomy
fn classify_request_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        FetchError::Transient(e.to_string())
    } else {
        FetchError::Fatal(e.to_string())
    }
}

/// Works out how long a 429 asks us to wait
///
/// `Retry-After` (seconds) wins over `x-rate-limit-reset` (epoch seconds).
fn retry_after(headers: &HeaderMap, fallback: Duration) -> Duration {
    let header_u64 = |name: &str| -> Option<u64> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    };

    if let Some(secs) = header_u64(RETRY_AFTER.as_str()) {
        return Duration::from_secs(secs);
    }

    if let Some(reset) = header_u64("x-rate-limit-reset") {
        let now = Utc::now().timestamp();
        return Duration::from_secs((reset as i64 - now).max(0) as u64);
    }

    fallback
}
