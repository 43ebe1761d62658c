//! Reply-Trawl: a rate-governed conversation crawler
//!
//! This crate crawls a social-media search API for a topic, reconstructs
//! reply threads, labels posts with a sentiment score and persists
//! everything idempotently in SQLite for offline analysis.

pub mod config;
pub mod crawler;
pub mod output;
pub mod state;
pub mod storage;

use std::time::Duration;
use thiserror::Error;

/// Main error type for Reply-Trawl operations
#[derive(Debug, Error)]
pub enum TrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Sentiment error: {0}")]
    Enrichment(#[from] crawler::EnrichmentError),

    #[error("Invalid phase transition: {from} -> {to}")]
    InvalidTransition {
        from: state::CrawlPhase,
        to: state::CrawlPhase,
    },

    #[error("Page pipeline failed: {0}")]
    Pipeline(String),

    #[error("{phase} phase aborted: {source}")]
    Phase {
        phase: state::CrawlPhase,
        #[source]
        source: Box<TrawlError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrawlError {
    /// Wraps this error with the phase it aborted, unless it already names one
    pub fn in_phase(self, phase: state::CrawlPhase) -> Self {
        match self {
            already @ Self::Phase { .. } => already,
            other => Self::Phase {
                phase,
                source: Box::new(other),
            },
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Missing API credential: {0}")]
    MissingCredential(String),
}

/// Result type alias for Reply-Trawl operations
pub type Result<T> = std::result::Result<T, TrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Extra wait added on top of every server-imposed back-off
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(1);

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Coordinator, RateLimiter, SearchCursor};
pub use state::CrawlPhase;
pub use storage::{Collection, Post, SqliteStorage, Storage, User};
