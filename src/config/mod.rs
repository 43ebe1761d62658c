//! Configuration module for Reply-Trawl
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use reply_trawl::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("trawl.toml")).unwrap();
//! println!("Crawling replies of the top {}%", config.search.top_percent);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    ApiConfig, Config, OutputConfig, PipelineConfig, RankingConfig, RateLimitConfig,
    SearchConfig, SearchMethod, SentimentConfig, WindowConfig,
};

// Re-export parser functions
pub use parser::{
    compute_config_hash, load_config, load_config_with_hash, parse_config, resolve_bearer_token,
};
pub use validation::{parse_timestamp, validate};
