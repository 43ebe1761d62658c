use crate::config::types::{ApiConfig, Config, OutputConfig, RateLimitConfig, SearchConfig};
use crate::ConfigError;
use chrono::{DateTime, Utc};
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_api_config(&config.api)?;
    validate_search_config(&config.search)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_output_config(&config.output)?;

    if let Some(sentiment) = &config.sentiment {
        validate_http_url("sentiment endpoint", &sentiment.endpoint)?;
        if sentiment.batch_size == 0 {
            return Err(ConfigError::Validation(
                "sentiment batch-size must be >= 1".to_string(),
            ));
        }
    }

    if config.pipeline.depth == 0 {
        return Err(ConfigError::Validation(
            "pipeline depth must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates API access configuration
fn validate_api_config(config: &ApiConfig) -> Result<(), ConfigError> {
    validate_http_url("base-url", &config.base_url)?;

    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates the search window and crawl bounds
fn validate_search_config(config: &SearchConfig) -> Result<(), ConfigError> {
    if config.query.trim().is_empty() {
        return Err(ConfigError::Validation(
            "search query cannot be empty".to_string(),
        ));
    }

    let start = config
        .start_time
        .as_deref()
        .map(|s| parse_timestamp("start-time", s))
        .transpose()?;
    let end = config
        .end_time
        .as_deref()
        .map(|s| parse_timestamp("end-time", s))
        .transpose()?;

    if let (Some(start), Some(end)) = (start, end) {
        if start >= end {
            return Err(ConfigError::Validation(format!(
                "start-time {} must be before end-time {}",
                start, end
            )));
        }
    }

    if config.top_percent > 100 {
        return Err(ConfigError::Validation(format!(
            "top-percent must be between 0 and 100, got {}",
            config.top_percent
        )));
    }

    if !(10..=100).contains(&config.page_size) {
        return Err(ConfigError::Validation(format!(
            "page-size must be between 10 and 100, got {}",
            config.page_size
        )));
    }

    if config.limit == Some(0) {
        return Err(ConfigError::Validation("limit must be >= 1".to_string()));
    }

    Ok(())
}

/// Validates the rate windows
fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    if config.windows.is_empty() {
        return Err(ConfigError::Validation(
            "at least one rate-limit window is required".to_string(),
        ));
    }

    for window in &config.windows {
        if window.max_requests == 0 || window.period_secs == 0 {
            return Err(ConfigError::Validation(format!(
                "rate-limit window needs positive values, got {} per {}s",
                window.max_requests, window.period_secs
            )));
        }
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if config.read_page_size == 0 {
        return Err(ConfigError::Validation(
            "read-page-size must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Parses an RFC 3339 timestamp from the config
pub fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, ConfigError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            ConfigError::Validation(format!("{} '{}' is not RFC 3339: {}", field, value, e))
        })
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {}: {}", field, e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' must use http or https",
            field, value
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp() {
        assert!(parse_timestamp("start-time", "2023-01-01T00:00:00Z").is_ok());
        assert!(parse_timestamp("start-time", "2023-01-01T00:00:00+02:00").is_ok());

        assert!(parse_timestamp("start-time", "").is_err());
        assert!(parse_timestamp("start-time", "2023-01-01").is_err());
        assert!(parse_timestamp("start-time", "yesterday").is_err());
    }

    #[test]
    fn test_validate_http_url() {
        assert!(validate_http_url("base-url", "https://api.twitter.com/2").is_ok());
        assert!(validate_http_url("base-url", "http://127.0.0.1:8080").is_ok());

        assert!(validate_http_url("base-url", "ftp://example.com").is_err());
        assert!(validate_http_url("base-url", "not a url").is_err());
    }

    #[test]
    fn test_search_window_order() {
        let config = SearchConfig {
            query: "rust".to_string(),
            start_time: Some("2023-02-01T00:00:00Z".to_string()),
            end_time: Some("2023-01-01T00:00:00Z".to_string()),
            limit: None,
            top_percent: 5,
            page_size: 100,
        };
        assert!(matches!(
            validate_search_config(&config),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_rate_windows_must_be_positive() {
        let config = RateLimitConfig {
            safety_margin_ms: 0,
            windows: vec![crate::config::WindowConfig {
                max_requests: 0,
                period_secs: 1,
            }],
        };
        assert!(validate_rate_limit_config(&config).is_err());

        let empty = RateLimitConfig {
            safety_margin_ms: 0,
            windows: vec![],
        };
        assert!(validate_rate_limit_config(&empty).is_err());
    }
}
