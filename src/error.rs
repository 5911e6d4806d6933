//! Error types for threatforge operations.
//!
//! Defines error types for the major subsystems:
//! - Feed fetching and parsing
//! - LLM provider interactions
//! - Location resolution
//! - Configuration loading
//!
//! Component-local errors (batch queue, circuit breaker, rate limiter,
//! database, pipeline) live next to their components.

use thiserror::Error;

/// Errors that can occur while fetching or parsing a feed.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Response body exceeds {limit_bytes} bytes")]
    BodyTooLarge { limit_bytes: usize },

    #[error("Feed parse failed: {0}")]
    Parse(String),

    #[error("Invalid feed url '{0}'")]
    InvalidUrl(String),
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key for provider '{0}'")]
    MissingApiKey(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Call timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Circuit open for '{service}', retry after {retry_after_s} seconds")]
    CircuitOpen { service: String, retry_after_s: u64 },

    #[error("Rate limit wait exhausted for '{service}'")]
    RateLimitExceeded { service: String },

    #[error("All providers in the chain failed. Last error: {0}")]
    AllProvidersFailed(String),

    #[error("Empty completion from provider '{0}'")]
    EmptyCompletion(String),
}

/// Errors that can occur during location resolution.
#[derive(Debug, Error)]
pub enum LocationError {
    #[error("Batch location call failed: {0}")]
    BatchCall(String),

    #[error("Batch reply parse failed: {0}")]
    BatchParse(String),

    #[error("Resolution budget exhausted")]
    BudgetExhausted,
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid feed catalogue: {0}")]
    InvalidCatalogue(String),

    #[error("Invalid keyword table: {0}")]
    InvalidKeywords(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_error_display() {
        let err = FeedError::HttpStatus {
            status: 503,
            url: "https://example.com/rss".to_string(),
        };
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("example.com"));
    }

    #[test]
    fn test_llm_error_display() {
        let err = LlmError::CircuitOpen {
            service: "openai".to_string(),
            retry_after_s: 42,
        };
        assert!(err.to_string().contains("openai"));
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue {
            key: "TF_MAX_CONCURRENCY".to_string(),
            message: "not a number".to_string(),
        };
        assert!(err.to_string().contains("TF_MAX_CONCURRENCY"));
    }
}
