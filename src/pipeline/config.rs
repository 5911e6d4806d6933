//! Pipeline configuration.
//!
//! One flat set of knobs with documented defaults, overridable from the
//! environment (`TF_*` variables). Fatal misconfiguration (bad numbers,
//! out-of-range thresholds, missing database URL) refuses to start.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// One LLM provider slot, in fallback order.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Service key used for the breaker, limiter and metrics.
    pub service: String,
    /// Model requested from this provider.
    pub model: String,
    /// OpenAI-compatible endpoint base.
    pub api_base: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

impl ProviderConfig {
    fn new(service: &str, model: &str, api_base: &str, api_key_env: &str) -> Self {
        Self {
            service: service.to_string(),
            model: model.to_string(),
            api_base: api_base.to_string(),
            api_key_env: api_key_env.to_string(),
        }
    }
}

/// Configuration for the whole pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Fetch settings
    /// Global bound on concurrent feed fetches and entry processing.
    pub max_concurrency: usize,
    /// In-flight bound per publisher host.
    pub per_host_concurrency: usize,
    /// Connect+read timeout per feed request.
    pub fetch_timeout: Duration,
    /// Entries older than this are dropped at parse time.
    pub max_age_days: i64,

    // Filter settings
    /// Require qualifiers for ambiguous keywords.
    pub filter_strict: bool,
    /// Token window for co-occurrence validation.
    pub cooc_window_tokens: usize,

    // Batch queue settings
    /// Flush when this many entries are buffered.
    pub batch_size_threshold: usize,
    /// Flush when the oldest entry reaches this age.
    pub batch_time_threshold: Duration,
    /// Whether the age ticker runs.
    pub batch_timer_enabled: bool,
    /// Flush attempts per entry before it is dropped.
    pub batch_retry_cap: u32,

    // Location resolver settings
    /// Total budget shared across the cascade.
    pub location_total_timeout: Duration,
    /// Nominal budget for the entry-cache step.
    pub location_cache_timeout: Duration,
    /// Nominal budget for deterministic extraction.
    pub location_det_timeout: Duration,
    /// Nominal budget for reverse geocode attachment.
    pub location_reverse_timeout: Duration,

    // Circuit breaker settings
    /// Failure rate over the rolling window that opens a circuit.
    pub cb_failure_threshold: f64,
    /// Consecutive failures that open a circuit.
    pub cb_max_consecutive_failures: u32,
    /// Floor on the open duration.
    pub cb_recovery_timeout: Duration,
    /// Minimum calls before the rate condition applies.
    pub cb_request_volume_threshold: usize,
    /// Hard timeout on every guarded call.
    pub cb_call_timeout: Duration,

    // Rate limiter settings
    /// Longest wait for a token before failing the call.
    pub rate_limit_wait_cap: Duration,
    /// Per-service token budgets per minute.
    pub tokens_per_minute: HashMap<String, f64>,

    // Dedup settings
    /// Cosine similarity at which an alert is a semantic duplicate.
    pub dedup_semantic_threshold: f32,
    /// Alert embedding dimension.
    pub embedding_dimension: usize,

    // LLM settings
    /// Connect+read timeout for provider calls.
    pub llm_timeout: Duration,
    /// Provider chain in fallback order.
    pub providers: Vec<ProviderConfig>,

    // Storage settings
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Retention horizon applied by the external cleanup job.
    pub retention_days: i64,

    // Configuration files
    /// Feed catalogue path.
    pub feeds_path: PathBuf,
    /// Optional keyword table override path.
    pub keywords_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut tokens_per_minute = HashMap::new();
        tokens_per_minute.insert("openai".to_string(), 3000.0);
        tokens_per_minute.insert("xai".to_string(), 1500.0);
        tokens_per_minute.insert("deepseek".to_string(), 5000.0);
        tokens_per_minute.insert("llmb".to_string(), 1000.0);

        Self {
            max_concurrency: 16,
            per_host_concurrency: 2,
            fetch_timeout: Duration::from_secs(25),
            max_age_days: 30,

            filter_strict: true,
            cooc_window_tokens: 15,

            batch_size_threshold: 10,
            batch_time_threshold: Duration::from_secs(30),
            batch_timer_enabled: true,
            batch_retry_cap: 2,

            location_total_timeout: Duration::from_secs(10),
            location_cache_timeout: Duration::from_secs(1),
            location_det_timeout: Duration::from_secs(5),
            location_reverse_timeout: Duration::from_secs(3),

            cb_failure_threshold: 0.6,
            cb_max_consecutive_failures: 2,
            cb_recovery_timeout: Duration::from_secs(120),
            cb_request_volume_threshold: 3,
            cb_call_timeout: Duration::from_secs(30),

            rate_limit_wait_cap: Duration::from_secs(15),
            tokens_per_minute,

            dedup_semantic_threshold: 0.92,
            embedding_dimension: 1536,

            llm_timeout: Duration::from_secs(60),
            providers: vec![
                ProviderConfig::new(
                    "openai",
                    "gpt-4o-mini",
                    "https://api.openai.com/v1",
                    "OPENAI_API_KEY",
                ),
                ProviderConfig::new("xai", "grok-2-latest", "https://api.x.ai/v1", "XAI_API_KEY"),
                ProviderConfig::new(
                    "deepseek",
                    "deepseek-chat",
                    "https://api.deepseek.com/v1",
                    "DEEPSEEK_API_KEY",
                ),
                ProviderConfig::new(
                    "llmb",
                    "meta-llama/llama-3.3-70b-instruct:free",
                    "https://openrouter.ai/api/v1",
                    "LLMB_API_KEY",
                ),
            ],

            database_url: String::new(),
            retention_days: 180,

            feeds_path: PathBuf::from("config/feeds.yaml"),
            keywords_path: None,
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// How long a deferred entry may wait for its batch resolution:
    /// one full batch window plus the hard LLM budget plus slack for a
    /// single retry round.
    pub fn batch_wait(&self) -> Duration {
        self.batch_time_threshold + self.cb_call_timeout + Duration::from_secs(15)
    }

    /// Loads configuration from the environment.
    ///
    /// `DATABASE_URL` is required; every `TF_*` knob falls back to its
    /// default. Invalid values are fatal.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        config.database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;

        if let Ok(v) = std::env::var("TF_MAX_CONCURRENCY") {
            config.max_concurrency = parse_env(&v, "TF_MAX_CONCURRENCY")?;
        }
        if let Ok(v) = std::env::var("TF_PER_HOST_CONCURRENCY") {
            config.per_host_concurrency = parse_env(&v, "TF_PER_HOST_CONCURRENCY")?;
        }
        if let Ok(v) = std::env::var("TF_FETCH_TIMEOUT_S") {
            config.fetch_timeout = Duration::from_secs(parse_env(&v, "TF_FETCH_TIMEOUT_S")?);
        }
        if let Ok(v) = std::env::var("TF_MAX_AGE_DAYS") {
            config.max_age_days = parse_env(&v, "TF_MAX_AGE_DAYS")?;
        }
        if let Ok(v) = std::env::var("TF_FILTER_STRICT") {
            config.filter_strict = parse_env_bool(&v, "TF_FILTER_STRICT")?;
        }
        if let Ok(v) = std::env::var("TF_COOC_WINDOW_TOKENS") {
            config.cooc_window_tokens = parse_env(&v, "TF_COOC_WINDOW_TOKENS")?;
        }
        if let Ok(v) = std::env::var("TF_BATCH_SIZE_THRESHOLD") {
            config.batch_size_threshold = parse_env(&v, "TF_BATCH_SIZE_THRESHOLD")?;
        }
        if let Ok(v) = std::env::var("TF_BATCH_TIME_THRESHOLD_S") {
            config.batch_time_threshold =
                Duration::from_secs(parse_env(&v, "TF_BATCH_TIME_THRESHOLD_S")?);
        }
        if let Ok(v) = std::env::var("TF_BATCH_TIMER_ENABLED") {
            config.batch_timer_enabled = parse_env_bool(&v, "TF_BATCH_TIMER_ENABLED")?;
        }
        if let Ok(v) = std::env::var("TF_BATCH_RETRY_CAP") {
            config.batch_retry_cap = parse_env(&v, "TF_BATCH_RETRY_CAP")?;
        }
        if let Ok(v) = std::env::var("TF_LOCATION_TOTAL_TIMEOUT_S") {
            config.location_total_timeout =
                Duration::from_secs(parse_env(&v, "TF_LOCATION_TOTAL_TIMEOUT_S")?);
        }
        if let Ok(v) = std::env::var("TF_LOCATION_CACHE_TIMEOUT_S") {
            config.location_cache_timeout =
                Duration::from_secs(parse_env(&v, "TF_LOCATION_CACHE_TIMEOUT_S")?);
        }
        if let Ok(v) = std::env::var("TF_LOCATION_DET_TIMEOUT_S") {
            config.location_det_timeout =
                Duration::from_secs(parse_env(&v, "TF_LOCATION_DET_TIMEOUT_S")?);
        }
        if let Ok(v) = std::env::var("TF_LOCATION_REVERSE_TIMEOUT_S") {
            config.location_reverse_timeout =
                Duration::from_secs(parse_env(&v, "TF_LOCATION_REVERSE_TIMEOUT_S")?);
        }
        if let Ok(v) = std::env::var("TF_CB_FAILURE_THRESHOLD") {
            config.cb_failure_threshold = parse_env(&v, "TF_CB_FAILURE_THRESHOLD")?;
        }
        if let Ok(v) = std::env::var("TF_CB_MAX_CONSECUTIVE_FAILURES") {
            config.cb_max_consecutive_failures =
                parse_env(&v, "TF_CB_MAX_CONSECUTIVE_FAILURES")?;
        }
        if let Ok(v) = std::env::var("TF_CB_RECOVERY_TIMEOUT_S") {
            config.cb_recovery_timeout =
                Duration::from_secs(parse_env(&v, "TF_CB_RECOVERY_TIMEOUT_S")?);
        }
        if let Ok(v) = std::env::var("TF_CB_REQUEST_VOLUME_THRESHOLD") {
            config.cb_request_volume_threshold =
                parse_env(&v, "TF_CB_REQUEST_VOLUME_THRESHOLD")?;
        }
        if let Ok(v) = std::env::var("TF_CB_CALL_TIMEOUT_S") {
            config.cb_call_timeout = Duration::from_secs(parse_env(&v, "TF_CB_CALL_TIMEOUT_S")?);
        }
        if let Ok(v) = std::env::var("TF_RATE_LIMIT_WAIT_CAP_S") {
            config.rate_limit_wait_cap =
                Duration::from_secs(parse_env(&v, "TF_RATE_LIMIT_WAIT_CAP_S")?);
        }
        if let Ok(v) = std::env::var("TF_DEDUP_SEMANTIC_THRESHOLD") {
            config.dedup_semantic_threshold = parse_env(&v, "TF_DEDUP_SEMANTIC_THRESHOLD")?;
        }
        if let Ok(v) = std::env::var("TF_EMBEDDING_DIMENSION") {
            config.embedding_dimension = parse_env(&v, "TF_EMBEDDING_DIMENSION")?;
        }
        if let Ok(v) = std::env::var("TF_LLM_TIMEOUT_S") {
            config.llm_timeout = Duration::from_secs(parse_env(&v, "TF_LLM_TIMEOUT_S")?);
        }
        if let Ok(v) = std::env::var("TF_RETENTION_DAYS") {
            config.retention_days = parse_env(&v, "TF_RETENTION_DAYS")?;
        }
        if let Ok(v) = std::env::var("TF_FEEDS_PATH") {
            config.feeds_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("TF_KEYWORDS_PATH") {
            config.keywords_path = Some(PathBuf::from(v));
        }

        // Per-service token budgets: TF_TPM_OPENAI etc.
        for service in ["openai", "xai", "deepseek", "llmb"] {
            let var = format!("TF_TPM_{}", service.to_uppercase());
            if let Ok(v) = std::env::var(&var) {
                config
                    .tokens_per_minute
                    .insert(service.to_string(), parse_env(&v, &var)?);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.cb_failure_threshold) {
            return Err(ConfigError::ValidationFailed(
                "cb_failure_threshold must be within [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.dedup_semantic_threshold) {
            return Err(ConfigError::ValidationFailed(
                "dedup_semantic_threshold must be within [0, 1]".to_string(),
            ));
        }
        if self.batch_size_threshold == 0 {
            return Err(ConfigError::ValidationFailed(
                "batch_size_threshold must be at least 1".to_string(),
            ));
        }
        if self.providers.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "at least one LLM provider must be configured".to_string(),
            ));
        }
        Ok(())
    }

    /// Token budget for a service, with a conservative default.
    pub fn tokens_per_minute_for(&self, service: &str) -> f64 {
        self.tokens_per_minute.get(service).copied().unwrap_or(600.0)
    }
}

fn parse_env<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{}", e),
    })
}

fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{}' is not a boolean", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_concurrency, 16);
        assert_eq!(config.per_host_concurrency, 2);
        assert_eq!(config.fetch_timeout, Duration::from_secs(25));
        assert_eq!(config.cooc_window_tokens, 15);
        assert_eq!(config.batch_size_threshold, 10);
        assert_eq!(config.batch_time_threshold, Duration::from_secs(30));
        assert_eq!(config.batch_retry_cap, 2);
        assert_eq!(config.location_total_timeout, Duration::from_secs(10));
        assert_eq!(config.cb_max_consecutive_failures, 2);
        assert_eq!(config.cb_recovery_timeout, Duration::from_secs(120));
        assert_eq!(config.rate_limit_wait_cap, Duration::from_secs(15));
        assert!((config.dedup_semantic_threshold - 0.92).abs() < 1e-6);
        assert_eq!(config.retention_days, 180);
        assert_eq!(config.tokens_per_minute_for("openai"), 3000.0);
        assert_eq!(config.tokens_per_minute_for("deepseek"), 5000.0);
    }

    #[test]
    fn test_provider_chain_order() {
        let config = PipelineConfig::default();
        let services: Vec<&str> = config.providers.iter().map(|p| p.service.as_str()).collect();
        assert_eq!(services, vec!["openai", "xai", "deepseek", "llmb"]);
    }

    #[test]
    fn test_batch_wait_exceeds_batch_window() {
        let config = PipelineConfig::default();
        assert!(config.batch_wait() > config.batch_time_threshold);
        assert!(config.batch_wait() > config.cb_call_timeout);
    }

    #[test]
    fn test_validate_rejects_bad_thresholds() {
        let mut config = PipelineConfig::default();
        config.cb_failure_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.max_concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.providers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_env_bool() {
        assert!(parse_env_bool("true", "K").expect("ok"));
        assert!(parse_env_bool("1", "K").expect("ok"));
        assert!(!parse_env_bool("off", "K").expect("ok"));
        assert!(parse_env_bool("maybe", "K").is_err());
    }

    #[test]
    fn test_unknown_service_gets_conservative_budget() {
        let config = PipelineConfig::default();
        assert_eq!(config.tokens_per_minute_for("other"), 600.0);
    }
}
