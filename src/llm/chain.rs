//! Provider chain: ordered fallback across LLM services.
//!
//! Providers are tried in configuration order (primary, secondary,
//! tertiary, free fallback) until one returns a usable completion. Every
//! call passes through the service's rate limiter first and its circuit
//! breaker second; an exhausted rate-limit wait is recorded as a breaker
//! failure like any other transient fault.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::client::{ChatRequest, LlmProvider, Message};
use crate::error::LlmError;
use crate::metrics;
use crate::resilience::{BreakerError, CircuitBreaker, RateLimiter};

/// A successful completion and the model that produced it.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub model_used: String,
}

/// One provider slot in the chain.
pub struct ChainProvider {
    /// Service key ("openai", "xai", "deepseek", "llmb").
    pub service: String,
    /// Model requested from this provider.
    pub model: String,
    /// The provider implementation.
    pub provider: Arc<dyn LlmProvider>,
    /// Process-wide breaker for this service.
    pub breaker: Arc<CircuitBreaker>,
    /// Process-wide rate limiter for this service.
    pub limiter: Arc<RateLimiter>,
}

/// Ordered fallback chain over LLM providers.
pub struct ProviderChain {
    providers: Vec<ChainProvider>,
}

impl ProviderChain {
    /// Creates a chain from providers in fallback order.
    pub fn new(providers: Vec<ChainProvider>) -> Self {
        Self { providers }
    }

    /// Number of configured providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the chain has no providers.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Models in fallback order, for logging.
    pub fn models(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.model.clone()).collect()
    }

    /// Runs a system+user prompt down the chain until a provider succeeds.
    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<Completion, LlmError> {
        if self.providers.is_empty() {
            return Err(LlmError::AllProvidersFailed("no providers configured".to_string()));
        }

        let mut last_error: Option<LlmError> = None;

        for slot in &self.providers {
            match self.try_provider(slot, system, user, temperature, max_tokens).await {
                Ok(completion) => return Ok(completion),
                Err(e) => {
                    warn!(
                        target: "llm",
                        service = %slot.service,
                        model = %slot.model,
                        error = %e,
                        "Provider failed, trying next in chain"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(LlmError::AllProvidersFailed(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no providers tried".to_string()),
        ))
    }

    async fn try_provider(
        &self,
        slot: &ChainProvider,
        system: &str,
        user: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<Completion, LlmError> {
        if slot.limiter.acquire().await.is_err() {
            // The wait cap elapsed: a transient failure as far as the
            // breaker is concerned.
            slot.breaker.record_failure();
            metrics::inc_llm_request(&slot.service, "rate_limited");
            return Err(LlmError::RateLimitExceeded {
                service: slot.service.clone(),
            });
        }

        let request = ChatRequest::new(
            slot.model.clone(),
            vec![Message::system(system), Message::user(user)],
        )
        .with_temperature(temperature)
        .with_max_tokens(max_tokens);

        let started = Instant::now();
        let result = slot.breaker.call(slot.provider.chat(request)).await;
        metrics::observe_llm_latency(&slot.service, started.elapsed());

        match result {
            Ok(response) => {
                let content = response
                    .first_content()
                    .map(|c| c.to_string())
                    .ok_or_else(|| LlmError::EmptyCompletion(slot.model.clone()))?;
                metrics::inc_llm_request(&slot.service, "ok");
                debug!(
                    target: "llm",
                    service = %slot.service,
                    model = %slot.model,
                    latency_ms = started.elapsed().as_millis() as u64,
                    "Completion succeeded"
                );
                Ok(Completion {
                    content,
                    model_used: slot.model.clone(),
                })
            }
            Err(BreakerError::Open { retry_after_s }) => {
                metrics::inc_llm_request(&slot.service, "circuit_open");
                Err(LlmError::CircuitOpen {
                    service: slot.service.clone(),
                    retry_after_s,
                })
            }
            Err(BreakerError::Timeout(d)) => {
                metrics::inc_llm_request(&slot.service, "timeout");
                Err(LlmError::Timeout { seconds: d.as_secs() })
            }
            Err(BreakerError::Inner(e)) => {
                metrics::inc_llm_request(&slot.service, "error");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::{ChatResponse, Choice};
    use crate::resilience::{BreakerConfig, RateLimiterConfig};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    /// Mock provider with a switchable failure mode.
    struct MockProvider {
        reply: String,
        should_fail: AtomicBool,
        calls: AtomicU32,
    }

    impl MockProvider {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                should_fail: AtomicBool::new(false),
                calls: AtomicU32::new(0),
            }
        }

        fn failing(reply: &str) -> Self {
            let p = Self::new(reply);
            p.should_fail.store(true, Ordering::SeqCst);
            p
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.should_fail.load(Ordering::SeqCst) {
                return Err(LlmError::RequestFailed("mock failure".to_string()));
            }
            Ok(ChatResponse {
                model: "mock".to_string(),
                choices: vec![Choice {
                    message: Message {
                        role: "assistant".to_string(),
                        content: self.reply.clone(),
                    },
                    finish_reason: Some("stop".to_string()),
                }],
                usage: None,
            })
        }
    }

    fn slot(service: &str, provider: Arc<MockProvider>) -> ChainProvider {
        ChainProvider {
            service: service.to_string(),
            model: format!("{}-model", service),
            provider,
            breaker: Arc::new(CircuitBreaker::new(service, BreakerConfig::default())),
            limiter: Arc::new(RateLimiter::new(service, RateLimiterConfig::default())),
        }
    }

    #[tokio::test]
    async fn test_primary_success_short_circuits() {
        let primary = Arc::new(MockProvider::new("primary reply"));
        let secondary = Arc::new(MockProvider::new("secondary reply"));
        let chain = ProviderChain::new(vec![
            slot("openai", Arc::clone(&primary)),
            slot("xai", Arc::clone(&secondary)),
        ]);

        let completion = chain.complete("sys", "user", 0.2, 256).await.expect("ok");
        assert_eq!(completion.content, "primary reply");
        assert_eq!(completion.model_used, "openai-model");
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn test_fallback_on_primary_failure() {
        let primary = Arc::new(MockProvider::failing("unused"));
        let secondary = Arc::new(MockProvider::new("fallback reply"));
        let chain = ProviderChain::new(vec![
            slot("openai", primary),
            slot("xai", Arc::clone(&secondary)),
        ]);

        let completion = chain.complete("sys", "user", 0.2, 256).await.expect("ok");
        assert_eq!(completion.content, "fallback reply");
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test]
    async fn test_all_providers_failed() {
        let chain = ProviderChain::new(vec![
            slot("openai", Arc::new(MockProvider::failing("x"))),
            slot("xai", Arc::new(MockProvider::failing("y"))),
        ]);

        let result = chain.complete("sys", "user", 0.2, 256).await;
        assert!(matches!(result, Err(LlmError::AllProvidersFailed(_))));
    }

    #[tokio::test]
    async fn test_empty_chain_fails() {
        let chain = ProviderChain::new(Vec::new());
        let result = chain.complete("sys", "user", 0.2, 256).await;
        assert!(matches!(result, Err(LlmError::AllProvidersFailed(_))));
    }

    #[tokio::test]
    async fn test_open_circuit_skips_outbound_call() {
        let provider = Arc::new(MockProvider::failing("x"));
        let breaker = Arc::new(CircuitBreaker::new(
            "openai",
            BreakerConfig {
                max_consecutive_failures: 1,
                recovery_timeout: Duration::from_secs(60),
                ..BreakerConfig::default()
            },
        ));
        let chain = ProviderChain::new(vec![ChainProvider {
            service: "openai".to_string(),
            model: "m".to_string(),
            provider: Arc::clone(&provider) as Arc<dyn LlmProvider>,
            breaker,
            limiter: Arc::new(RateLimiter::new("openai", RateLimiterConfig::default())),
        }]);

        // First call fails and trips the breaker.
        let _ = chain.complete("sys", "user", 0.2, 256).await;
        assert_eq!(provider.calls(), 1);

        // Second call is refused without reaching the provider.
        let _ = chain.complete("sys", "user", 0.2, 256).await;
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_exhaustion_counts_as_breaker_failure() {
        let provider = Arc::new(MockProvider::new("reply"));
        let breaker = Arc::new(CircuitBreaker::new(
            "openai",
            BreakerConfig {
                max_consecutive_failures: 1,
                recovery_timeout: Duration::from_secs(60),
                ..BreakerConfig::default()
            },
        ));
        let limiter = Arc::new(RateLimiter::new(
            "openai",
            RateLimiterConfig {
                tokens_per_minute: 1.0,
                wait_cap: Duration::from_millis(20),
            },
        ));
        let chain = ProviderChain::new(vec![ChainProvider {
            service: "openai".to_string(),
            model: "m".to_string(),
            provider: Arc::clone(&provider) as Arc<dyn LlmProvider>,
            breaker: Arc::clone(&breaker),
            limiter,
        }]);

        // First call consumes the only token.
        chain.complete("sys", "user", 0.2, 256).await.expect("ok");
        // Second call exhausts the wait and records a breaker failure,
        // which trips the breaker at threshold 1.
        let result = chain.complete("sys", "user", 0.2, 256).await;
        assert!(matches!(result, Err(LlmError::AllProvidersFailed(_))));
        assert_eq!(breaker.state(), crate::resilience::CircuitState::Open);
    }
}
