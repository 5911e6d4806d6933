//! Token-bucket rate limiting for external services.
//!
//! One bucket per service, refilled continuously at
//! `tokens_per_minute / 60` per second. `acquire` waits for a token up to
//! the configured cap, then fails fast so the caller can treat the call as
//! a transient failure. The rate limiter is the outer wrapper around the
//! circuit breaker at every call site.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

/// Error returned when the wait cap elapses without a token.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Rate limit wait exhausted for '{service}' after {waited_ms} ms")]
    Exhausted { service: String, waited_ms: u64 },
}

/// Configuration for one token bucket.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Sustained token budget per minute; also the burst capacity.
    pub tokens_per_minute: f64,
    /// Longest a caller may wait for a token.
    pub wait_cap: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            tokens_per_minute: 3000.0,
            wait_cap: Duration::from_secs(15),
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket guarding one external service.
pub struct RateLimiter {
    service: String,
    capacity: f64,
    refill_per_sec: f64,
    wait_cap: Duration,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Creates a full bucket for the named service.
    pub fn new(service: impl Into<String>, config: RateLimiterConfig) -> Self {
        let capacity = config.tokens_per_minute.max(1.0);
        Self {
            service: service.into(),
            capacity,
            refill_per_sec: capacity / 60.0,
            wait_cap: config.wait_cap,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Name of the guarded service.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Takes one token, waiting up to the cap.
    pub async fn acquire(&self) -> Result<(), RateLimitError> {
        let started = Instant::now();
        let deadline = started + self.wait_cap;

        loop {
            let wait = {
                let mut state = self.state.lock().expect("bucket lock poisoned");
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }
                // Time until one whole token accrues.
                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec)
            };

            let now = Instant::now();
            if now + wait > deadline {
                warn!(
                    target: "resilience",
                    service = %self.service,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Rate limit wait cap exceeded"
                );
                return Err(RateLimitError::Exhausted {
                    service: self.service.clone(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently available (refilled to now).
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock().expect("bucket lock poisoned");
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState) {
        let elapsed = state.last_refill.elapsed();
        state.last_refill = Instant::now();
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.refill_per_sec)
            .min(self.capacity);
    }
}
