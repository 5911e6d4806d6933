//! Resilience primitives for external calls: circuit breaker and
//! token-bucket rate limiter. Every LLM and geocoding call passes through
//! both, rate limiter outermost.

pub mod circuit_breaker;
pub mod rate_limiter;

pub use circuit_breaker::{BreakerConfig, BreakerError, CircuitBreaker, CircuitState};
pub use rate_limiter::{RateLimitError, RateLimiter, RateLimiterConfig};
