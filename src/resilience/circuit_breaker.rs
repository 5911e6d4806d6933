//! Circuit breaker for external service calls.
//!
//! One breaker instance wraps each external service (LLM provider,
//! geocoder). States: **closed** (traffic passes), **open** (calls fail
//! fast), **half-open** (a single probe is admitted).
//!
//! The breaker opens on a consecutive-failure streak or on the failure rate
//! over a rolling outcome window. While open it refuses calls with the
//! remaining wait; after the backoff elapses one probe decides whether to
//! close again. Every admitted call is additionally bounded by a hard
//! timeout, and a timeout counts as a failure.

use rand::RngExt;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Error returned by a breaker-wrapped call.
#[derive(Debug, Error)]
pub enum BreakerError<E: std::fmt::Display> {
    /// The circuit is open; no outbound call was made.
    #[error("Circuit open; retry after {retry_after_s} s")]
    Open { retry_after_s: u64 },

    /// The call exceeded the hard timeout.
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    /// The call itself failed.
    #[error("{0}")]
    Inner(E),
}

/// Breaker state visible to callers and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Configuration for one circuit breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failure rate over the rolling window that trips the breaker.
    pub failure_threshold: f64,
    /// Consecutive failures that trip the breaker regardless of rate.
    pub max_consecutive_failures: u32,
    /// Minimum calls in the window before the rate condition applies.
    pub request_volume_threshold: usize,
    /// Floor on the open duration.
    pub recovery_timeout: Duration,
    /// Hard timeout on every admitted call.
    pub call_timeout: Duration,
    /// Exponential backoff base.
    pub backoff_base: Duration,
    /// Exponential backoff multiplier.
    pub backoff_multiplier: f64,
    /// Cap on the open duration.
    pub backoff_max: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 0.6,
            max_consecutive_failures: 2,
            request_volume_threshold: 3,
            recovery_timeout: Duration::from_secs(120),
            call_timeout: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            backoff_max: Duration::from_secs(300),
        }
    }
}

/// Rolling window size for the failure-rate condition.
const OUTCOME_WINDOW: usize = 10;

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    /// Recent call outcomes, `true` meaning failure.
    outcomes: VecDeque<bool>,
    opened_at: Option<Instant>,
    open_duration: Duration,
    probe_in_flight: bool,
}

/// Circuit breaker guarding one external service.
pub struct CircuitBreaker {
    service: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker for the named service.
    pub fn new(service: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                outcomes: VecDeque::with_capacity(OUTCOME_WINDOW),
                opened_at: None,
                open_duration: Duration::ZERO,
                probe_in_flight: false,
            }),
        }
    }

    /// Name of the guarded service.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Runs a call through the breaker with the hard timeout applied.
    pub async fn call<T, E, Fut>(&self, fut: Fut) -> Result<T, BreakerError<E>>
    where
        E: std::fmt::Display,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Err(retry_after_s) = self.admit() {
            return Err(BreakerError::Open { retry_after_s });
        }

        match tokio::time::timeout(self.config.call_timeout, fut).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
            Err(_) => {
                self.record_failure();
                Err(BreakerError::Timeout(self.config.call_timeout))
            }
        }
    }

    /// Admits or refuses a call; refusal carries the retry-after seconds.
    fn admit(&self) -> Result<(), u64> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= inner.open_duration {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(
                        target: "resilience",
                        service = %self.service,
                        "Circuit half-open; admitting probe"
                    );
                    Ok(())
                } else {
                    let retry_after = inner.open_duration - elapsed;
                    Err(retry_after.as_secs().max(1))
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(1)
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        push_outcome(&mut inner.outcomes, false);

        if inner.state != CircuitState::Closed {
            info!(
                target: "resilience",
                service = %self.service,
                "Circuit closed after successful probe"
            );
        }
        inner.state = CircuitState::Closed;
        inner.probe_in_flight = false;
        inner.opened_at = None;
    }

    /// Records a failed or timed-out call, possibly opening the circuit.
    ///
    /// Also used by call sites for failures observed outside the breaker,
    /// such as an exhausted rate-limit wait.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures += 1;
        push_outcome(&mut inner.outcomes, true);
        inner.probe_in_flight = false;

        let streak_tripped = inner.consecutive_failures >= self.config.max_consecutive_failures;
        let rate_tripped = self.failure_rate_tripped(&inner);
        let was_half_open = inner.state == CircuitState::HalfOpen;

        if streak_tripped || rate_tripped || was_half_open {
            let duration = self.next_open_duration(inner.consecutive_failures);
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.open_duration = duration;
            warn!(
                target: "resilience",
                service = %self.service,
                consecutive_failures = inner.consecutive_failures,
                open_for_s = duration.as_secs(),
                "Circuit opened"
            );
        }
    }

    fn failure_rate_tripped(&self, inner: &BreakerInner) -> bool {
        if inner.outcomes.len() < self.config.request_volume_threshold {
            return false;
        }
        let failures = inner.outcomes.iter().filter(|f| **f).count();
        let rate = failures as f64 / inner.outcomes.len() as f64;
        rate >= self.config.failure_threshold
    }

    /// Open duration: exponential in the failure streak, floored at the
    /// configured recovery timeout, capped, with ±20 % jitter.
    fn next_open_duration(&self, consecutive_failures: u32) -> Duration {
        let exp = self.config.backoff_base.as_secs_f64()
            * self
                .config
                .backoff_multiplier
                .powi(consecutive_failures.min(30) as i32);
        let floored = exp.max(self.config.recovery_timeout.as_secs_f64());
        let capped = floored.min(self.config.backoff_max.as_secs_f64());
        let jitter = rand::rng().random_range(0.8..=1.2);
        Duration::from_secs_f64(capped * jitter)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().expect("breaker lock poisoned")
    }
}

fn push_outcome(outcomes: &mut VecDeque<bool>, failed: bool) {
    if outcomes.len() == OUTCOME_WINDOW {
        outcomes.pop_front();
    }
    outcomes.push_back(failed);
}
