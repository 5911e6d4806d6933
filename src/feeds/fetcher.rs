//! Concurrent feed fetch fan-out.
//!
//! Fetches every catalogue feed with a global concurrency bound and a
//! per-host in-flight bound, parses the bodies, and streams accepted
//! entries to the pipeline as they arrive. A failing feed is logged and
//! skipped for the rest of the cycle; the next scheduled cycle retries it
//! naturally.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use super::catalogue::{FeedCatalogue, FeedSource};
use super::parser::{self, ParseOutcome};
use super::types::Entry;
use crate::error::FeedError;
use crate::metrics;

/// Buffer between the fetch fan-out and the per-entry pipeline.
const ENTRY_CHANNEL_CAPACITY: usize = 256;

/// Configuration for the feed fetcher.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Global bound on concurrent feed fetches.
    pub max_concurrency: usize,
    /// In-flight bound per publisher host.
    pub per_host_concurrency: usize,
    /// Connect+read timeout per request.
    pub fetch_timeout: Duration,
    /// Entries older than this many days are dropped at parse time.
    pub max_age_days: i64,
    /// Cap on response body size.
    pub max_body_bytes: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
            per_host_concurrency: 2,
            fetch_timeout: Duration::from_secs(25),
            max_age_days: 30,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Concurrent fetcher over the feed catalogue.
pub struct FeedFetcher {
    client: Client,
    config: FetcherConfig,
    /// Lazily-created per-host semaphores.
    host_limits: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl FeedFetcher {
    /// Creates a fetcher with its own HTTP client.
    pub fn new(config: FetcherConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(config.fetch_timeout)
            .user_agent(concat!("threatforge/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            config,
            host_limits: Mutex::new(HashMap::new()),
        }
    }

    /// Fans out over the catalogue and streams accepted entries.
    ///
    /// Entries from one feed arrive in feed delivery order; no ordering is
    /// promised across feeds. Dropping the returned stream cancels
    /// outstanding work at the next send.
    pub fn fetch_all(self: &Arc<Self>, catalogue: FeedCatalogue) -> ReceiverStream<Entry> {
        let (tx, rx) = mpsc::channel(ENTRY_CHANNEL_CAPACITY);
        let fetcher = Arc::clone(self);
        let max_concurrency = fetcher.config.max_concurrency.max(1);

        tokio::spawn(async move {
            let cutoff = Utc::now() - chrono::Duration::days(fetcher.config.max_age_days);
            stream::iter(catalogue.feeds)
                .map(|source| {
                    let fetcher = Arc::clone(&fetcher);
                    let tx = tx.clone();
                    async move {
                        if tx.is_closed() {
                            return;
                        }
                        fetcher.fetch_and_forward(&source, cutoff, tx).await;
                    }
                })
                .buffer_unordered(max_concurrency)
                .for_each(|_| async {})
                .await;
        });

        ReceiverStream::new(rx)
    }

    /// Fetches one feed and forwards its entries to the pipeline channel.
    async fn fetch_and_forward(
        &self,
        source: &FeedSource,
        cutoff: chrono::DateTime<Utc>,
        tx: mpsc::Sender<Entry>,
    ) {
        let started = Instant::now();
        match self.fetch_feed(source, cutoff).await {
            Ok(outcome) => {
                metrics::observe_feed_fetch(&source.tag, started.elapsed(), outcome.entries.len());
                debug!(
                    target: "feeds",
                    source = %source.tag,
                    entries = outcome.entries.len(),
                    latency_ms = started.elapsed().as_millis() as u64,
                    "Feed fetched"
                );
                for entry in outcome.entries {
                    if tx.send(entry).await.is_err() {
                        // Receiver gone: the cycle was cancelled.
                        return;
                    }
                }
            }
            Err(e) => {
                metrics::inc_feed_error(&source.tag);
                warn!(
                    target: "feeds",
                    url = %source.url,
                    latency_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "Feed fetch failed; skipped until next cycle"
                );
            }
        }
    }

    /// Fetches and parses a single feed under the per-host bound.
    async fn fetch_feed(
        &self,
        source: &FeedSource,
        cutoff: chrono::DateTime<Utc>,
    ) -> Result<ParseOutcome, FeedError> {
        let host = host_of(&source.url)?;
        let limiter = self.host_limit(&host);
        let _permit = limiter
            .acquire()
            .await
            .expect("host semaphore is never closed");

        let response = self
            .client
            .get(&source.url)
            .timeout(self.config.fetch_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::HttpStatus {
                status: status.as_u16(),
                url: source.url.clone(),
            });
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.config.max_body_bytes {
                return Err(FeedError::BodyTooLarge {
                    limit_bytes: self.config.max_body_bytes,
                });
            }
        }

        let body = response.bytes().await?;
        if body.len() > self.config.max_body_bytes {
            return Err(FeedError::BodyTooLarge {
                limit_bytes: self.config.max_body_bytes,
            });
        }

        parser::parse_feed(&body, source, cutoff)
    }

    /// Returns the semaphore bounding in-flight requests to `host`.
    fn host_limit(&self, host: &str) -> Arc<Semaphore> {
        let mut limits = self.host_limits.lock().expect("host limit lock poisoned");
        limits
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.per_host_concurrency.max(1))))
            .clone()
    }
}

/// Extracts the host component used for per-host throttling.
fn host_of(url: &str) -> Result<String, FeedError> {
    let parsed = reqwest::Url::parse(url).map_err(|_| FeedError::InvalidUrl(url.to_string()))?;
    parsed
        .host_str()
        .map(|h| h.to_string())
        .ok_or_else(|| FeedError::InvalidUrl(url.to_string()))
}
