//! Size/age-triggered flush buffer for LLM batching.
//!
//! The queue buffers deferred work and flushes it to a handler when either
//! the occupancy reaches the size threshold or the oldest item's age
//! reaches the time threshold. A lightweight ticker task drives the age
//! trigger; the buffer itself is a single mutex — exclusive mutation, no
//! reads during mutation.
//!
//! Failure policy: a failed flush returns its items for re-queue with an
//! incremented attempt count; items that exhaust the retry cap are handed
//! to the handler's finalizer instead of being lost silently. `close`
//! performs one guaranteed final drain; the orchestrator calls it on every
//! cycle exit path.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::metrics;

/// Items buffered by the queue track their own flush attempts.
pub trait BatchItem: Send + 'static {
    /// Flush attempts made so far.
    fn attempts(&self) -> u32;
    /// Records one more flush attempt.
    fn record_attempt(&mut self);
}

/// Consumer of flushed batches.
#[async_trait]
pub trait FlushHandler<T: BatchItem>: Send + Sync {
    /// Processes one batch. On failure, returns the items that should be
    /// re-queued for another attempt.
    async fn flush(&self, batch: Vec<T>) -> Result<(), Vec<T>>;

    /// Finalizes an item dropped after exhausting its retries.
    fn finalize_dropped(&self, item: T);
}

/// Configuration for the batch queue.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Flush when occupancy reaches this size.
    pub size_threshold: usize,
    /// Flush when the oldest item reaches this age.
    pub time_threshold: Duration,
    /// Whether the age ticker runs at all.
    pub timer_enabled: bool,
    /// Flush attempts per item before it is dropped.
    pub retry_cap: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size_threshold: 10,
            time_threshold: Duration::from_secs(30),
            timer_enabled: true,
            retry_cap: 2,
        }
    }
}

struct Buffer<T> {
    items: Vec<T>,
    /// Arrival time of the oldest buffered item.
    oldest: Option<Instant>,
}

/// Thread-safe flush buffer with size and age triggers.
pub struct BatchQueue<T: BatchItem, H: FlushHandler<T>> {
    config: BatchConfig,
    handler: Arc<H>,
    buffer: Mutex<Buffer<T>>,
    closed: AtomicBool,
    ticker_wake: Notify,
    ticker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T: BatchItem, H: FlushHandler<T> + 'static> BatchQueue<T, H> {
    /// Creates an empty queue over the given handler.
    pub fn new(config: BatchConfig, handler: Arc<H>) -> Arc<Self> {
        Arc::new(Self {
            config,
            handler,
            buffer: Mutex::new(Buffer {
                items: Vec::new(),
                oldest: None,
            }),
            closed: AtomicBool::new(false),
            ticker_wake: Notify::new(),
            ticker_handle: Mutex::new(None),
        })
    }

    /// Appends an item; returns `true` when this enqueue fired the size
    /// trigger.
    pub async fn enqueue(self: &Arc<Self>, item: T) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            // The cycle is shutting down; finalize instead of buffering.
            self.handler.finalize_dropped(item);
            return false;
        }

        let batch = {
            let mut buffer = self.buffer.lock().await;
            if buffer.items.is_empty() {
                buffer.oldest = Some(Instant::now());
            }
            buffer.items.push(item);
            if buffer.items.len() >= self.config.size_threshold {
                Some(Self::drain_locked(&mut buffer))
            } else {
                None
            }
        };

        match batch {
            Some(batch) => {
                let queue = Arc::clone(self);
                tokio::spawn(async move {
                    queue.flush_batch(batch, "size").await;
                });
                true
            }
            None => false,
        }
    }

    /// Atomically extracts and clears the buffer.
    pub async fn drain(&self) -> Vec<T> {
        let mut buffer = self.buffer.lock().await;
        Self::drain_locked(&mut buffer)
    }

    /// Current occupancy.
    pub async fn len(&self) -> usize {
        self.buffer.lock().await.items.len()
    }

    /// Whether the buffer is empty.
    pub async fn is_empty(&self) -> bool {
        self.buffer.lock().await.items.is_empty()
    }

    /// Starts the age-trigger ticker.
    ///
    /// Wakes at most every second (faster only when the configured
    /// threshold is sub-second, so tests can exercise the trigger).
    pub async fn start_ticker(self: &Arc<Self>) {
        if !self.config.timer_enabled {
            return;
        }
        let queue = Arc::clone(self);
        let period = Duration::from_secs(1)
            .min(self.config.time_threshold / 3)
            .max(Duration::from_millis(10));

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    _ = queue.ticker_wake.notified() => break,
                }
                if queue.closed.load(Ordering::SeqCst) {
                    break;
                }

                let batch = {
                    let mut buffer = queue.buffer.lock().await;
                    let expired = buffer
                        .oldest
                        .is_some_and(|t| t.elapsed() >= queue.config.time_threshold);
                    if expired {
                        Some(Self::drain_locked(&mut buffer))
                    } else {
                        None
                    }
                };
                if let Some(batch) = batch {
                    queue.flush_batch(batch, "time").await;
                }
            }
        });
        *self.ticker_handle.lock().await = Some(handle);
    }

    /// Stops the ticker and performs the guaranteed final drain.
    ///
    /// Idempotent; later enqueues are finalized immediately instead of
    /// buffered.
    pub async fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.ticker_wake.notify_waiters();
        if let Some(handle) = self.ticker_handle.lock().await.take() {
            let _ = handle.await;
        }

        let batch = self.drain().await;
        if !batch.is_empty() {
            debug!(target: "batch", items = batch.len(), "Final drain on close");
            self.flush_batch(batch, "final").await;
        }
    }

    /// Runs one flush attempt and applies the retry policy.
    async fn flush_batch(self: &Arc<Self>, mut batch: Vec<T>, trigger: &str) {
        if batch.is_empty() {
            return;
        }
        for item in &mut batch {
            item.record_attempt();
        }
        let size = batch.len();

        match self.handler.flush(batch).await {
            Ok(()) => {
                metrics::inc_batch_flush(trigger, "ok");
                debug!(target: "batch", trigger, items = size, "Flush succeeded");
            }
            Err(returned) => {
                metrics::inc_batch_flush(trigger, "failed");
                let mut requeued = 0usize;
                let mut dropped = 0usize;
                for item in returned {
                    if item.attempts() > self.config.retry_cap
                        || self.closed.load(Ordering::SeqCst)
                    {
                        dropped += 1;
                        self.handler.finalize_dropped(item);
                    } else {
                        requeued += 1;
                        self.requeue(item).await;
                    }
                }
                warn!(
                    target: "batch",
                    trigger,
                    requeued,
                    dropped,
                    "Flush failed; applied retry policy"
                );
            }
        }
    }

    /// Returns an item to the buffer without firing the size trigger; the
    /// next time or size trigger picks it up.
    async fn requeue(&self, item: T) {
        let mut buffer = self.buffer.lock().await;
        if buffer.items.is_empty() {
            buffer.oldest = Some(Instant::now());
        }
        buffer.items.push(item);
    }

    fn drain_locked(buffer: &mut Buffer<T>) -> Vec<T> {
        buffer.oldest = None;
        std::mem::take(&mut buffer.items)
    }
}
