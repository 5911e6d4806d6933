//! Pipeline orchestrator: one fetch cycle end to end.
//!
//! Wires fetch fan-out, content filter, location resolution, dedup,
//! enrichment and storage. Entries stream through concurrently under the
//! worker bound; raw items and alerts are buffered and bulk-saved at cycle
//! end. The batch queue is drained on every exit path, success or not, so
//! the next cycle always starts empty.

use futures::stream::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::batch::{BatchConfig, BatchQueue};
use crate::dedup::Deduplicator;
use crate::enrich::{EnrichError, Enricher, EnricherConfig, Enrichment};
use crate::error::ConfigError;
use crate::feeds::types::Entry;
use crate::feeds::{FeedCatalogue, FeedFetcher, FetcherConfig};
use crate::filter::{KeywordMatcher, KeywordTable};
use crate::llm::{ChainProvider, ChatClient, ProviderChain};
use crate::location::{
    BatchLocationHandler, LocationCache, LocationResolver, Resolution, ResolverConfig,
};
use crate::metrics;
use crate::resilience::{BreakerConfig, CircuitBreaker, RateLimiter, RateLimiterConfig};
use crate::storage::{Database, DatabaseError, EnrichedAlert, RawItem, RejectCause};

use super::config::PipelineConfig;

/// Raw items per bulk insert.
const RAW_SAVE_CHUNK: usize = 100;

/// Errors that can occur during pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("No feeds configured")]
    NoFeeds,

    #[error("Initialization failed: {0}")]
    InitializationFailed(String),
}

/// Counters for one completed cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Cycle correlation id.
    pub cycle_id: String,
    /// Entries delivered by the fetch fan-out.
    pub fetched: u64,
    /// Entries that matched a keyword.
    pub matched: u64,
    /// Entries that missed the filter (still stored raw).
    pub missed: u64,
    /// Entries rejected by the in-cycle exact dedup.
    pub exact_duplicates: u64,
    /// Matched entries skipped for lacking any location.
    pub unlocated: u64,
    /// Entries whose enrichment call failed.
    pub enrich_failures: u64,
    /// Alerts dropped as semantic duplicates.
    pub semantic_duplicates: u64,
    /// Raw rows actually inserted.
    pub raw_inserted: u64,
    /// Alert rows upserted.
    pub alerts_saved: u64,
    /// Alert rows rejected at storage.
    pub alerts_rejected: u64,
    /// Whether the cycle was cut short by cancellation.
    pub cancelled: bool,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// How one entry ended its trip through the pipeline.
enum EntryStatus {
    Miss,
    ExactDuplicate,
    Unlocated,
    EnrichFailed,
    Enriched,
}

/// Per-entry processing result.
struct ProcessedEntry {
    raw: Option<RawItem>,
    enrichment: Option<(Enrichment, Vec<f32>)>,
    status: EntryStatus,
}

/// The orchestrator owns every pipeline component and drives cycles.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    catalogue: FeedCatalogue,
    fetcher: Arc<FeedFetcher>,
    matcher: Arc<KeywordMatcher>,
    dedup: Arc<Deduplicator>,
    enricher: Arc<Enricher>,
    batch_handler: Arc<BatchLocationHandler>,
    location_cache: Arc<dyn LocationCache>,
    database: Arc<Database>,
    shutdown_tx: broadcast::Sender<()>,
}

impl PipelineOrchestrator {
    /// Builds the orchestrator, assembling the provider chain from the
    /// configuration and wiring every component.
    pub fn new(
        config: PipelineConfig,
        catalogue: FeedCatalogue,
        keyword_table: &KeywordTable,
        database: Arc<Database>,
    ) -> Result<Self, PipelineError> {
        if catalogue.is_empty() {
            return Err(PipelineError::NoFeeds);
        }

        let chain = Arc::new(build_provider_chain(&config));
        if chain.is_empty() {
            warn!(
                target: "pipeline",
                "No LLM provider has an API key; batch location and enrichment will fall back"
            );
        }

        let matcher = KeywordMatcher::compile(
            keyword_table,
            config.cooc_window_tokens,
            config.filter_strict,
        )?;

        let fetcher = Arc::new(FeedFetcher::new(FetcherConfig {
            max_concurrency: config.max_concurrency,
            per_host_concurrency: config.per_host_concurrency,
            fetch_timeout: config.fetch_timeout,
            max_age_days: config.max_age_days,
            ..FetcherConfig::default()
        }));

        let dedup = Arc::new(Deduplicator::new(
            config.dedup_semantic_threshold,
            config.embedding_dimension,
        ));

        let enricher = Arc::new(Enricher::new(Arc::clone(&chain), EnricherConfig::default()));

        let location_cache: Arc<dyn LocationCache> = Arc::clone(&database) as Arc<dyn LocationCache>;
        let batch_handler = Arc::new(BatchLocationHandler::new(
            Arc::clone(&chain),
            Arc::clone(&location_cache),
        ));

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            catalogue,
            fetcher,
            matcher: Arc::new(matcher),
            dedup,
            enricher,
            batch_handler,
            location_cache,
            database,
            shutdown_tx,
        })
    }

    /// Requests cooperative cancellation of the running cycle.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Runs one full cycle: fetch, process, save.
    pub async fn run_cycle(&self) -> Result<CycleReport, PipelineError> {
        let started = Instant::now();
        let cycle_id = Uuid::new_v4().to_string();
        info!(target: "pipeline", cycle = %cycle_id, feeds = self.catalogue.len(), "Cycle started");

        self.dedup.reset_cycle();

        // The batch queue lives for exactly one cycle.
        let queue = BatchQueue::new(
            BatchConfig {
                size_threshold: self.config.batch_size_threshold,
                time_threshold: self.config.batch_time_threshold,
                timer_enabled: self.config.batch_timer_enabled,
                retry_cap: self.config.batch_retry_cap,
            },
            Arc::clone(&self.batch_handler),
        );
        queue.start_ticker().await;

        let resolver = Arc::new(LocationResolver::new(
            ResolverConfig {
                total_timeout: self.config.location_total_timeout,
                cache_timeout: self.config.location_cache_timeout,
                deterministic_timeout: self.config.location_det_timeout,
                reverse_timeout: self.config.location_reverse_timeout,
                batch_wait: self.config.batch_wait(),
            },
            Arc::clone(&self.location_cache),
            Arc::clone(&queue),
        ));

        let result = self.process_cycle(&resolver, &cycle_id).await;

        // Guaranteed final drain on every exit path: still-deferred
        // entries receive their fallback locations before the cycle ends.
        queue.close().await;

        let mut report = result?;
        report.cycle_id = cycle_id.clone();
        report.duration_ms = started.elapsed().as_millis() as u64;
        metrics::observe_cycle_duration(started.elapsed());

        info!(
            target: "pipeline",
            cycle = %cycle_id,
            fetched = report.fetched,
            matched = report.matched,
            missed = report.missed,
            raw_inserted = report.raw_inserted,
            alerts_saved = report.alerts_saved,
            alerts_rejected = report.alerts_rejected,
            semantic_duplicates = report.semantic_duplicates,
            cancelled = report.cancelled,
            duration_ms = report.duration_ms,
            "Cycle finished"
        );
        Ok(report)
    }

    /// Runs cycles on a fixed interval until shutdown.
    pub async fn run_loop(&self, interval: std::time::Duration) -> Result<(), PipelineError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            if let Err(e) = self.run_cycle().await {
                warn!(target: "pipeline", error = %e, "Cycle failed; continuing on schedule");
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown_rx.recv() => {
                    info!(target: "pipeline", "Scheduler stopped");
                    return Ok(());
                }
            }
        }
    }

    /// Fetches, processes and saves one cycle's entries.
    async fn process_cycle(
        &self,
        resolver: &Arc<LocationResolver>,
        cycle_id: &str,
    ) -> Result<CycleReport, PipelineError> {
        let mut report = CycleReport::default();

        let cancel_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let cancel = {
            let flag = Arc::clone(&cancel_flag);
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
            })
        };

        // Cancellation stops the intake; entries already in flight finish
        // so the current batch flush is never wasted.
        let entries = self.fetcher.fetch_all(self.catalogue.clone());
        let outcomes: Vec<ProcessedEntry> = entries
            .take_until(cancel)
            .map(|entry| self.process_entry(entry, Arc::clone(resolver)))
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;
        report.cancelled = cancel_flag.load(std::sync::atomic::Ordering::SeqCst);

        for processed in &outcomes {
            report.fetched += 1;
            match processed.status {
                EntryStatus::Miss => report.missed += 1,
                EntryStatus::ExactDuplicate => {
                    report.matched += 1;
                    report.exact_duplicates += 1;
                }
                EntryStatus::Unlocated => {
                    report.matched += 1;
                    report.unlocated += 1;
                }
                EntryStatus::EnrichFailed => {
                    report.matched += 1;
                    report.enrich_failures += 1;
                }
                EntryStatus::Enriched => report.matched += 1,
            }
        }

        // Bulk-save raw items in chunks.
        let raws: Vec<RawItem> = outcomes
            .iter()
            .filter_map(|p| p.raw.clone())
            .collect();
        for chunk in raws.chunks(RAW_SAVE_CHUNK) {
            report.raw_inserted += self.database.save_raw(chunk).await?;
        }

        // Semantic dedup against stored alerts, then bulk upsert.
        let mut alerts: Vec<EnrichedAlert> = Vec::new();
        let mut known = self.database.recent_embeddings().await?;
        for processed in outcomes {
            let (Some(raw), Some((enrichment, embedding))) = (processed.raw, processed.enrichment)
            else {
                continue;
            };
            if let Some(matched) = self.dedup.find_semantic_duplicate(&embedding, &known) {
                metrics::inc_storage_rejected(RejectCause::SemanticDuplicate.as_str());
                warn!(
                    target: "pipeline",
                    cycle = %cycle_id,
                    candidate = %raw.uuid,
                    matched = %matched.matched_uuid,
                    similarity = matched.similarity,
                    "Semantic duplicate dropped"
                );
                report.semantic_duplicates += 1;
                continue;
            }
            known.push((raw.uuid.clone(), embedding.clone()));
            alerts.push(EnrichedAlert::build(raw, &enrichment, embedding));
        }

        let save = self.database.save_enriched(&alerts).await?;
        report.alerts_saved = save.saved;
        report.alerts_rejected = save.rejected;
        Ok(report)
    }

    /// Runs one entry through filter, resolver, dedup and enricher.
    async fn process_entry(
        &self,
        mut entry: Entry,
        resolver: Arc<LocationResolver>,
    ) -> ProcessedEntry {
        // Filter: misses are persisted raw with empty tags and dropped.
        entry.kw_match = self.matcher.match_text(&entry.text_blob);
        match &entry.kw_match {
            Some(m) => metrics::inc_filter_outcome(match m.match_type {
                crate::feeds::types::MatchType::Base => "base",
                crate::feeds::types::MatchType::Cooccurrence => "cooccurrence",
            }),
            None => metrics::inc_filter_outcome("miss"),
        }
        if entry.kw_match.is_none() {
            return ProcessedEntry {
                raw: Some(RawItem::from_entry(&entry)),
                enrichment: None,
                status: EntryStatus::Miss,
            };
        }

        // Exact dedup: a repeated (title, link) within the cycle is
        // dropped entirely; the first occurrence owns the row.
        if !self.dedup.claim(&entry.content_hash()) {
            return ProcessedEntry {
                raw: None,
                enrichment: None,
                status: EntryStatus::ExactDuplicate,
            };
        }

        // Location: synchronous cascade or deferred batch result.
        let location = match resolver.resolve(&entry).await {
            Resolution::Ready(location) => location,
            Resolution::Deferred(deferred) => {
                let location = deferred.wait(resolver.batch_wait()).await;
                metrics::inc_location_resolved(location.method.as_str());
                location
            }
        };
        entry.location = Some(location);

        let raw = RawItem::from_entry(&entry);

        // Enrichment: skipped entirely when no location survived.
        match self.enricher.enrich(&entry).await {
            Ok(enrichment) => {
                let embedding = self.dedup.embed(&entry.title, &entry.summary);
                ProcessedEntry {
                    raw: Some(raw),
                    enrichment: Some((enrichment, embedding)),
                    status: EntryStatus::Enriched,
                }
            }
            Err(EnrichError::MissingLocation) => ProcessedEntry {
                raw: Some(raw),
                enrichment: None,
                status: EntryStatus::Unlocated,
            },
            Err(e) => {
                warn!(
                    target: "pipeline",
                    uuid = %raw.uuid,
                    error = %e,
                    "Enrichment failed; raw item retained"
                );
                ProcessedEntry {
                    raw: Some(raw),
                    enrichment: None,
                    status: EntryStatus::EnrichFailed,
                }
            }
        }
    }
}

/// Assembles the provider chain from configuration; providers without an
/// API key in the environment are skipped (the free fallback may run
/// keyless).
fn build_provider_chain(config: &PipelineConfig) -> ProviderChain {
    let mut providers = Vec::new();
    for (position, spec) in config.providers.iter().enumerate() {
        let api_key = std::env::var(&spec.api_key_env).ok();
        let is_fallback = position == config.providers.len() - 1;
        if api_key.is_none() && !is_fallback {
            warn!(
                target: "pipeline",
                service = %spec.service,
                key_env = %spec.api_key_env,
                "Provider skipped: no API key in environment"
            );
            continue;
        }

        providers.push(ChainProvider {
            service: spec.service.clone(),
            model: spec.model.clone(),
            provider: Arc::new(ChatClient::new(
                spec.api_base.clone(),
                api_key,
                config.llm_timeout,
            )),
            breaker: Arc::new(CircuitBreaker::new(
                spec.service.clone(),
                BreakerConfig {
                    failure_threshold: config.cb_failure_threshold,
                    max_consecutive_failures: config.cb_max_consecutive_failures,
                    request_volume_threshold: config.cb_request_volume_threshold,
                    recovery_timeout: config.cb_recovery_timeout,
                    call_timeout: config.cb_call_timeout,
                    ..BreakerConfig::default()
                },
            )),
            limiter: Arc::new(RateLimiter::new(
                spec.service.clone(),
                RateLimiterConfig {
                    tokens_per_minute: config.tokens_per_minute_for(&spec.service),
                    wait_cap: config.rate_limit_wait_cap,
                },
            )),
        });
    }
    ProviderChain::new(providers)
}
