//! Prometheus metrics registration and export.
//!
//! Defines every metric family the pipeline emits and provides
//! initialization and text-format export. Metrics are optional at runtime:
//! recording helpers are no-ops until `init_metrics` has run.

use prometheus::{
    CounterVec, Encoder, GaugeVec, Histogram, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all threatforge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Entries fetched per feed, labeled by source tag.
pub static ENTRIES_FETCHED: OnceLock<CounterVec> = OnceLock::new();

/// Feed fetch failures, labeled by source tag.
pub static FEED_ERRORS: OnceLock<CounterVec> = OnceLock::new();

/// Feed fetch latency in seconds, labeled by source tag.
pub static FEED_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Filter outcomes, labeled by result (base | cooccurrence | miss).
pub static FILTER_OUTCOMES: OnceLock<CounterVec> = OnceLock::new();

/// Locations resolved, labeled by method.
pub static LOCATIONS_RESOLVED: OnceLock<CounterVec> = OnceLock::new();

/// Entries deferred to the LLM batch.
pub static LOCATIONS_DEFERRED: OnceLock<CounterVec> = OnceLock::new();

/// Batch queue flushes, labeled by trigger (size | time | final) and
/// outcome (ok | failed).
pub static BATCH_FLUSHES: OnceLock<CounterVec> = OnceLock::new();

/// LLM requests, labeled by service and status.
pub static LLM_REQUESTS: OnceLock<CounterVec> = OnceLock::new();

/// LLM call latency in seconds, labeled by service.
pub static LLM_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Rows rejected at storage, labeled by cause
/// (duplicate | semantic_duplicate | missing_location | non_numeric).
pub static STORAGE_REJECTED: OnceLock<CounterVec> = OnceLock::new();

/// Rows written, labeled by table (raw_items | alerts).
pub static STORAGE_WRITTEN: OnceLock<CounterVec> = OnceLock::new();

/// Circuit breaker state per service (0 closed, 1 open, 2 half-open).
pub static CIRCUIT_STATE: OnceLock<GaugeVec> = OnceLock::new();

/// Full pipeline cycle duration in seconds.
pub static CYCLE_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup; a second call leaves the existing registry in
/// place.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let entries_fetched = CounterVec::new(
        Opts::new("threatforge_entries_fetched_total", "Entries fetched per feed"),
        &["source"],
    )?;
    let feed_errors = CounterVec::new(
        Opts::new("threatforge_feed_errors_total", "Feed fetch failures"),
        &["source"],
    )?;
    let feed_latency = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "threatforge_feed_latency_seconds",
            "Feed fetch latency in seconds",
        )
        .buckets(vec![0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0]),
        &["source"],
    )?;
    let filter_outcomes = CounterVec::new(
        Opts::new("threatforge_filter_outcomes_total", "Content filter outcomes"),
        &["result"],
    )?;
    let locations_resolved = CounterVec::new(
        Opts::new(
            "threatforge_locations_resolved_total",
            "Locations resolved by method",
        ),
        &["method"],
    )?;
    let locations_deferred = CounterVec::new(
        Opts::new(
            "threatforge_locations_deferred_total",
            "Entries deferred to the LLM batch",
        ),
        &["queue"],
    )?;
    let batch_flushes = CounterVec::new(
        Opts::new("threatforge_batch_flushes_total", "Batch queue flushes"),
        &["trigger", "outcome"],
    )?;
    let llm_requests = CounterVec::new(
        Opts::new("threatforge_llm_requests_total", "LLM requests by service"),
        &["service", "status"],
    )?;
    let llm_latency = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "threatforge_llm_latency_seconds",
            "LLM call latency in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["service"],
    )?;
    let storage_rejected = CounterVec::new(
        Opts::new("threatforge_storage_rejected_total", "Rows rejected at storage"),
        &["cause"],
    )?;
    let storage_written = CounterVec::new(
        Opts::new("threatforge_storage_written_total", "Rows written by table"),
        &["table"],
    )?;
    let circuit_state = GaugeVec::new(
        Opts::new(
            "threatforge_circuit_state",
            "Circuit breaker state (0 closed, 1 open, 2 half-open)",
        ),
        &["service"],
    )?;
    let cycle_duration = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "threatforge_cycle_duration_seconds",
            "Full pipeline cycle duration in seconds",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
    )?;

    registry.register(Box::new(entries_fetched.clone()))?;
    registry.register(Box::new(feed_errors.clone()))?;
    registry.register(Box::new(feed_latency.clone()))?;
    registry.register(Box::new(filter_outcomes.clone()))?;
    registry.register(Box::new(locations_resolved.clone()))?;
    registry.register(Box::new(locations_deferred.clone()))?;
    registry.register(Box::new(batch_flushes.clone()))?;
    registry.register(Box::new(llm_requests.clone()))?;
    registry.register(Box::new(llm_latency.clone()))?;
    registry.register(Box::new(storage_rejected.clone()))?;
    registry.register(Box::new(storage_written.clone()))?;
    registry.register(Box::new(circuit_state.clone()))?;
    registry.register(Box::new(cycle_duration.clone()))?;

    // Idempotent: a second init keeps the first registry.
    let _ = REGISTRY.set(registry);
    let _ = ENTRIES_FETCHED.set(entries_fetched);
    let _ = FEED_ERRORS.set(feed_errors);
    let _ = FEED_LATENCY.set(feed_latency);
    let _ = FILTER_OUTCOMES.set(filter_outcomes);
    let _ = LOCATIONS_RESOLVED.set(locations_resolved);
    let _ = LOCATIONS_DEFERRED.set(locations_deferred);
    let _ = BATCH_FLUSHES.set(batch_flushes);
    let _ = LLM_REQUESTS.set(llm_requests);
    let _ = LLM_LATENCY.set(llm_latency);
    let _ = STORAGE_REJECTED.set(storage_rejected);
    let _ = STORAGE_WRITTEN.set(storage_written);
    let _ = CIRCUIT_STATE.set(circuit_state);
    let _ = CYCLE_DURATION.set(cycle_duration);

    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

/// Export all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }
    String::from_utf8(buffer).unwrap_or_else(|e| format!("# Error converting metrics: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        let first = init_metrics();
        assert!(first.is_ok() || REGISTRY.get().is_some());
        let second = init_metrics();
        assert!(second.is_ok());
    }

    #[test]
    fn test_export_after_init() {
        let _ = init_metrics();
        let text = export_metrics();
        assert!(!text.is_empty());
        assert!(!text.starts_with("# Error"));
    }
}
