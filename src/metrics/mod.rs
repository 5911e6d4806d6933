//! Operational metrics for the pipeline.
//!
//! The recording helpers here are safe before initialization: they no-op
//! until [`init_metrics`] has registered the metric families, so unit
//! tests and library embedders never have to care about metrics state.

pub mod prometheus;

use std::time::Duration;

pub use prometheus::{export_metrics, init_metrics, REGISTRY};

/// Records one completed feed fetch.
pub fn observe_feed_fetch(source: &str, latency: Duration, entries: usize) {
    if let Some(counter) = prometheus::ENTRIES_FETCHED.get() {
        counter
            .with_label_values(&[source])
            .inc_by(entries as f64);
    }
    if let Some(histogram) = prometheus::FEED_LATENCY.get() {
        histogram
            .with_label_values(&[source])
            .observe(latency.as_secs_f64());
    }
}

/// Records one failed feed fetch.
pub fn inc_feed_error(source: &str) {
    if let Some(counter) = prometheus::FEED_ERRORS.get() {
        counter.with_label_values(&[source]).inc();
    }
}

/// Records a filter outcome: "base", "cooccurrence" or "miss".
pub fn inc_filter_outcome(result: &str) {
    if let Some(counter) = prometheus::FILTER_OUTCOMES.get() {
        counter.with_label_values(&[result]).inc();
    }
}

/// Records a resolved location by method label.
pub fn inc_location_resolved(method: &str) {
    if let Some(counter) = prometheus::LOCATIONS_RESOLVED.get() {
        counter.with_label_values(&[method]).inc();
    }
}

/// Records one deferral to the batch queue.
pub fn inc_location_deferred() {
    if let Some(counter) = prometheus::LOCATIONS_DEFERRED.get() {
        counter.with_label_values(&["location"]).inc();
    }
}

/// Records a batch queue flush by trigger and outcome.
pub fn inc_batch_flush(trigger: &str, outcome: &str) {
    if let Some(counter) = prometheus::BATCH_FLUSHES.get() {
        counter.with_label_values(&[trigger, outcome]).inc();
    }
}

/// Records one LLM request by service and status.
pub fn inc_llm_request(service: &str, status: &str) {
    if let Some(counter) = prometheus::LLM_REQUESTS.get() {
        counter.with_label_values(&[service, status]).inc();
    }
}

/// Records LLM call latency for a service.
pub fn observe_llm_latency(service: &str, latency: Duration) {
    if let Some(histogram) = prometheus::LLM_LATENCY.get() {
        histogram
            .with_label_values(&[service])
            .observe(latency.as_secs_f64());
    }
}

/// Records a row rejected at storage by cause.
pub fn inc_storage_rejected(cause: &str) {
    if let Some(counter) = prometheus::STORAGE_REJECTED.get() {
        counter.with_label_values(&[cause]).inc();
    }
}

/// Records rows written to a table.
pub fn inc_storage_written(table: &str, rows: usize) {
    if let Some(counter) = prometheus::STORAGE_WRITTEN.get() {
        counter.with_label_values(&[table]).inc_by(rows as f64);
    }
}

/// Publishes a circuit breaker state change.
pub fn set_circuit_state(service: &str, state: u8) {
    if let Some(gauge) = prometheus::CIRCUIT_STATE.get() {
        gauge.with_label_values(&[service]).set(state as f64);
    }
}

/// Records a full cycle duration.
pub fn observe_cycle_duration(duration: Duration) {
    if let Some(histogram) = prometheus::CYCLE_DURATION.get() {
        histogram.observe(duration.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers_are_noops_before_init_or_record_after() {
        // Must not panic in either state.
        observe_feed_fetch("src", Duration::from_millis(10), 3);
        inc_feed_error("src");
        inc_filter_outcome("miss");
        inc_location_resolved("db_cache");
        inc_location_deferred();
        inc_batch_flush("size", "ok");
        inc_llm_request("openai", "ok");
        observe_llm_latency("openai", Duration::from_millis(100));
        inc_storage_rejected("duplicate");
        inc_storage_written("raw_items", 5);
        set_circuit_state("openai", 1);
        observe_cycle_duration(Duration::from_secs(1));
    }
}
