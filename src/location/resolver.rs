//! The location resolution cascade.
//!
//! Strategies run in a fixed order under one shared time budget: entry
//! cache, deterministic extraction (feed tag, then gazetteer), deferral to
//! the LLM batch, country centroid, unknown. Each step receives the
//! remaining budget rather than its nominal timeout, so a slow step cannot
//! hang the cascade.
//!
//! Deferral returns a [`DeferredLocation`] handle immediately; the entry's
//! pipeline task awaits it outside the cascade budget while the batch
//! queue gathers a full batch.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::batch_resolver::{BatchLocationHandler, PendingLocation};
use super::cache::LocationCache;
use super::gazetteer;
use crate::batch::BatchQueue;
use crate::feeds::types::{Entry, Location, LocationConfidence, LocationMethod};
use crate::metrics;
use crate::utils;

/// Words signalling that an entry spans several places, which defeats
/// single-point deterministic extraction.
static AMBIGUITY_SIGNALS: &[&str] = &[
    "multiple",
    "across",
    "throughout",
    "several",
    "various",
    "widespread",
    "numerous",
    "nationwide",
];

/// Configuration for the resolver cascade.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Total budget shared by all cascade steps.
    pub total_timeout: Duration,
    /// Nominal budget for the entry-cache lookup.
    pub cache_timeout: Duration,
    /// Nominal budget for deterministic extraction.
    pub deterministic_timeout: Duration,
    /// Nominal budget for reverse geocode attachment.
    pub reverse_timeout: Duration,
    /// How long a deferred entry waits for its batch resolution.
    pub batch_wait: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            total_timeout: Duration::from_secs(10),
            cache_timeout: Duration::from_secs(1),
            deterministic_timeout: Duration::from_secs(5),
            reverse_timeout: Duration::from_secs(3),
            batch_wait: Duration::from_secs(75),
        }
    }
}

/// Remaining-budget tracker threaded through the cascade.
struct Budget {
    deadline: Instant,
}

impl Budget {
    fn start(total: Duration) -> Self {
        Self {
            deadline: Instant::now() + total,
        }
    }

    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    fn exhausted(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Budget for one step: its nominal timeout or what is left, whichever
    /// is smaller.
    fn step(&self, nominal: Duration) -> Duration {
        nominal.min(self.remaining())
    }
}

/// Outcome of one resolve call.
pub enum Resolution {
    /// Resolved synchronously.
    Ready(Location),
    /// Deferred to the batch queue; await the handle for the result.
    Deferred(DeferredLocation),
}

/// Handle to a location that resolves when the batch flushes.
pub struct DeferredLocation {
    rx: oneshot::Receiver<Location>,
    fallback: Location,
}

impl DeferredLocation {
    /// Waits for the batch result, falling back to the centroid-or-unknown
    /// location on timeout or a dropped sender.
    pub async fn wait(self, timeout: Duration) -> Location {
        let DeferredLocation { rx, fallback } = self;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(location)) => location,
            Ok(Err(_)) => {
                warn!(target: "location", "Deferred sender dropped; using fallback");
                fallback
            }
            Err(_) => {
                warn!(target: "location", "Deferred wait timed out; using fallback");
                fallback
            }
        }
    }
}

/// The cascade resolver.
pub struct LocationResolver {
    config: ResolverConfig,
    cache: Arc<dyn LocationCache>,
    queue: Arc<BatchQueue<PendingLocation, BatchLocationHandler>>,
}

impl LocationResolver {
    pub fn new(
        config: ResolverConfig,
        cache: Arc<dyn LocationCache>,
        queue: Arc<BatchQueue<PendingLocation, BatchLocationHandler>>,
    ) -> Self {
        Self {
            config,
            cache,
            queue,
        }
    }

    /// How long callers should await a deferred resolution.
    pub fn batch_wait(&self) -> Duration {
        self.config.batch_wait
    }

    /// Runs the cascade for one entry.
    pub async fn resolve(&self, entry: &Entry) -> Resolution {
        let budget = Budget::start(self.config.total_timeout);
        let uuid = entry.uuid();

        // Step 1: previously-resolved entry cache.
        if !budget.exhausted() {
            let step = budget.step(self.config.cache_timeout);
            if let Ok(Some(mut cached)) =
                tokio::time::timeout(step, self.cache.lookup_entry(&uuid)).await
            {
                if cached.method.is_tier1() {
                    cached.method = LocationMethod::DbCache;
                    self.attach_cached_coordinates(&mut cached, &budget).await;
                    metrics::inc_location_resolved(cached.method.as_str());
                    debug!(target: "location", uuid = %uuid, "Cache hit");
                    return Resolution::Ready(cached);
                }
            }
        }

        // Step 2: deterministic extraction. Pure CPU, so the step budget
        // only gates whether it runs at all.
        let deterministic = if budget.step(self.config.deterministic_timeout).is_zero() {
            None
        } else {
            self.deterministic(entry)
        };

        if let Some(best) = &deterministic {
            if best.confidence >= LocationConfidence::Medium {
                metrics::inc_location_resolved(best.method.as_str());
                return Resolution::Ready(best.clone());
            }
        }

        let has_country = deterministic.as_ref().is_some_and(|l| l.has_country());
        let ambiguous = is_ambiguous(&entry.text_blob);

        // Step 3: defer to the batch when deterministic extraction is weak
        // and either the text is ambiguous or no country surfaced at all.
        // Skip the batch entirely once the budget is gone.
        if (ambiguous || !has_country) && !budget.exhausted() {
            let fallback = fallback_for(deterministic.as_ref());
            let hint = deterministic.and_then(|l| l.country);
            let (pending, rx) = PendingLocation::new(
                uuid,
                &entry.title,
                &entry.summary,
                hint,
                fallback.clone(),
            );
            self.queue.enqueue(pending).await;
            metrics::inc_location_deferred();
            return Resolution::Deferred(DeferredLocation { rx, fallback });
        }

        // Step 5: country centroid as last resort.
        if let Some(best) = deterministic {
            if let Some(country) = best.country {
                if let Some((lat, lon)) = gazetteer::centroid(&country) {
                    let location = Location {
                        city: None,
                        country: Some(country),
                        region: best.region,
                        latitude: Some(lat),
                        longitude: Some(lon),
                        method: LocationMethod::CountryCentroid,
                        confidence: LocationConfidence::Low,
                    };
                    metrics::inc_location_resolved(location.method.as_str());
                    return Resolution::Ready(location);
                }
                let location = Location {
                    city: None,
                    country: Some(country),
                    region: best.region,
                    latitude: None,
                    longitude: None,
                    method: best.method,
                    confidence: LocationConfidence::Low,
                };
                metrics::inc_location_resolved(location.method.as_str());
                return Resolution::Ready(location);
            }
        }

        // Step 6: nothing resolved.
        metrics::inc_location_resolved(LocationMethod::Unknown.as_str());
        Resolution::Ready(Location::unknown())
    }

    /// Fills missing coordinates on a cached city+country location from
    /// the geocode cache, within the reverse-lookup budget.
    async fn attach_cached_coordinates(&self, location: &mut Location, budget: &Budget) {
        if location.has_coordinates() {
            return;
        }
        let (Some(city), Some(country)) = (location.city.clone(), location.country.clone()) else {
            return;
        };
        let step = budget.step(self.config.reverse_timeout);
        if step.is_zero() {
            return;
        }
        if let Ok(Some((lat, lon))) =
            tokio::time::timeout(step, self.cache.lookup_geocode(&city, &country)).await
        {
            location.latitude = Some(lat);
            location.longitude = Some(lon);
        }
    }

    /// Deterministic extraction: feed tag, gazetteer city, gazetteer
    /// country. Candidates compete under the tie-break rules.
    fn deterministic(&self, entry: &Entry) -> Option<Location> {
        let mut best: Option<Location> = None;

        if let Some(tagged) = feed_tag_location(entry) {
            consider(&mut best, tagged);
        }

        if let Some(record) = gazetteer::find_city(&entry.text_blob) {
            consider(
                &mut best,
                Location {
                    city: Some(record.display.to_string()),
                    country: Some(record.country.to_string()),
                    region: Some(record.region.to_string()),
                    latitude: Some(record.latitude),
                    longitude: Some(record.longitude),
                    method: LocationMethod::LegacyPrecise,
                    confidence: LocationConfidence::High,
                },
            );
        }

        if let Some(country) = gazetteer::find_country(&entry.text_blob) {
            consider(
                &mut best,
                Location {
                    city: None,
                    country: Some(country.to_string()),
                    region: None,
                    latitude: None,
                    longitude: None,
                    method: LocationMethod::NlpNominatim,
                    confidence: LocationConfidence::Medium,
                },
            );
        }

        best
    }
}

/// Keeps the better of the current best and the candidate.
fn consider(best: &mut Option<Location>, candidate: Location) {
    match best {
        Some(current) if !candidate.beats(current) => {}
        _ => *best = Some(candidate),
    }
}

/// Location derived from a `country:X` feed tag, if present.
fn feed_tag_location(entry: &Entry) -> Option<Location> {
    let tags = std::iter::once(entry.source_tag.as_str())
        .chain(entry.feed_tags.iter().map(|t| t.as_str()));

    for tag in tags {
        let Some(raw) = tag.strip_prefix("country:") else {
            continue;
        };
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let (country, method) = match gazetteer::canonical_country(raw) {
            Some((canonical, true)) => (canonical.to_string(), LocationMethod::FeedTagMapped),
            Some((canonical, false)) => (canonical.to_string(), LocationMethod::FeedTag),
            None => (raw.to_string(), LocationMethod::FeedTag),
        };
        return Some(Location {
            city: None,
            country: Some(country),
            region: None,
            latitude: None,
            longitude: None,
            method,
            confidence: LocationConfidence::High,
        });
    }
    None
}

/// Centroid-or-unknown fallback used for deferred entries.
fn fallback_for(best: Option<&Location>) -> Location {
    if let Some(country) = best.and_then(|l| l.country.clone()) {
        if let Some((lat, lon)) = gazetteer::centroid(&country) {
            return Location {
                city: None,
                country: Some(country),
                region: None,
                latitude: Some(lat),
                longitude: Some(lon),
                method: LocationMethod::CountryCentroid,
                confidence: LocationConfidence::Low,
            };
        }
    }
    Location::unknown()
}

/// Whether the normalized blob carries an ambiguity signal.
fn is_ambiguous(blob: &str) -> bool {
    utils::tokenize(blob)
        .iter()
        .any(|token| AMBIGUITY_SIGNALS.contains(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchConfig;
    use crate::error::LlmError;
    use crate::llm::client::{ChatRequest, ChatResponse, Choice, LlmProvider, Message};
    use crate::llm::{ChainProvider, ProviderChain};
    use crate::location::cache::MemoryLocationCache;
    use crate::resilience::{BreakerConfig, CircuitBreaker, RateLimiter, RateLimiterConfig};
    use async_trait::async_trait;
    use chrono::Utc;

    struct ScriptedProvider {
        reply: Option<String>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, LlmError> {
            match &self.reply {
                Some(reply) => Ok(ChatResponse {
                    model: "scripted".to_string(),
                    choices: vec![Choice {
                        message: Message {
                            role: "assistant".to_string(),
                            content: reply.clone(),
                        },
                        finish_reason: Some("stop".to_string()),
                    }],
                    usage: None,
                }),
                None => Err(LlmError::RequestFailed("scripted failure".to_string())),
            }
        }
    }

    fn resolver_with_reply(
        reply: Option<&str>,
        cache: Arc<MemoryLocationCache>,
    ) -> LocationResolver {
        let chain = Arc::new(ProviderChain::new(vec![ChainProvider {
            service: "openai".to_string(),
            model: "scripted".to_string(),
            provider: Arc::new(ScriptedProvider {
                reply: reply.map(|r| r.to_string()),
            }),
            breaker: Arc::new(CircuitBreaker::new("openai", BreakerConfig::default())),
            limiter: Arc::new(RateLimiter::new("openai", RateLimiterConfig::default())),
        }]));
        let handler = Arc::new(BatchLocationHandler::new(
            chain,
            Arc::clone(&cache) as Arc<dyn LocationCache>,
        ));
        // Size threshold 1 flushes every deferred entry immediately.
        let queue = BatchQueue::new(
            BatchConfig {
                size_threshold: 1,
                time_threshold: Duration::from_secs(30),
                timer_enabled: false,
                retry_cap: 2,
            },
            handler,
        );
        LocationResolver::new(
            ResolverConfig {
                batch_wait: Duration::from_secs(2),
                ..ResolverConfig::default()
            },
            cache,
            queue,
        )
    }

    fn entry(title: &str, summary: &str, source_tag: &str) -> Entry {
        Entry::new(
            title,
            "https://x/y",
            summary,
            Utc::now(),
            "https://feeds.example.com/rss",
            source_tag,
            "en",
        )
    }

    async fn resolve_ready(resolver: &LocationResolver, entry: &Entry) -> Location {
        match resolver.resolve(entry).await {
            Resolution::Ready(location) => location,
            Resolution::Deferred(_) => panic!("expected synchronous resolution"),
        }
    }

    #[tokio::test]
    async fn test_cache_hit_short_circuits() {
        let cache = Arc::new(MemoryLocationCache::new());
        let e = entry("Bombing in downtown", "details", "example");
        cache
            .put_entry(
                e.uuid(),
                Location {
                    city: Some("Belgrade".to_string()),
                    country: Some("Serbia".to_string()),
                    region: None,
                    latitude: Some(44.8),
                    longitude: Some(20.5),
                    method: LocationMethod::LegacyPrecise,
                    confidence: LocationConfidence::High,
                },
            )
            .await;

        let resolver = resolver_with_reply(None, cache);
        let location = resolve_ready(&resolver, &e).await;
        assert_eq!(location.method, LocationMethod::DbCache);
        assert_eq!(location.city.as_deref(), Some("Belgrade"));
    }

    #[tokio::test]
    async fn test_feed_tag_country() {
        let cache = Arc::new(MemoryLocationCache::new());
        let resolver = resolver_with_reply(None, cache);
        let e = entry("Convoy ambushed on highway", "no place names here", "country:Serbia");

        let location = resolve_ready(&resolver, &e).await;
        assert_eq!(location.method, LocationMethod::FeedTag);
        assert_eq!(location.country.as_deref(), Some("Serbia"));
        assert_eq!(location.confidence, LocationConfidence::High);
    }

    #[tokio::test]
    async fn test_feed_tag_alias_is_mapped() {
        let cache = Arc::new(MemoryLocationCache::new());
        let resolver = resolver_with_reply(None, cache);
        let e = entry("Convoy ambushed on highway", "no place names here", "country:USA");

        let location = resolve_ready(&resolver, &e).await;
        assert_eq!(location.method, LocationMethod::FeedTagMapped);
        assert_eq!(location.country.as_deref(), Some("United States"));
    }

    #[tokio::test]
    async fn test_gazetteer_city_hit() {
        let cache = Arc::new(MemoryLocationCache::new());
        let resolver = resolver_with_reply(None, cache);
        let e = entry("Explosion in Belgrade kills two", "near the main square", "example");

        let location = resolve_ready(&resolver, &e).await;
        assert_eq!(location.method, LocationMethod::LegacyPrecise);
        assert_eq!(location.city.as_deref(), Some("Belgrade"));
        assert!(location.has_coordinates());
    }

    #[tokio::test]
    async fn test_city_beats_feed_tag() {
        let cache = Arc::new(MemoryLocationCache::new());
        let resolver = resolver_with_reply(None, cache);
        let e = entry("Explosion in Belgrade kills two", "details", "country:Nigeria");

        let location = resolve_ready(&resolver, &e).await;
        // City+country from the gazetteer is more specific than the tag.
        assert_eq!(location.method, LocationMethod::LegacyPrecise);
        assert_eq!(location.country.as_deref(), Some("Serbia"));
    }

    #[tokio::test]
    async fn test_gazetteer_country_hit() {
        let cache = Arc::new(MemoryLocationCache::new());
        let resolver = resolver_with_reply(None, cache);
        let e = entry("Unrest reported in Nigeria", "police deployed", "example");

        let location = resolve_ready(&resolver, &e).await;
        assert_eq!(location.method, LocationMethod::NlpNominatim);
        assert_eq!(location.country.as_deref(), Some("Nigeria"));
        assert_eq!(location.confidence, LocationConfidence::Medium);
    }

    #[tokio::test]
    async fn test_no_country_defers_and_batch_resolves() {
        let reply =
            r#"[{"index": 0, "city": "Belgrade", "country": "Serbia", "confidence": "high"}]"#;
        let cache = Arc::new(MemoryLocationCache::new());
        let resolver = resolver_with_reply(Some(reply), cache);
        let e = entry("Blast hits market district", "no recognizable place", "example");

        match resolver.resolve(&e).await {
            Resolution::Deferred(deferred) => {
                let location = deferred.wait(Duration::from_secs(2)).await;
                assert_eq!(location.method, LocationMethod::LlmBatch);
                assert_eq!(location.city.as_deref(), Some("Belgrade"));
            }
            Resolution::Ready(location) => {
                panic!("expected deferral, got {:?}", location.method)
            }
        }
    }

    #[tokio::test]
    async fn test_deferred_falls_back_when_batch_fails() {
        let cache = Arc::new(MemoryLocationCache::new());
        let resolver = resolver_with_reply(None, cache);
        let e = entry("Blast hits market district", "no recognizable place", "example");

        match resolver.resolve(&e).await {
            Resolution::Deferred(deferred) => {
                // The scripted chain fails; retries exhaust and the
                // fallback (unknown, no country hint) is delivered.
                let location = deferred.wait(Duration::from_secs(2)).await;
                assert_eq!(location.method, LocationMethod::Unknown);
                assert_eq!(location.confidence, LocationConfidence::None);
            }
            Resolution::Ready(_) => panic!("expected deferral"),
        }
    }

    #[tokio::test]
    async fn test_medium_confidence_skips_batch_despite_ambiguity() {
        let cache = Arc::new(MemoryLocationCache::new());
        let resolver = resolver_with_reply(None, cache);
        let e = entry(
            "Clashes across Nigeria",
            "violence in several states",
            "example",
        );

        let location = resolve_ready(&resolver, &e).await;
        assert_eq!(location.method, LocationMethod::NlpNominatim);
    }

    #[test]
    fn test_is_ambiguous() {
        assert!(is_ambiguous("attacks across multiple regions"));
        assert!(!is_ambiguous("attack in one city"));
    }

    #[test]
    fn test_budget_step_shrinks_with_remaining() {
        let budget = Budget::start(Duration::from_millis(50));
        assert!(budget.step(Duration::from_secs(5)) <= Duration::from_millis(50));
        std::thread::sleep(Duration::from_millis(60));
        assert!(budget.exhausted());
        assert_eq!(budget.step(Duration::from_secs(5)), Duration::ZERO);
    }
}
