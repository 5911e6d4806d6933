//! LLM batch resolution of deferred locations.
//!
//! Entries the deterministic cascade could not place are buffered by the
//! batch queue and resolved in one LLM request per flush. The model reply
//! is a JSON array mapping batch index to `{city, country, region,
//! confidence}`; coordinates are attached afterwards from the geocode
//! cache, the gazetteer, or the country centroid table.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::warn;

use super::cache::LocationCache;
use super::gazetteer;
use crate::batch::{BatchItem, FlushHandler};
use crate::error::LocationError;
use crate::feeds::types::{Location, LocationConfidence, LocationMethod};
use crate::llm::ProviderChain;
use crate::utils;

/// Cap on the excerpt sent to the model per entry.
const EXCERPT_CHARS: usize = 280;

/// System prompt for the batch geolocation call.
const SYSTEM_PROMPT: &str = "You are a geolocation analyst. For each numbered news item, identify \
     the city and country where the described event happened. Reply with a \
     JSON array only, one object per item: {\"index\": <number>, \
     \"city\": <string or null>, \"country\": <string or null>, \
     \"region\": <string or null>, \"confidence\": \"high\"|\"medium\"|\"low\"}. \
     Use null when the text does not support a value. No prose.";

/// A deferred entry waiting for the next batch flush.
#[derive(Debug)]
pub struct PendingLocation {
    /// Entry uuid, for logging.
    pub uuid: String,
    /// Title plus truncated summary, as shown to the model.
    pub excerpt: String,
    /// Country suggested by the deterministic steps, if any.
    pub country_hint: Option<String>,
    /// Location to fall back to when the batch cannot resolve the entry.
    pub fallback: Location,
    respond_to: Option<oneshot::Sender<Location>>,
    attempts: u32,
}

impl PendingLocation {
    /// Creates a pending item and the receiver its resolution arrives on.
    pub fn new(
        uuid: impl Into<String>,
        title: &str,
        summary: &str,
        country_hint: Option<String>,
        fallback: Location,
    ) -> (Self, oneshot::Receiver<Location>) {
        let (tx, rx) = oneshot::channel();
        let mut excerpt = format!("{} — {}", title, summary);
        if excerpt.len() > EXCERPT_CHARS {
            let mut end = EXCERPT_CHARS;
            while !excerpt.is_char_boundary(end) {
                end -= 1;
            }
            excerpt.truncate(end);
        }
        (
            Self {
                uuid: uuid.into(),
                excerpt,
                country_hint,
                fallback,
                respond_to: Some(tx),
                attempts: 0,
            },
            rx,
        )
    }

    /// Delivers the final location to the waiting pipeline task.
    fn send(mut self, location: Location) {
        if let Some(tx) = self.respond_to.take() {
            // A closed receiver means the entry's task was cancelled.
            let _ = tx.send(location);
        }
    }
}

impl BatchItem for PendingLocation {
    fn attempts(&self) -> u32 {
        self.attempts
    }

    fn record_attempt(&mut self) {
        self.attempts += 1;
    }
}

/// One item of the model's JSON array reply.
#[derive(Debug, Deserialize)]
struct ReplyItem {
    index: usize,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    confidence: Option<String>,
}

/// Flush handler resolving a batch through the LLM provider chain.
pub struct BatchLocationHandler {
    chain: Arc<ProviderChain>,
    cache: Arc<dyn LocationCache>,
}

impl BatchLocationHandler {
    pub fn new(chain: Arc<ProviderChain>, cache: Arc<dyn LocationCache>) -> Self {
        Self { chain, cache }
    }

    /// Builds the numbered user prompt for one batch.
    fn build_prompt(batch: &[PendingLocation]) -> String {
        let mut prompt = String::new();
        for (i, pending) in batch.iter().enumerate() {
            match &pending.country_hint {
                Some(hint) => {
                    prompt.push_str(&format!("{}. {} [hint: {}]\n", i, pending.excerpt, hint))
                }
                None => prompt.push_str(&format!("{}. {}\n", i, pending.excerpt)),
            }
        }
        prompt
    }

    /// Parses the reply array into an index map.
    fn parse_reply(content: &str) -> Result<HashMap<usize, ReplyItem>, LocationError> {
        let json = utils::extract_array(content)
            .ok_or_else(|| LocationError::BatchParse("no JSON array in reply".to_string()))?;
        let items: Vec<ReplyItem> = serde_json::from_str(&json)
            .map_err(|e| LocationError::BatchParse(e.to_string()))?;
        Ok(items.into_iter().map(|item| (item.index, item)).collect())
    }

    /// Converts one reply item into a location, attaching coordinates.
    async fn to_location(&self, item: &ReplyItem, pending: &PendingLocation) -> Location {
        let country = item
            .country
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .map(|c| match gazetteer::canonical_country(c) {
                Some((canonical, _)) => canonical.to_string(),
                None => c.trim().to_string(),
            })
            .or_else(|| pending.country_hint.clone());

        let Some(country) = country else {
            return pending.fallback.clone();
        };

        let city = item
            .city
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .map(|c| c.trim().to_string());

        let (latitude, longitude) = match &city {
            Some(city_name) => self.coordinates_for(city_name, &country).await,
            None => match gazetteer::centroid(&country) {
                Some((lat, lon)) => (Some(lat), Some(lon)),
                None => (None, None),
            },
        };

        let confidence = match item.confidence.as_deref() {
            Some(label) => LocationConfidence::parse_lenient(label),
            None if city.is_some() => LocationConfidence::Medium,
            None => LocationConfidence::Low,
        };
        // A parse to `none` still produced a country; floor at low.
        let confidence = confidence.max(LocationConfidence::Low);

        Location {
            city,
            region: item.region.clone(),
            country: Some(country),
            latitude,
            longitude,
            method: LocationMethod::LlmBatch,
            confidence,
        }
    }

    /// Coordinates for a (city, country) pair: geocode cache first, then
    /// the gazetteer (which also warms the cache).
    async fn coordinates_for(&self, city: &str, country: &str) -> (Option<f64>, Option<f64>) {
        if let Some((lat, lon)) = self.cache.lookup_geocode(city, country).await {
            return (Some(lat), Some(lon));
        }
        if let Some(record) = gazetteer::city_in_country(city, country) {
            self.cache
                .store_geocode(city, country, record.latitude, record.longitude)
                .await;
            return (Some(record.latitude), Some(record.longitude));
        }
        match gazetteer::centroid(country) {
            Some((lat, lon)) => (Some(lat), Some(lon)),
            None => (None, None),
        }
    }
}

#[async_trait]
impl FlushHandler<PendingLocation> for BatchLocationHandler {
    async fn flush(&self, batch: Vec<PendingLocation>) -> Result<(), Vec<PendingLocation>> {
        let prompt = Self::build_prompt(&batch);

        let completion = match self.chain.complete(SYSTEM_PROMPT, &prompt, 0.1, 1200).await {
            Ok(completion) => completion,
            Err(e) => {
                warn!(target: "location", items = batch.len(), error = %e, "Batch location call failed");
                return Err(batch);
            }
        };

        let by_index = match Self::parse_reply(&completion.content) {
            Ok(map) => map,
            Err(e) => {
                warn!(target: "location", items = batch.len(), error = %e, "Batch reply unparseable");
                return Err(batch);
            }
        };

        for (i, pending) in batch.into_iter().enumerate() {
            let location = match by_index.get(&i) {
                Some(item) => self.to_location(item, &pending).await,
                None => {
                    warn!(
                        target: "location",
                        uuid = %pending.uuid,
                        index = i,
                        "Batch reply missing item; using fallback"
                    );
                    pending.fallback.clone()
                }
            };
            pending.send(location);
        }
        Ok(())
    }

    fn finalize_dropped(&self, item: PendingLocation) {
        warn!(
            target: "location",
            uuid = %item.uuid,
            attempts = item.attempts,
            "Deferred entry dropped; finalizing with fallback location"
        );
        let fallback = item.fallback.clone();
        item.send(fallback);
    }
}
