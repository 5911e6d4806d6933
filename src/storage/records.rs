//! Persisted record types: raw items and enriched alerts.
//!
//! A [`RawItem`] is an entry frozen after filtering and location
//! resolution; an [`EnrichedAlert`] extends it with the assessment fields.
//! Both carry the deterministic `uuid` and `content_hash` identities, so
//! re-running the pipeline over the same feed content reproduces the same
//! rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enrich::Enrichment;
use crate::feeds::types::{Entry, Location, LocationConfidence, LocationMethod};

/// One persisted raw item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    pub uuid: String,
    pub title: String,
    pub link: String,
    pub summary: String,
    pub published: DateTime<Utc>,
    pub source_url: String,
    pub source_tag: String,
    pub language: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_method: String,
    pub location_confidence: String,
    /// Exactly the matched keyword, or empty.
    pub tags: Vec<String>,
    /// The full match descriptor as JSON, when a keyword matched.
    pub kw_match: Option<serde_json::Value>,
    pub content_hash: String,
    pub ingested_at: DateTime<Utc>,
}

impl RawItem {
    /// Freezes an entry into its persisted form.
    pub fn from_entry(entry: &Entry) -> Self {
        let location = entry.location.clone().unwrap_or_else(Location::unknown);
        Self {
            uuid: entry.uuid(),
            title: entry.title.clone(),
            link: entry.link.clone(),
            summary: entry.summary.clone(),
            published: entry.published,
            source_url: entry.source_url.clone(),
            source_tag: entry.source_tag.clone(),
            language: entry.language.clone(),
            country: location.country,
            city: location.city,
            region: location.region,
            latitude: location.latitude,
            longitude: location.longitude,
            location_method: location.method.as_str().to_string(),
            location_confidence: location.confidence.as_str().to_string(),
            tags: entry.tags(),
            kw_match: entry
                .kw_match
                .as_ref()
                .and_then(|m| serde_json::to_value(m).ok()),
            content_hash: entry.content_hash(),
            ingested_at: Utc::now(),
        }
    }

    /// Reconstructs the location from the persisted columns.
    pub fn location(&self) -> Location {
        Location {
            city: self.city.clone(),
            country: self.country.clone(),
            region: self.region.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
            method: LocationMethod::parse(&self.location_method)
                .unwrap_or(LocationMethod::Unknown),
            confidence: LocationConfidence::parse(&self.location_confidence)
                .unwrap_or(LocationConfidence::None),
        }
    }
}

/// Why an alert row was refused at storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCause {
    /// Neither coordinates nor a country.
    MissingLocation,
    /// Score or confidence outside its numeric range.
    NonNumeric,
    /// Embedding too close to an existing alert.
    SemanticDuplicate,
    /// Exact content-hash duplicate.
    Duplicate,
}

impl RejectCause {
    /// Metric label for the rejection cause.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectCause::MissingLocation => "missing_location",
            RejectCause::NonNumeric => "non_numeric",
            RejectCause::SemanticDuplicate => "semantic_duplicate",
            RejectCause::Duplicate => "duplicate",
        }
    }
}

/// One persisted enriched alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedAlert {
    /// All raw columns travel with the alert.
    pub raw: RawItem,
    pub category: String,
    pub subcategory: Option<String>,
    pub threat_label: String,
    pub score: f64,
    pub confidence: f64,
    pub reasoning: String,
    pub threat_score_components: serde_json::Value,
    pub sentiment: Option<f64>,
    pub forecast: Option<String>,
    pub cyber_score: Option<f64>,
    pub physical_score: Option<f64>,
    /// Empty means "no embedding stored" (semantic dedup disabled).
    pub embedding: Vec<f32>,
    pub model_used: String,
}

impl EnrichedAlert {
    /// Assembles an alert from the raw item, the enrichment, and the
    /// alert's embedding.
    pub fn build(raw: RawItem, enrichment: &Enrichment, embedding: Vec<f32>) -> Self {
        let a = &enrichment.assessment;
        Self {
            raw,
            category: a.category.clone(),
            subcategory: a.subcategory.clone(),
            threat_label: a.threat_label.as_str().to_string(),
            score: a.score,
            confidence: a.confidence,
            reasoning: a.reasoning.clone(),
            threat_score_components: a.components.clone(),
            sentiment: a.sentiment,
            forecast: a.forecast.clone(),
            cyber_score: a.cyber_score,
            physical_score: a.physical_score,
            embedding,
            model_used: enrichment.model_used.clone(),
        }
    }

    /// Validates the storage invariants; `None` means the row may persist.
    pub fn validate(&self) -> Option<RejectCause> {
        let has_coordinates = self.raw.latitude.is_some() && self.raw.longitude.is_some();
        let has_country = self.raw.country.as_deref().is_some_and(|c| !c.is_empty());
        if !has_coordinates && !has_country {
            return Some(RejectCause::MissingLocation);
        }
        if !self.score.is_finite() || !(0.0..=100.0).contains(&self.score) {
            return Some(RejectCause::NonNumeric);
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Some(RejectCause::NonNumeric);
        }
        None
    }
}
