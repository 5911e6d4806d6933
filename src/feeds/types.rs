//! Core value types flowing through the ingestion pipeline.
//!
//! An [`Entry`] is one item parsed from a feed. It lives only inside the
//! pipeline: the fetcher creates it, the filter and resolver annotate it,
//! and storage destroys it after persisting a [`crate::storage::RawItem`]
//! and, for enriched survivors, an alert row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::text;

/// How a keyword matched the entry text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Direct word-boundary hit on a curated keyword.
    Base,
    /// Ambiguous term plus qualifier within the co-occurrence window.
    Cooccurrence,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchType::Base => write!(f, "base"),
            MatchType::Cooccurrence => write!(f, "cooccurrence"),
        }
    }
}

/// Descriptor of a successful keyword match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KwMatch {
    /// The keyword that matched.
    pub keyword: String,
    /// Whether this was a base or co-occurrence match.
    pub match_type: MatchType,
    /// Identifier of the matching rule ("bombing" or "attack+casualties").
    pub rule: String,
}

impl KwMatch {
    /// Creates a base match where the rule is the keyword itself.
    pub fn base(keyword: impl Into<String>) -> Self {
        let keyword = keyword.into();
        Self {
            rule: keyword.clone(),
            keyword,
            match_type: MatchType::Base,
        }
    }

    /// Creates a co-occurrence match for a term/qualifier pair.
    pub fn cooccurrence(term: impl Into<String>, qualifier: &str) -> Self {
        let term = term.into();
        Self {
            rule: format!("{}+{}", term, qualifier),
            keyword: term,
            match_type: MatchType::Cooccurrence,
        }
    }
}

/// How a location was obtained.
///
/// Everything except `Unknown` is a tier-1 method visible to downstream
/// consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationMethod {
    /// Explicit `country:X` tag on the feed entry.
    FeedTag,
    /// Feed tag resolved through the country alias table.
    FeedTagMapped,
    /// Gazetteer city hit with coordinates.
    LegacyPrecise,
    /// Gazetteer country-level extraction from the entry text.
    NlpNominatim,
    /// Exact hit in the persistent geocode cache.
    DbCache,
    /// Resolved by the batched LLM call.
    LlmBatch,
    /// Country known, coordinates filled from the static centroid table.
    CountryCentroid,
    /// Nothing resolved.
    Unknown,
}

impl LocationMethod {
    /// String form stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationMethod::FeedTag => "feed_tag",
            LocationMethod::FeedTagMapped => "feed_tag_mapped",
            LocationMethod::LegacyPrecise => "legacy_precise",
            LocationMethod::NlpNominatim => "nlp_nominatim",
            LocationMethod::DbCache => "db_cache",
            LocationMethod::LlmBatch => "llm_batch",
            LocationMethod::CountryCentroid => "country_centroid",
            LocationMethod::Unknown => "unknown",
        }
    }

    /// Parses the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "feed_tag" => Some(LocationMethod::FeedTag),
            "feed_tag_mapped" => Some(LocationMethod::FeedTagMapped),
            "legacy_precise" => Some(LocationMethod::LegacyPrecise),
            "nlp_nominatim" => Some(LocationMethod::NlpNominatim),
            "db_cache" => Some(LocationMethod::DbCache),
            "llm_batch" => Some(LocationMethod::LlmBatch),
            "country_centroid" => Some(LocationMethod::CountryCentroid),
            "unknown" => Some(LocationMethod::Unknown),
            _ => None,
        }
    }

    /// Whether downstream readers may consume rows located this way.
    pub fn is_tier1(&self) -> bool {
        !matches!(self, LocationMethod::Unknown)
    }

    /// Deterministic methods outrank LLM methods on confidence ties.
    pub fn is_deterministic(&self) -> bool {
        matches!(
            self,
            LocationMethod::FeedTag
                | LocationMethod::FeedTagMapped
                | LocationMethod::LegacyPrecise
                | LocationMethod::NlpNominatim
                | LocationMethod::DbCache
        )
    }
}

impl fmt::Display for LocationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Confidence attached to a resolved location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationConfidence {
    /// No location information at all.
    None,
    /// Country centroid or other last-resort placement.
    Low,
    /// Country-level extraction without a city.
    Medium,
    /// City and country agree, usually with coordinates.
    High,
}

impl LocationConfidence {
    /// String form stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationConfidence::High => "high",
            LocationConfidence::Medium => "medium",
            LocationConfidence::Low => "low",
            LocationConfidence::None => "none",
        }
    }

    /// Parses the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(LocationConfidence::High),
            "medium" => Some(LocationConfidence::Medium),
            "low" => Some(LocationConfidence::Low),
            "none" => Some(LocationConfidence::None),
            _ => None,
        }
    }

    /// Parses the model-reported confidence label, defaulting low.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "high" => LocationConfidence::High,
            "medium" => LocationConfidence::Medium,
            "low" => LocationConfidence::Low,
            _ => LocationConfidence::None,
        }
    }
}

impl fmt::Display for LocationConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A resolved (or unresolved) event location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub city: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub method: LocationMethod,
    pub confidence: LocationConfidence,
}

impl Location {
    /// The terminal "nothing resolved" location.
    pub fn unknown() -> Self {
        Self {
            city: None,
            country: None,
            region: None,
            latitude: None,
            longitude: None,
            method: LocationMethod::Unknown,
            confidence: LocationConfidence::None,
        }
    }

    /// Whether both coordinates are present.
    pub fn has_coordinates(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    /// Whether a non-empty country is present.
    pub fn has_country(&self) -> bool {
        self.country.as_deref().is_some_and(|c| !c.is_empty())
    }

    /// An alert may only be persisted when coordinates or a country exist.
    pub fn is_enrichable(&self) -> bool {
        self.has_coordinates() || self.has_country()
    }

    /// Specificity rank: city+country beats country-only beats nothing.
    fn specificity(&self) -> u8 {
        match (self.city.is_some(), self.has_country()) {
            (true, true) => 2,
            (_, true) | (true, _) => 1,
            _ => 0,
        }
    }

    /// Tie-break ordering between two candidate resolutions.
    ///
    /// More specific wins, then higher confidence, then deterministic
    /// methods over LLM methods.
    pub fn beats(&self, other: &Location) -> bool {
        if self.specificity() != other.specificity() {
            return self.specificity() > other.specificity();
        }
        if self.confidence != other.confidence {
            return self.confidence > other.confidence;
        }
        self.method.is_deterministic() && !other.method.is_deterministic()
    }
}

/// One item parsed from a feed, in memory only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub title: String,
    pub link: String,
    pub summary: String,
    pub published: DateTime<Utc>,
    pub source_url: String,
    pub source_tag: String,
    pub language: String,
    /// Normalized title+summary used by the keyword matcher.
    pub text_blob: String,
    /// Category terms carried by the feed entry itself (may include
    /// `country:X` hints consumed by the location resolver).
    pub feed_tags: Vec<String>,
    /// Set by the content filter.
    pub kw_match: Option<KwMatch>,
    /// Set by the location resolver.
    pub location: Option<Location>,
}

impl Entry {
    /// Builds an entry, normalizing the match blob up front.
    pub fn new(
        title: impl Into<String>,
        link: impl Into<String>,
        summary: impl Into<String>,
        published: DateTime<Utc>,
        source_url: impl Into<String>,
        source_tag: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        let title = title.into();
        let summary = summary.into();
        let text_blob = text::text_blob(&title, &summary);
        Self {
            title,
            link: link.into(),
            summary,
            published,
            source_url: source_url.into(),
            source_tag: source_tag.into(),
            language: language.into(),
            text_blob,
            feed_tags: Vec::new(),
            kw_match: None,
            location: None,
        }
    }

    /// Deterministic cross-source identifier: SHA-1 hex of `title|link`.
    pub fn uuid(&self) -> String {
        text::sha1_hex(&text::identity_key(&self.title, &self.link))
    }

    /// Database dedup key: MD5 hex of `title|link`.
    pub fn content_hash(&self) -> String {
        text::md5_hex(&text::identity_key(&self.title, &self.link))
    }

    /// Tags persisted with the raw item: the matched keyword or nothing.
    pub fn tags(&self) -> Vec<String> {
        match &self.kw_match {
            Some(m) => vec![m.keyword.clone()],
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str, link: &str) -> Entry {
        Entry::new(
            title,
            link,
            "summary text",
            Utc::now(),
            "https://feeds.example.com/rss",
            "example",
            "en",
        )
    }

    #[test]
    fn test_uuid_is_function_of_title_and_link_only() {
        let a = entry("Bombing in downtown kills 12", "https://x/y");
        let mut b = entry("Bombing in downtown kills 12", "https://x/y");
        b.source_tag = "other-feed".to_string();
        b.summary = "completely different".to_string();
        assert_eq!(a.uuid(), b.uuid());
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_uuid_differs_on_title_change() {
        let a = entry("Bombing in downtown kills 12", "https://x/y");
        let b = entry("Bombing in downtown kills 12…", "https://x/y");
        assert_ne!(a.uuid(), b.uuid());
    }

    #[test]
    fn test_tags_follow_kw_match() {
        let mut e = entry("Bombing in downtown", "https://x/y");
        assert!(e.tags().is_empty());

        e.kw_match = Some(KwMatch::base("bombing"));
        assert_eq!(e.tags(), vec!["bombing".to_string()]);
    }

    #[test]
    fn test_cooccurrence_rule_identifier() {
        let m = KwMatch::cooccurrence("attack", "casualties");
        assert_eq!(m.rule, "attack+casualties");
        assert_eq!(m.keyword, "attack");
        assert_eq!(m.match_type, MatchType::Cooccurrence);
    }

    #[test]
    fn test_location_enrichable_rules() {
        let mut loc = Location::unknown();
        assert!(!loc.is_enrichable());

        loc.country = Some("Serbia".to_string());
        assert!(loc.is_enrichable());

        loc.country = None;
        loc.latitude = Some(44.8);
        loc.longitude = Some(20.5);
        assert!(loc.is_enrichable());

        loc.longitude = None;
        assert!(!loc.is_enrichable());
    }

    #[test]
    fn test_location_tie_breaks() {
        let city_and_country = Location {
            city: Some("Belgrade".to_string()),
            country: Some("Serbia".to_string()),
            region: None,
            latitude: None,
            longitude: None,
            method: LocationMethod::LlmBatch,
            confidence: LocationConfidence::Medium,
        };
        let country_only = Location {
            city: None,
            country: Some("Serbia".to_string()),
            region: None,
            latitude: None,
            longitude: None,
            method: LocationMethod::NlpNominatim,
            confidence: LocationConfidence::High,
        };
        // Specificity beats confidence.
        assert!(city_and_country.beats(&country_only));

        // Equal specificity and confidence: deterministic beats LLM.
        let det = Location {
            method: LocationMethod::NlpNominatim,
            confidence: LocationConfidence::Medium,
            ..country_only.clone()
        };
        let llm = Location {
            method: LocationMethod::LlmBatch,
            confidence: LocationConfidence::Medium,
            ..country_only
        };
        assert!(det.beats(&llm));
        assert!(!llm.beats(&det));
    }

    #[test]
    fn test_tier1_methods() {
        assert!(LocationMethod::CountryCentroid.is_tier1());
        assert!(LocationMethod::LlmBatch.is_tier1());
        assert!(!LocationMethod::Unknown.is_tier1());
    }

    #[test]
    fn test_confidence_parse_lenient() {
        assert_eq!(LocationConfidence::parse_lenient(" High "), LocationConfidence::High);
        assert_eq!(LocationConfidence::parse_lenient("medium"), LocationConfidence::Medium);
        assert_eq!(LocationConfidence::parse_lenient("garbage"), LocationConfidence::None);
    }
}
