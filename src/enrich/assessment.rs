//! Structured threat assessment parsed from the model reply.
//!
//! The enrichment contract is strict on the fields that feed invariants
//! (numeric score and confidence, a known severity label) and lenient on
//! the optional analytics: a malformed analytic logs a warning and stores
//! null instead of failing the whole alert.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::warn;

use crate::error::LlmError;
use crate::utils;

/// Severity label attached to every enriched alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLabel {
    Critical,
    High,
    Medium,
    Low,
}

impl ThreatLabel {
    /// String form stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLabel::Critical => "critical",
            ThreatLabel::High => "high",
            ThreatLabel::Medium => "medium",
            ThreatLabel::Low => "low",
        }
    }

    /// Parses the model-reported label; unknown labels fail.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "critical" => Some(ThreatLabel::Critical),
            "high" => Some(ThreatLabel::High),
            "medium" | "moderate" => Some(ThreatLabel::Medium),
            "low" => Some(ThreatLabel::Low),
            _ => None,
        }
    }

    /// Label derived from a numeric score, used when the model omits it.
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 80.0 => ThreatLabel::Critical,
            s if s >= 60.0 => ThreatLabel::High,
            s if s >= 35.0 => ThreatLabel::Medium,
            _ => ThreatLabel::Low,
        }
    }
}

impl fmt::Display for ThreatLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The parsed, validated assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatAssessment {
    pub category: String,
    pub subcategory: Option<String>,
    pub threat_label: ThreatLabel,
    /// Numeric severity in [0, 100].
    pub score: f64,
    /// Numeric confidence in [0, 1].
    pub confidence: f64,
    pub reasoning: String,
    /// Structured score breakdown as returned by the model.
    pub components: Value,
    /// Optional analytics; each may independently be null.
    pub sentiment: Option<f64>,
    pub forecast: Option<String>,
    pub cyber_score: Option<f64>,
    pub physical_score: Option<f64>,
}

impl ThreatAssessment {
    /// Parses a model reply into an assessment.
    ///
    /// Fails on: no JSON object in the reply, missing/non-numeric score or
    /// confidence, missing category. Optional analytics are parsed
    /// independently and degrade to `None` with a warning.
    pub fn parse(reply: &str) -> Result<Self, LlmError> {
        let json = utils::extract_object(reply)
            .ok_or_else(|| LlmError::ParseError("no JSON object in reply".to_string()))?;
        let raw: Value = serde_json::from_str(&json)
            .map_err(|e| LlmError::ParseError(format!("invalid JSON: {}", e)))?;

        let category = raw
            .get("category")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| LlmError::ParseError("missing category".to_string()))?;

        let score = numeric(raw.get("score"))
            .ok_or_else(|| LlmError::ParseError("score is not numeric".to_string()))?
            .clamp(0.0, 100.0);
        let confidence = numeric(raw.get("confidence"))
            .ok_or_else(|| LlmError::ParseError("confidence is not numeric".to_string()))?
            .clamp(0.0, 1.0);

        let threat_label = raw
            .get("threat_label")
            .and_then(Value::as_str)
            .and_then(ThreatLabel::parse)
            .unwrap_or_else(|| ThreatLabel::from_score(score));

        let subcategory = raw
            .get("subcategory")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let reasoning = raw
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();

        let components = raw
            .get("threat_score_components")
            .cloned()
            .unwrap_or(Value::Null);

        Ok(Self {
            category,
            subcategory,
            threat_label,
            score,
            confidence,
            reasoning,
            components,
            sentiment: analytic(&raw, "sentiment", -1.0, 1.0),
            forecast: raw
                .get("forecast")
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            cyber_score: analytic(&raw, "cyber_score", 0.0, 100.0),
            physical_score: analytic(&raw, "physical_score", 0.0, 100.0),
        })
    }
}

/// Extracts a numeric value, coercing numeric strings ("85", "0.8").
fn numeric(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Parses one optional analytic field; failure degrades to None.
fn analytic(raw: &Value, field: &str, min: f64, max: f64) -> Option<f64> {
    let value = raw.get(field)?;
    if value.is_null() {
        return None;
    }
    match numeric(Some(value)) {
        Some(v) => Some(v.clamp(min, max)),
        None => {
            warn!(
                target: "enrich",
                field,
                "Analytic field unparseable; storing null"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_REPLY: &str = r#"{
        "category": "terrorism",
        "subcategory": "bombing",
        "threat_label": "high",
        "score": 85,
        "confidence": 0.8,
        "reasoning": "Explosive attack with casualties.",
        "threat_score_components": {"base": 70, "keyword_weight": 15},
        "sentiment": -0.7,
        "forecast": "Follow-up attacks possible.",
        "cyber_score": 5,
        "physical_score": 90
    }"#;

    #[test]
    fn test_parse_full_reply() {
        let a = ThreatAssessment::parse(FULL_REPLY).expect("should parse");
        assert_eq!(a.category, "terrorism");
        assert_eq!(a.subcategory.as_deref(), Some("bombing"));
        assert_eq!(a.threat_label, ThreatLabel::High);
        assert_eq!(a.score, 85.0);
        assert_eq!(a.confidence, 0.8);
        assert_eq!(a.sentiment, Some(-0.7));
        assert_eq!(a.cyber_score, Some(5.0));
        assert!(a.components.get("base").is_some());
    }

    #[test]
    fn test_parse_coerces_numeric_strings() {
        let reply = r#"{"category": "crime", "score": "85", "confidence": "0.8"}"#;
        let a = ThreatAssessment::parse(reply).expect("should parse");
        assert_eq!(a.score, 85.0);
        assert_eq!(a.confidence, 0.8);
    }

    #[test]
    fn test_parse_rejects_non_numeric_score() {
        let reply = r#"{"category": "crime", "score": "very high", "confidence": 0.8}"#;
        assert!(matches!(
            ThreatAssessment::parse(reply),
            Err(LlmError::ParseError(_))
        ));
    }

    #[test]
    fn test_parse_rejects_missing_confidence() {
        let reply = r#"{"category": "crime", "score": 50}"#;
        assert!(ThreatAssessment::parse(reply).is_err());
    }

    #[test]
    fn test_parse_rejects_missing_category() {
        let reply = r#"{"score": 50, "confidence": 0.5}"#;
        assert!(ThreatAssessment::parse(reply).is_err());
    }

    #[test]
    fn test_parse_clamps_ranges() {
        let reply = r#"{"category": "crime", "score": 150, "confidence": 1.7}"#;
        let a = ThreatAssessment::parse(reply).expect("should parse");
        assert_eq!(a.score, 100.0);
        assert_eq!(a.confidence, 1.0);
    }

    #[test]
    fn test_label_derived_from_score_when_missing() {
        let reply = r#"{"category": "crime", "score": 85, "confidence": 0.5}"#;
        let a = ThreatAssessment::parse(reply).expect("should parse");
        assert_eq!(a.threat_label, ThreatLabel::Critical);
    }

    #[test]
    fn test_unknown_label_falls_back_to_score() {
        let reply = r#"{"category": "crime", "threat_label": "catastrophic", "score": 20, "confidence": 0.5}"#;
        let a = ThreatAssessment::parse(reply).expect("should parse");
        assert_eq!(a.threat_label, ThreatLabel::Low);
    }

    #[test]
    fn test_bad_analytic_degrades_to_null() {
        let reply = r#"{
            "category": "crime",
            "score": 50,
            "confidence": 0.5,
            "sentiment": "quite negative",
            "cyber_score": 10
        }"#;
        let a = ThreatAssessment::parse(reply).expect("should parse");
        assert_eq!(a.sentiment, None);
        assert_eq!(a.cyber_score, Some(10.0));
    }

    #[test]
    fn test_parse_reply_with_markdown_fence() {
        let reply = format!("```json\n{}\n```", FULL_REPLY);
        assert!(ThreatAssessment::parse(&reply).is_ok());
    }

    #[test]
    fn test_parse_prose_reply_fails() {
        assert!(ThreatAssessment::parse("I think this is serious.").is_err());
    }

    #[test]
    fn test_label_parse_lenient() {
        assert_eq!(ThreatLabel::parse("HIGH"), Some(ThreatLabel::High));
        assert_eq!(ThreatLabel::parse("moderate"), Some(ThreatLabel::Medium));
        assert_eq!(ThreatLabel::parse("apocalyptic"), None);
    }
}
