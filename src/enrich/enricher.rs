//! Alert enrichment through the LLM provider chain.
//!
//! Composes a prompt from the entry's title, summary, matched keyword and
//! resolved location, runs it down the provider chain, and parses the
//! structured assessment. Entries without coordinates and without a
//! country are skipped before any provider is called: such rows can never
//! be persisted as alerts.

use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::assessment::ThreatAssessment;
use crate::error::LlmError;
use crate::feeds::types::Entry;
use crate::llm::ProviderChain;

/// System prompt for the enrichment call.
const SYSTEM_PROMPT: &str = "You are a threat intelligence analyst. Assess the security incident \
     described by the user and reply with one JSON object only: \
     {\"category\": <string>, \"subcategory\": <string or null>, \
     \"threat_label\": \"critical\"|\"high\"|\"medium\"|\"low\", \
     \"score\": <0-100 number>, \"confidence\": <0-1 number>, \
     \"reasoning\": <one or two sentences>, \
     \"threat_score_components\": {\"base\": <number>, \"keyword_weight\": <number>, \"severity_signals\": <number>}, \
     \"sentiment\": <-1 to 1 number or null>, \
     \"forecast\": <string or null>, \
     \"cyber_score\": <0-100 number or null>, \
     \"physical_score\": <0-100 number or null>}. No prose outside the JSON.";

/// Errors from the enrichment stage.
#[derive(Debug, Error)]
pub enum EnrichError {
    /// The entry has neither coordinates nor a country.
    #[error("Entry has no coordinates and no country; not enrichable")]
    MissingLocation,

    /// The entry never matched a keyword (filter misses are not enriched).
    #[error("Entry has no keyword match")]
    NoKeywordMatch,

    /// Every provider failed or returned an unparseable reply.
    #[error("Enrichment failed: {0}")]
    Llm(#[from] LlmError),
}

/// Configuration for the enricher.
#[derive(Debug, Clone)]
pub struct EnricherConfig {
    /// Sampling temperature for assessment calls.
    pub temperature: f64,
    /// Completion cap for assessment calls.
    pub max_tokens: u32,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 800,
        }
    }
}

/// A parsed assessment and the model that produced it.
#[derive(Debug, Clone)]
pub struct Enrichment {
    pub assessment: ThreatAssessment,
    pub model_used: String,
}

/// Enricher over the provider chain.
pub struct Enricher {
    chain: Arc<ProviderChain>,
    config: EnricherConfig,
}

impl Enricher {
    pub fn new(chain: Arc<ProviderChain>, config: EnricherConfig) -> Self {
        Self { chain, config }
    }

    /// Enriches one filtered, located entry.
    pub async fn enrich(&self, entry: &Entry) -> Result<Enrichment, EnrichError> {
        let kw_match = entry.kw_match.as_ref().ok_or(EnrichError::NoKeywordMatch)?;
        let location = entry
            .location
            .as_ref()
            .filter(|l| l.is_enrichable())
            .ok_or(EnrichError::MissingLocation)?;

        let mut prompt = format!("Title: {}\nSummary: {}\n", entry.title, entry.summary);
        prompt.push_str(&format!(
            "Matched keyword: {} ({})\n",
            kw_match.keyword, kw_match.rule
        ));
        match (&location.city, &location.country) {
            (Some(city), Some(country)) => {
                prompt.push_str(&format!("Location: {}, {}\n", city, country))
            }
            (None, Some(country)) => prompt.push_str(&format!("Location: {}\n", country)),
            _ => {
                if let (Some(lat), Some(lon)) = (location.latitude, location.longitude) {
                    prompt.push_str(&format!("Location: {:.4}, {:.4}\n", lat, lon));
                }
            }
        }

        let completion = self
            .chain
            .complete(
                SYSTEM_PROMPT,
                &prompt,
                self.config.temperature,
                self.config.max_tokens,
            )
            .await
            .map_err(EnrichError::Llm)?;

        let assessment = ThreatAssessment::parse(&completion.content).map_err(EnrichError::Llm)?;

        debug!(
            target: "enrich",
            uuid = %entry.uuid(),
            category = %assessment.category,
            score = assessment.score,
            model = %completion.model_used,
            "Entry enriched"
        );

        Ok(Enrichment {
            assessment,
            model_used: completion.model_used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::types::{KwMatch, Location, LocationConfidence, LocationMethod};
    use crate::llm::client::{ChatRequest, ChatResponse, Choice, LlmProvider, Message};
    use crate::llm::ChainProvider;
    use crate::resilience::{BreakerConfig, CircuitBreaker, RateLimiter, RateLimiterConfig};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    struct ScriptedProvider {
        reply: Option<String>,
        last_prompt: Mutex<Option<String>>,
    }

    impl ScriptedProvider {
        fn new(reply: Option<&str>) -> Self {
            Self {
                reply: reply.map(|r| r.to_string()),
                last_prompt: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
            *self.last_prompt.lock().expect("lock") =
                request.messages.last().map(|m| m.content.clone());
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

    fn enricher_with(provider: Arc<ScriptedProvider>) -> Enricher {
        let chain = Arc::new(ProviderChain::new(vec![ChainProvider {
            service: "openai".to_string(),
            model: "scripted".to_string(),
            provider,
            breaker: Arc::new(CircuitBreaker::new("openai", BreakerConfig::default())),
            limiter: Arc::new(RateLimiter::new("openai", RateLimiterConfig::default())),
        }]));
        Enricher::new(chain, EnricherConfig::default())
    }

    fn located_entry() -> Entry {
        let mut entry = Entry::new(
            "Bombing in downtown kills 12",
            "https://x/y",
            "Explosion near the market.",
            Utc::now(),
            "https://feeds.example.com/rss",
            "example",
            "en",
        );
        entry.kw_match = Some(KwMatch::base("bombing"));
        entry.location = Some(Location {
            city: Some("Belgrade".to_string()),
            country: Some("Serbia".to_string()),
            region: Some("Europe".to_string()),
            latitude: Some(44.8),
            longitude: Some(20.5),
            method: LocationMethod::LegacyPrecise,
            confidence: LocationConfidence::High,
        });
        entry
    }

    const GOOD_REPLY: &str = r#"{"category": "terrorism", "threat_label": "high", "score": 85, "confidence": 0.8, "reasoning": "Explosive attack."}"#;

    #[tokio::test]
    async fn test_enrich_produces_assessment() {
        let provider = Arc::new(ScriptedProvider::new(Some(GOOD_REPLY)));
        let enricher = enricher_with(Arc::clone(&provider));

        let result = enricher.enrich(&located_entry()).await.expect("should enrich");
        assert_eq!(result.assessment.score, 85.0);
        assert_eq!(result.model_used, "scripted");

        let prompt = provider.last_prompt.lock().expect("lock").clone().expect("prompt");
        assert!(prompt.contains("Bombing in downtown kills 12"));
        assert!(prompt.contains("Matched keyword: bombing"));
        assert!(prompt.contains("Belgrade, Serbia"));
    }

    #[tokio::test]
    async fn test_enrich_skips_unlocated_entry() {
        let provider = Arc::new(ScriptedProvider::new(Some(GOOD_REPLY)));
        let enricher = enricher_with(provider);

        let mut entry = located_entry();
        entry.location = Some(Location::unknown());
        assert!(matches!(
            enricher.enrich(&entry).await,
            Err(EnrichError::MissingLocation)
        ));

        entry.location = None;
        assert!(matches!(
            enricher.enrich(&entry).await,
            Err(EnrichError::MissingLocation)
        ));
    }

    #[tokio::test]
    async fn test_enrich_skips_unmatched_entry() {
        let provider = Arc::new(ScriptedProvider::new(Some(GOOD_REPLY)));
        let enricher = enricher_with(provider);

        let mut entry = located_entry();
        entry.kw_match = None;
        assert!(matches!(
            enricher.enrich(&entry).await,
            Err(EnrichError::NoKeywordMatch)
        ));
    }

    #[tokio::test]
    async fn test_enrich_country_only_location() {
        let provider = Arc::new(ScriptedProvider::new(Some(GOOD_REPLY)));
        let enricher = enricher_with(Arc::clone(&provider));

        let mut entry = located_entry();
        entry.location = Some(Location {
            city: None,
            country: Some("Serbia".to_string()),
            region: None,
            latitude: None,
            longitude: None,
            method: LocationMethod::NlpNominatim,
            confidence: LocationConfidence::Medium,
        });
        enricher.enrich(&entry).await.expect("should enrich");

        let prompt = provider.last_prompt.lock().expect("lock").clone().expect("prompt");
        assert!(prompt.contains("Location: Serbia"));
    }

    #[tokio::test]
    async fn test_enrich_provider_failure_propagates() {
        let provider = Arc::new(ScriptedProvider::new(None));
        let enricher = enricher_with(provider);

        assert!(matches!(
            enricher.enrich(&located_entry()).await,
            Err(EnrichError::Llm(LlmError::AllProvidersFailed(_)))
        ));
    }

    #[tokio::test]
    async fn test_enrich_unparseable_reply_fails() {
        let provider = Arc::new(ScriptedProvider::new(Some("It looks bad out there.")));
        let enricher = enricher_with(provider);

        assert!(matches!(
            enricher.enrich(&located_entry()).await,
            Err(EnrichError::Llm(LlmError::ParseError(_)))
        ));
    }
}
