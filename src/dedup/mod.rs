//! Deduplication: exact content-hash rejection and semantic near-duplicate
//! detection for enriched alerts.
//!
//! The exact layer is two-tiered: an in-cycle seen-set rejects repeats
//! cheaply, and the database's unique index on `content_hash` (insert with
//! `ON CONFLICT DO NOTHING`) guarantees the invariant across cycles and
//! processes. The semantic layer compares a candidate alert's embedding
//! against recently stored alert embeddings; cosine similarity at or above
//! the threshold drops the candidate.

pub mod embeddings;

use std::collections::HashSet;
use std::sync::Mutex;
use tracing::debug;

pub use embeddings::{cosine_similarity, EmbeddingGenerator, DEFAULT_DIMENSION};

/// A semantic duplicate verdict: which stored alert matched and how close.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticMatch {
    /// uuid of the already-stored alert.
    pub matched_uuid: String,
    /// Cosine similarity between the embeddings.
    pub similarity: f32,
}

/// Deduplicator state for one pipeline.
pub struct Deduplicator {
    seen_hashes: Mutex<HashSet<String>>,
    embedder: EmbeddingGenerator,
    semantic_threshold: f32,
}

impl Deduplicator {
    /// Creates a deduplicator with the given semantic threshold.
    pub fn new(semantic_threshold: f32, embedding_dimension: usize) -> Self {
        Self {
            seen_hashes: Mutex::new(HashSet::new()),
            embedder: EmbeddingGenerator::new(embedding_dimension),
            semantic_threshold,
        }
    }

    /// Claims a content hash for this cycle.
    ///
    /// Returns `true` the first time a hash is seen; later calls with the
    /// same hash return `false`.
    pub fn claim(&self, content_hash: &str) -> bool {
        self.seen_hashes
            .lock()
            .expect("seen-set lock poisoned")
            .insert(content_hash.to_string())
    }

    /// Clears the in-cycle seen-set; the database index still guards
    /// cross-cycle duplicates.
    pub fn reset_cycle(&self) {
        self.seen_hashes
            .lock()
            .expect("seen-set lock poisoned")
            .clear();
    }

    /// Embeds alert text for storage and comparison.
    pub fn embed(&self, title: &str, summary: &str) -> Vec<f32> {
        self.embedder.embed(&format!("{} {}", title, summary))
    }

    /// Scans stored embeddings for the nearest neighbour of `candidate`.
    ///
    /// Returns the match when similarity reaches the threshold. An empty
    /// candidate or empty stored embeddings disable the check — never a
    /// false positive.
    pub fn find_semantic_duplicate(
        &self,
        candidate: &[f32],
        existing: &[(String, Vec<f32>)],
    ) -> Option<SemanticMatch> {
        if candidate.is_empty() {
            return None;
        }

        let mut best: Option<SemanticMatch> = None;
        for (uuid, embedding) in existing {
            if embedding.is_empty() {
                continue;
            }
            let similarity = cosine_similarity(candidate, embedding);
            if best.as_ref().map_or(true, |b| similarity > b.similarity) {
                best = Some(SemanticMatch {
                    matched_uuid: uuid.clone(),
                    similarity,
                });
            }
        }

        let best = best?;
        if best.similarity >= self.semantic_threshold {
            debug!(
                target: "dedup",
                matched = %best.matched_uuid,
                similarity = best.similarity,
                "Semantic duplicate detected"
            );
            Some(best)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dedup() -> Deduplicator {
        Deduplicator::new(0.92, DEFAULT_DIMENSION)
    }

    #[test]
    fn test_claim_rejects_repeat_hashes() {
        let d = dedup();
        assert!(d.claim("abc123"));
        assert!(!d.claim("abc123"));
        assert!(d.claim("def456"));
    }

    #[test]
    fn test_reset_cycle_clears_seen_set() {
        let d = dedup();
        assert!(d.claim("abc123"));
        d.reset_cycle();
        assert!(d.claim("abc123"));
    }

    #[test]
    fn test_identical_alert_is_semantic_duplicate() {
        let d = dedup();
        let candidate = d.embed("Bombing kills 12 in Belgrade", "Explosion downtown");
        let stored = vec![("existing-uuid".to_string(), candidate.clone())];

        let matched = d
            .find_semantic_duplicate(&candidate, &stored)
            .expect("should match");
        assert_eq!(matched.matched_uuid, "existing-uuid");
        assert!(matched.similarity >= 0.92);
    }

    #[test]
    fn test_unrelated_alert_is_not_duplicate() {
        let d = dedup();
        let candidate = d.embed("Bombing kills 12 in Belgrade", "Explosion downtown");
        let stored = vec![(
            "other-uuid".to_string(),
            d.embed("Airport opens new restaurant", "Grand menu launch"),
        )];
        assert!(d.find_semantic_duplicate(&candidate, &stored).is_none());
    }

    #[test]
    fn test_empty_candidate_disables_check() {
        let d = dedup();
        let stored = vec![("uuid".to_string(), d.embed("some title", "some summary"))];
        assert!(d.find_semantic_duplicate(&[], &stored).is_none());
    }

    #[test]
    fn test_empty_stored_embedding_is_skipped() {
        let d = dedup();
        let candidate = d.embed("Bombing kills 12", "Explosion");
        let stored = vec![("uuid".to_string(), Vec::new())];
        assert!(d.find_semantic_duplicate(&candidate, &stored).is_none());
    }

    #[test]
    fn test_nearest_neighbour_wins() {
        let d = dedup();
        let candidate = d.embed("Bombing kills 12 in Belgrade downtown", "");
        let near = d.embed("Bombing kills 12 in Belgrade downtown", "");
        let far = d.embed("Flooding displaces thousands in Jakarta", "");
        let stored = vec![
            ("far-uuid".to_string(), far),
            ("near-uuid".to_string(), near),
        ];

        let matched = d
            .find_semantic_duplicate(&candidate, &stored)
            .expect("should match the near one");
        assert_eq!(matched.matched_uuid, "near-uuid");
    }
}
