//! Deterministic text embeddings for semantic deduplication.
//!
//! Alert embeddings are hash-feature vectors: each token (and adjacent
//! token pair) of the normalized text is hashed into a fixed-dimension
//! bucket, and the result is L2-normalized. The representation is crude
//! next to a model embedder, but it is deterministic, dependency-free at
//! runtime, and near-duplicate headlines — the case the 0.92 cosine
//! threshold targets — land almost on top of each other.

use ndarray::{Array1, ArrayView1};
use sha1::{Digest, Sha1};

use crate::utils;

/// Default embedding dimension, matching the alert schema's vector width.
pub const DEFAULT_DIMENSION: usize = 1536;

/// Generator for text embeddings.
#[derive(Debug, Clone)]
pub struct EmbeddingGenerator {
    dimension: usize,
}

impl Default for EmbeddingGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl EmbeddingGenerator {
    /// Creates a generator producing vectors of the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }

    /// The configured dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embeds normalized text into a unit-length vector.
    ///
    /// Returns an empty vector for empty text; callers treat that as
    /// "semantic check disabled for this row".
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let normalized = utils::normalize(text);
        let tokens = utils::tokenize(&normalized);
        if tokens.is_empty() {
            return Vec::new();
        }

        let mut vector = Array1::<f32>::zeros(self.dimension);
        for token in &tokens {
            vector[self.bucket(token)] += 1.0;
        }
        // Adjacent pairs capture phrase-level overlap.
        for pair in tokens.windows(2) {
            let joined = format!("{} {}", pair[0], pair[1]);
            vector[self.bucket(&joined)] += 0.5;
        }

        let norm = vector.dot(&vector).sqrt();
        if norm > 0.0 {
            vector /= norm;
        }
        vector.to_vec()
    }

    /// Stable bucket index for a feature string.
    fn bucket(&self, feature: &str) -> usize {
        let mut hasher = Sha1::new();
        hasher.update(feature.as_bytes());
        let digest = hasher.finalize();
        let mut value = [0u8; 8];
        value.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(value) % self.dimension as u64) as usize
    }
}

/// Cosine similarity between two vectors.
///
/// Returns 0 for mismatched lengths or empty inputs, so a missing
/// embedding can never produce a false duplicate.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let a = ArrayView1::from(a);
    let b = ArrayView1::from(b);
    let denom = a.dot(&a).sqrt() * b.dot(&b).sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    a.dot(&b) / denom
}
