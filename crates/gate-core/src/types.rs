use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Face embedding vector as produced by the embedding service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model that produced this embedding, when the producer reports one.
    #[serde(default)]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Always processes every dimension; a zero-norm vector yields 0.0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

}

/// One enrolled face in the encoding database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceModel {
    pub id: String,
    /// Identity name reported on a match.
    pub label: String,
    pub embedding: Embedding,
    pub created_at: DateTime<Utc>,
}

/// Result of matching a query embedding against a gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Cosine similarity of the best candidate [-1, 1].
    pub similarity: f32,
    pub model_id: Option<String>,
    /// Identity of the matched model.
    pub identity: Option<String>,
}

impl MatchResult {
    pub fn no_match(similarity: f32) -> Self {
        Self {
            matched: false,
            similarity,
            model_id: None,
            identity: None,
        }
    }
}

/// Strategy for comparing a query embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, query: &Embedding, gallery: &[FaceModel], threshold: f32) -> MatchResult;
}

/// Cosine similarity matcher.
///
/// Walks every gallery entry with no early exit so lookup time does not
/// depend on where (or whether) the identity is enrolled. Models whose
/// dimension differs from the query's are never candidates.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, query: &Embedding, gallery: &[FaceModel], threshold: f32) -> MatchResult {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, model) in gallery.iter().enumerate() {
            if model.embedding.values.len() != query.values.len() {
                tracing::warn!(
                    model_id = %model.id,
                    identity = %model.label,
                    expected = query.values.len(),
                    actual = model.embedding.values.len(),
                    "skipping face model with mismatched embedding dimension"
                );
                continue;
            }
            let sim = query.similarity(&model.embedding);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim >= threshold => MatchResult {
                matched: true,
                similarity: best_sim,
                model_id: Some(gallery[idx].id.clone()),
                identity: Some(gallery[idx].label.clone()),
            },
            Some(_) => MatchResult::no_match(best_sim),
            None => MatchResult::no_match(0.0),
        }
    }
}
