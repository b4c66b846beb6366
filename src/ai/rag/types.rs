// RAG-specific type definitions

use serde::{Deserialize, Serialize};

/// A retrievable unit of document text. Ids are dense and follow insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub id: usize,
    pub text: String,
}

/// Dense unit-norm vector; every vector of one index shares its dimension.
pub type EmbeddingVector = Vec<f32>;

/// A passage with its cosine similarity to the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPassage {
    pub passage: Passage,
    pub score: f32,
}

/// Search hits ordered by descending similarity, ties by ascending passage id.
pub type RetrievalResult = Vec<ScoredPassage>;

/// Inner product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scales `v` to unit length in place. Returns `false`, leaving `v`
/// untouched, when it has zero length or non-finite components.
pub fn l2_normalize(v: &mut [f32]) -> bool {
    let norm = l2_norm(v);
    if !norm.is_finite() || norm == 0.0 {
        return false;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    true
}
