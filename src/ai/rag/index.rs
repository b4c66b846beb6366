//! In-memory vector index with exact cosine top-k search and JSON persistence.

use std::cmp::Ordering;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{dot, l2_norm, EmbeddingVector, Passage, RetrievalResult, ScoredPassage};
use super::{RAGError, RAGResult};

const FORMAT_VERSION: u32 = 1;
const NORM_TOLERANCE: f32 = 1e-3;

/// Passages with their unit-norm vectors, stored as one row-major buffer.
///
/// Immutable once built; `search` only reads, so a built index can be shared
/// across tasks without locking.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    dimensions: Option<usize>,
    passages: Vec<Passage>,
    data: Vec<f32>,
}

/// Provenance stored alongside a persisted index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMetadata {
    pub embedding_model: String,
    pub built_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    format_version: u32,
    dimensions: Option<usize>,
    embedding_model: String,
    built_at: DateTime<Utc>,
    passages: Vec<Passage>,
    vectors: Vec<EmbeddingVector>,
}

impl VectorIndex {
    /// Builds an index from passages and their parallel vectors.
    ///
    /// Passage ids must equal their positions and every vector must be unit
    /// length. An empty input yields an empty index with no dimension.
    pub fn build(passages: Vec<Passage>, vectors: Vec<EmbeddingVector>) -> RAGResult<Self> {
        if passages.len() != vectors.len() {
            return Err(RAGError::InvalidIndex(format!(
                "{} passages but {} vectors",
                passages.len(),
                vectors.len()
            )));
        }
        if let Some((position, passage)) = passages
            .iter()
            .enumerate()
            .find(|(position, passage)| passage.id != *position)
        {
            return Err(RAGError::InvalidIndex(format!(
                "Passage at position {} has id {}",
                position, passage.id
            )));
        }

        let Some(first) = vectors.first() else {
            return Ok(Self::default());
        };
        let d = first.len();
        if d == 0 {
            return Err(RAGError::InvalidIndex("Vectors have zero dimensions".to_string()));
        }

        let mut data = Vec::with_capacity(d * vectors.len());
        for (position, vector) in vectors.iter().enumerate() {
            if vector.len() != d {
                return Err(RAGError::DimensionMismatch {
                    expected: d,
                    actual: vector.len(),
                });
            }
            let norm = l2_norm(vector);
            if !norm.is_finite() || (norm - 1.0).abs() > NORM_TOLERANCE {
                return Err(RAGError::InvalidIndex(format!(
                    "Vector {} is not unit length (norm {})",
                    position, norm
                )));
            }
            data.extend_from_slice(vector);
        }

        tracing::debug!("Built vector index: {} passages, {} dimensions", passages.len(), d);
        Ok(Self {
            dimensions: Some(d),
            passages,
            data,
        })
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Vector dimension, `None` for an empty index.
    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    pub fn passage(&self, id: usize) -> Option<&Passage> {
        self.passages.get(id)
    }

    fn vectors(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimensions.unwrap_or(1).max(1))
    }

    /// Exact top-k by cosine similarity (dot product of unit vectors).
    ///
    /// Results are ordered by descending score, ties by ascending id. `k` is
    /// clamped to the index size and an empty index yields no hits.
    pub fn search(&self, query: &[f32], k: usize) -> RAGResult<RetrievalResult> {
        let Some(d) = self.dimensions else {
            return Ok(Vec::new());
        };
        if query.len() != d {
            return Err(RAGError::DimensionMismatch {
                expected: d,
                actual: query.len(),
            });
        }

        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors()
            .map(|row| dot(row, query))
            .enumerate()
            .collect();

        let ranking = |a: &(usize, f32), b: &(usize, f32)| -> Ordering {
            b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
        };
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, ranking);
            scored.truncate(k);
        }
        scored.sort_unstable_by(ranking);

        Ok(scored
            .into_iter()
            .map(|(id, score)| ScoredPassage {
                passage: self.passages[id].clone(),
                score,
            })
            .collect())
    }

    /// Writes the index as JSON.
    pub fn save(&self, path: &Path, embedding_model: &str) -> RAGResult<()> {
        let persisted = PersistedIndex {
            format_version: FORMAT_VERSION,
            dimensions: self.dimensions,
            embedding_model: embedding_model.to_string(),
            built_at: Utc::now(),
            passages: self.passages.clone(),
            vectors: self.vectors().map(<[f32]>::to_vec).collect(),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(&persisted)?;
        std::fs::write(path, json)?;

        tracing::info!(
            "Saved index with {} passages to {}",
            self.len(),
            path.display()
        );
        Ok(())
    }

    /// Reads an index written by [`VectorIndex::save`], validating counts,
    /// dimensions, and vector norms.
    pub fn load(path: &Path) -> RAGResult<(Self, IndexMetadata)> {
        let raw = std::fs::read_to_string(path)?;
        let persisted: PersistedIndex = serde_json::from_str(&raw)?;

        if persisted.format_version != FORMAT_VERSION {
            return Err(RAGError::InvalidIndex(format!(
                "Unsupported format version {}",
                persisted.format_version
            )));
        }

        let index = Self::build(persisted.passages, persisted.vectors)?;
        if index.dimensions != persisted.dimensions {
            return Err(RAGError::InvalidIndex(format!(
                "Header declares {:?} dimensions, vectors have {:?}",
                persisted.dimensions, index.dimensions
            )));
        }

        tracing::info!(
            "Loaded index with {} passages from {} (model: {})",
            index.len(),
            path.display(),
            persisted.embedding_model
        );
        Ok((
            index,
            IndexMetadata {
                embedding_model: persisted.embedding_model,
                built_at: persisted.built_at,
            },
        ))
    }
}
