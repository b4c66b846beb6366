// Embedding service for generating vector representations

use crate::ai::core::{AIProvider, EmbeddingsRequest};
use crate::ai::rag::{
    types::{l2_normalize, EmbeddingVector},
    RAGError, RAGResult,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::{timeout, Duration};

pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 100;

/// Raw text encoder. Implementations return one vector per input, in input
/// order; normalization and validation are left to [`Embedder`].
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn encode(&self, texts: &[String]) -> RAGResult<Vec<Vec<f32>>>;

    /// Returns the name of the backend for logging
    fn backend_name(&self) -> &str;
}

/// Embedding backend that calls a remote [`AIProvider`]
pub struct ProviderEmbeddingBackend {
    provider: Arc<dyn AIProvider>,
    model: String,
}

impl ProviderEmbeddingBackend {
    pub fn new(provider: Arc<dyn AIProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl EmbeddingBackend for ProviderEmbeddingBackend {
    async fn encode(&self, texts: &[String]) -> RAGResult<Vec<Vec<f32>>> {
        let request = EmbeddingsRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
        };

        let response = self.provider.embeddings(request).await.map_err(|e| {
            tracing::error!(
                "{} embeddings call failed for model {}: {}",
                self.provider.provider_name(),
                self.model,
                e
            );
            RAGError::EmbeddingFailure(e.to_string())
        })?;

        Ok(response.into_vectors())
    }

    fn backend_name(&self) -> &str {
        self.provider.provider_name()
    }
}

/// Maps text to unit-norm vectors through an [`EmbeddingBackend`].
///
/// Every vector returned by one call shares a dimension and has L2 norm 1.
/// Inputs that are empty, or that the backend maps to a zero or non-finite
/// vector, fail the whole call.
#[derive(Clone)]
pub struct Embedder {
    backend: Arc<dyn EmbeddingBackend>,
    batch_size: usize,
    timeout: Option<Duration>,
}

impl Embedder {
    pub fn new(backend: Arc<dyn EmbeddingBackend>) -> Self {
        Self {
            backend,
            batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
            timeout: None,
        }
    }

    /// Texts per backend call. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.backend_name()
    }

    /// Validate text for embedding
    fn validate_text(index: usize, text: &str) -> RAGResult<()> {
        if text.trim().is_empty() {
            return Err(RAGError::EmbeddingFailure(format!(
                "Input {} is empty",
                index
            )));
        }
        Ok(())
    }

    async fn encode_batch(&self, batch: &[String]) -> RAGResult<Vec<Vec<f32>>> {
        match self.timeout {
            Some(limit) => timeout(limit, self.backend.encode(batch))
                .await
                .map_err(|_| {
                    tracing::error!(
                        "Embedding request to {} timed out after {:?}",
                        self.backend.backend_name(),
                        limit
                    );
                    RAGError::EmbeddingFailure(format!(
                        "Embedding request timed out after {:?}",
                        limit
                    ))
                })?,
            None => self.backend.encode(batch).await,
        }
    }

    /// Embed `texts` in batches, preserving order.
    pub async fn embed(&self, texts: &[String]) -> RAGResult<Vec<EmbeddingVector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        for (i, text) in texts.iter().enumerate() {
            Self::validate_text(i, text)?;
        }

        let mut all_embeddings: Vec<EmbeddingVector> = Vec::with_capacity(texts.len());
        let mut dimensions: Option<usize> = None;

        for (batch_number, batch) in texts.chunks(self.batch_size).enumerate() {
            let offset = batch_number * self.batch_size;
            let vectors = self.encode_batch(batch).await?;

            if vectors.len() != batch.len() {
                return Err(RAGError::EmbeddingFailure(format!(
                    "Backend returned {} vectors for {} inputs",
                    vectors.len(),
                    batch.len()
                )));
            }

            for (i, mut vector) in vectors.into_iter().enumerate() {
                let position = offset + i;
                let expected = *dimensions.get_or_insert(vector.len());
                if vector.len() != expected {
                    return Err(RAGError::EmbeddingFailure(format!(
                        "Input {} has dimension {}, expected {}",
                        position,
                        vector.len(),
                        expected
                    )));
                }
                if !l2_normalize(&mut vector) {
                    return Err(RAGError::EmbeddingFailure(format!(
                        "Input {} produced a zero or non-finite vector",
                        position
                    )));
                }
                all_embeddings.push(vector);
            }
        }

        tracing::debug!(
            "Embedded {} texts with {} (dimensions: {:?})",
            all_embeddings.len(),
            self.backend.backend_name(),
            dimensions
        );
        Ok(all_embeddings)
    }

    /// Embed a single text, typically a query.
    pub async fn embed_one(&self, text: &str) -> RAGResult<EmbeddingVector> {
        self.embed(std::slice::from_ref(&text.to_string()))
            .await?
            .pop()
            .ok_or_else(|| RAGError::EmbeddingFailure("Backend returned no vector".to_string()))
    }
}
