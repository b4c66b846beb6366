// RAG (Retrieval-Augmented Generation) module
// Segmentation, embedding, vector search, and grounded answer generation

pub mod composer;
pub mod index;
pub mod retriever;
pub mod segmenter;
pub mod service;
pub mod services;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

use thiserror::Error;

pub use composer::{collect_text, AnswerComposer, DEFAULT_INSTRUCTION};
pub use index::VectorIndex;
pub use retriever::Retriever;
pub use segmenter::Segmenter;
pub use service::{RAGQueryResponse, RAGService};
pub use services::{
    EmbeddingBackend, Embedder, GenerationBackend, ProviderEmbeddingBackend,
    ProviderGenerationBackend, TextStream,
};
pub use types::*;

/// Errors raised by the retrieval pipeline
#[derive(Error, Debug)]
pub enum RAGError {
    #[error("Embedding failed: {0}")]
    EmbeddingFailure(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Generation failed: {0}")]
    GenerationFailure(String),

    #[error("Index holds no passages")]
    EmptyIndex,

    #[error("Top passage needs ~{required} tokens but the context budget is {budget}")]
    ContextBudgetExceeded { required: usize, budget: usize },

    #[error("Invalid index: {0}")]
    InvalidIndex(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for RAG operations
pub type RAGResult<T> = Result<T, RAGError>;
