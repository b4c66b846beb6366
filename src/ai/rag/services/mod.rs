// RAG shared services

pub mod embedding;
pub mod llm;

pub use embedding::{Embedder, EmbeddingBackend, ProviderEmbeddingBackend};
pub use llm::{GenerationBackend, ProviderGenerationBackend, TextStream};
