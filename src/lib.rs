//! Document-grounded question answering.
//!
//! A document is segmented into sentence passages, embedded into a unit-norm
//! vector index, and searched per question. The top passages become the
//! context of a prompt sent to a generation model.

pub mod ai;
pub mod config;
pub mod utils;

pub use ai::rag::{
    AnswerComposer, Embedder, Passage, RAGError, RAGQueryResponse, RAGResult, RAGService,
    RetrievalResult, Retriever, ScoredPassage, Segmenter, VectorIndex,
};
pub use config::Settings;
