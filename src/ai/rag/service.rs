// Question answering over a single indexed document

use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::composer::AnswerComposer;
use super::retriever::Retriever;
use super::services::TextStream;
use super::types::{Passage, RetrievalResult};
use super::{RAGError, RAGResult};

pub const DEFAULT_TOP_K: usize = 5;

/// Answer with the passages it was grounded on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RAGQueryResponse {
    pub answer: String,
    pub sources: RetrievalResult,
    pub processing_time_ms: u64,
}

/// Retrieval plus grounded generation for one document.
pub struct RAGService {
    retriever: Retriever,
    composer: AnswerComposer,
    top_k: usize,
}

impl RAGService {
    pub fn new(retriever: Retriever, composer: AnswerComposer) -> Self {
        Self {
            retriever,
            composer,
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Passages retrieved per question, at least one.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Retrieval only, no generation.
    pub async fn search(&self, question: &str) -> RAGResult<RetrievalResult> {
        self.retriever.retrieve(question, self.top_k).await
    }

    /// Retrieved passages cut down to those that fit the prompt context, so
    /// the reported sources are exactly what the model sees.
    async fn grounded_sources(&self, question: &str) -> RAGResult<(RetrievalResult, Vec<Passage>)> {
        if self.retriever.index().is_empty() {
            tracing::warn!("Refusing to answer: index holds no passages");
            return Err(RAGError::EmptyIndex);
        }
        let mut sources = self.retriever.retrieve(question, self.top_k).await?;
        let mut passages: Vec<Passage> = sources.iter().map(|s| s.passage.clone()).collect();

        let fitted = self.composer.fit_context(&passages)?.len();
        sources.truncate(fitted);
        passages.truncate(fitted);
        Ok((sources, passages))
    }

    pub async fn ask(&self, question: &str) -> RAGResult<RAGQueryResponse> {
        let start_time = Instant::now();
        tracing::info!("Answering question ({} chars)", question.chars().count());

        let (sources, passages) = self.grounded_sources(question).await?;
        let answer = self.composer.answer(question, &passages).await?;

        let processing_time_ms = start_time.elapsed().as_millis() as u64;
        tracing::info!(
            "Answered with {} sources in {}ms (model: {})",
            sources.len(),
            processing_time_ms,
            self.composer.model_name()
        );

        Ok(RAGQueryResponse {
            answer,
            sources,
            processing_time_ms,
        })
    }

    /// Sources are known up front; the answer arrives as a stream.
    pub async fn ask_stream(&self, question: &str) -> RAGResult<(RetrievalResult, TextStream)> {
        let (sources, passages) = self.grounded_sources(question).await?;
        let stream = self.composer.answer_stream(question, &passages).await?;
        Ok((sources, stream))
    }
}
