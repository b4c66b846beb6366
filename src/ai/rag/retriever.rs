// Query-time retrieval: embed the question, search the index

use super::index::VectorIndex;
use super::segmenter::Segmenter;
use super::services::Embedder;
use super::types::RetrievalResult;
use super::RAGResult;

/// Owns one document's index and the embedder that produced it.
pub struct Retriever {
    embedder: Embedder,
    index: VectorIndex,
}

impl Retriever {
    pub fn new(embedder: Embedder, index: VectorIndex) -> Self {
        Self { embedder, index }
    }

    /// Segments, embeds, and indexes `text`. Any failure aborts the whole
    /// document; no partial index is kept.
    pub async fn from_document(
        text: &str,
        segmenter: &Segmenter,
        embedder: Embedder,
    ) -> RAGResult<Self> {
        let passages = segmenter.segment(text);
        if passages.is_empty() {
            tracing::warn!("Document produced no passages; index will be empty");
        }

        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let vectors = embedder.embed(&texts).await?;
        let index = VectorIndex::build(passages, vectors)?;

        tracing::info!(
            "Indexed document: {} passages, {:?} dimensions",
            index.len(),
            index.dimensions()
        );
        Ok(Self::new(embedder, index))
    }

    /// Top-`k` passages for `question`.
    pub async fn retrieve(&self, question: &str, k: usize) -> RAGResult<RetrievalResult> {
        let query = self.embedder.embed_one(question).await?;
        let results = self.index.search(&query, k)?;

        tracing::debug!(
            "Retrieved {} passages (top_k: {}, best score: {:?})",
            results.len(),
            k,
            results.first().map(|r| r.score)
        );
        Ok(results)
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::rag::test_support::{FixedBackend, HashingBackend};
    use crate::ai::rag::RAGError;
    use std::sync::Arc;

    const TESLA: &str = "The sky is blue. Cats are mammals. \
                         Tesla reported strong revenue growth this quarter.";

    #[tokio::test]
    async fn test_single_surviving_passage_is_retrieved() {
        let embedder = Embedder::new(Arc::new(HashingBackend::new(64)));
        let retriever = Retriever::from_document(TESLA, &Segmenter::default(), embedder)
            .await
            .unwrap();
        assert_eq!(retriever.index().len(), 1);

        let hits = retriever
            .retrieve("How did Tesla revenue change?", 1)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(
            hits[0].passage.text,
            "Tesla reported strong revenue growth this quarter."
        );
        assert!(hits[0].score > 0.0);
    }

    #[tokio::test]
    async fn test_relevant_passage_ranks_first() {
        let document = "Automotive revenue increased sharply during the quarter. \
                        Energy storage deployments reached a record level. \
                        The company opened new service centers across Europe.";
        let embedder = Embedder::new(Arc::new(HashingBackend::new(256)));
        let retriever = Retriever::from_document(document, &Segmenter::default(), embedder)
            .await
            .unwrap();

        let hits = retriever
            .retrieve("energy storage deployments record", 3)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits[0].passage.text.starts_with("Energy storage"));
    }

    #[tokio::test]
    async fn test_empty_document_gives_empty_results() {
        let embedder = Embedder::new(Arc::new(HashingBackend::new(16)));
        let retriever = Retriever::from_document("Short. Tiny.", &Segmenter::default(), embedder)
            .await
            .unwrap();
        assert!(retriever.index().is_empty());
        assert!(retriever.retrieve("anything at all", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_aborts_indexing() {
        let embedder = Embedder::new(Arc::new(FixedBackend::new(vec![vec![0.0, 0.0]])));
        let result = Retriever::from_document(TESLA, &Segmenter::default(), embedder).await;
        assert!(matches!(result, Err(RAGError::EmbeddingFailure(_))));
    }

    #[tokio::test]
    async fn test_query_dimension_mismatch_propagates() {
        let index = VectorIndex::build(
            Segmenter::default().segment(TESLA),
            vec![vec![1.0, 0.0, 0.0]],
        )
        .unwrap();
        let embedder = Embedder::new(Arc::new(FixedBackend::new(vec![vec![0.0, 1.0]])));
        let retriever = Retriever::new(embedder, index);

        let err = retriever.retrieve("question", 1).await.unwrap_err();
        assert!(matches!(err, RAGError::DimensionMismatch { expected: 3, actual: 2 }));
    }
}
