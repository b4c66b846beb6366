// Deterministic in-process backends for tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::Duration;

use super::services::{EmbeddingBackend, GenerationBackend, TextStream};
use super::{RAGError, RAGResult};

fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Bag-of-words embedding: each lowercase word adds one to a hashed bucket.
pub struct HashingBackend {
    dimensions: usize,
    calls: AtomicUsize,
}

impl HashingBackend {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn encode_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = (fnv1a(&token.to_lowercase()) % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingBackend for HashingBackend {
    async fn encode(&self, texts: &[String]) -> RAGResult<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.encode_one(t)).collect())
    }

    fn backend_name(&self) -> &str {
        "hashing"
    }
}

/// Returns the same vectors on every call, whatever the input.
pub struct FixedBackend {
    vectors: Vec<Vec<f32>>,
    delay: Option<Duration>,
}

impl FixedBackend {
    pub fn new(vectors: Vec<Vec<f32>>) -> Self {
        Self {
            vectors,
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl EmbeddingBackend for FixedBackend {
    async fn encode(&self, _texts: &[String]) -> RAGResult<Vec<Vec<f32>>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.vectors.clone())
    }

    fn backend_name(&self) -> &str {
        "fixed"
    }
}

/// Replays scripted chunks and records every prompt it receives.
pub struct ScriptedGenerator {
    chunks: Vec<String>,
    failure: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            failure: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            chunks: Vec::new(),
            failure: Some(message.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn record(&self, prompt: &str) -> RAGResult<()> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match &self.failure {
            Some(message) => Err(RAGError::GenerationFailure(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl GenerationBackend for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> RAGResult<String> {
        self.record(prompt)?;
        Ok(self.chunks.concat())
    }

    async fn generate_stream(&self, prompt: &str) -> RAGResult<TextStream> {
        self.record(prompt)?;
        let chunks: Vec<RAGResult<String>> = self.chunks.iter().cloned().map(Ok).collect();
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
