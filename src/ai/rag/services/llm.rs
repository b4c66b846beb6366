// LLM service for generating grounded answers

use crate::ai::core::{AIProvider, ChatMessage, ChatRequest, ModelParameters};
use crate::ai::rag::{RAGError, RAGResult};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio::time::{timeout, Duration};

/// Lazy, finite stream of generated text chunks. Not restartable.
pub type TextStream = Pin<Box<dyn Stream<Item = RAGResult<String>> + Send>>;

/// Opaque text-completion service
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, prompt: &str) -> RAGResult<String>;

    /// Streams the completion. Backends without native streaming yield the
    /// full completion as one chunk.
    async fn generate_stream(&self, prompt: &str) -> RAGResult<TextStream> {
        let text = self.generate(prompt).await?;
        Ok(Box::pin(futures_util::stream::once(async move { Ok(text) })))
    }

    fn model_name(&self) -> &str;
}

/// Generation backend that calls a remote [`AIProvider`]
pub struct ProviderGenerationBackend {
    provider: Arc<dyn AIProvider>,
    model: String,
    system_prompt: Option<String>,
    parameters: Option<ModelParameters>,
    timeout: Option<Duration>,
}

impl ProviderGenerationBackend {
    pub fn new(provider: Arc<dyn AIProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            system_prompt: None,
            parameters: None,
            timeout: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    pub fn with_parameters(mut self, parameters: Option<ModelParameters>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Bounds the blocking call and, when streaming, the wait for the stream
    /// to open.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Create chat request for the AI provider
    fn create_chat_request(&self, prompt: &str, stream: bool) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(prompt));

        ChatRequest {
            messages,
            model_name: self.model.clone(),
            stream,
            parameters: self.parameters.clone(),
        }
    }

    fn generation_error(&self, e: impl std::fmt::Display) -> RAGError {
        tracing::error!(
            "{} generation failed for model {}: {}",
            self.provider.provider_name(),
            self.model,
            e
        );
        RAGError::GenerationFailure(e.to_string())
    }

    fn timeout_error(&self, limit: Duration) -> RAGError {
        self.generation_error(format!("request timed out after {:?}", limit))
    }
}

#[async_trait]
impl GenerationBackend for ProviderGenerationBackend {
    async fn generate(&self, prompt: &str) -> RAGResult<String> {
        let request = self.create_chat_request(prompt, false);
        let call = self.provider.chat(request);

        let response = match self.timeout {
            Some(limit) => timeout(limit, call)
                .await
                .map_err(|_| self.timeout_error(limit))?,
            None => call.await,
        }
        .map_err(|e| self.generation_error(e))?;

        tracing::debug!(
            "Generated {} chars with {} (finish_reason: {:?}, usage: {:?})",
            response.content.len(),
            self.model,
            response.finish_reason,
            response.usage
        );
        Ok(response.content)
    }

    async fn generate_stream(&self, prompt: &str) -> RAGResult<TextStream> {
        let request = self.create_chat_request(prompt, true);
        let call = self.provider.chat_stream(request);

        let chunks = match self.timeout {
            Some(limit) => timeout(limit, call)
                .await
                .map_err(|_| self.timeout_error(limit))?,
            None => call.await,
        }
        .map_err(|e| self.generation_error(e))?;

        let provider_name = self.provider.provider_name();
        let text = chunks.filter_map(move |chunk| async move {
            match chunk {
                Ok(chunk) => chunk.content.filter(|c| !c.is_empty()).map(Ok),
                Err(e) => {
                    tracing::error!("{} stream failed: {}", provider_name, e);
                    Some(Err(RAGError::GenerationFailure(e.to_string())))
                }
            }
        });
        Ok(Box::pin(text))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::core::{
        ChatResponse, EmbeddingsRequest, EmbeddingsResponse, ProviderError, StreamingChunk,
        StreamingResponse,
    };
    use std::sync::Mutex;

    /// Provider that replays canned chat output and records requests.
    struct CannedProvider {
        reply: &'static str,
        chunks: Vec<Result<StreamingChunk, &'static str>>,
        fail: bool,
        delay: Option<Duration>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl CannedProvider {
        fn new(reply: &'static str) -> Self {
            Self {
                reply,
                chunks: Vec::new(),
                fail: false,
                delay: None,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AIProvider for CannedProvider {
        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.requests.lock().unwrap().push(request);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err("HTTP 503: overloaded".into());
            }
            Ok(ChatResponse {
                content: self.reply.to_string(),
                finish_reason: Some("STOP".to_string()),
                usage: None,
            })
        }

        async fn chat_stream(&self, request: ChatRequest) -> Result<StreamingResponse, ProviderError> {
            self.requests.lock().unwrap().push(request);
            let items: Vec<Result<StreamingChunk, ProviderError>> = self
                .chunks
                .iter()
                .cloned()
                .map(|c| c.map_err(|e| e.into()))
                .collect();
            Ok(Box::pin(futures_util::stream::iter(items)))
        }

        async fn embeddings(
            &self,
            _request: EmbeddingsRequest,
        ) -> Result<EmbeddingsResponse, ProviderError> {
            Err("not supported".into())
        }

        fn provider_name(&self) -> &'static str {
            "canned"
        }
    }

    fn chunk(text: &str) -> Result<StreamingChunk, &'static str> {
        Ok(StreamingChunk {
            content: Some(text.to_string()),
            finish_reason: None,
        })
    }

    #[tokio::test]
    async fn test_generate_sends_system_and_user_messages() {
        let provider = Arc::new(CannedProvider::new("Revenue grew 20%."));
        let backend = ProviderGenerationBackend::new(provider.clone(), "gemini-1.5-flash")
            .with_system_prompt(Some("Be brief.".to_string()));

        let answer = backend.generate("Context:\n...").await.unwrap();
        assert_eq!(answer, "Revenue grew 20%.");

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].stream);
        assert_eq!(requests[0].model_name, "gemini-1.5-flash");
        assert_eq!(
            requests[0].messages,
            vec![ChatMessage::system("Be brief."), ChatMessage::user("Context:\n...")]
        );
    }

    #[tokio::test]
    async fn test_provider_error_maps_to_generation_failure() {
        let mut provider = CannedProvider::new("");
        provider.fail = true;
        let backend = ProviderGenerationBackend::new(Arc::new(provider), "m");
        let err = backend.generate("prompt").await.unwrap_err();
        assert!(matches!(err, RAGError::GenerationFailure(ref m) if m.contains("503")));
    }

    #[tokio::test]
    async fn test_timeout_maps_to_generation_failure() {
        let mut provider = CannedProvider::new("too late");
        provider.delay = Some(Duration::from_millis(200));
        let backend = ProviderGenerationBackend::new(Arc::new(provider), "m")
            .with_timeout(Some(Duration::from_millis(10)));

        match backend.generate("prompt").await.unwrap_err() {
            RAGError::GenerationFailure(message) => assert!(message.ends_with("10ms"), "{}", message),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_skips_empty_chunks() {
        let mut provider = CannedProvider::new("");
        provider.chunks = vec![
            chunk("Tesla "),
            Ok(StreamingChunk::default()),
            chunk(""),
            chunk("grew."),
            Ok(StreamingChunk {
                content: None,
                finish_reason: Some("STOP".to_string()),
            }),
        ];
        let backend = ProviderGenerationBackend::new(Arc::new(provider), "m");

        let pieces: Vec<String> = backend
            .generate_stream("prompt")
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(pieces, vec!["Tesla ".to_string(), "grew.".to_string()]);
    }

    #[tokio::test]
    async fn test_stream_error_surfaces_as_generation_failure() {
        let mut provider = CannedProvider::new("");
        provider.chunks = vec![chunk("partial"), Err("connection reset")];
        let backend = ProviderGenerationBackend::new(Arc::new(provider), "m");

        let items: Vec<RAGResult<String>> =
            backend.generate_stream("prompt").await.unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(RAGError::GenerationFailure(_))));
    }
}
