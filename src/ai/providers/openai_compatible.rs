use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::ai::core::provider_base::{build_http_client, sse_data_stream, HttpClientConfig};
use crate::ai::core::providers::{
    AIProvider, ChatMessage, ChatRequest, ChatResponse, EmbeddingData, EmbeddingsRequest,
    EmbeddingsResponse, ProviderError, ProxyConfig, StreamingChunk, StreamingResponse, Usage,
};

pub const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Provider for any server speaking the OpenAI chat-completions and
/// embeddings wire format (OpenAI, Ollama, LM Studio, vLLM, ...).
#[derive(Debug, Clone)]
pub struct OpenAICompatibleProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct OpenAICompatibleResponse {
    choices: Vec<OpenAICompatibleChoice>,
    usage: Option<OpenAICompatibleUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAICompatibleChoice {
    message: OpenAICompatibleMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct OpenAICompatibleMessage {
    role: String,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAICompatibleUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OpenAICompatibleStreamResponse {
    choices: Vec<OpenAICompatibleStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAICompatibleStreamChoice {
    delta: OpenAICompatibleStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAICompatibleStreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAICompatibleEmbeddingsResponse {
    data: Vec<OpenAICompatibleEmbedding>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAICompatibleEmbedding {
    index: u32,
    embedding: Vec<f32>,
}

impl OpenAICompatibleProvider {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        proxy_config: Option<&ProxyConfig>,
        http_config: &HttpClientConfig,
    ) -> Result<Self, ProviderError> {
        let base_url = base_url
            .unwrap_or_else(|| OPENAI_DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let client = build_http_client(&base_url, proxy_config, http_config)?;

        Ok(Self {
            client,
            api_key,
            base_url,
        })
    }

    fn endpoint_url(&self, path: &str) -> String {
        if self.base_url.ends_with("/v1") || self.base_url.contains("/openai") {
            format!("{}/{}", self.base_url, path)
        } else {
            format!("{}/v1/{}", self.base_url, path)
        }
    }

    /// Local servers usually run without a key.
    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.api_key)
        }
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let error_text = response.text().await?;
        Err(format!("OpenAI-compatible API error (HTTP {}): {}", status, error_text).into())
    }
}

fn build_request(request: &ChatRequest, stream: bool) -> serde_json::Value {
    let messages: Vec<OpenAICompatibleMessage> = request
        .messages
        .iter()
        .map(|msg: &ChatMessage| OpenAICompatibleMessage {
            role: msg.role.clone(),
            content: Some(msg.content.clone()),
        })
        .collect();

    let mut payload = json!({
        "model": request.model_name,
        "messages": messages,
        "stream": stream
    });

    if let Some(params) = &request.parameters {
        if let Some(temperature) = params.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = params.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = params.top_p {
            payload["top_p"] = json!(top_p);
        }
        if let Some(stop) = &params.stop {
            payload["stop"] = json!(stop);
        }
    }

    payload
}

fn parse_stream_event(data: &str) -> Result<Option<StreamingChunk>, serde_json::Error> {
    let response: OpenAICompatibleStreamResponse = serde_json::from_str(data)?;
    Ok(response
        .choices
        .into_iter()
        .next()
        .map(|choice| StreamingChunk {
            content: choice.delta.content.filter(|c| !c.is_empty()),
            finish_reason: choice.finish_reason,
        }))
}

#[async_trait]
impl AIProvider for OpenAICompatibleProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let url = self.endpoint_url("chat/completions");
        let payload = build_request(&request, false);

        let response = self
            .authorize(self.client.post(&url))
            .json(&payload)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        let api_response: OpenAICompatibleResponse = response.json().await?;
        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        match api_response.choices.into_iter().next() {
            Some(choice) => Ok(ChatResponse {
                content: choice.message.content.unwrap_or_default(),
                finish_reason: choice.finish_reason,
                usage,
            }),
            None => Err("No choices returned from OpenAI-compatible API".into()),
        }
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<StreamingResponse, ProviderError> {
        let url = self.endpoint_url("chat/completions");
        let payload = build_request(&request, true);

        let response = self
            .authorize(self.client.post(&url))
            .json(&payload)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        let stream = sse_data_stream(response.bytes_stream()).filter_map(|event| async move {
            match event {
                Ok(data) => match parse_stream_event(&data) {
                    Ok(chunk) => chunk.map(Ok),
                    Err(e) => {
                        tracing::warn!("Failed to parse streaming response: {} for data: {}", e, data);
                        None
                    }
                },
                Err(e) => Some(Err(e)),
            }
        });

        Ok(Box::pin(stream))
    }

    async fn embeddings(
        &self,
        request: EmbeddingsRequest,
    ) -> Result<EmbeddingsResponse, ProviderError> {
        let url = self.endpoint_url("embeddings");
        let payload = json!({
            "model": request.model,
            "input": request.input,
            "encoding_format": "float"
        });

        let response = self
            .authorize(self.client.post(&url))
            .json(&payload)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        let api_response: OpenAICompatibleEmbeddingsResponse = response.json().await?;
        Ok(EmbeddingsResponse {
            data: api_response
                .data
                .into_iter()
                .map(|d| EmbeddingData {
                    index: d.index,
                    embedding: d.embedding,
                })
                .collect(),
            model: api_response.model.unwrap_or(request.model),
        })
    }

    fn provider_name(&self) -> &'static str {
        "openai_compatible"
    }
}
