use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ai::core::provider_base::{build_http_client, sse_data_stream, HttpClientConfig};
use crate::ai::core::providers::{
    AIProvider, ChatMessage, ChatRequest, ChatResponse, EmbeddingData, EmbeddingsRequest,
    EmbeddingsResponse, ProviderError, ProxyConfig, StreamingChunk, StreamingResponse, Usage,
};

pub const GEMINI_DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize, Serialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u32>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u32>,
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u32>,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(rename = "topP", skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(rename = "stopSequences", skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct GeminiBatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<GeminiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbedding {
    values: Vec<f32>,
}

impl GeminiProvider {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        proxy_config: Option<&ProxyConfig>,
        http_config: &HttpClientConfig,
    ) -> Result<Self, ProviderError> {
        let base_url = base_url
            .unwrap_or_else(|| GEMINI_DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let client = build_http_client(&base_url, proxy_config, http_config)?;

        Ok(Self {
            client,
            api_key,
            base_url,
        })
    }

    /// Gemini model ids are addressed as `models/<name>`; accept either form.
    fn model_path(model_name: &str) -> String {
        if model_name.starts_with("models/") {
            model_name.to_string()
        } else {
            format!("models/{}", model_name)
        }
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let error_text = response.text().await?;
        Err(format!("Gemini API error (HTTP {}): {}", status, error_text).into())
    }
}

/// Builds a `generateContent` payload. System messages become the
/// `systemInstruction`; the rest map to `user`/`model` turns.
fn prepare_request(request: &ChatRequest) -> Value {
    let system_text = request
        .messages
        .iter()
        .filter(|msg| msg.role == "system")
        .map(|msg| msg.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let contents: Vec<GeminiContent> = request
        .messages
        .iter()
        .filter(|msg| msg.role != "system")
        .map(|msg: &ChatMessage| GeminiContent {
            role: Some(match msg.role.as_str() {
                "assistant" => "model".to_string(),
                _ => "user".to_string(),
            }),
            parts: vec![GeminiPart {
                text: msg.content.clone(),
            }],
        })
        .collect();

    let params = request.parameters.as_ref();
    let mut payload = json!({
        "contents": contents,
        "generationConfig": GeminiGenerationConfig {
            temperature: params.and_then(|p| p.temperature),
            max_output_tokens: params.and_then(|p| p.max_tokens),
            top_p: params.and_then(|p| p.top_p),
            stop_sequences: params.and_then(|p| p.stop.clone()),
        }
    });

    if !system_text.is_empty() {
        payload["systemInstruction"] = json!(GeminiContent {
            role: None,
            parts: vec![GeminiPart { text: system_text }],
        });
    }

    payload
}

/// Concatenated text of the first candidate plus its finish reason.
fn first_candidate_text(response: GeminiResponse) -> Option<(String, Option<String>)> {
    let candidate = response.candidates.into_iter().next()?;
    let text = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .map(|part| part.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    Some((text, candidate.finish_reason))
}

fn parse_stream_event(data: &str) -> Result<Option<StreamingChunk>, serde_json::Error> {
    let response: GeminiResponse = serde_json::from_str(data)?;
    Ok(first_candidate_text(response).map(|(text, finish_reason)| StreamingChunk {
        content: if text.is_empty() { None } else { Some(text) },
        finish_reason,
    }))
}

#[async_trait]
impl AIProvider for GeminiProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let payload = prepare_request(&request);
        let url = format!(
            "{}/{}:generateContent",
            self.base_url,
            Self::model_path(&request.model_name)
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", &self.api_key)])
            .json(&payload)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        let gemini_response: GeminiResponse = response.json().await?;
        let usage = gemini_response.usage_metadata.as_ref().map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        });

        match first_candidate_text(gemini_response) {
            Some((content, finish_reason)) => Ok(ChatResponse {
                content,
                finish_reason,
                usage,
            }),
            None => Err("No candidates returned from Gemini API".into()),
        }
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<StreamingResponse, ProviderError> {
        let payload = prepare_request(&request);
        let url = format!(
            "{}/{}:streamGenerateContent",
            self.base_url,
            Self::model_path(&request.model_name)
        );

        let response = self
            .client
            .post(&url)
            .query(&[("alt", "sse"), ("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        let stream = sse_data_stream(response.bytes_stream()).filter_map(|event| async move {
            match event {
                Ok(data) => match parse_stream_event(&data) {
                    Ok(chunk) => chunk.map(Ok),
                    Err(e) => {
                        tracing::warn!("Failed to parse Gemini stream event: {} for data: {}", e, data);
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
        let model_path = Self::model_path(&request.model);
        let url = format!("{}/{}:batchEmbedContents", self.base_url, model_path);

        let requests: Vec<Value> = request
            .input
            .iter()
            .map(|text| {
                json!({
                    "model": model_path,
                    "content": { "parts": [{ "text": text }] }
                })
            })
            .collect();

        let response = self
            .client
            .post(&url)
            .query(&[("key", &self.api_key)])
            .json(&json!({ "requests": requests }))
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        let batch: GeminiBatchEmbedResponse = response.json().await?;
        let data = batch
            .embeddings
            .into_iter()
            .enumerate()
            .map(|(index, embedding)| EmbeddingData {
                index: index as u32,
                embedding: embedding.values,
            })
            .collect();

        Ok(EmbeddingsResponse {
            data,
            model: request.model,
        })
    }

    fn provider_name(&self) -> &'static str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::core::providers::ModelParameters;

    #[test]
    fn test_prepare_request_splits_system_instruction() {
        let request = ChatRequest {
            messages: vec![
                ChatMessage::system("Be terse."),
                ChatMessage::user("What is the revenue?"),
            ],
            model_name: "gemini-1.5-flash".to_string(),
            stream: false,
            parameters: Some(ModelParameters {
                temperature: Some(0.2),
                max_tokens: Some(256),
                ..Default::default()
            }),
        };

        let payload = prepare_request(&request);
        assert_eq!(payload["systemInstruction"]["parts"][0]["text"], "Be terse.");
        assert_eq!(payload["contents"].as_array().unwrap().len(), 1);
        assert_eq!(payload["contents"][0]["role"], "user");
        assert_eq!(payload["contents"][0]["parts"][0]["text"], "What is the revenue?");
        assert_eq!(payload["generationConfig"]["maxOutputTokens"], 256);
        assert!(payload["generationConfig"].get("topP").is_none());
    }

    #[test]
    fn test_parse_stream_event() {
        let data = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Revenue "},{"text":"grew."}]}}]}"#;
        let chunk = parse_stream_event(data).unwrap().unwrap();
        assert_eq!(chunk.content.as_deref(), Some("Revenue grew."));
        assert_eq!(chunk.finish_reason, None);

        let last = r#"{"candidates":[{"content":{"parts":[{"text":""}]},"finishReason":"STOP"}]}"#;
        let chunk = parse_stream_event(last).unwrap().unwrap();
        assert_eq!(chunk.content, None);
        assert_eq!(chunk.finish_reason.as_deref(), Some("STOP"));

        assert!(parse_stream_event(r#"{"candidates":[]}"#).unwrap().is_none());
    }

    #[test]
    fn test_model_path() {
        assert_eq!(GeminiProvider::model_path("text-embedding-004"), "models/text-embedding-004");
        assert_eq!(GeminiProvider::model_path("models/text-embedding-004"), "models/text-embedding-004");
    }
}
