//! Runtime settings: an optional JSON file overlaid with `DOCQA_*` environment
//! variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::ai::core::ProxyConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Gemini,
    #[serde(rename = "openai_compatible")]
    OpenAICompatible,
}

impl std::str::FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gemini" => Ok(ProviderKind::Gemini),
            "openai_compatible" | "openai" => Ok(ProviderKind::OpenAICompatible),
            _ => Err(ConfigError::Invalid(format!("Unknown provider: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub proxy: Option<ProxyConfig>,
    pub request_timeout_seconds: Option<u64>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Gemini,
            api_key: None,
            base_url: None,
            proxy: None,
            request_timeout_seconds: Some(120),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub model: String,
    /// Texts per backend call
    pub batch_size: usize,
    pub timeout_seconds: Option<u64>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: "text-embedding-004".to_string(),
            batch_size: 100,
            timeout_seconds: Some(60),
        }
    }
}

/// A generation model with its relative selection weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedModel {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// One model is drawn per run, weighted by `weight`.
    pub models: Vec<WeightedModel>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub timeout_seconds: Option<u64>,
    pub stream: bool,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            models: vec![WeightedModel {
                name: "gemini-1.5-flash".to_string(),
                weight: 1.0,
            }],
            system_prompt: None,
            temperature: None,
            max_output_tokens: None,
            timeout_seconds: Some(120),
            stream: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    /// Sentences at or under this many characters are dropped as noise
    pub min_passage_chars: usize,
    pub max_context_tokens: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_passage_chars: 20,
            max_context_tokens: 4000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub provider: ProviderSettings,
    pub embedding: EmbeddingSettings,
    pub generation: GenerationSettings,
    pub retrieval: RetrievalSettings,
}

impl Settings {
    /// Loads settings from `path` (defaults when absent), applies environment
    /// overrides from the process environment, and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                let settings: Settings = serde_json::from_str(&raw)?;
                tracing::debug!("Loaded settings from {}", path.display());
                settings
            }
            None => Settings::default(),
        };

        settings.apply_env_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Overlays `DOCQA_*` variables looked up through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(kind) = non_empty("DOCQA_PROVIDER") {
            self.provider.kind = kind.trim().parse()?;
        }

        let vendor_key = match self.provider.kind {
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::OpenAICompatible => "OPENAI_API_KEY",
        };
        if let Some(api_key) = non_empty("DOCQA_API_KEY").or_else(|| non_empty(vendor_key)) {
            self.provider.api_key = Some(api_key);
        }

        if let Some(base_url) = non_empty("DOCQA_BASE_URL") {
            self.provider.base_url = Some(base_url);
        }
        if let Some(model) = non_empty("DOCQA_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(model) = non_empty("DOCQA_GENERATION_MODEL") {
            self.generation.models = vec![WeightedModel {
                name: model,
                weight: 1.0,
            }];
        }
        if let Some(top_k) = non_empty("DOCQA_TOP_K") {
            self.retrieval.top_k = top_k
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("DOCQA_TOP_K is not a number: {}", top_k)))?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid("retrieval.top_k must be at least 1".to_string()));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Invalid("embedding.batch_size must be at least 1".to_string()));
        }
        if self.embedding.model.trim().is_empty() {
            return Err(ConfigError::Invalid("embedding.model is empty".to_string()));
        }
        if self.generation.models.is_empty() {
            return Err(ConfigError::Invalid("generation.models is empty".to_string()));
        }
        Ok(())
    }
}
