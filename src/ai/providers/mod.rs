//! Remote AI provider implementations
//!
//! Gemini and any OpenAI-compatible server. Both serve chat (blocking and
//! streaming) and embeddings.

pub mod gemini;
pub mod openai_compatible;

pub use gemini::*;
pub use openai_compatible::*;

use std::sync::Arc;

use crate::ai::core::{AIProvider, HttpClientConfig, ProviderError};
use crate::config::{ProviderKind, ProviderSettings};

/// Instantiates the provider named by `settings`.
pub fn create_provider(settings: &ProviderSettings) -> Result<Arc<dyn AIProvider>, ProviderError> {
    let http_config = settings
        .request_timeout_seconds
        .map(HttpClientConfig::with_timeout)
        .unwrap_or_default();
    let api_key = settings.api_key.clone().unwrap_or_default();

    let provider: Arc<dyn AIProvider> = match settings.kind {
        ProviderKind::Gemini => {
            if api_key.is_empty() {
                return Err("Gemini provider requires an API key".into());
            }
            Arc::new(GeminiProvider::new(
                api_key,
                settings.base_url.clone(),
                settings.proxy.as_ref(),
                &http_config,
            )?)
        }
        ProviderKind::OpenAICompatible => Arc::new(OpenAICompatibleProvider::new(
            api_key,
            settings.base_url.clone(),
            settings.proxy.as_ref(),
            &http_config,
        )?),
    };

    tracing::debug!("Created {} provider", provider.provider_name());
    Ok(provider)
}
