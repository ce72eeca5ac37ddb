//! Provider router: builds the fallback chain from configuration.
//!
//! Each `[[llm.providers]]` entry becomes one link of a [`FallbackProvider`],
//! in file order. Entries that need a key and have none are skipped.

use std::sync::Arc;
use std::time::Duration;

use forgeloop_config::{AppConfig, ProviderEntry, ProviderKind};
use forgeloop_core::{LlmError, Provider};
use tracing::{info, warn};

use crate::anthropic::AnthropicProvider;
use crate::fallback::FallbackProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// Build one wire client for a config entry.
pub fn build_provider(entry: &ProviderEntry) -> Result<Arc<dyn Provider>, LlmError> {
    let api_key = match (&entry.api_key, entry.kind.requires_key()) {
        (Some(key), _) => key.clone(),
        (None, false) => String::new(),
        (None, true) => {
            return Err(LlmError::NotConfigured(format!(
                "{:?} provider has no API key (set {} or llm.providers[].api_key)",
                entry.kind,
                entry.kind.api_key_env().unwrap_or("api_key")
            )));
        }
    };

    let provider: Arc<dyn Provider> = match entry.kind {
        ProviderKind::Anthropic => {
            let mut p = AnthropicProvider::new(api_key, &entry.model);
            if let Some(url) = &entry.api_url {
                p = p.with_base_url(url);
            }
            Arc::new(p)
        }
        ProviderKind::OpenAi => Arc::new(OpenAiCompatProvider::new(
            "openai",
            entry.api_url.as_deref().unwrap_or(&default_base_url(entry.kind)),
            api_key,
            &entry.model,
        )),
        ProviderKind::OpenRouter => Arc::new(OpenAiCompatProvider::new(
            "openrouter",
            entry.api_url.as_deref().unwrap_or(&default_base_url(entry.kind)),
            api_key,
            &entry.model,
        )),
        ProviderKind::Ollama => {
            Arc::new(OpenAiCompatProvider::ollama(entry.api_url.as_deref(), &entry.model))
        }
        ProviderKind::Custom => {
            let url = entry
                .api_url
                .as_deref()
                .ok_or_else(|| LlmError::NotConfigured("custom provider requires api_url".into()))?;
            Arc::new(OpenAiCompatProvider::new("custom", url, api_key, &entry.model))
        }
    };

    Ok(provider)
}

/// Build the fallback chain from configuration.
pub fn build_from_config(config: &AppConfig) -> Result<FallbackProvider, LlmError> {
    let mut chain = FallbackProvider::new("fallback")
        .with_max_retries(config.llm.max_retries)
        .with_backoff(Duration::from_millis(config.llm.retry_backoff_ms));

    let mut skipped = Vec::new();
    for entry in &config.llm.providers {
        match build_provider(entry) {
            Ok(provider) => {
                info!(provider = %provider.name(), model = %entry.model, "Provider added to chain");
                chain = chain.add(provider, Duration::from_secs(entry.timeout_secs));
            }
            Err(e) => {
                warn!(model = %entry.model, error = %e, "Skipping provider");
                skipped.push(e.to_string());
            }
        }
    }

    if chain.is_empty() {
        return Err(LlmError::NotConfigured(format!(
            "no usable providers: {}",
            skipped.join("; ")
        )));
    }

    Ok(chain)
}

/// Get the default base URL for well-known providers.
fn default_base_url(kind: ProviderKind) -> String {
    match kind {
        ProviderKind::OpenRouter => "https://openrouter.ai/api/v1".into(),
        ProviderKind::OpenAi => "https://api.openai.com/v1".into(),
        ProviderKind::Anthropic => "https://api.anthropic.com".into(),
        ProviderKind::Ollama => "http://localhost:11434/v1".into(),
        ProviderKind::Custom => String::new(),
    }
}
