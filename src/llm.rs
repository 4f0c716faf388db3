//! LLM completion collaborator.
//!
//! The pipeline talks to exactly one seam, [`CompletionClient`], so tests can
//! substitute a scripted mock and production can pick any provider
//! `edgequake-llm` supports (OpenAI, Anthropic, Gemini, Mistral, Ollama,
//! LM Studio, Azure) through configuration rather than inheritance.
//!
//! Implementations must request structured (JSON) output where the provider
//! supports it and use deterministic-leaning sampling — confidence scores
//! are only meaningful if repeated runs on identical input score alike.

use crate::config::AnalysisConfig;
use crate::error::LexError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Error from a single completion call.
///
/// Both variants are recoverable at the chunk level; the caller maps them
/// to [`crate::error::ChunkError`] and degrades the chunk.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("completion failed: {0}")]
    Api(String),
}

/// The LLM completion collaborator consumed by the field extractor and the
/// vision-OCR engine (text side).
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send a system + user prompt pair and return the raw completion text.
    async fn complete(&self, system: &str, user: &str) -> Result<String, CompletionError>;
}

/// Production [`CompletionClient`] over an `edgequake-llm` provider.
pub struct EdgequakeClient {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
    timeout: Duration,
}

impl EdgequakeClient {
    /// Wrap a pre-built provider with the config's sampling and timeout knobs.
    pub fn new(provider: Arc<dyn LLMProvider>, config: &AnalysisConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_response_tokens,
            timeout: Duration::from_secs(config.llm_timeout_secs),
        }
    }

    /// Resolve a provider from the config, most-specific to least-specific:
    ///
    /// 1. **Named provider + model** (`config.provider_name`) — reads the
    ///    matching API key from the environment via `ProviderFactory`.
    /// 2. **Environment pair** (`LEXTRACT_LLM_PROVIDER` + `LEXTRACT_MODEL`) —
    ///    set at the execution-environment level (shell script, CI).
    /// 3. **Full auto-detection** (`ProviderFactory::from_env`) — scans all
    ///    known API key variables and picks the first available provider.
    pub fn from_config(config: &AnalysisConfig) -> Result<Self, LexError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }

    /// Access the underlying provider, e.g. to share it with the vision-OCR
    /// engine.
    pub fn provider(&self) -> Arc<dyn LLMProvider> {
        Arc::clone(&self.provider)
    }
}

#[async_trait]
impl CompletionClient for EdgequakeClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, CompletionError> {
        let messages = vec![ChatMessage::system(system), ChatMessage::user(user)];
        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let call = self.provider.chat(&messages, Some(&options));
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(response)) => {
                debug!(
                    "completion: {} in / {} out tokens",
                    response.prompt_tokens, response.completion_tokens
                );
                Ok(response.content)
            }
            Ok(Err(e)) => Err(CompletionError::Api(e.to_string())),
            Err(_) => Err(CompletionError::Timeout {
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

/// Instantiate a named provider with the given model.
fn create_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, LexError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        LexError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn resolve_provider(config: &AnalysisConfig) -> Result<Arc<dyn LLMProvider>, LexError> {
    // 1) Provider name + model from config
    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-mini");
        return create_provider(name, model);
    }

    // 2) Environment pair; honoured even when multiple API keys are present
    if let (Ok(prov), Ok(model)) = (
        std::env::var("LEXTRACT_LLM_PROVIDER"),
        std::env::var("LEXTRACT_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    // 3) Full auto-detection
    let (provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| LexError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "auto-detection found no usable API key in the environment; \
                export OPENAI_API_KEY, ANTHROPIC_API_KEY, or GEMINI_API_KEY, \
                or name a provider explicitly (detection error: {e})"
            ),
        })?;

    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_error_display() {
        let e = CompletionError::Timeout { secs: 30 };
        assert!(e.to_string().contains("30s"));
        let e = CompletionError::Api("rate limited".into());
        assert!(e.to_string().contains("rate limited"));
    }
}
