//! Thin client over an `edgequake_llm` provider.
//!
//! All adapters that talk to an LLM go through [`LlmClient::chat`], which
//! applies the per-call timeout and maps provider errors onto the
//! [`AdapterError`] taxonomy. It makes exactly one attempt; retries belong to
//! the coordinator.

use super::{Completion, CompletionRequest};
use crate::config::PipelineConfig;
use crate::error::{AdapterError, PipelineError};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

#[derive(Clone)]
pub struct LlmClient {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
    timeout: Duration,
}

impl fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmClient")
            .field("provider", &"<dyn LLMProvider>")
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl LlmClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Resolve the provider from `config` and wrap it.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        Ok(Self::new(resolve_provider(config)?, config))
    }

    /// One chat round trip. Returns the response text.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        max_tokens: Option<usize>,
    ) -> Result<String, AdapterError> {
        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(max_tokens.unwrap_or(self.max_tokens)),
            ..Default::default()
        };

        let start = Instant::now();
        let response = tokio::time::timeout(self.timeout, self.provider.chat(messages, Some(&options)))
            .await
            .map_err(|_| AdapterError::Network {
                detail: format!("LLM call timed out after {}s", self.timeout.as_secs()),
            })?
            .map_err(|e| classify_error(&e.to_string()))?;

        debug!(
            "LLM call: {} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

#[async_trait]
impl Completion for LlmClient {
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, AdapterError> {
        let messages = [
            ChatMessage::system(request.system),
            ChatMessage::user(request.user),
        ];
        self.chat(&messages, request.max_tokens).await
    }
}

/// Map a provider error message onto the adapter taxonomy.
///
/// The provider crate reports failures as formatted errors, so the status is
/// recovered from the message text.
pub fn classify_error(message: &str) -> AdapterError {
    let lower = message.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["429", "rate limit", "rate_limit", "too many requests", "quota"]) {
        AdapterError::RateLimit {
            retry_after_secs: None,
        }
    } else if has(&[
        "401",
        "403",
        "unauthorized",
        "forbidden",
        "invalid api key",
        "invalid_api_key",
        "authentication",
    ]) {
        AdapterError::Auth {
            detail: message.to_string(),
        }
    } else {
        AdapterError::Network {
            detail: message.to_string(),
        }
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        PipelineError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`).
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI key present** (`OPENAI_API_KEY`), with `config.model` or the
///    default model.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| PipelineError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
