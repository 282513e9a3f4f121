//! Translation backends behind the [`Translator`] contract.
//!
//! * [`LlmTranslator`] — any chat model via [`Completion`].
//! * [`DeepLTranslator`] — a DeepL-compatible HTTP endpoint (RapidAPI style:
//!   `POST https://<host>/translate` with `{text, source, target}`).

use super::{Completion, CompletionRequest, Translator};
use crate::error::AdapterError;
use crate::prompts::render_template;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Human-readable name for a language code; models follow "Korean" more
/// reliably than "KO".
pub fn language_name(code: &str) -> &str {
    match code.to_ascii_uppercase().as_str() {
        "ZH" | "ZH-CN" | "CN" => "Chinese",
        "ZH-TW" => "Traditional Chinese",
        "KO" => "Korean",
        "EN" | "EN-US" | "EN-GB" => "English",
        "JA" => "Japanese",
        "DE" => "German",
        "FR" => "French",
        "ES" => "Spanish",
        "IT" => "Italian",
        "PT" | "PT-BR" => "Portuguese",
        "RU" => "Russian",
        _ => code,
    }
}

pub struct LlmTranslator {
    completion: Arc<dyn Completion>,
    prompt: String,
}

impl LlmTranslator {
    pub fn new(completion: Arc<dyn Completion>, prompt: impl Into<String>) -> Self {
        Self {
            completion,
            prompt: prompt.into(),
        }
    }
}

#[async_trait]
impl Translator for LlmTranslator {
    fn name(&self) -> &str {
        "llm"
    }

    async fn translate(
        &self,
        text: &str,
        _source_lang: &str,
        target_lang: &str,
    ) -> Result<String, AdapterError> {
        let system = render_template(
            &self.prompt,
            &[("target_language", language_name(target_lang))],
        );
        let out = self
            .completion
            .complete(&CompletionRequest {
                system: &system,
                user: text,
                max_tokens: None,
            })
            .await?;
        let out = out.trim();
        if out.is_empty() && !text.trim().is_empty() {
            return Err(AdapterError::schema("empty translation"));
        }
        Ok(out.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct DeepLTranslator {
    client: reqwest::Client,
    endpoint: String,
    host: String,
    api_key: String,
}

#[derive(Serialize)]
struct DeepLRequest<'a> {
    text: &'a str,
    source: &'a str,
    target: &'a str,
}

impl DeepLTranslator {
    pub fn new(
        api_key: impl Into<String>,
        host: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AdapterError> {
        let host = host.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::network(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("https://{host}/translate"),
            host,
            api_key: api_key.into(),
        })
    }

    /// Point at a different endpoint (self-hosted proxy, test server).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Translator for DeepLTranslator {
    fn name(&self) -> &str {
        "deepl"
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, AdapterError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-RapidAPI-Key", &self.api_key)
            .header("X-RapidAPI-Host", &self.host)
            .json(&DeepLRequest {
                text,
                source: source_lang,
                target: target_lang,
            })
            .send()
            .await
            .map_err(|e| AdapterError::network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, retry_after, &body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AdapterError::schema(format!("translation response is not JSON: {e}")))?;
        translated_field(&body)
            .map(str::to_string)
            .ok_or_else(|| AdapterError::schema("translation response has no `text` field"))
    }
}

fn status_error(status: StatusCode, retry_after_secs: Option<u64>, body: &str) -> AdapterError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => AdapterError::RateLimit { retry_after_secs },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AdapterError::Auth {
            detail: format!("HTTP {status}: {body}"),
        },
        _ => AdapterError::network(format!("HTTP {status}: {body}")),
    }
}

/// The endpoint family answers with either `text` or `translatedText`.
fn translated_field(body: &Value) -> Option<&str> {
    ["text", "translatedText", "translation"]
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_str))
}
