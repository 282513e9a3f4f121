//! Backend adapters: OCR, structuring, translation and raw text completion.
//!
//! Each adapter is a function-like boundary `(input, options) -> output` that
//! fails with [`AdapterError`]. Adapters never see the document model and
//! never retry; the [`crate::pipeline::Coordinator`] owns retry policy and
//! is the only writer of their results.
//!
//! ```text
//!   OcrEngine      page image        ──▶ OcrOutput (regions)
//!   Structurer     regions + area    ──▶ Vec<ParagraphDraft>
//!   Translator     text + languages  ──▶ String
//!   Completion     system + user     ──▶ String     (used by the above + graph)
//! ```

pub mod llm;
pub mod ocr;
pub mod structure;
pub mod translate;

pub use llm::LlmClient;
pub use ocr::VisionOcr;
pub use structure::LlmStructurer;
pub use translate::{DeepLTranslator, LlmTranslator};

use crate::error::AdapterError;
use crate::model::{OcrOutput, OcrRegion, ParagraphDraft, SafeArea};
use async_trait::async_trait;

/// A rendered page, PNG-encoded.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub page_index: usize,
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default)]
pub struct OcrOptions {
    pub max_tokens: Option<usize>,
}

/// Input to one structuring call. `regions` are already filtered to the safe
/// area.
#[derive(Debug, Clone)]
pub struct StructureRequest<'a> {
    pub page_index: usize,
    pub regions: &'a [OcrRegion],
    pub safe_area: SafeArea,
}

#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub system: &'a str,
    pub user: &'a str,
    pub max_tokens: Option<usize>,
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(
        &self,
        image: &PageImage,
        options: &OcrOptions,
    ) -> Result<OcrOutput, AdapterError>;
}

#[async_trait]
pub trait Structurer: Send + Sync {
    async fn structure(
        &self,
        request: &StructureRequest<'_>,
    ) -> Result<Vec<ParagraphDraft>, AdapterError>;
}

#[async_trait]
pub trait Translator: Send + Sync {
    /// Backend name; part of the translation cache fingerprint.
    fn name(&self) -> &str;

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, AdapterError>;
}

/// Plain text-in, text-out LLM call.
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, AdapterError>;
}

/// Strip a surrounding ```` ```lang ```` fence, if any.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
