//! Error types for the paper2md library.
//!
//! Errors are split by how far they are allowed to travel:
//!
//! * [`PipelineError`] — **Fatal**: the session cannot be opened or an output
//!   cannot be written (bad input file, wrong password, provider not
//!   configured). Returned as `Err(PipelineError)`.
//!
//! * [`AdapterError`] — a single OCR / structuring / translation / graph call
//!   failed. The coordinator retries it; once the retry budget is spent it is
//!   wrapped in a [`PageError`] and parked on the page.
//!
//! * [`PageError`] — **Non-fatal**: stored in
//!   [`crate::model::PageState::Failed`] so one bad page never loses the rest
//!   of the document.
//!
//! * [`CacheError`] — never fatal. A failed read is a miss, a failed write is
//!   a no-op; both are logged.
//!
//! * [`ModelError`] — an interactive operation was rejected. The document is
//!   left exactly as it was.

use crate::model::ParagraphId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the paper2md library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Selected page numbers exceed the actual page count.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// A document-level adapter call (graph extraction) failed after retries.
    #[error("{stage} failed: {source}")]
    Adapter {
        stage: &'static str,
        #[source]
        source: AdapterError,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document snapshot could not be read or written.
    #[error("Document snapshot '{path}' unusable: {detail}")]
    SnapshotFailed { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH to the directory containing libpdfium,\n\
or install pdfium system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    /// An interactive operation was rejected by the document model.
    #[error(transparent)]
    Model(#[from] ModelError),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of one call to an OCR, structuring, translation or completion
/// backend.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum AdapterError {
    /// Transport failure, timeout or 5xx.
    #[error("network error: {detail}")]
    Network { detail: String },

    /// 401/403 or a missing key. Retrying does not help.
    #[error("authentication failed: {detail}")]
    Auth { detail: String },

    /// 429 from the backend.
    #[error("rate limited{}", .retry_after_secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimit { retry_after_secs: Option<u64> },

    /// The response did not have the required shape.
    #[error("malformed response: {detail}")]
    Schema { detail: String },
}

impl AdapterError {
    /// Whether another attempt might succeed.
    ///
    /// Schema errors are retried because LLM output varies between calls even
    /// at low temperature.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AdapterError::Auth { .. })
    }

    pub fn schema(detail: impl Into<String>) -> Self {
        AdapterError::Schema {
            detail: detail.into(),
        }
    }

    pub fn network(detail: impl Into<String>) -> Self {
        AdapterError::Network {
            detail: detail.into(),
        }
    }
}

/// A non-fatal error for a single page.
///
/// Stored inside [`crate::model::PageState::Failed`]; the page stays
/// re-triggerable and every other page is unaffected.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum PageError {
    /// Page rasterisation failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    Render { page: usize, detail: String },

    /// Adapter call failed after the retry budget was spent.
    #[error("Page {page}: {source} (after {attempts} attempts)")]
    Adapter {
        page: usize,
        attempts: u32,
        #[source]
        source: AdapterError,
    },

    /// The document model refused a structuring result.
    #[error("Page {page}: structuring result rejected: {detail}")]
    Rejected { page: usize, detail: String },
}

/// Cache read/write failure. Always downgraded by the caller.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache read failed for '{key}': {detail}")]
    Read { key: String, detail: String },

    #[error("cache write failed for '{key}': {detail}")]
    Write { key: String, detail: String },
}

/// An interactive operation on the document model was rejected.
///
/// Every variant is returned before any mutation happens.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("paragraph {0} does not exist")]
    UnknownParagraph(ParagraphId),

    #[error("paragraph {0} is hidden")]
    NotVisible(ParagraphId),

    #[error("anchor and target are the same paragraph ({0})")]
    SameParagraph(ParagraphId),

    #[error("invalid safe area: {0}")]
    InvalidSafeArea(String),

    #[error("page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    #[error("page {page}: illegal state transition {from} -> {to}")]
    InvalidTransition {
        page: usize,
        from: &'static str,
        to: &'static str,
    },

    #[error("merge needs at least two distinct paragraphs")]
    MergeNeedsTwo,

    #[error("cannot merge paragraphs from different pages ({0} and {1})")]
    MergeAcrossPages(usize, usize),

    #[error("paragraph {0} has fewer than two non-empty lines to split")]
    CannotSplit(ParagraphId),

    #[error("paragraph text must not be empty")]
    EmptyText,
}
