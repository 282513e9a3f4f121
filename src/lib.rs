//! # paper2md
//!
//! Turn research PDFs into an editable paragraph model, structured Markdown
//! and a knowledge graph.
//!
//! ## Why a paragraph model?
//!
//! One-shot PDF-to-Markdown conversion gives you whatever the model produced,
//! running headers, footnotes and broken reading order included. This crate
//! instead keeps an explicit model of every paragraph on every page. You can
//! mark paragraphs as body or not, hide them, reorder them across pages,
//! merge and split them, and only then export. Expensive OCR and LLM calls
//! are cached per page and stage, so edits and re-runs cost nothing until
//! their inputs change.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF (path or arXiv / Hugging Face URL)
//!  │
//!  ├─ 1. Input      resolve local file or download into the cache dir
//!  ├─ 2. Render     rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 3. OCR        vision LLM → text regions            [cache: raw_ocr]
//!  ├─ 4. Structure  regions inside the safe area → paragraphs
//!  │                                                      [cache: structured]
//!  ├─ 5. Edit       toggle body / hide / reorder / merge / split / translate
//!  ├─ 6. Export     visible body paragraphs → Markdown
//!  └─ 7. Graph      Markdown → entities + relations (JSON)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use paper2md::{PipelineConfig, Session, ExportOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / EDGEQUAKE_LLM_PROVIDER / …
//!     let config = PipelineConfig::builder().build()?;
//!     let session = Session::open("https://arxiv.org/abs/1706.03762", config).await?;
//!
//!     let report = session.process().await?;
//!     eprintln!("{} pages structured", report.succeeded());
//!
//!     let path = session.write_markdown(&ExportOptions::default()).await?;
//!     println!("{}", path.display());
//!     session.save_snapshot().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `paper2md` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod adapters;
pub mod cache;
pub mod config;
pub mod error;
pub mod export;
pub mod graph;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use adapters::{Completion, OcrEngine, Structurer, Translator};
pub use cache::{CacheStage, CacheStore, Fingerprint, FsCacheStore, MemoryCacheStore};
pub use config::{
    GraphOptions, PageSelection, PipelineConfig, PipelineConfigBuilder, TranslationBackend,
    TranslationConfig,
};
pub use error::{AdapterError, CacheError, ModelError, PageError, PipelineError};
pub use export::{ExportOptions, PageSeparator};
pub use graph::{EmptyReason, GraphExtraction, KnowledgeGraph};
pub use model::{
    BlockKind, Continuation, Document, PageState, Paragraph, ParagraphId, Rect, SafeArea, SourceId,
};
pub use pipeline::{PageOutcome, RunReport};
pub use progress::PipelineObserver;
pub use session::{Backends, Session, TranslationReport, TranslationScope};
