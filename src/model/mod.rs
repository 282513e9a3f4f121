//! In-memory document model.
//!
//! ```text
//! Document
//!  ├─ safe_area            (one rectangle for every page)
//!  ├─ pages[i]             (state machine + raw OCR + paragraph ids)
//!  └─ paragraphs arena     (id → Paragraph, carries order_index)
//! ```
//!
//! The model is plain data with synchronous, all-or-nothing operations. It is
//! not safe for concurrent mutation; [`crate::session::Session`] owns it behind
//! a single async mutex that both the pipeline and interactive edits go
//! through.

pub mod document;
pub mod geometry;
pub mod page;
pub mod paragraph;
pub mod reconcile;

pub use document::{Document, SourceId};
pub use geometry::{Rect, SafeArea};
pub use page::{OcrOutput, OcrRegion, Page, PageState, PipelineStage};
pub use paragraph::{BlockKind, Continuation, Paragraph, ParagraphDraft, ParagraphId, Translation};
