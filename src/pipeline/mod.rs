//! Pipeline stages for turning PDF pages into paragraphs.
//!
//! Each submodule implements one step. Keeping them separate makes each
//! independently testable and lets the coordinator run against mock
//! renderers and adapters.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ OCR ──▶ structure ──▶ Document
//! (URL/path)  (pdfium)   (PNG)   (adapters, retried, cached)
//! ```
//!
//! 1. [`input`]  — canonicalise the user-supplied path or URL to a local file
//! 2. [`render`] — rasterise one page; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`encode`] — PNG-encode the bitmap; the bytes double as the OCR
//!    cache fingerprint input
//! 4. [`retry`]  — bounded exponential backoff around adapter calls
//! 5. [`coordinator`] — the per-page state machine tying it all together

pub mod coordinator;
pub mod encode;
pub mod input;
pub mod render;
pub mod retry;

pub use coordinator::{Coordinator, PageOutcome, RunReport};
pub use render::{PageRenderer, PdfiumRenderer};
pub use retry::RetryPolicy;
