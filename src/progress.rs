//! Observer trait for per-page pipeline events.
//!
//! Inject an [`Arc<dyn PipelineObserver>`] via
//! [`crate::config::PipelineConfigBuilder::observer`] to receive events as
//! the coordinator moves pages through their states.
//!
//! # Why an observer instead of channels?
//!
//! A host can forward events to a broadcast channel, a WebSocket or a
//! terminal progress bar without the library knowing how the host talks to
//! its users. Pages are processed concurrently, so every method may be
//! called from several tasks at once.
//!
//! # Example
//!
//! ```rust
//! use paper2md::{PipelineConfig, PipelineObserver};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl PipelineObserver for Counter {
//!     fn on_page_complete(&self, page: usize, total: usize, paragraphs: usize) {
//!         let done = self.0.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{done}/{total}: page {} → {paragraphs} paragraphs", page + 1);
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .observer(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::model::PageState;

/// Called by the coordinator while it processes pages.
///
/// All methods default to no-ops so callers only override what they need.
/// Page indices are 0-based.
pub trait PipelineObserver: Send + Sync {
    /// Called once before any page of a run starts.
    fn on_run_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called on every page state transition.
    fn on_page_state(&self, page: usize, state: &PageState) {
        let _ = (page, state);
    }

    /// Called when a page reaches `StructureDone`.
    fn on_page_complete(&self, page: usize, total_pages: usize, paragraphs: usize) {
        let _ = (page, total_pages, paragraphs);
    }

    /// Called when a page ends the run `Failed`.
    fn on_page_error(&self, page: usize, total_pages: usize, error: &str) {
        let _ = (page, total_pages, error);
    }

    /// Called once after every page of the run has settled.
    fn on_run_complete(&self, total_pages: usize, succeeded: usize) {
        let _ = (total_pages, succeeded);
    }
}

/// Default when no observer is configured.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}
