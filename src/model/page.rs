//! Pages and the per-page processing state machine.
//!
//! ```text
//!   Unparsed ──▶ OcrPending ──▶ OcrDone ──▶ StructurePending ──▶ StructureDone
//!                    │             ▲               │    │               │
//!                    ▼             │               ▼    └── superseded ─┤
//!                 Failed ◀─────────┼───────────── Failed                │
//!                    │             └──────── safe area changed ◀────────┘
//!                    └──▶ re-triggered (OcrPending / StructurePending)
//! ```
//!
//! Only pending states can fail. A forced refresh may restart from any
//! settled state.

use crate::error::{ModelError, PageError};
use crate::model::geometry::{Rect, SafeArea};
use crate::model::paragraph::ParagraphId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One recognised text region on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrRegion {
    pub text: String,
    pub bbox: Rect,
}

/// Raw OCR result for a page, top-to-bottom.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrOutput {
    pub regions: Vec<OcrRegion>,
}

impl OcrOutput {
    /// Regions overlapping the safe area, in their original order.
    pub fn within(&self, area: &SafeArea) -> Vec<OcrRegion> {
        self.regions
            .iter()
            .filter(|r| area.admits(&r.bbox))
            .cloned()
            .collect()
    }

    pub fn is_blank(&self) -> bool {
        self.regions.iter().all(|r| r.text.trim().is_empty())
    }
}

/// Which pipeline stage a page failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Render,
    Ocr,
    Structure,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineStage::Render => "render",
            PipelineStage::Ocr => "ocr",
            PipelineStage::Structure => "structure",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PageState {
    Unparsed,
    OcrPending,
    OcrDone,
    StructurePending,
    StructureDone,
    Failed {
        stage: PipelineStage,
        error: PageError,
    },
}

impl PageState {
    pub fn name(&self) -> &'static str {
        match self {
            PageState::Unparsed => "Unparsed",
            PageState::OcrPending => "OcrPending",
            PageState::OcrDone => "OcrDone",
            PageState::StructurePending => "StructurePending",
            PageState::StructureDone => "StructureDone",
            PageState::Failed { .. } => "Failed",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, PageState::OcrPending | PageState::StructurePending)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PageState::Failed { .. })
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: &PageState) -> bool {
        use PageState::*;
        match (self, next) {
            // Fresh start, retry after failure, or forced refresh.
            (Unparsed | Failed { .. } | OcrDone | StructureDone, OcrPending) => true,
            (OcrPending, OcrDone) => true,
            (OcrDone | Failed { .. } | StructureDone, StructurePending) => true,
            (StructurePending, StructureDone) => true,
            // Superseded structuring result, or safe-area change.
            (StructurePending | StructureDone, OcrDone) => true,
            (OcrPending | StructurePending, Failed { .. }) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageState::Failed { stage, error } => write!(f, "Failed({stage}: {error})"),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub index: usize,
    pub state: PageState,
    /// Paragraph ids in structuring order.
    pub paragraphs: Vec<ParagraphId>,
    /// Last OCR output kept in memory; lets a safe-area change re-structure
    /// without rendering again.
    pub raw_ocr: Option<OcrOutput>,
}

impl Page {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            state: PageState::Unparsed,
            paragraphs: Vec::new(),
            raw_ocr: None,
        }
    }

    pub(crate) fn transition(&mut self, next: PageState) -> Result<(), ModelError> {
        if !self.state.can_transition_to(&next) {
            return Err(ModelError::InvalidTransition {
                page: self.index,
                from: self.state.name(),
                to: next.name(),
            });
        }
        self.state = next;
        Ok(())
    }
}
