//! Paragraph records and their block kinds.

use crate::cache::Fingerprint;
use crate::model::geometry::Rect;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Document-unique paragraph identifier. Never reused within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParagraphId(pub u64);

impl fmt::Display for ParagraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Block kind derived from the structuring type hint.
///
/// Export serialises the kind verbatim; it never re-classifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockKind {
    Title,
    Heading { level: u8 },
    Paragraph,
    ListItem,
    Equation,
    Caption,
    Footnote,
    PageHeader,
    PageFooter,
    PageNumber,
    Reference,
    Other,
}

impl BlockKind {
    /// Parse a free-form type hint. Unknown hints become [`BlockKind::Other`];
    /// a missing hint is plain body text.
    pub fn from_hint(hint: Option<&str>) -> Self {
        let Some(raw) = hint else {
            return BlockKind::Paragraph;
        };
        let h = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        if let Some(level) = heading_level(&h) {
            return BlockKind::Heading { level };
        }
        match h.as_str() {
            "" | "paragraph" | "body" | "text" | "body_text" | "abstract" => BlockKind::Paragraph,
            "title" | "document_title" => BlockKind::Title,
            "heading" | "section" | "section_header" | "section_title" => {
                BlockKind::Heading { level: 2 }
            }
            "subsection" | "subheading" => BlockKind::Heading { level: 3 },
            "list" | "list_item" | "bullet" => BlockKind::ListItem,
            "equation" | "formula" | "math" => BlockKind::Equation,
            "caption" | "figure_caption" | "table_caption" => BlockKind::Caption,
            "footnote" => BlockKind::Footnote,
            "header" | "page_header" | "running_header" => BlockKind::PageHeader,
            "footer" | "page_footer" => BlockKind::PageFooter,
            "page_number" => BlockKind::PageNumber,
            "reference" | "references" | "bibliography" | "citation" => BlockKind::Reference,
            _ => BlockKind::Other,
        }
    }

    /// Whether a freshly structured paragraph of this kind starts as body text.
    pub fn default_body(&self) -> bool {
        matches!(
            self,
            BlockKind::Title
                | BlockKind::Heading { .. }
                | BlockKind::Paragraph
                | BlockKind::ListItem
                | BlockKind::Equation
        )
    }
}

/// `h1`..`h6`, `heading_2`, `heading2`, `h_3`.
fn heading_level(hint: &str) -> Option<u8> {
    let digits = hint
        .strip_prefix("heading")
        .or_else(|| hint.strip_prefix('h'))?
        .trim_start_matches('_');
    let level: u8 = digits.parse().ok()?;
    (1..=6).contains(&level).then_some(level)
}

/// How a paragraph's text continues into the next exported paragraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Continuation {
    /// Glue with a single space (a sentence broken across columns or pages).
    Concat,
    /// Glue with a newline.
    Join,
}

impl Continuation {
    pub fn separator(&self) -> &'static str {
        match self {
            Continuation::Concat => " ",
            Continuation::Join => "\n",
        }
    }
}

/// A translation together with the fingerprint of the text it was made from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Translation {
    pub text: String,
    pub target_lang: String,
    pub source_fingerprint: Fingerprint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    pub id: ParagraphId,
    pub page_index: usize,
    pub text: String,
    pub translation: Option<Translation>,
    /// Companion-viewer region; never used for ordering.
    pub bbox: Rect,
    pub kind: BlockKind,
    /// Raw hint as returned by the structuring backend.
    pub type_hint: Option<String>,
    pub is_body: bool,
    /// Meaningful only while `visible`; parked otherwise.
    pub order_index: u64,
    pub visible: bool,
    pub continuation: Option<Continuation>,
}

impl Paragraph {
    /// Translated text, or `None` if there is none or it was made from
    /// different source text.
    pub fn translated_text(&self) -> Option<&str> {
        let t = self.translation.as_ref()?;
        (t.source_fingerprint == Fingerprint::of_text(&self.text)).then_some(t.text.as_str())
    }

    pub fn is_exportable(&self) -> bool {
        self.visible && self.is_body
    }
}

/// Structuring output for one paragraph, before it is placed in a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParagraphDraft {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<String>,
    pub order_hint: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Rect>,
}
