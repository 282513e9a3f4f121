//! Markdown export: visible body paragraphs, in reading order.
//!
//! ## Selection
//!
//! Exactly the paragraphs with `visible && is_body`, across all pages,
//! sorted by `order_index` (ties broken by id, which cannot happen in a
//! valid model but keeps the sort total).
//!
//! ## Blocks
//!
//! Consecutive exported paragraphs linked by a [`Continuation`] form one
//! block; the head of the chain decides how the block is rendered. Kinds
//! are serialised verbatim from the structuring hint, never re-classified:
//!
//! | Kind              | Markdown            |
//! |-------------------|---------------------|
//! | `Title`           | `# text`            |
//! | `Heading{level}`  | `#`×level `text`    |
//! | `ListItem`        | `- text`            |
//! | `Equation`        | `$$` fenced         |
//! | `Caption`         | `*text*`            |
//! | anything else     | plain paragraph     |
//!
//! The output is a pure function of the model state and the options, so two
//! exports of an unchanged document are byte-identical.
//!
//! [`Continuation`]: crate::model::Continuation

use crate::export::postprocess::clean_markdown;
use crate::model::{BlockKind, Document, Paragraph};
use serde::{Deserialize, Serialize};

/// What to insert where consecutive blocks come from different pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSeparator {
    /// Blocks joined with a blank line only. (default)
    #[default]
    None,
    /// Horizontal rule: "\n\n---\n\n"
    HorizontalRule,
    /// HTML comment with the new page number: "<!-- page N -->"
    Comment,
    /// Custom line inserted at page boundaries.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator placed before a block from `page_num` (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::None => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportOptions {
    /// Emit translated text where a current translation exists.
    pub use_translation: bool,
    pub separator: PageSeparator,
    /// Prepend YAML front-matter naming the source document.
    pub include_metadata: bool,
}

/// One rendered unit: a continuation chain of one or more paragraphs.
struct Block<'a> {
    head: &'a Paragraph,
    first_page: usize,
    last_page: usize,
    text: String,
}

/// Export with default options.
pub fn export(doc: &Document) -> String {
    export_with(doc, &ExportOptions::default())
}

pub fn export_with(doc: &Document, options: &ExportOptions) -> String {
    let blocks = build_blocks(&doc.export_order(), options.use_translation);

    let mut out = String::new();
    if options.include_metadata {
        out.push_str(&front_matter(doc));
    }
    let mut prev_page: Option<usize> = None;
    for block in &blocks {
        if let Some(prev) = prev_page {
            if prev != block.first_page {
                out.push_str(&options.separator.render(block.first_page + 1));
            } else {
                out.push_str("\n\n");
            }
        }
        out.push_str(&render_block(block.head.kind, &block.text));
        prev_page = Some(block.last_page);
    }
    clean_markdown(&out)
}

fn build_blocks<'a>(selected: &[&'a Paragraph], use_translation: bool) -> Vec<Block<'a>> {
    let text_of = |p: &Paragraph| -> String {
        let raw = if use_translation {
            p.translated_text().unwrap_or(&p.text)
        } else {
            &p.text
        };
        raw.trim().to_string()
    };

    let mut blocks: Vec<Block<'a>> = Vec::new();
    let mut glue: Option<&'static str> = None;
    for p in selected {
        match (glue, blocks.last_mut()) {
            (Some(sep), Some(block)) => {
                block.text.push_str(sep);
                block.text.push_str(&text_of(p));
                block.last_page = p.page_index;
            }
            _ => blocks.push(Block {
                head: p,
                first_page: p.page_index,
                last_page: p.page_index,
                text: text_of(p),
            }),
        }
        glue = p.continuation.map(|c| c.separator());
    }
    blocks
}

fn render_block(kind: BlockKind, text: &str) -> String {
    match kind {
        BlockKind::Title => format!("# {}", single_line(text)),
        BlockKind::Heading { level } => {
            let level = level.clamp(1, 6) as usize;
            format!("{} {}", "#".repeat(level), single_line(text))
        }
        BlockKind::ListItem => {
            if has_list_marker(text) {
                text.to_string()
            } else {
                format!("- {}", text)
            }
        }
        BlockKind::Equation => {
            let body = text.trim_start_matches("$$").trim_end_matches("$$").trim();
            format!("$$\n{}\n$$", body)
        }
        BlockKind::Caption => format!("*{}*", single_line(text)),
        _ => text.to_string(),
    }
}

/// Headings and captions must stay on one line.
fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn has_list_marker(text: &str) -> bool {
    let t = text.trim_start();
    if t.starts_with("- ") || t.starts_with("* ") || t.starts_with("• ") {
        return true;
    }
    let digits = t.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && (t[digits..].starts_with(". ") || t[digits..].starts_with(") "))
}

fn front_matter(doc: &Document) -> String {
    format!(
        "---\ntitle: {:?}\nsource_id: {}\npages: {}\n---\n\n",
        doc.stem(),
        doc.source_id(),
        doc.page_count()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Fingerprint;
    use crate::model::{Continuation, ParagraphDraft, SourceId, Translation};

    fn draft(text: &str, hint: &str, order: i64) -> ParagraphDraft {
        ParagraphDraft {
            text: text.into(),
            type_hint: Some(hint.into()),
            order_hint: order,
            bbox: None,
        }
    }

    fn doc() -> Document {
        let mut d = Document::new(SourceId::new("paper"), "paper.pdf", 2);
        d.populate_page(
            0,
            vec![
                draft("Attention Is All You Need", "title", 0),
                draft("arXiv:1706.03762", "header", 1),
                draft("Introduction", "h2", 2),
                draft("Recurrent models dominate", "paragraph", 3),
            ],
        )
        .unwrap();
        d.populate_page(
            1,
            vec![
                draft("sequence modelling.", "paragraph", 0),
                draft("x = y + z", "equation", 1),
            ],
        )
        .unwrap();
        d
    }

    fn id_of(d: &Document, text: &str) -> crate::model::ParagraphId {
        d.paragraphs().find(|p| p.text == text).unwrap().id
    }

    #[test]
    fn renders_kinds_and_skips_non_body() {
        let md = export(&doc());
        assert_eq!(
            md,
            "# Attention Is All You Need\n\n## Introduction\n\nRecurrent models dominate\n\n\
             sequence modelling.\n\n$$\nx = y + z\n$$\n"
        );
    }

    #[test]
    fn export_is_deterministic() {
        let d = doc();
        assert_eq!(export(&d), export(&d));
    }

    #[test]
    fn continuation_glues_across_pages() {
        let mut d = doc();
        let head = id_of(&d, "Recurrent models dominate");
        d.set_continuation(head, Some(Continuation::Concat)).unwrap();
        let md = export(&d);
        assert!(md.contains("Recurrent models dominate sequence modelling.\n"));
    }

    #[test]
    fn page_separator_marks_boundaries() {
        let md = export_with(
            &doc(),
            &ExportOptions {
                separator: PageSeparator::Comment,
                ..Default::default()
            },
        );
        assert!(md.contains("Recurrent models dominate\n\n<!-- page 2 -->\n\nsequence modelling."));
        assert_eq!(md.matches("<!-- page").count(), 1);
    }

    #[test]
    fn translation_used_only_when_current() {
        let mut d = doc();
        let id = id_of(&d, "Introduction");
        assert!(d.apply_translation(
            id,
            Translation {
                text: "소개".into(),
                target_lang: "KO".into(),
                source_fingerprint: Fingerprint::of_text("Introduction"),
            },
        ));
        let opts = ExportOptions {
            use_translation: true,
            ..Default::default()
        };
        assert!(export_with(&d, &opts).contains("## 소개\n"));

        d.set_text(id, "Background").unwrap();
        assert!(export_with(&d, &opts).contains("## Background\n"));
    }

    #[test]
    fn list_markers_are_not_doubled() {
        assert_eq!(render_block(BlockKind::ListItem, "- a"), "- a");
        assert_eq!(render_block(BlockKind::ListItem, "2. b"), "2. b");
        assert_eq!(render_block(BlockKind::ListItem, "c"), "- c");
    }

    #[test]
    fn front_matter_is_optional() {
        let md = export_with(
            &doc(),
            &ExportOptions {
                include_metadata: true,
                ..Default::default()
            },
        );
        assert!(md.starts_with("---\ntitle: \"paper\"\nsource_id: paper\npages: 2\n---\n\n# Attention"));
    }
}
