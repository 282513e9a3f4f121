//! Prompt templates for OCR, structuring, translation and graph extraction.
//!
//! Every prompt can be overridden by dropping a file into the prompt
//! directory ([`PromptSet::load`]). Templates are opaque text with `{name}`
//! placeholders filled by [`render_template`]; nothing else in the crate
//! depends on their wording.
//!
//! | File                          | Placeholders                     |
//! |-------------------------------|----------------------------------|
//! | `ocr.txt`                     | –                                |
//! | `structure.txt`               | `{safe_area}`, `{blocks}`        |
//! | `translate.txt`               | `{target_language}`              |
//! | `extract_knowledge_graph.txt` | `{markdown_content}`             |

use std::path::Path;
use tracing::{debug, warn};

/// Default OCR prompt: transcribe the page as region-annotated lines.
pub const DEFAULT_OCR_PROMPT: &str = r#"You are a precise OCR engine for scanned and digital research papers.

Transcribe ALL text visible on the page image, block by block, in reading order.
A block is a paragraph, heading, list item, caption, equation, running header,
footer or page number.

Output one block per line in exactly this form:

[x1, y1, x2, y2] block text

where x1,y1 is the top-left and x2,y2 the bottom-right corner of the block on a
0-1000 grid (0,0 = top-left of the page, 1000,1000 = bottom-right).

Rules:
- Keep the original language; do not translate or summarise.
- Join hyphenated line breaks inside a block; keep the block on one line.
- Write formulas in LaTeX.
- Output nothing but the block lines. No commentary, no code fences."#;

/// Default structuring prompt. `{safe_area}` is the normalised rectangle the
/// blocks were filtered with.
pub const DEFAULT_STRUCTURE_PROMPT: &str = r#"You turn OCR blocks from one page of a research paper into a clean list of paragraphs.

The user message lists the blocks as `[index] (x1, y1, x2, y2)` followed by the
block text. Coordinates are fractions of the page size; only blocks overlapping
the content area {safe_area} are included.

Return a JSON list. Each element MUST have:
  "text":       the full paragraph text (merge blocks that belong together,
                fix broken hyphenation, keep the original language)
  "order_hint": integer reading position on this page, starting at 0
and SHOULD have:
  "type_hint":  one of title, h1, h2, h3, h4, paragraph, list_item, equation,
                caption, footnote, header, footer, page_number, reference
  "blocks":     the list of block indices the paragraph was built from

Output only the JSON list. No commentary, no code fences."#;

/// Default translation prompt.
pub const DEFAULT_TRANSLATE_PROMPT: &str =
    "You are a helpful translator. Translate the user's text to {target_language} without extra explanation.";

/// Default knowledge-graph prompt.
pub const DEFAULT_GRAPH_PROMPT: &str = r##"You are a knowledge extraction engine. Identify the core entities and the relationships between them in the Markdown document below and output them as strict JSON.

The JSON must have this shape:
{"nodes": [{"id": "unique_node_id", "label": "Entity name", "title": "Short description", "color": "#ff7f50"}],
 "edges": [{"source": "unique_node_id_1", "target": "unique_node_id_2", "label": "relationship"}]}

Rules:
1. `id` is a unique string, e.g. derived from the entity name.
2. `label` is the text shown on the node; `title` is the hover description.
3. `color` is optional and may distinguish entity types.
4. `source` and `target` must be ids from `nodes`.
5. Extract only the most important entities and relationships.
6. If the document has no recognisable entities, return {"nodes": [], "edges": []}.
7. Output only the JSON object. No commentary, no code fences.

Markdown document:
---
{markdown_content}
---"##;

/// Replace each `{key}` with its value. Unknown placeholders are left as-is,
/// so literal braces in a custom prompt (JSON examples) survive.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// The prompts in effect for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptSet {
    pub ocr: String,
    pub structure: String,
    pub translate: String,
    pub graph: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            ocr: DEFAULT_OCR_PROMPT.to_string(),
            structure: DEFAULT_STRUCTURE_PROMPT.to_string(),
            translate: DEFAULT_TRANSLATE_PROMPT.to_string(),
            graph: DEFAULT_GRAPH_PROMPT.to_string(),
        }
    }
}

impl PromptSet {
    /// Built-in defaults overridden by whichever prompt files exist in `dir`.
    /// Unreadable or empty files fall back to the default with a warning.
    pub fn load(dir: Option<&Path>) -> Self {
        let mut set = Self::default();
        let Some(dir) = dir else {
            return set;
        };
        for (file, slot) in [
            ("ocr.txt", &mut set.ocr),
            ("structure.txt", &mut set.structure),
            ("translate.txt", &mut set.translate),
            ("extract_knowledge_graph.txt", &mut set.graph),
        ] {
            let path = dir.join(file);
            if !path.exists() {
                continue;
            }
            match std::fs::read_to_string(&path) {
                Ok(text) if !text.trim().is_empty() => {
                    debug!("Loaded prompt override {}", path.display());
                    *slot = text;
                }
                Ok(_) => warn!("Prompt file {} is empty; using default", path.display()),
                Err(e) => warn!(
                    "Failed to read prompt file {}: {}; using default",
                    path.display(),
                    e
                ),
            }
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_replaces_known_and_keeps_unknown() {
        let out = render_template(
            "to {target_language}: {\"id\": 1} {other}",
            &[("target_language", "Korean")],
        );
        assert_eq!(out, "to Korean: {\"id\": 1} {other}");
    }

    #[test]
    fn default_prompts_carry_their_placeholders() {
        assert!(DEFAULT_STRUCTURE_PROMPT.contains("{safe_area}"));
        assert!(DEFAULT_TRANSLATE_PROMPT.contains("{target_language}"));
        assert!(DEFAULT_GRAPH_PROMPT.contains("{markdown_content}"));
        assert!(DEFAULT_STRUCTURE_PROMPT.contains("order_hint"));
    }

    #[test]
    fn graph_prompt_keeps_hex_colors_and_trailing_document() {
        assert!(DEFAULT_GRAPH_PROMPT.contains(r##""color": "#ff7f50"}"##));
        assert!(DEFAULT_GRAPH_PROMPT.ends_with("{markdown_content}\n---"));
        let rendered = render_template(DEFAULT_GRAPH_PROMPT, &[("markdown_content", "# Intro")]);
        assert!(rendered.ends_with("# Intro\n---"));
        assert!(rendered.contains("\"edges\": []"));
    }

    #[test]
    fn load_overrides_only_present_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("extract_knowledge_graph.txt"),
            "custom {markdown_content}",
        )
        .unwrap();
        std::fs::write(dir.path().join("ocr.txt"), "   ").unwrap();

        let set = PromptSet::load(Some(dir.path()));
        assert_eq!(set.graph, "custom {markdown_content}");
        assert_eq!(set.ocr, DEFAULT_OCR_PROMPT);
        assert_eq!(set.structure, DEFAULT_STRUCTURE_PROMPT);
    }

    #[test]
    fn missing_dir_yields_defaults() {
        let set = PromptSet::load(Some(Path::new("/definitely/not/here")));
        assert_eq!(set, PromptSet::default());
    }
}
