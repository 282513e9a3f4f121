//! LLM structuring: OCR regions in, paragraph drafts out.
//!
//! The response must be a JSON list of paragraph records (optionally wrapped
//! as `{"paragraphs": [...]}`) and every record must carry `text` and an
//! integer `order_hint`. Anything else is an [`AdapterError::Schema`]; a
//! partially valid list is rejected as a whole rather than silently
//! truncated.

use super::{Completion, CompletionRequest, StructureRequest, Structurer};
use crate::error::AdapterError;
use crate::model::{OcrRegion, ParagraphDraft, Rect};
use crate::prompts::render_template;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

pub struct LlmStructurer {
    completion: Arc<dyn Completion>,
    prompt: String,
    max_tokens: Option<usize>,
}

impl LlmStructurer {
    pub fn new(completion: Arc<dyn Completion>, prompt: impl Into<String>) -> Self {
        Self {
            completion,
            prompt: prompt.into(),
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[async_trait]
impl Structurer for LlmStructurer {
    async fn structure(
        &self,
        request: &StructureRequest<'_>,
    ) -> Result<Vec<ParagraphDraft>, AdapterError> {
        if request.regions.iter().all(|r| r.text.trim().is_empty()) {
            debug!("Page {}: nothing inside the safe area", request.page_index + 1);
            return Ok(Vec::new());
        }

        let blocks = format_blocks(request.regions);
        let area = request.safe_area.to_string();
        let system = render_template(
            &self.prompt,
            &[("safe_area", area.as_str()), ("blocks", blocks.as_str())],
        );
        // A custom prompt may embed the blocks itself.
        let user = if self.prompt.contains("{blocks}") {
            "Return the JSON list now."
        } else {
            blocks.as_str()
        };
        let response = self
            .completion
            .complete(&CompletionRequest {
                system: &system,
                user,
                max_tokens: self.max_tokens,
            })
            .await?;
        parse_structure_response(&response, request.regions)
    }
}

/// Numbered listing of the regions sent to the model.
pub fn format_blocks(regions: &[OcrRegion]) -> String {
    let mut out = String::new();
    for (i, r) in regions.iter().enumerate() {
        let _ = writeln!(out, "[{}] {}\n{}\n", i, r.bbox, r.text.trim());
    }
    out
}

/// Validate and convert a structuring response.
pub fn parse_structure_response(
    text: &str,
    regions: &[OcrRegion],
) -> Result<Vec<ParagraphDraft>, AdapterError> {
    let value = extract_json(text)?;
    let items = match &value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("paragraphs") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(AdapterError::schema(
                    "expected a list of paragraphs or an object with a `paragraphs` list",
                ))
            }
        },
        _ => return Err(AdapterError::schema("expected a JSON list of paragraphs")),
    };

    let mut drafts = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let obj = item
            .as_object()
            .ok_or_else(|| AdapterError::schema(format!("item {i} is not an object")))?;

        let text = obj
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::schema(format!("item {i}: missing `text`")))?;

        let order_hint = obj
            .get("order_hint")
            .and_then(as_integer)
            .ok_or_else(|| AdapterError::schema(format!("item {i}: missing `order_hint`")))?;

        if text.trim().is_empty() {
            continue;
        }

        let type_hint = obj
            .get("type_hint")
            .or_else(|| obj.get("type"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let bbox = obj
            .get("bbox")
            .and_then(as_rect)
            .or_else(|| obj.get("blocks").and_then(|b| union_of_blocks(b, regions)));

        drafts.push(ParagraphDraft {
            text: text.trim().to_string(),
            type_hint,
            order_hint,
            bbox,
        });
    }
    Ok(drafts)
}

fn extract_json(text: &str) -> Result<Value, AdapterError> {
    let body = super::strip_code_fence(text);
    if let Ok(v) = serde_json::from_str(body) {
        return Ok(v);
    }
    // Models like to wrap JSON in prose; fall back to the outermost bracket pair.
    let start = body.find(['[', '{']);
    let slice = start.and_then(|s| {
        let close = if body[s..].starts_with('[') { ']' } else { '}' };
        body.rfind(close).filter(|&e| e > s).map(|e| &body[s..=e])
    });
    slice
        .and_then(|s| serde_json::from_str(s).ok())
        .ok_or_else(|| {
            let preview: String = body.chars().take(80).collect();
            AdapterError::schema(format!("response is not JSON: {preview:?}"))
        })
}

fn as_integer(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| {
        v.as_f64()
            .filter(|f| f.fract() == 0.0 && f.is_finite())
            .map(|f| f as i64)
    })
}

fn as_rect(v: &Value) -> Option<Rect> {
    let coords: Vec<f32> = v
        .as_array()?
        .iter()
        .filter_map(|c| c.as_f64().map(|f| f as f32))
        .collect();
    let [x1, y1, x2, y2] = coords[..] else {
        return None;
    };
    let scale = if coords.iter().any(|c| *c > 1.0) {
        1000.0
    } else {
        1.0
    };
    Some(Rect::new(x1 / scale, y1 / scale, x2 / scale, y2 / scale).clamped())
}

fn union_of_blocks(v: &Value, regions: &[OcrRegion]) -> Option<Rect> {
    v.as_array()?
        .iter()
        .filter_map(|i| i.as_u64())
        .filter_map(|i| regions.get(i as usize))
        .map(|r| r.bbox)
        .reduce(|a, b| a.union(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regions() -> Vec<OcrRegion> {
        vec![
            OcrRegion {
                text: "Intro".into(),
                bbox: Rect::new(0.2, 0.1, 0.8, 0.15),
            },
            OcrRegion {
                text: "Body".into(),
                bbox: Rect::new(0.2, 0.2, 0.8, 0.6),
            },
        ]
    }

    #[test]
    fn accepts_list_and_wrapped_forms() {
        let list = r#"[{"text": "Intro", "type_hint": "h2", "order_hint": 0, "blocks": [0]}]"#;
        let wrapped = r#"{"paragraphs": [{"text": "Intro", "type_hint": "h2", "order_hint": 0, "blocks": [0]}]}"#;
        let a = parse_structure_response(list, &regions()).unwrap();
        let b = parse_structure_response(wrapped, &regions()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].bbox, Some(Rect::new(0.2, 0.1, 0.8, 0.15)));
        assert_eq!(a[0].type_hint.as_deref(), Some("h2"));
    }

    #[test]
    fn missing_text_is_schema_error() {
        let err =
            parse_structure_response(r#"[{"order_hint": 0, "type_hint": "paragraph"}]"#, &[])
                .unwrap_err();
        assert_eq!(err, AdapterError::schema("item 0: missing `text`"));
    }

    #[test]
    fn missing_order_hint_is_schema_error() {
        let err = parse_structure_response(r#"[{"text": "x"}]"#, &[]).unwrap_err();
        assert!(matches!(err, AdapterError::Schema { .. }));
    }

    #[test]
    fn fenced_and_prose_wrapped_json_is_found() {
        let fenced = "```json\n[{\"text\": \"a\", \"order_hint\": 1.0}]\n```";
        assert_eq!(parse_structure_response(fenced, &[]).unwrap()[0].order_hint, 1);
        let prose = "Here you go:\n[{\"text\": \"a\", \"order_hint\": 2}]\nThanks!";
        assert_eq!(parse_structure_response(prose, &[]).unwrap()[0].order_hint, 2);
    }

    #[test]
    fn empty_list_is_valid_and_garbage_is_not() {
        assert!(parse_structure_response("[]", &[]).unwrap().is_empty());
        assert!(parse_structure_response("I cannot help with that.", &[]).is_err());
        assert!(parse_structure_response("42", &[]).is_err());
    }

    #[test]
    fn explicit_bbox_on_thousand_grid() {
        let r = r#"[{"text": "a", "order_hint": 0, "bbox": [100, 200, 500, 400]}]"#;
        let drafts = parse_structure_response(r, &[]).unwrap();
        assert_eq!(drafts[0].bbox, Some(Rect::new(0.1, 0.2, 0.5, 0.4)));
    }
}
