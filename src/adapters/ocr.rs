//! Vision-LLM OCR: page PNG in, text regions out.
//!
//! The prompt asks for region-annotated lines, `[x1, y1, x2, y2] text`, on a
//! 0–1000 grid. Models do not always comply, so plain text is accepted too:
//! it is split into blocks and each block gets a full-width horizontal band,
//! stacked top to bottom in reading order. Bands are coarse but keep running
//! headers and footers at the page edges where the safe area can drop them.

use super::{LlmClient, OcrEngine, OcrOptions, PageImage};
use crate::error::AdapterError;
use crate::model::{OcrOutput, OcrRegion, Rect};
use crate::pipeline::encode;
use async_trait::async_trait;
use edgequake_llm::ChatMessage;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct VisionOcr {
    client: LlmClient,
    prompt: String,
}

impl VisionOcr {
    pub fn new(client: LlmClient, prompt: impl Into<String>) -> Self {
        Self {
            client,
            prompt: prompt.into(),
        }
    }
}

#[async_trait]
impl OcrEngine for VisionOcr {
    async fn recognize(
        &self,
        image: &PageImage,
        options: &OcrOptions,
    ) -> Result<OcrOutput, AdapterError> {
        let messages = [
            ChatMessage::system(&self.prompt),
            ChatMessage::user_with_images("", vec![encode::to_image_data(&image.png)]),
        ];
        let text = self.client.chat(&messages, options.max_tokens).await?;
        let output = parse_ocr_response(&text);
        debug!(
            "Page {}: OCR returned {} regions",
            image.page_index + 1,
            output.regions.len()
        );
        Ok(output)
    }
}

static RE_REGION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*\[\s*(\d+(?:\.\d+)?)\s*,\s*(\d+(?:\.\d+)?)\s*,\s*(\d+(?:\.\d+)?)\s*,\s*(\d+(?:\.\d+)?)\s*\]\s*(.*)$",
    )
    .unwrap()
});

/// Turn an OCR response into regions. An empty response is a blank page.
pub fn parse_ocr_response(text: &str) -> OcrOutput {
    let text = super::strip_code_fence(text);
    if text.is_empty() {
        return OcrOutput::default();
    }

    let annotated: Vec<OcrRegion> = text.lines().filter_map(parse_region_line).collect();
    let non_empty_lines = text.lines().filter(|l| !l.trim().is_empty()).count();
    if !annotated.is_empty() && annotated.len() * 2 >= non_empty_lines {
        return OcrOutput { regions: annotated };
    }

    let blocks = split_blocks(text);
    let n = blocks.len().max(1) as f32;
    OcrOutput {
        regions: blocks
            .into_iter()
            .enumerate()
            .map(|(i, block)| OcrRegion {
                text: block,
                bbox: Rect::new(0.0, i as f32 / n, 1.0, (i + 1) as f32 / n),
            })
            .collect(),
    }
}

fn parse_region_line(line: &str) -> Option<OcrRegion> {
    let caps = RE_REGION.captures(line)?;
    let coord = |i: usize| -> Option<f32> { caps.get(i)?.as_str().parse::<f32>().ok() };
    let (x1, y1, x2, y2) = (coord(1)?, coord(2)?, coord(3)?, coord(4)?);
    let text = caps.get(5)?.as_str().trim();
    if text.is_empty() {
        return None;
    }
    // Accept either the 0–1000 grid the prompt asks for or fractions.
    let scale = if [x1, y1, x2, y2].iter().any(|v| *v > 1.0) {
        1000.0
    } else {
        1.0
    };
    Some(OcrRegion {
        text: text.to_string(),
        bbox: Rect::new(x1 / scale, y1 / scale, x2 / scale, y2 / scale).clamped(),
    })
}

/// Blank-line separated blocks when the text has any, otherwise one block per
/// line.
pub fn split_blocks(text: &str) -> Vec<String> {
    let normalised = text.replace("\r\n", "\n");
    let separator = if normalised.contains("\n\n") {
        "\n\n"
    } else {
        "\n"
    };
    normalised
        .split(separator)
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_annotated_lines_use_thousand_grid() {
        let out = parse_ocr_response(
            "[100, 20, 900, 50] Journal of Examples\n[150, 100, 850, 300] We study things.",
        );
        assert_eq!(out.regions.len(), 2);
        let r = &out.regions[1];
        assert_eq!(r.text, "We study things.");
        assert!((r.bbox.x1 - 0.15).abs() < 1e-6);
        assert!((r.bbox.y2 - 0.3).abs() < 1e-6);
    }

    #[test]
    fn plain_text_gets_stacked_bands() {
        let out = parse_ocr_response("Title\n\nFirst paragraph\nstill first\n\nSecond");
        assert_eq!(out.regions.len(), 3);
        assert_eq!(out.regions[1].text, "First paragraph\nstill first");
        assert!((out.regions[0].bbox.y1 - 0.0).abs() < 1e-6);
        assert!((out.regions[2].bbox.y2 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn single_newlines_split_when_no_blank_lines() {
        assert_eq!(split_blocks("a\nb\n c "), vec!["a", "b", "c"]);
    }

    #[test]
    fn empty_response_is_blank_page() {
        assert!(parse_ocr_response("   ").regions.is_empty());
        assert!(parse_ocr_response("```\n```").is_blank());
    }
}
