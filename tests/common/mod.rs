//! In-process mock adapters shared by the integration tests. No network, no
//! pdfium: pages are synthetic byte strings and every adapter counts its
//! calls.

#![allow(dead_code)]

use async_trait::async_trait;
use paper2md::adapters::{
    CompletionRequest, OcrOptions, PageImage, StructureRequest,
};
use paper2md::error::PageError;
use paper2md::model::{OcrOutput, OcrRegion, ParagraphDraft};
use paper2md::pipeline::PageRenderer;
use paper2md::{
    AdapterError, Backends, Completion, Document, MemoryCacheStore, OcrEngine, PipelineConfig,
    Rect, Session, SourceId, Structurer, Translator,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

// ── Renderer ─────────────────────────────────────────────────────────────────

pub struct MockRenderer {
    pages: usize,
    pub renders: AtomicUsize,
    pub fail_pages: Mutex<HashSet<usize>>,
}

impl MockRenderer {
    pub fn new(pages: usize) -> Self {
        Self {
            pages,
            renders: AtomicUsize::new(0),
            fail_pages: Mutex::new(HashSet::new()),
        }
    }
}

#[async_trait]
impl PageRenderer for MockRenderer {
    fn page_count(&self) -> usize {
        self.pages
    }

    async fn render_page(&self, page_index: usize) -> Result<PageImage, PageError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        if self.fail_pages.lock().unwrap().contains(&page_index) {
            return Err(PageError::Render {
                page: page_index,
                detail: "mock render failure".into(),
            });
        }
        Ok(PageImage {
            page_index,
            png: format!("page-image-{page_index}").into_bytes(),
            width: 850,
            height: 1100,
        })
    }
}

// ── OCR ──────────────────────────────────────────────────────────────────────

/// Four regions per page: a running header and a page number outside the
/// default safe area, a section heading and a body paragraph inside it.
pub fn page_regions(page: usize) -> Vec<OcrRegion> {
    let n = page + 1;
    vec![
        OcrRegion {
            text: format!("Journal of Tests, vol. {n}"),
            bbox: Rect::new(0.1, 0.02, 0.9, 0.06),
        },
        OcrRegion {
            text: format!("Section {n}"),
            bbox: Rect::new(0.2, 0.12, 0.8, 0.16),
        },
        OcrRegion {
            text: format!("Body text of page {n}."),
            bbox: Rect::new(0.2, 0.3, 0.8, 0.5),
        },
        OcrRegion {
            text: format!("{n}"),
            bbox: Rect::new(0.45, 0.95, 0.55, 0.98),
        },
    ]
}

#[derive(Default)]
pub struct MockOcr {
    pub calls: AtomicUsize,
}

#[async_trait]
impl OcrEngine for MockOcr {
    async fn recognize(
        &self,
        image: &PageImage,
        _options: &OcrOptions,
    ) -> Result<OcrOutput, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(OcrOutput {
            regions: page_regions(image.page_index),
        })
    }
}

// ── Structurer ───────────────────────────────────────────────────────────────

/// Holds the first structuring call until released.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
    armed: AtomicBool,
}

impl Gate {
    pub fn armed() -> Arc<Self> {
        let gate = Gate::default();
        gate.armed.store(true, Ordering::SeqCst);
        Arc::new(gate)
    }
}

#[derive(Default)]
pub struct MockStructurer {
    pub calls: AtomicUsize,
    /// Pages whose answer lacks the `text` field.
    pub fail_pages: Mutex<HashSet<usize>>,
    pub gate: Option<Arc<Gate>>,
}

fn hint_for(text: &str) -> &'static str {
    if text.starts_with("Journal") {
        "running_header"
    } else if text.starts_with("Section") {
        "h2"
    } else if text.chars().all(|c| c.is_ascii_digit()) {
        "page_number"
    } else {
        "paragraph"
    }
}

#[async_trait]
impl Structurer for MockStructurer {
    async fn structure(
        &self,
        request: &StructureRequest<'_>,
    ) -> Result<Vec<ParagraphDraft>, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            if gate.armed.swap(false, Ordering::SeqCst) {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
        }
        if self.fail_pages.lock().unwrap().contains(&request.page_index) {
            return Err(AdapterError::schema(
                "paragraph record 0 is missing required field `text`",
            ));
        }
        Ok(request
            .regions
            .iter()
            .enumerate()
            .map(|(i, r)| ParagraphDraft {
                text: r.text.clone(),
                type_hint: Some(hint_for(&r.text).to_string()),
                order_hint: i as i64,
                bbox: Some(r.bbox),
            })
            .collect())
    }
}

// ── Translator / completion ──────────────────────────────────────────────────

#[derive(Default)]
pub struct MockTranslator {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Translator for MockTranslator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn translate(
        &self,
        text: &str,
        _source_lang: &str,
        target_lang: &str,
    ) -> Result<String, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("[{target_lang}] {text}"))
    }
}

/// Answers every completion with the next scripted response (the last one
/// repeats).
pub struct MockCompletion {
    responses: Vec<Result<String, AdapterError>>,
    pub calls: AtomicUsize,
}

impl MockCompletion {
    pub fn answering(text: &str) -> Self {
        Self::scripted(vec![Ok(text.to_string())])
    }

    pub fn scripted(responses: Vec<Result<String, AdapterError>>) -> Self {
        Self {
            responses,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Completion for MockCompletion {
    async fn complete(&self, _request: &CompletionRequest<'_>) -> Result<String, AdapterError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let i = n.min(self.responses.len().saturating_sub(1));
        self.responses
            .get(i)
            .cloned()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

pub struct Harness {
    pub pages: usize,
    pub renderer: Arc<MockRenderer>,
    pub ocr: Arc<MockOcr>,
    pub structurer: Arc<MockStructurer>,
    pub translator: Arc<MockTranslator>,
    pub completion: Arc<MockCompletion>,
    pub cache: Arc<MemoryCacheStore>,
}

impl Harness {
    pub fn new(pages: usize) -> Self {
        Self::with_structurer(pages, MockStructurer::default())
    }

    pub fn with_structurer(pages: usize, structurer: MockStructurer) -> Self {
        Self {
            pages,
            renderer: Arc::new(MockRenderer::new(pages)),
            ocr: Arc::new(MockOcr::default()),
            structurer: Arc::new(structurer),
            translator: Arc::new(MockTranslator::default()),
            completion: Arc::new(MockCompletion::answering(r#"{"nodes": [], "edges": []}"#)),
            cache: Arc::new(MemoryCacheStore::new()),
        }
    }

    pub fn backends(&self) -> Backends {
        Backends {
            renderer: self.renderer.clone(),
            ocr: self.ocr.clone(),
            structurer: self.structurer.clone(),
            translator: self.translator.clone(),
            completion: self.completion.clone(),
            cache: self.cache.clone(),
        }
    }

    /// A fresh session (empty document) on the shared mocks and cache.
    pub fn session(&self, config: PipelineConfig) -> Session {
        let doc = Document::new(SourceId::new("paper"), "paper.pdf", self.pages)
            .with_safe_area(config.safe_area);
        Session::with_backends(doc, self.backends(), config)
    }

    pub fn ocr_calls(&self) -> usize {
        self.ocr.calls.load(Ordering::SeqCst)
    }

    pub fn structure_calls(&self) -> usize {
        self.structurer.calls.load(Ordering::SeqCst)
    }

    pub fn renders(&self) -> usize {
        self.renderer.renders.load(Ordering::SeqCst)
    }

    pub fn translations(&self) -> usize {
        self.translator.calls.load(Ordering::SeqCst)
    }
}

/// Fast retries, one retry per call.
pub fn test_config() -> PipelineConfig {
    PipelineConfig::builder()
        .max_retries(1)
        .retry_backoff_ms(1)
        .concurrency(3)
        .build()
        .unwrap()
}
