//! Session: one open document and everything that acts on it.
//!
//! A [`Session`] owns the [`Document`] behind a single `tokio` mutex. Both
//! the pipeline ([`Coordinator`]) and the interactive operations go through
//! that mutex, so edits issued while pages are in flight are applied between
//! page completions and never race them.
//!
//! ## Lifecycle
//!
//! ```text
//! Session::open(input, config)
//!  │
//!  ├─ resolve input (path or URL), fingerprint the bytes → SourceId
//!  ├─ open the PDF with pdfium, build LLM adapters and the file cache
//!  ├─ restore <cache_dir>/<source_id>/document.json unless force_refresh
//!  │
//!  ├─ process() / process_pages() / refresh_all()
//!  ├─ toggle_body / reorder / set_visibility / set_safe_area / merge / …
//!  ├─ translate(scope)
//!  ├─ write_markdown() / extract_graph() / write_graph()
//!  └─ save_snapshot()
//! ```
//!
//! Opening a new session drops the previous document's in-memory state; the
//! cache on disk is shared and survives.

use crate::adapters::{
    Completion, DeepLTranslator, LlmClient, LlmStructurer, LlmTranslator, OcrEngine, Structurer,
    Translator, VisionOcr,
};
use crate::cache::{CacheKey, CacheStage, CacheStore, FsCacheStore, Fingerprint, StageOutput};
use crate::config::{PipelineConfig, TranslationBackend};
use crate::error::{AdapterError, ModelError, PipelineError};
use crate::export::{self, ExportOptions};
use crate::graph::{GraphExtraction, GraphExtractor, KnowledgeGraph};
use crate::model::{Continuation, Document, ParagraphId, Rect, SourceId, Translation};
use crate::pipeline::input::resolve_input;
use crate::pipeline::retry::{with_retry, RetryPolicy};
use crate::pipeline::{Coordinator, PageRenderer, PdfiumRenderer, RunReport};
use crate::prompts::PromptSet;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const SNAPSHOT_FILE: &str = "document.json";

/// The adapters and store a session runs on.
///
/// [`Session::open`] builds the production set; tests pass in-process mocks
/// through [`Session::with_backends`].
pub struct Backends {
    pub renderer: Arc<dyn PageRenderer>,
    pub ocr: Arc<dyn OcrEngine>,
    pub structurer: Arc<dyn Structurer>,
    pub translator: Arc<dyn Translator>,
    /// Raw completion endpoint used for knowledge-graph extraction.
    pub completion: Arc<dyn Completion>,
    pub cache: Arc<dyn CacheStore>,
}

/// Which paragraphs [`Session::translate`] covers. Only visible body
/// paragraphs are ever translated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationScope {
    All,
    Page(usize),
    Paragraphs(Vec<ParagraphId>),
}

#[derive(Debug, Default)]
pub struct TranslationReport {
    /// Translations attached to the document, cached or fresh.
    pub translated: usize,
    pub from_cache: usize,
    /// Paragraphs whose text changed while their translation was in flight.
    pub discarded: usize,
    pub failed: Vec<(ParagraphId, AdapterError)>,
}

/// One open document.
#[derive(Clone)]
pub struct Session {
    doc: Arc<Mutex<Document>>,
    coordinator: Arc<Coordinator>,
    translator: Arc<dyn Translator>,
    graph: Arc<GraphExtractor>,
    config: Arc<PipelineConfig>,
    source_id: SourceId,
}

impl Session {
    /// Open `input` (local path or URL) with the production adapters.
    pub async fn open(input: &str, config: PipelineConfig) -> Result<Self, PipelineError> {
        info!("Opening {}", input);
        let resolved =
            resolve_input(input, &config.cache_dir, config.download_timeout_secs).await?;
        let path = resolved.path().to_path_buf();
        let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => PipelineError::PermissionDenied {
                path: path.clone(),
            },
            _ => PipelineError::Internal(format!("reading {}: {}", path.display(), e)),
        })?;
        let source_id = SourceId::from_pdf(&path, &bytes);
        drop(bytes);

        let renderer = PdfiumRenderer::open(&path, &config).await?;
        let page_count = renderer.page_count();
        info!("{} has {} pages (source id {})", path.display(), page_count, source_id);

        let prompts = PromptSet::load(config.prompt_dir.as_deref());
        let client = LlmClient::from_config(&config)?;
        let completion: Arc<dyn Completion> = Arc::new(client.clone());
        let translator: Arc<dyn Translator> = match &config.translation.backend {
            TranslationBackend::Llm => Arc::new(LlmTranslator::new(
                Arc::clone(&completion),
                prompts.translate.clone(),
            )),
            TranslationBackend::DeepL { api_key, host } => Arc::new(
                DeepLTranslator::new(
                    api_key.as_str(),
                    host.as_str(),
                    Duration::from_secs(config.api_timeout_secs),
                )
                .map_err(|source| PipelineError::Adapter {
                    stage: "translation",
                    source,
                })?,
            ),
        };
        let backends = Backends {
            renderer: Arc::new(renderer),
            ocr: Arc::new(VisionOcr::new(client, prompts.ocr.clone())),
            structurer: Arc::new(
                LlmStructurer::new(Arc::clone(&completion), prompts.structure.clone())
                    .with_max_tokens(config.max_tokens),
            ),
            translator,
            completion,
            cache: Arc::new(FsCacheStore::new(&config.cache_dir)),
        };

        let snapshot = snapshot_path(&config.cache_dir, &source_id);
        let restored = if config.force_refresh {
            None
        } else {
            load_snapshot(&snapshot, &source_id, page_count)
        };
        let document = match restored {
            Some(doc) => {
                info!("Restored document state from {}", snapshot.display());
                doc
            }
            None => Document::new(source_id, &path, page_count).with_safe_area(config.safe_area),
        };

        Ok(Self::with_backends(document, backends, config))
    }

    /// Build a session around an existing document and explicit backends.
    pub fn with_backends(document: Document, backends: Backends, config: PipelineConfig) -> Self {
        let prompts = PromptSet::load(config.prompt_dir.as_deref());
        let coordinator = Coordinator::new(
            backends.renderer,
            backends.ocr,
            backends.structurer,
            backends.cache,
        )
        .configured(&config);
        let graph = GraphExtractor::new(backends.completion)
            .with_prompt(prompts.graph)
            .with_options(config.graph)
            .with_retry(RetryPolicy::from_config(&config));

        Self {
            source_id: document.source_id().clone(),
            doc: Arc::new(Mutex::new(document)),
            coordinator: Arc::new(coordinator),
            translator: backends.translator,
            graph: Arc::new(graph),
            config: Arc::new(config),
        }
    }

    pub fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn page_count(&self) -> usize {
        self.coordinator.page_count()
    }

    /// A copy of the current document state.
    pub async fn document(&self) -> Document {
        self.doc.lock().await.clone()
    }

    // ── Pipeline ─────────────────────────────────────────────────────────

    /// Process the configured page selection, honouring `force_refresh`.
    pub async fn process(&self) -> Result<RunReport, PipelineError> {
        let total = self.page_count();
        let pages = self.config.pages.to_indices(total);
        if pages.is_empty() {
            return Err(PipelineError::PageOutOfRange { page: 0, total });
        }
        self.process_pages(&pages, self.config.force_refresh).await
    }

    /// Process explicit 0-based page indices.
    pub async fn process_pages(
        &self,
        pages: &[usize],
        force: bool,
    ) -> Result<RunReport, PipelineError> {
        let total = self.page_count();
        if let Some(&bad) = pages.iter().find(|&&p| p >= total) {
            return Err(PipelineError::PageOutOfRange {
                page: bad + 1,
                total,
            });
        }
        Ok(self.coordinator.process_pages(&self.doc, pages, force).await)
    }

    /// Drop every cache entry of this document and reprocess all pages
    /// without cache lookups.
    pub async fn refresh_all(&self) -> Result<RunReport, PipelineError> {
        match self.coordinator.cache().invalidate(&self.source_id, None, None) {
            Ok(n) => info!("Cleared {} cache entries for {}", n, self.source_id),
            Err(e) => warn!("{}; reprocessing anyway", e),
        }
        let pages: Vec<usize> = (0..self.page_count()).collect();
        self.process_pages(&pages, true).await
    }

    // ── Interactive operations ───────────────────────────────────────────

    pub async fn toggle_body(&self, id: ParagraphId) -> Result<bool, ModelError> {
        self.doc.lock().await.toggle_body(id)
    }

    pub async fn reorder(&self, anchor: ParagraphId, target: ParagraphId) -> Result<(), ModelError> {
        self.doc.lock().await.reorder(anchor, target)
    }

    pub async fn set_visibility(&self, id: ParagraphId, visible: bool) -> Result<(), ModelError> {
        self.doc.lock().await.set_visibility(id, visible)
    }

    pub async fn set_continuation(
        &self,
        id: ParagraphId,
        continuation: Option<Continuation>,
    ) -> Result<(), ModelError> {
        self.doc.lock().await.set_continuation(id, continuation)
    }

    pub async fn set_text(&self, id: ParagraphId, text: impl Into<String>) -> Result<(), ModelError> {
        self.doc.lock().await.set_text(id, text)
    }

    pub async fn merge(
        &self,
        ids: &[ParagraphId],
        mode: Continuation,
    ) -> Result<ParagraphId, ModelError> {
        self.doc.lock().await.merge(ids, mode)
    }

    pub async fn split(&self, id: ParagraphId) -> Result<Vec<ParagraphId>, ModelError> {
        self.doc.lock().await.split(id)
    }

    /// Replace the safe area and drop the structuring cache entries built for
    /// older areas. OCR and translation entries do not depend on the area
    /// and are kept.
    ///
    /// Affected pages fall back to `OcrDone`; the next run re-structures
    /// them from the kept OCR output.
    pub async fn set_safe_area(&self, rect: Rect) -> Result<bool, ModelError> {
        let mut doc = self.doc.lock().await;
        let changed = doc.set_safe_area(rect)?;
        if changed {
            match self.coordinator.cache().invalidate(
                &self.source_id,
                Some(CacheStage::Structured),
                None,
            ) {
                Ok(n) => debug!("Safe area changed; dropped {} structuring entries", n),
                Err(e) => warn!("{}; stale structuring entries stay as misses", e),
            }
        }
        Ok(changed)
    }

    // ── Translation ──────────────────────────────────────────────────────

    /// Translate visible body paragraphs in `scope` into the configured
    /// target language.
    ///
    /// Paragraphs that already carry a current translation into that language
    /// are skipped. Results are cached per paragraph text; a result whose
    /// paragraph was edited while the call was in flight is discarded.
    pub async fn translate(&self, scope: TranslationScope) -> TranslationReport {
        let source_lang = self.config.translation.source_lang.as_str();
        let target_lang = self.config.translation.target_lang.as_str();

        let jobs: Vec<(ParagraphId, usize, String)> = {
            let doc = self.doc.lock().await;
            doc.export_order()
                .into_iter()
                .filter(|p| match &scope {
                    TranslationScope::All => true,
                    TranslationScope::Page(page) => p.page_index == *page,
                    TranslationScope::Paragraphs(ids) => ids.contains(&p.id),
                })
                .filter(|p| {
                    let current = p.translated_text().is_some()
                        && p.translation
                            .as_ref()
                            .is_some_and(|t| t.target_lang == target_lang);
                    !current
                })
                .map(|p| (p.id, p.page_index, p.text.clone()))
                .collect()
        };

        let mut report = TranslationReport::default();
        if jobs.is_empty() {
            debug!("Nothing to translate");
            return report;
        }
        info!(
            "Translating {} paragraph(s) {} → {} with {}",
            jobs.len(),
            source_lang,
            target_lang,
            self.translator.name()
        );

        let retry = RetryPolicy::from_config(&self.config);
        let cache = Arc::clone(self.coordinator.cache());
        let results: Vec<_> = stream::iter(jobs)
            .map(|(id, page, text)| {
                let cache = Arc::clone(&cache);
                async move {
                    let fingerprint = Fingerprint::of_parts([
                        text.as_str(),
                        source_lang,
                        target_lang,
                        self.translator.name(),
                    ]);
                    let key = CacheKey {
                        source: &self.source_id,
                        stage: CacheStage::Translated,
                        page,
                        fingerprint: &fingerprint,
                    };
                    if let Some(StageOutput::Translated {
                        text: translated,
                        target_lang: lang,
                    }) = cache.lookup(&key)
                    {
                        if lang == target_lang {
                            return (id, text, Ok((translated, true)));
                        }
                    }

                    let label = format!("Translate {id}");
                    let attempted = with_retry(retry, &label, || {
                        self.translator.translate(&text, source_lang, target_lang)
                    })
                    .await;
                    let result = attempted.result.map(|translated| {
                        cache.store(
                            &key,
                            &StageOutput::Translated {
                                text: translated.clone(),
                                target_lang: target_lang.to_string(),
                            },
                        );
                        (translated, false)
                    });
                    (id, text, result)
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut doc = self.doc.lock().await;
        for (id, source_text, result) in results {
            match result {
                Ok((text, cached)) => {
                    let translation = Translation {
                        text,
                        target_lang: target_lang.to_string(),
                        source_fingerprint: Fingerprint::of_text(&source_text),
                    };
                    if doc.apply_translation(id, translation) {
                        report.translated += 1;
                        if cached {
                            report.from_cache += 1;
                        }
                    } else {
                        warn!("{} changed during translation; result discarded", id);
                        report.discarded += 1;
                    }
                }
                Err(e) => {
                    warn!("Translation of {} failed: {}", id, e);
                    report.failed.push((id, e));
                }
            }
        }
        info!(
            "Translation finished: {} applied ({} cached), {} discarded, {} failed",
            report.translated,
            report.from_cache,
            report.discarded,
            report.failed.len()
        );
        report
    }

    // ── Export ───────────────────────────────────────────────────────────

    pub async fn export(&self) -> String {
        export::export(&*self.doc.lock().await)
    }

    pub async fn export_with(&self, options: &ExportOptions) -> String {
        export::export_with(&*self.doc.lock().await, options)
    }

    /// Write the Markdown export to `<export_dir>/<stem>_structured.md`.
    pub async fn write_markdown(&self, options: &ExportOptions) -> Result<PathBuf, PipelineError> {
        let (markdown, stem) = {
            let doc = self.doc.lock().await;
            (export::export_with(&doc, options), doc.stem())
        };
        let path = export::markdown_path(&self.config.export_dir, &stem);
        export::write_atomic(&path, markdown.as_bytes())?;
        info!("Markdown written to {}", path.display());
        Ok(path)
    }

    /// Extract a knowledge graph from the current Markdown export.
    ///
    /// An empty or unparseable model answer is `Ok(GraphExtraction::Empty)`;
    /// only a failed LLM call after retries is an error.
    pub async fn extract_graph(&self) -> Result<GraphExtraction, PipelineError> {
        let markdown = self.export().await;
        self.graph
            .extract(&markdown)
            .await
            .map_err(|source| PipelineError::Adapter {
                stage: "graph extraction",
                source,
            })
    }

    /// Heading-hierarchy graph of the current export; no LLM involved.
    pub async fn outline_graph(&self) -> KnowledgeGraph {
        KnowledgeGraph::from_outline(&self.export().await)
    }

    /// Write `graph` to `<export_dir>/<stem>_knowledge_graph.json`.
    pub async fn write_graph(&self, graph: &KnowledgeGraph) -> Result<PathBuf, PipelineError> {
        let stem = self.doc.lock().await.stem();
        let path = export::graph_path(&self.config.export_dir, &stem);
        let json = serde_json::to_vec_pretty(graph)
            .map_err(|e| PipelineError::Internal(format!("serialising graph: {e}")))?;
        export::write_atomic(&path, &json)?;
        info!(
            "Knowledge graph ({} nodes, {} edges) written to {}",
            graph.nodes.len(),
            graph.edges.len(),
            path.display()
        );
        Ok(path)
    }

    // ── Snapshots ────────────────────────────────────────────────────────

    pub fn snapshot_path(&self) -> PathBuf {
        snapshot_path(&self.config.cache_dir, &self.source_id)
    }

    /// Persist the whole document model, user edits included.
    pub async fn save_snapshot(&self) -> Result<PathBuf, PipelineError> {
        let path = self.snapshot_path();
        let json = {
            let doc = self.doc.lock().await;
            serde_json::to_vec(&*doc).map_err(|e| PipelineError::SnapshotFailed {
                path: path.clone(),
                detail: e.to_string(),
            })?
        };
        export::write_atomic(&path, &json).map_err(|e| PipelineError::SnapshotFailed {
            path: path.clone(),
            detail: e.to_string(),
        })?;
        debug!("Snapshot saved to {}", path.display());
        Ok(path)
    }
}

/// `<cache_dir>/<source_id>/document.json`
pub fn snapshot_path(cache_dir: &Path, source_id: &SourceId) -> PathBuf {
    cache_dir.join(source_id.as_str()).join(SNAPSHOT_FILE)
}

/// Read a snapshot back. Anything unusable (missing, unparseable, for a
/// different file, or structurally invalid) is ignored with a warning.
pub fn load_snapshot(path: &Path, source_id: &SourceId, page_count: usize) -> Option<Document> {
    let bytes = std::fs::read(path).ok()?;
    let mut doc: Document = match serde_json::from_slice(&bytes) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("Ignoring unreadable snapshot {}: {}", path.display(), e);
            return None;
        }
    };
    if doc.source_id() != source_id || doc.page_count() != page_count {
        warn!("Ignoring snapshot {}: it describes another file", path.display());
        return None;
    }
    if let Err(e) = doc.check_invariants() {
        warn!("Ignoring inconsistent snapshot {}: {}", path.display(), e);
        return None;
    }
    let recovered = doc.recover_interrupted();
    if recovered > 0 {
        debug!("{} page(s) were mid-run when the snapshot was taken", recovered);
    }
    Some(doc)
}
