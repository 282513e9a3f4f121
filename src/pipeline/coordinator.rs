//! Per-page processing: render → OCR → structure → populate, with caching,
//! retries and failure isolation.
//!
//! ## Single writer
//!
//! Adapter calls run concurrently (up to `concurrency` pages in flight), but
//! every read or write of the [`Document`] happens under its mutex, in short
//! critical sections that never span an `.await` on an adapter. Interactive
//! operations take the same mutex, so they queue behind page completions
//! instead of racing them.
//!
//! ## Superseded results
//!
//! The safe-area generation is captured when a page enters
//! `StructurePending`. If it has moved on by the time the structurer answers,
//! the answer was computed for a stale area: it is discarded and the page is
//! structured again with the current area. After [`MAX_SUPERSEDED`]
//! consecutive discards the page is left in `OcrDone` for a later run.

use crate::adapters::{OcrEngine, OcrOptions, PageImage, StructureRequest, Structurer};
use crate::cache::{CacheKey, CacheStage, CacheStore, Fingerprint, StageOutput};
use crate::config::PipelineConfig;
use crate::error::PageError;
use crate::model::{
    Document, OcrOutput, OcrRegion, PageState, ParagraphDraft, PipelineStage, SafeArea, SourceId,
};
use crate::pipeline::render::PageRenderer;
use crate::pipeline::retry::{with_retry, RetryPolicy};
use crate::progress::{NoopObserver, PipelineObserver};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Structuring attempts discarded in a row before a page is given up on
/// for this run.
pub const MAX_SUPERSEDED: usize = 3;

/// How one page ended a run.
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    /// Reached `StructureDone`.
    Done {
        paragraphs: usize,
        ocr_from_cache: bool,
        structure_from_cache: bool,
    },
    /// Parked in `Failed`.
    Failed {
        stage: PipelineStage,
        error: PageError,
    },
    /// Every structuring result arrived for a stale safe area.
    Superseded,
    /// Already up to date, or in flight in another run.
    Skipped,
}

/// Outcomes of one run, ordered by page index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub pages: Vec<(usize, PageOutcome)>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.pages
            .iter()
            .filter(|(_, o)| matches!(o, PageOutcome::Done { .. }))
            .count()
    }

    pub fn failed(&self) -> Vec<(usize, &PageError)> {
        self.pages
            .iter()
            .filter_map(|(i, o)| match o {
                PageOutcome::Failed { error, .. } => Some((*i, error)),
                _ => None,
            })
            .collect()
    }

    pub fn outcome(&self, page: usize) -> Option<&PageOutcome> {
        self.pages.iter().find(|(i, _)| *i == page).map(|(_, o)| o)
    }
}

/// Drives pages through the processing state machine.
pub struct Coordinator {
    renderer: Arc<dyn PageRenderer>,
    ocr: Arc<dyn OcrEngine>,
    structurer: Arc<dyn Structurer>,
    cache: Arc<dyn CacheStore>,
    retry: RetryPolicy,
    concurrency: usize,
    ocr_options: OcrOptions,
    observer: Arc<dyn PipelineObserver>,
}

impl Coordinator {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        ocr: Arc<dyn OcrEngine>,
        structurer: Arc<dyn Structurer>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            renderer,
            ocr,
            structurer,
            cache,
            retry: RetryPolicy::default(),
            concurrency: 4,
            ocr_options: OcrOptions::default(),
            observer: Arc::new(NoopObserver),
        }
    }

    /// Take retry, concurrency, token and observer settings from `config`.
    pub fn configured(mut self, config: &PipelineConfig) -> Self {
        self.retry = RetryPolicy::from_config(config);
        self.concurrency = config.concurrency.max(1);
        self.ocr_options = OcrOptions {
            max_tokens: Some(config.max_tokens),
        };
        if let Some(observer) = &config.observer {
            self.observer = Arc::clone(observer);
        }
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn page_count(&self) -> usize {
        self.renderer.page_count()
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    /// Process `pages` (0-based) concurrently.
    ///
    /// `force` bypasses every cache lookup, including OCR output kept on the
    /// page, and restarts pages that are already `StructureDone`. Fresh
    /// results are still written back to the cache.
    pub async fn process_pages(
        &self,
        doc: &Mutex<Document>,
        pages: &[usize],
        force: bool,
    ) -> RunReport {
        let total = pages.len();
        let start = Instant::now();
        info!(
            "Processing {} page(s), concurrency={}, force={}",
            total, self.concurrency, force
        );
        self.observer.on_run_start(total);

        let mut outcomes: Vec<(usize, PageOutcome)> = stream::iter(pages.iter().copied())
            .map(|page| async move { (page, self.process_page(doc, page, total, force).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        outcomes.sort_by_key(|(i, _)| *i);

        let report = RunReport { pages: outcomes };
        let succeeded = report.succeeded();
        info!(
            "Run finished: {}/{} pages structured, {} failed, {:?}",
            succeeded,
            total,
            report.failed().len(),
            start.elapsed()
        );
        self.observer.on_run_complete(total, succeeded);
        report
    }

    async fn process_page(
        &self,
        doc: &Mutex<Document>,
        page: usize,
        total: usize,
        force: bool,
    ) -> PageOutcome {
        // Claim the page and decide where to start.
        let (source, kept_ocr) = {
            let mut d = doc.lock().await;
            let Some(p) = d.page(page) else {
                warn!("Page {} does not exist; skipping", page + 1);
                return PageOutcome::Skipped;
            };
            if p.state.is_pending() {
                debug!("Page {} already in flight; skipping", page + 1);
                return PageOutcome::Skipped;
            }
            if p.state == PageState::StructureDone && !force {
                return PageOutcome::Skipped;
            }
            let resumable = matches!(
                p.state,
                PageState::OcrDone
                    | PageState::Failed {
                        stage: PipelineStage::Structure,
                        ..
                    }
            );
            let kept_ocr = if !force && resumable {
                p.raw_ocr.clone()
            } else {
                None
            };
            let source = d.source_id().clone();
            if kept_ocr.is_none() && !self.set_state(&mut d, page, PageState::OcrPending) {
                return PageOutcome::Skipped;
            }
            (source, kept_ocr)
        };

        let (ocr, ocr_from_cache) = match kept_ocr {
            Some(ocr) => {
                debug!("Page {}: reusing OCR output", page + 1);
                (ocr, true)
            }
            None => match self.run_ocr(&source, page, force).await {
                Ok((ocr, cached)) => {
                    let mut d = doc.lock().await;
                    if let Err(e) = d.set_raw_ocr(page, ocr.clone()) {
                        warn!("Page {}: {}", page + 1, e);
                    }
                    self.set_state(&mut d, page, PageState::OcrDone);
                    (ocr, cached)
                }
                Err((stage, error)) => {
                    return self.fail(doc, page, total, stage, error).await;
                }
            },
        };

        self.run_structure(doc, &source, page, total, force, &ocr, ocr_from_cache)
            .await
    }

    /// Render and recognise one page. Returns the output and whether it came
    /// from the cache.
    async fn run_ocr(
        &self,
        source: &SourceId,
        page: usize,
        force: bool,
    ) -> Result<(OcrOutput, bool), (PipelineStage, PageError)> {
        let image: PageImage = self
            .renderer
            .render_page(page)
            .await
            .map_err(|e| (PipelineStage::Render, e))?;

        let fingerprint = Fingerprint::of_bytes(&image.png);
        let key = CacheKey {
            source,
            stage: CacheStage::RawOcr,
            page,
            fingerprint: &fingerprint,
        };
        if !force {
            if let Some(StageOutput::RawOcr(ocr)) = self.cache.lookup(&key) {
                return Ok((ocr, true));
            }
        }

        let label = format!("Page {} OCR", page + 1);
        let attempted = with_retry(self.retry, &label, || {
            self.ocr.recognize(&image, &self.ocr_options)
        })
        .await;
        match attempted.result {
            Ok(ocr) => {
                debug!(
                    "Page {}: OCR found {} regions",
                    page + 1,
                    ocr.regions.len()
                );
                self.cache.store(&key, &StageOutput::RawOcr(ocr.clone()));
                Ok((ocr, false))
            }
            Err(source) => Err((
                PipelineStage::Ocr,
                PageError::Adapter {
                    page,
                    attempts: attempted.attempts,
                    source,
                },
            )),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_structure(
        &self,
        doc: &Mutex<Document>,
        source: &SourceId,
        page: usize,
        total: usize,
        force: bool,
        ocr: &OcrOutput,
        ocr_from_cache: bool,
    ) -> PageOutcome {
        for round in 0..MAX_SUPERSEDED {
            let (area, generation) = {
                let mut d = doc.lock().await;
                if !self.set_state(&mut d, page, PageState::StructurePending) {
                    return PageOutcome::Skipped;
                }
                (d.safe_area(), d.safe_area_generation())
            };

            let result = self.structure_once(source, page, force, ocr, area).await;

            let mut d = doc.lock().await;
            if d.safe_area_generation() != generation {
                warn!(
                    "Page {}: structuring result superseded by a safe-area change (round {})",
                    page + 1,
                    round + 1
                );
                self.set_state(&mut d, page, PageState::OcrDone);
                continue;
            }

            return match result {
                Ok((drafts, structure_from_cache)) => {
                    let ids = match d.populate_page(page, drafts) {
                        Ok(ids) => ids,
                        Err(e) => {
                            drop(d);
                            let error = PageError::Rejected {
                                page,
                                detail: e.to_string(),
                            };
                            return self
                                .fail(doc, page, total, PipelineStage::Structure, error)
                                .await;
                        }
                    };
                    self.set_state(&mut d, page, PageState::StructureDone);
                    info!("Page {}: {} paragraphs", page + 1, ids.len());
                    self.observer.on_page_complete(page, total, ids.len());
                    PageOutcome::Done {
                        paragraphs: ids.len(),
                        ocr_from_cache,
                        structure_from_cache,
                    }
                }
                Err(error) => {
                    drop(d);
                    self.fail(doc, page, total, PipelineStage::Structure, error)
                        .await
                }
            };
        }
        warn!(
            "Page {}: safe area kept changing; leaving page for the next run",
            page + 1
        );
        PageOutcome::Superseded
    }

    async fn structure_once(
        &self,
        source: &SourceId,
        page: usize,
        force: bool,
        ocr: &OcrOutput,
        area: SafeArea,
    ) -> Result<(Vec<ParagraphDraft>, bool), PageError> {
        let regions = ocr.within(&area);
        let fingerprint = structure_fingerprint(&area, &regions);
        let key = CacheKey {
            source,
            stage: CacheStage::Structured,
            page,
            fingerprint: &fingerprint,
        };
        if !force {
            if let Some(StageOutput::Structured(drafts)) = self.cache.lookup(&key) {
                return Ok((drafts, true));
            }
        }

        let request = StructureRequest {
            page_index: page,
            regions: &regions,
            safe_area: area,
        };
        let label = format!("Page {} structuring", page + 1);
        let attempted =
            with_retry(self.retry, &label, || self.structurer.structure(&request)).await;
        match attempted.result {
            Ok(drafts) => {
                self.cache
                    .store(&key, &StageOutput::Structured(drafts.clone()));
                Ok((drafts, false))
            }
            Err(source) => Err(PageError::Adapter {
                page,
                attempts: attempted.attempts,
                source,
            }),
        }
    }

    async fn fail(
        &self,
        doc: &Mutex<Document>,
        page: usize,
        total: usize,
        stage: PipelineStage,
        error: PageError,
    ) -> PageOutcome {
        warn!("{}", error);
        let mut d = doc.lock().await;
        self.set_state(
            &mut d,
            page,
            PageState::Failed {
                stage,
                error: error.clone(),
            },
        );
        self.observer
            .on_page_error(page, total, &error.to_string());
        PageOutcome::Failed { stage, error }
    }

    /// Apply a transition and notify the observer. An illegal transition is
    /// logged and reported as `false`.
    fn set_state(&self, doc: &mut Document, page: usize, next: PageState) -> bool {
        match doc.transition(page, next.clone()) {
            Ok(()) => {
                self.observer.on_page_state(page, &next);
                true
            }
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }
}

/// Fingerprint of a structuring call's inputs: the safe area plus every
/// region it admitted, position and text.
pub fn structure_fingerprint(area: &SafeArea, regions: &[OcrRegion]) -> Fingerprint {
    Fingerprint::of_parts(
        std::iter::once(area.fingerprint_component())
            .chain(regions.iter().map(|r| format!("{}\n{}", r.bbox, r.text))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Rect;

    fn region(text: &str, y: f32) -> OcrRegion {
        OcrRegion {
            text: text.into(),
            bbox: Rect::new(0.2, y, 0.8, y + 0.05),
        }
    }

    #[test]
    fn structure_fingerprint_tracks_area_and_text() {
        let area = SafeArea::default();
        let other = SafeArea::new(Rect::new(0.1, 0.1, 0.9, 0.9)).unwrap();
        let regions = vec![region("a", 0.2), region("b", 0.3)];

        let base = structure_fingerprint(&area, &regions);
        assert_eq!(base, structure_fingerprint(&area, &regions));
        assert_ne!(base, structure_fingerprint(&other, &regions));
        assert_ne!(base, structure_fingerprint(&area, &regions[..1]));
    }

    #[test]
    fn report_counts() {
        let report = RunReport {
            pages: vec![
                (
                    0,
                    PageOutcome::Done {
                        paragraphs: 2,
                        ocr_from_cache: false,
                        structure_from_cache: false,
                    },
                ),
                (
                    1,
                    PageOutcome::Failed {
                        stage: PipelineStage::Ocr,
                        error: PageError::Render {
                            page: 1,
                            detail: "x".into(),
                        },
                    },
                ),
                (2, PageOutcome::Skipped),
            ],
        };
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed().len(), 1);
        assert_eq!(report.outcome(2), Some(&PageOutcome::Skipped));
        assert_eq!(report.outcome(9), None);
    }

    #[test]
    fn rejected_structuring_parks_page_as_retriable_failure() {
        let mut doc = Document::new(SourceId::new("paper"), "paper.pdf", 1);
        for next in [
            PageState::OcrPending,
            PageState::OcrDone,
            PageState::StructurePending,
        ] {
            doc.transition(0, next).unwrap();
        }
        let rejected = doc.populate_page(3, Vec::new()).unwrap_err();
        let error = PageError::Rejected {
            page: 0,
            detail: rejected.to_string(),
        };
        assert!(error.to_string().contains("out of range"));

        doc.transition(
            0,
            PageState::Failed {
                stage: PipelineStage::Structure,
                error,
            },
        )
        .unwrap();
        assert!(doc.pages()[0].state.is_failed());
        doc.transition(0, PageState::OcrPending).unwrap();
    }
}
