//! Stage cache: durable key-value storage of expensive stage outputs.
//!
//! ## Key schema
//!
//! ```text
//! (source_id, stage, page_index, fingerprint) ──▶ CacheEntry { output, created_at }
//! ```
//!
//! A lookup only hits on an exact fingerprint match. When a stage's inputs
//! change (new safe area, edited text) the fingerprint changes with them and
//! the old entry simply stops matching; nothing has to be deleted for
//! correctness. [`CacheStore::invalidate`] exists for explicit clears.
//!
//! ## Why errors never escape
//!
//! The cache only ever saves API calls. The provided [`CacheStore::lookup`]
//! and [`CacheStore::store`] downgrade every [`CacheError`] to a logged
//! miss / no-op, and that is the only way the pipeline talks to a store.

mod fingerprint;
mod fs;
mod memory;

pub use fingerprint::Fingerprint;
pub use fs::FsCacheStore;
pub use memory::MemoryCacheStore;

use crate::error::CacheError;
use crate::model::{OcrOutput, ParagraphDraft, SourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Pipeline stage whose output is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStage {
    RawOcr,
    Structured,
    Translated,
}

impl CacheStage {
    pub const ALL: [CacheStage; 3] = [
        CacheStage::RawOcr,
        CacheStage::Structured,
        CacheStage::Translated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStage::RawOcr => "raw_ocr",
            CacheStage::Structured => "structured",
            CacheStage::Translated => "translated",
        }
    }

    /// Single-slot stages keep one entry per page: storing a new fingerprint
    /// evicts the previous one. Translations are keyed per paragraph text and
    /// accumulate.
    pub fn is_single_slot(&self) -> bool {
        !matches!(self, CacheStage::Translated)
    }
}

impl fmt::Display for CacheStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one stage execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "output", rename_all = "snake_case")]
pub enum StageOutput {
    RawOcr(OcrOutput),
    Structured(Vec<ParagraphDraft>),
    Translated { text: String, target_lang: String },
}

impl StageOutput {
    pub fn stage(&self) -> CacheStage {
        match self {
            StageOutput::RawOcr(_) => CacheStage::RawOcr,
            StageOutput::Structured(_) => CacheStage::Structured,
            StageOutput::Translated { .. } => CacheStage::Translated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub page_index: usize,
    pub created_at: DateTime<Utc>,
    pub output: StageOutput,
}

/// Full address of one cache entry.
#[derive(Debug, Clone, Copy)]
pub struct CacheKey<'a> {
    pub source: &'a SourceId,
    pub stage: CacheStage,
    pub page: usize,
    pub fingerprint: &'a Fingerprint,
}

impl fmt::Display for CacheKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/p{}/{}",
            self.source,
            self.stage,
            self.page + 1,
            self.fingerprint.short()
        )
    }
}

/// Durable stage-output store scoped by [`SourceId`].
pub trait CacheStore: Send + Sync {
    /// Exact-match read. `Ok(None)` on a miss.
    fn get(&self, key: &CacheKey<'_>) -> Result<Option<CacheEntry>, CacheError>;

    /// Store an output under `key`, stamping the current time.
    fn put(&self, key: &CacheKey<'_>, output: &StageOutput) -> Result<(), CacheError>;

    /// Remove entries of `source`, optionally narrowed to one stage and/or
    /// one page. Returns how many entries were removed.
    fn invalidate(
        &self,
        source: &SourceId,
        stage: Option<CacheStage>,
        page: Option<usize>,
    ) -> Result<usize, CacheError>;

    /// [`get`](Self::get) with every failure treated as a miss.
    fn lookup(&self, key: &CacheKey<'_>) -> Option<StageOutput> {
        match self.get(key) {
            Ok(Some(entry)) if entry.output.stage() == key.stage => {
                debug!("Cache hit: {}", key);
                Some(entry.output)
            }
            Ok(Some(entry)) => {
                warn!(
                    "Cache entry {} holds {} output; ignoring",
                    key,
                    entry.output.stage()
                );
                None
            }
            Ok(None) => {
                debug!("Cache miss: {}", key);
                None
            }
            Err(e) => {
                warn!("{}; treating as miss", e);
                None
            }
        }
    }

    /// [`put`](Self::put) with failures logged and dropped.
    fn store(&self, key: &CacheKey<'_>, output: &StageOutput) {
        if let Err(e) = self.put(key, output) {
            warn!("{}; continuing without caching", e);
        }
    }
}
