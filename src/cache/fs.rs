//! Filesystem-backed cache store.
//!
//! Layout under the configured root:
//!
//! ```text
//! <root>/<source_id>/<stage>/p<page:05>-<fingerprint>.json
//! ```
//!
//! Every write goes through a temp file in the same directory followed by a
//! rename, so a crash mid-write never leaves a half-written entry behind that
//! could later parse as valid.

use super::{CacheEntry, CacheKey, CacheStage, CacheStore, StageOutput};
use crate::error::CacheError;
use crate::model::SourceId;
use chrono::Utc;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FsCacheStore {
    root: PathBuf,
}

impl FsCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding everything cached for one document.
    pub fn source_dir(&self, source: &SourceId) -> PathBuf {
        self.root.join(source.as_str())
    }

    fn stage_dir(&self, source: &SourceId, stage: CacheStage) -> PathBuf {
        self.source_dir(source).join(stage.as_str())
    }

    fn entry_path(&self, key: &CacheKey<'_>) -> PathBuf {
        self.stage_dir(key.source, key.stage)
            .join(format!("{}{}.json", page_prefix(key.page), key.fingerprint))
    }

    /// Delete `.json` entries in `dir` whose file name satisfies `matches`.
    fn remove_matching(
        dir: &Path,
        mut matches: impl FnMut(&str) -> bool,
    ) -> Result<usize, CacheError> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(CacheError::Write {
                    key: dir.display().to_string(),
                    detail: e.to_string(),
                })
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(".json") || !matches(name) {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(CacheError::Write {
                        key: entry.path().display().to_string(),
                        detail: e.to_string(),
                    })
                }
            }
        }
        Ok(removed)
    }
}

fn page_prefix(page: usize) -> String {
    format!("p{page:05}-")
}

impl CacheStore for FsCacheStore {
    fn get(&self, key: &CacheKey<'_>) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.entry_path(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CacheError::Read {
                    key: key.to_string(),
                    detail: e.to_string(),
                })
            }
        };

        let entry: CacheEntry =
            serde_json::from_slice(&bytes).map_err(|e| CacheError::Read {
                key: key.to_string(),
                detail: format!("corrupt entry {}: {e}", path.display()),
            })?;

        if &entry.fingerprint != key.fingerprint || entry.page_index != key.page {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    fn put(&self, key: &CacheKey<'_>, output: &StageOutput) -> Result<(), CacheError> {
        let write_err = |detail: String| CacheError::Write {
            key: key.to_string(),
            detail,
        };

        let dir = self.stage_dir(key.source, key.stage);
        std::fs::create_dir_all(&dir).map_err(|e| write_err(e.to_string()))?;

        let entry = CacheEntry {
            fingerprint: key.fingerprint.clone(),
            page_index: key.page,
            created_at: Utc::now(),
            output: output.clone(),
        };
        let json = serde_json::to_vec_pretty(&entry).map_err(|e| write_err(e.to_string()))?;

        let mut tmp =
            tempfile::NamedTempFile::new_in(&dir).map_err(|e| write_err(e.to_string()))?;
        tmp.write_all(&json).map_err(|e| write_err(e.to_string()))?;
        let path = self.entry_path(key);
        tmp.persist(&path)
            .map_err(|e| write_err(e.error.to_string()))?;

        if key.stage.is_single_slot() {
            let prefix = page_prefix(key.page);
            let current = format!("{}{}.json", prefix, key.fingerprint);
            let evicted =
                Self::remove_matching(&dir, |name| name.starts_with(&prefix) && name != current)?;
            if evicted > 0 {
                debug!("Evicted {} superseded entries for {}", evicted, key);
            }
        }
        Ok(())
    }

    fn invalidate(
        &self,
        source: &SourceId,
        stage: Option<CacheStage>,
        page: Option<usize>,
    ) -> Result<usize, CacheError> {
        let stages: Vec<CacheStage> = match stage {
            Some(s) => vec![s],
            None => CacheStage::ALL.to_vec(),
        };
        let prefix = page.map(page_prefix);

        let mut removed = 0;
        for stage in stages {
            removed += Self::remove_matching(&self.stage_dir(source, stage), |name| {
                prefix.as_deref().is_none_or(|p| name.starts_with(p))
            })?;
        }
        debug!(
            "Invalidated {} entries for {} (stage={:?}, page={:?})",
            removed, source, stage, page
        );
        Ok(removed)
    }
}
