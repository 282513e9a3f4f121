//! In-process cache store. Nothing survives the process; used by tests and
//! by callers that want deduplication within one run only.

use super::{CacheEntry, CacheKey, CacheStage, CacheStore, Fingerprint, StageOutput};
use crate::error::CacheError;
use crate::model::SourceId;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

type Slot = (SourceId, CacheStage, usize, Fingerprint);

#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<Slot, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries of one stage, across all pages and sources.
    pub fn count(&self, stage: CacheStage) -> usize {
        self.entries
            .lock()
            .map(|m| m.keys().filter(|(_, s, _, _)| *s == stage).count())
            .unwrap_or(0)
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &CacheKey<'_>) -> Result<Option<CacheEntry>, CacheError> {
        let map = self.entries.lock().map_err(|e| CacheError::Read {
            key: key.to_string(),
            detail: e.to_string(),
        })?;
        let slot = (
            key.source.clone(),
            key.stage,
            key.page,
            key.fingerprint.clone(),
        );
        Ok(map.get(&slot).cloned())
    }

    fn put(&self, key: &CacheKey<'_>, output: &StageOutput) -> Result<(), CacheError> {
        let mut map = self.entries.lock().map_err(|e| CacheError::Write {
            key: key.to_string(),
            detail: e.to_string(),
        })?;
        if key.stage.is_single_slot() {
            map.retain(|(src, stage, page, _), _| {
                !(src == key.source && *stage == key.stage && *page == key.page)
            });
        }
        map.insert(
            (
                key.source.clone(),
                key.stage,
                key.page,
                key.fingerprint.clone(),
            ),
            CacheEntry {
                fingerprint: key.fingerprint.clone(),
                page_index: key.page,
                created_at: Utc::now(),
                output: output.clone(),
            },
        );
        Ok(())
    }

    fn invalidate(
        &self,
        source: &SourceId,
        stage: Option<CacheStage>,
        page: Option<usize>,
    ) -> Result<usize, CacheError> {
        let mut map = self.entries.lock().map_err(|e| CacheError::Write {
            key: source.to_string(),
            detail: e.to_string(),
        })?;
        let before = map.len();
        map.retain(|(src, s, p, _), _| {
            let hit = src == source
                && stage.is_none_or(|st| st == *s)
                && page.is_none_or(|pg| pg == *p);
            !hit
        });
        Ok(before - map.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::exercise_store;

    #[test]
    fn shared_store_behaviour() {
        exercise_store(&MemoryCacheStore::new());
    }
}
