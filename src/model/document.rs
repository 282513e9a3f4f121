//! The document model: pages, a paragraph arena and the reading order.
//!
//! ## Why an arena with explicit order indices?
//!
//! Reading order crosses pages and is edited interactively. Keeping it as an
//! integer field on each paragraph (instead of the position in some list)
//! means a reorder touches only the paragraphs whose slot actually changes,
//! and hidden paragraphs can sit outside the order without leaving holes
//! that shift everyone else.
//!
//! ## Invariants
//!
//! * `order_index` is unique across visible paragraphs (see
//!   [`Document::check_invariants`]).
//! * Every paragraph in the arena is listed by exactly its own page.
//! * Every mutating operation validates first and mutates second, so an
//!   `Err` always means "nothing changed".

use crate::cache::Fingerprint;
use crate::error::ModelError;
use crate::model::geometry::{Rect, SafeArea};
use crate::model::page::{OcrOutput, Page, PageState};
use crate::model::paragraph::{
    BlockKind, Continuation, Paragraph, ParagraphDraft, ParagraphId, Translation,
};
use crate::model::reconcile;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stable identity of an input PDF: sanitised file stem plus a content hash,
/// so renaming the file keeps the stem readable and editing it changes the id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    /// Wrap an existing id. Characters outside `[A-Za-z0-9._-]` are replaced
    /// so the id is always usable as a directory name.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(sanitise(id.as_ref()))
    }

    pub fn from_pdf(path: &Path, bytes: &[u8]) -> Self {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document");
        let hash = Fingerprint::of_bytes(bytes);
        Self(format!("{}-{}", sanitise(stem), hash.short()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn sanitise(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "document".to_string(),
        trimmed => trimmed.to_string(),
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    source_id: SourceId,
    source_path: PathBuf,
    pages: Vec<Page>,
    #[serde(with = "arena")]
    paragraphs: BTreeMap<ParagraphId, Paragraph>,
    safe_area: SafeArea,
    /// Bumped on every safe-area change; in-flight structuring results carry
    /// the generation they started under.
    safe_area_generation: u64,
    next_paragraph_id: u64,
    /// Always greater than every order index handed out so far.
    next_order_index: u64,
}

impl Document {
    pub fn new(source_id: SourceId, source_path: impl Into<PathBuf>, page_count: usize) -> Self {
        Self {
            source_id,
            source_path: source_path.into(),
            pages: (0..page_count).map(Page::new).collect(),
            paragraphs: BTreeMap::new(),
            safe_area: SafeArea::default(),
            safe_area_generation: 0,
            next_paragraph_id: 1,
            next_order_index: 0,
        }
    }

    pub fn with_safe_area(mut self, area: SafeArea) -> Self {
        self.safe_area = area;
        self
    }

    // ── Read access ──────────────────────────────────────────────────────

    pub fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// File stem of the source PDF, used to name exported files.
    pub fn stem(&self) -> String {
        self.source_path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.source_id.to_string())
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page(&self, index: usize) -> Option<&Page> {
        self.pages.get(index)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn safe_area(&self) -> SafeArea {
        self.safe_area
    }

    pub fn safe_area_generation(&self) -> u64 {
        self.safe_area_generation
    }

    pub fn paragraph(&self, id: ParagraphId) -> Option<&Paragraph> {
        self.paragraphs.get(&id)
    }

    /// All paragraphs, by id.
    pub fn paragraphs(&self) -> impl Iterator<Item = &Paragraph> {
        self.paragraphs.values()
    }

    /// Paragraphs of one page in structuring order.
    pub fn page_paragraphs(&self, page: usize) -> Vec<&Paragraph> {
        self.pages
            .get(page)
            .map(|p| {
                p.paragraphs
                    .iter()
                    .filter_map(|id| self.paragraphs.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Visible paragraph ids in reading order.
    pub fn visible_order(&self) -> Vec<ParagraphId> {
        let mut visible: Vec<&Paragraph> =
            self.paragraphs.values().filter(|p| p.visible).collect();
        visible.sort_by_key(|p| (p.order_index, p.id));
        visible.into_iter().map(|p| p.id).collect()
    }

    /// Paragraphs the export engine emits, in reading order.
    pub fn export_order(&self) -> Vec<&Paragraph> {
        let mut selected: Vec<&Paragraph> = self
            .paragraphs
            .values()
            .filter(|p| p.is_exportable())
            .collect();
        selected.sort_by_key(|p| (p.order_index, p.id));
        selected
    }

    fn get(&self, id: ParagraphId) -> Result<&Paragraph, ModelError> {
        self.paragraphs
            .get(&id)
            .ok_or(ModelError::UnknownParagraph(id))
    }

    fn get_mut(&mut self, id: ParagraphId) -> Result<&mut Paragraph, ModelError> {
        self.paragraphs
            .get_mut(&id)
            .ok_or(ModelError::UnknownParagraph(id))
    }

    fn check_page(&self, page: usize) -> Result<(), ModelError> {
        if page >= self.pages.len() {
            return Err(ModelError::PageOutOfRange {
                page,
                total: self.pages.len(),
            });
        }
        Ok(())
    }

    // ── Interactive operations ───────────────────────────────────────────

    /// Flip `is_body`. Returns the new value. Ordering is untouched.
    pub fn toggle_body(&mut self, id: ParagraphId) -> Result<bool, ModelError> {
        let p = self.get_mut(id)?;
        p.is_body = !p.is_body;
        Ok(p.is_body)
    }

    /// Move `target` to immediately follow `anchor` in the visible order.
    ///
    /// Only the contiguous run of paragraphs between the old and new position
    /// of `target` is renumbered, and it reuses exactly the order indices that
    /// run already had, so every paragraph outside it keeps its index.
    pub fn reorder(&mut self, anchor: ParagraphId, target: ParagraphId) -> Result<(), ModelError> {
        let a = self.get(anchor)?;
        let t = self.get(target)?;
        if anchor == target {
            return Err(ModelError::SameParagraph(anchor));
        }
        if !a.visible {
            return Err(ModelError::NotVisible(anchor));
        }
        if !t.visible {
            return Err(ModelError::NotVisible(target));
        }

        let order = self.visible_order();
        let mut moved = order.clone();
        let from = moved
            .iter()
            .position(|&id| id == target)
            .ok_or(ModelError::NotVisible(target))?;
        moved.remove(from);
        let to = moved
            .iter()
            .position(|&id| id == anchor)
            .ok_or(ModelError::NotVisible(anchor))?
            + 1;
        moved.insert(to, target);

        let Some(lo) = (0..order.len()).find(|&i| order[i] != moved[i]) else {
            return Ok(());
        };
        let hi = (0..order.len())
            .rev()
            .find(|&i| order[i] != moved[i])
            .unwrap_or(lo);

        let slots: Vec<u64> = order[lo..=hi]
            .iter()
            .filter_map(|id| self.paragraphs.get(id).map(|p| p.order_index))
            .collect();
        for (id, slot) in moved[lo..=hi].iter().zip(slots) {
            if let Some(p) = self.paragraphs.get_mut(id) {
                p.order_index = slot;
            }
        }
        debug!(
            "Reordered {} after {} ({} paragraphs renumbered)",
            target,
            anchor,
            hi - lo + 1
        );
        Ok(())
    }

    /// Hide or show a paragraph. Hiding parks its order index; showing
    /// appends it after the current maximum.
    pub fn set_visibility(&mut self, id: ParagraphId, visible: bool) -> Result<(), ModelError> {
        let next = self.next_order_index;
        let p = self.get_mut(id)?;
        if p.visible == visible {
            return Ok(());
        }
        p.visible = visible;
        if visible {
            p.order_index = next;
            self.next_order_index += 1;
        }
        Ok(())
    }

    /// Replace the document-wide safe area.
    ///
    /// Pages whose structuring depended on the old area fall back to
    /// `OcrDone`. Returns `false` (and changes nothing) when the area is
    /// unchanged.
    pub fn set_safe_area(&mut self, rect: Rect) -> Result<bool, ModelError> {
        let area = SafeArea::new(rect)?;
        if area == self.safe_area {
            return Ok(false);
        }
        self.safe_area = area;
        self.safe_area_generation += 1;
        for page in &mut self.pages {
            if page.state == PageState::StructureDone {
                page.state = PageState::OcrDone;
            }
        }
        debug!(
            "Safe area set to {} (generation {})",
            area, self.safe_area_generation
        );
        Ok(true)
    }

    /// Mark that `id` continues into the next exported paragraph.
    pub fn set_continuation(
        &mut self,
        id: ParagraphId,
        continuation: Option<Continuation>,
    ) -> Result<(), ModelError> {
        self.get_mut(id)?.continuation = continuation;
        Ok(())
    }

    /// Replace a paragraph's text. Any translation becomes stale.
    pub fn set_text(&mut self, id: ParagraphId, text: impl Into<String>) -> Result<(), ModelError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ModelError::EmptyText);
        }
        let p = self.get_mut(id)?;
        p.text = text;
        p.translation = None;
        Ok(())
    }

    /// Fuse visible paragraphs of one page into a single new paragraph that
    /// takes the earliest order slot of the group. Texts are joined in
    /// reading order with the separator of `mode`.
    pub fn merge(
        &mut self,
        ids: &[ParagraphId],
        mode: Continuation,
    ) -> Result<ParagraphId, ModelError> {
        let mut unique: Vec<ParagraphId> = Vec::new();
        for &id in ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        if unique.len() < 2 {
            return Err(ModelError::MergeNeedsTwo);
        }

        let mut group: Vec<&Paragraph> = Vec::with_capacity(unique.len());
        for &id in &unique {
            let p = self.get(id)?;
            if !p.visible {
                return Err(ModelError::NotVisible(id));
            }
            group.push(p);
        }
        let page = group[0].page_index;
        if let Some(other) = group.iter().find(|p| p.page_index != page) {
            return Err(ModelError::MergeAcrossPages(page, other.page_index));
        }
        group.sort_by_key(|p| p.order_index);

        let head = group[0];
        let tail = group[group.len() - 1];
        let merged = Paragraph {
            id: ParagraphId(self.next_paragraph_id),
            page_index: page,
            text: group
                .iter()
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>()
                .join(mode.separator()),
            translation: None,
            bbox: group.iter().skip(1).fold(head.bbox, |acc, p| acc.union(&p.bbox)),
            kind: head.kind,
            type_hint: head.type_hint.clone(),
            is_body: head.is_body,
            order_index: head.order_index,
            visible: true,
            continuation: tail.continuation,
        };
        let head_id = head.id;
        let merged_id = merged.id;
        self.next_paragraph_id += 1;

        let members: HashSet<ParagraphId> = unique.iter().copied().collect();
        let page_list = &mut self.pages[page].paragraphs;
        let slot = page_list
            .iter()
            .position(|&id| id == head_id)
            .unwrap_or(page_list.len());
        page_list.insert(slot, merged_id);
        page_list.retain(|id| !members.contains(id));
        for id in &unique {
            self.paragraphs.remove(id);
        }
        self.paragraphs.insert(merged_id, merged);
        debug!("Merged {} paragraphs into {}", unique.len(), merged_id);
        Ok(merged_id)
    }

    /// Break a paragraph into one paragraph per non-empty line. The first
    /// piece keeps the original id; the rest follow it directly in reading
    /// order and inherit its flags.
    pub fn split(&mut self, id: ParagraphId) -> Result<Vec<ParagraphId>, ModelError> {
        let original = self.get(id)?.clone();
        let lines: Vec<String> = original
            .text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        if lines.len() < 2 {
            return Err(ModelError::CannotSplit(id));
        }

        let mut ids = vec![id];
        let last = lines.len() - 1;
        for (i, line) in lines.into_iter().enumerate() {
            let piece_id = if i == 0 {
                id
            } else {
                let new_id = ParagraphId(self.next_paragraph_id);
                self.next_paragraph_id += 1;
                ids.push(new_id);
                new_id
            };
            let piece = Paragraph {
                id: piece_id,
                text: line,
                translation: None,
                continuation: if i == last {
                    original.continuation
                } else {
                    None
                },
                ..original.clone()
            };
            self.paragraphs.insert(piece_id, piece);
        }

        let page_list = &mut self.pages[original.page_index].paragraphs;
        if let Some(pos) = page_list.iter().position(|&p| p == id) {
            for (offset, new_id) in ids.iter().skip(1).enumerate() {
                page_list.insert(pos + 1 + offset, *new_id);
            }
        }

        if original.visible {
            // New pieces are placed after `id`; the rest of the order keeps its
            // relative position.
            let mut order: Vec<ParagraphId> = self
                .visible_order()
                .into_iter()
                .filter(|p| !ids[1..].contains(p))
                .collect();
            if let Some(pos) = order.iter().position(|&p| p == id) {
                order.splice(pos + 1..pos + 1, ids[1..].iter().copied());
            }
            self.renumber(&order);
        } else {
            for new_id in &ids[1..] {
                self.park(*new_id);
            }
        }
        Ok(ids)
    }

    // ── Pipeline write path ──────────────────────────────────────────────

    pub(crate) fn transition(&mut self, page: usize, next: PageState) -> Result<(), ModelError> {
        self.check_page(page)?;
        self.pages[page].transition(next)
    }

    pub(crate) fn set_raw_ocr(&mut self, page: usize, ocr: OcrOutput) -> Result<(), ModelError> {
        self.check_page(page)?;
        self.pages[page].raw_ocr = Some(ocr);
        Ok(())
    }

    /// Roll back pages left in a pending state by an interrupted run (a
    /// snapshot saved mid-run). Returns how many pages were rolled back.
    pub(crate) fn recover_interrupted(&mut self) -> usize {
        let mut recovered = 0;
        for page in &mut self.pages {
            let rolled_back = match page.state {
                PageState::OcrPending if page.raw_ocr.is_some() => PageState::OcrDone,
                PageState::OcrPending => PageState::Unparsed,
                PageState::StructurePending => PageState::OcrDone,
                _ => continue,
            };
            page.state = rolled_back;
            recovered += 1;
        }
        recovered
    }

    /// Attach a translation if the paragraph still has the text it was made
    /// from. Returns whether it was attached.
    pub(crate) fn apply_translation(&mut self, id: ParagraphId, translation: Translation) -> bool {
        match self.paragraphs.get_mut(&id) {
            Some(p) if Fingerprint::of_text(&p.text) == translation.source_fingerprint => {
                p.translation = Some(translation);
                true
            }
            _ => false,
        }
    }

    /// Replace every paragraph of `page` with freshly structured drafts.
    ///
    /// Drafts are ordered by `order_hint` and inserted into the reading order
    /// right after the last visible paragraph of any earlier page. New drafts
    /// are reconciled with the page's previous paragraphs (see
    /// [`reconcile`]) so user flags survive re-structuring where the text is
    /// recognisably the same.
    pub(crate) fn populate_page(
        &mut self,
        page: usize,
        mut drafts: Vec<ParagraphDraft>,
    ) -> Result<Vec<ParagraphId>, ModelError> {
        self.check_page(page)?;
        drafts.sort_by_key(|d| d.order_hint);

        let old: Vec<Paragraph> = std::mem::take(&mut self.pages[page].paragraphs)
            .into_iter()
            .filter_map(|id| self.paragraphs.remove(&id))
            .collect();
        let old_texts: Vec<&str> = old.iter().map(|p| p.text.as_str()).collect();
        let new_texts: Vec<&str> = drafts.iter().map(|d| d.text.as_str()).collect();
        let matches = reconcile::match_texts(&old_texts, &new_texts);
        let carried = matches.iter().flatten().count();

        let order = self.visible_order();
        let insert_at = order
            .iter()
            .rposition(|id| {
                self.paragraphs
                    .get(id)
                    .is_some_and(|p| p.page_index < page)
            })
            .map_or(0, |i| i + 1);

        let fallback_bbox = self.safe_area.rect();
        let mut created: Vec<Paragraph> = Vec::with_capacity(drafts.len());
        for (draft, matched) in drafts.into_iter().zip(matches) {
            let kind = BlockKind::from_hint(draft.type_hint.as_deref());
            let bbox = draft.bbox.map(|b| b.clamped()).unwrap_or(fallback_bbox);
            let paragraph = match matched.map(|i| &old[i]) {
                Some(prev) => Paragraph {
                    id: prev.id,
                    page_index: page,
                    text: draft.text,
                    translation: prev.translation.clone(),
                    bbox,
                    kind,
                    type_hint: draft.type_hint,
                    is_body: prev.is_body,
                    order_index: 0,
                    visible: prev.visible,
                    continuation: prev.continuation,
                },
                None => {
                    let id = ParagraphId(self.next_paragraph_id);
                    self.next_paragraph_id += 1;
                    Paragraph {
                        id,
                        page_index: page,
                        text: draft.text,
                        translation: None,
                        bbox,
                        kind,
                        type_hint: draft.type_hint,
                        is_body: kind.default_body(),
                        order_index: 0,
                        visible: true,
                        continuation: None,
                    }
                }
            };
            created.push(paragraph);
        }

        let ids: Vec<ParagraphId> = created.iter().map(|p| p.id).collect();
        let visible_new: Vec<ParagraphId> =
            created.iter().filter(|p| p.visible).map(|p| p.id).collect();
        let hidden_new: Vec<ParagraphId> =
            created.iter().filter(|p| !p.visible).map(|p| p.id).collect();
        for p in created {
            self.paragraphs.insert(p.id, p);
        }
        self.pages[page].paragraphs = ids.clone();

        let mut new_order = order;
        new_order.splice(insert_at..insert_at, visible_new);
        self.renumber(&new_order);
        for id in hidden_new {
            self.park(id);
        }

        debug!(
            "Page {}: populated {} paragraphs ({} carried over)",
            page + 1,
            ids.len(),
            carried
        );
        Ok(ids)
    }

    /// Assign `0..n` to the given visible order.
    fn renumber(&mut self, order: &[ParagraphId]) {
        for (i, id) in order.iter().enumerate() {
            if let Some(p) = self.paragraphs.get_mut(id) {
                p.order_index = i as u64;
            }
        }
        self.next_order_index = self.next_order_index.max(order.len() as u64);
    }

    /// Give a hidden paragraph a fresh, never-shared index.
    fn park(&mut self, id: ParagraphId) {
        let next = self.next_order_index;
        if let Some(p) = self.paragraphs.get_mut(&id) {
            p.order_index = next;
            self.next_order_index += 1;
        }
    }

    /// Verify the structural invariants. Used by tests and after loading a
    /// snapshot from disk.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut seen_order = HashSet::new();
        for p in self.paragraphs.values().filter(|p| p.visible) {
            if !seen_order.insert(p.order_index) {
                return Err(format!(
                    "order index {} is shared by more than one visible paragraph",
                    p.order_index
                ));
            }
            if p.order_index >= self.next_order_index {
                return Err(format!(
                    "paragraph {} has order index {} >= next {}",
                    p.id, p.order_index, self.next_order_index
                ));
            }
        }

        let mut listed = HashSet::new();
        for page in &self.pages {
            for id in &page.paragraphs {
                let p = self
                    .paragraphs
                    .get(id)
                    .ok_or_else(|| format!("page {} lists unknown {}", page.index + 1, id))?;
                if p.page_index != page.index {
                    return Err(format!(
                        "{} is listed by page {} but belongs to page {}",
                        id,
                        page.index + 1,
                        p.page_index + 1
                    ));
                }
                if !listed.insert(*id) {
                    return Err(format!("{id} is listed twice"));
                }
            }
        }
        if listed.len() != self.paragraphs.len() {
            return Err("arena holds paragraphs no page lists".to_string());
        }
        if let Some(max) = self.paragraphs.keys().next_back() {
            if max.0 >= self.next_paragraph_id {
                return Err(format!("{} >= next paragraph id", max));
            }
        }
        Ok(())
    }
}

/// Serialise the arena as a plain list; ids are carried inside each record.
mod arena {
    use super::{Paragraph, ParagraphId};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<ParagraphId, Paragraph>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        map.values().collect::<Vec<_>>().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<BTreeMap<ParagraphId, Paragraph>, D::Error> {
        let list = Vec::<Paragraph>::deserialize(d)?;
        Ok(list.into_iter().map(|p| (p.id, p)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(text: &str, hint: Option<&str>, order: i64) -> ParagraphDraft {
        ParagraphDraft {
            text: text.to_string(),
            type_hint: hint.map(str::to_string),
            order_hint: order,
            bbox: None,
        }
    }

    fn texts(doc: &Document) -> Vec<String> {
        doc.visible_order()
            .iter()
            .map(|id| doc.paragraph(*id).unwrap().text.clone())
            .collect()
    }

    fn two_page_doc() -> Document {
        let mut doc = Document::new(SourceId::new("t"), "t.pdf", 2);
        doc.populate_page(1, vec![draft("B1", None, 0), draft("B2", None, 1)])
            .unwrap();
        doc.populate_page(
            0,
            vec![draft("A2", None, 1), draft("A1", Some("h1"), 0)],
        )
        .unwrap();
        doc
    }

    #[test]
    fn populate_orders_by_hint_and_page() {
        let doc = two_page_doc();
        assert_eq!(texts(&doc), ["A1", "A2", "B1", "B2"]);
        assert_eq!(
            doc.paragraph(doc.visible_order()[0]).unwrap().kind,
            BlockKind::Heading { level: 1 }
        );
        doc.check_invariants().unwrap();
    }

    #[test]
    fn source_id_is_path_safe() {
        let id = SourceId::from_pdf(Path::new("/tmp/My Paper (v2).pdf"), b"%PDF-1.7");
        assert!(id.as_str().starts_with("My_Paper__v2_-"));
        assert_eq!(SourceId::new("../..").as_str(), "_");
        assert_eq!(SourceId::new("..").as_str(), "document");
    }

    #[test]
    fn reorder_moves_target_after_anchor() {
        let mut doc = two_page_doc();
        let order = doc.visible_order();
        // Move B2 after A1.
        doc.reorder(order[0], order[3]).unwrap();
        assert_eq!(texts(&doc), ["A1", "B2", "A2", "B1"]);
        doc.check_invariants().unwrap();
    }

    #[test]
    fn reorder_leaves_paragraphs_outside_the_range_untouched() {
        let mut doc = two_page_doc();
        let order = doc.visible_order();
        let first_index = doc.paragraph(order[0]).unwrap().order_index;
        // Move A2 after B1: only A2 and B1 change.
        doc.reorder(order[2], order[1]).unwrap();
        assert_eq!(texts(&doc), ["A1", "B1", "A2", "B2"]);
        assert_eq!(doc.paragraph(order[0]).unwrap().order_index, first_index);
        assert_eq!(doc.paragraph(order[3]).unwrap().order_index, 3);
    }

    #[test]
    fn reorder_rejections_leave_model_unchanged() {
        let mut doc = two_page_doc();
        let order = doc.visible_order();
        let before = doc.clone();

        assert_eq!(
            doc.reorder(order[0], order[0]),
            Err(ModelError::SameParagraph(order[0]))
        );
        assert_eq!(
            doc.reorder(order[0], ParagraphId(999)),
            Err(ModelError::UnknownParagraph(ParagraphId(999)))
        );
        doc.set_visibility(order[1], false).unwrap();
        let hidden = doc.clone();
        assert_eq!(
            doc.reorder(order[0], order[1]),
            Err(ModelError::NotVisible(order[1]))
        );
        assert_eq!(doc, hidden);
        doc.set_visibility(order[1], true).unwrap();
        assert_ne!(doc, before);
    }

    #[test]
    fn reorder_into_current_position_is_a_no_op() {
        let mut doc = two_page_doc();
        let order = doc.visible_order();
        let before = doc.clone();
        doc.reorder(order[0], order[1]).unwrap();
        assert_eq!(doc, before);
    }

    #[test]
    fn toggle_body_does_not_touch_order() {
        let mut doc = two_page_doc();
        let order = doc.visible_order();
        assert!(!doc.toggle_body(order[1]).unwrap());
        assert_eq!(doc.visible_order(), order);
        assert_eq!(doc.export_order().len(), 3);
        assert!(doc.toggle_body(order[1]).unwrap());
    }

    #[test]
    fn hidden_then_shown_goes_to_the_end() {
        let mut doc = two_page_doc();
        let order = doc.visible_order();
        doc.set_visibility(order[0], false).unwrap();
        assert_eq!(texts(&doc), ["A2", "B1", "B2"]);
        doc.set_visibility(order[0], true).unwrap();
        assert_eq!(texts(&doc), ["A2", "B1", "B2", "A1"]);
        doc.check_invariants().unwrap();
    }

    #[test]
    fn safe_area_change_resets_structured_pages() {
        let mut doc = two_page_doc();
        for page in 0..2 {
            for s in [
                PageState::OcrPending,
                PageState::OcrDone,
                PageState::StructurePending,
                PageState::StructureDone,
            ] {
                doc.transition(page, s).unwrap();
            }
        }
        let gen = doc.safe_area_generation();
        assert!(doc.set_safe_area(Rect::new(0.1, 0.1, 0.9, 0.9)).unwrap());
        assert_eq!(doc.safe_area_generation(), gen + 1);
        assert!(doc.pages().iter().all(|p| p.state == PageState::OcrDone));

        // Same area again: nothing happens.
        assert!(!doc.set_safe_area(Rect::new(0.1, 0.1, 0.9, 0.9)).unwrap());
        assert_eq!(doc.safe_area_generation(), gen + 1);
    }

    #[test]
    fn invalid_safe_area_is_rejected() {
        let mut doc = two_page_doc();
        let before = doc.clone();
        assert!(matches!(
            doc.set_safe_area(Rect::new(0.5, 0.5, 0.5, 0.5)),
            Err(ModelError::InvalidSafeArea(_))
        ));
        assert_eq!(doc, before);
    }

    #[test]
    fn merge_joins_in_reading_order_and_takes_first_slot() {
        let mut doc = two_page_doc();
        let order = doc.visible_order();
        let merged = doc.merge(&[order[1], order[0]], Continuation::Concat).unwrap();
        let p = doc.paragraph(merged).unwrap();
        assert_eq!(p.text, "A1 A2");
        assert_eq!(p.kind, BlockKind::Heading { level: 1 });
        assert_eq!(texts(&doc), ["A1 A2", "B1", "B2"]);
        assert_eq!(doc.page(0).unwrap().paragraphs, vec![merged]);
        doc.check_invariants().unwrap();
    }

    #[test]
    fn merge_rejects_cross_page_and_single_ids() {
        let mut doc = two_page_doc();
        let order = doc.visible_order();
        assert_eq!(
            doc.merge(&[order[0], order[0]], Continuation::Join),
            Err(ModelError::MergeNeedsTwo)
        );
        assert_eq!(
            doc.merge(&[order[0], order[2]], Continuation::Join),
            Err(ModelError::MergeAcrossPages(0, 1))
        );
    }

    #[test]
    fn split_places_pieces_directly_after_original() {
        let mut doc = Document::new(SourceId::new("t"), "t.pdf", 1);
        doc.populate_page(
            0,
            vec![draft("first\nsecond\n\nthird", None, 0), draft("tail", None, 1)],
        )
        .unwrap();
        let id = doc.visible_order()[0];
        let ids = doc.split(id).unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], id);
        assert_eq!(texts(&doc), ["first", "second", "third", "tail"]);
        doc.check_invariants().unwrap();

        assert_eq!(doc.split(id), Err(ModelError::CannotSplit(id)));
    }

    #[test]
    fn set_text_clears_translation() {
        let mut doc = two_page_doc();
        let id = doc.visible_order()[0];
        let tr = Translation {
            text: "제목".into(),
            target_lang: "KO".into(),
            source_fingerprint: Fingerprint::of_text("A1"),
        };
        assert!(doc.apply_translation(id, tr.clone()));
        assert_eq!(doc.paragraph(id).unwrap().translated_text(), Some("제목"));

        doc.set_text(id, "A1 revised").unwrap();
        assert!(doc.paragraph(id).unwrap().translation.is_none());
        assert!(!doc.apply_translation(id, tr));
        assert_eq!(doc.set_text(id, "  "), Err(ModelError::EmptyText));
    }

    #[test]
    fn restructuring_carries_user_flags_over() {
        let mut doc = two_page_doc();
        let order = doc.visible_order();
        let a2 = order[1];
        doc.toggle_body(a2).unwrap();
        doc.set_visibility(order[0], false).unwrap();

        let ids = doc
            .populate_page(
                0,
                vec![draft("A1", Some("h1"), 0), draft("A2", None, 1), draft("A3", None, 2)],
            )
            .unwrap();
        assert_eq!(ids[1], a2);
        assert!(!doc.paragraph(a2).unwrap().is_body);
        assert!(!doc.paragraph(ids[0]).unwrap().visible);
        assert!(!ids.contains(&ParagraphId(999)));
        assert_eq!(texts(&doc), ["A2", "A3", "B1", "B2"]);
        doc.check_invariants().unwrap();
    }

    #[test]
    fn restructuring_with_new_text_carries_nothing_over() {
        let mut doc = two_page_doc();
        let old: Vec<ParagraphId> = doc.pages()[0].paragraphs.clone();

        let ids = doc
            .populate_page(
                0,
                vec![
                    draft("Results on the validation split", None, 0),
                    draft("Ablation of the attention heads", None, 1),
                ],
            )
            .unwrap();
        assert_eq!(ids.len(), old.len());
        assert!(ids.iter().all(|id| !old.contains(id)));
        assert!(old.iter().all(|id| doc.paragraph(*id).is_none()));
        doc.check_invariants().unwrap();
    }

    #[test]
    fn snapshot_round_trip_preserves_model() {
        let mut doc = two_page_doc();
        let order = doc.visible_order();
        doc.reorder(order[3], order[0]).unwrap();
        let json = serde_json::to_string(&doc).unwrap();
        let back: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(back, doc);
        back.check_invariants().unwrap();
    }
}
