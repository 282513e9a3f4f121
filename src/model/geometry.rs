//! Page-local geometry: normalised rectangles and the document safe area.
//!
//! Coordinates are fractions of the page size with the origin at the top-left
//! corner, so the same rectangle applies to every page regardless of its
//! rendered pixel size.

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An axis-aligned rectangle in normalised page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Rect {
    /// Build a rectangle from two corners in any order.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    /// The whole page.
    pub const fn full_page() -> Self {
        Self {
            x1: 0.0,
            y1: 0.0,
            x2: 1.0,
            y2: 1.0,
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Overlap test with inclusive edges: rectangles that only touch count.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x1 <= other.x2 && other.x1 <= self.x2 && self.y1 <= other.y2 && other.y1 <= self.y2
    }

    /// Smallest rectangle covering both.
    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }

    /// Clamp every coordinate into `[0, 1]`.
    pub fn clamped(&self) -> Rect {
        Rect::new(
            self.x1.clamp(0.0, 1.0),
            self.y1.clamp(0.0, 1.0),
            self.x2.clamp(0.0, 1.0),
            self.y2.clamp(0.0, 1.0),
        )
    }

    fn is_finite(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.4}, {:.4}, {:.4}, {:.4})",
            self.x1, self.y1, self.x2, self.y2
        )
    }
}

/// The document-wide rectangle whose content is eligible for extraction.
///
/// Only constructible through [`SafeArea::new`], which rejects empty,
/// inverted-after-normalisation or out-of-page rectangles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Rect", into = "Rect")]
pub struct SafeArea(Rect);

impl SafeArea {
    pub fn new(rect: Rect) -> Result<Self, ModelError> {
        if !rect.is_finite() {
            return Err(ModelError::InvalidSafeArea(format!(
                "non-finite coordinate in {rect}"
            )));
        }
        let r = Rect::new(rect.x1, rect.y1, rect.x2, rect.y2);
        let in_page = [r.x1, r.y1, r.x2, r.y2]
            .iter()
            .all(|v| (0.0..=1.0).contains(v));
        if !in_page {
            return Err(ModelError::InvalidSafeArea(format!(
                "{r} extends beyond the page; coordinates must be within [0, 1]"
            )));
        }
        if r.width() <= f32::EPSILON || r.height() <= f32::EPSILON {
            return Err(ModelError::InvalidSafeArea(format!("{r} has no area")));
        }
        Ok(Self(r))
    }

    pub fn rect(&self) -> Rect {
        self.0
    }

    /// Whether a region is eligible for extraction.
    pub fn admits(&self, region: &Rect) -> bool {
        self.0.overlaps(region)
    }

    /// Stable textual form used inside stage fingerprints.
    pub fn fingerprint_component(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SafeArea {
    /// Trims the usual running headers, footers and side margins of a
    /// journal page.
    fn default() -> Self {
        Self(Rect {
            x1: 0.15,
            y1: 0.08,
            x2: 0.85,
            y2: 0.92,
        })
    }
}

impl TryFrom<Rect> for SafeArea {
    type Error = ModelError;

    fn try_from(rect: Rect) -> Result<Self, Self::Error> {
        SafeArea::new(rect)
    }
}

impl From<SafeArea> for Rect {
    fn from(area: SafeArea) -> Self {
        area.0
    }
}

impl fmt::Display for SafeArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_normalises_corner_order() {
        let r = Rect::new(0.9, 0.8, 0.1, 0.2);
        assert_eq!(r, Rect::new(0.1, 0.2, 0.9, 0.8));
    }

    #[test]
    fn touching_rectangles_overlap() {
        let a = Rect::new(0.0, 0.0, 0.5, 0.5);
        let b = Rect::new(0.5, 0.5, 1.0, 1.0);
        assert!(a.overlaps(&b));
        let c = Rect::new(0.51, 0.0, 1.0, 0.4);
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn safe_area_rejects_degenerate_and_out_of_page() {
        assert!(SafeArea::new(Rect::new(0.2, 0.2, 0.2, 0.8)).is_err());
        assert!(SafeArea::new(Rect::new(-0.1, 0.0, 0.5, 0.5)).is_err());
        assert!(SafeArea::new(Rect::new(0.0, 0.0, 1.2, 0.5)).is_err());
        assert!(SafeArea::new(Rect::new(0.0, f32::NAN, 0.5, 0.5)).is_err());
        assert!(SafeArea::new(Rect::full_page()).is_ok());
    }

    #[test]
    fn default_safe_area_excludes_running_header_band() {
        let area = SafeArea::default();
        let header = Rect::new(0.0, 0.0, 1.0, 0.05);
        let body = Rect::new(0.2, 0.3, 0.8, 0.4);
        assert!(!area.admits(&header));
        assert!(area.admits(&body));
    }

    #[test]
    fn fingerprint_component_is_stable() {
        let a = SafeArea::new(Rect::new(0.1, 0.1, 0.9, 0.9)).unwrap();
        let b = SafeArea::new(Rect::new(0.9, 0.9, 0.1, 0.1)).unwrap();
        assert_eq!(a.fingerprint_component(), b.fingerprint_component());
    }

    #[test]
    fn safe_area_deserialisation_validates() {
        let bad = r#"{"x1":0.5,"y1":0.5,"x2":0.5,"y2":0.9}"#;
        assert!(serde_json::from_str::<SafeArea>(bad).is_err());
    }
}
