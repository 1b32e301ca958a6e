//! The shared candidate/marker model the pipeline stages hand to each other.
//!
//! A [`Candidate`] is a geometric detection in tile-local coordinates and is
//! immutable once emitted: later stages attach decisions but never rewrite
//! the box. A [`Marker`] is a validated callout in page coordinates, traced
//! back to exactly one candidate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use plansight_tile_utils::PixelRect;

/// The symbol geometry a detector matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    /// Detail/section/elevation callout bubbles.
    Circular,
    /// Revision deltas.
    Triangular,
}

/// Which detection pass produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Hough-gradient circle transform, faint/small parameter band.
    HoughFaint,
    /// Hough-gradient circle transform, standard band.
    HoughStandard,
    /// Hough-gradient circle transform, large section-marker band.
    HoughLarge,
    /// Contour extraction with polygon approximation.
    ContourTriangle,
}

impl DetectionMethod {
    /// Stage-1 confidence assigned to detections of this pass.
    #[must_use]
    pub const fn confidence(self) -> f64 {
        match self {
            Self::HoughFaint => 0.7,
            Self::HoughStandard => 0.8,
            Self::HoughLarge => 0.85,
            Self::ContourTriangle => 0.7,
        }
    }

    /// Shape kind this pass detects.
    #[must_use]
    pub const fn shape_kind(self) -> ShapeKind {
        match self {
            Self::ContourTriangle => ShapeKind::Triangular,
            _ => ShapeKind::Circular,
        }
    }
}

/// A geometric detection result, in tile-local pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Bounding box; tile-local until the aggregator translates it.
    pub bbox: PixelRect,
    /// Matched symbol geometry.
    pub shape_kind: ShapeKind,
    /// Pass that produced this candidate.
    pub method: DetectionMethod,
    /// Stage-1 confidence in `[0, 1]`.
    pub geo_confidence: f64,
    /// Identifier of the tile the candidate was found in.
    pub source_tile: String,
}

/// Stage 1.5's verdict on a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// High-confidence match against the project sheet list.
    Accept,
    /// Clear false positive; never shown to Stage 2.
    Reject,
    /// Needs the vision model to decide.
    Uncertain,
}

/// Kind of a validated marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerKind {
    /// Detail/section callout.
    Circular,
    /// Revision delta.
    Triangular,
    /// The model could not tell (regex-fallback parses).
    #[default]
    Unknown,
}

impl From<ShapeKind> for MarkerKind {
    fn from(kind: ShapeKind) -> Self {
        match kind {
            ShapeKind::Circular => Self::Circular,
            ShapeKind::Triangular => Self::Triangular,
        }
    }
}

/// A validated callout: `text` is always `detail + "/" + sheet`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    /// Full marker text, e.g. `3/A7`.
    pub text: String,
    /// Identifier left of the slash: a number 1–99 or the letter `N`.
    pub detail: String,
    /// Sheet code right of the slash, e.g. `A7`.
    pub sheet: String,
    /// Marker kind as reported by validation.
    #[serde(rename = "type")]
    pub kind: MarkerKind,
    /// Validation confidence in `[0, 1]`.
    pub confidence: f64,
    /// True when `sheet` exists in the project sheet list (or no list given).
    pub is_valid: bool,
    /// True when `sheet` was corrected from a near-miss reading.
    pub fuzzy_matched: bool,
    /// The uncorrected sheet as read, present only when fuzzy matched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_sheet: Option<String>,
    /// Edit distance of the fuzzy correction, present only when fuzzy matched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit_distance: Option<usize>,
    /// Bounding box, page coordinates after aggregation.
    pub bbox: PixelRect,
    /// Tile the underlying candidate came from.
    pub source_tile: String,
}

/// Per-request project knowledge driving Stage 1.5 acceptance and Stage 2
/// fuzzy matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectContext {
    /// Known sheet codes, upper-cased. Empty means "no sheet validation".
    pub valid_sheets: BTreeSet<String>,
    /// Known detail identifiers. Empty falls back to [`default_details`].
    pub valid_details: BTreeSet<String>,
}

/// The detail identifiers accepted when a project provides none: `1`–`7`
/// plus the north-arrow `N`.
#[must_use]
pub fn default_details() -> BTreeSet<String> {
    let mut details: BTreeSet<String> = (1..=7).map(|d| d.to_string()).collect();
    details.insert("N".to_string());
    details
}

impl ProjectContext {
    /// Builds a context from raw sheet names, normalizing case.
    #[must_use]
    pub fn new<I: IntoIterator<Item = String>>(valid_sheets: I) -> Self {
        Self {
            valid_sheets: valid_sheets
                .into_iter()
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            valid_details: BTreeSet::new(),
        }
    }

    /// The effective detail set: the project's, or the default.
    #[must_use]
    pub fn details(&self) -> BTreeSet<String> {
        if self.valid_details.is_empty() {
            default_details()
        } else {
            self.valid_details.clone()
        }
    }

    /// True when a detail identifier is acceptable for this project.
    #[must_use]
    pub fn is_valid_detail(&self, detail: &str) -> bool {
        self.details().contains(detail)
    }
}
