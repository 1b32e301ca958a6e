//! Stage 1: geometric candidate detection.
//!
//! Per tile, circular and triangular symbol candidates are located with
//! edge + Hough + contour analysis. Recall is prioritized over precision;
//! the OCR prefilter and the vision model trim false positives downstream.

mod circles;
mod filters;
mod nms;
mod triangles;

use image::GrayImage;
use log::debug;

pub use filters::FilterStats;
pub use nms::suppress_per_shape;

use crate::markers::Candidate;

/// Render DPI all empirically tuned pixel thresholds were measured at.
pub const BASELINE_DPI: u32 = 300;

/// Tuning of the geometric detector.
///
/// All pixel-denominated fields are expressed at [`BASELINE_DPI`] and scaled
/// linearly with the actual render DPI.
#[derive(Debug, Clone)]
pub struct DetectorParams {
    /// DPI the tiles were rendered at.
    pub dpi: u32,
    /// Smallest circle radius considered, px at baseline DPI.
    pub circle_min_radius: u32,
    /// Largest circle radius considered, px at baseline DPI.
    pub circle_max_radius: u32,
    /// Smallest triangle bounding-box side, px at baseline DPI.
    pub triangle_min_size: u32,
    /// Largest triangle bounding-box side, px at baseline DPI.
    pub triangle_max_size: u32,
    /// IoU threshold of the per-shape non-max suppression.
    pub nms_iou: f64,
    /// Enables the aggressive false-positive filters.
    pub strict_filtering: bool,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            dpi: BASELINE_DPI,
            circle_min_radius: 12,
            circle_max_radius: 60,
            triangle_min_size: 15,
            triangle_max_size: 100,
            nms_iou: 0.3,
            strict_filtering: false,
        }
    }
}

impl DetectorParams {
    /// Linear DPI scale relative to the tuning baseline.
    #[must_use]
    pub fn scale(&self) -> f64 {
        f64::from(self.dpi) / f64::from(BASELINE_DPI)
    }

    fn scaled(&self, px: u32) -> u32 {
        ((f64::from(px) * self.scale()).round() as u32).max(1)
    }
}

/// The Stage-1 detector. Cheap to construct; holds only tuning.
#[derive(Debug, Clone, Default)]
pub struct GeometricDetector {
    params: DetectorParams,
}

impl GeometricDetector {
    /// Creates a detector with the given tuning.
    #[must_use]
    pub fn new(params: DetectorParams) -> Self {
        Self { params }
    }

    /// Detector tuning.
    #[must_use]
    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    /// Detects all plausible circle and triangle candidates in one tile.
    ///
    /// Candidates come back in tile-local coordinates, already de-duplicated
    /// per shape kind and, when strict filtering is on, run through the
    /// false-positive filters.
    #[must_use]
    pub fn detect_tile(&self, gray: &GrayImage, tile_id: &str) -> Vec<Candidate> {
        let mut candidates = circles::detect_circles(gray, &self.params, tile_id);
        candidates.extend(triangles::detect_triangles(gray, &self.params, tile_id));

        let mut candidates = nms::suppress_per_shape(candidates, self.params.nms_iou);

        if self.params.strict_filtering {
            let before = candidates.len();
            let (kept, stats) = filters::apply_filters(candidates, gray, &self.params);
            debug!(
                "tile {tile_id}: strict filtering kept {}/{before} candidates ({stats:?})",
                kept.len()
            );
            candidates = kept;
        }

        candidates
    }
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma};
    use imageproc::drawing::{draw_hollow_circle_mut, draw_polygon_mut};
    use imageproc::point::Point;

    use super::*;
    use crate::markers::ShapeKind;

    fn white_tile(size: u32) -> GrayImage {
        GrayImage::from_pixel(size, size, Luma([255]))
    }

    #[test]
    fn finds_clean_circle() {
        let mut tile = white_tile(400);
        draw_hollow_circle_mut(&mut tile, (200, 200), 30, Luma([0]));
        draw_hollow_circle_mut(&mut tile, (200, 200), 29, Luma([0]));

        let detector = GeometricDetector::default();
        let found = detector.detect_tile(&tile, "t");
        let circle = found
            .iter()
            .find(|c| c.shape_kind == ShapeKind::Circular)
            .expect("circle candidate");
        let (cx, cy) = circle.bbox.center();
        assert!((cx - 200.0).abs() < 8.0, "center x {cx}");
        assert!((cy - 200.0).abs() < 8.0, "center y {cy}");
        assert!(circle.geo_confidence >= 0.7);
    }

    #[test]
    fn finds_filled_triangle() {
        let mut tile = white_tile(300);
        let pts = [
            Point::new(150, 80),
            Point::new(110, 160),
            Point::new(190, 160),
        ];
        draw_polygon_mut(&mut tile, &pts, Luma([0]));

        let detector = GeometricDetector::default();
        let found = detector.detect_tile(&tile, "t");
        assert!(
            found.iter().any(|c| c.shape_kind == ShapeKind::Triangular),
            "no triangle in {found:?}"
        );
    }

    #[test]
    fn blank_tile_yields_nothing() {
        let detector = GeometricDetector::default();
        assert!(detector.detect_tile(&white_tile(256), "t").is_empty());
    }

    #[test]
    fn candidates_stay_inside_padded_tile() {
        let mut tile = white_tile(400);
        draw_hollow_circle_mut(&mut tile, (40, 40), 25, Luma([0]));
        let detector = GeometricDetector::default();
        for c in detector.detect_tile(&tile, "t") {
            let padded = c.bbox.pad(0.2);
            assert!(padded.clamp_to(400, 400).is_some());
        }
    }
}
