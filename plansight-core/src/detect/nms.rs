//! Per-tile non-max suppression.

use crate::markers::{Candidate, ShapeKind};

/// Suppresses overlapping candidates within each shape kind.
///
/// Candidates are sorted by confidence; a box is kept unless its IoU with an
/// already-kept box of the same kind exceeds `iou_threshold`. Circles never
/// suppress triangles and vice versa.
#[must_use]
pub fn suppress_per_shape(candidates: Vec<Candidate>, iou_threshold: f64) -> Vec<Candidate> {
    let mut kept = Vec::with_capacity(candidates.len());
    for kind in [ShapeKind::Circular, ShapeKind::Triangular] {
        let mut group: Vec<Candidate> = candidates
            .iter()
            .filter(|c| c.shape_kind == kind)
            .cloned()
            .collect();
        group.sort_by(|a, b| b.geo_confidence.total_cmp(&a.geo_confidence));

        let mut kept_in_group: Vec<Candidate> = Vec::new();
        for candidate in group {
            let suppressed = kept_in_group
                .iter()
                .any(|k| k.bbox.iou(&candidate.bbox) > iou_threshold);
            if !suppressed {
                kept_in_group.push(candidate);
            }
        }
        kept.extend(kept_in_group);
    }
    kept
}

#[cfg(test)]
mod tests {
    use plansight_tile_utils::PixelRect;

    use super::*;
    use crate::markers::DetectionMethod;

    fn candidate(x: i32, conf: f64, method: DetectionMethod) -> Candidate {
        Candidate {
            bbox: PixelRect::new(x, 0, 40, 40),
            shape_kind: method.shape_kind(),
            method,
            geo_confidence: conf,
            source_tile: "t".into(),
        }
    }

    #[test]
    fn keeps_highest_confidence_of_overlapping_pair() {
        let kept = suppress_per_shape(
            vec![
                candidate(0, 0.7, DetectionMethod::HoughFaint),
                candidate(5, 0.85, DetectionMethod::HoughLarge),
            ],
            0.3,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].method, DetectionMethod::HoughLarge);
    }

    #[test]
    fn disjoint_boxes_both_survive() {
        let kept = suppress_per_shape(
            vec![
                candidate(0, 0.8, DetectionMethod::HoughStandard),
                candidate(100, 0.8, DetectionMethod::HoughStandard),
            ],
            0.3,
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn shapes_do_not_suppress_each_other() {
        let kept = suppress_per_shape(
            vec![
                candidate(0, 0.8, DetectionMethod::HoughStandard),
                candidate(0, 0.7, DetectionMethod::ContourTriangle),
            ],
            0.3,
        );
        assert_eq!(kept.len(), 2);
    }
}
