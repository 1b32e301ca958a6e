//! Triangle detection: adaptive threshold + contour polygon approximation.
//!
//! Revision deltas are small solid or outlined triangles. Binarize, take
//! external contours, and try polygon approximations at increasing epsilon
//! tolerances; a shape counts as triangular when any approximation has
//! exactly three vertices, or its convex hull does and the contour fills
//! most of that hull.

use image::GrayImage;
use imageproc::contours::{BorderType, find_contours};
use imageproc::contrast::adaptive_threshold;
use imageproc::geometry::{approximate_polygon_dp, arc_length, convex_hull};
use imageproc::point::Point;
use plansight_tile_utils::PixelRect;

use super::DetectorParams;
use crate::markers::{Candidate, DetectionMethod};

const ADAPTIVE_BLOCK_RADIUS: u32 = 5;

/// Approximation tolerances as fractions of the contour perimeter.
const EPSILONS: [f64; 3] = [0.02, 0.04, 0.06];

/// Minimum contour/hull area ratio for the convex-hull acceptance path.
const MIN_HULL_FILL: f64 = 0.6;

/// Aspect-ratio window of a triangle bounding box.
const ASPECT_RANGE: (f64, f64) = (0.3, 3.0);

/// Mean-intensity ceiling for contours that fill most of their own box;
/// a solid shape that is not dark is a paper artifact, not a delta.
const FILLED_MAX_MEAN: f64 = 160.0;
const FILLED_BBOX_RATIO: f64 = 0.5;

pub(super) fn detect_triangles(
    gray: &GrayImage,
    params: &DetectorParams,
    tile_id: &str,
) -> Vec<Candidate> {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return Vec::new();
    }

    // Dark linework on light paper: threshold against the local mean, then
    // invert so shapes become foreground.
    let binary = adaptive_threshold(gray, ADAPTIVE_BLOCK_RADIUS);
    let mut inverted = binary;
    for p in inverted.pixels_mut() {
        p.0[0] = 255 - p.0[0];
    }

    let min_side = params.scaled(params.triangle_min_size);
    let max_side = params.scaled(params.triangle_max_size);
    let min_area = f64::from(min_side * min_side) * 0.2;
    let max_area = f64::from(max_side * max_side);

    let mut candidates = Vec::new();
    for contour in find_contours::<i32>(&inverted) {
        if contour.border_type != BorderType::Outer || contour.points.len() < 3 {
            continue;
        }
        let Some(triangle) = triangle_vertices(&contour.points) else {
            continue;
        };

        let bbox = bounding_box(&triangle);
        if bbox.w < min_side || bbox.w > max_side || bbox.h < min_side || bbox.h > max_side {
            continue;
        }
        let aspect = f64::from(bbox.w) / f64::from(bbox.h.max(1));
        if !(ASPECT_RANGE.0..=ASPECT_RANGE.1).contains(&aspect) {
            continue;
        }
        let area = polygon_area(&triangle);
        if area < min_area || area > max_area {
            continue;
        }
        if area / bbox.area() as f64 >= FILLED_BBOX_RATIO
            && mean_intensity(gray, &bbox) > FILLED_MAX_MEAN
        {
            continue;
        }

        candidates.push(Candidate {
            bbox,
            shape_kind: DetectionMethod::ContourTriangle.shape_kind(),
            method: DetectionMethod::ContourTriangle,
            geo_confidence: DetectionMethod::ContourTriangle.confidence(),
            source_tile: tile_id.to_string(),
        });
    }
    candidates
}

/// Tries the epsilon ladder on the contour itself, then falls back to the
/// convex hull for noisy outlines that still fill a triangular envelope.
fn triangle_vertices(points: &[Point<i32>]) -> Option<Vec<Point<i32>>> {
    let perimeter = arc_length(points, true);
    if perimeter <= 0.0 {
        return None;
    }
    for eps in EPSILONS {
        let approx = approximate_polygon_dp(points, eps * perimeter, true);
        if approx.len() == 3 {
            return Some(approx);
        }
    }

    let hull = convex_hull(points.to_vec());
    if hull.len() == 3 {
        let contour_area = polygon_area(points);
        let hull_area = polygon_area(&hull);
        if hull_area > 0.0 && contour_area / hull_area >= MIN_HULL_FILL {
            return Some(hull);
        }
    }
    None
}

fn bounding_box(points: &[Point<i32>]) -> PixelRect {
    let min_x = points.iter().map(|p| p.x).min().unwrap_or(0);
    let min_y = points.iter().map(|p| p.y).min().unwrap_or(0);
    let max_x = points.iter().map(|p| p.x).max().unwrap_or(0);
    let max_y = points.iter().map(|p| p.y).max().unwrap_or(0);
    PixelRect::new(
        min_x,
        min_y,
        (max_x - min_x + 1).max(1) as u32,
        (max_y - min_y + 1).max(1) as u32,
    )
}

/// Shoelace area of a closed polygon.
fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut doubled = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = points[(i + 1) % points.len()];
        doubled += i64::from(p.x) * i64::from(q.y) - i64::from(q.x) * i64::from(p.y);
    }
    (doubled.abs() as f64) / 2.0
}

fn mean_intensity(gray: &GrayImage, bbox: &PixelRect) -> f64 {
    let Some(clipped) = bbox.clamp_to(gray.width(), gray.height()) else {
        return 255.0;
    };
    let mut sum = 0u64;
    let mut count = 0u64;
    for y in clipped.y..clipped.bottom() {
        for x in clipped.x..clipped.right() {
            sum += u64::from(gray.get_pixel(x as u32, y as u32).0[0]);
            count += 1;
        }
    }
    if count == 0 {
        255.0
    } else {
        sum as f64 / count as f64
    }
}

#[cfg(test)]
mod tests {
    use image::Luma;
    use imageproc::drawing::draw_polygon_mut;

    use super::*;

    fn tile_with_triangle(size: u32, apex: (i32, i32), half_base: i32, height: i32) -> GrayImage {
        let mut img = GrayImage::from_pixel(size, size, Luma([255]));
        let pts = [
            Point::new(apex.0, apex.1),
            Point::new(apex.0 - half_base, apex.1 + height),
            Point::new(apex.0 + half_base, apex.1 + height),
        ];
        draw_polygon_mut(&mut img, &pts, Luma([0]));
        img
    }

    #[test]
    fn finds_solid_delta() {
        let img = tile_with_triangle(200, (100, 50), 30, 50);
        let found = detect_triangles(&img, &DetectorParams::default(), "t");
        assert!(!found.is_empty());
        let tri = &found[0];
        let (cx, cy) = tri.bbox.center();
        assert!((cx - 100.0).abs() < 10.0);
        assert!((cy - 75.0).abs() < 15.0);
        assert!((tri.geo_confidence - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_tiny_specks() {
        let img = tile_with_triangle(200, (100, 95), 3, 5);
        assert!(detect_triangles(&img, &DetectorParams::default(), "t").is_empty());
    }

    #[test]
    fn rejects_elongated_shapes() {
        let mut img = GrayImage::from_pixel(400, 200, Luma([255]));
        let pts = [
            Point::new(20, 100),
            Point::new(110, 92),
            Point::new(110, 112),
        ];
        draw_polygon_mut(&mut img, &pts, Luma([0]));
        // ~90x20 box: aspect 4.3, outside the window
        assert!(detect_triangles(&img, &DetectorParams::default(), "t").is_empty());
    }

    #[test]
    fn shoelace_of_right_triangle() {
        let pts = [Point::new(0, 0), Point::new(10, 0), Point::new(0, 10)];
        assert!((polygon_area(&pts) - 50.0).abs() < f64::EPSILON);
    }
}
