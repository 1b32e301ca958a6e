//! Circle detection: Canny edges + a Hough-gradient transform.
//!
//! The transform votes along the Sobel gradient direction of every edge
//! pixel, so a circle's rim concentrates votes at its center regardless of
//! the text drawn inside the bubble. Three parameter passes with different
//! sensitivity and radius bands reach small faint circles, ordinary
//! callouts, and the larger section markers.

use image::GrayImage;
use imageproc::edges::canny;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use plansight_tile_utils::PixelRect;

use super::DetectorParams;
use crate::markers::{Candidate, DetectionMethod};

const CANNY_LOW: f32 = 30.0;
const CANNY_HIGH: f32 = 100.0;

/// Gradient magnitude below which an edge pixel casts no votes.
const MIN_GRADIENT: f64 = 20.0;

/// One sensitivity/band pass of the transform.
struct HoughPass {
    method: DetectionMethod,
    /// Accumulator votes needed to call a cell a circle center.
    votes: u32,
    /// Radius band as fractions of the configured maximum radius; the lower
    /// bound is additionally clamped to the configured minimum.
    band: (f64, f64),
}

/// Small faint circles, ordinary callouts, large section markers.
const PASSES: [HoughPass; 3] = [
    HoughPass {
        method: DetectionMethod::HoughFaint,
        votes: 15,
        band: (0.0, 0.55),
    },
    HoughPass {
        method: DetectionMethod::HoughStandard,
        votes: 25,
        band: (0.0, 1.0),
    },
    HoughPass {
        method: DetectionMethod::HoughLarge,
        votes: 30,
        band: (0.6, 1.4),
    },
];

/// Minimum distance between two accepted centers within a pass.
const MIN_CENTER_DIST: u32 = 20;

pub(super) fn detect_circles(
    gray: &GrayImage,
    params: &DetectorParams,
    tile_id: &str,
) -> Vec<Candidate> {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return Vec::new();
    }

    let edges = canny(gray, CANNY_LOW, CANNY_HIGH);
    let gx = horizontal_sobel(gray);
    let gy = vertical_sobel(gray);

    // Edge pixels with their unit gradient direction, shared by all passes.
    let mut edge_points = Vec::new();
    for (x, y, p) in edges.enumerate_pixels() {
        if p.0[0] == 0 {
            continue;
        }
        let dx = f64::from(gx.get_pixel(x, y).0[0]);
        let dy = f64::from(gy.get_pixel(x, y).0[0]);
        let mag = dx.hypot(dy);
        if mag >= MIN_GRADIENT {
            edge_points.push((x as i32, y as i32, dx / mag, dy / mag));
        }
    }
    if edge_points.is_empty() {
        return Vec::new();
    }

    let scale = params.scale();
    let r_lo = f64::from(params.circle_min_radius) * scale;
    let r_hi = f64::from(params.circle_max_radius) * scale;
    let min_dist = ((f64::from(MIN_CENTER_DIST) * scale) as u32).max(1);

    let mut candidates = Vec::new();
    for pass in &PASSES {
        let min_radius = ((r_hi * pass.band.0).max(r_lo).round() as u32).max(3);
        let max_radius = ((r_hi * pass.band.1).round() as u32).max(min_radius + 1);
        for (cx, cy, r) in hough_gradient(
            &edge_points,
            width,
            height,
            min_radius,
            max_radius,
            pass.votes,
            min_dist,
        ) {
            let r = r as i32;
            candidates.push(Candidate {
                bbox: PixelRect::new(cx - r, cy - r, (2 * r) as u32, (2 * r) as u32),
                shape_kind: pass.method.shape_kind(),
                method: pass.method,
                geo_confidence: pass.method.confidence(),
                source_tile: tile_id.to_string(),
            });
        }
    }
    candidates
}

/// The Hough-gradient accumulator: every edge pixel votes along ± its
/// gradient direction for each radius in the band; cells collecting at
/// least `min_votes` become centers, then the radius is recovered from the
/// distance histogram of nearby edge pixels.
fn hough_gradient(
    edge_points: &[(i32, i32, f64, f64)],
    width: u32,
    height: u32,
    min_radius: u32,
    max_radius: u32,
    min_votes: u32,
    min_center_dist: u32,
) -> Vec<(i32, i32, u32)> {
    let (w, h) = (width as usize, height as usize);
    let mut acc = vec![0u32; w * h];

    let radius_step = 2;
    for &(x, y, dx, dy) in edge_points {
        let mut r = min_radius;
        while r <= max_radius {
            let rf = f64::from(r);
            for sign in [-1.0, 1.0] {
                let cx = (f64::from(x) + sign * dx * rf).round() as i32;
                let cy = (f64::from(y) + sign * dy * rf).round() as i32;
                if cx >= 0 && cy >= 0 && (cx as usize) < w && (cy as usize) < h {
                    acc[cy as usize * w + cx as usize] += 1;
                }
            }
            r += radius_step;
        }
    }

    // Peak extraction: strongest cells first, enforcing center separation.
    let mut peaks: Vec<(u32, i32, i32)> = Vec::new();
    for yy in 0..h {
        for xx in 0..w {
            let votes = acc[yy * w + xx];
            if votes >= min_votes && is_local_max(&acc, w, h, xx, yy) {
                peaks.push((votes, xx as i32, yy as i32));
            }
        }
    }
    peaks.sort_unstable_by(|a, b| b.0.cmp(&a.0));

    let min_dist_sq = i64::from(min_center_dist) * i64::from(min_center_dist);
    let mut centers: Vec<(i32, i32)> = Vec::new();
    let mut circles = Vec::new();
    for (_, cx, cy) in peaks {
        let separated = centers.iter().all(|&(px, py)| {
            let ddx = i64::from(px - cx);
            let ddy = i64::from(py - cy);
            ddx * ddx + ddy * ddy >= min_dist_sq
        });
        if !separated {
            continue;
        }
        if let Some(radius) = estimate_radius(edge_points, cx, cy, min_radius, max_radius) {
            centers.push((cx, cy));
            circles.push((cx, cy, radius));
        }
    }
    circles
}

fn is_local_max(acc: &[u32], w: usize, h: usize, x: usize, y: usize) -> bool {
    let votes = acc[y * w + x];
    for dy in -1i64..=1 {
        for dx in -1i64..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let nx = x as i64 + dx;
            let ny = y as i64 + dy;
            if nx >= 0 && ny >= 0 && (nx as usize) < w && (ny as usize) < h {
                let neighbor = acc[ny as usize * w + nx as usize];
                // strictly-greater on one side keeps plateau peaks
                if neighbor > votes || (neighbor == votes && (dy < 0 || (dy == 0 && dx < 0))) {
                    return false;
                }
            }
        }
    }
    true
}

/// Mode of the center-to-edge distance histogram, requiring enough support
/// to plausibly be a rim rather than scattered linework.
fn estimate_radius(
    edge_points: &[(i32, i32, f64, f64)],
    cx: i32,
    cy: i32,
    min_radius: u32,
    max_radius: u32,
) -> Option<u32> {
    let bins = (max_radius - min_radius + 1) as usize;
    let mut histogram = vec![0u32; bins];
    for &(x, y, _, _) in edge_points {
        let dist = f64::from(x - cx).hypot(f64::from(y - cy));
        let r = dist.round() as i64;
        if r >= i64::from(min_radius) && r <= i64::from(max_radius) {
            histogram[(r - i64::from(min_radius)) as usize] += 1;
        }
    }
    let (best_bin, &support) = histogram
        .iter()
        .enumerate()
        .max_by_key(|&(_, &count)| count)?;
    let radius = min_radius + best_bin as u32;
    // a real rim covers a reasonable share of the circumference
    let circumference = 2.0 * std::f64::consts::PI * f64::from(radius);
    (f64::from(support) >= circumference * 0.25).then_some(radius)
}
