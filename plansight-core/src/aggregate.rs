//! Translating markers to page coordinates and de-duplicating tile-overlap
//! doubles.
//!
//! Neighboring tiles share an overlap band, so a callout sitting on a tile
//! boundary is detected twice. Two markers are the same callout when their
//! normalized text is equal and their centers are closer than a fraction of
//! the page height (callout symbols have a roughly fixed physical size).

use std::collections::HashMap;

use log::warn;

use crate::markers::Marker;
use crate::text::normalize;
use crate::tiles::PageTile;

/// Default dedup radius as a fraction of page height, reflecting a typical
/// symbol diameter on a full sheet.
pub const DEDUP_RADIUS_FRACTION: f64 = 0.067;

/// Where a tile sits on the page and when it was produced.
#[derive(Debug, Clone, Copy)]
pub struct TilePlacement {
    /// Tile origin in page pixels.
    pub offset_x: u32,
    /// Tile origin in page pixels.
    pub offset_y: u32,
    /// Emission order of the tile; used as a deterministic tie-break.
    pub order: usize,
}

/// Builds the placement index the aggregator needs from produced tiles.
#[must_use]
pub fn placements_of(tiles: &[PageTile]) -> HashMap<String, TilePlacement> {
    tiles
        .iter()
        .enumerate()
        .map(|(order, tile)| {
            (
                tile.id.clone(),
                TilePlacement {
                    offset_x: tile.offset_x,
                    offset_y: tile.offset_y,
                    order,
                },
            )
        })
        .collect()
}

/// Page height in pixels implied by a tile set.
#[must_use]
pub fn page_height_of(tiles: &[PageTile]) -> u32 {
    tiles
        .iter()
        .map(|t| t.offset_y + t.image.height())
        .max()
        .unwrap_or(0)
}

/// Translates, de-duplicates and orders one page's markers.
///
/// Among duplicates the highest-confidence marker wins; ties break on the
/// earlier source tile. The final order is top-to-bottom, left-to-right by
/// bbox center.
#[must_use]
pub fn aggregate(
    markers: Vec<Marker>,
    placements: &HashMap<String, TilePlacement>,
    page_height: u32,
    dedup_radius_fraction: f64,
) -> Vec<Marker> {
    let translated = to_page_coordinates(markers, placements);
    let radius = f64::from(page_height) * dedup_radius_fraction;
    let mut deduped = dedup(translated, placements, radius);
    deduped.sort_by(|a, b| {
        let (ax, ay) = a.bbox.center();
        let (bx, by) = b.bbox.center();
        ay.total_cmp(&by).then(ax.total_cmp(&bx))
    });
    deduped
}

/// Replaces each marker's tile-local bbox by its page-space bbox.
fn to_page_coordinates(
    markers: Vec<Marker>,
    placements: &HashMap<String, TilePlacement>,
) -> Vec<Marker> {
    markers
        .into_iter()
        .map(|mut marker| {
            if let Some(placement) = placements.get(&marker.source_tile) {
                marker.bbox = marker
                    .bbox
                    .translate(placement.offset_x as i32, placement.offset_y as i32);
            } else {
                warn!(
                    "marker {} references unknown tile {}, leaving coordinates tile-local",
                    marker.text, marker.source_tile
                );
            }
            marker
        })
        .collect()
}

fn dedup(
    markers: Vec<Marker>,
    placements: &HashMap<String, TilePlacement>,
    radius: f64,
) -> Vec<Marker> {
    let order_of =
        |marker: &Marker| placements.get(&marker.source_tile).map_or(usize::MAX, |p| p.order);

    // winners first: higher confidence, then earlier tile
    let mut ranked = markers;
    ranked.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| order_of(a).cmp(&order_of(b)))
    });

    let mut kept: Vec<Marker> = Vec::with_capacity(ranked.len());
    for marker in ranked {
        let text = normalize(&marker.text);
        let duplicate = kept.iter().any(|existing| {
            normalize(&existing.text) == text && existing.bbox.center_distance(&marker.bbox) < radius
        });
        if !duplicate {
            kept.push(marker);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::markers::MarkerKind;
    use plansight_tile_utils::PixelRect;

    fn marker(text: &str, tile: &str, bbox: PixelRect, confidence: f64) -> Marker {
        let (detail, sheet) = text.split_once('/').unwrap();
        Marker {
            text: text.into(),
            detail: detail.into(),
            sheet: sheet.into(),
            kind: MarkerKind::Circular,
            confidence,
            is_valid: true,
            fuzzy_matched: false,
            original_sheet: None,
            edit_distance: None,
            bbox,
            source_tile: tile.into(),
        }
    }

    fn two_tile_placements() -> HashMap<String, TilePlacement> {
        HashMap::from([
            (
                "tile_0_0.png".to_string(),
                TilePlacement {
                    offset_x: 0,
                    offset_y: 0,
                    order: 0,
                },
            ),
            (
                "tile_1638_0.png".to_string(),
                TilePlacement {
                    offset_x: 1638,
                    offset_y: 0,
                    order: 1,
                },
            ),
        ])
    }

    #[test]
    fn translates_to_page_coordinates() {
        let placements = two_tile_placements();
        let out = aggregate(
            vec![marker(
                "3/A7",
                "tile_1638_0.png",
                PixelRect::new(10, 20, 40, 40),
                0.9,
            )],
            &placements,
            2048,
            DEDUP_RADIUS_FRACTION,
        );
        assert_eq!(out[0].bbox, PixelRect::new(1648, 20, 40, 40));
    }

    #[test]
    fn overlap_double_collapses_to_one() {
        // the same bubble near the shared boundary, seen by both tiles
        let placements = two_tile_placements();
        let out = aggregate(
            vec![
                marker("3/A7", "tile_0_0.png", PixelRect::new(1700, 100, 40, 40), 0.92),
                marker("3/A7", "tile_1638_0.png", PixelRect::new(62, 100, 40, 40), 0.9),
            ],
            &placements,
            2048,
            DEDUP_RADIUS_FRACTION,
        );
        assert_eq!(out.len(), 1);
        // highest confidence wins
        assert_eq!(out[0].source_tile, "tile_0_0.png");
    }

    #[test]
    fn same_text_far_apart_is_two_markers() {
        let placements = two_tile_placements();
        let out = aggregate(
            vec![
                marker("3/A7", "tile_0_0.png", PixelRect::new(0, 0, 40, 40), 0.9),
                marker("3/A7", "tile_0_0.png", PixelRect::new(0, 1500, 40, 40), 0.9),
            ],
            &placements,
            2048,
            DEDUP_RADIUS_FRACTION,
        );
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn different_text_nearby_is_kept() {
        let placements = two_tile_placements();
        let out = aggregate(
            vec![
                marker("3/A7", "tile_0_0.png", PixelRect::new(100, 100, 40, 40), 0.9),
                marker("4/A7", "tile_0_0.png", PixelRect::new(110, 100, 40, 40), 0.9),
            ],
            &placements,
            2048,
            DEDUP_RADIUS_FRACTION,
        );
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn confidence_tie_breaks_on_earlier_tile() {
        let placements = two_tile_placements();
        let out = aggregate(
            vec![
                marker("3/A7", "tile_1638_0.png", PixelRect::new(62, 100, 40, 40), 0.9),
                marker("3/A7", "tile_0_0.png", PixelRect::new(1700, 100, 40, 40), 0.9),
            ],
            &placements,
            2048,
            DEDUP_RADIUS_FRACTION,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source_tile, "tile_0_0.png");
    }

    #[test]
    fn output_is_reading_order() {
        let placements = two_tile_placements();
        let out = aggregate(
            vec![
                marker("5/A7", "tile_0_0.png", PixelRect::new(900, 900, 40, 40), 0.9),
                marker("1/A7", "tile_0_0.png", PixelRect::new(50, 50, 40, 40), 0.9),
                marker("2/A7", "tile_0_0.png", PixelRect::new(800, 50, 40, 40), 0.9),
            ],
            &placements,
            2048,
            DEDUP_RADIUS_FRACTION,
        );
        let texts: Vec<&str> = out.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["1/A7", "2/A7", "5/A7"]);
    }

    #[test]
    fn page_height_from_tiles() {
        let tiles = crate::tiles::cut_tiles(&image::DynamicImage::new_luma8(4000, 3000), 2048, 0.2)
            .unwrap();
        assert_eq!(page_height_of(&tiles), 3000);
    }
}
