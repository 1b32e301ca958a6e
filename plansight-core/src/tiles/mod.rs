//! Page tiles: fixed-size crops of a rendered drawing page.
//!
//! Tiles exist so the detectors always operate on bounded inputs. Each tile
//! remembers where it came from (`offset_x`/`offset_y` in page pixels) so
//! the aggregator can translate detections back into page coordinates.

mod error;
mod producer;

use std::sync::LazyLock;

use image::{DynamicImage, GrayImage};
use regex::Regex;

pub use error::TileError;
pub use producer::cut_tiles;

/// A rectangular crop of a page image.
#[derive(Debug, Clone)]
pub struct PageTile {
    /// Stable identifier, also used as the `source_tile` of candidates.
    pub id: String,
    /// Left edge of the tile in page pixels.
    pub offset_x: u32,
    /// Top edge of the tile in page pixels.
    pub offset_y: u32,
    /// The pixel data.
    pub image: DynamicImage,
}

impl PageTile {
    /// Builds a tile with the canonical `tile_{x}_{y}.png` identifier.
    #[must_use]
    pub fn new(offset_x: u32, offset_y: u32, image: DynamicImage) -> Self {
        Self {
            id: format!("tile_{offset_x}_{offset_y}.png"),
            offset_x,
            offset_y,
            image,
        }
    }

    /// Builds a tile from an externally supplied image, recovering the page
    /// offset from the filename when it follows the `..._{x}_{y}.{ext}`
    /// convention. Unparseable names get offset `(0, 0)`.
    #[must_use]
    pub fn from_named_image(filename: &str, image: DynamicImage) -> Self {
        let (offset_x, offset_y) = parse_tile_offsets(filename).unwrap_or_else(|| {
            log::warn!("tile filename {filename:?} has no _x_y offsets, assuming (0, 0)");
            (0, 0)
        });
        Self {
            id: filename.to_string(),
            offset_x,
            offset_y,
            image,
        }
    }

    /// Grayscale view used by the detectors.
    #[must_use]
    pub fn gray(&self) -> GrayImage {
        self.image.to_luma8()
    }

    /// Tile dimensions in pixels.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}

static TILE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(\d+)_(\d+)\.[A-Za-z]+$").unwrap()
});

/// Extracts `(x, y)` page offsets from a `..._{x}_{y}.{ext}` tile filename.
#[must_use]
pub fn parse_tile_offsets(filename: &str) -> Option<(u32, u32)> {
    let caps = TILE_NAME_RE.captures(filename)?;
    let x = caps[1].parse().ok()?;
    let y = caps[2].parse().ok()?;
    Some((x, y))
}
