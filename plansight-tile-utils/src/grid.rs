//! Overlapping tile grid over a raster page.
//!
//! Detectors operate on bounded inputs, so a rendered page is cut into
//! `tile_size`-square crops with a stride smaller than the tile so that
//! neighbors share an overlap band. Edge tiles are right/bottom aligned to
//! the page instead of being padded; only a page smaller than one tile
//! produces a padded tile.

use thiserror::Error;

/// Errors constructing a [`TileGrid`].
#[derive(Debug, Error)]
pub enum GridError {
    /// The overlap fraction must leave a positive stride.
    #[error("tile overlap must be in [0, 1), got {0}")]
    InvalidOverlap(f64),

    /// Zero-sized tiles cannot cover anything.
    #[error("tile size must be positive")]
    ZeroTileSize,
}

/// The set of tile origins covering a `width`×`height` page.
///
/// Offsets are produced in row-major order: the regular grid first, then a
/// right-aligned column, a bottom-aligned row, and a bottom-right tile when
/// the regular grid does not end flush with the page. Duplicate origins are
/// removed.
///
/// # Examples
///
/// ```
/// # use plansight_tile_utils::TileGrid;
/// let grid = TileGrid::new(4096, 4096, 2048, 0.2).unwrap();
/// assert_eq!(grid.stride(), 1638);
/// // every pixel of the page is inside at least one tile
/// assert!(grid.offsets().iter().any(|&(x, y)| x + 2048 == 4096 && y + 2048 == 4096));
/// ```
#[derive(Debug, Clone)]
pub struct TileGrid {
    tile_size: u32,
    stride: u32,
    offsets: Vec<(u32, u32)>,
}

impl TileGrid {
    /// Builds the grid for a page of the given size.
    ///
    /// `overlap` is the fraction of the tile shared with each neighbor; the
    /// stride is `⌊tile_size · (1 − overlap)⌋`. A page smaller than one tile
    /// yields a single origin at `(0, 0)` (the caller pads the crop).
    pub fn new(width: u32, height: u32, tile_size: u32, overlap: f64) -> Result<Self, GridError> {
        if tile_size == 0 {
            return Err(GridError::ZeroTileSize);
        }
        if !(0.0..1.0).contains(&overlap) {
            return Err(GridError::InvalidOverlap(overlap));
        }
        let stride = (f64::from(tile_size) * (1.0 - overlap)).floor() as u32;
        let stride = stride.max(1);

        let xs = axis_offsets(width, tile_size, stride);
        let ys = axis_offsets(height, tile_size, stride);

        let mut offsets = Vec::with_capacity(xs.len() * ys.len());
        for &y in &ys {
            for &x in &xs {
                if !offsets.contains(&(x, y)) {
                    offsets.push((x, y));
                }
            }
        }

        Ok(Self {
            tile_size,
            stride,
            offsets,
        })
    }

    /// The tile edge length in pixels.
    #[must_use]
    pub const fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Distance between neighboring tile origins.
    #[must_use]
    pub const fn stride(&self) -> u32 {
        self.stride
    }

    /// Tile origins in emission order.
    #[must_use]
    pub fn offsets(&self) -> &[(u32, u32)] {
        &self.offsets
    }

    /// Number of tiles in the grid.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// True when the grid is empty (never the case for a valid grid).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Offsets along one axis: the regular stride walk plus one end-aligned
/// offset when the walk does not finish flush with the page edge.
fn axis_offsets(extent: u32, tile: u32, stride: u32) -> Vec<u32> {
    if extent <= tile {
        return vec![0];
    }
    let mut offsets = Vec::new();
    let mut pos = 0;
    while pos + tile <= extent {
        offsets.push(pos);
        pos += stride;
    }
    let last = extent - tile;
    if offsets.last() != Some(&last) {
        offsets.push(last);
    }
    offsets
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    /// Every pixel must land in at least one tile.
    fn assert_covers(grid: &TileGrid, width: u32, height: u32) {
        let t = grid.tile_size();
        for px in [0, width / 2, width.saturating_sub(1)] {
            for py in [0, height / 2, height.saturating_sub(1)] {
                let covered = grid
                    .offsets()
                    .iter()
                    .any(|&(x, y)| px >= x && px < x + t && py >= y && py < y + t);
                assert!(covered, "pixel ({px},{py}) uncovered");
            }
        }
    }

    #[test]
    fn stride_from_overlap() {
        let grid = TileGrid::new(8192, 8192, 2048, 0.2).unwrap();
        assert_eq!(grid.stride(), 1638);
    }

    #[rstest]
    #[case(4096, 4096)]
    #[case(10_000, 10_000)]
    #[case(5000, 3000)]
    #[case(2049, 2049)]
    fn covers_page(#[case] width: u32, #[case] height: u32) {
        let grid = TileGrid::new(width, height, 2048, 0.2).unwrap();
        assert_covers(&grid, width, height);
        // all tiles fit inside the page
        for &(x, y) in grid.offsets() {
            assert!(x + 2048 <= width && y + 2048 <= height);
        }
    }

    #[test]
    fn small_page_single_tile() {
        let grid = TileGrid::new(500, 300, 2048, 0.2).unwrap();
        assert_eq!(grid.offsets(), &[(0, 0)]);
    }

    #[test]
    fn exact_multiple_has_no_duplicate_edge_tiles() {
        // stride 1024, page 3072: the regular walk already ends flush at
        // offset 1024, so no end-aligned duplicate may be appended
        let grid = TileGrid::new(3072, 3072, 2048, 0.5).unwrap();
        let mut seen = grid.offsets().to_vec();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), grid.len());
    }

    #[test]
    fn bottom_right_tile_present() {
        let grid = TileGrid::new(5000, 5000, 2048, 0.2).unwrap();
        assert!(grid.offsets().contains(&(2952, 2952)));
    }

    #[test]
    fn rejects_bad_overlap() {
        assert!(matches!(
            TileGrid::new(100, 100, 64, 1.0),
            Err(GridError::InvalidOverlap(_))
        ));
        assert!(matches!(
            TileGrid::new(100, 100, 0, 0.2),
            Err(GridError::ZeroTileSize)
        ));
    }
}
