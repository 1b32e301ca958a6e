//! Cutting a rendered page into overlapping tiles.

use image::{DynamicImage, GenericImage as _, Rgba, RgbaImage};
use plansight_tile_utils::TileGrid;

use super::{PageTile, TileError};

/// Cuts a page image into overlapping `tile_size`-square tiles.
///
/// Edge tiles are right/bottom aligned to the page so interior tiles never
/// need padding. A page smaller than one tile yields a single tile padded
/// to `tile_size` with white fill, since drawings are dark linework on a
/// light background.
pub fn cut_tiles(
    page: &DynamicImage,
    tile_size: u32,
    overlap: f64,
) -> Result<Vec<PageTile>, TileError> {
    let (width, height) = (page.width(), page.height());
    let grid = TileGrid::new(width, height, tile_size, overlap)?;

    let mut tiles = Vec::with_capacity(grid.len());
    for &(x, y) in grid.offsets() {
        let image = if width >= tile_size && height >= tile_size {
            page.crop_imm(x, y, tile_size, tile_size)
        } else {
            pad_to(page, tile_size)
        };
        tiles.push(PageTile::new(x, y, image));
    }
    Ok(tiles)
}

/// Pastes an undersized page onto a white `size`×`size` canvas.
fn pad_to(page: &DynamicImage, size: u32) -> DynamicImage {
    let mut canvas = RgbaImage::from_pixel(size, size, Rgba([255, 255, 255, 255]));
    let rgba = page.to_rgba8();
    // copy_from cannot fail: the page is strictly smaller than the canvas
    let _ = canvas.copy_from(&rgba, 0, 0);
    DynamicImage::ImageRgba8(canvas)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_page(width: u32, height: u32) -> DynamicImage {
        DynamicImage::new_luma8(width, height)
    }

    #[test]
    fn page_smaller_than_tile_yields_one_padded_tile() {
        let tiles = cut_tiles(&gray_page(500, 300), 2048, 0.2).unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].dimensions(), (2048, 2048));
        assert_eq!((tiles[0].offset_x, tiles[0].offset_y), (0, 0));
        // padding is white
        let gray = tiles[0].gray();
        assert_eq!(gray.get_pixel(2047, 2047).0[0], 255);
    }

    #[test]
    fn large_page_is_fully_covered() {
        let tiles = cut_tiles(&gray_page(5000, 5000), 2048, 0.2).unwrap();
        assert!(tiles.len() > 4);
        for tile in &tiles {
            assert_eq!(tile.dimensions(), (2048, 2048));
            assert!(tile.offset_x + 2048 <= 5000);
            assert!(tile.offset_y + 2048 <= 5000);
        }
        // bottom-right aligned tile exists
        assert!(
            tiles
                .iter()
                .any(|t| t.offset_x == 5000 - 2048 && t.offset_y == 5000 - 2048)
        );
    }

    #[test]
    fn neighbor_tiles_overlap() {
        let tiles = cut_tiles(&gray_page(4096, 2048), 2048, 0.2).unwrap();
        let mut xs: Vec<u32> = tiles.iter().map(|t| t.offset_x).collect();
        xs.sort_unstable();
        xs.dedup();
        assert!(xs.windows(2).all(|w| w[1] - w[0] < 2048));
    }

    #[test]
    fn tile_ids_encode_offsets() {
        let tiles = cut_tiles(&gray_page(4096, 4096), 2048, 0.2).unwrap();
        for tile in &tiles {
            assert_eq!(
                super::super::parse_tile_offsets(&tile.id),
                Some((tile.offset_x, tile.offset_y))
            );
        }
    }
}
