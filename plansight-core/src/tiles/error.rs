//! Error types for tile production and intake.

/// Errors producing or decoding page tiles.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum TileError {
    /// The tile grid parameters are unusable.
    #[error(transparent)]
    Grid(#[from] plansight_tile_utils::GridError),

    /// A supplied tile image could not be decoded.
    #[error("couldn't decode tile {1}: {0}")]
    UndecodableTile(#[source] image::ImageError, String),
}
