#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod grid;
pub use grid::{GridError, TileGrid};
mod rect;
pub use rect::PixelRect;
