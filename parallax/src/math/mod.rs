//! Geometry primitives: 3x3 matrices, integer pixel boxes and disparity
//! search ranges.

pub mod bbox;
pub mod dmat3;
pub mod range;

pub use bbox::{PixelBox, Tile, grid_dims, tile_grid};
pub use dmat3::DMat3;
pub use range::SearchRange;
