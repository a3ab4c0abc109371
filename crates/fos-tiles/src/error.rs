//! Tiling Errors

use crate::geometry::Rect;
use crate::priority::Tree;
use crate::raster::RasterTaskId;
use crate::tile::TileId;
use crate::tiling_data::TileIndex;

/// Errors building or resizing tilings
#[derive(Debug, thiserror::Error)]
pub enum TilingError {
    #[error("Invalid contents scale: {0}")]
    InvalidScale(f32),

    #[error("Empty content bounds {width}x{height} at scale {scale}")]
    EmptyContentBounds { scale: f32, width: i32, height: i32 },

    #[error("Tiling already exists at scale {0}")]
    DuplicateScale(f32),

    #[error("Invalid tile size {width}x{height}")]
    InvalidTileSize { width: i32, height: i32 },
}

/// Errors applying raster results back to tiles
#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("No {tree:?} tile at {index:?} (scale {contents_scale}) on layer {layer}")]
    TileNotFound {
        layer: u32,
        tree: Tree,
        contents_scale: f32,
        index: TileIndex,
    },

    #[error("Stale completion for task {task} on tile {tile}")]
    StaleCompletion { task: RasterTaskId, tile: TileId },

    #[error("Tile {found} replaced tile {expected} before raster finished")]
    TileMismatch { expected: TileId, found: TileId },

    #[error("Raster target {0:?} is empty or too large")]
    InvalidTarget(Rect),
}
