//! fOS Tiles - Tile Cache and Raster Scheduling
//!
//! Splits picture layers into grids of tiles at one or more contents
//! scales and decides which tiles to raster, keep, or evict.
//!
//! This crate provides:
//! - Tilings with visible, skewport, soon-border and eventually rects
//! - Tiling sets with the raster-scale policy (pinch, animation, snapping)
//! - Pending/active tile sharing across commit and activation
//! - Raster queues (all, required for activation, required for draw)
//! - Eviction queue ordered as the inverse of raster priority
//! - Tile manager with a memory budget and a CPU raster worker

pub mod client;
pub mod error;
pub mod geometry;
pub mod layer;
pub mod occlusion;
pub mod priority;
pub mod queue;
pub mod raster;
pub mod raster_scale;
pub mod raster_source;
pub mod resource_pool;
pub mod settings;
pub mod tile;
pub mod tile_manager;
pub mod tiling;
pub mod tiling_data;
pub mod tiling_set;

pub use client::{calculate_tile_size, FixedTileSizeClient, LayerTilingClient, TilingClient};
pub use error::{RasterError, TilingError};
pub use geometry::{Rect, RectF, Region, Size};
pub use layer::{FrameInputs, LayerId, LayerPair, PictureLayer};
pub use occlusion::Occlusion;
pub use priority::{PrioritizedTile, PriorityBin, PriorityRectType, TilePriority, TileResolution, Tree, TreePriority};
pub use queue::{EvictionQueue, RasterQueue, RasterQueueType};
pub use raster::{
    rasterize, rasterize_tasks_parallel, RasterCompletion, RasterContent, RasterOutcome, RasterOutput, RasterTask,
    RasterTaskId,
};
pub use raster_scale::{RasterScales, ScaleInputs};
pub use raster_source::{RasterSource, RecordedRasterSource};
pub use resource_pool::{ResourcePool, ResourcePoolStats};
pub use settings::{TileManagerSettings, TilingSettings};
pub use tile::{DrawMode, ResourceId, Tile, TileCreateInfo, TileDrawInfo, TileId, TileInvalidation, TileKey};
pub use tile_manager::{TileManager, TileManagerStats};
pub use tiling::{PictureLayerTiling, TilingContext};
pub use tiling_data::{IndexRange, TileIndex, TilingData};
pub use tiling_set::{TilingRangeType, TilingSet};

/// Color (RGBA)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255, a: 255 };
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0, a: 255 };
    pub const TRANSPARENT: Color = Color { r: 0, g: 0, b: 0, a: 0 };
    pub const RED: Color = Color { r: 255, g: 0, b: 0, a: 255 };
    pub const GREEN: Color = Color { r: 0, g: 255, b: 0, a: 255 };
    pub const BLUE: Color = Color { r: 0, g: 0, b: 255, a: 255 };

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn is_opaque(&self) -> bool {
        self.a == 255
    }
}
