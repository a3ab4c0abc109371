//! Tile Priority Queues
//!
//! Short-lived, read-only views over a snapshot of layers. Build one, drain
//! it, then drop it before mutating any tile.

mod eviction;
mod phase;
mod raster;

pub use eviction::{EvictionQueue, TilingSetEvictionQueue};
pub use raster::{
    RasterQueue, RasterQueueAll, RasterQueueRequired, RasterQueueType, TilingSetRasterQueueAll,
    TilingSetRasterQueueRequired,
};
