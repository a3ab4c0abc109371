//! Tiling Settings
//!
//! Tunables shared by every tiling of a layer tree, plus the memory and
//! scheduling limits used by the tile manager.

use crate::geometry::Size;

/// Layer tiling configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TilingSettings {
    /// Tile size for tiled layers
    pub default_tile_size: Size,
    /// Largest layer drawn as a single tile
    pub max_untiled_layer_size: Size,
    /// Single-tile layers are rounded up to this multiple
    pub tile_round_up_multiple: i32,
    /// Hard cap on a tile dimension
    pub max_texture_size: i32,
    /// Screen pixels of padding around the visible rect that may hold tiles
    pub tiling_interest_area_padding: i32,
    /// How far ahead scrolling is extrapolated
    pub skewport_target_time_in_seconds: f32,
    /// Cap on the skewport extrapolation in screen pixels
    pub skewport_extrapolation_limit_in_screen_pixels: i32,
    /// Soon border cap in screen pixels
    pub max_soon_border_in_screen_pixels: f32,
    /// Soon border as a fraction of the larger visible dimension
    pub soon_border_viewport_fraction: f32,
    pub minimum_contents_scale: f32,
    pub low_res_contents_scale_factor: f32,
    pub create_low_res_tiling: bool,
    /// Ratio within which an existing tiling is reused during pinch
    pub max_snap_ratio: f32,
    /// Zoom change that triggers a new tiling during pinch
    pub pinch_rescale_ratio: f32,
    /// Track the instantaneous scale during transform animations
    pub rerasterize_during_scale_animation: bool,
}

impl Default for TilingSettings {
    fn default() -> Self {
        Self {
            default_tile_size: Size::new(256, 256),
            max_untiled_layer_size: Size::new(512, 512),
            tile_round_up_multiple: 64,
            max_texture_size: 4096,
            tiling_interest_area_padding: 3000,
            skewport_target_time_in_seconds: 1.0,
            skewport_extrapolation_limit_in_screen_pixels: 2000,
            max_soon_border_in_screen_pixels: 312.0,
            soon_border_viewport_fraction: 0.15,
            minimum_contents_scale: 0.0625,
            low_res_contents_scale_factor: 0.25,
            create_low_res_tiling: true,
            max_snap_ratio: 1.2,
            pinch_rescale_ratio: 2.0,
            rerasterize_during_scale_animation: false,
        }
    }
}

/// Tile manager configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TileManagerSettings {
    /// Bytes of rastered content allowed at once
    pub memory_limit_bytes: usize,
    /// Raster tasks issued per `prepare_tiles` call
    pub max_tasks_per_prepare: usize,
    /// Pooled buffers kept per tile size
    pub max_pooled_buffers_per_size: usize,
}

impl Default for TileManagerSettings {
    fn default() -> Self {
        Self {
            memory_limit_bytes: 64 * 1024 * 1024,
            max_tasks_per_prepare: 32,
            max_pooled_buffers_per_size: 32,
        }
    }
}
