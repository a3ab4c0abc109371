//! Tiling Client
//!
//! The per-layer callbacks a tiling needs from its owner: tile sizing, tile
//! construction and the layer's current drawing state.

use std::cell::Cell;

use crate::geometry::Size;
use crate::settings::TilingSettings;
use crate::tile::{Tile, TileCreateInfo};

/// Layer-level services a tiling calls back into
pub trait TilingClient: std::fmt::Debug {
    /// Tile size to use for a tiling with the given content bounds
    fn calculate_tile_size(&self, content_bounds: Size) -> Size;

    /// False while the layer is hidden or has no meaningful draw properties
    fn has_valid_tile_priorities(&self) -> bool;

    /// Every visible tile must be high-res before activation
    fn requires_high_res_to_draw(&self) -> bool;

    /// Construct a tile for a newly live cell
    fn create_tile(&self, info: &TileCreateInfo) -> Tile {
        Tile::new(info)
    }
}

/// Client used for picture layers in a running tree
#[derive(Debug)]
pub struct LayerTilingClient {
    settings: TilingSettings,
    has_valid_tile_priorities: Cell<bool>,
    requires_high_res_to_draw: Cell<bool>,
}

impl LayerTilingClient {
    pub fn new(settings: TilingSettings) -> Self {
        Self {
            settings,
            has_valid_tile_priorities: Cell::new(true),
            requires_high_res_to_draw: Cell::new(false),
        }
    }

    pub fn set_has_valid_tile_priorities(&self, valid: bool) {
        self.has_valid_tile_priorities.set(valid);
    }

    pub fn set_requires_high_res_to_draw(&self, required: bool) {
        self.requires_high_res_to_draw.set(required);
    }
}

impl TilingClient for LayerTilingClient {
    fn calculate_tile_size(&self, content_bounds: Size) -> Size {
        calculate_tile_size(&self.settings, content_bounds)
    }

    fn has_valid_tile_priorities(&self) -> bool {
        self.has_valid_tile_priorities.get()
    }

    fn requires_high_res_to_draw(&self) -> bool {
        self.requires_high_res_to_draw.get()
    }
}

/// Client with a fixed tile size, for tests and fixed-grid embedders
#[derive(Debug)]
pub struct FixedTileSizeClient {
    tile_size: Size,
    has_valid_tile_priorities: Cell<bool>,
    requires_high_res_to_draw: Cell<bool>,
}

impl FixedTileSizeClient {
    pub fn new(tile_size: Size) -> Self {
        Self {
            tile_size,
            has_valid_tile_priorities: Cell::new(true),
            requires_high_res_to_draw: Cell::new(false),
        }
    }

    pub fn set_has_valid_tile_priorities(&self, valid: bool) {
        self.has_valid_tile_priorities.set(valid);
    }

    pub fn set_requires_high_res_to_draw(&self, required: bool) {
        self.requires_high_res_to_draw.set(required);
    }
}

impl TilingClient for FixedTileSizeClient {
    fn calculate_tile_size(&self, _content_bounds: Size) -> Size {
        self.tile_size
    }

    fn has_valid_tile_priorities(&self) -> bool {
        self.has_valid_tile_priorities.get()
    }

    fn requires_high_res_to_draw(&self) -> bool {
        self.requires_high_res_to_draw.get()
    }
}

/// Default tile sizing for CPU raster.
///
/// Small or long-and-skinny layers get a single tile up to the untiled size,
/// rounded up to `tile_round_up_multiple`. Everything else uses the default
/// tile size. Both are capped at the maximum texture size.
pub fn calculate_tile_size(settings: &TilingSettings, content_bounds: Size) -> Size {
    let max_texture = settings.max_texture_size;
    let default_tile = Size::new(
        settings.default_tile_size.width.min(max_texture),
        settings.default_tile_size.height.min(max_texture),
    );
    let max_untiled = Size::new(
        settings.max_untiled_layer_size.width.min(max_texture),
        settings.max_untiled_layer_size.height.min(max_texture),
    );

    let any_dimension_too_large =
        content_bounds.width > max_untiled.width || content_bounds.height > max_untiled.height;
    let any_dimension_one_tile =
        content_bounds.width <= default_tile.width || content_bounds.height <= default_tile.height;

    if any_dimension_one_tile || !any_dimension_too_large {
        let width = max_untiled.width.max(default_tile.width).min(content_bounds.width);
        let height = max_untiled.height.max(default_tile.height).min(content_bounds.height);
        return Size::new(
            round_up(width, settings.tile_round_up_multiple),
            round_up(height, settings.tile_round_up_multiple),
        );
    }
    default_tile
}

fn round_up(value: i32, multiple: i32) -> i32 {
    if multiple <= 0 {
        return value;
    }
    ((value + multiple - 1) / multiple) * multiple
}
