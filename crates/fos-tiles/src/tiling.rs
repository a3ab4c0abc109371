//! Picture Layer Tiling
//!
//! The tile grid of one layer at one contents scale. A tiling keeps tiles
//! only inside its live tiles rect, derives the per-frame priority rects
//! (visible, skewport, soon border, eventually) from the viewport, and
//! shares tiles with its twin in the other tree.
//!
//! Twins are never stored. Operations that need the other tree's tiling
//! take it through a [`TilingContext`] supplied by the owning set.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use crate::client::TilingClient;
use crate::error::TilingError;
use crate::geometry::{Rect, Region, Size};
use crate::layer::LayerId;
use crate::occlusion::Occlusion;
use crate::priority::{PrioritizedTile, PriorityBin, PriorityRectType, TilePriority, TileResolution, Tree};
use crate::raster_source::RasterSource;
use crate::settings::TilingSettings;
use crate::tile::{ResourceId, Tile, TileCreateInfo, TileKey};
use crate::tiling_data::{TileIndex, TilingData};

static EMPTY_REGION: Region = Region::new();

/// The other tree's view of a tiling, passed in by the owning set
#[derive(Debug, Clone, Copy)]
pub struct TilingContext<'a> {
    /// Same-scale tiling in the other tree
    pub twin: Option<&'a PictureLayerTiling>,
    /// Invalidation of the pending tree since the last activation
    pub pending_invalidation: &'a Region,
}

impl<'a> TilingContext<'a> {
    /// No twin and no invalidation
    pub fn none() -> TilingContext<'static> {
        TilingContext { twin: None, pending_invalidation: &EMPTY_REGION }
    }

    pub fn new(twin: Option<&'a PictureLayerTiling>, pending_invalidation: &'a Region) -> Self {
        Self { twin, pending_invalidation }
    }
}

#[derive(Debug, Clone, Copy)]
struct FrameVisibleRect {
    visible_rect_in_layer_space: Rect,
    frame_time_in_seconds: f64,
}

/// One layer's tiles at one contents scale
#[derive(Debug)]
pub struct PictureLayerTiling {
    contents_scale: f32,
    tree: Tree,
    layer_id: LayerId,
    client: Rc<dyn TilingClient>,
    raster_source: Arc<dyn RasterSource>,
    settings: TilingSettings,
    tiling_data: TilingData,
    resolution: TileResolution,
    may_contain_low_resolution_tiles: bool,
    tiles: HashMap<TileIndex, Tile>,
    live_tiles_rect: Rect,
    released_resources: Vec<ResourceId>,

    // Priority rect state
    visible_rect_history: [Option<FrameVisibleRect>; 2],
    last_viewport_in_layer_space: Rect,
    current_visible_rect: Rect,
    current_skewport_rect: Rect,
    current_soon_border_rect: Rect,
    current_eventually_rect: Rect,
    current_occlusion: Occlusion,
    current_content_to_screen_scale: f32,

    can_require_tiles_for_activation: bool,
    all_tiles_done: bool,
}

impl PictureLayerTiling {
    /// Create an empty tiling. Fails for unusable scales or when the scale
    /// leaves no content.
    pub fn new(
        tree: Tree,
        layer_id: LayerId,
        contents_scale: f32,
        raster_source: Arc<dyn RasterSource>,
        client: Rc<dyn TilingClient>,
        settings: TilingSettings,
    ) -> Result<Self, TilingError> {
        if !contents_scale.is_finite() || contents_scale <= 0.0 {
            return Err(TilingError::InvalidScale(contents_scale));
        }
        let content_bounds = raster_source.size().scale_to_ceiled(contents_scale);
        if content_bounds.is_empty() {
            return Err(TilingError::EmptyContentBounds {
                scale: contents_scale,
                width: content_bounds.width,
                height: content_bounds.height,
            });
        }
        let tile_size = client.calculate_tile_size(content_bounds);
        if tile_size.is_empty() {
            return Err(TilingError::InvalidTileSize {
                width: tile_size.width,
                height: tile_size.height,
            });
        }

        tracing::debug!(
            layer = layer_id,
            ?tree,
            contents_scale,
            width = content_bounds.width,
            height = content_bounds.height,
            "created tiling"
        );

        Ok(Self {
            contents_scale,
            tree,
            layer_id,
            client,
            raster_source,
            settings,
            tiling_data: TilingData::new(content_bounds, tile_size),
            resolution: TileResolution::NonIdeal,
            may_contain_low_resolution_tiles: false,
            tiles: HashMap::new(),
            live_tiles_rect: Rect::default(),
            released_resources: Vec::new(),
            visible_rect_history: [None, None],
            last_viewport_in_layer_space: Rect::default(),
            current_visible_rect: Rect::default(),
            current_skewport_rect: Rect::default(),
            current_soon_border_rect: Rect::default(),
            current_eventually_rect: Rect::default(),
            current_occlusion: Occlusion::new(),
            current_content_to_screen_scale: 0.0,
            can_require_tiles_for_activation: false,
            all_tiles_done: true,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn contents_scale(&self) -> f32 {
        self.contents_scale
    }

    pub fn tree(&self) -> Tree {
        self.tree
    }

    pub fn layer_id(&self) -> LayerId {
        self.layer_id
    }

    pub fn client(&self) -> &Rc<dyn TilingClient> {
        &self.client
    }

    pub fn raster_source(&self) -> &Arc<dyn RasterSource> {
        &self.raster_source
    }

    pub fn resolution(&self) -> TileResolution {
        self.resolution
    }

    pub fn set_resolution(&mut self, resolution: TileResolution) {
        self.resolution = resolution;
        self.may_contain_low_resolution_tiles |= resolution == TileResolution::Low;
    }

    /// True if this tiling was ever low-res
    pub fn may_contain_low_resolution_tiles(&self) -> bool {
        self.may_contain_low_resolution_tiles
    }

    pub fn tiling_data(&self) -> &TilingData {
        &self.tiling_data
    }

    pub fn tiling_size(&self) -> Size {
        self.tiling_data.tiling_size()
    }

    pub fn tile_size(&self) -> Size {
        self.tiling_data.tile_size()
    }

    pub fn live_tiles_rect(&self) -> Rect {
        self.live_tiles_rect
    }

    pub fn tile_at(&self, index: TileIndex) -> Option<&Tile> {
        self.tiles.get(&index)
    }

    pub fn tile_at_mut(&mut self, index: TileIndex) -> Option<&mut Tile> {
        self.tiles.get_mut(&index)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    pub fn tiles_mut(&mut self) -> impl Iterator<Item = &mut Tile> {
        self.tiles.values_mut()
    }

    pub fn num_tiles(&self) -> usize {
        self.tiles.len()
    }

    pub fn has_tiles(&self) -> bool {
        !self.tiles.is_empty()
    }

    pub fn current_visible_rect(&self) -> Rect {
        self.current_visible_rect
    }

    pub fn current_skewport_rect(&self) -> Rect {
        self.current_skewport_rect
    }

    pub fn current_soon_border_rect(&self) -> Rect {
        self.current_soon_border_rect
    }

    pub fn current_eventually_rect(&self) -> Rect {
        self.current_eventually_rect
    }

    pub fn current_content_to_screen_scale(&self) -> f32 {
        self.current_content_to_screen_scale
    }

    pub fn can_require_tiles_for_activation(&self) -> bool {
        self.can_require_tiles_for_activation
    }

    pub fn set_can_require_tiles_for_activation(&mut self, can_require: bool) {
        self.can_require_tiles_for_activation = can_require;
    }

    /// False whenever there may be tiles left to raster
    pub fn all_tiles_done(&self) -> bool {
        self.all_tiles_done
    }

    pub fn set_all_tiles_done(&mut self, done: bool) {
        self.all_tiles_done = done;
    }

    /// Key addressing `index` on this tiling
    pub fn key_for(&self, index: TileIndex) -> TileKey {
        TileKey {
            layer: self.layer_id,
            tree: self.tree,
            contents_scale: self.contents_scale,
            index,
        }
    }

    /// Resources held by tiles this tiling has dropped since the last call
    pub fn take_released_resources(&mut self) -> Vec<ResourceId> {
        std::mem::take(&mut self.released_resources)
    }

    /// True if tile indices mean the same cells on both tilings
    pub fn tiling_matches_tile_indices(&self, twin: &PictureLayerTiling) -> bool {
        self.tiling_data.tile_size() == twin.tiling_data.tile_size()
    }

    // ========================================================================
    // Space conversion
    // ========================================================================

    fn enclosing_contents_rect_from_layer_rect(&self, layer_rect: &Rect) -> Rect {
        layer_rect.scale_to_enclosing(self.contents_scale)
    }

    fn enclosing_layer_rect_from_contents_rect(&self, content_rect: &Rect) -> Rect {
        content_rect.scale_to_enclosing(1.0 / self.contents_scale)
    }

    fn create_info_for_tile(&self, index: TileIndex) -> TileCreateInfo {
        let content_rect = self.tiling_data.tile_bounds(index);
        TileCreateInfo {
            index,
            content_rect,
            enclosing_layer_rect: self.enclosing_layer_rect_from_contents_rect(&content_rect),
            contents_scale: self.contents_scale,
        }
    }

    // ========================================================================
    // Tile creation and removal
    // ========================================================================

    /// Whether a tile should exist for `info` on this tree
    pub fn should_create_tile_at(&self, info: &TileCreateInfo, ctx: TilingContext<'_>) -> bool {
        if self.tree == Tree::Active {
            return true;
        }

        let Some(active_twin) = ctx.twin else {
            return true;
        };
        if !self.tiling_matches_tile_indices(active_twin) {
            return true;
        }
        if active_twin.tiling_size() != self.tiling_size() {
            return true;
        }
        if !active_twin.raster_source.covers_rect(&info.enclosing_layer_rect) {
            return true;
        }
        if ctx.pending_invalidation.intersects(&info.enclosing_layer_rect) {
            return true;
        }
        active_twin.tile_at(info.index).is_none() && self.current_visible_rect.intersects(&info.content_rect)
    }

    /// Content-space part of `tile_rect` touched by `invalidation`
    fn invalidated_content_rect(&self, invalidation: &Region, tile_rect: &Rect) -> Rect {
        invalidation.rects().iter().fold(Rect::default(), |acc, layer_rect| {
            let content = self.enclosing_contents_rect_from_layer_rect(layer_rect);
            acc.union(&content.intersect(tile_rect))
        })
    }

    fn create_tile(&mut self, info: &TileCreateInfo, ctx: TilingContext<'_>) -> Option<&mut Tile> {
        if !self.raster_source.covers_rect(&info.enclosing_layer_rect) {
            return None;
        }

        let previous = match ctx.twin {
            Some(twin) if self.tree == Tree::Pending && self.tiling_matches_tile_indices(twin) => twin
                .tile_at(info.index)
                .map(|old| (old.id(), self.invalidated_content_rect(ctx.pending_invalidation, &info.content_rect))),
            _ => None,
        };

        self.all_tiles_done = false;
        let mut tile = self.client.create_tile(info);
        if let Some((previous_id, invalidated_rect)) = previous {
            tile.set_invalidated(invalidated_rect, previous_id);
        }
        tracing::trace!(layer = self.layer_id, tree = ?self.tree, i = info.index.i, j = info.index.j, "created tile");
        self.tiles.insert(info.index, tile);
        self.tiles.get_mut(&info.index)
    }

    fn take_tile_at(&mut self, index: TileIndex) -> Option<Tile> {
        let mut tile = self.tiles.remove(&index)?;
        if let Some(resource) = tile.release_resource() {
            self.released_resources.push(resource);
        }
        tracing::trace!(layer = self.layer_id, tree = ?self.tree, i = index.i, j = index.j, "dropped tile");
        Some(tile)
    }

    /// Create every missing tile inside the live tiles rect that this tree
    /// should own
    pub fn create_missing_tiles_in_live_tiles_rect(&mut self, ctx: TilingContext<'_>) {
        for index in self.tiling_data.iter(&self.live_tiles_rect) {
            if self.tiles.contains_key(&index) {
                continue;
            }
            let info = self.create_info_for_tile(index);
            if self.should_create_tile_at(&info, ctx) {
                self.create_tile(&info, ctx);
            }
        }
    }

    /// Move the live tiles rect, dropping tiles that fall outside and
    /// creating tiles for newly live cells.
    ///
    /// Non-ideal tilings only ever shrink.
    pub fn set_live_tiles_rect(&mut self, new_live_tiles_rect: Rect, ctx: TilingContext<'_>) {
        debug_assert!(
            new_live_tiles_rect.is_empty() || self.tiling_data.tiling_rect().contains(&new_live_tiles_rect),
            "live tiles rect {new_live_tiles_rect:?} escapes the tiling"
        );
        if self.live_tiles_rect == new_live_tiles_rect {
            return;
        }

        for index in self.tiling_data.difference(&self.live_tiles_rect, &new_live_tiles_rect) {
            self.take_tile_at(index);
        }

        if self.resolution == TileResolution::NonIdeal {
            self.live_tiles_rect = self.live_tiles_rect.intersect(&new_live_tiles_rect);
            return;
        }

        for index in self.tiling_data.difference(&new_live_tiles_rect, &self.live_tiles_rect) {
            let info = self.create_info_for_tile(index);
            if self.should_create_tile_at(&info, ctx) {
                self.create_tile(&info, ctx);
            }
        }
        self.live_tiles_rect = new_live_tiles_rect;
    }

    /// Drop every tile touching `invalidation` (layer space) and, if
    /// `recreate` is set, create replacements linked to the old tiles.
    pub fn remove_tiles_in_region(&mut self, invalidation: &Region, recreate: bool, ctx: TilingContext<'_>) {
        if self.live_tiles_rect.is_empty() {
            return;
        }
        let expanded_live = self.tiling_data.expand_rect_to_tile_bounds(&self.live_tiles_rect);

        let mut affected: Vec<(TileIndex, Rect)> = Vec::new();
        for layer_rect in invalidation.rects() {
            let content_rect = self.enclosing_contents_rect_from_layer_rect(layer_rect);
            let coverage = content_rect.intersect(&expanded_live);
            if coverage.is_empty() {
                continue;
            }
            for index in self.tiling_data.iter(&coverage) {
                let touched = content_rect.intersect(&self.tiling_data.tile_bounds(index));
                match affected.iter_mut().find(|(i, _)| *i == index) {
                    Some((_, rect)) => *rect = rect.union(&touched),
                    None => affected.push((index, touched)),
                }
            }
        }

        for (index, invalidated_rect) in affected {
            let Some(old) = self.take_tile_at(index) else {
                continue;
            };
            if !recreate {
                continue;
            }
            let info = self.create_info_for_tile(index);
            if self.should_create_tile_at(&info, ctx) {
                if let Some(tile) = self.create_tile(&info, ctx) {
                    tile.set_invalidated(invalidated_rect, old.id());
                }
            }
        }
    }

    /// Drop and recreate tiles touching `invalidation`
    pub fn invalidate(&mut self, invalidation: &Region, ctx: TilingContext<'_>) {
        self.remove_tiles_in_region(invalidation, true, ctx);
    }

    /// Drop all tiles and forget the live tiles rect
    pub fn reset(&mut self) {
        let indices: Vec<TileIndex> = self.tiles.keys().copied().collect();
        for index in indices {
            self.take_tile_at(index);
        }
        self.live_tiles_rect = Rect::default();
        self.all_tiles_done = true;
    }

    /// Adopt a new raster source. A tile size change resets the tiling;
    /// otherwise tiles outside the new bounds are dropped.
    pub fn set_raster_source_and_resize(&mut self, raster_source: Arc<dyn RasterSource>) {
        let old_layer_bounds = self.raster_source.size();
        self.raster_source = raster_source;
        let new_layer_bounds = self.raster_source.size();
        let content_bounds = new_layer_bounds.scale_to_ceiled(self.contents_scale);
        let mut tile_size = self.client.calculate_tile_size(content_bounds);
        if tile_size.is_empty() {
            tracing::warn!(layer = self.layer_id, ?tile_size, "ignoring empty tile size on resize");
            tile_size = self.tiling_data.tile_size();
        }

        if tile_size != self.tiling_data.tile_size() {
            self.tiling_data = TilingData::new(content_bounds, tile_size);
            self.reset();
            return;
        }
        if old_layer_bounds == new_layer_bounds {
            return;
        }

        self.tiling_data.set_tiling_size(content_bounds);
        self.live_tiles_rect = self.live_tiles_rect.intersect(&self.tiling_data.tiling_rect());

        let live_range = self.tiling_data.index_range(&self.live_tiles_rect);
        let stale: Vec<TileIndex> = self
            .tiles
            .iter()
            .filter(|(index, tile)| {
                !live_range.is_some_and(|r| r.contains(**index))
                    || tile.content_rect() != self.tiling_data.tile_bounds(**index)
            })
            .map(|(index, _)| *index)
            .collect();
        for index in stale {
            self.take_tile_at(index);
        }
    }

    /// Take over the pending twin's tiles and priority state at activation.
    ///
    /// Tiles are moved, so the twin is left without tiles.
    pub fn take_tiles_and_properties_from(&mut self, pending_twin: &mut PictureLayerTiling, invalidation: &Region) {
        self.set_raster_source_and_resize(pending_twin.raster_source.clone());
        self.remove_tiles_in_region(invalidation, false, TilingContext::none());
        self.resolution = pending_twin.resolution;
        self.may_contain_low_resolution_tiles |= pending_twin.may_contain_low_resolution_tiles;

        let create_missing_tiles = self.live_tiles_rect.is_empty();
        if create_missing_tiles {
            self.live_tiles_rect = pending_twin.live_tiles_rect;
        } else {
            self.set_live_tiles_rect(pending_twin.live_tiles_rect, TilingContext::none());
        }

        let moved = pending_twin.tiles.len();
        for (index, tile) in pending_twin.tiles.drain() {
            if let Some(mut replaced) = self.tiles.insert(index, tile) {
                if let Some(resource) = replaced.release_resource() {
                    self.released_resources.push(resource);
                }
            }
        }
        self.released_resources.append(&mut pending_twin.released_resources);
        self.all_tiles_done = false;

        if create_missing_tiles {
            self.create_missing_tiles_in_live_tiles_rect(TilingContext::none());
        }

        self.visible_rect_history = pending_twin.visible_rect_history;
        self.last_viewport_in_layer_space = pending_twin.last_viewport_in_layer_space;
        self.set_tile_priority_rects(
            pending_twin.current_content_to_screen_scale,
            pending_twin.current_visible_rect,
            pending_twin.current_skewport_rect,
            pending_twin.current_soon_border_rect,
            pending_twin.current_eventually_rect,
            pending_twin.current_occlusion.clone(),
        );

        tracing::debug!(
            layer = self.layer_id,
            contents_scale = self.contents_scale,
            moved,
            "took tiles from pending twin"
        );
    }

    // ========================================================================
    // Priority rects
    // ========================================================================

    fn needs_update_for_frame_at_time_and_viewport(&self, frame_time_in_seconds: f64, viewport: &Rect) -> bool {
        match self.visible_rect_history[0] {
            None => true,
            Some(last) => {
                last.frame_time_in_seconds != frame_time_in_seconds || self.last_viewport_in_layer_space != *viewport
            }
        }
    }

    /// Recompute the priority rects for a frame and move the live tiles rect
    /// to match. Returns false when neither time nor viewport changed.
    pub fn compute_tile_priority_rects(
        &mut self,
        viewport_in_layer_space: Rect,
        ideal_contents_scale: f32,
        frame_time_in_seconds: f64,
        occlusion: &Occlusion,
        ctx: TilingContext<'_>,
    ) -> bool {
        // Gaining or losing occlusion changes which tiles are wanted even
        // when the geometry stays put
        if occlusion.has_occlusion() || self.current_occlusion.has_occlusion() {
            self.all_tiles_done = false;
        }

        if !self.needs_update_for_frame_at_time_and_viewport(frame_time_in_seconds, &viewport_in_layer_space) {
            return false;
        }

        let mut content_to_screen_scale = ideal_contents_scale / self.contents_scale;
        if !content_to_screen_scale.is_finite() || content_to_screen_scale <= 0.0 {
            content_to_screen_scale = 1.0;
        }

        let visible_rect_in_content_space = viewport_in_layer_space.scale_to_enclosing(self.contents_scale);

        if self.tiling_size().is_empty() {
            self.update_visible_rect_history(frame_time_in_seconds, viewport_in_layer_space);
            self.set_live_tiles_rect(Rect::default(), ctx);
            return true;
        }

        let skewport = self.compute_skewport(
            frame_time_in_seconds,
            &visible_rect_in_content_space,
            content_to_screen_scale,
        );

        let padding = (self.settings.tiling_interest_area_padding as f32 / content_to_screen_scale) as i32;
        let eventually_rect = if visible_rect_in_content_space.is_empty() {
            Rect::default()
        } else {
            self.tiling_data
                .expand_rect_to_tile_bounds(&visible_rect_in_content_space.outset(padding))
        };

        let soon_border = self.calculate_soon_border_distance(&visible_rect_in_content_space, content_to_screen_scale);
        let soon_border_rect = if visible_rect_in_content_space.is_empty() {
            Rect::default()
        } else {
            visible_rect_in_content_space.outset(soon_border as i32)
        };

        self.update_visible_rect_history(frame_time_in_seconds, viewport_in_layer_space);
        self.set_tile_priority_rects(
            content_to_screen_scale,
            visible_rect_in_content_space,
            skewport,
            soon_border_rect,
            eventually_rect,
            occlusion.clone(),
        );
        self.set_live_tiles_rect(eventually_rect, ctx);
        true
    }

    fn compute_skewport(&self, current_frame_time: f64, visible_rect_in_content_space: &Rect, content_to_screen_scale: f32) -> Rect {
        let skewport = *visible_rect_in_content_space;
        if skewport.is_empty() {
            return skewport;
        }
        let Some(previous) = self.visible_rect_history[1] else {
            return skewport;
        };

        let time_delta = current_frame_time - previous.frame_time_in_seconds;
        let target_time = self.settings.skewport_target_time_in_seconds as f64;
        if time_delta <= 0.0 || target_time <= 0.0 {
            return skewport;
        }
        let extrapolation_multiplier = target_time / time_delta;

        let old = previous
            .visible_rect_in_layer_space
            .scale_to_enclosing(self.contents_scale);
        let new = visible_rect_in_content_space;

        let limit = (self.settings.skewport_extrapolation_limit_in_screen_pixels as f32 / content_to_screen_scale) as i32;
        let max_skewport = new.outset(limit);

        let extrapolate = |delta: i64| -> i32 {
            (extrapolation_multiplier * delta as f64).clamp(i32::MIN as f64, i32::MAX as f64) as i32
        };
        let skewport = skewport.inset(
            extrapolate(new.x as i64 - old.x as i64),
            extrapolate(new.y as i64 - old.y as i64),
            extrapolate(old.right() as i64 - new.right() as i64),
            extrapolate(old.bottom() as i64 - new.bottom() as i64),
        );

        // Never smaller than the visible rect, never beyond the limit
        skewport
            .union(new)
            .intersect(&max_skewport)
            .union(new)
    }

    fn calculate_soon_border_distance(&self, visible_rect_in_content_space: &Rect, content_to_screen_scale: f32) -> f32 {
        let max_dimension = visible_rect_in_content_space
            .width
            .max(visible_rect_in_content_space.height) as f32;
        (self.settings.max_soon_border_in_screen_pixels / content_to_screen_scale)
            .min(max_dimension * self.settings.soon_border_viewport_fraction)
    }

    fn update_visible_rect_history(&mut self, frame_time_in_seconds: f64, visible_rect_in_layer_space: Rect) {
        self.visible_rect_history[1] = self.visible_rect_history[0];
        self.visible_rect_history[0] = Some(FrameVisibleRect {
            visible_rect_in_layer_space,
            frame_time_in_seconds,
        });
        self.last_viewport_in_layer_space = visible_rect_in_layer_space;
    }

    fn set_tile_priority_rects(
        &mut self,
        content_to_screen_scale: f32,
        visible: Rect,
        skewport: Rect,
        soon_border: Rect,
        eventually: Rect,
        occlusion: Occlusion,
    ) {
        self.current_content_to_screen_scale = content_to_screen_scale;
        self.current_visible_rect = visible;
        self.current_skewport_rect = skewport;
        self.current_soon_border_rect = soon_border;
        self.current_eventually_rect = eventually;
        self.current_occlusion = occlusion;
    }

    // ========================================================================
    // Per-tile queries
    // ========================================================================

    /// Occlusion test against this tree's current frame
    pub fn is_tile_occluded_on_current_tree(&self, tile: &Tile) -> bool {
        if !self.current_occlusion.has_occlusion() {
            return false;
        }
        let visible_part = tile.content_rect().intersect(&self.current_visible_rect);
        if visible_part.is_empty() {
            return false;
        }
        let layer_rect = self.enclosing_layer_rect_from_contents_rect(&visible_part);
        self.current_occlusion.is_occluded(&layer_rect)
    }

    /// Occlusion as seen by the scheduler. An active tile that the pending
    /// tree will not replace is only occluded if the pending tree also hides
    /// it.
    pub fn is_tile_occluded(&self, tile: &Tile, twin: Option<&PictureLayerTiling>) -> bool {
        if !self.is_tile_occluded_on_current_tree(tile) {
            return false;
        }
        if self.tree == Tree::Pending {
            return true;
        }
        match twin {
            Some(pending) => {
                if !self.tiling_matches_tile_indices(pending) || pending.tile_at(tile.index()).is_some() {
                    return true;
                }
                pending.is_tile_occluded_on_current_tree(tile)
            }
            None => true,
        }
    }

    /// Visible rect the pending tree will show after activation
    pub fn pending_visible_rect(&self, twin: Option<&PictureLayerTiling>) -> Rect {
        match self.tree {
            Tree::Pending => self.current_visible_rect,
            Tree::Active => twin.map(|t| t.current_visible_rect).unwrap_or_default(),
        }
    }

    /// Must this tile be ready before the pending tree activates
    pub fn is_tile_required_for_activation(&self, tile: &Tile, ctx: TilingContext<'_>) -> bool {
        match self.tree {
            Tree::Pending => self.is_tile_required_for_activation_on_pending(tile, ctx),
            Tree::Active => {
                // Only tiles the pending tree will keep sharing matter here
                let Some(pending) = ctx.twin else {
                    return false;
                };
                if !self.tiling_matches_tile_indices(pending) || pending.tile_at(tile.index()).is_some() {
                    return false;
                }
                pending.is_tile_required_for_activation_on_pending(tile, TilingContext::new(Some(self), ctx.pending_invalidation))
            }
        }
    }

    fn is_tile_required_for_activation_on_pending(&self, tile: &Tile, ctx: TilingContext<'_>) -> bool {
        if !self.can_require_tiles_for_activation {
            return false;
        }
        if self.resolution != TileResolution::High {
            return false;
        }
        if self.is_tile_occluded(tile, None) {
            return false;
        }
        if !tile.content_rect().intersects(&self.current_visible_rect) {
            return false;
        }
        if self.client.requires_high_res_to_draw() {
            return true;
        }

        let Some(active) = ctx.twin else {
            return true;
        };
        if !self.tiling_matches_tile_indices(active) {
            return true;
        }
        if active.raster_source.size() != self.raster_source.size() {
            return true;
        }
        if active.current_visible_rect != self.current_visible_rect {
            return true;
        }
        match active.tile_at(tile.index()) {
            None => true,
            Some(_) => {
                let layer_rect = tile.enclosing_layer_rect();
                ctx.pending_invalidation.intersects(&layer_rect)
            }
        }
    }

    /// Must this tile be ready before the active tree draws
    pub fn is_tile_required_for_draw(&self, tile: &Tile) -> bool {
        if self.tree != Tree::Active || self.resolution != TileResolution::High {
            return false;
        }
        if !tile.content_rect().intersects(&self.current_visible_rect) {
            return false;
        }
        !self.is_tile_occluded_on_current_tree(tile)
    }

    /// Refresh the stored required flags of every tile
    pub fn update_required_states_on_tiles(&mut self, ctx: TilingContext<'_>) {
        let states: Vec<(TileIndex, bool, bool)> = self
            .tiles
            .values()
            .map(|tile| {
                (
                    tile.index(),
                    self.is_tile_required_for_activation(tile, ctx),
                    self.is_tile_required_for_draw(tile),
                )
            })
            .collect();
        for (index, for_activation, for_draw) in states {
            if let Some(tile) = self.tiles.get_mut(&index) {
                tile.set_required_for_activation(for_activation);
                tile.set_required_for_draw(for_draw);
            }
        }
    }

    /// Which priority rect first contains the tile
    pub fn compute_priority_rect_type_for_tile(&self, tile: &Tile, twin: Option<&PictureLayerTiling>) -> PriorityRectType {
        let rect = tile.content_rect();
        if self.current_visible_rect.intersects(&rect) {
            return PriorityRectType::Visible;
        }
        if self.pending_visible_rect(twin).intersects(&rect) {
            return PriorityRectType::PendingVisible;
        }
        if self.current_skewport_rect.intersects(&rect) {
            return PriorityRectType::Skewport;
        }
        if self.current_soon_border_rect.intersects(&rect) {
            return PriorityRectType::SoonBorder;
        }
        PriorityRectType::Eventually
    }

    /// Priority of a tile found in `rect_type`
    pub fn compute_priority_for_tile(&self, tile: &Tile, rect_type: PriorityRectType) -> TilePriority {
        let priority_bin = if !self.client.has_valid_tile_priorities() {
            PriorityBin::Eventually
        } else {
            match rect_type {
                PriorityRectType::Visible | PriorityRectType::PendingVisible => PriorityBin::Now,
                PriorityRectType::Skewport | PriorityRectType::SoonBorder => PriorityBin::Soon,
                PriorityRectType::Eventually => PriorityBin::Eventually,
            }
        };

        if matches!(rect_type, PriorityRectType::Visible | PriorityRectType::PendingVisible) {
            return TilePriority::new(self.resolution, priority_bin, 0.0);
        }

        let distance = self
            .current_visible_rect
            .manhattan_internal_distance(&tile.content_rect()) as f32
            * self.current_content_to_screen_scale;
        TilePriority::new(self.resolution, priority_bin, distance)
    }

    /// Bundle a tile with its priority and scheduler flags
    pub fn make_prioritized_tile<'a>(
        &'a self,
        tile: &'a Tile,
        rect_type: PriorityRectType,
        ctx: TilingContext<'_>,
    ) -> PrioritizedTile<'a> {
        PrioritizedTile {
            tile,
            key: self.key_for(tile.index()),
            priority: self.compute_priority_for_tile(tile, rect_type),
            is_occluded: self.is_tile_occluded(tile, ctx.twin),
            is_required_for_activation: self.is_tile_required_for_activation(tile, ctx),
            is_required_for_draw: self.is_tile_required_for_draw(tile),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FixedTileSizeClient;
    use crate::raster_source::RecordedRasterSource;

    fn source(width: i32, height: i32) -> Arc<dyn RasterSource> {
        Arc::new(RecordedRasterSource::new(Size::new(width, height)))
    }

    fn tiling(tree: Tree, scale: f32, width: i32, height: i32) -> PictureLayerTiling {
        let client: Rc<dyn TilingClient> = Rc::new(FixedTileSizeClient::new(Size::new(100, 100)));
        let settings = TilingSettings {
            tiling_interest_area_padding: 100,
            ..TilingSettings::default()
        };
        let mut tiling = PictureLayerTiling::new(tree, 1, scale, source(width, height), client, settings).unwrap();
        tiling.set_resolution(TileResolution::High);
        tiling
    }

    #[test]
    fn test_rejects_invalid_scales() {
        let client: Rc<dyn TilingClient> = Rc::new(FixedTileSizeClient::new(Size::new(100, 100)));
        for scale in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            let result = PictureLayerTiling::new(Tree::Active, 1, scale, source(100, 100), client.clone(), TilingSettings::default());
            assert!(matches!(result, Err(TilingError::InvalidScale(_))));
        }
        let no_tiles: Rc<dyn TilingClient> = Rc::new(FixedTileSizeClient::new(Size::new(0, 100)));
        let result = PictureLayerTiling::new(Tree::Active, 1, 1.0, source(100, 100), no_tiles, TilingSettings::default());
        assert!(matches!(result, Err(TilingError::InvalidTileSize { width: 0, height: 100 })));
        let empty = PictureLayerTiling::new(Tree::Active, 1, 1.0, source(0, 100), client, TilingSettings::default());
        assert!(matches!(empty, Err(TilingError::EmptyContentBounds { .. })));
    }

    #[test]
    fn test_priority_rects_and_live_tiles() {
        let mut tiling = tiling(Tree::Active, 1.0, 1000, 1000);
        let updated = tiling.compute_tile_priority_rects(Rect::new(0, 0, 200, 200), 1.0, 1.0, &Occlusion::new(), TilingContext::none());
        assert!(updated);
        assert_eq!(tiling.current_visible_rect(), Rect::new(0, 0, 200, 200));
        // Padding of 100 snapped out to tile bounds
        assert_eq!(tiling.current_eventually_rect(), Rect::new(0, 0, 300, 300));
        assert_eq!(tiling.live_tiles_rect(), Rect::new(0, 0, 300, 300));
        assert_eq!(tiling.num_tiles(), 9);
        // Soon border: min(312, 0.15 * 200)
        assert_eq!(tiling.current_soon_border_rect(), Rect::new(-30, -30, 260, 260));
    }

    #[test]
    fn test_same_frame_is_memoized() {
        let mut tiling = tiling(Tree::Active, 1.0, 1000, 1000);
        let viewport = Rect::new(0, 0, 200, 200);
        assert!(tiling.compute_tile_priority_rects(viewport, 1.0, 1.0, &Occlusion::new(), TilingContext::none()));
        assert!(!tiling.compute_tile_priority_rects(viewport, 1.0, 1.0, &Occlusion::new(), TilingContext::none()));
        assert!(tiling.compute_tile_priority_rects(viewport, 1.0, 2.0, &Occlusion::new(), TilingContext::none()));
    }

    #[test]
    fn test_skewport_extrapolates_scroll() {
        let mut tiling = tiling(Tree::Active, 1.0, 10000, 10000);
        let occlusion = Occlusion::new();
        tiling.compute_tile_priority_rects(Rect::new(0, 0, 100, 100), 1.0, 1.0, &occlusion, TilingContext::none());
        tiling.compute_tile_priority_rects(Rect::new(0, 50, 100, 100), 1.0, 1.5, &occlusion, TilingContext::none());
        tiling.compute_tile_priority_rects(Rect::new(0, 100, 100, 100), 1.0, 2.0, &occlusion, TilingContext::none());

        // 100px scrolled over 1s, extrapolated over 1s
        assert_eq!(tiling.current_skewport_rect(), Rect::new(0, 100, 100, 200));
    }

    #[test]
    fn test_fast_scroll_skewport_stops_at_extrapolation_limit() {
        let occlusion = Occlusion::new();
        // (tiling scale, ideal scale, skewport bottom in content space)
        let cases = [
            // 2000 screen pixels past the visible bottom
            (1.0, 1.0, 3100 + 2000),
            // Two screen pixels per content pixel halve the reach
            (1.0, 2.0, 3100 + 1000),
            // Half a screen pixel per content pixel doubles it
            (2.0, 1.0, 6200 + 4000),
        ];
        for (scale, ideal, bottom) in cases {
            let mut tiling = tiling(Tree::Active, scale, 10000, 10000);
            tiling.compute_tile_priority_rects(Rect::new(0, 0, 100, 100), ideal, 1.0, &occlusion, TilingContext::none());
            tiling.compute_tile_priority_rects(Rect::new(0, 50, 100, 100), ideal, 1.5, &occlusion, TilingContext::none());
            // 3000 layer pixels in a second, extrapolated over another second
            tiling.compute_tile_priority_rects(Rect::new(0, 3000, 100, 100), ideal, 2.0, &occlusion, TilingContext::none());

            let visible = tiling.current_visible_rect();
            let skewport = tiling.current_skewport_rect();
            assert_eq!((skewport.x, skewport.y, skewport.width), (visible.x, visible.y, visible.width));
            assert_eq!(skewport.bottom(), bottom, "tiling scale {scale}, ideal scale {ideal}");
        }
    }

    #[test]
    fn test_skewport_without_elapsed_time_is_visible_rect() {
        let mut tiling = tiling(Tree::Active, 1.0, 10000, 10000);
        let occlusion = Occlusion::new();
        tiling.compute_tile_priority_rects(Rect::new(0, 0, 100, 100), 1.0, 0.0, &occlusion, TilingContext::none());
        tiling.compute_tile_priority_rects(Rect::new(0, 50, 100, 100), 1.0, 0.0, &occlusion, TilingContext::none());
        tiling.compute_tile_priority_rects(Rect::new(0, 100, 100, 100), 1.0, 0.0, &occlusion, TilingContext::none());
        assert_eq!(tiling.current_skewport_rect(), tiling.current_visible_rect());
    }

    #[test]
    fn test_non_ideal_tiling_never_grows() {
        let mut tiling = tiling(Tree::Active, 1.0, 1000, 1000);
        tiling.set_resolution(TileResolution::NonIdeal);
        tiling.compute_tile_priority_rects(Rect::new(0, 0, 200, 200), 1.0, 1.0, &Occlusion::new(), TilingContext::none());
        assert!(tiling.live_tiles_rect().is_empty());
        assert_eq!(tiling.num_tiles(), 0);
    }

    #[test]
    fn test_live_tiles_follow_viewport() {
        let mut tiling = tiling(Tree::Active, 1.0, 1000, 1000);
        let occlusion = Occlusion::new();
        tiling.compute_tile_priority_rects(Rect::new(0, 0, 100, 100), 1.0, 1.0, &occlusion, TilingContext::none());
        tiling.compute_tile_priority_rects(Rect::new(700, 700, 100, 100), 1.0, 2.0, &occlusion, TilingContext::none());

        let live = tiling.tiling_data().index_range(&tiling.live_tiles_rect()).unwrap();
        assert!(tiling.tiles().all(|t| live.contains(t.index())));
        assert!(tiling.tile_at(TileIndex::new(0, 0)).is_none());
    }

    #[test]
    fn test_invalidation_recreates_only_touched_tiles() {
        let mut tiling = tiling(Tree::Active, 1.0, 300, 300);
        tiling.compute_tile_priority_rects(Rect::new(0, 0, 300, 300), 1.0, 1.0, &Occlusion::new(), TilingContext::none());
        let before: HashMap<TileIndex, u64> = tiling.tiles().map(|t| (t.index(), t.id())).collect();

        tiling.invalidate(&Region::from_rect(Rect::new(110, 110, 10, 10)), TilingContext::none());

        let center = tiling.tile_at(TileIndex::new(1, 1)).unwrap();
        assert_ne!(center.id(), before[&TileIndex::new(1, 1)]);
        let link = center.invalidation().unwrap();
        assert_eq!(link.previous_tile_id, before[&TileIndex::new(1, 1)]);
        assert_eq!(link.invalidated_rect, Rect::new(110, 110, 10, 10));
        for tile in tiling.tiles().filter(|t| t.index() != TileIndex::new(1, 1)) {
            assert_eq!(tile.id(), before[&tile.index()]);
        }
    }

    #[test]
    fn test_pending_shares_active_tiles() {
        let mut active = tiling(Tree::Active, 1.0, 400, 400);
        let mut pending = tiling(Tree::Pending, 1.0, 400, 400);
        let occlusion = Occlusion::new();
        active.compute_tile_priority_rects(Rect::new(0, 0, 400, 400), 1.0, 1.0, &occlusion, TilingContext::none());

        let no_invalidation = Region::new();
        pending.compute_tile_priority_rects(
            Rect::new(0, 0, 400, 400),
            1.0,
            1.0,
            &occlusion,
            TilingContext::new(Some(&active), &no_invalidation),
        );
        assert_eq!(active.num_tiles(), 16);
        assert_eq!(pending.num_tiles(), 0);
    }

    #[test]
    fn test_pending_creates_invalidated_tiles_linked_to_active() {
        let mut active = tiling(Tree::Active, 1.0, 400, 400);
        let mut pending = tiling(Tree::Pending, 1.0, 400, 400);
        let occlusion = Occlusion::new();
        active.compute_tile_priority_rects(Rect::new(0, 0, 400, 400), 1.0, 1.0, &occlusion, TilingContext::none());

        let invalidation = Region::from_rect(Rect::new(0, 0, 50, 50));
        pending.compute_tile_priority_rects(
            Rect::new(0, 0, 400, 400),
            1.0,
            1.0,
            &occlusion,
            TilingContext::new(Some(&active), &invalidation),
        );
        assert_eq!(pending.num_tiles(), 1);
        let tile = pending.tile_at(TileIndex::new(0, 0)).unwrap();
        let old_id = active.tile_at(TileIndex::new(0, 0)).unwrap().id();
        assert_eq!(tile.invalidation().unwrap().previous_tile_id, old_id);
    }

    #[test]
    fn test_take_tiles_moves_everything() {
        let mut active = tiling(Tree::Active, 1.0, 400, 400);
        let mut pending = tiling(Tree::Pending, 1.0, 400, 400);
        let occlusion = Occlusion::new();
        pending.compute_tile_priority_rects(Rect::new(0, 0, 400, 400), 1.0, 1.0, &occlusion, TilingContext::none());
        let ids: Vec<u64> = pending.tiles().map(|t| t.id()).collect();

        active.take_tiles_and_properties_from(&mut pending, &Region::new());
        assert_eq!(pending.num_tiles(), 0);
        assert_eq!(active.num_tiles(), ids.len());
        assert!(ids.iter().all(|id| active.tiles().any(|t| t.id() == *id)));
        assert_eq!(active.current_visible_rect(), Rect::new(0, 0, 400, 400));
        assert_eq!(active.resolution(), TileResolution::High);
    }

    #[test]
    fn test_occluded_tiles() {
        let mut active = tiling(Tree::Active, 1.0, 400, 400);
        let occlusion = Occlusion::from_rect(Rect::new(0, 0, 100, 100));
        active.compute_tile_priority_rects(Rect::new(0, 0, 400, 400), 1.0, 1.0, &occlusion, TilingContext::none());

        let covered = active.tile_at(TileIndex::new(0, 0)).unwrap();
        let open = active.tile_at(TileIndex::new(1, 0)).unwrap();
        assert!(active.is_tile_occluded(covered, None));
        assert!(!active.is_tile_occluded(open, None));
        assert!(!active.is_tile_required_for_draw(covered));
        assert!(active.is_tile_required_for_draw(open));
        assert!(!active.all_tiles_done());
    }

    #[test]
    fn test_active_occlusion_defers_to_pending() {
        let mut active = tiling(Tree::Active, 1.0, 400, 400);
        let mut pending = tiling(Tree::Pending, 1.0, 400, 400);
        active.compute_tile_priority_rects(
            Rect::new(0, 0, 400, 400),
            1.0,
            1.0,
            &Occlusion::from_rect(Rect::new(0, 0, 100, 100)),
            TilingContext::none(),
        );
        let no_invalidation = Region::new();
        pending.compute_tile_priority_rects(
            Rect::new(0, 0, 400, 400),
            1.0,
            1.0,
            &Occlusion::new(),
            TilingContext::new(Some(&active), &no_invalidation),
        );

        // Pending shares the tile and sees it unoccluded
        let tile = active.tile_at(TileIndex::new(0, 0)).unwrap();
        assert!(!active.is_tile_occluded(tile, Some(&pending)));
        assert!(active.is_tile_occluded(tile, None));
    }

    #[test]
    fn test_required_for_activation() {
        let mut active = tiling(Tree::Active, 1.0, 400, 400);
        let mut pending = tiling(Tree::Pending, 1.0, 400, 400);
        pending.set_can_require_tiles_for_activation(true);
        let occlusion = Occlusion::new();
        active.compute_tile_priority_rects(Rect::new(0, 0, 200, 200), 1.0, 1.0, &occlusion, TilingContext::none());

        let invalidation = Region::from_rect(Rect::new(0, 0, 10, 10));
        let ctx = TilingContext::new(Some(&active), &invalidation);
        pending.compute_tile_priority_rects(Rect::new(0, 0, 200, 200), 1.0, 1.0, &occlusion, ctx);

        let recreated = pending.tile_at(TileIndex::new(0, 0)).unwrap();
        assert!(pending.is_tile_required_for_activation(recreated, ctx));

        // Shared visible tile: required through the active tree
        let shared = active.tile_at(TileIndex::new(1, 1)).unwrap();
        let active_ctx = TilingContext::new(Some(&pending), &invalidation);
        assert!(!active.is_tile_required_for_activation(shared, active_ctx));

        // Without a twin every visible tile is required
        let lonely_ctx = TilingContext::new(None, &invalidation);
        assert!(pending.is_tile_required_for_activation(recreated, lonely_ctx));
    }

    #[test]
    fn test_priority_distance_scales_to_screen() {
        let mut tiling = tiling(Tree::Active, 2.0, 500, 500);
        tiling.compute_tile_priority_rects(Rect::new(0, 0, 100, 100), 1.0, 1.0, &Occlusion::new(), TilingContext::none());
        // Content visible rect is (0,0,200,200); tile (3,0) starts 101px away in content space
        let tile = tiling.tile_at(TileIndex::new(3, 0)).unwrap();
        let rect_type = tiling.compute_priority_rect_type_for_tile(tile, None);
        let priority = tiling.compute_priority_for_tile(tile, rect_type);
        assert_eq!(priority.distance_to_visible, 101.0 * 0.5);
        assert_eq!(priority.resolution, TileResolution::High);
    }

    #[test]
    fn test_resize_drops_tiles_outside_bounds() {
        let mut tiling = tiling(Tree::Active, 1.0, 400, 400);
        tiling.compute_tile_priority_rects(Rect::new(0, 0, 400, 400), 1.0, 1.0, &Occlusion::new(), TilingContext::none());
        assert_eq!(tiling.num_tiles(), 16);

        tiling.set_raster_source_and_resize(source(200, 200));
        assert_eq!(tiling.num_tiles(), 4);
        assert_eq!(tiling.live_tiles_rect(), Rect::new(0, 0, 200, 200));
    }
}
