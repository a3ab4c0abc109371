//! Picture Layer
//!
//! Owns both generations of a layer's tilings. Tiles are addressed across
//! the two trees by [`TileKey`], so a tiling never holds a pointer to its
//! twin; the other tree's set is handed in whenever it is needed.

use std::rc::Rc;
use std::sync::Arc;

use crate::client::TilingClient;
use crate::geometry::{Rect, Region};
use crate::occlusion::Occlusion;
use crate::priority::Tree;
use crate::raster_scale::ScaleInputs;
use crate::raster_source::RasterSource;
use crate::settings::TilingSettings;
use crate::tile::{ResourceId, Tile, TileKey};
use crate::tiling_set::TilingSet;

/// Layer ID type
pub type LayerId = u32;

/// Everything a layer needs to update its tiles for one frame
#[derive(Debug, Clone, Default)]
pub struct FrameInputs {
    pub viewport_in_layer_space: Rect,
    pub frame_time_in_seconds: f64,
    pub occlusion: Occlusion,
    pub scale: ScaleInputs,
    /// The pending tree may hold back activation for missing tiles
    pub can_require_tiles_for_activation: bool,
}

/// Borrowed view of one layer's two tiling sets, as queues consume them
#[derive(Debug, Clone, Copy)]
pub struct LayerPair<'a> {
    pub active: Option<&'a TilingSet>,
    pub pending: Option<&'a TilingSet>,
}

impl<'a> LayerPair<'a> {
    /// The set of `tree` and the other tree's set
    pub fn set_and_twin(&self, tree: Tree) -> (Option<&'a TilingSet>, Option<&'a TilingSet>) {
        match tree {
            Tree::Active => (self.active, self.pending),
            Tree::Pending => (self.pending, self.active),
        }
    }
}

/// A layer drawn from recorded content through tiles
#[derive(Debug)]
pub struct PictureLayer {
    id: LayerId,
    active: TilingSet,
    pending: TilingSet,
    has_pending_tree: bool,
}

impl PictureLayer {
    pub fn new(
        id: LayerId,
        raster_source: Arc<dyn RasterSource>,
        client: Rc<dyn TilingClient>,
        settings: TilingSettings,
    ) -> Self {
        Self {
            id,
            active: TilingSet::new(Tree::Active, id, raster_source.clone(), client.clone(), settings.clone()),
            pending: TilingSet::new(Tree::Pending, id, raster_source, client, settings),
            has_pending_tree: false,
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn active(&self) -> &TilingSet {
        &self.active
    }

    pub fn pending(&self) -> &TilingSet {
        &self.pending
    }

    pub fn active_mut(&mut self) -> &mut TilingSet {
        &mut self.active
    }

    pub fn pending_mut(&mut self) -> &mut TilingSet {
        &mut self.pending
    }

    /// True between a commit and the following activation
    pub fn has_pending_tree(&self) -> bool {
        self.has_pending_tree
    }

    pub fn set(&self, tree: Tree) -> &TilingSet {
        match tree {
            Tree::Active => &self.active,
            Tree::Pending => &self.pending,
        }
    }

    pub fn set_mut(&mut self, tree: Tree) -> &mut TilingSet {
        match tree {
            Tree::Active => &mut self.active,
            Tree::Pending => &mut self.pending,
        }
    }

    /// View used to build queues
    pub fn pair(&self) -> LayerPair<'_> {
        LayerPair {
            active: Some(&self.active),
            pending: self.has_pending_tree.then_some(&self.pending),
        }
    }

    /// Start a pending tree with new content and its invalidation
    pub fn commit(&mut self, raster_source: Arc<dyn RasterSource>, invalidation: Region) {
        self.has_pending_tree = true;
        self.pending
            .update_tilings_to_current_raster_source_for_commit(raster_source, &invalidation, Some(&self.active));
        tracing::debug!(layer = self.id, invalidated_rects = invalidation.rects().len(), "committed pending tree");
    }

    /// Update tilings and priority rects of one tree for a frame.
    ///
    /// Returns true if any tiling's priority rects changed.
    pub fn update_tiles(&mut self, tree: Tree, inputs: &FrameInputs) -> bool {
        let has_pending_tree = self.has_pending_tree;
        let (set, twin) = match tree {
            Tree::Active => (&mut self.active, has_pending_tree.then_some(&self.pending)),
            Tree::Pending => (&mut self.pending, Some(&self.active)),
        };

        set.update_tilings(&inputs.scale);
        let ideal_contents_scale = set.ideal_contents_scale();
        set.update_tile_priorities(
            twin,
            inputs.viewport_in_layer_space,
            ideal_contents_scale,
            inputs.frame_time_in_seconds,
            &inputs.occlusion,
            inputs.can_require_tiles_for_activation,
        )
    }

    /// Re-evaluate the stored required flags on both trees
    pub fn update_required_states(&mut self) {
        if self.has_pending_tree {
            self.pending.update_required_states(Some(&self.active));
            self.active.update_required_states(Some(&self.pending));
        } else {
            self.active.update_required_states(None);
        }
    }

    /// Swap the pending tree in. Shared tiles move to the active tree.
    pub fn activate(&mut self) {
        self.active
            .update_tilings_to_current_raster_source_for_activation(&mut self.pending);
        self.has_pending_tree = false;
    }

    /// Remove active tilings outside the acceptable scale range unless the
    /// last draw used them
    pub fn clean_up_tilings(&mut self, used_tilings: &[f32]) {
        if self.active.is_empty() {
            return;
        }
        let active_scales = self.active.raster_scales();
        let mut min_scale = active_scales.raster_contents_scale.min(active_scales.ideal_contents_scale);
        let mut max_scale = active_scales.raster_contents_scale.max(active_scales.ideal_contents_scale);

        if self.has_pending_tree && !self.pending.raster_scales().is_unset() {
            let pending_scales = self.pending.raster_scales();
            min_scale = min_scale.min(pending_scales.raster_contents_scale.min(pending_scales.ideal_contents_scale));
            max_scale = max_scale.max(pending_scales.raster_contents_scale.max(pending_scales.ideal_contents_scale));
        }

        let should_have_low_res = self.active.settings().create_low_res_tiling;
        let twin = self.has_pending_tree.then_some(&mut self.pending);
        self.active
            .clean_up_tilings(min_scale, max_scale, used_tilings, should_have_low_res, twin);
        debug_assert!(!self.active.is_empty(), "clean up removed every tiling");
    }

    /// Look up a tile by key
    pub fn tile(&self, key: &TileKey) -> Option<&Tile> {
        if key.layer != self.id {
            return None;
        }
        self.set(key.tree)
            .find_tiling_with_scale(key.contents_scale)?
            .tile_at(key.index)
    }

    /// Look up a tile by key for mutation
    pub fn tile_mut(&mut self, key: &TileKey) -> Option<&mut Tile> {
        if key.layer != self.id {
            return None;
        }
        self.set_mut(key.tree)
            .find_tiling_with_scale_mut(key.contents_scale)?
            .tile_at_mut(key.index)
    }

    /// Mark every tiling of both trees as having nothing left to raster
    pub fn set_all_tiles_done(&mut self) {
        for tiling in self.active.tilings_mut().iter_mut().chain(self.pending.tilings_mut().iter_mut()) {
            tiling.set_all_tiles_done(true);
        }
    }

    /// Resources held by tiles either tree has dropped
    pub fn take_released_resources(&mut self) -> Vec<ResourceId> {
        let mut released = self.active.take_released_resources();
        released.extend(self.pending.take_released_resources());
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FixedTileSizeClient;
    use crate::geometry::Size;
    use crate::priority::TileResolution;
    use crate::raster_source::RecordedRasterSource;
    use crate::tiling_data::TileIndex;

    fn layer(size: i32) -> PictureLayer {
        let client: Rc<dyn TilingClient> = Rc::new(FixedTileSizeClient::new(Size::new(100, 100)));
        let source: Arc<dyn RasterSource> = Arc::new(RecordedRasterSource::new(Size::new(size, size)));
        PictureLayer::new(7, source, client, TilingSettings::default())
    }

    fn inputs(size: i32) -> FrameInputs {
        FrameInputs {
            viewport_in_layer_space: Rect::new(0, 0, size, size),
            frame_time_in_seconds: 1.0,
            can_require_tiles_for_activation: true,
            ..FrameInputs::default()
        }
    }

    #[test]
    fn test_pair_hides_pending_without_commit() {
        let layer = layer(400);
        assert!(layer.pair().pending.is_none());
        assert!(layer.pair().active.is_some());
    }

    #[test]
    fn test_tile_lookup_by_key() {
        let mut layer = layer(400);
        layer.update_tiles(Tree::Active, &inputs(400));
        let tiling = layer.active().find_tiling_with_resolution(TileResolution::High).unwrap();
        let key = tiling.key_for(TileIndex::new(1, 1));
        let id = layer.tile(&key).unwrap().id();

        assert_eq!(layer.tile_mut(&key).unwrap().id(), id);
        let foreign = TileKey { layer: 8, ..key };
        assert!(layer.tile(&foreign).is_none());
    }

    #[test]
    fn test_activation_moves_pending_tiles() {
        let mut layer = layer(400);
        layer.update_tiles(Tree::Active, &inputs(400));

        let source: Arc<dyn RasterSource> = Arc::new(RecordedRasterSource::new(Size::new(400, 400)));
        layer.commit(source, Region::from_rect(Rect::new(0, 0, 10, 10)));
        layer.update_tiles(Tree::Pending, &inputs(400));

        let pending = layer.pending().find_tiling_with_resolution(TileResolution::High).unwrap();
        assert_eq!(pending.num_tiles(), 1);
        let new_id = pending.tile_at(TileIndex::new(0, 0)).unwrap().id();

        layer.activate();
        let active = layer.active().find_tiling_with_resolution(TileResolution::High).unwrap();
        assert_eq!(active.tile_at(TileIndex::new(0, 0)).unwrap().id(), new_id);
        assert_eq!(active.num_tiles(), 16);
        assert_eq!(layer.pending().num_tiles(), 0);
        assert!(!layer.has_pending_tree());
        assert!(layer.pending().invalidation().is_empty());
    }
}
