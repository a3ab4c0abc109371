//! Picture Layer Tiling Set
//!
//! Every tiling of one layer in one tree, sorted by contents scale from
//! largest to smallest. The set owns the raster scale policy that decides
//! which tilings exist and which of them is high-res and low-res.

use std::ops::Range;
use std::rc::Rc;
use std::sync::Arc;

use crate::client::TilingClient;
use crate::error::TilingError;
use crate::geometry::{Rect, Region};
use crate::layer::LayerId;
use crate::occlusion::Occlusion;
use crate::priority::{TileResolution, Tree};
use crate::raster_scale::{larger_ratio, RasterScales, ScaleInputs};
use crate::raster_source::RasterSource;
use crate::settings::TilingSettings;
use crate::tile::ResourceId;
use crate::tiling::{PictureLayerTiling, TilingContext};

static EMPTY_REGION: Region = Region::new();

/// Slice of the sorted tilings relative to the high- and low-res tilings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TilingRangeType {
    HigherThanHighRes,
    HighRes,
    BetweenHighAndLowRes,
    LowRes,
    LowerThanLowRes,
}

/// All tilings of one layer in one tree
#[derive(Debug)]
pub struct TilingSet {
    tree: Tree,
    layer_id: LayerId,
    client: Rc<dyn TilingClient>,
    settings: TilingSettings,
    raster_source: Arc<dyn RasterSource>,
    tilings: Vec<PictureLayerTiling>,
    /// Pending tree only: layer-space invalidation since the last activation
    invalidation: Region,
    scales: RasterScales,
    released_resources: Vec<ResourceId>,
}

impl TilingSet {
    pub fn new(
        tree: Tree,
        layer_id: LayerId,
        raster_source: Arc<dyn RasterSource>,
        client: Rc<dyn TilingClient>,
        settings: TilingSettings,
    ) -> Self {
        Self {
            tree,
            layer_id,
            client,
            settings,
            raster_source,
            tilings: Vec::new(),
            invalidation: Region::new(),
            scales: RasterScales::default(),
            released_resources: Vec::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn tree(&self) -> Tree {
        self.tree
    }

    pub fn layer_id(&self) -> LayerId {
        self.layer_id
    }

    pub fn client(&self) -> &Rc<dyn TilingClient> {
        &self.client
    }

    pub fn settings(&self) -> &TilingSettings {
        &self.settings
    }

    pub fn raster_source(&self) -> &Arc<dyn RasterSource> {
        &self.raster_source
    }

    pub fn num_tilings(&self) -> usize {
        self.tilings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tilings.is_empty()
    }

    pub fn tiling_at(&self, index: usize) -> &PictureLayerTiling {
        &self.tilings[index]
    }

    /// Tilings ordered from largest to smallest scale
    pub fn tilings(&self) -> &[PictureLayerTiling] {
        &self.tilings
    }

    pub fn tilings_mut(&mut self) -> &mut [PictureLayerTiling] {
        &mut self.tilings
    }

    /// Layer-space invalidation the pending tree has accumulated
    pub fn invalidation(&self) -> &Region {
        &self.invalidation
    }

    pub fn raster_scales(&self) -> &RasterScales {
        &self.scales
    }

    pub fn ideal_contents_scale(&self) -> f32 {
        self.scales.ideal_contents_scale
    }

    pub fn raster_contents_scale(&self) -> f32 {
        self.scales.raster_contents_scale
    }

    pub fn find_tiling_with_scale(&self, scale: f32) -> Option<&PictureLayerTiling> {
        self.tilings.iter().find(|t| t.contents_scale() == scale)
    }

    pub fn find_tiling_with_scale_mut(&mut self, scale: f32) -> Option<&mut PictureLayerTiling> {
        self.tilings.iter_mut().find(|t| t.contents_scale() == scale)
    }

    pub fn find_tiling_with_resolution(&self, resolution: TileResolution) -> Option<&PictureLayerTiling> {
        self.tilings.iter().find(|t| t.resolution() == resolution)
    }

    /// Total tiles across all tilings
    pub fn num_tiles(&self) -> usize {
        self.tilings.iter().map(|t| t.num_tiles()).sum()
    }

    /// Resources held by tiles dropped since the last call
    pub fn take_released_resources(&mut self) -> Vec<ResourceId> {
        let mut released = std::mem::take(&mut self.released_resources);
        for tiling in &mut self.tilings {
            released.extend(tiling.take_released_resources());
        }
        released
    }

    /// Smallest scale at which every dimension keeps at least one pixel
    pub fn minimum_contents_scale(&self) -> f32 {
        let setting_min = self.settings.minimum_contents_scale;
        let size = self.raster_source.size();
        let min_dimension = size.width.min(size.height);
        if min_dimension <= 0 {
            return setting_min;
        }
        setting_min.max(1.0 / min_dimension as f32)
    }

    /// Largest scale whose content bounds still fit in an `i32`
    pub fn maximum_contents_scale(&self) -> f32 {
        let size = self.raster_source.size();
        let higher_dimension = size.width.max(size.height);
        if higher_dimension <= 0 {
            return f32::MAX;
        }
        let max_scale = i32::MAX as f32 / higher_dimension as f32;
        max_scale * (1.0 - f32::EPSILON)
    }

    // ========================================================================
    // Tiling management
    // ========================================================================

    /// Add a tiling at `contents_scale` and keep the set sorted
    pub fn add_tiling(
        &mut self,
        contents_scale: f32,
        raster_source: Arc<dyn RasterSource>,
    ) -> Result<&mut PictureLayerTiling, TilingError> {
        if self.find_tiling_with_scale(contents_scale).is_some() {
            return Err(TilingError::DuplicateScale(contents_scale));
        }
        let tiling = PictureLayerTiling::new(
            self.tree,
            self.layer_id,
            contents_scale,
            raster_source,
            self.client.clone(),
            self.settings.clone(),
        )?;
        let position = self
            .tilings
            .partition_point(|t| t.contents_scale() > contents_scale);
        self.tilings.insert(position, tiling);
        Ok(&mut self.tilings[position])
    }

    fn remove_where(&mut self, remove: impl Fn(&PictureLayerTiling) -> bool) {
        let mut kept = Vec::with_capacity(self.tilings.len());
        for mut tiling in self.tilings.drain(..) {
            if remove(&tiling) {
                tracing::debug!(
                    layer = self.layer_id,
                    tree = ?self.tree,
                    contents_scale = tiling.contents_scale(),
                    "removed tiling"
                );
                tiling.reset();
                self.released_resources.extend(tiling.take_released_resources());
            } else {
                kept.push(tiling);
            }
        }
        self.tilings = kept;
    }

    pub fn remove_tiling(&mut self, contents_scale: f32) {
        self.remove_where(|t| t.contents_scale() == contents_scale);
    }

    /// Remove tilings with scale strictly below `minimum_scale`
    pub fn remove_tilings_below_scale(&mut self, minimum_scale: f32) {
        self.remove_where(|t| t.contents_scale() < minimum_scale);
    }

    /// Remove tilings with scale strictly above `maximum_scale`
    pub fn remove_tilings_above_scale(&mut self, maximum_scale: f32) {
        self.remove_where(|t| t.contents_scale() > maximum_scale);
    }

    pub fn remove_all_tilings(&mut self) {
        self.remove_where(|_| true);
    }

    pub fn remove_non_ideal_tilings(&mut self) {
        self.remove_where(|t| t.resolution() == TileResolution::NonIdeal);
    }

    pub fn mark_all_tilings_non_ideal(&mut self) {
        for tiling in &mut self.tilings {
            tiling.set_resolution(TileResolution::NonIdeal);
        }
    }

    /// Scale of an existing tiling within `snap_ratio` of `start_scale`, or
    /// `start_scale` itself
    pub fn get_snapped_contents_scale(&self, start_scale: f32, snap_ratio: f32) -> f32 {
        let mut snapped_scale = start_scale;
        let mut snapped_ratio = snap_ratio;
        for tiling in &self.tilings {
            let ratio = larger_ratio(tiling.contents_scale(), start_scale);
            if ratio < snapped_ratio {
                snapped_scale = tiling.contents_scale();
                snapped_ratio = ratio;
            }
        }
        snapped_scale
    }

    /// Index range of tilings relative to the high- and low-res tilings
    pub fn get_tiling_range(&self, range_type: TilingRangeType) -> Range<usize> {
        let count = self.tilings.len();
        let high_res = self
            .tilings
            .iter()
            .position(|t| t.resolution() == TileResolution::High)
            .map(|i| i..i + 1)
            .unwrap_or(0..0);
        let low_res = self
            .tilings
            .iter()
            .position(|t| t.resolution() == TileResolution::Low)
            .map(|i| i..i + 1)
            .unwrap_or(count..count);

        match range_type {
            TilingRangeType::HigherThanHighRes => 0..high_res.start,
            TilingRangeType::HighRes => high_res,
            TilingRangeType::BetweenHighAndLowRes => {
                if high_res.start <= low_res.start {
                    high_res.end..low_res.start
                } else {
                    low_res.end..high_res.start
                }
            }
            TilingRangeType::LowRes => low_res,
            TilingRangeType::LowerThanLowRes => low_res.end..count,
        }
    }

    /// Drop tilings outside `[min, max]` that are neither the low-res tiling
    /// (when one is wanted) nor used by the last draw. Non-ideal twins at the
    /// same scale go too.
    ///
    /// The high-res tiling always stays. Without one, the tiling closest to
    /// the ideal scale stays so the set never empties.
    pub fn clean_up_tilings(
        &mut self,
        min_acceptable_high_res_scale: f32,
        max_acceptable_high_res_scale: f32,
        used_tilings: &[f32],
        should_have_low_res: bool,
        twin_set: Option<&mut TilingSet>,
    ) {
        let mut to_remove: Vec<f32> = self
            .tilings
            .iter()
            .filter(|tiling| {
                let scale = tiling.contents_scale();
                if tiling.resolution() == TileResolution::High {
                    return false;
                }
                if scale >= min_acceptable_high_res_scale && scale <= max_acceptable_high_res_scale {
                    return false;
                }
                if should_have_low_res && tiling.resolution() == TileResolution::Low {
                    return false;
                }
                !used_tilings.contains(&scale)
            })
            .map(|tiling| tiling.contents_scale())
            .collect();

        if !to_remove.is_empty() && to_remove.len() == self.tilings.len() {
            let ideal = self.scales.ideal_contents_scale;
            let keep = to_remove
                .iter()
                .copied()
                .min_by(|a, b| larger_ratio(*a, ideal).total_cmp(&larger_ratio(*b, ideal)));
            to_remove.retain(|scale| Some(*scale) != keep);
        }

        if let Some(twin) = twin_set {
            for scale in &to_remove {
                if twin
                    .find_tiling_with_scale(*scale)
                    .is_some_and(|t| t.resolution() == TileResolution::NonIdeal)
                {
                    twin.remove_tiling(*scale);
                }
            }
        }
        for scale in to_remove {
            self.remove_tiling(scale);
        }
    }

    // ========================================================================
    // Raster scale policy
    // ========================================================================

    /// Update ideal and raster scales for this frame and make sure the
    /// high-res (and, on the active tree, low-res) tilings exist.
    ///
    /// Returns true if the raster scale was recalculated.
    pub fn update_tilings(&mut self, inputs: &ScaleInputs) -> bool {
        let min_scale = self.minimum_contents_scale();
        let max_scale = self.maximum_contents_scale();
        self.scales.update_ideal(inputs, min_scale);

        let adjust = self.scales.is_unset()
            || self.find_tiling_with_resolution(TileResolution::High).is_none()
            || self.scales.should_adjust(inputs, &self.settings, min_scale, max_scale);
        if adjust {
            let snap_ratio = self.settings.max_snap_ratio;
            let mut scales = self.scales;
            scales.recalculate(
                inputs,
                &self.settings,
                self.raster_source.size(),
                (min_scale, max_scale),
                |scale| self.get_snapped_contents_scale(scale, snap_ratio),
                |bounds| self.client.calculate_tile_size(bounds),
            );
            self.scales = scales;
            self.add_tilings_for_raster_scale();
        }

        if self.tree == Tree::Active {
            self.add_low_resolution_tiling_if_needed(inputs);
        }
        self.scales.was_animating = inputs.is_animating;
        adjust
    }

    fn add_tilings_for_raster_scale(&mut self) {
        self.mark_all_tilings_non_ideal();

        let raster_scale = self.scales.raster_contents_scale;
        match self.find_tiling_with_scale_mut(raster_scale) {
            Some(tiling) => {
                // A former low-res tiling may hold blurry tiles
                if tiling.may_contain_low_resolution_tiles() {
                    tiling.reset();
                }
                tiling.set_resolution(TileResolution::High);
            }
            None => {
                let source = self.raster_source.clone();
                match self.add_tiling(raster_scale, source) {
                    Ok(tiling) => tiling.set_resolution(TileResolution::High),
                    Err(err) => tracing::warn!(layer = self.layer_id, %err, "could not add high-res tiling"),
                }
            }
        }

        if self.tree == Tree::Pending {
            self.remove_non_ideal_tilings();
        }
    }

    fn add_low_resolution_tiling_if_needed(&mut self, inputs: &ScaleInputs) {
        if !self.settings.create_low_res_tiling {
            return;
        }
        let low_res_scale = self.scales.low_res_raster_contents_scale;
        if low_res_scale == self.scales.raster_contents_scale || low_res_scale == 0.0 {
            return;
        }
        // Low-res tiles would only be wasted mid-gesture
        if inputs.is_pinching || inputs.is_animating {
            return;
        }

        match self.find_tiling_with_scale_mut(low_res_scale) {
            Some(tiling) => {
                if tiling.resolution() != TileResolution::High {
                    tiling.set_resolution(TileResolution::Low);
                }
            }
            None => {
                let source = self.raster_source.clone();
                match self.add_tiling(low_res_scale, source) {
                    Ok(tiling) => tiling.set_resolution(TileResolution::Low),
                    Err(err) => tracing::warn!(layer = self.layer_id, %err, "could not add low-res tiling"),
                }
            }
        }
    }

    /// Forget raster scales so the next update rebuilds the tilings
    pub fn reset_raster_scales(&mut self) {
        self.scales.reset_raster_scales();
    }

    // ========================================================================
    // Frame updates
    // ========================================================================

    /// Recompute priority rects on every tiling and refresh required flags.
    ///
    /// Returns true if any tiling changed.
    pub fn update_tile_priorities(
        &mut self,
        twin_set: Option<&TilingSet>,
        viewport_in_layer_space: Rect,
        ideal_contents_scale: f32,
        frame_time_in_seconds: f64,
        occlusion: &Occlusion,
        can_require_tiles_for_activation: bool,
    ) -> bool {
        let pending_invalidation = match self.tree {
            Tree::Pending => &self.invalidation,
            Tree::Active => twin_set.map(|t| &t.invalidation).unwrap_or(&EMPTY_REGION),
        };

        let mut updated = false;
        for tiling in self.tilings.iter_mut() {
            let twin = twin_set.and_then(|s| s.find_tiling_with_scale(tiling.contents_scale()));
            let ctx = TilingContext::new(twin, pending_invalidation);
            tiling.set_can_require_tiles_for_activation(can_require_tiles_for_activation);
            updated |= tiling.compute_tile_priority_rects(
                viewport_in_layer_space,
                ideal_contents_scale,
                frame_time_in_seconds,
                occlusion,
                ctx,
            );
            tiling.update_required_states_on_tiles(ctx);
        }
        updated
    }

    /// Context for a tiling of this set, given the other tree's set
    pub fn context_for<'a>(&'a self, contents_scale: f32, twin_set: Option<&'a TilingSet>) -> TilingContext<'a> {
        let pending_invalidation = match self.tree {
            Tree::Pending => &self.invalidation,
            Tree::Active => twin_set.map(|t| &t.invalidation).unwrap_or(&EMPTY_REGION),
        };
        let twin = twin_set.and_then(|s| s.find_tiling_with_scale(contents_scale));
        TilingContext::new(twin, pending_invalidation)
    }

    /// Refresh the required flags of every tile against the other tree
    pub fn update_required_states(&mut self, twin_set: Option<&TilingSet>) {
        let pending_invalidation = match self.tree {
            Tree::Pending => &self.invalidation,
            Tree::Active => twin_set.map(|t| &t.invalidation).unwrap_or(&EMPTY_REGION),
        };
        for tiling in self.tilings.iter_mut() {
            let twin = twin_set.and_then(|s| s.find_tiling_with_scale(tiling.contents_scale()));
            tiling.update_required_states_on_tiles(TilingContext::new(twin, pending_invalidation));
        }
    }

    /// Pending tree: adopt a newly committed raster source and invalidation
    pub fn update_tilings_to_current_raster_source_for_commit(
        &mut self,
        raster_source: Arc<dyn RasterSource>,
        invalidation: &Region,
        active_set: Option<&TilingSet>,
    ) {
        debug_assert_eq!(self.tree, Tree::Pending);
        self.raster_source = raster_source;
        for rect in invalidation.rects() {
            self.invalidation.union_rect(*rect);
        }

        let minimum_scale = self.minimum_contents_scale();
        let maximum_scale = self.maximum_contents_scale();
        self.remove_tilings_below_scale(minimum_scale);
        self.remove_tilings_above_scale(maximum_scale);

        for tiling in self.tilings.iter_mut() {
            let twin = active_set.and_then(|s| s.find_tiling_with_scale(tiling.contents_scale()));
            let ctx = TilingContext::new(twin, &self.invalidation);
            tiling.set_raster_source_and_resize(self.raster_source.clone());
            tiling.invalidate(invalidation, ctx);
            tiling.create_missing_tiles_in_live_tiles_rect(ctx);
        }
    }

    /// Active tree: take everything from the pending set at activation.
    ///
    /// Shared tilings take the pending tiles; tilings only the active tree
    /// has are invalidated in place and demoted to non-ideal.
    pub fn update_tilings_to_current_raster_source_for_activation(&mut self, pending_set: &mut TilingSet) {
        debug_assert_eq!(self.tree, Tree::Active);
        let invalidation = std::mem::take(&mut pending_set.invalidation);
        self.raster_source = pending_set.raster_source.clone();
        self.scales = pending_set.scales;

        let minimum_scale = self.minimum_contents_scale();
        let maximum_scale = self.maximum_contents_scale();
        self.remove_tilings_below_scale(minimum_scale);
        self.remove_tilings_above_scale(maximum_scale);

        self.copy_tilings_and_properties_from_pending_twin(pending_set, &invalidation);

        for tiling in self.tilings.iter_mut() {
            if pending_set.find_tiling_with_scale(tiling.contents_scale()).is_some() {
                continue;
            }
            tiling.set_raster_source_and_resize(self.raster_source.clone());
            tiling.invalidate(&invalidation, TilingContext::none());
            tiling.create_missing_tiles_in_live_tiles_rect(TilingContext::none());
            tiling.set_resolution(TileResolution::NonIdeal);
        }
        self.released_resources.extend(pending_set.take_released_resources());

        tracing::debug!(
            layer = self.layer_id,
            tilings = self.tilings.len(),
            tiles = self.num_tiles(),
            invalidated_rects = invalidation.rects().len(),
            "activated tiling set"
        );
    }

    fn copy_tilings_and_properties_from_pending_twin(&mut self, pending_set: &mut TilingSet, invalidation: &Region) {
        if pending_set.tilings.is_empty() {
            self.remove_all_tilings();
            return;
        }

        for pending_tiling in pending_set.tilings.iter_mut() {
            let scale = pending_tiling.contents_scale();
            if self.find_tiling_with_scale(scale).is_none() {
                let source = self.raster_source.clone();
                if let Err(err) = self.add_tiling(scale, source) {
                    tracing::warn!(layer = self.layer_id, %err, "could not mirror pending tiling");
                    continue;
                }
            }
            if let Some(tiling) = self.find_tiling_with_scale_mut(scale) {
                tiling.take_tiles_and_properties_from(pending_tiling, invalidation);
            }
        }
    }
}
