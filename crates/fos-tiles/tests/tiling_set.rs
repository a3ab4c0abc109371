//! Raster scale and tiling set behavior across frames

use std::rc::Rc;
use std::sync::Arc;

use fos_tiles::{
    FixedTileSizeClient, FrameInputs, LayerTilingClient, PictureLayer, RasterSource, RecordedRasterSource, Rect,
    Region, ScaleInputs, Size, TileManager, TileResolution, TilingClient, TilingSet, TilingSettings, Tree,
    TreePriority,
};

// ============================================================================
// Helpers
// ============================================================================

fn fixed_client() -> Rc<dyn TilingClient> {
    Rc::new(FixedTileSizeClient::new(Size::new(100, 100)))
}

fn source(width: i32, height: i32) -> Arc<dyn RasterSource> {
    Arc::new(RecordedRasterSource::new(Size::new(width, height)))
}

fn active_set(client: Rc<dyn TilingClient>, width: i32, height: i32) -> TilingSet {
    TilingSet::new(Tree::Active, 1, source(width, height), client, TilingSettings::default())
}

fn high_res_scale(set: &TilingSet) -> Option<f32> {
    set.find_tiling_with_resolution(TileResolution::High)
        .map(|t| t.contents_scale())
}

fn low_res_scale(set: &TilingSet) -> Option<f32> {
    set.find_tiling_with_resolution(TileResolution::Low)
        .map(|t| t.contents_scale())
}

fn assert_low_res_near(set: &TilingSet, expected: f32) {
    let scale = low_res_scale(set).expect("low-res tiling");
    assert!((scale - expected).abs() < 1e-4, "low-res scale {scale}, expected {expected}");
}

fn frame(size: i32) -> FrameInputs {
    FrameInputs {
        viewport_in_layer_space: Rect::new(0, 0, size, size),
        frame_time_in_seconds: 1.0,
        can_require_tiles_for_activation: true,
        ..FrameInputs::default()
    }
}

// ============================================================================
// Scale changes
// ============================================================================

#[test]
fn test_device_and_page_scale_changes_add_tilings() {
    let settings = TilingSettings::default();
    let client: Rc<dyn TilingClient> = Rc::new(LayerTilingClient::new(settings));
    let mut set = active_set(client, 1300, 1900);

    set.update_tilings(&ScaleInputs::new(6.0, 3.0, 2.0));
    assert_eq!(set.num_tilings(), 2);
    assert_eq!(high_res_scale(&set), Some(6.0));
    assert_low_res_near(&set, 1.5);

    // Device scale change
    set.update_tilings(&ScaleInputs::new(6.6, 3.3, 2.0));
    assert_eq!(set.num_tilings(), 4);
    assert_eq!(high_res_scale(&set), Some(6.6));
    assert_low_res_near(&set, 1.65);

    // Page scale change
    set.update_tilings(&ScaleInputs::new(7.26, 3.3, 2.2));
    assert_eq!(set.num_tilings(), 6);
    assert_eq!(high_res_scale(&set), Some(7.26));
    assert_low_res_near(&set, 1.815);

    // Same contents scale reached through different factors reuses tilings
    set.update_tilings(&ScaleInputs::new(7.26, 2.2, 3.3));
    assert_eq!(set.num_tilings(), 6);
    assert_eq!(high_res_scale(&set), Some(7.26));
    assert_low_res_near(&set, 1.815);

    let non_ideal = set
        .tilings()
        .iter()
        .filter(|t| t.resolution() == TileResolution::NonIdeal)
        .count();
    assert_eq!(non_ideal, 4);
}

#[test]
fn test_pinch_steps_in_powers_of_two() {
    let mut set = active_set(fixed_client(), 1000, 1000);

    set.update_tilings(&ScaleInputs::new(2.0, 1.0, 2.0));
    assert_eq!(high_res_scale(&set), Some(2.0));
    assert_eq!(low_res_scale(&set), Some(0.5));

    // Zooming out halves the raster scale and skips low-res
    set.update_tilings(&ScaleInputs::new(1.8, 1.0, 1.8).pinching(true));
    assert_eq!(high_res_scale(&set), Some(1.0));
    assert_eq!(low_res_scale(&set), None);
    assert_eq!(set.num_tilings(), 3);

    // Snaps onto the existing 0.5 tiling
    set.update_tilings(&ScaleInputs::new(0.525, 1.0, 0.525).pinching(true));
    assert_eq!(high_res_scale(&set), Some(0.5));
    assert_eq!(set.num_tilings(), 3);

    // Zooming in far past the pinch ratio doubles until it covers the ideal
    set.update_tilings(&ScaleInputs::new(3.8, 1.0, 3.8).pinching(true));
    assert_eq!(high_res_scale(&set), Some(4.0));
    assert_eq!(set.num_tilings(), 4);

    // Pinch ends at the same scale: low-res comes back on an existing tiling
    set.update_tilings(&ScaleInputs::new(4.0, 1.0, 4.0));
    assert_eq!(high_res_scale(&set), Some(4.0));
    assert_eq!(low_res_scale(&set), Some(1.0));
    assert_eq!(set.num_tilings(), 4);
}

#[test]
fn test_pinch_zoom_in_within_ratio_keeps_tiling() {
    let mut set = active_set(fixed_client(), 1000, 1000);
    set.update_tilings(&ScaleInputs::new(1.0, 1.0, 1.0));

    let adjusted = set.update_tilings(&ScaleInputs::new(1.5, 1.0, 1.5).pinching(true));
    assert!(!adjusted);
    assert_eq!(high_res_scale(&set), Some(1.0));
}

#[test]
fn test_pinch_with_unit_ratio_follows_ideal_scale() {
    let settings = TilingSettings {
        pinch_rescale_ratio: 1.0,
        ..TilingSettings::default()
    };
    let mut set = TilingSet::new(Tree::Active, 1, source(1000, 1000), fixed_client(), settings);
    set.update_tilings(&ScaleInputs::new(1.0, 1.0, 1.0));

    assert!(set.update_tilings(&ScaleInputs::new(0.5, 1.0, 0.5).pinching(true)));
    assert_eq!(high_res_scale(&set), Some(0.5));
}

#[test]
fn test_animation_uses_starting_scale_that_fits() {
    let mut set = active_set(fixed_client(), 100, 100);
    let inputs = ScaleInputs::new(3.0, 1.0, 1.0).animating(4.0, 2.0, Size::new(1000, 1000));
    set.update_tilings(&inputs);

    assert_eq!(high_res_scale(&set), Some(2.0));
    // No low-res while animating
    assert_eq!(low_res_scale(&set), None);
}

// ============================================================================
// Commit and activation
// ============================================================================

#[test]
fn test_commit_without_invalidation_shares_every_tile() {
    let settings = TilingSettings::default();
    let mut layer = PictureLayer::new(1, source(400, 400), fixed_client(), settings);
    layer.update_tiles(Tree::Active, &frame(400));
    let active = layer.active().find_tiling_with_resolution(TileResolution::High).unwrap();
    assert_eq!(active.num_tiles(), 16);

    layer.commit(source(400, 400), Region::new());
    layer.update_tiles(Tree::Pending, &frame(400));
    assert_eq!(layer.pending().num_tilings(), 1);
    assert_eq!(layer.pending().num_tiles(), 0);

    let manager = TileManager::default();
    assert!(manager.is_ready_to_activate(std::slice::from_ref(&layer)));
}

#[test]
fn test_commit_with_invalidation_creates_linked_tiles() {
    let mut layer = PictureLayer::new(1, source(400, 400), fixed_client(), TilingSettings::default());
    layer.update_tiles(Tree::Active, &frame(400));
    let active = layer.active().find_tiling_with_resolution(TileResolution::High).unwrap();
    let old_ids: Vec<_> = active.tiles().map(|t| t.id()).collect();

    layer.commit(source(400, 400), Region::from_rect(Rect::new(0, 0, 150, 150)));
    layer.update_tiles(Tree::Pending, &frame(400));

    let pending = layer.pending().find_tiling_with_resolution(TileResolution::High).unwrap();
    assert_eq!(pending.num_tiles(), 4);
    for tile in pending.tiles() {
        let invalidation = tile.invalidation().unwrap();
        assert!(old_ids.contains(&invalidation.previous_tile_id));
        assert!(!old_ids.contains(&tile.id()));
    }
}

#[test]
fn test_clean_up_keeps_tilings_in_use() {
    let mut layer = PictureLayer::new(1, source(1000, 1000), fixed_client(), TilingSettings::default());
    for scale in [1.0, 2.0, 4.0] {
        let inputs = FrameInputs {
            scale: ScaleInputs::new(scale, 1.0, scale),
            ..frame(1000)
        };
        layer.update_tiles(Tree::Active, &inputs);
    }
    assert_eq!(layer.active().num_tilings(), 5);

    layer.clean_up_tilings(&[2.0]);
    let scales: Vec<f32> = layer.active().tilings().iter().map(|t| t.contents_scale()).collect();
    assert_eq!(scales, vec![4.0, 2.0, 1.0]);
}

#[test]
fn test_zero_default_tile_size_creates_no_tilings() {
    let settings = TilingSettings {
        default_tile_size: Size::new(0, 0),
        ..TilingSettings::default()
    };
    let client: Rc<dyn TilingClient> = Rc::new(LayerTilingClient::new(settings.clone()));
    let mut layer = PictureLayer::new(1, source(1000, 1000), client, settings);
    layer.update_tiles(Tree::Active, &frame(1000));
    assert_eq!(layer.active().num_tilings(), 0);

    let mut manager = TileManager::default();
    let mut layers = vec![layer];
    assert!(manager.prepare_tiles(&mut layers, TreePriority::default()).is_empty());
}

#[test]
fn test_empty_layer_has_no_tilings() {
    let mut layer = PictureLayer::new(1, source(0, 0), fixed_client(), TilingSettings::default());
    layer.update_tiles(Tree::Active, &frame(100));
    assert_eq!(layer.active().num_tiles(), 0);

    let mut manager = TileManager::default();
    let mut layers = vec![layer];
    let tasks = manager.prepare_tiles(&mut layers, TreePriority::default());
    assert!(tasks.is_empty());
    assert!(manager.is_ready_to_draw(&layers));
}
