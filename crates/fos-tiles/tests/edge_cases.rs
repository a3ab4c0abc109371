//! Tile manager behavior around commits, activation and memory pressure

use std::rc::Rc;
use std::sync::Arc;

use fos_tiles::{
    Color, DrawMode, FixedTileSizeClient, FrameInputs, PictureLayer, RasterCompletion, RasterError, RasterOutcome,
    RasterSource, RecordedRasterSource, Rect, Region, Size, TileIndex, TileKey, TileManager, TileManagerSettings,
    TileResolution, TilingClient, TilingSettings, Tree, TreePriority,
};

// ============================================================================
// Helpers
// ============================================================================

const TILE_BYTES: usize = 100 * 100 * 4;

fn client() -> Rc<dyn TilingClient> {
    Rc::new(FixedTileSizeClient::new(Size::new(100, 100)))
}

fn transparent(size: i32) -> Arc<dyn RasterSource> {
    Arc::new(RecordedRasterSource::new(Size::new(size, size)))
}

fn translucent(size: i32) -> Arc<dyn RasterSource> {
    let mut source = RecordedRasterSource::new(Size::new(size, size));
    source.push_rect(Rect::new(0, 0, size, size), Color::rgba(0, 0, 255, 100));
    Arc::new(source)
}

fn settings() -> TilingSettings {
    TilingSettings {
        tiling_interest_area_padding: 100,
        create_low_res_tiling: false,
        ..TilingSettings::default()
    }
}

fn frame(viewport: Rect, time: f64) -> FrameInputs {
    FrameInputs {
        viewport_in_layer_space: viewport,
        frame_time_in_seconds: time,
        can_require_tiles_for_activation: true,
        ..FrameInputs::default()
    }
}

fn manager(memory_limit_bytes: usize) -> TileManager {
    TileManager::new(TileManagerSettings {
        memory_limit_bytes,
        max_tasks_per_prepare: 1000,
        ..TileManagerSettings::default()
    })
}

/// Active layer with a pending tree that replaces tile (0, 0)
fn committed_layer() -> PictureLayer {
    let mut layer = PictureLayer::new(1, transparent(400), client(), settings());
    layer.update_tiles(Tree::Active, &frame(Rect::new(0, 0, 400, 400), 1.0));
    layer.commit(transparent(400), Region::from_rect(Rect::new(0, 0, 10, 10)));
    layer.update_tiles(Tree::Pending, &frame(Rect::new(0, 0, 400, 400), 1.0));
    layer
}

// ============================================================================
// Completions
// ============================================================================

#[test]
fn test_completion_for_replaced_tile_is_rejected() {
    let mut layers = vec![committed_layer()];
    let mut manager = manager(64 * 1024 * 1024);
    let tasks = manager.prepare_tiles(&mut layers, TreePriority::NewContentTakesPriority);
    let task = tasks.iter().find(|t| t.key.tree == Tree::Pending).unwrap().clone();

    // A second commit invalidates the tile while its raster is in flight
    layers[0].commit(transparent(400), Region::from_rect(Rect::new(0, 0, 10, 10)));

    let err = manager
        .did_finish_raster(
            &mut layers,
            RasterCompletion {
                task: task.id,
                key: task.key,
                tile_id: task.tile_id,
                outcome: RasterOutcome::SolidColor(Color::WHITE),
            },
        )
        .unwrap_err();
    assert!(matches!(err, RasterError::TileMismatch { expected, .. } if expected == task.tile_id));
    assert_eq!(manager.stats().completions_rejected, 1);
}

#[test]
fn test_completion_follows_tile_through_activation() {
    let mut layers = vec![committed_layer()];
    let mut manager = manager(64 * 1024 * 1024);
    let tasks = manager.prepare_tiles(&mut layers, TreePriority::NewContentTakesPriority);
    let task = tasks.iter().find(|t| t.key.tree == Tree::Pending).unwrap().clone();

    layers[0].activate();

    manager
        .did_finish_raster(
            &mut layers,
            RasterCompletion {
                task: task.id,
                key: task.key,
                tile_id: task.tile_id,
                outcome: RasterOutcome::SolidColor(Color::WHITE),
            },
        )
        .unwrap();

    let active = layers[0].active().find_tiling_with_resolution(TileResolution::High).unwrap();
    let tile = active.tile_at(task.key.index).unwrap();
    assert_eq!(tile.id(), task.tile_id);
    assert_eq!(tile.draw_info().mode(), DrawMode::SolidColor(Color::WHITE));
}

#[test]
fn test_completion_for_dropped_tile_releases_resource() {
    let mut layers = vec![PictureLayer::new(1, translucent(100), client(), settings())];
    layers[0].update_tiles(Tree::Active, &frame(Rect::new(0, 0, 100, 100), 1.0));
    let mut manager = manager(64 * 1024 * 1024);
    let tasks = manager.prepare_tiles(&mut layers, TreePriority::default());
    assert_eq!(tasks.len(), 1);

    // Move the viewport away so the tile leaves the live tiles rect
    let mut big = PictureLayer::new(1, translucent(2000), client(), settings());
    big.update_tiles(Tree::Active, &frame(Rect::new(1500, 1500, 100, 100), 1.0));
    layers[0] = big;

    let errors = manager.run_tasks(&mut layers, &tasks);
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], RasterError::TileNotFound { .. }));
    assert_eq!(manager.pool().in_use_bytes(), 0);
}

// ============================================================================
// Memory pressure
// ============================================================================

#[test]
fn test_lower_limit_evicts_and_marks_out_of_memory() {
    let mut layers = vec![PictureLayer::new(1, translucent(200), client(), settings())];
    layers[0].update_tiles(Tree::Active, &frame(Rect::new(0, 0, 200, 200), 1.0));
    let mut manager = manager(64 * 1024 * 1024);

    let tasks = manager.prepare_tiles(&mut layers, TreePriority::default());
    assert_eq!(tasks.len(), 4);
    assert!(manager.run_tasks(&mut layers, &tasks).is_empty());
    assert_eq!(manager.memory_usage_bytes(), 4 * TILE_BYTES);

    manager.set_memory_limit_bytes(2 * TILE_BYTES);
    let tasks = manager.prepare_tiles(&mut layers, TreePriority::default());
    assert!(tasks.is_empty());
    assert_eq!(manager.stats().tiles_evicted, 2);
    assert_eq!(manager.memory_usage_bytes(), 2 * TILE_BYTES);

    // The evicted tiles are visible but cannot displace equally urgent ones
    let tasks = manager.prepare_tiles(&mut layers, TreePriority::default());
    assert!(tasks.is_empty());
    assert_eq!(manager.stats().tiles_evicted, 2);

    let tiling = layers[0].active().tiling_at(0);
    let out_of_memory = tiling
        .tiles()
        .filter(|t| t.draw_info().mode() == DrawMode::OutOfMemory)
        .count();
    assert_eq!(out_of_memory, 2);
    assert!(manager.is_ready_to_draw(&layers));

    // Raising the limit again retries the tiles that ran out
    manager.set_memory_limit_bytes(64 * 1024 * 1024);
    let tasks = manager.prepare_tiles(&mut layers, TreePriority::default());
    assert_eq!(tasks.len(), 2);
}

#[test]
fn test_incoming_tile_only_evicts_lower_priority() {
    let mut layers = vec![PictureLayer::new(1, translucent(500), client(), settings())];
    layers[0].update_tiles(Tree::Active, &frame(Rect::new(0, 0, 100, 100), 1.0));
    let mut manager = manager(64 * 1024 * 1024);
    let tasks = manager.prepare_tiles(&mut layers, TreePriority::default());
    assert!(manager.run_tasks(&mut layers, &tasks).is_empty());
    assert_eq!(manager.pool().num_resources(), 4);

    // Scroll down one row with memory for exactly the resident tiles
    manager.set_memory_limit_bytes(4 * TILE_BYTES);
    layers[0].update_tiles(Tree::Active, &frame(Rect::new(0, 100, 100, 100), 2.0));
    let tasks = manager.prepare_tiles(&mut layers, TreePriority::default());

    // (0, 2) borders the viewport; (1, 2) is diagonal and as far as every
    // remaining resident tile, so it may not displace any of them
    assert_eq!(tasks.len(), 1);
    let incoming = tasks[0].key;
    assert_eq!(incoming.index, TileIndex::new(0, 2));
    assert_eq!(manager.stats().tiles_evicted, 1);
    assert!(manager.memory_usage_bytes() <= 4 * TILE_BYTES);

    let evicted = TileKey { index: TileIndex::new(1, 0), ..incoming };
    assert!(!layers[0].tile(&evicted).unwrap().draw_info().has_resource());
    for (i, j) in [(0, 0), (0, 1), (1, 1)] {
        let kept = TileKey { index: TileIndex::new(i, j), ..incoming };
        assert!(layers[0].tile(&kept).unwrap().draw_info().has_resource());
    }

    let tiling = layers[0].active().tiling_at(0);
    let priority_of = |key: &TileKey| {
        let tile = layers[0].tile(key).unwrap();
        let rect_type = tiling.compute_priority_rect_type_for_tile(tile, None);
        tiling.compute_priority_for_tile(tile, rect_type)
    };
    assert!(priority_of(&incoming).is_higher_priority_than(&priority_of(&evicted)));
}

// ============================================================================
// Tile bounds
// ============================================================================

#[test]
fn test_tiles_stay_inside_live_tiles_rect() {
    let mut layer = PictureLayer::new(1, transparent(2000), client(), settings());
    let viewports = [
        Rect::new(0, 0, 300, 300),
        Rect::new(400, 200, 300, 300),
        Rect::new(1700, 1700, 300, 300),
        Rect::new(900, 0, 300, 300),
    ];
    for (frame_index, viewport) in viewports.into_iter().enumerate() {
        layer.update_tiles(Tree::Active, &frame(viewport, frame_index as f64));
        let tiling = layer.active().find_tiling_with_resolution(TileResolution::High).unwrap();
        let live = tiling.live_tiles_rect();
        let range = tiling.tiling_data().index_range(&live).unwrap();
        assert!(tiling.num_tiles() > 0);
        for tile in tiling.tiles() {
            assert!(range.contains(tile.index()));
        }
    }
}

#[test]
fn test_activation_moves_every_pending_tile() {
    let mut layer = PictureLayer::new(1, transparent(400), client(), settings());
    layer.update_tiles(Tree::Active, &frame(Rect::new(0, 0, 400, 400), 1.0));
    layer.commit(transparent(400), Region::from_rect(Rect::new(0, 0, 250, 250)));
    layer.update_tiles(Tree::Pending, &frame(Rect::new(0, 0, 400, 400), 1.0));

    let pending_ids: Vec<_> = layer.pending().tilings().iter().flat_map(|t| t.tiles().map(|tile| tile.id())).collect();
    assert_eq!(pending_ids.len(), 9);

    layer.activate();
    let active = layer.active().find_tiling_with_resolution(TileResolution::High).unwrap();
    let active_ids: Vec<_> = active.tiles().map(|t| t.id()).collect();
    assert!(pending_ids.iter().all(|id| active_ids.contains(id)));
    assert_eq!(active.num_tiles(), 16);
    assert_eq!(layer.pending().num_tiles(), 0);
}
