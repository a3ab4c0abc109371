//! Per-tiling phase walks shared by the raster and eviction queues

use crate::geometry::Rect;
use crate::priority::PriorityRectType;
use crate::tiling::PictureLayerTiling;
use crate::tiling_data::TileIndex;

/// Raster order of the priority rects. Rects in one group share a priority
/// bin and are walked together.
pub(crate) const RASTER_GROUPS: [&[PriorityRectType]; 4] = [
    &[PriorityRectType::Visible],
    &[PriorityRectType::PendingVisible],
    &[PriorityRectType::Skewport, PriorityRectType::SoonBorder],
    &[PriorityRectType::Eventually],
];

/// Indices of the tiles a tiling offers in `phase`, in walk order.
///
/// Each index appears in exactly one phase: the first whose rect contains it.
/// Visible and pending-visible tiles walk row-major, the rest spiral outwards
/// from the visible rect.
pub(crate) fn phase_indices(
    tiling: &PictureLayerTiling,
    phase: PriorityRectType,
    pending_visible_rect: &Rect,
) -> Vec<TileIndex> {
    let data = tiling.tiling_data();
    let visible = tiling.current_visible_rect();
    let skewport = tiling.current_skewport_rect();
    let soon_border = tiling.current_soon_border_rect();
    let eventually = tiling.current_eventually_rect();

    match phase {
        PriorityRectType::Visible => data.iter(&visible),
        PriorityRectType::PendingVisible => data.difference(pending_visible_rect, &visible),
        PriorityRectType::Skewport => data.spiral(&skewport, &[visible, *pending_visible_rect], &visible),
        PriorityRectType::SoonBorder => {
            data.spiral(&soon_border, &[visible, *pending_visible_rect, skewport], &visible)
        }
        PriorityRectType::Eventually => data.spiral(
            &eventually,
            &[visible, *pending_visible_rect, skewport, soon_border],
            &visible,
        ),
    }
}

/// Existing tiles of a phase group in raster order, each tagged with the
/// phase it was found in.
///
/// Tiles sort by distance to the visible rect; ties keep walk order. The
/// eviction walk is this sequence reversed.
pub(crate) fn group_tiles(
    tiling: &PictureLayerTiling,
    group: &[PriorityRectType],
    pending_visible_rect: &Rect,
) -> Vec<(TileIndex, PriorityRectType)> {
    let mut entries: Vec<(TileIndex, PriorityRectType, f32)> = Vec::new();
    for &phase in group {
        for index in phase_indices(tiling, phase, pending_visible_rect) {
            let Some(tile) = tiling.tile_at(index) else {
                continue;
            };
            let distance = tiling.compute_priority_for_tile(tile, phase).distance_to_visible;
            entries.push((index, phase, distance));
        }
    }
    // Stable, so equal distances keep the spiral order
    entries.sort_by(|a, b| a.2.total_cmp(&b.2));
    entries.into_iter().map(|(index, phase, _)| (index, phase)).collect()
}
