//! Tiling Data
//!
//! Maps a content-space rect of fixed size onto a grid of equally sized
//! tiles and walks subsets of that grid in the orders the queues need.

use crate::geometry::{Rect, Size};

/// Grid coordinate of a tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileIndex {
    pub i: i32,
    pub j: i32,
}

impl TileIndex {
    pub const fn new(i: i32, j: i32) -> Self {
        Self { i, j }
    }
}

/// Inclusive range of tile indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRange {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl IndexRange {
    pub fn contains(&self, index: TileIndex) -> bool {
        index.i >= self.left && index.i <= self.right && index.j >= self.top && index.j <= self.bottom
    }

    /// Row-major walk, x fastest
    pub fn iter(&self) -> impl Iterator<Item = TileIndex> + '_ {
        (self.top..=self.bottom).flat_map(move |j| (self.left..=self.right).map(move |i| TileIndex::new(i, j)))
    }
}

/// Geometry of a tile grid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilingData {
    tiling_size: Size,
    tile_size: Size,
}

impl TilingData {
    pub fn new(tiling_size: Size, tile_size: Size) -> Self {
        Self { tiling_size, tile_size }
    }

    pub fn tiling_size(&self) -> Size {
        self.tiling_size
    }

    pub fn set_tiling_size(&mut self, tiling_size: Size) {
        self.tiling_size = tiling_size;
    }

    pub fn tile_size(&self) -> Size {
        self.tile_size
    }

    /// Content rect covered by the grid
    pub fn tiling_rect(&self) -> Rect {
        Rect::from_size(self.tiling_size)
    }

    pub fn num_tiles_x(&self) -> i32 {
        num_tiles(self.tiling_size.width, self.tile_size.width)
    }

    pub fn num_tiles_y(&self) -> i32 {
        num_tiles(self.tiling_size.height, self.tile_size.height)
    }

    fn tile_x_index_from_src_coord(&self, x: i32) -> i32 {
        (x / self.tile_size.width).clamp(0, self.num_tiles_x() - 1)
    }

    fn tile_y_index_from_src_coord(&self, y: i32) -> i32 {
        (y / self.tile_size.height).clamp(0, self.num_tiles_y() - 1)
    }

    /// Content bounds of one tile, clipped to the tiling
    pub fn tile_bounds(&self, index: TileIndex) -> Rect {
        let x = index.i.saturating_mul(self.tile_size.width);
        let y = index.j.saturating_mul(self.tile_size.height);
        let width = self.tile_size.width.min(self.tiling_size.width - x);
        let height = self.tile_size.height.min(self.tiling_size.height - y);
        Rect::new(x, y, width.max(0), height.max(0))
    }

    /// Indices of every tile overlapping `rect`, or `None` if it misses the grid
    pub fn index_range(&self, rect: &Rect) -> Option<IndexRange> {
        let clipped = rect.intersect(&self.tiling_rect());
        if clipped.is_empty() || self.num_tiles_x() == 0 || self.num_tiles_y() == 0 {
            return None;
        }
        Some(IndexRange {
            left: self.tile_x_index_from_src_coord(clipped.x),
            top: self.tile_y_index_from_src_coord(clipped.y),
            right: self.tile_x_index_from_src_coord(clipped.right() - 1),
            bottom: self.tile_y_index_from_src_coord(clipped.bottom() - 1),
        })
    }

    /// Clip `rect` to the grid and grow it to whole tile boundaries
    pub fn expand_rect_to_tile_bounds(&self, rect: &Rect) -> Rect {
        match self.index_range(rect) {
            Some(range) => self
                .tile_bounds(TileIndex::new(range.left, range.top))
                .union(&self.tile_bounds(TileIndex::new(range.right, range.bottom))),
            None => Rect::default(),
        }
    }

    /// Row-major walk of the tiles overlapping `rect`
    pub fn iter(&self, rect: &Rect) -> Vec<TileIndex> {
        self.index_range(rect)
            .map(|range| range.iter().collect())
            .unwrap_or_default()
    }

    /// Row-major walk of the tiles in `consider` that are not in `ignore`
    pub fn difference(&self, consider: &Rect, ignore: &Rect) -> Vec<TileIndex> {
        let Some(range) = self.index_range(consider) else {
            return Vec::new();
        };
        let ignored = self.index_range(ignore);
        range
            .iter()
            .filter(|index| !ignored.is_some_and(|r| r.contains(*index)))
            .collect()
    }

    /// Walk the tiles in `consider` outwards from `center`, skipping every tile
    /// that overlaps one of `exclude`.
    ///
    /// Tiles come out ordered by distance from `center`; ties are broken by the
    /// ring they sit on and then clockwise from the ring's top-left corner.
    pub fn spiral(&self, consider: &Rect, exclude: &[Rect], center: &Rect) -> Vec<TileIndex> {
        let Some(range) = self.index_range(consider) else {
            return Vec::new();
        };
        let excluded: Vec<IndexRange> = exclude.iter().filter_map(|r| self.index_range(r)).collect();
        let around = self.center_range(center);

        let mut cells: Vec<(i64, i32, i64, TileIndex)> = range
            .iter()
            .filter(|index| !excluded.iter().any(|r| r.contains(*index)))
            .map(|index| {
                let distance = center.manhattan_internal_distance(&self.tile_bounds(index));
                let (ring, position) = ring_position(&around, index);
                (distance, ring, position, index)
            })
            .collect();
        cells.sort_by_key(|&(distance, ring, position, _)| (distance, ring, position));
        cells.into_iter().map(|(_, _, _, index)| index).collect()
    }

    fn center_range(&self, center: &Rect) -> IndexRange {
        if let Some(range) = self.index_range(center) {
            return range;
        }
        let i = self.tile_x_index_from_src_coord(center.x.max(0));
        let j = self.tile_y_index_from_src_coord(center.y.max(0));
        IndexRange { left: i, top: j, right: i, bottom: j }
    }
}

fn num_tiles(total: i32, tile: i32) -> i32 {
    if total <= 0 || tile <= 0 {
        0
    } else {
        (total + tile - 1) / tile
    }
}

/// Ring number around `around` and clockwise position on that ring
fn ring_position(around: &IndexRange, index: TileIndex) -> (i32, i64) {
    let dx = (around.left - index.i).max(index.i - around.right).max(0);
    let dy = (around.top - index.j).max(index.j - around.bottom).max(0);
    let ring = dx.max(dy);
    if ring == 0 {
        let width = (around.right - around.left + 1) as i64;
        return (0, (index.j - around.top) as i64 * width + (index.i - around.left) as i64);
    }

    let left = (around.left - ring) as i64;
    let top = (around.top - ring) as i64;
    let right = (around.right + ring) as i64;
    let bottom = (around.bottom + ring) as i64;
    let (i, j) = (index.i as i64, index.j as i64);
    let width = right - left;
    let height = bottom - top;

    let position = if j == top {
        i - left
    } else if i == right {
        width + (j - top)
    } else if j == bottom {
        width + height + (right - i)
    } else {
        2 * width + height + (bottom - j)
    };
    (ring, position)
}
