//! Tile Priority
//!
//! Priority bins, resolutions and the tree-level policy that decides which
//! tree's tiles win when both trees compete for raster or memory.

use std::cmp::Ordering;

use crate::tile::{Tile, TileKey};

/// Which tree a tiling belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tree {
    /// Currently displayed
    Active,
    /// Being prepared for the next activation
    Pending,
}

impl Tree {
    /// The other tree
    pub fn twin(self) -> Tree {
        match self {
            Tree::Active => Tree::Pending,
            Tree::Pending => Tree::Active,
        }
    }
}

/// Role of a tiling within its set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileResolution {
    /// Cheap fallback drawn while high-res tiles are missing
    Low,
    /// The tiling matching the current raster scale
    High,
    /// Left over from an earlier scale
    NonIdeal,
}

/// Urgency bucket; earlier variants are more urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PriorityBin {
    Now,
    Soon,
    Eventually,
}

/// Which priority rect a tile was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriorityRectType {
    Visible,
    PendingVisible,
    Skewport,
    SoonBorder,
    Eventually,
}

/// Policy for trading off the active tree against the pending tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TreePriority {
    #[default]
    SamePriorityForBothTrees,
    SmoothnessTakesPriority,
    NewContentTakesPriority,
}

impl TreePriority {
    /// Low-res tiles go first while the user is scrolling or pinching
    pub fn prioritizes_low_res(self) -> bool {
        self == TreePriority::SmoothnessTakesPriority
    }
}

/// Priority of a single tile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilePriority {
    pub resolution: TileResolution,
    pub priority_bin: PriorityBin,
    /// Screen-space distance to the visible rect
    pub distance_to_visible: f32,
}

impl TilePriority {
    pub fn new(resolution: TileResolution, priority_bin: PriorityBin, distance_to_visible: f32) -> Self {
        Self { resolution, priority_bin, distance_to_visible }
    }

    /// Lower bin wins, then smaller distance
    pub fn is_higher_priority_than(&self, other: &TilePriority) -> bool {
        self.priority_bin < other.priority_bin
            || (self.priority_bin == other.priority_bin
                && self.distance_to_visible < other.distance_to_visible)
    }

    /// Total order for sorting; `Less` means more urgent
    pub fn urgency_cmp(&self, other: &TilePriority) -> Ordering {
        self.priority_bin
            .cmp(&other.priority_bin)
            .then(self.distance_to_visible.total_cmp(&other.distance_to_visible))
    }
}

impl Default for TilePriority {
    fn default() -> Self {
        Self {
            resolution: TileResolution::NonIdeal,
            priority_bin: PriorityBin::Eventually,
            distance_to_visible: f32::MAX,
        }
    }
}

/// A tile together with the priority it was found with
#[derive(Debug, Clone, Copy)]
pub struct PrioritizedTile<'a> {
    pub tile: &'a Tile,
    pub key: TileKey,
    pub priority: TilePriority,
    pub is_occluded: bool,
    pub is_required_for_activation: bool,
    pub is_required_for_draw: bool,
}

impl PrioritizedTile<'_> {
    pub fn tree(&self) -> Tree {
        self.key.tree
    }
}
