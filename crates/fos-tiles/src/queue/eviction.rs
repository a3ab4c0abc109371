//! Eviction Queue
//!
//! Yields tiles that hold a raster resource, least important first. Within
//! a tiling the order is the raster order reversed; across layers the least
//! urgent head is offered first.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::phase::{group_tiles, RASTER_GROUPS};
use crate::geometry::Rect;
use crate::layer::LayerPair;
use crate::priority::{PrioritizedTile, PriorityRectType, TilePriority, TileResolution, Tree, TreePriority};
use crate::tiling::{PictureLayerTiling, TilingContext};
use crate::tiling_data::TileIndex;
use crate::tiling_set::{TilingRangeType, TilingSet};

/// Eviction phases, first evicted first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvictionPhase {
    Eventually,
    Soon,
    PendingVisible,
    PendingVisibleRequiredForActivation,
    VisibleOccluded,
    VisibleUnoccluded,
    VisibleRequiredForActivationOccluded,
    VisibleRequiredForActivationUnoccluded,
}

const EVICTION_PHASES: [EvictionPhase; 8] = [
    EvictionPhase::Eventually,
    EvictionPhase::Soon,
    EvictionPhase::PendingVisible,
    EvictionPhase::PendingVisibleRequiredForActivation,
    EvictionPhase::VisibleOccluded,
    EvictionPhase::VisibleUnoccluded,
    EvictionPhase::VisibleRequiredForActivationOccluded,
    EvictionPhase::VisibleRequiredForActivationUnoccluded,
];

impl EvictionPhase {
    /// The raster phase group this phase walks backwards
    fn group(self) -> &'static [PriorityRectType] {
        match self {
            EvictionPhase::Eventually => RASTER_GROUPS[3],
            EvictionPhase::Soon => RASTER_GROUPS[2],
            EvictionPhase::PendingVisible | EvictionPhase::PendingVisibleRequiredForActivation => RASTER_GROUPS[1],
            _ => RASTER_GROUPS[0],
        }
    }

    /// Required and occluded filters; `None` accepts either
    fn filters(self) -> (Option<bool>, Option<bool>) {
        match self {
            EvictionPhase::Eventually | EvictionPhase::Soon => (None, None),
            EvictionPhase::PendingVisible => (Some(false), None),
            EvictionPhase::PendingVisibleRequiredForActivation => (Some(true), None),
            EvictionPhase::VisibleOccluded => (Some(false), Some(true)),
            EvictionPhase::VisibleUnoccluded => (Some(false), Some(false)),
            EvictionPhase::VisibleRequiredForActivationOccluded => (Some(true), Some(true)),
            EvictionPhase::VisibleRequiredForActivationUnoccluded => (Some(true), Some(false)),
        }
    }
}

// ============================================================================
// Tiling set queue
// ============================================================================

/// Evictable tiles of one tiling set, phase by phase across its tilings
#[derive(Debug)]
pub struct TilingSetEvictionQueue<'a> {
    set: &'a TilingSet,
    twin_set: Option<&'a TilingSet>,
    tilings: Vec<&'a PictureLayerTiling>,
    phase: usize,
    tiling: usize,
    tiles: std::vec::IntoIter<(TileIndex, PriorityRectType)>,
    current: Option<PrioritizedTile<'a>>,
}

impl<'a> TilingSetEvictionQueue<'a> {
    pub fn new(set: &'a TilingSet, twin_set: Option<&'a TilingSet>) -> Self {
        let mut tilings = Vec::with_capacity(set.num_tilings());
        let all = set.tilings();
        // Outlying tilings go first, from the far end inwards
        tilings.extend(all[set.get_tiling_range(TilingRangeType::HigherThanHighRes)].iter());
        tilings.extend(all[set.get_tiling_range(TilingRangeType::LowerThanLowRes)].iter().rev());
        tilings.extend(all[set.get_tiling_range(TilingRangeType::BetweenHighAndLowRes)].iter().rev());
        tilings.extend(all[set.get_tiling_range(TilingRangeType::LowRes)].iter());
        tilings.extend(all[set.get_tiling_range(TilingRangeType::HighRes)].iter());

        let mut queue = Self {
            set,
            twin_set,
            tilings,
            phase: 0,
            tiling: 0,
            tiles: Vec::new().into_iter(),
            current: None,
        };
        queue.load_tiles();
        queue.advance();
        queue
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    pub fn peek(&self) -> Option<&PrioritizedTile<'a>> {
        self.current.as_ref()
    }

    pub fn pop(&mut self) {
        self.advance();
    }

    fn context(&self, tiling: &PictureLayerTiling) -> TilingContext<'a> {
        self.set.context_for(tiling.contents_scale(), self.twin_set)
    }

    fn load_tiles(&mut self) {
        let Some(tiling) = self.tilings.get(self.tiling).copied() else {
            self.tiles = Vec::new().into_iter();
            return;
        };
        let pending_visible_rect: Rect = tiling.pending_visible_rect(self.context(tiling).twin);
        let mut tiles = group_tiles(tiling, EVICTION_PHASES[self.phase].group(), &pending_visible_rect);
        tiles.reverse();
        self.tiles = tiles.into_iter();
    }

    /// Step to the next tiling, or the next phase after the last tiling
    fn next_tiling(&mut self) -> bool {
        self.tiling += 1;
        if self.tiling >= self.tilings.len() {
            self.tiling = 0;
            self.phase += 1;
        }
        if self.phase >= EVICTION_PHASES.len() || self.tilings.is_empty() {
            return false;
        }
        self.load_tiles();
        true
    }

    fn advance(&mut self) {
        self.current = None;
        if self.tilings.is_empty() {
            return;
        }
        while self.phase < EVICTION_PHASES.len() {
            let tiling = self.tilings[self.tiling];
            let phase = EVICTION_PHASES[self.phase];
            let ctx = self.context(tiling);
            let (required_filter, occluded_filter) = phase.filters();

            for (index, rect_type) in self.tiles.by_ref() {
                let Some(tile) = tiling.tile_at(index) else {
                    continue;
                };
                if !tile.draw_info().has_resource() {
                    continue;
                }
                if let Some(required) = required_filter
                    && tiling.is_tile_required_for_activation(tile, ctx) != required
                {
                    continue;
                }
                if let Some(occluded) = occluded_filter
                    && tiling.is_tile_occluded(tile, ctx.twin) != occluded
                {
                    continue;
                }
                self.current = Some(tiling.make_prioritized_tile(tile, rect_type, ctx));
                return;
            }

            if !self.next_tiling() {
                return;
            }
        }
    }
}

// ============================================================================
// Cross-layer merge
// ============================================================================

/// Heap entry for a tiling set queue, ordered so the least urgent head is
/// the max
#[derive(Debug, Clone, Copy)]
struct EvictionOrderKey {
    priority: TilePriority,
    is_occluded: bool,
    prioritize_low_res: bool,
    slot: usize,
}

impl Ord for EvictionOrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (&self.priority, &other.priority);
        let by_priority = if a.priority_bin != b.priority_bin {
            a.priority_bin.cmp(&b.priority_bin)
        } else if a.resolution != b.resolution {
            let kept = if self.prioritize_low_res {
                TileResolution::Low
            } else {
                TileResolution::High
            };
            if a.resolution == TileResolution::NonIdeal {
                Ordering::Greater
            } else if b.resolution == TileResolution::NonIdeal || a.resolution == kept {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        } else if self.is_occluded != other.is_occluded {
            self.is_occluded.cmp(&other.is_occluded)
        } else {
            a.distance_to_visible.total_cmp(&b.distance_to_visible)
        };
        by_priority.then(other.slot.cmp(&self.slot))
    }
}

impl PartialOrd for EvictionOrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for EvictionOrderKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EvictionOrderKey {}

/// Merges every layer's evictable tiles, least important first
#[derive(Debug)]
pub struct EvictionQueue<'a> {
    queues: Vec<TilingSetEvictionQueue<'a>>,
    active: BinaryHeap<EvictionOrderKey>,
    pending: BinaryHeap<EvictionOrderKey>,
    tree_priority: TreePriority,
}

impl<'a> EvictionQueue<'a> {
    pub fn new(layers: &[LayerPair<'a>], tree_priority: TreePriority) -> Self {
        let mut queue = Self {
            queues: Vec::new(),
            active: BinaryHeap::new(),
            pending: BinaryHeap::new(),
            tree_priority,
        };
        for pair in layers {
            for tree in [Tree::Active, Tree::Pending] {
                let (set, twin) = pair.set_and_twin(tree);
                let Some(set) = set else {
                    continue;
                };
                let set_queue = TilingSetEvictionQueue::new(set, twin);
                if set_queue.is_empty() {
                    continue;
                }
                queue.queues.push(set_queue);
                queue.push_slot(tree, queue.queues.len() - 1);
            }
        }
        tracing::trace!(?tree_priority, layers = layers.len(), empty = queue.is_empty(), "built eviction queue");
        queue
    }

    fn heap_mut(&mut self, tree: Tree) -> &mut BinaryHeap<EvictionOrderKey> {
        match tree {
            Tree::Active => &mut self.active,
            Tree::Pending => &mut self.pending,
        }
    }

    fn push_slot(&mut self, tree: Tree, slot: usize) {
        let Some(top) = self.queues[slot].peek() else {
            return;
        };
        let key = EvictionOrderKey {
            priority: top.priority,
            is_occluded: top.is_occluded,
            prioritize_low_res: self.tree_priority.prioritizes_low_res(),
            slot,
        };
        self.heap_mut(tree).push(key);
    }

    /// Which tree's least important head goes next
    fn next_tree(&self) -> Option<Tree> {
        let active = self.active.peek().and_then(|k| self.queues[k.slot].peek());
        let pending = self.pending.peek().and_then(|k| self.queues[k.slot].peek());
        match (active, pending) {
            (None, None) => None,
            (Some(_), None) => Some(Tree::Active),
            (None, Some(_)) => Some(Tree::Pending),
            (Some(active), Some(pending)) => {
                let (a, p) = (&active.priority, &pending.priority);
                // Within a bin, keep tiles that activation waits for
                if a.priority_bin == p.priority_bin
                    && active.is_required_for_activation != pending.is_required_for_activation
                {
                    return Some(if active.is_required_for_activation {
                        Tree::Pending
                    } else {
                        Tree::Active
                    });
                }
                if p.is_higher_priority_than(a) {
                    Some(Tree::Active)
                } else {
                    Some(Tree::Pending)
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.pending.is_empty()
    }

    /// Least important remaining tile, or `None` once drained
    pub fn peek(&self) -> Option<&PrioritizedTile<'a>> {
        let heap = match self.next_tree()? {
            Tree::Active => &self.active,
            Tree::Pending => &self.pending,
        };
        self.queues[heap.peek()?.slot].peek()
    }

    /// Least important remaining tile.
    ///
    /// # Panics
    ///
    /// Panics if the queue is empty.
    pub fn top(&self) -> &PrioritizedTile<'a> {
        match self.peek() {
            Some(tile) => tile,
            None => panic!("top() called on an empty eviction queue"),
        }
    }

    /// Drop the least important tile.
    ///
    /// # Panics
    ///
    /// Panics if the queue is empty.
    pub fn pop(&mut self) {
        let Some(tree) = self.next_tree() else {
            panic!("pop() called on an empty eviction queue");
        };
        let Some(key) = self.heap_mut(tree).pop() else {
            return;
        };
        self.queues[key.slot].pop();
        self.push_slot(tree, key.slot);
    }
}

impl<'a> Iterator for EvictionQueue<'a> {
    type Item = PrioritizedTile<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let tile = *self.peek()?;
        self.pop();
        Some(tile)
    }
}
