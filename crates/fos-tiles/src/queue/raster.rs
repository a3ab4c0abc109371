//! Raster Queues
//!
//! Yield tiles that still need raster work, most urgent first. The `All`
//! queue merges every layer's two trees under the tree priority; the
//! required queues only walk what blocks activation or drawing.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use super::phase::{group_tiles, RASTER_GROUPS};
use crate::geometry::Rect;
use crate::layer::LayerPair;
use crate::priority::{PrioritizedTile, PriorityBin, PriorityRectType, TilePriority, TileResolution, Tree, TreePriority};
use crate::tiling::{PictureLayerTiling, TilingContext};
use crate::tiling_data::TileIndex;
use crate::tiling_set::TilingSet;

/// Which tiles a raster queue yields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RasterQueueType {
    /// Everything that needs raster, in priority order
    All,
    /// Pending-tree tiles that block activation
    RequiredForActivation,
    /// Active-tree tiles that block drawing
    RequiredForDraw,
}

// ============================================================================
// Tiling iterator
// ============================================================================

/// Walks one tiling phase group by phase group, yielding tiles that need
/// raster and are not occluded
#[derive(Debug)]
struct RasterTilingIterator<'a> {
    tiling: &'a PictureLayerTiling,
    ctx: TilingContext<'a>,
    pending_visible_rect: Rect,
    group: usize,
    tiles: std::vec::IntoIter<(TileIndex, PriorityRectType)>,
    current: Option<PrioritizedTile<'a>>,
}

impl<'a> RasterTilingIterator<'a> {
    fn new(tiling: &'a PictureLayerTiling, ctx: TilingContext<'a>) -> Self {
        let pending_visible_rect = tiling.pending_visible_rect(ctx.twin);
        let tiles = group_tiles(tiling, RASTER_GROUPS[0], &pending_visible_rect).into_iter();
        let mut iter = Self {
            tiling,
            ctx,
            pending_visible_rect,
            group: 0,
            tiles,
            current: None,
        };
        iter.advance();
        iter
    }

    fn is_done(&self) -> bool {
        self.current.is_none()
    }

    fn current(&self) -> Option<&PrioritizedTile<'a>> {
        self.current.as_ref()
    }

    fn priority_bin(&self) -> Option<PriorityBin> {
        self.current.map(|t| t.priority.priority_bin)
    }

    fn advance(&mut self) {
        let tiling = self.tiling;
        loop {
            for (index, phase) in self.tiles.by_ref() {
                let Some(tile) = tiling.tile_at(index) else {
                    continue;
                };
                if !tile.draw_info().needs_raster() || tiling.is_tile_occluded(tile, self.ctx.twin) {
                    continue;
                }
                self.current = Some(tiling.make_prioritized_tile(tile, phase, self.ctx));
                return;
            }

            self.group += 1;
            if self.group >= RASTER_GROUPS.len() {
                self.current = None;
                return;
            }
            self.tiles = group_tiles(tiling, RASTER_GROUPS[self.group], &self.pending_visible_rect).into_iter();
        }
    }
}

// ============================================================================
// Tiling set queue
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IteratorType {
    LowRes = 0,
    HighRes = 1,
    ActiveNonIdealPendingHighRes = 2,
}

#[derive(Debug, Clone, Copy)]
struct IterationStage {
    iterator: IteratorType,
    bin: PriorityBin,
}

/// All raster work of one tiling set, staged by resolution and bin
#[derive(Debug)]
pub struct TilingSetRasterQueueAll<'a> {
    iterators: [Option<RasterTilingIterator<'a>>; 3],
    stages: Vec<IterationStage>,
    current_stage: usize,
}

impl<'a> TilingSetRasterQueueAll<'a> {
    pub fn new(set: &'a TilingSet, twin_set: Option<&'a TilingSet>, prioritize_low_res: bool) -> Self {
        let mut high_res = None;
        let mut low_res = None;
        let mut active_non_ideal = None;
        for tiling in set.tilings() {
            match tiling.resolution() {
                TileResolution::High => high_res = Some(tiling),
                TileResolution::Low => low_res = Some(tiling),
                TileResolution::NonIdeal if set.tree() == Tree::Active => {
                    let twin_is_high_res = twin_set
                        .and_then(|s| s.find_tiling_with_scale(tiling.contents_scale()))
                        .is_some_and(|t| t.resolution() == TileResolution::High);
                    if twin_is_high_res {
                        active_non_ideal = Some(tiling);
                    }
                }
                TileResolution::NonIdeal => {}
            }
        }

        let usable = |tiling: Option<&'a PictureLayerTiling>| {
            tiling.filter(|t| t.has_tiles() && !t.all_tiles_done())
        };
        let make = |tiling: Option<&'a PictureLayerTiling>| {
            tiling.map(|t| RasterTilingIterator::new(t, set.context_for(t.contents_scale(), twin_set)))
        };
        let (high_res, low_res, active_non_ideal) = (usable(high_res), usable(low_res), usable(active_non_ideal));

        let mut stages = Vec::with_capacity(6);
        if low_res.is_some() && prioritize_low_res {
            stages.push(IterationStage { iterator: IteratorType::LowRes, bin: PriorityBin::Now });
        }
        if high_res.is_some() {
            stages.push(IterationStage { iterator: IteratorType::HighRes, bin: PriorityBin::Now });
        }
        if low_res.is_some() && !prioritize_low_res {
            stages.push(IterationStage { iterator: IteratorType::LowRes, bin: PriorityBin::Now });
        }
        if active_non_ideal.is_some() {
            stages.push(IterationStage {
                iterator: IteratorType::ActiveNonIdealPendingHighRes,
                bin: PriorityBin::Now,
            });
        }
        if high_res.is_some() {
            stages.push(IterationStage { iterator: IteratorType::HighRes, bin: PriorityBin::Soon });
            stages.push(IterationStage { iterator: IteratorType::HighRes, bin: PriorityBin::Eventually });
        }

        let mut queue = Self {
            iterators: [make(low_res), make(high_res), make(active_non_ideal)],
            stages,
            current_stage: 0,
        };
        if !queue.is_empty() && !queue.stage_has_tile(queue.current_stage) {
            queue.advance_to_next_stage();
        }
        queue
    }

    pub fn is_empty(&self) -> bool {
        self.current_stage >= self.stages.len()
    }

    /// Most urgent tile, or `None` once drained
    pub fn peek(&self) -> Option<&PrioritizedTile<'a>> {
        let stage = self.stages.get(self.current_stage)?;
        self.iterators[stage.iterator as usize].as_ref()?.current()
    }

    pub fn pop(&mut self) {
        let Some(stage) = self.stages.get(self.current_stage).copied() else {
            return;
        };
        if let Some(iter) = self.iterators[stage.iterator as usize].as_mut() {
            iter.advance();
        }
        if !self.stage_has_tile(self.current_stage) {
            self.advance_to_next_stage();
        }
    }

    fn stage_has_tile(&self, stage: usize) -> bool {
        let stage = self.stages[stage];
        self.iterators[stage.iterator as usize]
            .as_ref()
            .is_some_and(|it| !it.is_done() && it.priority_bin() == Some(stage.bin))
    }

    fn advance_to_next_stage(&mut self) {
        self.current_stage += 1;
        while self.current_stage < self.stages.len() && !self.stage_has_tile(self.current_stage) {
            self.current_stage += 1;
        }
    }
}

// ============================================================================
// Cross-layer merge
// ============================================================================

/// One layer's two tiling-set queues
#[derive(Debug)]
struct PairedRasterQueue<'a> {
    active: Option<TilingSetRasterQueueAll<'a>>,
    pending: Option<TilingSetRasterQueueAll<'a>>,
}

impl<'a> PairedRasterQueue<'a> {
    fn new(pair: &LayerPair<'a>, tree_priority: TreePriority) -> Self {
        let prioritize_low_res = tree_priority.prioritizes_low_res();
        let build = |tree: Tree| {
            let (set, twin) = pair.set_and_twin(tree);
            set.filter(|s| s.client().has_valid_tile_priorities())
                .map(|s| TilingSetRasterQueueAll::new(s, twin, prioritize_low_res))
                .filter(|q| !q.is_empty())
        };
        Self {
            active: build(Tree::Active),
            pending: build(Tree::Pending),
        }
    }

    fn queue(&self, tree: Tree) -> Option<&TilingSetRasterQueueAll<'a>> {
        let queue = match tree {
            Tree::Active => self.active.as_ref(),
            Tree::Pending => self.pending.as_ref(),
        };
        queue.filter(|q| !q.is_empty())
    }

    fn is_empty(&self) -> bool {
        self.queue(Tree::Active).is_none() && self.queue(Tree::Pending).is_none()
    }

    /// Which tree's head the pair offers next
    fn next_tree(&self, tree_priority: TreePriority) -> Tree {
        let active = self.queue(Tree::Active).and_then(|q| q.peek());
        let pending = self.queue(Tree::Pending).and_then(|q| q.peek());
        let (active, pending) = match (active, pending) {
            (Some(active), Some(pending)) => (active, pending),
            (Some(_), None) => return Tree::Active,
            _ => return Tree::Pending,
        };

        match tree_priority {
            TreePriority::SmoothnessTakesPriority => {
                if active.priority.priority_bin == PriorityBin::Eventually {
                    Tree::Pending
                } else {
                    Tree::Active
                }
            }
            TreePriority::NewContentTakesPriority => {
                if pending.priority.priority_bin != PriorityBin::Now
                    && active.priority.priority_bin == PriorityBin::Now
                {
                    Tree::Active
                } else {
                    Tree::Pending
                }
            }
            TreePriority::SamePriorityForBothTrees => {
                if active.priority.is_higher_priority_than(&pending.priority) {
                    Tree::Active
                } else {
                    Tree::Pending
                }
            }
        }
    }

    fn peek(&self, tree_priority: TreePriority) -> Option<&PrioritizedTile<'a>> {
        self.queue(self.next_tree(tree_priority))?.peek()
    }

    fn pop(&mut self, tree_priority: TreePriority) {
        let queue = match self.next_tree(tree_priority) {
            Tree::Active => self.active.as_mut(),
            Tree::Pending => self.pending.as_mut(),
        };
        if let Some(queue) = queue {
            queue.pop();
        }
    }
}

/// Heap entry for a paired queue, ordered so the most urgent head is the max
#[derive(Debug, Clone, Copy)]
struct RasterOrderKey {
    priority: TilePriority,
    prioritize_low_res: bool,
    slot: usize,
}

impl Ord for RasterOrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (&self.priority, &other.priority);
        let by_priority = if a.priority_bin == b.priority_bin && a.resolution != b.resolution {
            let preferred = if self.prioritize_low_res {
                TileResolution::Low
            } else {
                TileResolution::High
            };
            if a.resolution == TileResolution::NonIdeal {
                Ordering::Less
            } else if b.resolution == TileResolution::NonIdeal {
                Ordering::Greater
            } else if b.resolution == preferred {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        } else {
            b.urgency_cmp(a)
        };
        // Earlier layers win ties
        by_priority.then(other.slot.cmp(&self.slot))
    }
}

impl PartialOrd for RasterOrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for RasterOrderKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RasterOrderKey {}

/// Merges every layer's raster work into one priority order
#[derive(Debug)]
pub struct RasterQueueAll<'a> {
    pairs: Vec<PairedRasterQueue<'a>>,
    heap: BinaryHeap<RasterOrderKey>,
    tree_priority: TreePriority,
}

impl<'a> RasterQueueAll<'a> {
    pub fn new(layers: &[LayerPair<'a>], tree_priority: TreePriority) -> Self {
        let mut queue = Self {
            pairs: Vec::with_capacity(layers.len()),
            heap: BinaryHeap::with_capacity(layers.len()),
            tree_priority,
        };
        for pair in layers {
            let paired = PairedRasterQueue::new(pair, tree_priority);
            if paired.is_empty() {
                continue;
            }
            queue.pairs.push(paired);
            queue.push_slot(queue.pairs.len() - 1);
        }
        queue
    }

    fn push_slot(&mut self, slot: usize) {
        if let Some(top) = self.pairs[slot].peek(self.tree_priority) {
            self.heap.push(RasterOrderKey {
                priority: top.priority,
                prioritize_low_res: self.tree_priority.prioritizes_low_res(),
                slot,
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn peek(&self) -> Option<&PrioritizedTile<'a>> {
        let key = self.heap.peek()?;
        self.pairs[key.slot].peek(self.tree_priority)
    }

    pub fn pop(&mut self) {
        let Some(key) = self.heap.pop() else {
            return;
        };
        self.pairs[key.slot].pop(self.tree_priority);
        self.push_slot(key.slot);
    }
}

// ============================================================================
// Required queues
// ============================================================================

/// Tiles of one tiling set that block activation or drawing
#[derive(Debug)]
pub struct TilingSetRasterQueueRequired<'a> {
    tiling: Option<&'a PictureLayerTiling>,
    ctx: TilingContext<'a>,
    queue_type: RasterQueueType,
    indices: std::vec::IntoIter<TileIndex>,
    current: Option<PrioritizedTile<'a>>,
}

impl<'a> TilingSetRasterQueueRequired<'a> {
    pub fn new(set: &'a TilingSet, twin_set: Option<&'a TilingSet>, queue_type: RasterQueueType) -> Self {
        let tiling = match (queue_type, set.tree()) {
            (RasterQueueType::All, _) | (RasterQueueType::RequiredForDraw, Tree::Pending) => None,
            // Active tiles the pending tree shares live on the active tiling
            // whose twin is the pending high-res tiling
            (RasterQueueType::RequiredForActivation, Tree::Active) => set.tilings().iter().find(|t| {
                twin_set
                    .and_then(|s| s.find_tiling_with_scale(t.contents_scale()))
                    .is_some_and(|twin| twin.resolution() == TileResolution::High)
            }),
            _ => set.find_tiling_with_resolution(TileResolution::High),
        };

        let (ctx, indices) = match tiling {
            Some(tiling) => {
                let ctx = set.context_for(tiling.contents_scale(), twin_set);
                let rect = match set.tree() {
                    Tree::Active if queue_type == RasterQueueType::RequiredForActivation => {
                        tiling.pending_visible_rect(ctx.twin)
                    }
                    _ => tiling.current_visible_rect(),
                };
                (ctx, tiling.tiling_data().iter(&rect))
            }
            None => (TilingContext::none(), Vec::new()),
        };

        let mut queue = Self {
            tiling,
            ctx,
            queue_type,
            indices: indices.into_iter(),
            current: None,
        };
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

    fn advance(&mut self) {
        self.current = None;
        let Some(tiling) = self.tiling else {
            return;
        };
        for index in self.indices.by_ref() {
            let Some(tile) = tiling.tile_at(index) else {
                continue;
            };
            if !tile.draw_info().needs_raster() || tiling.is_tile_occluded(tile, self.ctx.twin) {
                continue;
            }
            let required = match self.queue_type {
                RasterQueueType::RequiredForActivation => tiling.is_tile_required_for_activation(tile, self.ctx),
                RasterQueueType::RequiredForDraw => tiling.is_tile_required_for_draw(tile),
                RasterQueueType::All => false,
            };
            if !required {
                continue;
            }
            let rect_type = tiling.compute_priority_rect_type_for_tile(tile, self.ctx.twin);
            self.current = Some(tiling.make_prioritized_tile(tile, rect_type, self.ctx));
            return;
        }
    }
}

/// Required tiles of every layer, one tiling set after another
#[derive(Debug)]
pub struct RasterQueueRequired<'a> {
    queues: VecDeque<TilingSetRasterQueueRequired<'a>>,
}

impl<'a> RasterQueueRequired<'a> {
    pub fn new(layers: &[LayerPair<'a>], queue_type: RasterQueueType) -> Self {
        let trees: &[Tree] = match queue_type {
            RasterQueueType::RequiredForActivation => &[Tree::Pending, Tree::Active],
            _ => &[Tree::Active],
        };

        let mut queues = VecDeque::new();
        for &tree in trees {
            for pair in layers {
                let (set, twin) = pair.set_and_twin(tree);
                // Activation only waits while a pending tree exists
                if queue_type == RasterQueueType::RequiredForActivation && pair.pending.is_none() {
                    continue;
                }
                let Some(set) = set else {
                    continue;
                };
                let queue = TilingSetRasterQueueRequired::new(set, twin, queue_type);
                if !queue.is_empty() {
                    queues.push_back(queue);
                }
            }
        }
        Self { queues }
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn peek(&self) -> Option<&PrioritizedTile<'a>> {
        self.queues.front()?.peek()
    }

    pub fn pop(&mut self) {
        let Some(front) = self.queues.front_mut() else {
            return;
        };
        front.pop();
        if front.is_empty() {
            self.queues.pop_front();
        }
    }
}

// ============================================================================
// Public queue
// ============================================================================

/// A raster queue of any type
#[derive(Debug)]
pub enum RasterQueue<'a> {
    All(RasterQueueAll<'a>),
    Required(RasterQueueRequired<'a>),
}

impl<'a> RasterQueue<'a> {
    /// Build a queue over a snapshot of the layers
    pub fn new(layers: &[LayerPair<'a>], tree_priority: TreePriority, queue_type: RasterQueueType) -> Self {
        let queue = match queue_type {
            RasterQueueType::All => RasterQueue::All(RasterQueueAll::new(layers, tree_priority)),
            _ => RasterQueue::Required(RasterQueueRequired::new(layers, queue_type)),
        };
        tracing::trace!(?queue_type, ?tree_priority, layers = layers.len(), empty = queue.is_empty(), "built raster queue");
        queue
    }

    pub fn is_empty(&self) -> bool {
        match self {
            RasterQueue::All(queue) => queue.is_empty(),
            RasterQueue::Required(queue) => queue.is_empty(),
        }
    }

    /// Most urgent remaining tile, or `None` once drained
    pub fn peek(&self) -> Option<&PrioritizedTile<'a>> {
        match self {
            RasterQueue::All(queue) => queue.peek(),
            RasterQueue::Required(queue) => queue.peek(),
        }
    }

    /// Most urgent remaining tile.
    ///
    /// # Panics
    ///
    /// Panics if the queue is empty.
    pub fn top(&self) -> &PrioritizedTile<'a> {
        match self.peek() {
            Some(tile) => tile,
            None => panic!("top() called on an empty raster queue"),
        }
    }

    /// Drop the most urgent tile.
    ///
    /// # Panics
    ///
    /// Panics if the queue is empty.
    pub fn pop(&mut self) {
        assert!(!self.is_empty(), "pop() called on an empty raster queue");
        match self {
            RasterQueue::All(queue) => queue.pop(),
            RasterQueue::Required(queue) => queue.pop(),
        }
    }
}

impl<'a> Iterator for RasterQueue<'a> {
    type Item = PrioritizedTile<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let tile = *self.peek()?;
        self.pop();
        Some(tile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(resolution: TileResolution, bin: PriorityBin, distance: f32, prioritize_low_res: bool, slot: usize) -> RasterOrderKey {
        RasterOrderKey {
            priority: TilePriority::new(resolution, bin, distance),
            prioritize_low_res,
            slot,
        }
    }

    #[test]
    fn test_order_prefers_urgent_bin() {
        let now = key(TileResolution::High, PriorityBin::Now, 500.0, false, 0);
        let soon = key(TileResolution::High, PriorityBin::Soon, 0.0, false, 1);
        assert!(now > soon);
    }

    #[test]
    fn test_order_resolution_within_bin() {
        let high = key(TileResolution::High, PriorityBin::Now, 10.0, false, 0);
        let low = key(TileResolution::Low, PriorityBin::Now, 0.0, false, 1);
        let non_ideal = key(TileResolution::NonIdeal, PriorityBin::Now, 0.0, false, 2);
        assert!(high > low);
        assert!(low > non_ideal);

        let high = key(TileResolution::High, PriorityBin::Now, 0.0, true, 0);
        let low = key(TileResolution::Low, PriorityBin::Now, 10.0, true, 1);
        assert!(low > high);
    }

    #[test]
    fn test_order_distance_then_slot() {
        let near = key(TileResolution::High, PriorityBin::Soon, 10.0, false, 3);
        let far = key(TileResolution::High, PriorityBin::Soon, 20.0, false, 0);
        assert!(near > far);

        let first = key(TileResolution::High, PriorityBin::Soon, 10.0, false, 0);
        assert!(first > near);
    }
}
