//! Tile Manager
//!
//! Turns the priority queues into work. Each `prepare_tiles` call walks the
//! raster queue under a memory budget, evicts strictly less valuable tiles
//! to make room, and hands back the raster tasks to dispatch. Results come
//! back through `did_finish_raster`, keyed by tile so they survive
//! activation.

use std::collections::HashMap;

use crate::error::RasterError;
use crate::layer::{LayerId, LayerPair, PictureLayer};
use crate::priority::{Tree, TreePriority};
use crate::queue::{EvictionQueue, RasterQueue, RasterQueueType};
use crate::raster::{
    next_task_id, rasterize_tasks_parallel, RasterCompletion, RasterContent, RasterOutcome, RasterOutput,
    RasterTask, RasterTaskId,
};
use crate::resource_pool::{ResourcePool, ResourcePoolStats};
use crate::settings::TileManagerSettings;
use crate::tile::{DrawMode, Tile, TileId, TileKey};
use crate::tiling::PictureLayerTiling;

/// Bookkeeping for an in-flight task
#[derive(Debug, Clone, Copy)]
struct ScheduledRaster {
    key: TileKey,
    tile_id: TileId,
    bytes: usize,
}

/// Decisions of one prepare pass, applied once the queues are gone
#[derive(Debug, Default)]
struct PreparePlan {
    schedule: Vec<(TileKey, TileId, usize)>,
    evict: Vec<TileKey>,
    out_of_memory: Vec<TileKey>,
    all_tiles_done: bool,
}

/// Tile manager counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileManagerStats {
    pub tasks_scheduled: u64,
    pub tasks_completed: u64,
    pub tiles_evicted: u64,
    pub tiles_out_of_memory: u64,
    pub completions_rejected: u64,
}

/// Schedules raster work and owns rastered tile memory
#[derive(Debug)]
pub struct TileManager {
    settings: TileManagerSettings,
    pool: ResourcePool,
    scheduled: HashMap<RasterTaskId, ScheduledRaster>,
    stats: TileManagerStats,
}

impl TileManager {
    pub fn new(settings: TileManagerSettings) -> Self {
        Self {
            pool: ResourcePool::new(settings.memory_limit_bytes, settings.max_pooled_buffers_per_size),
            settings,
            scheduled: HashMap::new(),
            stats: TileManagerStats::default(),
        }
    }

    pub fn settings(&self) -> &TileManagerSettings {
        &self.settings
    }

    /// Change the memory budget; takes effect on the next prepare
    pub fn set_memory_limit_bytes(&mut self, limit: usize) {
        self.settings.memory_limit_bytes = limit;
        self.pool.set_memory_limit_bytes(limit);
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    pub fn pool_stats(&self) -> ResourcePoolStats {
        self.pool.stats()
    }

    pub fn stats(&self) -> TileManagerStats {
        self.stats
    }

    pub fn num_scheduled(&self) -> usize {
        self.scheduled.len()
    }

    /// Bytes held by stored resources plus bytes reserved for in-flight tasks
    pub fn memory_usage_bytes(&self) -> usize {
        self.pool.in_use_bytes() + self.scheduled.values().map(|s| s.bytes).sum::<usize>()
    }

    // ========================================================================
    // Prepare
    // ========================================================================

    /// Assign memory to the most important tiles and return the raster
    /// tasks to run
    pub fn prepare_tiles(&mut self, layers: &mut [PictureLayer], tree_priority: TreePriority) -> Vec<RasterTask> {
        for layer in layers.iter_mut() {
            for id in layer.take_released_resources() {
                self.pool.release(id);
            }
        }
        self.release_orphaned_reservations(layers);
        reset_out_of_memory_tiles(layers);

        let plan = self.plan(layers, tree_priority);

        // Evictions below reopen the tilings they touch
        if plan.all_tiles_done {
            for layer in layers.iter_mut() {
                layer.set_all_tiles_done();
            }
        }

        for key in &plan.evict {
            let Some(tiling) = tiling_mut(layers, key) else {
                continue;
            };
            let released = tiling.tile_at_mut(key.index).and_then(Tile::release_resource);
            if let Some(id) = released {
                self.pool.release(id);
                self.stats.tiles_evicted += 1;
                tiling.set_all_tiles_done(false);
            }
        }

        for key in &plan.out_of_memory {
            if let Some(tile) = tiling_mut(layers, key).and_then(|t| t.tile_at_mut(key.index)) {
                tile.mark_out_of_memory();
                self.stats.tiles_out_of_memory += 1;
            }
        }

        let mut tasks = Vec::with_capacity(plan.schedule.len());
        for &(key, tile_id, bytes) in &plan.schedule {
            let Some(tiling) = tiling_mut(layers, &key) else {
                continue;
            };
            let raster_source = tiling.raster_source().clone();
            let Some(tile) = tiling.tile_at_mut(key.index) else {
                continue;
            };
            let id = next_task_id();
            tile.mark_scheduled(id);
            tasks.push(RasterTask {
                id,
                key,
                tile_id,
                content_rect: tile.content_rect(),
                contents_scale: tile.contents_scale(),
                raster_source,
                invalidation: tile.invalidation(),
            });
            self.scheduled.insert(id, ScheduledRaster { key, tile_id, bytes });
        }
        self.stats.tasks_scheduled += tasks.len() as u64;

        tracing::debug!(
            scheduled = tasks.len(),
            evicted = plan.evict.len(),
            out_of_memory = plan.out_of_memory.len(),
            memory_usage = self.memory_usage_bytes(),
            memory_limit = self.settings.memory_limit_bytes,
            "prepared tiles"
        );
        tasks
    }

    fn plan(&self, layers: &[PictureLayer], tree_priority: TreePriority) -> PreparePlan {
        let pairs: Vec<LayerPair<'_>> = layers.iter().map(PictureLayer::pair).collect();
        let limit = self.settings.memory_limit_bytes;
        let mut usage = self.memory_usage_bytes();
        let mut plan = PreparePlan::default();
        let mut eviction = EvictionQueue::new(&pairs, tree_priority);

        // Shed memory the budget no longer allows
        while usage > limit {
            let Some(victim) = eviction.next() else {
                break;
            };
            usage = usage.saturating_sub(victim.tile.gpu_memory_bytes());
            plan.evict.push(victim.key);
        }

        let mut saw_work = false;
        for prioritized in RasterQueue::new(&pairs, tree_priority, RasterQueueType::All) {
            saw_work = true;
            let tile = prioritized.tile;
            if tile.is_scheduled() {
                continue;
            }
            if plan.schedule.len() >= self.settings.max_tasks_per_prepare {
                break;
            }

            let bytes = tile.gpu_memory_bytes();
            while usage + bytes > limit {
                let Some(&victim) = eviction.peek() else {
                    break;
                };
                if !prioritized.priority.is_higher_priority_than(&victim.priority) {
                    break;
                }
                usage = usage.saturating_sub(victim.tile.gpu_memory_bytes());
                plan.evict.push(victim.key);
                eviction.pop();
            }

            if usage + bytes > limit {
                if prioritized.is_required_for_activation || prioritized.is_required_for_draw {
                    plan.out_of_memory.push(prioritized.key);
                }
                continue;
            }
            usage += bytes;
            plan.schedule.push((prioritized.key, tile.id(), bytes));
        }
        plan.all_tiles_done = !saw_work;
        plan
    }

    /// Free reservations of tasks whose tile was dropped or replaced, or no
    /// longer waits on them. Their completions would be rejected anyway.
    fn release_orphaned_reservations(&mut self, layers: &[PictureLayer]) {
        let before = self.scheduled.len();
        self.scheduled.retain(|&task, scheduled| {
            let Ok(key) = locate_tile(layers, &scheduled.key, scheduled.tile_id) else {
                return false;
            };
            find_layer(layers, key.layer)
                .and_then(|layer| layer.tile(&key))
                .is_some_and(|tile| tile.scheduled_task() == Some(task))
        });
        let released = before - self.scheduled.len();
        if released > 0 {
            tracing::debug!(released, "released reservations of orphaned raster tasks");
        }
    }

    // ========================================================================
    // Completion
    // ========================================================================

    /// Give up on an in-flight task. Its reservation is freed and the tile
    /// can be scheduled again; a late completion is rejected as stale.
    ///
    /// Returns false if the task was not in flight.
    pub fn cancel_task(&mut self, layers: &mut [PictureLayer], task: RasterTaskId) -> bool {
        let Some(scheduled) = self.scheduled.remove(&task) else {
            return false;
        };
        if let Ok(key) = locate_tile(layers, &scheduled.key, scheduled.tile_id)
            && let Some(tiling) = tiling_mut(layers, &key)
        {
            let cancelled = tiling.tile_at_mut(key.index).is_some_and(|tile| tile.cancel_scheduled(task));
            if cancelled {
                tiling.set_all_tiles_done(false);
            }
        }
        tracing::debug!(task, tile = scheduled.tile_id, "cancelled raster task");
        true
    }

    /// Apply a finished task. Completions for tasks no longer in flight, or
    /// whose tile was dropped or replaced, are rejected and their resource is
    /// released.
    pub fn did_finish_raster(
        &mut self,
        layers: &mut [PictureLayer],
        completion: RasterCompletion,
    ) -> Result<(), RasterError> {
        let result = self.apply_completion(layers, &completion);
        match &result {
            Ok(()) => self.stats.tasks_completed += 1,
            Err(err) => {
                tracing::warn!(task = completion.task, tile = completion.tile_id, "discarding raster result: {}", err);
                self.stats.completions_rejected += 1;
                if let RasterOutcome::Resource(id) = completion.outcome {
                    self.pool.release(id);
                }
            }
        }
        result
    }

    fn apply_completion(&mut self, layers: &mut [PictureLayer], completion: &RasterCompletion) -> Result<(), RasterError> {
        let Some(scheduled) = self.scheduled.remove(&completion.task) else {
            return Err(RasterError::StaleCompletion {
                task: completion.task,
                tile: completion.tile_id,
            });
        };

        let key = locate_tile(layers, &scheduled.key, scheduled.tile_id)?;
        let tile = tiling_mut(layers, &key)
            .and_then(|t| t.tile_at_mut(key.index))
            .ok_or_else(|| not_found(&key))?;
        tile.complete_raster(completion.task, completion.outcome)?;
        tracing::trace!(task = completion.task, tile = scheduled.tile_id, tree = ?key.tree, "raster applied");
        Ok(())
    }

    /// Store a worker's output and apply it
    pub fn complete_output(&mut self, layers: &mut [PictureLayer], output: RasterOutput) -> Result<(), RasterError> {
        let outcome = match output.content {
            RasterContent::SolidColor(color) => RasterOutcome::SolidColor(color),
            RasterContent::Pixels(pixmap) => match self.pool.insert(pixmap) {
                Some(id) => RasterOutcome::Resource(id),
                None => RasterOutcome::OutOfMemory,
            },
            RasterContent::OutOfMemory => RasterOutcome::OutOfMemory,
        };
        self.did_finish_raster(
            layers,
            RasterCompletion {
                task: output.task,
                key: output.key,
                tile_id: output.tile_id,
                outcome,
            },
        )
    }

    /// Rasterize `tasks` on the built-in CPU workers and apply the results.
    ///
    /// Returns the completions that had to be discarded.
    pub fn run_tasks(&mut self, layers: &mut [PictureLayer], tasks: &[RasterTask]) -> Vec<RasterError> {
        let outputs = rasterize_tasks_parallel(tasks, &mut self.pool);
        outputs
            .into_iter()
            .filter_map(|output| self.complete_output(layers, output).err())
            .collect()
    }

    // ========================================================================
    // Readiness
    // ========================================================================

    /// No tile the pending tree waits on still needs raster
    pub fn is_ready_to_activate(&self, layers: &[PictureLayer]) -> bool {
        let pairs: Vec<LayerPair<'_>> = layers.iter().map(PictureLayer::pair).collect();
        RasterQueue::new(&pairs, TreePriority::default(), RasterQueueType::RequiredForActivation).is_empty()
    }

    /// No tile the active tree needs to draw still needs raster
    pub fn is_ready_to_draw(&self, layers: &[PictureLayer]) -> bool {
        let pairs: Vec<LayerPair<'_>> = layers.iter().map(PictureLayer::pair).collect();
        RasterQueue::new(&pairs, TreePriority::default(), RasterQueueType::RequiredForDraw).is_empty()
    }

    /// Release every resource held by the layers' tiles
    pub fn release_all_resources(&mut self, layers: &mut [PictureLayer]) {
        for layer in layers.iter_mut() {
            for tree in [Tree::Active, Tree::Pending] {
                for tiling in layer.set_mut(tree).tilings_mut() {
                    for tile in tiling.tiles_mut() {
                        if let Some(id) = tile.release_resource() {
                            self.pool.release(id);
                        }
                    }
                    tiling.set_all_tiles_done(false);
                }
            }
            for id in layer.take_released_resources() {
                self.pool.release(id);
            }
        }
    }
}

impl Default for TileManager {
    fn default() -> Self {
        Self::new(TileManagerSettings::default())
    }
}

fn find_layer(layers: &[PictureLayer], id: LayerId) -> Option<&PictureLayer> {
    layers.iter().find(|l| l.id() == id)
}

fn tiling_mut<'l>(layers: &'l mut [PictureLayer], key: &TileKey) -> Option<&'l mut PictureLayerTiling> {
    layers
        .iter_mut()
        .find(|l| l.id() == key.layer)?
        .set_mut(key.tree)
        .find_tiling_with_scale_mut(key.contents_scale)
}

fn not_found(key: &TileKey) -> RasterError {
    RasterError::TileNotFound {
        layer: key.layer,
        tree: key.tree,
        contents_scale: key.contents_scale,
        index: key.index,
    }
}

/// Where a scheduled tile lives now. Activation may have moved it to the
/// other tree.
fn locate_tile(layers: &[PictureLayer], key: &TileKey, tile_id: TileId) -> Result<TileKey, RasterError> {
    let Some(layer) = find_layer(layers, key.layer) else {
        return Err(not_found(key));
    };
    let twin_key = TileKey { tree: key.tree.twin(), ..*key };

    let mut replaced_by = None;
    for candidate in [*key, twin_key] {
        match layer.tile(&candidate) {
            Some(tile) if tile.id() == tile_id => return Ok(candidate),
            Some(tile) => replaced_by = replaced_by.or(Some(tile.id())),
            None => {}
        }
    }
    Err(match replaced_by {
        Some(found) => RasterError::TileMismatch { expected: tile_id, found },
        None => not_found(key),
    })
}

/// Give tiles that ran out of memory another chance
fn reset_out_of_memory_tiles(layers: &mut [PictureLayer]) {
    for layer in layers.iter_mut() {
        for tree in [Tree::Active, Tree::Pending] {
            for tiling in layer.set_mut(tree).tilings_mut() {
                let mut reset = false;
                for tile in tiling.tiles_mut() {
                    if tile.draw_info().mode() == DrawMode::OutOfMemory {
                        tile.reset_out_of_memory();
                        reset = true;
                    }
                }
                if reset {
                    tiling.set_all_tiles_done(false);
                }
            }
        }
    }
}
