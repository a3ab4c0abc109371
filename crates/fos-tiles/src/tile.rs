//! Tile
//!
//! A rectangular piece of a tiling's content and the rastered output that
//! backs it. Tiles are owned by exactly one tiling at a time; activation moves
//! them between trees without copying their content.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::RasterError;
use crate::geometry::Rect;
use crate::layer::LayerId;
use crate::priority::Tree;
use crate::raster::{RasterOutcome, RasterTaskId};
use crate::tiling_data::TileIndex;
use crate::Color;

/// Tile ID type
pub type TileId = u64;

/// Handle to rastered pixels held by a resource pool
pub type ResourceId = u64;

static NEXT_TILE_ID: AtomicU64 = AtomicU64::new(1);

/// Generate unique tile ID
pub(crate) fn next_tile_id() -> TileId {
    NEXT_TILE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Where a tile stands with respect to raster
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DrawMode {
    /// Nothing usable yet
    #[default]
    Unrasterized,
    /// Backed by pooled pixels
    Resource(ResourceId),
    /// Content analysis found a single color; no pixels are needed
    SolidColor(Color),
    /// Memory was not available; draw a checkerboard
    OutOfMemory,
}

/// Draw state of a tile
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TileDrawInfo {
    mode: DrawMode,
}

impl TileDrawInfo {
    pub fn mode(&self) -> DrawMode {
        self.mode
    }

    /// Only unrasterized tiles want raster work
    pub fn needs_raster(&self) -> bool {
        self.mode == DrawMode::Unrasterized
    }

    pub fn has_resource(&self) -> bool {
        matches!(self.mode, DrawMode::Resource(_))
    }

    pub fn resource_id(&self) -> Option<ResourceId> {
        match self.mode {
            DrawMode::Resource(id) => Some(id),
            _ => None,
        }
    }

    /// Resource-backed and solid-color tiles can be drawn
    pub fn is_ready_to_draw(&self) -> bool {
        matches!(self.mode, DrawMode::Resource(_) | DrawMode::SolidColor(_))
    }
}

/// Everything a client needs to construct a tile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileCreateInfo {
    pub index: TileIndex,
    /// Bounds in content space
    pub content_rect: Rect,
    /// Smallest layer-space rect covering `content_rect`
    pub enclosing_layer_rect: Rect,
    pub contents_scale: f32,
}

/// Link from a recreated tile to the tile it replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileInvalidation {
    pub previous_tile_id: TileId,
    /// Content-space part of the tile that actually changed
    pub invalidated_rect: Rect,
}

/// Stable address of a tile across queue rebuilds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileKey {
    pub layer: LayerId,
    pub tree: Tree,
    pub contents_scale: f32,
    pub index: TileIndex,
}

/// A rectangular piece of layer content
#[derive(Debug)]
pub struct Tile {
    id: TileId,
    index: TileIndex,
    content_rect: Rect,
    enclosing_layer_rect: Rect,
    contents_scale: f32,
    draw_info: TileDrawInfo,
    required_for_activation: bool,
    required_for_draw: bool,
    invalidation: Option<TileInvalidation>,
    scheduled_task: Option<RasterTaskId>,
    used_for_draw: bool,
}

impl Tile {
    /// Create an unrasterized tile
    pub fn new(info: &TileCreateInfo) -> Self {
        Self {
            id: next_tile_id(),
            index: info.index,
            content_rect: info.content_rect,
            enclosing_layer_rect: info.enclosing_layer_rect,
            contents_scale: info.contents_scale,
            draw_info: TileDrawInfo::default(),
            required_for_activation: false,
            required_for_draw: false,
            invalidation: None,
            scheduled_task: None,
            used_for_draw: false,
        }
    }

    pub fn id(&self) -> TileId {
        self.id
    }

    pub fn index(&self) -> TileIndex {
        self.index
    }

    pub fn content_rect(&self) -> Rect {
        self.content_rect
    }

    pub fn enclosing_layer_rect(&self) -> Rect {
        self.enclosing_layer_rect
    }

    pub fn contents_scale(&self) -> f32 {
        self.contents_scale
    }

    pub fn draw_info(&self) -> &TileDrawInfo {
        &self.draw_info
    }

    pub fn required_for_activation(&self) -> bool {
        self.required_for_activation
    }

    pub fn set_required_for_activation(&mut self, required: bool) {
        self.required_for_activation = required;
    }

    pub fn required_for_draw(&self) -> bool {
        self.required_for_draw
    }

    pub fn set_required_for_draw(&mut self, required: bool) {
        self.required_for_draw = required;
    }

    /// Remember which tile this one replaces and which part changed
    pub fn set_invalidated(&mut self, invalidated_rect: Rect, previous_tile_id: TileId) {
        self.invalidation = Some(TileInvalidation { previous_tile_id, invalidated_rect });
    }

    pub fn invalidation(&self) -> Option<TileInvalidation> {
        self.invalidation
    }

    /// Uncompressed RGBA footprint once rastered
    pub fn gpu_memory_bytes(&self) -> usize {
        self.content_rect.size().area() as usize * 4
    }

    /// In-flight raster task, if any
    pub fn scheduled_task(&self) -> Option<RasterTaskId> {
        self.scheduled_task
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled_task.is_some()
    }

    pub(crate) fn mark_scheduled(&mut self, task: RasterTaskId) {
        self.scheduled_task = Some(task);
    }

    /// Forget `task`; false if the tile waits on a different one
    pub(crate) fn cancel_scheduled(&mut self, task: RasterTaskId) -> bool {
        if self.scheduled_task != Some(task) {
            return false;
        }
        self.scheduled_task = None;
        true
    }

    /// Apply a raster result. Results for tasks this tile no longer waits on
    /// are rejected so the caller can release their resources.
    pub fn complete_raster(&mut self, task: RasterTaskId, outcome: RasterOutcome) -> Result<(), RasterError> {
        if self.scheduled_task != Some(task) {
            return Err(RasterError::StaleCompletion { task, tile: self.id });
        }
        self.scheduled_task = None;
        self.draw_info.mode = match outcome {
            RasterOutcome::Resource(id) => DrawMode::Resource(id),
            RasterOutcome::SolidColor(color) => DrawMode::SolidColor(color),
            RasterOutcome::OutOfMemory => DrawMode::OutOfMemory,
        };
        self.invalidation = None;
        Ok(())
    }

    /// Record that memory could not be found for this tile
    pub(crate) fn mark_out_of_memory(&mut self) {
        if self.draw_info.needs_raster() {
            self.draw_info.mode = DrawMode::OutOfMemory;
        }
    }

    /// Drop the backing resource and return its handle
    pub fn release_resource(&mut self) -> Option<ResourceId> {
        let id = self.draw_info.resource_id()?;
        self.draw_info.mode = DrawMode::Unrasterized;
        Some(id)
    }

    /// Forget an out-of-memory verdict so the tile is considered again
    pub(crate) fn reset_out_of_memory(&mut self) {
        if self.draw_info.mode == DrawMode::OutOfMemory {
            self.draw_info.mode = DrawMode::Unrasterized;
        }
    }

    pub fn mark_used_for_draw(&mut self) {
        self.used_for_draw = true;
    }

    pub fn was_used_for_draw(&self) -> bool {
        self.used_for_draw
    }
}
