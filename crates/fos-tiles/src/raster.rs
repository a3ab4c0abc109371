//! Raster Tasks
//!
//! Work items handed out by the tile manager and the workers that play a
//! raster source back into pooled pixel buffers. Solid-color tiles are
//! detected up front and never get a buffer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::RasterError;
use crate::geometry::{Rect, Size};
use crate::raster_source::RasterSource;
use crate::resource_pool::ResourcePool;
use crate::tile::{ResourceId, TileId, TileInvalidation, TileKey};
use crate::Color;

/// Raster task ID type
pub type RasterTaskId = u64;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Generate unique raster task ID
pub(crate) fn next_task_id() -> RasterTaskId {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

/// What a finished raster left the tile with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterOutcome {
    /// Pixels stored in the resource pool
    Resource(ResourceId),
    /// The whole tile is one color
    SolidColor(Color),
    /// No memory was available for the pixels
    OutOfMemory,
}

/// A finished task as reported back to the tile manager
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterCompletion {
    pub task: RasterTaskId,
    pub key: TileKey,
    pub tile_id: TileId,
    pub outcome: RasterOutcome,
}

/// One tile's worth of raster work
#[derive(Debug, Clone)]
pub struct RasterTask {
    pub id: RasterTaskId,
    /// Where the tile lived when the task was issued
    pub key: TileKey,
    pub tile_id: TileId,
    pub content_rect: Rect,
    pub contents_scale: f32,
    pub raster_source: Arc<dyn RasterSource>,
    /// Previous tile and the part of it that changed, for partial raster
    pub invalidation: Option<TileInvalidation>,
}

/// Rastered content before it is stored
#[derive(Debug)]
pub enum RasterContent {
    SolidColor(Color),
    Pixels(tiny_skia::Pixmap),
    /// A buffer could not be created for the tile
    OutOfMemory,
}

/// Result of running a raster task
#[derive(Debug)]
pub struct RasterOutput {
    pub task: RasterTaskId,
    pub key: TileKey,
    pub tile_id: TileId,
    pub content: RasterContent,
    /// Time to rasterize in microseconds
    pub raster_time_us: u64,
}

impl RasterOutput {
    fn new(task: &RasterTask, content: RasterContent, start: Instant) -> Self {
        Self {
            task: task.id,
            key: task.key,
            tile_id: task.tile_id,
            content,
            raster_time_us: start.elapsed().as_micros() as u64,
        }
    }
}

/// Solid color of the task's content, if any
pub fn analyze_solid_color(task: &RasterTask) -> Option<Color> {
    task.raster_source
        .perform_solid_color_analysis(&task.content_rect, task.contents_scale)
}

/// Play the task's content back into `buffer`, which must hold exactly
/// `content_rect` worth of RGBA pixels
pub fn rasterize(task: &RasterTask, buffer: Vec<u8>) -> Result<RasterOutput, RasterError> {
    let start = Instant::now();
    let size = task.content_rect.size();
    let int_size = tiny_skia::IntSize::from_wh(size.width.max(0) as u32, size.height.max(0) as u32)
        .ok_or(RasterError::InvalidTarget(task.content_rect))?;
    let mut pixmap =
        tiny_skia::Pixmap::from_vec(buffer, int_size).ok_or(RasterError::InvalidTarget(task.content_rect))?;

    task.raster_source
        .playback_to_pixmap(&mut pixmap, &task.content_rect, task.contents_scale);
    Ok(RasterOutput::new(task, RasterContent::Pixels(pixmap), start))
}

fn rasterize_job(task: &RasterTask, buffer: Vec<u8>) -> RasterOutput {
    let start = Instant::now();
    rasterize(task, buffer).unwrap_or_else(|err| {
        tracing::warn!(task = task.id, tile = task.tile_id, "raster failed: {}", err);
        RasterOutput::new(task, RasterContent::OutOfMemory, start)
    })
}

/// Rasterize a batch of tasks on scoped threads.
///
/// Solid-color tasks finish on the calling thread without a buffer; the rest
/// check a buffer out of `pool` and are spread across the available cores.
/// Outputs come back in task order.
pub fn rasterize_tasks_parallel(tasks: &[RasterTask], pool: &mut ResourcePool) -> Vec<RasterOutput> {
    let mut outputs: Vec<Option<RasterOutput>> = Vec::with_capacity(tasks.len());
    let mut jobs: Vec<(usize, &RasterTask, Vec<u8>)> = Vec::new();

    for (slot, task) in tasks.iter().enumerate() {
        let start = Instant::now();
        match analyze_solid_color(task) {
            Some(color) => outputs.push(Some(RasterOutput::new(task, RasterContent::SolidColor(color), start))),
            None => {
                outputs.push(None);
                jobs.push((slot, task, pool.checkout(task.content_rect.size())));
            }
        }
    }

    // For small job counts, rasterize sequentially
    if jobs.len() < 4 {
        for (slot, task, buffer) in jobs {
            outputs[slot] = Some(rasterize_job(task, buffer));
        }
        return outputs.into_iter().flatten().collect();
    }

    let num_threads = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
        .min(jobs.len());
    let chunk_size = jobs.len().div_ceil(num_threads);

    let finished: Vec<(usize, RasterOutput)> = std::thread::scope(|s| {
        let handles: Vec<_> = jobs
            .chunks_mut(chunk_size)
            .map(|chunk| {
                s.spawn(move || {
                    chunk
                        .iter_mut()
                        .map(|(slot, task, buffer)| (*slot, rasterize_job(task, std::mem::take(buffer))))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|h| match h.join() {
                Ok(done) => done,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    });

    for (slot, output) in finished {
        outputs[slot] = Some(output);
    }
    outputs.into_iter().flatten().collect()
}

/// Bytes of an RGBA buffer of `size`
pub(crate) fn rgba_bytes(size: Size) -> usize {
    size.area().max(0) as usize * 4
}
