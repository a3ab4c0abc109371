//! Resource Pool
//!
//! Holds rastered tile pixels under a memory limit and recycles pixel
//! buffers between tiles of the same size.

use std::collections::HashMap;

use crate::geometry::Size;
use crate::raster::rgba_bytes;
use crate::tile::ResourceId;

/// A stored tile bitmap
#[derive(Debug)]
struct Resource {
    size: Size,
    pixmap: tiny_skia::Pixmap,
}

/// Rastered tile storage with buffer reuse
#[derive(Debug)]
pub struct ResourcePool {
    /// Live resources by ID
    resources: HashMap<ResourceId, Resource>,
    next_id: ResourceId,
    /// Bytes held by live resources
    in_use_bytes: usize,
    /// Maximum bytes held by live resources
    memory_limit_bytes: usize,
    /// Free buffers indexed by size
    free_buffers: HashMap<Size, Vec<Vec<u8>>>,
    /// Maximum buffers per size
    max_per_size: usize,
    /// Total pooled bytes
    pooled_bytes: usize,
    /// Stats
    hits: u64,
    misses: u64,
}

impl ResourcePool {
    /// Create a new pool
    pub fn new(memory_limit_bytes: usize, max_per_size: usize) -> Self {
        Self {
            resources: HashMap::new(),
            next_id: 1,
            in_use_bytes: 0,
            memory_limit_bytes,
            free_buffers: HashMap::new(),
            max_per_size,
            pooled_bytes: 0,
            hits: 0,
            misses: 0,
        }
    }

    pub fn memory_limit_bytes(&self) -> usize {
        self.memory_limit_bytes
    }

    pub fn set_memory_limit_bytes(&mut self, limit: usize) {
        self.memory_limit_bytes = limit;
    }

    pub fn in_use_bytes(&self) -> usize {
        self.in_use_bytes
    }

    pub fn num_resources(&self) -> usize {
        self.resources.len()
    }

    /// Checkout a zeroed buffer for a tile of `size`
    pub fn checkout(&mut self, size: Size) -> Vec<u8> {
        let len = rgba_bytes(size);

        if let Some(mut buffer) = self.free_buffers.get_mut(&size).and_then(|pool| pool.pop()) {
            self.hits += 1;
            self.pooled_bytes -= buffer.len();
            buffer.fill(0);
            buffer.resize(len, 0);
            return buffer;
        }

        self.misses += 1;
        vec![0u8; len]
    }

    /// Return a buffer to the pool. Buffers beyond the per-size or memory
    /// limits are dropped.
    pub fn checkin(&mut self, size: Size, buffer: Vec<u8>) {
        let bytes = buffer.len();
        if self.pooled_bytes + bytes > self.memory_limit_bytes {
            return;
        }

        let pool = self.free_buffers.entry(size).or_default();
        if pool.len() >= self.max_per_size {
            return;
        }

        self.pooled_bytes += bytes;
        pool.push(buffer);
    }

    /// Store rastered pixels. Returns `None` and recycles the buffer when
    /// the memory limit would be exceeded.
    pub fn insert(&mut self, pixmap: tiny_skia::Pixmap) -> Option<ResourceId> {
        let size = Size::new(pixmap.width() as i32, pixmap.height() as i32);
        let bytes = rgba_bytes(size);
        if self.in_use_bytes + bytes > self.memory_limit_bytes {
            tracing::debug!(bytes, in_use = self.in_use_bytes, limit = self.memory_limit_bytes, "resource pool full");
            self.checkin(size, pixmap.take());
            return None;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.in_use_bytes += bytes;
        self.resources.insert(id, Resource { size, pixmap });
        Some(id)
    }

    /// Free a resource, keeping its buffer for reuse
    pub fn release(&mut self, id: ResourceId) -> bool {
        let Some(resource) = self.resources.remove(&id) else {
            return false;
        };
        self.in_use_bytes -= rgba_bytes(resource.size);
        self.checkin(resource.size, resource.pixmap.take());
        true
    }

    /// Pixels of a live resource
    pub fn pixmap(&self, id: ResourceId) -> Option<&tiny_skia::Pixmap> {
        self.resources.get(&id).map(|r| &r.pixmap)
    }

    /// Drop pooled buffers, keeping live resources
    pub fn clear(&mut self) {
        self.free_buffers.clear();
        self.pooled_bytes = 0;
    }

    /// Get pool stats
    pub fn stats(&self) -> ResourcePoolStats {
        ResourcePoolStats {
            in_use_bytes: self.in_use_bytes,
            memory_limit_bytes: self.memory_limit_bytes,
            num_resources: self.resources.len(),
            pooled_bytes: self.pooled_bytes,
            hits: self.hits,
            misses: self.misses,
            hit_rate: if self.hits + self.misses > 0 {
                self.hits as f64 / (self.hits + self.misses) as f64
            } else {
                0.0
            },
            num_pooled_buffers: self.free_buffers.values().map(|p| p.len()).sum(),
        }
    }
}

/// Resource pool statistics
#[derive(Debug, Clone, PartialEq)]
pub struct ResourcePoolStats {
    pub in_use_bytes: usize,
    pub memory_limit_bytes: usize,
    pub num_resources: usize,
    pub pooled_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub num_pooled_buffers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixmap(size: u32) -> tiny_skia::Pixmap {
        tiny_skia::Pixmap::new(size, size).unwrap()
    }

    #[test]
    fn test_checkout_reuses_buffers() {
        let mut pool = ResourcePool::new(1024 * 1024, 4);
        let buffer = pool.checkout(Size::new(16, 16));
        assert_eq!(buffer.len(), 16 * 16 * 4);
        pool.checkin(Size::new(16, 16), buffer);

        let again = pool.checkout(Size::new(16, 16));
        assert_eq!(again.len(), 16 * 16 * 4);
        let stats = pool.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn test_insert_respects_limit() {
        let mut pool = ResourcePool::new(2 * 10 * 10 * 4, 4);
        let a = pool.insert(pixmap(10)).unwrap();
        let _b = pool.insert(pixmap(10)).unwrap();
        assert!(pool.insert(pixmap(10)).is_none());
        assert_eq!(pool.in_use_bytes(), 800);

        assert!(pool.release(a));
        assert!(!pool.release(a));
        assert_eq!(pool.in_use_bytes(), 400);
        assert!(pool.insert(pixmap(10)).is_some());
    }

    #[test]
    fn test_pixmap_lookup() {
        let mut pool = ResourcePool::new(1024 * 1024, 4);
        let id = pool.insert(pixmap(8)).unwrap();
        assert_eq!(pool.pixmap(id).map(|p| p.width()), Some(8));
        assert!(pool.pixmap(id + 1).is_none());
    }
}
