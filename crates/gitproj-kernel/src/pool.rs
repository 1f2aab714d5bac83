//! Reusable object pools for index parsing.
//!
//! Parsing a large index touches hundreds of thousands of entries. Instead of
//! allocating a fresh record per entry on every parse, the parser draws
//! records from an `ObjectPool` and hands them all back at once with
//! [`ObjectPool::free_all`] before the next parse. Backing storage survives,
//! so a steady-state reparse allocates nothing.
//!
//! ```text
//!   items:  [ in use ........ | spare ........... ]
//!           0            free_index             size
//! ```
//!
//! Slots are addressed by [`PoolSlot`]; growth appends, so a slot issued
//! earlier keeps its position. Not thread-safe: one parse at a time.

use std::ops::{Index, IndexMut};

use serde::Deserialize;

/// Smallest size a pool is ever created with or shrunk to.
pub const DEFAULT_MIN_POOL_SIZE: usize = 100;

/// Fraction of the current size added when the pool runs out.
pub const DEFAULT_GROWTH_RATIO: f64 = 0.15;

/// Shrink keeps this much headroom over the last high-water mark.
pub const DEFAULT_SHRINK_HEADROOM: f64 = 1.10;

/// Shrink only happens if it reclaims at least this fraction of the pool.
pub const DEFAULT_SHRINK_THRESHOLD: f64 = 0.10;

/// Tuning knobs for [`ObjectPool`].
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min_size: usize,
    pub growth_ratio: f64,
    pub shrink_headroom: f64,
    pub shrink_threshold: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_MIN_POOL_SIZE,
            growth_ratio: DEFAULT_GROWTH_RATIO,
            shrink_headroom: DEFAULT_SHRINK_HEADROOM,
            shrink_threshold: DEFAULT_SHRINK_THRESHOLD,
        }
    }
}

/// Handle to an object issued by [`ObjectPool::get_new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolSlot(usize);

impl PoolSlot {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A growable, shrinkable array of reusable `T`.
///
/// Objects handed out are *not* reset; callers overwrite the fields they use.
pub struct ObjectPool<T> {
    items: Vec<T>,
    free_index: usize,
    /// Size originally requested; growth jumps back to it after a deep shrink.
    allocation_size: usize,
    config: PoolConfig,
    expansions: u64,
}

impl<T: Default> ObjectPool<T> {
    /// Create a pool pre-filled with `allocation_size` objects.
    pub fn new(allocation_size: usize) -> Self {
        Self::with_config(allocation_size, PoolConfig::default())
    }

    pub fn with_config(allocation_size: usize, config: PoolConfig) -> Self {
        let size = allocation_size.max(config.min_size).max(1);
        let mut items = Vec::with_capacity(size);
        items.resize_with(size, T::default);
        Self {
            items,
            free_index: 0,
            allocation_size: size,
            config,
            expansions: 0,
        }
    }

    /// Hand out the next unused object, growing the pool if it is exhausted.
    pub fn get_new(&mut self) -> PoolSlot {
        if self.free_index == self.items.len() {
            self.expand();
        }
        let slot = PoolSlot(self.free_index);
        self.free_index += 1;
        slot
    }

    /// Mark every object unused. Storage is kept for the next parse.
    pub fn free_all(&mut self) {
        self.free_index = 0;
    }

    /// Trim storage to ~110% of the current high-water mark.
    ///
    /// No-op unless at least `shrink_threshold` of the pool would be
    /// reclaimed, and never below `min_size`. Slots in use are kept.
    pub fn shrink(&mut self) {
        let size = self.items.len();
        let target = ((self.free_index as f64) * self.config.shrink_headroom).round() as usize;
        let target = target.max(self.config.min_size).max(self.free_index);
        if target >= size {
            return;
        }

        let reclaimed = size - target;
        if (reclaimed as f64) < (size as f64) * self.config.shrink_threshold {
            return;
        }

        tracing::trace!(from = size, to = target, "shrinking object pool");
        self.items.truncate(target);
        self.items.shrink_to_fit();
    }

    fn expand(&mut self) {
        let size = self.items.len();
        let grow = ((size as f64) * self.config.growth_ratio).round() as usize;
        let mut new_size = size + grow.max(1);
        if new_size < self.allocation_size {
            new_size = self.allocation_size;
        }
        tracing::trace!(from = size, to = new_size, "expanding object pool");
        self.items.resize_with(new_size, T::default);
        self.expansions += 1;
    }
}

impl<T> ObjectPool<T> {
    /// Current backing size (objects allocated, used or not).
    pub fn size(&self) -> usize {
        self.items.len()
    }

    /// Number of objects handed out since the last `free_all`.
    pub fn free_index(&self) -> usize {
        self.free_index
    }

    /// How many times the pool has grown. Stable across a reparse that fits.
    pub fn expansions(&self) -> u64 {
        self.expansions
    }

    /// Objects currently in use, in issue order.
    pub fn in_use(&self) -> &[T] {
        &self.items[..self.free_index]
    }
}

impl<T> Index<PoolSlot> for ObjectPool<T> {
    type Output = T;

    fn index(&self, slot: PoolSlot) -> &T {
        debug_assert!(slot.0 < self.free_index, "slot used after free_all");
        &self.items[slot.0]
    }
}

impl<T> IndexMut<PoolSlot> for ObjectPool<T> {
    fn index_mut(&mut self, slot: PoolSlot) -> &mut T {
        debug_assert!(slot.0 < self.free_index, "slot used after free_all");
        &mut self.items[slot.0]
    }
}

impl<T> std::fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("size", &self.items.len())
            .field("free_index", &self.free_index)
            .field("allocation_size", &self.allocation_size)
            .finish()
    }
}
