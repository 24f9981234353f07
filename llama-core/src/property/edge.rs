//! Per-edge properties, indexed directly by [`EdgeId`]: outer dimension is
//! the level, inner dimension is the slot within that level's edge table.
//! Unlike node properties, edge-table slots are never copy-on-write
//! shared across levels (each level gets its own edge table), so each
//! level's property array is simply densely allocated to that level's
//! edge-table size. Spec §5.

use std::any::Any;

use crate::config::PageManagerConfig;
use crate::csr::EdgeId;
use crate::level::{LevelCollection, LevelIndex};

pub struct EdgeProperty<T> {
    levels: LevelCollection<T>,
}

impl<T: Copy + Default + Send + Sync + PartialEq> EdgeProperty<T> {
    pub fn new(page_config: PageManagerConfig) -> Self {
        Self {
            levels: LevelCollection::new(page_config),
        }
    }

    /// Allocates a fresh, densely-initialized property array for a level
    /// with `capacity` edge-table slots.
    pub fn begin_level(&mut self, capacity: usize) -> LevelIndex {
        let idx = self.levels.new_level();
        self.levels.level_at_mut(idx).unwrap().dense_init(capacity);
        idx
    }

    pub fn finish_level(&mut self, level: LevelIndex) {
        self.levels.level_at_mut(level).unwrap().finalize();
    }

    pub fn latest_level(&self) -> Option<LevelIndex> {
        self.levels.latest_level()
    }

    pub fn set(&self, level: LevelIndex, slot: usize, value: T) {
        self.levels.level_at(level).expect("set on an absent level").dense_write(slot, value);
    }

    pub fn get(&self, level: LevelIndex, slot: usize) -> T {
        self.levels.level_at(level).expect("get on an absent level").get(slot)
    }

    pub fn get_by_edge_id(&self, edge: EdgeId) -> T {
        self.get(edge.level() as LevelIndex, edge.index() as usize)
    }

    pub fn set_by_edge_id(&self, edge: EdgeId, value: T) {
        self.set(edge.level() as LevelIndex, edge.index() as usize, value)
    }
}

/// A batch of pending edge-property writes, collected while an algorithm
/// runs over the graph and applied in one pass at checkpoint time rather
/// than as each value is computed. Spec §5's "writable overlay, flushed
/// on checkpoint."
pub struct EdgePropertyOverlay<T> {
    pending: Vec<(EdgeId, T)>,
}

impl<T: Copy> EdgePropertyOverlay<T> {
    pub fn new() -> Self {
        Self { pending: Vec::new() }
    }

    pub fn push(&mut self, edge: EdgeId, value: T) {
        self.pending.push((edge, value));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Writes every pending entry into `target` and clears the overlay.
    pub fn flush(&mut self, target: &EdgeProperty<T>)
    where
        T: Copy + Default + Send + Sync + PartialEq,
    {
        for (edge, value) in self.pending.drain(..) {
            target.set_by_edge_id(edge, value);
        }
    }
}

impl<T: Copy> Default for EdgePropertyOverlay<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Object-safe checkpoint-lifecycle hook for a registered edge property,
/// independent of its element type. Spec §4.6 steps 4 and 8: a graph's
/// name-indexed property registry drives every registered property
/// through its own level's `begin_level`/`finish_level` as the graph's
/// own edge table is built.
pub trait EdgePropertyLifecycle: Send + Sync + Any {
    fn begin_level(&mut self, capacity: usize) -> LevelIndex;
    fn finish_level(&mut self, level: LevelIndex);
    fn latest_level(&self) -> Option<LevelIndex>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Copy + Default + Send + Sync + PartialEq + 'static> EdgePropertyLifecycle for EdgeProperty<T> {
    fn begin_level(&mut self, capacity: usize) -> LevelIndex {
        EdgeProperty::begin_level(self, capacity)
    }

    fn finish_level(&mut self, level: LevelIndex) {
        EdgeProperty::finish_level(self, level)
    }

    fn latest_level(&self) -> Option<LevelIndex> {
        EdgeProperty::latest_level(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
