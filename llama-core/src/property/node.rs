//! Versioned, per-node scalar properties: one value of `T` per node, per
//! level, stored the same way the vertex table is — a
//! [`LevelCollection`] of copy-on-write page arrays. Spec §5.

use std::any::Any;
use std::ops::AddAssign;
use std::sync::Arc;

use crate::config::PageManagerConfig;
use crate::level::{LevelCollection, LevelIndex};
use crate::page::PageManager;
use crate::sync::{LockStripe, DEFAULT_STRIPE_COUNT};

/// A single node property (e.g. PageRank score, component id) carried
/// across levels the same way the graph's own vertex table is.
///
/// Property arrays get their own [`PageManager`] rather than sharing the
/// vertex table's: a `PageManager<T>` is keyed on its element type, and a
/// property's `T` is never `BeginRecord`.
pub struct NodeProperty<T> {
    levels: LevelCollection<T>,
    write_lock: LockStripe<DEFAULT_STRIPE_COUNT>,
}

impl<T: Copy + Default + Send + Sync + PartialEq> NodeProperty<T> {
    pub fn new(page_config: PageManagerConfig) -> Self {
        Self {
            levels: LevelCollection::new(page_config),
            write_lock: LockStripe::new(),
        }
    }

    pub fn with_manager(manager: Arc<PageManager<T>>) -> Self {
        Self {
            levels: LevelCollection::with_manager(manager),
            write_lock: LockStripe::new(),
        }
    }

    /// Appends a new level sized for `node_count` nodes, copy-on-write
    /// initialized from the previous level (or densely, for the first).
    pub fn init_level(&mut self, node_count: usize) -> LevelIndex {
        let idx = self.levels.new_level();
        match idx.checked_sub(1) {
            Some(prev) => self.levels.cow_init_level(idx, prev, node_count),
            None => self.levels.level_at_mut(idx).unwrap().dense_init(node_count),
        }
        idx
    }

    pub fn finalize_level(&mut self, level: LevelIndex) {
        self.levels.level_at_mut(level).unwrap().finalize();
    }

    pub fn set(&self, level: LevelIndex, n: usize, value: T) {
        self.levels.level_at(level).expect("set on an absent level").cow_write(n, value);
    }

    pub fn get(&self, level: LevelIndex, n: usize) -> T {
        self.levels.level_at(level).expect("get on an absent level").get(n)
    }

    pub fn latest_level(&self) -> Option<LevelIndex> {
        self.levels.latest_level()
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Indices whose value at `level` may differ from their value at
    /// `prev_level`, without re-reading every value to check. Spec §4.2 /
    /// §8 invariant 4.
    pub fn modified_nodes(&self, prev_level: LevelIndex, level: LevelIndex, node_count: usize) -> Vec<usize> {
        let prev = self.levels.level_at(prev_level).expect("modified_nodes: absent prev_level");
        let cur = self.levels.level_at(level).expect("modified_nodes: absent level");
        cur.modified_node_iter(prev, 0, node_count).collect()
    }
}

/// Object-safe checkpoint-lifecycle hook for a registered node property,
/// independent of its element type. Spec §4.6 step 9: a graph's
/// name-indexed property registry freezes every registered node property
/// onto the checkpoint's node count.
pub trait NodePropertyLifecycle: Send + Sync + Any {
    fn init_level(&mut self, node_count: usize) -> LevelIndex;
    fn finalize_level(&mut self, level: LevelIndex);
    fn latest_level(&self) -> Option<LevelIndex>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Copy + Default + Send + Sync + PartialEq + 'static> NodePropertyLifecycle for NodeProperty<T> {
    fn init_level(&mut self, node_count: usize) -> LevelIndex {
        NodeProperty::init_level(self, node_count)
    }

    fn finalize_level(&mut self, level: LevelIndex) {
        NodeProperty::finalize_level(self, level)
    }

    fn latest_level(&self) -> Option<LevelIndex> {
        NodeProperty::latest_level(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<T: Copy + Default + Send + Sync + PartialEq + AddAssign> NodeProperty<T> {
    /// Atomically reads, adds, and writes back `n`'s value at `level`,
    /// serialized through a small stripe of locks keyed on `n` (spec §5:
    /// "a small stripe of spin locks, chosen by hashing the node or edge
    /// ID, serializes read-modify-write to single entries").
    pub fn add_atomic(&self, level: LevelIndex, n: i64, delta: T) {
        let _guard = self.write_lock.lock_for(n);
        let vpa = self.levels.level_at(level).expect("add_atomic on an absent level");
        let mut value = vpa.get(n as usize);
        value += delta;
        vpa.cow_write(n as usize, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageManagerConfig;

    #[test]
    fn set_then_get_roundtrips() {
        let mut prop: NodeProperty<i64> = NodeProperty::new(PageManagerConfig::new(4, true));
        let l0 = prop.init_level(4);
        prop.set(l0, 2, 77);
        prop.finalize_level(l0);
        assert_eq!(prop.get(l0, 2), 77);
        assert_eq!(prop.get(l0, 0), 0);
    }

    #[test]
    fn cow_level_inherits_unwritten_values() {
        let mut prop: NodeProperty<i64> = NodeProperty::new(PageManagerConfig::new(4, true));
        let l0 = prop.init_level(4);
        prop.set(l0, 1, 5);
        prop.finalize_level(l0);

        let l1 = prop.init_level(4);
        prop.set(l1, 2, 9);
        prop.finalize_level(l1);

        assert_eq!(prop.get(l1, 1), 5, "untouched node must inherit the previous level's value");
        assert_eq!(prop.get(l1, 2), 9);
        assert_eq!(prop.get(l0, 2), 0, "earlier level must be unaffected");
    }

    #[test]
    fn add_atomic_accumulates() {
        let mut prop: NodeProperty<i64> = NodeProperty::new(PageManagerConfig::new(4, true));
        let l0 = prop.init_level(4);
        prop.add_atomic(l0, 0, 3);
        prop.add_atomic(l0, 0, 4);
        prop.finalize_level(l0);
        assert_eq!(prop.get(l0, 0), 7);
    }
}
