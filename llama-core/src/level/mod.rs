//! The ordered sequence of [`VersionedPageArray`] instances for one
//! logical column (a vertex table, or one property), per spec §4.3.

use std::sync::Arc;

use crate::config::PageManagerConfig;
use crate::page::PageManager;
use crate::vpa::VersionedPageArray;

/// Index of a level within a [`LevelCollection`]. Levels are assigned
/// strictly increasing indices; level-ID wrap (spec §9) is a separate,
/// mutually-exclusive build mode and is not implemented by this
/// collection type.
pub type LevelIndex = usize;

/// An ordered, append-only (with holes) sequence of per-level page
/// arrays sharing one [`PageManager`].
pub struct LevelCollection<T> {
    manager: Arc<PageManager<T>>,
    /// `None` at index `i` means level `i` was deleted; queries that need
    /// a previous level must skip holes (see [`Self::prev_level_nofail`]).
    levels: Vec<Option<VersionedPageArray<T>>>,
}

impl<T: Copy + Default + Send + Sync + PartialEq> LevelCollection<T> {
    pub fn new(config: PageManagerConfig) -> Self {
        Self {
            manager: Arc::new(PageManager::new(config)),
            levels: Vec::new(),
        }
    }

    pub fn with_manager(manager: Arc<PageManager<T>>) -> Self {
        Self {
            manager,
            levels: Vec::new(),
        }
    }

    pub fn manager(&self) -> &Arc<PageManager<T>> {
        &self.manager
    }

    /// Appends a new, `Uninit` level and returns its index. The caller is
    /// responsible for calling `dense_init`/`cow_init` and `finalize` on
    /// it before treating it as readable.
    pub fn new_level(&mut self) -> LevelIndex {
        let idx = self.levels.len();
        self.levels.push(Some(VersionedPageArray::new(self.manager.clone())));
        idx
    }

    /// Runs `cow_init(len)` on level `new_idx` against level `prev_idx`,
    /// without requiring the caller to fight the borrow checker over two
    /// indices of the same `Vec`.
    pub fn cow_init_level(&mut self, new_idx: LevelIndex, prev_idx: LevelIndex, len: usize) {
        debug_assert!(prev_idx < new_idx, "a level can only cow_init from an earlier one");
        let (left, right) = self.levels.split_at_mut(new_idx);
        let prev = left[prev_idx]
            .as_ref()
            .expect("cow_init against a deleted level");
        let new = right[0].as_mut().expect("cow_init_level on a deleted level");
        new.cow_init(prev, len);
    }

    pub fn level_at(&self, i: LevelIndex) -> Option<&VersionedPageArray<T>> {
        self.levels.get(i).and_then(|l| l.as_ref())
    }

    pub fn level_at_mut(&mut self, i: LevelIndex) -> Option<&mut VersionedPageArray<T>> {
        self.levels.get_mut(i).and_then(|l| l.as_mut())
    }

    /// The level immediately below `i`, or `None` if `i == 0`. Does not
    /// skip holes; use [`Self::prev_level_nofail`] when a deleted level
    /// must not cause the search to stop short.
    pub fn previous_level(&self, i: LevelIndex) -> Option<&VersionedPageArray<T>> {
        if i == 0 {
            None
        } else {
            self.level_at(i - 1)
        }
    }

    /// The nearest non-deleted level strictly below `i`, skipping holes
    /// left by [`Self::delete_level`]. Spec §4.3: "queries that require a
    /// previous level must skip holes."
    pub fn prev_level_nofail(&self, i: LevelIndex) -> Option<(LevelIndex, &VersionedPageArray<T>)> {
        let mut cur = i;
        while cur > 0 {
            cur -= 1;
            if let Some(level) = self.level_at(cur) {
                return Some((cur, level));
            }
        }
        None
    }

    pub fn latest_level(&self) -> Option<LevelIndex> {
        self.levels
            .iter()
            .enumerate()
            .rev()
            .find(|(_, l)| l.is_some())
            .map(|(i, _)| i)
    }

    pub fn latest_level_ref(&self) -> Option<&VersionedPageArray<T>> {
        self.latest_level().and_then(|i| self.level_at(i))
    }

    /// Leaves a hole at `i`; the array's own `Drop` releases its pages
    /// back to the page manager.
    pub fn delete_level(&mut self, i: LevelIndex) {
        self.levels[i] = None;
    }

    /// Drops every level older than the `k` most recent non-deleted
    /// levels.
    pub fn keep_only_recent(&mut self, k: usize) {
        let live: Vec<LevelIndex> = self
            .levels
            .iter()
            .enumerate()
            .filter(|(_, l)| l.is_some())
            .map(|(i, _)| i)
            .collect();
        if live.len() <= k {
            return;
        }
        for &i in &live[..live.len() - k] {
            self.delete_level(i);
        }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageManagerConfig;

    #[test]
    fn append_and_query_levels() {
        let mut levels: LevelCollection<i64> = LevelCollection::new(PageManagerConfig::new(4, true));
        let l0 = levels.new_level();
        levels.level_at_mut(l0).unwrap().dense_init(4);
        levels.level_at_mut(l0).unwrap().finalize();
        assert_eq!(levels.latest_level(), Some(0));

        let l1 = levels.new_level();
        levels.cow_init_level(l1, l0, 4);
        levels.level_at_mut(l1).unwrap().finalize();
        assert_eq!(levels.latest_level(), Some(1));
    }

    #[test]
    fn delete_level_leaves_a_hole_that_nofail_skips() {
        let mut levels: LevelCollection<i64> = LevelCollection::new(PageManagerConfig::new(4, true));
        for _ in 0..3 {
            let idx = levels.new_level();
            levels.level_at_mut(idx).unwrap().dense_init(4);
            levels.level_at_mut(idx).unwrap().finalize();
        }
        levels.delete_level(1);
        assert!(levels.level_at(1).is_none());
        let (idx, _) = levels.prev_level_nofail(2).unwrap();
        assert_eq!(idx, 0);
    }

    #[test]
    fn keep_only_recent_drops_older_levels() {
        let mut levels: LevelCollection<i64> = LevelCollection::new(PageManagerConfig::new(4, true));
        for _ in 0..5 {
            let idx = levels.new_level();
            levels.level_at_mut(idx).unwrap().dense_init(4);
            levels.level_at_mut(idx).unwrap().finalize();
        }
        levels.keep_only_recent(2);
        assert!(levels.level_at(0).is_none());
        assert!(levels.level_at(2).is_none());
        assert!(levels.level_at(3).is_some());
        assert!(levels.level_at(4).is_some());
    }
}
