//! The versioned page array (VPA): a logical array of `T` with
//! page-granularity copy-on-write history, per spec §4.2.
//!
//! One [`VersionedPageArray`] is one level's worth of a logical column —
//! the vertex table of one graph level, or one property's values at one
//! level. A [`crate::level::LevelCollection`] strings many of these
//! together and hands each a fresh instance that shares its
//! [`crate::page::PageManager`] with all the others in the same column.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::page::{PageId, PageManager, NIL_PAGE};
use crate::sync::Mutex;

/// Lifecycle state of one VPA level instance, per spec §4.2:
/// `Uninit -> Initializing(Dense|Cow) -> Finalized`. `Dropped` is modeled
/// by the value's own `Drop` impl rather than a fourth state, since once
/// dropped there is no instance left to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Uninit,
    InitializingDense,
    InitializingCow,
    Finalized,
}

/// One level's page-array instance.
pub struct VersionedPageArray<T> {
    manager: Arc<PageManager<T>>,
    page_size: usize,
    len: usize,
    /// One entry per logical page; holds the id of the page currently
    /// backing it (this level's own page, or one shared with an earlier
    /// level).
    indirection: Vec<AtomicU32>,
    /// Parallel to `indirection`: whether *this* level already owns an
    /// exclusive (ref-count-1-to-us) copy of that page, i.e. whether a
    /// future write to it can skip the copy-on-write allocation.
    owned: Vec<AtomicBool>,
    modified_pages: AtomicUsize,
    cow_lock: Mutex<()>,
    state: State,
}

impl<T: Copy + Default + Send + Sync + PartialEq> VersionedPageArray<T> {
    /// Creates an empty, `Uninit` array backed by `manager`.
    pub fn new(manager: Arc<PageManager<T>>) -> Self {
        Self {
            manager,
            page_size: 0,
            len: 0,
            indirection: Vec::new(),
            owned: Vec::new(),
            modified_pages: AtomicUsize::new(0),
            cow_lock: Mutex::new(()),
            state: State::Uninit,
        }
    }

    fn page_count_for(&self, len: usize) -> usize {
        let page_size = self.manager.config().page_size;
        (len + page_size - 1) / page_size.max(1)
    }

    /// Allocates fresh, ref-count-1 pages for every logical page of a
    /// length-`len` array. Legal only for level 0, or when the caller
    /// guarantees a full rewrite (spec §4.2).
    pub fn dense_init(&mut self, len: usize) {
        debug_assert_eq!(self.state, State::Uninit, "dense_init on a non-Uninit level");
        self.page_size = self.manager.config().page_size;
        self.len = len;
        let npages = self.page_count_for(len);
        let mut ids = vec![NIL_PAGE; npages];
        self.manager.allocate(&mut ids);
        self.indirection = ids.into_iter().map(AtomicU32::new).collect();
        self.owned = (0..npages).map(|_| AtomicBool::new(true)).collect();
        self.state = State::InitializingDense;
    }

    /// Points every page slot at the corresponding page of `prev`,
    /// acquiring a reference to each; extends with zero-page references
    /// for any indices beyond `prev`'s size. Spec §4.2.
    pub fn cow_init(&mut self, prev: &VersionedPageArray<T>, len: usize) {
        debug_assert_eq!(self.state, State::Uninit, "cow_init on a non-Uninit level");
        self.page_size = self.manager.config().page_size;
        self.len = len;
        let npages = self.page_count_for(len);
        let zero = self.manager.zero_page();
        let mut ids = Vec::with_capacity(npages);
        for p in 0..npages {
            let id = prev
                .indirection
                .get(p)
                .map(|a| a.load(Ordering::Acquire))
                .unwrap_or(zero);
            ids.push(id);
        }
        self.manager.acquire(&ids);
        self.indirection = ids.into_iter().map(AtomicU32::new).collect();
        self.owned = (0..npages).map(|_| AtomicBool::new(false)).collect();
        self.state = State::InitializingCow;
    }

    /// Stores `value` at `i`. Legal on any index after `dense_init`; the
    /// page is already exclusively owned, so this is a plain store.
    pub fn dense_write(&self, i: usize, value: T) {
        debug_assert_eq!(
            self.state,
            State::InitializingDense,
            "dense_write outside dense initialization"
        );
        let p = i / self.page_size;
        let id = self.indirection[p].load(Ordering::Acquire);
        self.manager.write(id, i % self.page_size, value);
    }

    /// Copy-on-write store at `i`. If this level already owns the page
    /// containing `i`, stores in place (lock-free). Otherwise serializes
    /// on the array's cow lock, re-checks, and — if still unowned —
    /// allocates a fresh page via the page manager, copying the old
    /// contents, before storing. Spec §4.2.
    pub fn cow_write(&self, i: usize, value: T) {
        debug_assert!(
            self.state == State::InitializingCow || self.state == State::InitializingDense,
            "cow_write after finalize"
        );
        let p = i / self.page_size;
        let offset = i % self.page_size;

        if self.owned[p].load(Ordering::Acquire) {
            let id = self.indirection[p].load(Ordering::Acquire);
            self.manager.write(id, offset, value);
            return;
        }

        let guard = self.cow_lock.lock();
        if self.owned[p].load(Ordering::Acquire) {
            drop(guard);
            let id = self.indirection[p].load(Ordering::Acquire);
            self.manager.write(id, offset, value);
            return;
        }
        let old_id = self.indirection[p].load(Ordering::Acquire);
        let new_id = self.manager.cow(old_id);
        self.indirection[p].store(new_id, Ordering::Release);
        self.owned[p].store(true, Ordering::Release);
        self.modified_pages.fetch_add(1, Ordering::Relaxed);
        drop(guard);
        self.manager.write(new_id, offset, value);
    }

    /// Reads index `i` without synchronization. Safe because writes
    /// either all happen-before `finalize` (with no concurrent readers
    /// during construction) or not at all afterwards. Spec §4.2.
    pub fn get(&self, i: usize) -> T {
        debug_assert!(i < self.len, "index {i} out of bounds (len {})", self.len);
        let p = i / self.page_size;
        let id = self.indirection[p].load(Ordering::Acquire);
        self.manager.read(id)[i % self.page_size]
    }

    /// Like [`Self::get`], but returns `T::default()` for indices at or
    /// beyond `len` instead of panicking — used to compare a shorter
    /// previous level against a longer current one in
    /// [`Self::modified_node_iter`].
    pub(crate) fn get_or_default(&self, i: usize) -> T {
        if i < self.len {
            self.get(i)
        } else {
            T::default()
        }
    }

    pub(crate) fn page_id_at(&self, p: usize) -> PageId {
        self.indirection
            .get(p)
            .map(|a| a.load(Ordering::Acquire))
            .unwrap_or_else(|| self.manager.zero_page())
    }

    /// Marks the level immutable. No further writes are permitted.
    pub fn finalize(&mut self) {
        debug_assert_ne!(self.state, State::Finalized, "double finalize");
        self.state = State::Finalized;
    }

    pub fn is_finalized(&self) -> bool {
        self.state == State::Finalized
    }

    /// Overwrites an already-finalized element in place.
    ///
    /// The only sanctioned caller is edge soft-deletion (spec §4.4): a
    /// deletion flips a tombstone field on an edge that may live in a
    /// level finalized long ago, rather than going through the normal
    /// copy-on-write path. Every other mutation belongs in
    /// `dense_write`/`cow_write`.
    pub fn patch_finalized(&self, i: usize, value: T) {
        debug_assert!(self.is_finalized(), "patch_finalized is for post-finalize tombstones only");
        debug_assert!(i < self.len, "index {i} out of bounds (len {})", self.len);
        let p = i / self.page_size;
        let id = self.indirection[p].load(Ordering::Acquire);
        self.manager.write(id, i % self.page_size, value);
    }

    /// Narrows the logical length. Legal only before `finalize`.
    pub fn shrink(&mut self, new_size: usize) {
        debug_assert!(!self.is_finalized(), "shrink after finalize");
        debug_assert!(new_size <= self.len, "shrink must not grow the array");
        self.len = new_size;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn modified_page_count(&self) -> usize {
        self.modified_pages.load(Ordering::Relaxed)
    }

    /// True iff, page for page, this level is identical (by page id) to
    /// `prev` over `prev`'s length. Used by checkpointing an empty delta
    /// to assert no edge-table allocation was required (spec §8).
    pub fn shares_all_pages_with(&self, prev: &VersionedPageArray<T>) -> bool {
        let npages = self.page_count_for(prev.len);
        (0..npages).all(|p| self.page_id_at(p) == prev.page_id_at(p))
    }

    /// Yields every index in `[start, end)` whose value may differ from
    /// the same index in `prev`: for each logical page, pages with
    /// identical ids are skipped outright; differing pages are compared
    /// element by element. Spec §4.2 / §8 invariant 4.
    pub fn modified_node_iter<'a>(
        &'a self,
        prev: &'a VersionedPageArray<T>,
        start: usize,
        end: usize,
    ) -> ModifiedNodeIter<'a, T> {
        ModifiedNodeIter {
            cur: self,
            prev,
            next_index: start,
            end: end.min(self.len),
        }
    }
}

impl<T> Drop for VersionedPageArray<T> {
    fn drop(&mut self) {
        let ids: Vec<PageId> = self
            .indirection
            .iter()
            .map(|a| a.load(Ordering::Relaxed))
            .collect();
        self.manager.release(&ids);
    }
}

/// A lazy, non-restartable scan over the indices that may have changed
/// between two adjacent levels of the same column.
pub struct ModifiedNodeIter<'a, T> {
    cur: &'a VersionedPageArray<T>,
    prev: &'a VersionedPageArray<T>,
    next_index: usize,
    end: usize,
}

impl<'a, T: Copy + Default + Send + Sync + PartialEq> Iterator for ModifiedNodeIter<'a, T> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.next_index < self.end {
            let i = self.next_index;
            let p = i / self.cur.page_size;
            let cur_id = self.cur.page_id_at(p);
            let prev_id = self.prev.page_id_at(p);
            if cur_id == prev_id {
                let page_end = (p + 1) * self.cur.page_size;
                self.next_index = page_end.min(self.end);
                continue;
            }
            self.next_index = i + 1;
            if self.cur.get_or_default(i) != self.prev.get_or_default(i) {
                return Some(i);
            }
        }
        None
    }
}
