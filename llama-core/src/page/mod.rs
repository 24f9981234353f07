//! The page manager: fixed-size, reference-counted pages of `T`, with a
//! designated, universally-shared "zero page."
//!
//! Mirrors the contract of spec §4.1. Every [`crate::vpa::VersionedPageArray`]
//! owns one `PageManager<T>`; pages allocated from it are shared across
//! levels of that one array by reference count, never across arrays of a
//! different `T` (the spec's "shares the Page Manager" language for
//! property arrays means they use the same kind of manager, not a single
//! type-erased instance — see DESIGN.md).

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

use id_alloc::IdAlloc;

use crate::config::PageManagerConfig;
use crate::sync::Mutex;

/// A handle to one page, opaque outside this module. `NIL` denotes "no
/// page" (used for indirection-table slots beyond a level's original
/// size before they're ever written).
pub type PageId = u32;

/// Sentinel for "no page."
pub const NIL_PAGE: PageId = u32::MAX;

struct PageSlot<T> {
    refcount: AtomicU32,
    // SAFETY invariant upheld by every caller in this crate: a slot's data
    // is mutated only by the single VPA level that currently owns it
    // (refcount == 1 and the level has not yet finalized), and is read
    // without synchronization only after that level (or an ancestor
    // sharing the page) has finalized. `cow` and `dense` writes never race
    // with reads of the *same* page under this discipline.
    data: UnsafeCell<Box<[T]>>,
}

// SAFETY: `PageSlot<T>` is shared across threads only through
// `PageManager`, which serializes mutation of the slot table itself with
// `Mutex`, and whose callers uphold the ownership discipline documented on
// the `data` field above.
unsafe impl<T: Send> Sync for PageSlot<T> {}

struct Inner<T> {
    slots: Vec<Option<Box<PageSlot<T>>>>,
    free_list: Vec<PageId>,
    ids: IdAlloc,
}

/// Reference-counted page allocator for a single `T`.
pub struct PageManager<T> {
    config: PageManagerConfig,
    inner: Mutex<Inner<T>>,
    zero_page: PageId,
}

impl<T: Clone + Default> PageManager<T> {
    pub fn new(config: PageManagerConfig) -> Self {
        let ids = IdAlloc::with_capacity(0);
        let mut inner = Inner {
            slots: Vec::new(),
            free_list: Vec::new(),
            ids,
        };
        let zero_page = Self::alloc_slot(&mut inner, config.page_size, true);
        // The zero page is referenced by every uninitialized indirection
        // slot in every array; pin its refcount so `release` never frees
        // it.
        inner.slots[zero_page as usize]
            .as_ref()
            .unwrap()
            .refcount
            .store(u32::MAX / 2, Ordering::Relaxed);
        Self {
            config,
            inner: Mutex::new(inner),
            zero_page,
        }
    }

    fn alloc_slot(inner: &mut Inner<T>, page_size: usize, _zero_init: bool) -> PageId {
        // Every slot must hold a valid `T`; `Default` is the only safe way
        // to populate one without reading uninitialized memory, so
        // `zero_init` only documents a promise about what `T::default()`
        // means for the types this manager is instantiated with (e.g. a
        // begin record's `Default` is the all-NIL record).
        let data: Box<[T]> = (0..page_size).map(|_| T::default()).collect();
        let slot = Box::new(PageSlot {
            refcount: AtomicU32::new(1),
            data: UnsafeCell::new(data),
        });
        if let Some(id) = inner.free_list.pop() {
            inner.slots[id as usize] = Some(slot);
            return id;
        }
        let id = inner.ids.alloc().unwrap_or_else(|| {
            let new_cap = inner.ids.capacity() + 1;
            inner.ids.grow_capacity_to(new_cap);
            inner.ids.alloc().expect("grew id-alloc capacity by one")
        }) as PageId;
        if id as usize >= inner.slots.len() {
            inner.slots.resize_with(id as usize + 1, || None);
        }
        inner.slots[id as usize] = Some(slot);
        id
    }

    /// Fills `out` with freshly allocated, ref-count-1 pages.
    pub fn allocate(&self, out: &mut [PageId]) {
        let mut inner = self.inner.lock();
        let page_size = self.config.page_size;
        let zero_init = self.config.zero_init;
        for slot in out.iter_mut() {
            *slot = Self::alloc_slot(&mut inner, page_size, zero_init);
        }
    }

    /// Increments the ref-count of each (already-allocated) page in `ids`.
    /// Used when a new level shares pages with its predecessor via
    /// `cow_init`.
    pub fn acquire(&self, ids: &[PageId]) {
        let inner = self.inner.lock();
        for &id in ids {
            if id == NIL_PAGE {
                continue;
            }
            inner.slots[id as usize]
                .as_ref()
                .expect("acquire of a freed page")
                .refcount
                .fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Allocates a new page, copies `old_id`'s contents into it, decrements
    /// `old_id`'s ref-count, and returns the new page's id (ref-count 1).
    pub fn cow(&self, old_id: PageId) -> PageId {
        let mut inner = self.inner.lock();
        let copied: Box<[T]> = {
            let old_slot = inner.slots[old_id as usize]
                .as_ref()
                .expect("cow of a freed page");
            // SAFETY: we hold the manager's lock, and no other mutator can
            // be writing into `old_id` concurrently under the single-owner
            // discipline documented on `PageSlot::data`.
            let old_data = unsafe { &*old_slot.data.get() };
            old_data.clone()
        };
        let new_id = {
            let slot = Box::new(PageSlot {
                refcount: AtomicU32::new(1),
                data: UnsafeCell::new(copied),
            });
            if let Some(id) = inner.free_list.pop() {
                inner.slots[id as usize] = Some(slot);
                id
            } else {
                let id = inner.ids.alloc().unwrap_or_else(|| {
                    let new_cap = inner.ids.capacity() + 1;
                    inner.ids.grow_capacity_to(new_cap);
                    inner.ids.alloc().expect("grew id-alloc capacity by one")
                }) as PageId;
                if id as usize >= inner.slots.len() {
                    inner.slots.resize_with(id as usize + 1, || None);
                }
                inner.slots[id as usize] = Some(slot);
                id
            }
        };
        self.release_locked(&mut inner, &[old_id]);
        log::trace!("page cow: {old_id} -> {new_id}");
        new_id
    }

    /// Writes `value` at `index` within page `id`. The caller must hold
    /// sole ownership of the page (ref-count 1, owned by the writing
    /// level) — this is `cow_write`'s fast path and `dense_init`'s
    /// initial fill, never called concurrently with a read of the same
    /// page.
    pub fn write(&self, id: PageId, index: usize, value: T) {
        let inner = self.inner.lock();
        let slot = inner.slots[id as usize]
            .as_ref()
            .expect("write to a freed page");
        // SAFETY: see `PageSlot::data`'s ownership discipline.
        let data = unsafe { &mut *slot.data.get() };
        data[index] = value;
    }
}

impl<T> PageManager<T> {
    pub fn config(&self) -> PageManagerConfig {
        self.config
    }

    /// The shared, all-default-value page used as the universal source for
    /// never-written regions.
    pub fn zero_page(&self) -> PageId {
        self.zero_page
    }

    /// Decrements the ref-count of each page in `ids`; pages that reach
    /// zero are returned to the free list.
    pub fn release(&self, ids: &[PageId]) {
        let mut inner = self.inner.lock();
        self.release_locked(&mut inner, ids);
    }

    fn release_locked(&self, inner: &mut Inner<T>, ids: &[PageId]) {
        for &id in ids {
            if id == NIL_PAGE || id == self.zero_page {
                continue;
            }
            let Some(slot) = inner.slots[id as usize].as_ref() else {
                // Double-release is a programmer error.
                panic!("release of an already-freed page {id}");
            };
            let prev = slot.refcount.fetch_sub(1, Ordering::AcqRel);
            debug_assert!(prev > 0, "refcount underflow on page {id}");
            if prev == 1 {
                inner.slots[id as usize] = None;
                inner.free_list.push(id);
                inner.ids.free(id as usize);
                log::trace!("page {id} freed, returned to free list");
            }
        }
    }

    pub fn refcount(&self, id: PageId) -> u32 {
        let inner = self.inner.lock();
        inner.slots[id as usize]
            .as_ref()
            .expect("refcount of a freed page")
            .refcount
            .load(Ordering::Acquire)
    }

    /// Reads the contents of page `id`. Safe to call without external
    /// synchronization once the page's owning level is finalized, per
    /// spec §4.2.
    pub fn read(&self, id: PageId) -> PageRef<'_, T> {
        let inner = self.inner.lock();
        let slot_ptr: *const PageSlot<T> = &**inner.slots[id as usize]
            .as_ref()
            .expect("read of a freed page");
        // SAFETY: the slot is kept alive by its own refcount, which the
        // caller holds (directly or via its VPA level); the manager's Vec
        // may reallocate but the `Box<PageSlot<T>>` it points into does
        // not move.
        let slot = unsafe { &*slot_ptr };
        PageRef { slot }
    }
}

/// A read handle into one page's contents.
pub struct PageRef<'a, T> {
    slot: &'a PageSlot<T>,
}

impl<'a, T> std::ops::Deref for PageRef<'a, T> {
    type Target = [T];
    fn deref(&self) -> &[T] {
        // SAFETY: see `PageSlot::data`'s ownership discipline; reads here
        // only occur once the owning level has finalized, or on a page
        // this thread itself still exclusively owns.
        unsafe { &*self.slot.data.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mgr() -> PageManager<i64> {
        PageManager::new(PageManagerConfig::new(4, true))
    }

    #[test]
    fn zero_page_reads_as_default() {
        let m = mgr();
        let z = m.zero_page();
        assert_eq!(&*m.read(z), &[0, 0, 0, 0]);
    }

    #[test]
    fn allocate_gives_refcount_one_pages() {
        let m = mgr();
        let mut out = [NIL_PAGE; 2];
        m.allocate(&mut out);
        assert_ne!(out[0], out[1]);
        assert_eq!(m.refcount(out[0]), 1);
        assert_eq!(m.refcount(out[1]), 1);
    }

    #[test]
    fn acquire_increments_refcount() {
        let m = mgr();
        let mut out = [NIL_PAGE; 1];
        m.allocate(&mut out);
        m.acquire(&out);
        assert_eq!(m.refcount(out[0]), 2);
    }

    #[test]
    fn cow_copies_and_detaches() {
        let m = mgr();
        let mut out = [NIL_PAGE; 1];
        m.allocate(&mut out);
        let old = out[0];
        m.write(old, 0, 7);
        m.acquire(&[old]); // simulate a second level sharing it
        let new = m.cow(old);
        assert_ne!(new, old);
        assert_eq!(m.refcount(old), 1);
        assert_eq!(m.refcount(new), 1);
        assert_eq!(&*m.read(new), &[7, 0, 0, 0]);
        m.write(new, 0, 9);
        assert_eq!((&*m.read(old))[0], 7);
        assert_eq!((&*m.read(new))[0], 9);
    }

    #[test]
    fn release_to_zero_frees_and_recycles_id() {
        let m = mgr();
        let mut out = [NIL_PAGE; 1];
        m.allocate(&mut out);
        let id = out[0];
        m.release(&out);
        let mut out2 = [NIL_PAGE; 1];
        m.allocate(&mut out2);
        assert_eq!(out2[0], id, "freed page id should be recycled");
    }

    #[test]
    #[should_panic(expected = "already-freed")]
    fn double_release_panics() {
        let m = mgr();
        let mut out = [NIL_PAGE; 1];
        m.allocate(&mut out);
        m.release(&out);
        m.release(&out);
    }
}
