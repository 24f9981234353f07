//! The multi-level compressed sparse row core: one direction's worth of
//! adjacency (out-edges, or in-edges when reverse edges are materialized),
//! built level by level and queried by descending through levels.
//! Spec §4.4.
//!
//! Construction, per level, goes through a fixed sequence:
//! [`Mlcsr::init_level_from_degrees`] (allocates the level given a degree
//! delta for every node), repeated [`Mlcsr::write_value`] /
//! [`Mlcsr::write_values`] calls (fills in the new edges one node's run at
//! a time), then [`Mlcsr::finish_level_edges`] and
//! [`Mlcsr::finish_level_vertices`] (finalize both page arrays). Once
//! finalized, a level is read-only and is queried by
//! [`Mlcsr::iter_begin`]/[`Mlcsr::iter_begin_within_level`],
//! [`Mlcsr::degree`], and [`Mlcsr::find`].

pub mod edge_id;
pub mod node_id;
pub mod records;

use crate::config::{CsrFeatures, PageManagerConfig};
use crate::level::{LevelCollection, LevelIndex};
use crate::sync::{LockStripe, DEFAULT_STRIPE_COUNT};

pub use edge_id::EdgeId;
pub use node_id::{NodeId, NIL_NODE};
pub use records::{BeginRecord, EdgeEntry, EdgeSlot};

struct Reservation {
    start: u32,
    capacity: u32,
}

struct BuildState {
    level: LevelIndex,
    node_count: usize,
    cursor: u32,
    reservations: Vec<Option<Reservation>>,
}

/// One direction's multi-level CSR: a vertex table of [`BeginRecord`]s and
/// an independent edge table of [`EdgeSlot`]s, one `LevelCollection` each.
pub struct Mlcsr {
    features: CsrFeatures,
    vertex: LevelCollection<BeginRecord>,
    edges: LevelCollection<EdgeSlot>,
    /// Levels below this index are treated as absent by queries that carry
    /// a bounded view (spec §4.4's "descent... drops below the minimum
    /// live level"); raised by checkpoint-time level eviction.
    min_live_level: LevelIndex,
    build: Option<BuildState>,
    /// Serializes the read-modify-write of a single edge's
    /// `max_visible_level` in [`Self::delete_edge`]. Spec §5: "a per-edge
    /// stripe lock."
    delete_lock: LockStripe<DEFAULT_STRIPE_COUNT>,
}

impl Mlcsr {
    pub fn new(features: CsrFeatures, page_config: PageManagerConfig) -> Self {
        Self {
            features,
            vertex: LevelCollection::new(page_config),
            edges: LevelCollection::new(page_config),
            min_live_level: 0,
            build: None,
            delete_lock: LockStripe::new(),
        }
    }

    pub fn features(&self) -> CsrFeatures {
        self.features
    }

    pub fn level_count(&self) -> usize {
        self.vertex.len()
    }

    pub fn min_live_level(&self) -> LevelIndex {
        self.min_live_level
    }

    /// Raises the floor below which levels are no longer considered part
    /// of the live history (used by checkpoint-time level eviction; spec
    /// §5's `keep_only_recent`).
    pub fn raise_min_live_level(&mut self, floor: LevelIndex) {
        debug_assert!(floor >= self.min_live_level, "min_live_level must not decrease");
        self.min_live_level = floor;
    }

    // ---- construction -----------------------------------------------

    /// Begins a new level for `node_count` nodes given, per node, how many
    /// edges are newly added and how many are removed relative to the
    /// previous level. Allocates the vertex table (sized `node_count + 1`
    /// to hold the linear-scan sentinel) and the edge table (sized to fit
    /// every new edge plus one continuation slot per node that needs one),
    /// and writes every begin record that cannot simply be inherited via
    /// page sharing. Spec §4.4 steps 1-2.
    pub fn init_level_from_degrees(
        &mut self,
        node_count: usize,
        new_edges: &[u32],
        deleted_edges: &[u32],
    ) -> LevelIndex {
        debug_assert!(self.build.is_none(), "a level is already under construction");
        assert_eq!(new_edges.len(), node_count);
        assert_eq!(deleted_edges.len(), node_count);

        let level = self.vertex.new_level();
        let edge_level = self.edges.new_level();
        debug_assert_eq!(level, edge_level, "vertex and edge level collections drifted apart");

        let prev_level = level.checked_sub(1);
        match prev_level {
            Some(p) => self.vertex.cow_init_level(level, p, node_count + 1),
            None => self.vertex.level_at_mut(level).unwrap().dense_init(node_count + 1),
        }

        let wants_continuation =
            |n: usize| self.features.continuations && level > 0 && new_edges[n] > 0;
        let capacity: u32 = new_edges.iter().map(|&e| e).sum::<u32>()
            + (0..node_count).filter(|&n| wants_continuation(n)).count() as u32;
        self.edges.level_at_mut(level).unwrap().dense_init(capacity as usize);

        self.build = Some(BuildState {
            level,
            node_count,
            cursor: 0,
            reservations: (0..node_count).map(|_| None).collect(),
        });

        for n in 0..node_count {
            self.init_node(n as NodeId, new_edges[n], deleted_edges[n]);
        }

        level
    }

    fn init_node(&mut self, n: NodeId, new: u32, deleted: u32) {
        let build = self.build.as_ref().expect("init_node outside construction");
        let level = build.level;

        let prev = if level > 0 {
            self.vertex
                .level_at(level - 1)
                .filter(|v| (n as usize) < v.len())
                .map(|v| v.get(n as usize))
        } else {
            None
        };

        if new == 0 && deleted == 0 {
            // Nothing changes for this node at this level; the COW-shared
            // page it already sits on (from `cow_init_level`, or the
            // zero-initialized default for a brand-new node) already
            // holds the right record.
            return;
        }

        let prev_degree = prev.map(|b| b.degree).unwrap_or(0);
        let prev_adj_start = prev.map(|b| b.adj_list_start).unwrap_or(EdgeId::NIL);

        let (adj_start, level_length) = if new > 0 {
            let start = self.reserve_edges(n, new);
            (EdgeId::encode(level as u32, start), new)
        } else {
            (prev_adj_start, 0)
        };

        let degree = if self.features.precomputed_degree {
            prev_degree + new as i64 - deleted as i64
        } else {
            0
        };
        debug_assert!(degree >= 0, "deleted more edges than the node ever had");

        let adj_start = if self.features.precomputed_degree && degree == 0 {
            EdgeId::NIL
        } else {
            adj_start
        };

        self.vertex
            .level_at(level)
            .unwrap()
            .cow_write(n as usize, BeginRecord { adj_list_start: adj_start, level_length, degree });

        if self.features.continuations && level > 0 && new > 0 {
            let cont_index = self.reserve_continuation(n);
            let snapshot = prev.unwrap_or_default();
            self.edges
                .level_at(level)
                .unwrap()
                .dense_write(cont_index as usize, EdgeSlot::Continuation(snapshot));
        }
    }

    fn reserve_edges(&mut self, n: NodeId, count: u32) -> u32 {
        let build = self.build.as_mut().expect("reserve outside construction");
        let start = build.cursor;
        build.cursor += count;
        build.reservations[n as usize] = Some(Reservation { start, capacity: count });
        start
    }

    fn reserve_continuation(&mut self, _n: NodeId) -> u32 {
        let build = self.build.as_mut().expect("reserve outside construction");
        let idx = build.cursor;
        build.cursor += 1;
        idx
    }

    /// Writes the `i`-th (`0`-based) new edge of node `n` at the current
    /// level. `i` must fall within the reservation `n` was given by
    /// [`Self::init_level_from_degrees`]. Spec §4.4 step 3.
    pub fn write_value(&mut self, n: NodeId, i: u32, neighbor: NodeId) {
        let level = self.build.as_ref().expect("write_value outside construction").level;
        let reservation = self.build.as_ref().unwrap().reservations[n as usize]
            .as_ref()
            .expect("write_value on a node with no reservation this level");
        debug_assert!(i < reservation.capacity, "write_value index beyond the node's reservation");
        let index = reservation.start + i;
        self.edges
            .level_at(level)
            .unwrap()
            .dense_write(index as usize, EdgeSlot::Edge(EdgeEntry::new(neighbor)));
    }

    /// Bulk form of [`Self::write_value`] for a node's whole new-edge run.
    pub fn write_values(&mut self, n: NodeId, neighbors: &[NodeId]) {
        for (i, &neighbor) in neighbors.iter().enumerate() {
            self.write_value(n, i as u32, neighbor);
        }
    }

    /// Neutralizes the continuation record [`Self::init_node`] wrote for
    /// `n` at the level currently under construction, if any, so the
    /// descent iterator treats `n`'s freshly written run as
    /// self-contained instead of also revisiting whatever it replaces.
    /// Used by `LoaderConfig::copy_adj_list_on_deletion`, which
    /// materializes a node's entire live adjacency into one run per
    /// checkpoint and must stop the iterator from walking further back
    /// into the fragments that run now supersedes.
    pub fn suppress_continuation(&mut self, n: NodeId) {
        let build = self.build.as_ref().expect("suppress_continuation outside construction");
        if !self.features.continuations || build.level == 0 {
            return;
        }
        let Some(reservation) = build.reservations[n as usize].as_ref() else {
            return;
        };
        let cont_index = reservation.start + reservation.capacity;
        let level = build.level;
        self.edges
            .level_at(level)
            .unwrap()
            .dense_write(cont_index as usize, EdgeSlot::Continuation(BeginRecord::default()));
    }

    /// The `[start, start+count)` edge-table slots reserved for `n`'s new
    /// edges at the level currently under construction, if it has one.
    /// Lets a caller (the reverse-edge builder) learn where edges it just
    /// wrote ended up, before the level is finalized.
    pub fn reserved_range(&self, n: NodeId) -> Option<std::ops::Range<u32>> {
        let build = self.build.as_ref()?;
        let reservation = build.reservations[n as usize].as_ref()?;
        Some(reservation.start..reservation.start + reservation.capacity)
    }

    /// The number of edge-table slots allocated for `level` (its capacity,
    /// not the number of live edges within it).
    pub fn edge_capacity(&self, level: LevelIndex) -> usize {
        self.edges.level_at(level).map(|v| v.len()).unwrap_or(0)
    }

    /// Finalizes the level's edge table. Spec §4.4 step 4.
    pub fn finish_level_edges(&mut self) {
        let level = self.build.as_ref().expect("finish_level_edges outside construction").level;
        self.edges.level_at_mut(level).unwrap().finalize();
    }

    /// Writes the sentinel begin record used to bound linear scans, then
    /// finalizes the level's vertex table, ending construction. Spec §4.4
    /// step 5.
    pub fn finish_level_vertices(&mut self) -> LevelIndex {
        let build = self.build.take().expect("finish_level_vertices outside construction");
        let vertex = self.vertex.level_at(build.level).unwrap();
        vertex.cow_write(build.node_count, BeginRecord::default());
        self.vertex.level_at_mut(build.level).unwrap().finalize();
        build.level
    }

    // ---- queries ------------------------------------------------------

    /// Given any begin record (possibly an "inherited, nothing new here"
    /// snapshot with `level_length == 0`), resolves it to the run that
    /// actually holds the node's edges: itself, if it already has a
    /// nonzero length, or — by invariant, in one hop — the record at the
    /// level its `adj_list_start` encodes, which must be the level that
    /// actually wrote them.
    fn resolve_run(&self, n: NodeId, record: BeginRecord) -> (EdgeId, u32) {
        if record.adj_list_start.is_nil() {
            return (EdgeId::NIL, 0);
        }
        if record.level_length > 0 {
            return (record.adj_list_start, record.level_length);
        }
        let origin_level = record.adj_list_start.level() as LevelIndex;
        let origin = self
            .vertex
            .level_at(origin_level)
            .expect("adj_list_start must name a live level")
            .get(n as usize);
        debug_assert!(origin.level_length > 0, "origin record must record its own run length");
        (origin.adj_list_start, origin.level_length)
    }

    /// Locates the begin record to descend into after exhausting the run
    /// `[run_level, ..run_end_index)`: the inline continuation record
    /// immediately after it, if continuations are enabled and this run
    /// didn't originate at level 0; otherwise the node's record in the
    /// previous level's vertex table directly.
    fn next_candidate_begin(&self, node: NodeId, run_level: u32, run_end_index: u32) -> Option<BeginRecord> {
        if self.features.continuations && run_level > 0 {
            if let Some(table) = self.edges.level_at(run_level as usize) {
                if let EdgeSlot::Continuation(r) = table.get(run_end_index as usize) {
                    return Some(r);
                }
            }
        }
        if run_level == 0 {
            return None;
        }
        let prev_level = run_level as LevelIndex - 1;
        self.vertex
            .level_at(prev_level)
            .filter(|v| (node as usize) < v.len())
            .map(|v| v.get(node as usize))
    }

    /// Opens an iterator over node `n`'s out-edges as observed from
    /// `level`, descending through earlier levels as each run is
    /// exhausted. Spec §4.4.
    pub fn iter_begin(&self, n: NodeId, level: LevelIndex) -> EdgeCursor<'_> {
        self.iter_begin_as_of(n, level, level)
    }

    /// Like [`Self::iter_begin`], but reads the starting begin record from
    /// `begin_level` while checking soft-deletion visibility as of
    /// `view_level`. Used by `LoaderConfig::copy_adj_list_on_deletion` to
    /// read a node's adjacency as it will appear at a level that doesn't
    /// exist yet (`view_level`, the level under construction) from the
    /// latest level that does (`begin_level`), so edges already tombstoned
    /// for the new level are excluded from the compacted list up front.
    pub fn iter_begin_as_of(&self, n: NodeId, begin_level: LevelIndex, view_level: LevelIndex) -> EdgeCursor<'_> {
        let begin = self
            .vertex
            .level_at(begin_level)
            .filter(|v| (n as usize) < v.len())
            .map(|v| v.get(n as usize))
            .unwrap_or_default();
        let (start, len) = self.resolve_run(n, begin);
        EdgeCursor::new(self, n, view_level as u32, start, len, false)
    }

    /// Like [`Self::iter_begin`], but never descends past `level` — used
    /// by the reverse-edge builder, which only needs each level's own
    /// contribution. Spec §4.4.
    pub fn iter_begin_within_level(&self, n: NodeId, level: LevelIndex) -> EdgeCursor<'_> {
        let begin = self
            .vertex
            .level_at(level)
            .filter(|v| (n as usize) < v.len())
            .map(|v| v.get(n as usize))
            .unwrap_or_default();
        let (start, len) = self.resolve_run(n, begin);
        EdgeCursor::new(self, n, level as u32, start, len, true)
    }

    /// The number of live out-edges of `n` as observed from `level`.
    ///
    /// With precomputed degrees, this is an `O(1)` field read (optionally
    /// adjusted for a bounded view by subtracting the degree recorded just
    /// below the live floor). Without them, it is a walk down the descent
    /// chain summing each run's length. Spec §4.4.
    pub fn degree(&self, n: NodeId, level: LevelIndex) -> i64 {
        if self.features.precomputed_degree {
            let base = self
                .vertex
                .level_at(level)
                .filter(|v| (n as usize) < v.len())
                .map(|v| v.get(n as usize).degree)
                .unwrap_or(0);
            if self.min_live_level == 0 {
                return base;
            }
            let floor = self.min_live_level - 1;
            let prior = self
                .vertex
                .level_at(floor)
                .filter(|v| (n as usize) < v.len())
                .map(|v| v.get(n as usize).degree)
                .unwrap_or(0);
            return base - prior;
        }

        let mut total = 0i64;
        let begin = match self.vertex.level_at(level).filter(|v| (n as usize) < v.len()) {
            Some(v) => v.get(n as usize),
            None => return 0,
        };
        let (mut start, mut len) = self.resolve_run(n, begin);
        loop {
            if start.is_nil() {
                break;
            }
            let run_level = start.level();
            if (run_level as LevelIndex) < self.min_live_level {
                break;
            }
            total += len as i64;
            let candidate = match self.next_candidate_begin(n, run_level, start.index() + len) {
                Some(r) if !r.adj_list_start.is_nil() => r,
                _ => break,
            };
            let (s2, l2) = self.resolve_run(n, candidate);
            start = s2;
            len = l2;
        }
        total
    }

    /// Marks `edge` invisible from `at_level` onward, without touching the
    /// (possibly long-finalized) level its record lives in. Requires
    /// [`CsrFeatures::soft_deletions`].
    ///
    /// Takes `&self`: concurrent callers serialize through a stripe lock
    /// keyed on the edge id, per spec §5's `update_max_visible_level_lower_only`
    /// — the compare-and-lower under that lock also refuses to raise an
    /// already-lower `max_visible_level`, so calling this twice with an
    /// increasing `at_level` cannot undo an earlier deletion. Spec §3,
    /// §4.4, §8 S4.
    pub fn delete_edge(&self, edge: EdgeId, at_level: LevelIndex) {
        debug_assert!(self.features.soft_deletions, "delete_edge requires soft deletions to be enabled");
        let _guard = self.delete_lock.lock_for(edge.raw() as i64);
        let table = self.edges.level_at(edge.level() as usize).expect("edge level must still be live");
        let current = table.get(edge.index() as usize).as_edge();
        if at_level as u32 >= current.max_visible_level {
            return;
        }
        table.patch_finalized(
            edge.index() as usize,
            EdgeSlot::Edge(EdgeEntry { neighbor: current.neighbor, max_visible_level: at_level as u32 }),
        );
    }

    /// Linear search over `n`'s out-edges (as observed from `level`) for
    /// `target`, returning the matching edge's id if found.
    pub fn find(&self, n: NodeId, level: LevelIndex, target: NodeId) -> Option<EdgeId> {
        let mut cursor = self.iter_begin(n, level);
        while let Some((id, entry)) = cursor.advance() {
            if entry.neighbor == target {
                return Some(id);
            }
        }
        None
    }
}

/// Lazy, descending iterator over one node's out-edges. Use
/// [`EdgeCursor::advance`] directly, or the `Iterator` impl (which yields
/// just the edge id).
pub struct EdgeCursor<'a> {
    mlcsr: &'a Mlcsr,
    node: NodeId,
    view_level: u32,
    next: EdgeId,
    remaining: u32,
    run_level: u32,
    run_end_index: u32,
    within_level_only: bool,
    done: bool,
}

impl<'a> EdgeCursor<'a> {
    fn new(
        mlcsr: &'a Mlcsr,
        node: NodeId,
        view_level: u32,
        start: EdgeId,
        len: u32,
        within_level_only: bool,
    ) -> Self {
        let done = start.is_nil();
        Self {
            mlcsr,
            node,
            view_level,
            next: start,
            remaining: len,
            run_level: if done { 0 } else { start.level() },
            run_end_index: if done { 0 } else { start.index() + len },
            within_level_only,
            done,
        }
    }

    fn descend(&mut self) -> bool {
        if self.within_level_only {
            return false;
        }
        let candidate = match self.mlcsr.next_candidate_begin(self.node, self.run_level, self.run_end_index) {
            Some(r) if !r.adj_list_start.is_nil() => r,
            _ => return false,
        };
        let (start, len) = self.mlcsr.resolve_run(self.node, candidate);
        if (start.level() as LevelIndex) < self.mlcsr.min_live_level {
            return false;
        }
        self.run_level = start.level();
        self.next = start;
        self.remaining = len;
        self.run_end_index = start.index() + len;
        true
    }

    /// Returns the next live edge, applying the soft-deletion visibility
    /// check and descending across level boundaries as needed.
    pub fn advance(&mut self) -> Option<(EdgeId, EdgeEntry)> {
        loop {
            if self.done {
                return None;
            }
            if self.remaining == 0 {
                if !self.descend() {
                    self.done = true;
                    return None;
                }
                continue;
            }
            let id = self.next;
            let slot = self
                .mlcsr
                .edges
                .level_at(id.level() as usize)
                .expect("edge level must still be live")
                .get(id.index() as usize);
            let entry = slot.as_edge();

            self.remaining -= 1;
            if self.remaining > 0 {
                self.next = EdgeId::encode(id.level(), id.index() + 1);
            }

            if self.mlcsr.features.soft_deletions && !entry.is_visible_at(self.view_level) {
                continue;
            }
            return Some((id, entry));
        }
    }
}

impl<'a> Iterator for EdgeCursor<'a> {
    type Item = EdgeId;

    fn next(&mut self) -> Option<EdgeId> {
        self.advance().map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features() -> CsrFeatures {
        CsrFeatures { precomputed_degree: true, soft_deletions: false, continuations: true }
    }

    fn page_config() -> PageManagerConfig {
        PageManagerConfig::new(4, true)
    }

    #[test]
    fn single_level_three_nodes() {
        let mut g = Mlcsr::new(features(), page_config());
        g.init_level_from_degrees(3, &[2, 1, 0], &[0, 0, 0]);
        g.write_values(0, &[1, 2]);
        g.write_values(1, &[2]);
        g.finish_level_edges();
        let level = g.finish_level_vertices();

        assert_eq!(g.degree(0, level), 2);
        assert_eq!(g.degree(1, level), 1);
        assert_eq!(g.degree(2, level), 0);

        let mut cursor = g.iter_begin(0, level);
        let mut seen = Vec::new();
        while let Some((_, e)) = cursor.advance() {
            seen.push(e.neighbor);
        }
        assert_eq!(seen, vec![1, 2]);
        assert!(g.find(0, level, 2).is_some());
        assert!(g.find(0, level, 42).is_none());
    }

    #[test]
    fn second_level_adds_edges_and_descends_into_first() {
        let mut g = Mlcsr::new(features(), page_config());
        g.init_level_from_degrees(2, &[1, 0], &[0, 0]);
        g.write_values(0, &[1]);
        g.finish_level_edges();
        let l0 = g.finish_level_vertices();

        g.init_level_from_degrees(2, &[1, 0], &[0, 0]);
        g.write_values(1, &[0]);
        g.finish_level_edges();
        let l1 = g.finish_level_vertices();

        assert_eq!(g.degree(0, l1), 1, "node 0 untouched at level 1 must still report its level-0 edge");
        let mut cursor = g.iter_begin(0, l1);
        let mut seen = Vec::new();
        while let Some((_, e)) = cursor.advance() {
            seen.push(e.neighbor);
        }
        assert_eq!(seen, vec![1]);

        let mut cursor1 = g.iter_begin(1, l1);
        let mut seen1 = Vec::new();
        while let Some((_, e)) = cursor1.advance() {
            seen1.push(e.neighbor);
        }
        assert_eq!(seen1, vec![0]);

        assert_eq!(g.degree(0, l0), 1);
        let mut l0_cursor = g.iter_begin(1, l0);
        assert!(l0_cursor.advance().is_none());
    }

    #[test]
    fn descent_through_three_levels_with_an_untouched_middle_level() {
        let mut g = Mlcsr::new(features(), page_config());
        g.init_level_from_degrees(2, &[1, 0], &[0, 0]);
        g.write_values(0, &[1]);
        g.finish_level_edges();
        g.finish_level_vertices();

        // Level 1 touches only node 1; node 0 is untouched (new == 0, deleted == 0).
        g.init_level_from_degrees(2, &[0, 1], &[0, 0]);
        g.write_values(1, &[0]);
        g.finish_level_edges();
        g.finish_level_vertices();

        g.init_level_from_degrees(2, &[1, 0], &[0, 0]);
        g.write_values(0, &[1]);
        g.finish_level_edges();
        let l2 = g.finish_level_vertices();

        assert_eq!(g.degree(0, l2), 2);
        let mut cursor = g.iter_begin(0, l2);
        let mut seen = Vec::new();
        while let Some((_, e)) = cursor.advance() {
            seen.push(e.neighbor);
        }
        seen.sort();
        assert_eq!(seen, vec![1, 1]);
    }

    #[test]
    fn soft_deleted_edges_are_skipped_by_the_cursor() {
        let soft_features = CsrFeatures { precomputed_degree: false, soft_deletions: true, continuations: true };
        let mut g = Mlcsr::new(soft_features, page_config());
        g.init_level_from_degrees(2, &[2, 0], &[0, 0]);
        g.write_values(0, &[1, 1]);
        g.finish_level_edges();
        let level = g.finish_level_vertices();

        let first_edge = g.find(0, level, 1).unwrap();
        g.delete_edge(first_edge, 0);

        let mut cursor = g.iter_begin(0, level);
        let mut count = 0;
        while cursor.advance().is_some() {
            count += 1;
        }
        assert_eq!(count, 1, "the edge marked invisible at view level 0 must be skipped");
    }
}
