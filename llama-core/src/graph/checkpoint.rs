//! The checkpoint driver: pulls a batch of graph mutations from an
//! external [`CheckpointSource`] and folds them into one new level of the
//! graph's MLCSR structures (and, when configured, its reverse
//! structures, edge-translation map, and registered properties). Spec §6,
//! §4.6.

use std::collections::HashMap;

use crate::csr::{EdgeId, Mlcsr, NodeId};
use crate::error::CheckpointError;
use crate::level::LevelIndex;

use super::Graph;

/// One node's delta record for the checkpoint under construction: spec
/// §6's `vertex_delta_table` entry shape, minus the fields this engine
/// recovers by other means (in-edge topology is derived from the
/// out-edges a checkpoint itself writes — see `Checkpoint::build_reverse_level`
/// and DESIGN.md — so only the in-edge *deletion count* needs to travel
/// through the source).
pub struct VertexDelta<'a> {
    /// Edges newly added to this node's out-adjacency since the last
    /// checkpoint.
    pub new_out_edges: &'a [NodeId],
    /// Count of this node's out-edges removed since the last checkpoint.
    pub deleted_out: u32,
    /// Count of this node's in-edges removed since the last checkpoint;
    /// not recoverable from this checkpoint's own out-edge writes.
    pub deleted_in: u32,
}

/// The host application's view of one checkpoint's worth of graph
/// mutations. Node ids are always `0..=max_node_id()`, append-only across
/// checkpoints. Spec §6 "CheckpointSource."
pub trait CheckpointSource {
    /// Inclusive largest node id to appear in this checkpoint. Must never
    /// shrink across checkpoints ([`CheckpointError::ShrinkingNodeCount`]).
    fn max_node_id(&self) -> NodeId;

    /// Allocation hints for the host to report if it knows them cheaply;
    /// `0` (the default) means "no hint," and the engine sizes everything
    /// exactly from [`Self::vertex_delta`] instead.
    fn num_new_nodes(&self) -> usize {
        0
    }
    fn num_new_edges(&self) -> usize {
        0
    }

    /// `node`'s delta record for the checkpoint under construction.
    fn vertex_delta(&self, node: NodeId) -> VertexDelta<'_>;

    /// Sorted-emit accessor: by default just a copy of
    /// `vertex_delta(node).new_out_edges`. A source able to produce a
    /// node's new edges pre-sorted may override this to skip the
    /// `LoaderConfig::sort_edges` sort the checkpoint would otherwise do.
    fn get_out_edges(&self, node: NodeId, out_vec: &mut Vec<NodeId>) {
        out_vec.clear();
        out_vec.extend_from_slice(self.vertex_delta(node).new_out_edges);
    }
}

pub struct Checkpoint;

impl Checkpoint {
    /// Runs one checkpoint against `graph`, returning the new out-edges
    /// level index.
    ///
    /// Pipeline (spec §4.6): validate the source's node count (1);
    /// compute this level's degree deltas per node (2); allocate the
    /// out-edges level (3); open every registered edge property's fresh
    /// level at the same capacity (4); write (optionally sorted,
    /// optionally compacted) new edges (5); finalize the out-edges level
    /// (6); if reverse edges are enabled, derive and fill the in-edges
    /// level (7); finalize every registered edge property (8); advance
    /// every registered node property (9); commit the graph's node count
    /// (10 — sync-to-disk is the host's own affair via the `persist`
    /// module, not this driver's).
    pub fn run(graph: &mut Graph, source: &dyn CheckpointSource) -> Result<LevelIndex, CheckpointError> {
        let node_count = source.max_node_id().checked_add(1).map(|n| n.max(0) as usize).unwrap_or(0);
        if node_count < graph.node_count {
            return Err(CheckpointError::ShrinkingNodeCount {
                existing: graph.node_count,
                reported: node_count,
            });
        }

        let prev_level = graph.out_edges.level_count().checked_sub(1);
        let out_level_idx = graph.out_edges.level_count();
        let copy_adj = graph.config.copy_adj_list_on_deletion();

        // Step 2: degree deltas, with `LoaderConfig::copy_adj_list_on_deletion`
        // intercepted per node: instead of just the newly added edges, a
        // node with any out-edge deletions this round gets its entire
        // live adjacency (as of the level under construction) flattened
        // into one fresh run, bypassing history fragmentation entirely.
        let mut new_out = vec![0u32; node_count];
        let mut deleted_out = vec![0u32; node_count];
        let mut deleted_in = vec![0u32; node_count];
        let mut materialized: HashMap<NodeId, Vec<NodeId>> = HashMap::new();

        for n in 0..node_count as NodeId {
            let delta = source.vertex_delta(n);
            deleted_in[n as usize] = delta.deleted_in;

            if copy_adj && delta.deleted_out > 0 {
                let mut combined = Vec::new();
                if let Some(prev) = prev_level {
                    let mut cursor = graph.out_edges.iter_begin_as_of(n, prev, out_level_idx);
                    while let Some((_, entry)) = cursor.advance() {
                        combined.push(entry.neighbor);
                    }
                }
                combined.extend_from_slice(delta.new_out_edges);
                let prev_degree = prev_level.map(|p| graph.out_edges.degree(n, p)).unwrap_or(0);
                new_out[n as usize] = combined.len() as u32;
                // Cancels the `prev_degree + new - deleted` formula down
                // to exactly `combined.len()`: the whole previous
                // adjacency is being replaced by `combined`, not added to
                // it.
                deleted_out[n as usize] = prev_degree.max(0) as u32;
                materialized.insert(n, combined);
            } else {
                new_out[n as usize] = delta.new_out_edges.len() as u32;
                deleted_out[n as usize] = delta.deleted_out;
            }
        }

        // Step 3: out-edges level.
        let out_level = graph.out_edges.init_level_from_degrees(node_count, &new_out, &deleted_out);
        debug_assert_eq!(out_level, out_level_idx);
        let out_capacity = graph.out_edges.edge_capacity(out_level);

        // Step 4: open every registered edge property at this level's
        // capacity.
        for prop in graph.edge_properties.values_mut() {
            prop.begin_level(out_capacity);
        }

        // Step 5: write edges, materialized nodes in full, everyone else
        // from the source (optionally sorted).
        let mut scratch = Vec::new();
        for n in 0..node_count as NodeId {
            if let Some(combined) = materialized.get(&n) {
                graph.out_edges.write_values(n, combined);
                graph.out_edges.suppress_continuation(n);
                continue;
            }
            source.get_out_edges(n, &mut scratch);
            if scratch.is_empty() {
                continue;
            }
            if graph.config.sort_edges() {
                scratch.sort_unstable();
            }
            graph.out_edges.write_values(n, &scratch);
        }
        // Step 6.
        graph.out_edges.finish_level_edges();
        graph.out_edges.finish_level_vertices();

        // Step 7: reverse structures.
        if graph.config.reverse_edges() {
            Self::build_reverse_level(graph, out_level, node_count, &deleted_in);
        }

        // Step 8: finalize every registered edge property.
        for prop in graph.edge_properties.values_mut() {
            if let Some(level) = prop.latest_level() {
                prop.finish_level(level);
            }
        }

        // Step 9: advance every registered node property — finalize
        // whatever a host wrote into its currently open level since the
        // last checkpoint, then open a fresh one sized to this round's
        // node count for the host to write into before the next
        // checkpoint. See DESIGN.md for why this engine collapses the
        // spec's separate open/finalize points into one call here.
        for prop in graph.node_properties.values_mut() {
            if let Some(prev) = prop.latest_level() {
                prop.finalize_level(prev);
            }
            prop.init_level(node_count);
        }

        // Step 10: commit.
        graph.node_count = node_count;
        Ok(out_level)
    }

    /// Builds the in-edges level by bucketing the out-edges this
    /// checkpoint just wrote (spec §4.6 step 7), which is a lossless way
    /// to recover in-edge *topology* — an in-edge is, by definition, the
    /// reverse of an out-edge, so the full set of them is already fully
    /// determined by what was just written. The *deletion count* for a
    /// node's in-edges has no such trace in this checkpoint's out-edges
    /// (a deletion of an in-edge leaves no newly-written out-edge behind),
    /// so it travels through `deleted_in`, sourced directly from
    /// [`VertexDelta::deleted_in`] rather than derived. See DESIGN.md.
    fn build_reverse_level(
        graph: &mut Graph,
        out_level: LevelIndex,
        node_count: usize,
        deleted_in: &[u32],
    ) {
        let mut buckets: Vec<Vec<(NodeId, EdgeId)>> = (0..node_count).map(|_| Vec::new()).collect();
        for n in 0..node_count as NodeId {
            let mut cursor = graph.out_edges.iter_begin_within_level(n, out_level);
            while let Some((edge_id, entry)) = cursor.advance() {
                buckets[entry.neighbor as usize].push((n, edge_id));
            }
        }

        let rev_new: Vec<u32> = buckets.iter().map(|b| b.len() as u32).collect();

        let features = graph.features;
        let page_config = graph.page_config;
        let in_mlcsr = graph.in_edges.get_or_insert_with(|| Mlcsr::new(features, page_config));
        let in_level = in_mlcsr.init_level_from_degrees(node_count, &rev_new, deleted_in);

        // Written before `finish_level_edges`, so `reserved_range` is
        // still available to recover exactly where each reverse edge
        // landed for the translation map.
        let mut translation_pairs: Vec<(EdgeId, EdgeId)> = Vec::new();
        for n in 0..node_count as NodeId {
            let bucket = &buckets[n as usize];
            if bucket.is_empty() {
                continue;
            }
            let sources: Vec<NodeId> = bucket.iter().map(|(src, _)| *src).collect();
            in_mlcsr.write_values(n, &sources);

            if graph.config.reverse_maps() {
                let range = in_mlcsr.reserved_range(n).expect("just reserved this node's run");
                for (i, &(_, out_edge_id)) in bucket.iter().enumerate() {
                    let in_edge_id = EdgeId::encode(in_level as u32, range.start + i as u32);
                    translation_pairs.push((out_edge_id, in_edge_id));
                }
            }
        }

        in_mlcsr.finish_level_edges();
        in_mlcsr.finish_level_vertices();

        if graph.config.reverse_maps() {
            // Always append a level here in lockstep with `out_edges` and
            // `in_edges`, even when this checkpoint produced no reverse
            // edges at all — otherwise a later checkpoint's `out_level`
            // would no longer line up with the translation map's own
            // level index.
            let translation = graph
                .edge_translation
                .as_mut()
                .expect("reverse_maps implies an edge-translation map exists");
            let out_capacity = graph.out_edges.edge_capacity(out_level);
            let in_capacity = graph.in_edges.as_ref().unwrap().edge_capacity(in_level);
            let translated_out_level = translation.out_to_in.begin_level(out_capacity);
            let translated_in_level = translation.in_to_out.begin_level(in_capacity);
            debug_assert_eq!(translated_out_level, out_level);
            debug_assert_eq!(translated_in_level, in_level);
            for (out_id, in_id) in translation_pairs {
                translation.out_to_in.set_by_edge_id(out_id, in_id);
                translation.in_to_out.set_by_edge_id(in_id, out_id);
            }
            translation.out_to_in.finish_level(out_level);
            translation.in_to_out.finish_level(in_level);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CsrFeatures, LoaderConfig, PageManagerConfig};
    use crate::property::NodeProperty;

    struct FixedSource {
        edges: Vec<Vec<NodeId>>,
        deleted_out: Vec<u32>,
        deleted_in: Vec<u32>,
    }

    impl FixedSource {
        fn new(edges: Vec<Vec<NodeId>>) -> Self {
            let n = edges.len();
            Self { edges, deleted_out: vec![0; n], deleted_in: vec![0; n] }
        }
    }

    impl CheckpointSource for FixedSource {
        fn max_node_id(&self) -> NodeId {
            self.edges.len() as NodeId - 1
        }
        fn vertex_delta(&self, node: NodeId) -> VertexDelta<'_> {
            VertexDelta {
                new_out_edges: &self.edges[node as usize],
                deleted_out: self.deleted_out[node as usize],
                deleted_in: self.deleted_in[node as usize],
            }
        }
    }

    #[test]
    fn checkpoint_builds_out_edges_from_source() {
        let mut graph = Graph::new(LoaderConfig::empty(), CsrFeatures::default(), PageManagerConfig::new(4, true)).unwrap();
        let source = FixedSource::new(vec![vec![1, 2], vec![2], vec![]]);
        let level = Checkpoint::run(&mut graph, &source).unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.out_edges().degree(0, level), 2);
        assert_eq!(graph.out_edges().degree(1, level), 1);
    }

    #[test]
    fn checkpoint_rejects_a_shrinking_node_count() {
        let mut graph = Graph::new(LoaderConfig::empty(), CsrFeatures::default(), PageManagerConfig::new(4, true)).unwrap();
        let first = FixedSource::new(vec![vec![], vec![], vec![]]);
        Checkpoint::run(&mut graph, &first).unwrap();
        let second = FixedSource::new(vec![vec![], vec![]]);
        let err = Checkpoint::run(&mut graph, &second).unwrap_err();
        assert_eq!(err, CheckpointError::ShrinkingNodeCount { existing: 3, reported: 2 });
    }

    #[test]
    fn reverse_edges_mirror_the_out_edges_just_written() {
        let cfg = LoaderConfig::REVERSE_EDGES | LoaderConfig::REVERSE_MAPS;
        let mut graph = Graph::new(cfg, CsrFeatures::default(), PageManagerConfig::new(4, true)).unwrap();
        let source = FixedSource::new(vec![vec![1, 2], vec![2], vec![]]);
        let out_level = Checkpoint::run(&mut graph, &source).unwrap();

        let in_edges = graph.in_edges().unwrap();
        assert_eq!(in_edges.degree(2, out_level), 2, "nodes 0 and 1 both point at node 2");
        assert_eq!(in_edges.degree(1, out_level), 1);
        assert_eq!(in_edges.degree(0, out_level), 0);

        let out_edge = graph.out_edges().find(0, out_level, 2).unwrap();
        let translation = graph.edge_translation().unwrap();
        let in_edge = translation.to_in_edge(out_edge);
        assert_eq!(translation.to_out_edge(in_edge), out_edge);
    }

    #[test]
    fn deleted_in_count_survives_the_checkpoint_uncorrupted() {
        let cfg = LoaderConfig::REVERSE_EDGES;
        let mut graph = Graph::new(cfg, CsrFeatures::default(), PageManagerConfig::new(4, true)).unwrap();
        let first = FixedSource::new(vec![vec![1], vec![]]);
        Checkpoint::run(&mut graph, &first).unwrap();

        let mut second = FixedSource::new(vec![vec![], vec![]]);
        second.deleted_in[1] = 1;
        let level = Checkpoint::run(&mut graph, &second).unwrap();

        // Degree bookkeeping on the in-direction reflects the reported
        // deletion, not a silently dropped zero.
        assert_eq!(graph.in_edges().unwrap().degree(1, level), 0);
    }

    #[test]
    fn copy_adj_list_on_deletion_flattens_a_fragmented_node() {
        let cfg = LoaderConfig::COPY_ADJ_LIST_ON_DELETION;
        let features = CsrFeatures { precomputed_degree: true, soft_deletions: true, continuations: true };
        let mut graph = Graph::new(cfg, features, PageManagerConfig::new(4, true)).unwrap();

        let first = FixedSource::new(vec![vec![1, 2, 3]]);
        Checkpoint::run(&mut graph, &first).unwrap();
        let doomed = graph.out_edges().find(0, 0, 2).unwrap();
        graph.delete_edge(doomed, 1);

        let mut second = FixedSource::new(vec![vec![4]]);
        second.deleted_out[0] = 1;
        let level = Checkpoint::run(&mut graph, &second).unwrap();

        assert_eq!(graph.out_edges().degree(0, level), 3, "1, 3, and 4 survive; 2 was deleted");
        let mut seen = Vec::new();
        let mut cursor = graph.out_edges().iter_begin(0, level);
        while let Some((_, e)) = cursor.advance() {
            seen.push(e.neighbor);
        }
        seen.sort();
        assert_eq!(seen, vec![1, 3, 4]);
    }

    #[test]
    fn registered_node_property_survives_a_checkpoint() {
        let mut graph = Graph::new(LoaderConfig::empty(), CsrFeatures::default(), PageManagerConfig::new(4, true)).unwrap();
        graph.register_node_property::<f64>("rank", NodeProperty::new(PageManagerConfig::new(4, true)));

        let first = FixedSource::new(vec![vec![1], vec![]]);
        Checkpoint::run(&mut graph, &first).unwrap();

        // The checkpoint opened a fresh writable level for the property;
        // write into it the way a host algorithm would between rounds.
        let writable = graph.node_property::<f64>("rank").unwrap().latest_level().unwrap();
        graph.node_property::<f64>("rank").unwrap().set(writable, 0, 1.5);

        let second = FixedSource::new(vec![vec![1], vec![]]);
        Checkpoint::run(&mut graph, &second).unwrap();

        assert_eq!(graph.node_property::<f64>("rank").unwrap().get(writable, 0), 1.5);
    }
}
