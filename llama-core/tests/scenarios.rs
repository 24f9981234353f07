//! End-to-end scenarios over the public API.

use llama_core::prelude::*;

struct Batch {
    edges: Vec<Vec<NodeId>>,
    deleted_out: Vec<u32>,
    deleted_in: Vec<u32>,
}

impl Batch {
    fn new(edges: Vec<Vec<NodeId>>) -> Self {
        let n = edges.len();
        Self { edges, deleted_out: vec![0; n], deleted_in: vec![0; n] }
    }
}

impl CheckpointSource for Batch {
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

fn default_graph() -> Graph {
    Graph::new(LoaderConfig::empty(), CsrFeatures::default(), PageManagerConfig::new(4, true)).unwrap()
}

/// S1: a single level, three nodes, a handful of edges.
#[test]
fn s1_single_level_three_nodes() {
    let mut g = default_graph();
    let level = Checkpoint::run(&mut g, &Batch::new(vec![vec![1, 2], vec![2], vec![]])).unwrap();

    assert_eq!(g.out_edges().degree(0, level), 2);
    assert_eq!(g.out_edges().degree(1, level), 1);
    assert_eq!(g.out_edges().degree(2, level), 0);
    assert!(g.out_edges().find(0, level, 2).is_some());
    assert!(g.out_edges().find(2, level, 0).is_none());
}

/// S2: a second level that only touches one node must leave the other's
/// pages shared with the first level (checked indirectly: its degree and
/// edges at the new level are unchanged, and a third, untouched level
/// changes nothing further).
#[test]
fn s2_two_levels_share_untouched_pages() {
    let mut g = default_graph();
    let l0 = Checkpoint::run(&mut g, &Batch::new(vec![vec![1], vec![0], vec![]])).unwrap();
    let l1 = Checkpoint::run(&mut g, &Batch::new(vec![vec![], vec![], vec![0]])).unwrap();

    assert_eq!(g.out_edges().degree(0, l1), 1, "node 0 is untouched at level 1");
    assert_eq!(g.out_edges().degree(2, l1), 1, "node 2 gained one edge at level 1");
    assert_eq!(g.out_edges().degree(0, l0), 1);
    assert_eq!(g.out_edges().degree(2, l0), 0);
}

/// S3: descent across three levels, where the middle level touches
/// nothing for the node under test.
#[test]
fn s3_descent_across_three_levels() {
    let mut g = default_graph();
    Checkpoint::run(&mut g, &Batch::new(vec![vec![1], vec![]])).unwrap();
    Checkpoint::run(&mut g, &Batch::new(vec![vec![], vec![0]])).unwrap();
    let l2 = Checkpoint::run(&mut g, &Batch::new(vec![vec![1], vec![]])).unwrap();

    assert_eq!(g.out_edges().degree(0, l2), 2);
    let mut neighbors = Vec::new();
    let mut cursor = g.out_edges().iter_begin(0, l2);
    while let Some((_, e)) = cursor.advance() {
        neighbors.push(e.neighbor);
    }
    neighbors.sort();
    assert_eq!(neighbors, vec![1, 1]);
}

/// S4: soft-deleting an edge through the graph facade hides it from
/// subsequent reads without touching the level it was written in.
#[test]
fn s4_soft_deletion_hides_without_rewriting_history() {
    let features = CsrFeatures { precomputed_degree: false, soft_deletions: true, continuations: true };
    let mut g = Graph::new(LoaderConfig::empty(), features, PageManagerConfig::new(4, true)).unwrap();
    let level = Checkpoint::run(&mut g, &Batch::new(vec![vec![1, 2]])).unwrap();

    let doomed = g.out_edges().find(0, level, 1).unwrap();
    g.delete_edge(doomed, level);

    let mut remaining = Vec::new();
    let mut cursor = g.out_edges().iter_begin(0, level);
    while let Some((_, entry)) = cursor.advance() {
        remaining.push(entry.neighbor);
    }
    assert_eq!(remaining, vec![2]);
}

/// S5: reverse edges mirror what was just written, and a checkpoint that
/// adds nothing for a node still carries its earlier in-edges forward.
#[test]
fn s5_reverse_edges_track_out_edges_across_levels() {
    let cfg = LoaderConfig::REVERSE_EDGES;
    let mut g = Graph::new(cfg, CsrFeatures::default(), PageManagerConfig::new(4, true)).unwrap();
    Checkpoint::run(&mut g, &Batch::new(vec![vec![1], vec![]])).unwrap();
    let l1 = Checkpoint::run(&mut g, &Batch::new(vec![vec![], vec![]])).unwrap();

    let in_edges = g.in_edges().unwrap();
    assert_eq!(in_edges.degree(1, l1), 1, "node 1's in-edge from level 0 must still be visible");
}

/// S6: a property's modified-node iterator reports exactly the nodes a
/// checkpoint actually touched.
#[test]
fn s6_modified_node_iterator_is_precise() {
    let mut prop: NodeProperty<i64> = NodeProperty::new(PageManagerConfig::new(4, true));
    let l0 = prop.init_level(8);
    for n in 0..8 {
        prop.set(l0, n, 1);
    }
    prop.finalize_level(l0);

    let l1 = prop.init_level(8);
    prop.set(l1, 5, 42);
    prop.finalize_level(l1);

    assert_eq!(prop.modified_nodes(l0, l1, 8), vec![5]);
}
