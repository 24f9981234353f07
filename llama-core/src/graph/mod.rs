//! The graph facade: one out-edges MLCSR, an optional in-edges MLCSR, an
//! optional bidirectional edge-translation map between them, and the
//! name-indexed registries of additional CSR tables and properties the
//! graph owns on behalf of whatever algorithms run against it. Spec §6,
//! §4.6.

pub mod checkpoint;

use std::collections::HashMap;

use crate::config::{CsrFeatures, LoaderConfig, PageManagerConfig};
use crate::csr::{EdgeId, Mlcsr};
use crate::level::LevelIndex;
use crate::property::{EdgeProperty, EdgePropertyLifecycle, NodeProperty, NodePropertyLifecycle};

pub use checkpoint::{Checkpoint, CheckpointSource, VertexDelta};

/// Maps an out-edge id to its corresponding in-edge id and back. Built
/// only when [`LoaderConfig::REVERSE_MAPS`] is set (which itself requires
/// [`LoaderConfig::REVERSE_EDGES`], enforced by [`LoaderConfig::validated`]).
pub struct EdgeTranslationMap {
    out_to_in: EdgeProperty<EdgeId>,
    in_to_out: EdgeProperty<EdgeId>,
}

impl EdgeTranslationMap {
    fn new(page_config: PageManagerConfig) -> Self {
        Self {
            out_to_in: EdgeProperty::new(page_config),
            in_to_out: EdgeProperty::new(page_config),
        }
    }

    pub fn to_in_edge(&self, out_edge: EdgeId) -> EdgeId {
        self.out_to_in.get_by_edge_id(out_edge)
    }

    pub fn to_out_edge(&self, in_edge: EdgeId) -> EdgeId {
        self.in_to_out.get_by_edge_id(in_edge)
    }
}

/// The graph: out-edges, optionally in-edges and an edge-translation map,
/// a name-indexed registry of additional CSR tables (e.g. per-label), and
/// name-indexed registries of node and edge properties, all sharing one
/// [`LoaderConfig`] and [`CsrFeatures`] combination. Spec §4.6 "Owns."
pub struct Graph {
    config: LoaderConfig,
    features: CsrFeatures,
    page_config: PageManagerConfig,
    node_count: usize,
    out_edges: Mlcsr,
    in_edges: Option<Mlcsr>,
    edge_translation: Option<EdgeTranslationMap>,
    tables: HashMap<String, Mlcsr>,
    node_properties: HashMap<String, Box<dyn NodePropertyLifecycle>>,
    edge_properties: HashMap<String, Box<dyn EdgePropertyLifecycle>>,
}

impl Graph {
    pub fn new(
        config: LoaderConfig,
        features: CsrFeatures,
        page_config: PageManagerConfig,
    ) -> Result<Self, crate::error::ConfigError> {
        let config = config.validated()?;
        Ok(Self {
            config,
            features,
            page_config,
            node_count: 0,
            out_edges: Mlcsr::new(features, page_config),
            in_edges: if config.reverse_edges() {
                Some(Mlcsr::new(features, page_config))
            } else {
                None
            },
            edge_translation: if config.reverse_maps() {
                Some(EdgeTranslationMap::new(page_config))
            } else {
                None
            },
            tables: HashMap::new(),
            node_properties: HashMap::new(),
            edge_properties: HashMap::new(),
        })
    }

    pub fn config(&self) -> LoaderConfig {
        self.config
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn out_edges(&self) -> &Mlcsr {
        &self.out_edges
    }

    pub fn in_edges(&self) -> Option<&Mlcsr> {
        self.in_edges.as_ref()
    }

    pub fn edge_translation(&self) -> Option<&EdgeTranslationMap> {
        self.edge_translation.as_ref()
    }

    /// Soft-deletes `out_edge` from `at_level` onward, and — when reverse
    /// edges and the edge-translation map are maintained — the
    /// corresponding in-edge too, so a caller never has to reach past the
    /// facade into a direction's `Mlcsr` directly to delete both sides of
    /// one logical edge. Requires [`CsrFeatures::soft_deletions`]. Spec §4.4,
    /// §5, §8 S4.
    pub fn delete_edge(&self, out_edge: EdgeId, at_level: LevelIndex) {
        self.out_edges.delete_edge(out_edge, at_level);
        if let (Some(in_edges), Some(translation)) = (self.in_edges.as_ref(), self.edge_translation.as_ref()) {
            let in_edge = translation.to_in_edge(out_edge);
            if !in_edge.is_nil() {
                in_edges.delete_edge(in_edge, at_level);
            }
        }
    }

    // ---- additional CSR tables (spec §4.6: "a name-indexed registry of
    // additional CSR tables, e.g., per-label") ------------------------

    pub fn register_table(&mut self, name: impl Into<String>, table: Mlcsr) {
        self.tables.insert(name.into(), table);
    }

    pub fn table(&self, name: &str) -> Option<&Mlcsr> {
        self.tables.get(name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut Mlcsr> {
        self.tables.get_mut(name)
    }

    // ---- node/edge property registries (spec §4.6: "a name- and
    // ID-indexed registry of node and edge properties") ----------------

    pub fn register_node_property<T>(&mut self, name: impl Into<String>, property: NodeProperty<T>)
    where
        T: Copy + Default + Send + Sync + PartialEq + 'static,
    {
        self.node_properties.insert(name.into(), Box::new(property));
    }

    pub fn node_property<T: 'static>(&self, name: &str) -> Option<&NodeProperty<T>> {
        self.node_properties.get(name).and_then(|p| p.as_any().downcast_ref())
    }

    pub fn node_property_mut<T: 'static>(&mut self, name: &str) -> Option<&mut NodeProperty<T>> {
        self.node_properties.get_mut(name).and_then(|p| p.as_any_mut().downcast_mut())
    }

    pub fn register_edge_property<T>(&mut self, name: impl Into<String>, property: EdgeProperty<T>)
    where
        T: Copy + Default + Send + Sync + PartialEq + 'static,
    {
        self.edge_properties.insert(name.into(), Box::new(property));
    }

    pub fn edge_property<T: 'static>(&self, name: &str) -> Option<&EdgeProperty<T>> {
        self.edge_properties.get(name).and_then(|p| p.as_any().downcast_ref())
    }

    pub fn edge_property_mut<T: 'static>(&mut self, name: &str) -> Option<&mut EdgeProperty<T>> {
        self.edge_properties.get_mut(name).and_then(|p| p.as_any_mut().downcast_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_maps_without_reverse_edges_is_rejected_at_construction() {
        let cfg = LoaderConfig::REVERSE_MAPS;
        let err = Graph::new(cfg, CsrFeatures::default(), PageManagerConfig::default()).unwrap_err();
        assert_eq!(err, crate::error::ConfigError::ReverseMapsRequireReverseEdges);
    }

    #[test]
    fn plain_graph_has_no_reverse_structures() {
        let g = Graph::new(LoaderConfig::empty(), CsrFeatures::default(), PageManagerConfig::default()).unwrap();
        assert!(g.in_edges().is_none());
        assert!(g.edge_translation().is_none());
    }

    #[test]
    fn registered_node_property_is_reachable_by_name_and_type() {
        let mut g = Graph::new(LoaderConfig::empty(), CsrFeatures::default(), PageManagerConfig::new(4, true)).unwrap();
        let mut rank: NodeProperty<f64> = NodeProperty::new(PageManagerConfig::new(4, true));
        let l0 = rank.init_level(4);
        rank.set(l0, 1, 0.5);
        rank.finalize_level(l0);
        g.register_node_property("rank", rank);

        assert_eq!(g.node_property::<f64>("rank").unwrap().get(l0, 1), 0.5);
        assert!(g.node_property::<i64>("rank").is_none(), "wrong type must not downcast");
        assert!(g.node_property::<f64>("missing").is_none());
    }

    #[test]
    fn registered_table_is_reachable_by_name() {
        let mut g = Graph::new(LoaderConfig::empty(), CsrFeatures::default(), PageManagerConfig::new(4, true)).unwrap();
        g.register_table("knows", Mlcsr::new(CsrFeatures::default(), PageManagerConfig::new(4, true)));
        assert!(g.table("knows").is_some());
        assert!(g.table_mut("knows").is_some());
        assert!(g.table("likes").is_none());
    }
}
