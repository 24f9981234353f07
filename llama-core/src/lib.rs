//! `llama-core`: a multi-version, copy-on-write compressed sparse row
//! (MLCSR) graph store.
//!
//! A graph is a sequence of immutable *levels*; each checkpoint
//! ([`graph::checkpoint::Checkpoint::run`]) appends one, reusing whatever
//! pages of the previous level a node's adjacency didn't change (spec
//! §2). [`graph::Graph`] is the entry point most callers want;
//! [`csr::Mlcsr`] is the single-direction engine underneath it, usable on
//! its own when only one adjacency direction matters.

#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(all(feature = "level-id-wrap", feature = "persistence"))]
compile_error!(
    "the `level-id-wrap` and `persistence` features are mutually exclusive: \
     wrapping level ids would let a persisted file's level index collide \
     with a reused in-memory one"
);

pub mod config;
pub mod csr;
pub mod error;
pub mod graph;
pub mod level;
pub mod page;
pub mod parallel;
#[cfg(feature = "persistence")]
pub mod persist;
pub mod property;
pub mod sync;
pub mod vpa;

pub mod prelude {
    //! The small set of types most callers need in scope.
    pub use crate::config::{CsrFeatures, LoaderConfig, PageManagerConfig};
    pub use crate::csr::{EdgeId, Mlcsr, NodeId, NIL_NODE};
    pub use crate::error::{CheckpointError, ConfigError};
    pub use crate::graph::{Checkpoint, CheckpointSource, EdgeTranslationMap, Graph, VertexDelta};
    pub use crate::property::{EdgeProperty, NodeProperty};
}
