//! The crate's recoverable-error taxonomy.
//!
//! Per the error-handling design: precondition violations, double-frees,
//! and out-of-memory are programmer errors or resource exhaustion and are
//! handled with `panic!`/`debug_assert!`/process abort, never threaded
//! through `Result`. Only the handful of failures the engine actually
//! expects a caller to recover from — a malformed [`crate::config::LoaderConfig`],
//! a checkpoint whose node count regresses, or (with the `persistence`
//! feature) a storage-layer I/O failure — are `Result` values.

use thiserror::Error;

/// Errors raised while assembling a [`crate::config::LoaderConfig`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// `reverse_maps` was requested without `reverse_edges`; the
    /// edge-translation map has nothing to translate between without a
    /// maintained in-direction.
    #[error("reverse_maps requires reverse_edges to also be enabled")]
    ReverseMapsRequireReverseEdges,
}

/// Errors raised by [`crate::graph::checkpoint::Checkpoint::run`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointError {
    /// The source reported a `max_node_id` smaller than the graph already
    /// has nodes for. Node IDs are append-only across levels.
    #[error("checkpoint source reports {reported} nodes, fewer than the {existing} nodes already present")]
    ShrinkingNodeCount { existing: usize, reported: usize },
}

/// Errors raised by the `persistence`-feature file backing.
#[cfg(feature = "persistence")]
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error on context {context:?}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("context name {0:?} is not [A-Za-z0-9_-]+")]
    InvalidContextName(String),
    #[error("corrupt multi-level file for context {context:?}: {reason}")]
    CorruptFormat { context: String, reason: String },
    #[error("failed to (de)serialize persisted metadata: {0}")]
    Codec(#[from] bincode::Error),
}
