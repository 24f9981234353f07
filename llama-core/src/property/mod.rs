//! Versioned per-node and per-edge properties. Spec §5.

pub mod edge;
pub mod node;

pub use edge::{EdgeProperty, EdgePropertyLifecycle, EdgePropertyOverlay};
pub use node::{NodeProperty, NodePropertyLifecycle};
