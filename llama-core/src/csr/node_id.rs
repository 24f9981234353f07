//! Node IDs: signed 64-bit integers, contiguous `0..N-1` per level, with a
//! distinguished `NIL` for "none." Spec §3.

pub type NodeId = i64;

/// The distinguished "no node" value.
pub const NIL_NODE: NodeId = -1;
