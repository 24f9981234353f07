//! Engine-wide configuration.
//!
//! Per the REDESIGN FLAGS guidance ("process-wide settings... is a property
//! of the engine, not of the process"), nothing in this module is a global;
//! every setting is a field on a config value passed to the engine at
//! construction.

use bitflags::bitflags;

bitflags! {
    /// Flags consumed by a checkpoint; the flag bag named in the external
    /// interfaces section of the spec.
    #[derive(Default)]
    pub struct LoaderConfig: u32 {
        /// Also build and maintain the in-edges MLCSR alongside out-edges.
        const REVERSE_EDGES = 0b0001;
        /// Also maintain the bidirectional edge-translation map. Requires
        /// `REVERSE_EDGES`.
        const REVERSE_MAPS = 0b0010;
        /// Sort neighbors within each adjacency list by node ID.
        const SORT_EDGES = 0b0100;
        /// Materialize a full new adjacency list for a node as soon as any
        /// of its edges are deleted, instead of relying on the descent +
        /// soft-delete protocol to hide them.
        const COPY_ADJ_LIST_ON_DELETION = 0b1000;
    }
}

impl LoaderConfig {
    /// Validates the combination of flags, rejecting `REVERSE_MAPS`
    /// without `REVERSE_EDGES`.
    pub fn validated(self) -> Result<Self, crate::error::ConfigError> {
        if self.contains(LoaderConfig::REVERSE_MAPS) && !self.contains(LoaderConfig::REVERSE_EDGES)
        {
            return Err(crate::error::ConfigError::ReverseMapsRequireReverseEdges);
        }
        Ok(self)
    }

    pub fn reverse_edges(self) -> bool {
        self.contains(LoaderConfig::REVERSE_EDGES)
    }

    pub fn reverse_maps(self) -> bool {
        self.contains(LoaderConfig::REVERSE_MAPS)
    }

    pub fn sort_edges(self) -> bool {
        self.contains(LoaderConfig::SORT_EDGES)
    }

    pub fn copy_adj_list_on_deletion(self) -> bool {
        self.contains(LoaderConfig::COPY_ADJ_LIST_ON_DELETION)
    }
}

/// Build-time-ish feature set for one [`crate::csr::Mlcsr`] instance.
///
/// Spec §9 asks that "template-parameterized CSR variants" be re-expressed
/// as a single engine parameterized by a small enum-checked feature set
/// rather than a family of generic types. These are resolved once at
/// construction and never change afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsrFeatures {
    /// Maintain precomputed, cumulative per-node degree in every begin
    /// record (spec §3, "Begin record").
    pub precomputed_degree: bool,
    /// Enable soft deletion (`max_visible_level` on edge-table entries).
    pub soft_deletions: bool,
    /// Write continuation records inline at the tail of each node's
    /// new-edge run (spec §3, "Continuation record").
    pub continuations: bool,
}

impl Default for CsrFeatures {
    fn default() -> Self {
        Self {
            precomputed_degree: true,
            soft_deletions: false,
            continuations: true,
        }
    }
}

/// Configuration for the [`crate::page::PageManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageManagerConfig {
    /// Entries per page. Must be a power of two; spec §3 suggests 512.
    pub page_size: usize,
    /// Zero freshly-allocated pages before returning them to the caller.
    pub zero_init: bool,
}

impl PageManagerConfig {
    pub const DEFAULT_PAGE_SIZE: usize = 512;

    pub fn new(page_size: usize, zero_init: bool) -> Self {
        debug_assert!(page_size.is_power_of_two(), "page size must be a power of two");
        Self {
            page_size,
            zero_init,
        }
    }
}

impl Default for PageManagerConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PAGE_SIZE, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_maps_without_reverse_edges_is_rejected() {
        let cfg = LoaderConfig::REVERSE_MAPS;
        assert_eq!(
            cfg.validated(),
            Err(crate::error::ConfigError::ReverseMapsRequireReverseEdges)
        );
    }

    #[test]
    fn reverse_maps_with_reverse_edges_is_accepted() {
        let cfg = LoaderConfig::REVERSE_MAPS | LoaderConfig::REVERSE_EDGES;
        assert!(cfg.validated().is_ok());
    }
}
