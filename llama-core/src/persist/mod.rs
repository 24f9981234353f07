//! Optional page-backing persistence. Spec §6's "Persistent layout"
//! describes one legal backing, not a mandated one: the engine runs
//! perfectly well with pages that never outlive the process (the
//! `MemoryBacking` below, and in fact the page manager itself already
//! behaves this way). This module is for hosts that want one of their
//! graphs to survive a restart.
//!
//! Nothing in [`crate::page`] or [`crate::csr`] calls into a
//! [`PageBackingStrategy`] — a host wires one in explicitly (typically
//! from [`crate::graph::checkpoint::Checkpoint::run`]'s caller, after a
//! checkpoint commits) rather than the engine owning the choice.

#[cfg(feature = "persistence")]
mod file;

#[cfg(feature = "persistence")]
pub use file::FileBacking;

use crate::error::PersistError;

/// What a page backing must be able to do to a level's pages: write a
/// freshly allocated one, write a copy-on-write replacement, flush
/// whatever's buffered, and seal a level so no further writes under it
/// are expected. Spec §9's REDESIGN FLAGS calls for exactly this
/// capability set in place of "template-parameterized CSR variants."
pub trait PageBackingStrategy<T> {
    fn new_page(&self, context: &str, level: u32, page_index: u32, data: &[T]) -> Result<(), PersistError>;
    fn cow_page(&self, context: &str, level: u32, page_index: u32, data: &[T]) -> Result<(), PersistError>;
    fn persistent_sync(&self, context: &str) -> Result<(), PersistError>;
    fn finalize_region(&self, context: &str, level: u32) -> Result<(), PersistError>;
}

/// The default backing: every operation is a no-op, because the page
/// manager's own in-memory pages are already the source of truth.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryBacking;

impl<T> PageBackingStrategy<T> for MemoryBacking {
    fn new_page(&self, _context: &str, _level: u32, _page_index: u32, _data: &[T]) -> Result<(), PersistError> {
        Ok(())
    }

    fn cow_page(&self, _context: &str, _level: u32, _page_index: u32, _data: &[T]) -> Result<(), PersistError> {
        Ok(())
    }

    fn persistent_sync(&self, _context: &str) -> Result<(), PersistError> {
        Ok(())
    }

    fn finalize_region(&self, _context: &str, _level: u32) -> Result<(), PersistError> {
        Ok(())
    }
}

/// Context names name a file on disk and double as a namespace key; spec
/// §6 reserves `__` as the namespace/name/sequence separator, so it
/// cannot appear inside a single context's own name component.
pub(crate) fn validate_context_name(name: &str) -> Result<(), PersistError> {
    let valid = !name.is_empty()
        && !name.contains("__")
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(PersistError::InvalidContextName(name.to_string()))
    }
}
