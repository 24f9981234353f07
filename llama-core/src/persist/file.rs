//! The file-backed [`super::PageBackingStrategy`]: one directory per
//! database, one file per named context, a fixed header and level-index
//! table followed by an append-only region of chunk descriptors and page
//! payloads aligned to a 4 KiB block. Spec §6.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::PersistError;

use super::{validate_context_name, PageBackingStrategy};

const MAGIC: &[u8; 8] = b"LLAMAFB1";
const BLOCK: u64 = 4096;
const DEFAULT_LEVEL_SLOTS_LOG2: u32 = 16; // up to 65536 levels indexed directly.

#[derive(Debug, Serialize, Deserialize)]
struct ChunkDescriptor {
    owning_level: u32,
    page_index: u32,
    offset: u64,
    length: u64,
    sealed: bool,
}

fn round_up_to_block(n: u64) -> u64 {
    (n + BLOCK - 1) / BLOCK * BLOCK
}

struct OpenContext {
    file: File,
    /// Byte offset of the level-index table (fixed-size, one `u64` per
    /// level slot: the offset of that level's most recent chunk).
    index_table_offset: u64,
    level_slots: u64,
    /// Growing append cursor, always block-aligned.
    append_cursor: u64,
}

/// Context names are validated against `[A-Za-z0-9_-]+` with `__`
/// reserved as a separator (spec §6); a sidecar `<context>.meta` file may
/// carry caller-supplied header metadata serialized with `bincode`.
pub struct FileBacking {
    root: PathBuf,
    contexts: Mutex<HashMap<String, OpenContext>>,
}

impl FileBacking {
    pub fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, contexts: Mutex::new(HashMap::new()) })
    }

    fn context_path(&self, context: &str) -> PathBuf {
        self.root.join(format!("{context}.llama"))
    }

    /// Writes the sidecar metadata file for `context`, `bincode`-encoding
    /// whatever caller-supplied header `meta` is (e.g. a property's type
    /// tag).
    pub fn write_sidecar_meta<M: Serialize>(&self, context: &str, meta: &M) -> Result<(), PersistError> {
        validate_context_name(context)?;
        let path = self.root.join(format!("{context}.meta"));
        let bytes = bincode::serialize(meta)?;
        std::fs::write(&path, bytes).map_err(|source| PersistError::Io { context: context.to_string(), source })
    }

    fn open_or_create(&self, context: &str) -> Result<(), PersistError> {
        validate_context_name(context)?;
        let mut contexts = self.contexts.lock().unwrap();
        if contexts.contains_key(context) {
            return Ok(());
        }
        let path = self.context_path(context);
        let existed = path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|source| PersistError::Io { context: context.to_string(), source })?;

        let level_slots = 1u64 << DEFAULT_LEVEL_SLOTS_LOG2;
        let index_table_offset = round_up_to_block(MAGIC.len() as u64 + 8);
        let table_bytes = level_slots * 8;
        let append_cursor = round_up_to_block(index_table_offset + table_bytes);

        if !existed {
            file.write_all(MAGIC).map_err(|source| io_err(context, source))?;
            file.write_all(&level_slots.to_le_bytes())
                .map_err(|source| io_err(context, source))?;
            file.set_len(append_cursor).map_err(|source| io_err(context, source))?;
        }

        contexts.insert(
            context.to_string(),
            OpenContext { file, index_table_offset, level_slots, append_cursor },
        );
        Ok(())
    }

    fn record_chunk<T: Serialize>(
        &self,
        context: &str,
        level: u32,
        page_index: u32,
        data: &[T],
    ) -> Result<(), PersistError> {
        self.open_or_create(context)?;
        let mut contexts = self.contexts.lock().unwrap();
        let ctx = contexts.get_mut(context).expect("just opened");

        if level as u64 >= ctx.level_slots {
            return Err(PersistError::CorruptFormat {
                context: context.to_string(),
                reason: format!("level {level} exceeds the file's indexed capacity of {}", ctx.level_slots),
            });
        }

        let payload = bincode::serialize(data)?;
        let descriptor = ChunkDescriptor {
            owning_level: level,
            page_index,
            offset: ctx.append_cursor + 4096,
            length: payload.len() as u64,
            sealed: false,
        };
        let descriptor_bytes = bincode::serialize(&descriptor)?;

        let chunk_offset = ctx.append_cursor;
        let payload_offset = chunk_offset + BLOCK;
        let next_cursor = round_up_to_block(payload_offset + payload.len() as u64);

        ctx.file
            .seek(SeekFrom::Start(chunk_offset))
            .map_err(|source| io_err(context, source))?;
        ctx.file.write_all(&descriptor_bytes).map_err(|source| io_err(context, source))?;
        ctx.file
            .seek(SeekFrom::Start(payload_offset))
            .map_err(|source| io_err(context, source))?;
        ctx.file.write_all(&payload).map_err(|source| io_err(context, source))?;

        let slot_offset = ctx.index_table_offset + level as u64 * 8;
        ctx.file
            .seek(SeekFrom::Start(slot_offset))
            .map_err(|source| io_err(context, source))?;
        ctx.file
            .write_all(&chunk_offset.to_le_bytes())
            .map_err(|source| io_err(context, source))?;

        ctx.append_cursor = next_cursor;
        Ok(())
    }
}

fn io_err(context: &str, source: std::io::Error) -> PersistError {
    PersistError::Io { context: context.to_string(), source }
}

impl<T: Serialize> PageBackingStrategy<T> for FileBacking {
    fn new_page(&self, context: &str, level: u32, page_index: u32, data: &[T]) -> Result<(), PersistError> {
        self.record_chunk(context, level, page_index, data)
    }

    fn cow_page(&self, context: &str, level: u32, page_index: u32, data: &[T]) -> Result<(), PersistError> {
        // A cow'd page is just a new chunk at the new level; the old
        // chunk is left in place as history, same as the in-memory engine
        // leaves the old page alive under its own refcount.
        self.record_chunk(context, level, page_index, data)
    }

    fn persistent_sync(&self, context: &str) -> Result<(), PersistError> {
        self.sync(context)
    }

    fn finalize_region(&self, context: &str, level: u32) -> Result<(), PersistError> {
        self.record_chunk::<u8>(context, level, u32::MAX, &[])?;
        self.sync(context)
    }
}

impl FileBacking {
    fn sync(&self, context: &str) -> Result<(), PersistError> {
        self.open_or_create(context)?;
        let mut contexts = self.contexts.lock().unwrap();
        let ctx = contexts.get_mut(context).expect("just opened");
        ctx.file.sync_all().map_err(|source| io_err(context, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile_free_tests::temp_dir;

    mod tempfile_free_tests {
        use std::path::PathBuf;
        use std::sync::atomic::{AtomicU32, Ordering};

        static COUNTER: AtomicU32 = AtomicU32::new(0);

        pub fn temp_dir() -> PathBuf {
            let n = COUNTER.fetch_add(1, Ordering::Relaxed);
            let dir = std::env::temp_dir().join(format!("llama-core-persist-test-{}-{n}", std::process::id()));
            dir
        }
    }

    #[test]
    fn rejects_invalid_context_names() {
        let backing = FileBacking::open(temp_dir()).unwrap();
        let err = PageBackingStrategy::<i64>::new_page(&backing, "bad__name", 0, 0, &[1i64]).unwrap_err();
        assert!(matches!(err, PersistError::InvalidContextName(_)));
    }

    #[test]
    fn writes_a_page_and_syncs_without_error() {
        let backing = FileBacking::open(temp_dir()).unwrap();
        PageBackingStrategy::<i64>::new_page(&backing, "pagerank", 0, 0, &[1i64, 2, 3, 4]).unwrap();
        PageBackingStrategy::<i64>::cow_page(&backing, "pagerank", 1, 0, &[1i64, 2, 3, 9]).unwrap();
        PageBackingStrategy::<i64>::persistent_sync(&backing, "pagerank").unwrap();
        PageBackingStrategy::<i64>::finalize_region(&backing, "pagerank", 1).unwrap();
    }

    #[test]
    fn rejects_levels_beyond_the_indexed_capacity() {
        let backing = FileBacking::open(temp_dir()).unwrap();
        let huge_level = 1u32 << DEFAULT_LEVEL_SLOTS_LOG2;
        let err = PageBackingStrategy::<i64>::new_page(&backing, "overflow", huge_level, 0, &[1i64]).unwrap_err();
        assert!(matches!(err, PersistError::CorruptFormat { .. }));
    }
}
