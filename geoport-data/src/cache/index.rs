//! Persisted block index of an [`EntityStore`](super::EntityStore).

use std::collections::BTreeMap;

use bincode::{deserialize, serialize_into};
use camino::Utf8Path;
use cap_std::fs_utf8::Dir;
use serde::{Deserialize, Serialize};

use super::store::StoreError;

/// File identifier for persisted store indexes.
pub(crate) const INDEX_MAGIC: [u8; 4] = *b"GPIX";

/// Supported version of the persisted index format.
pub(crate) const INDEX_VERSION: u16 = 1;

pub(crate) const INDEX_FILE: &str = "index.bin";
const INDEX_TMP_FILE: &str = "index.bin.tmp";

/// A run of sequentially appended records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct BlockEntry {
    pub(crate) first_id: u64,
    pub(crate) last_id: u64,
    pub(crate) offset: u64,
    pub(crate) len: u64,
}

/// Location of a single-record block written in random-access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct BlockRef {
    pub(crate) offset: u64,
    pub(crate) len: u64,
}

/// Sparse block index plus the dense per-id index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StoreIndex {
    /// Sequential blocks ordered by `first_id`.
    pub(crate) blocks: Vec<BlockEntry>,
    /// Random-access writes; shadow any block entry for the same id.
    pub(crate) dense: BTreeMap<u64, BlockRef>,
    /// Bytes of `data.log` covered by the index.
    pub(crate) log_len: u64,
}

impl StoreIndex {
    /// Last block whose range may contain `id`.
    pub(crate) fn block_for(&self, id: u64) -> Option<&BlockEntry> {
        let upper = self.blocks.partition_point(|block| block.first_id <= id);
        let candidate = self.blocks.get(upper.checked_sub(1)?)?;
        (candidate.last_id >= id).then_some(candidate)
    }

    /// Highest id appended sequentially.
    pub(crate) fn last_sequential_id(&self) -> Option<u64> {
        self.blocks.last().map(|block| block.last_id)
    }
}

#[derive(Debug, Deserialize)]
struct IndexFile {
    magic: [u8; 4],
    version: u16,
    index: StoreIndex,
}

/// Encoding view of [`IndexFile`] borrowing the live index.
#[derive(Serialize)]
struct IndexFileRef<'a> {
    magic: [u8; 4],
    version: u16,
    index: &'a StoreIndex,
}

/// Read the index from `dir`, returning `None` when none was written yet.
pub(crate) fn read_index(dir: &Dir, path: &Utf8Path) -> Result<Option<StoreIndex>, StoreError> {
    let bytes = match dir.read(INDEX_FILE) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.join(INDEX_FILE),
                source,
            });
        }
    };

    let mut found = [0_u8; 4];
    for (slot, byte) in found.iter_mut().zip(&bytes) {
        *slot = *byte;
    }
    if bytes.len() < INDEX_MAGIC.len() || found != INDEX_MAGIC {
        return Err(StoreError::InvalidIndexMagic {
            path: path.join(INDEX_FILE),
            expected: INDEX_MAGIC,
            found,
        });
    }

    let file: IndexFile = deserialize(&bytes).map_err(|source| StoreError::IndexDecode {
        path: path.join(INDEX_FILE),
        source,
    })?;
    if file.version != INDEX_VERSION {
        return Err(StoreError::UnsupportedIndexVersion {
            path: path.join(INDEX_FILE),
            found: file.version,
            supported: INDEX_VERSION,
        });
    }
    Ok(Some(file.index))
}

/// Atomically replace the index in `dir`.
pub(crate) fn write_index(dir: &Dir, path: &Utf8Path, index: &StoreIndex) -> Result<(), StoreError> {
    let io_error = |source: std::io::Error| StoreError::Io {
        path: path.join(INDEX_FILE),
        source,
    };
    let mut file = dir.create(INDEX_TMP_FILE).map_err(io_error)?;
    let payload = IndexFileRef {
        magic: INDEX_MAGIC,
        version: INDEX_VERSION,
        index,
    };
    serialize_into(&mut file, &payload).map_err(|source| StoreError::Encode {
        path: path.join(INDEX_FILE),
        source,
    })?;
    file.sync_all().map_err(io_error)?;
    dir.rename(INDEX_TMP_FILE, dir, INDEX_FILE).map_err(io_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn block(first_id: u64, last_id: u64) -> BlockEntry {
        BlockEntry {
            first_id,
            last_id,
            offset: 0,
            len: 0,
        }
    }

    #[rstest]
    #[case(0, None)]
    #[case(1, Some(1))]
    #[case(7, Some(1))]
    #[case(8, None)]
    #[case(10, Some(10))]
    #[case(20, Some(20))]
    #[case(99, None)]
    fn block_lookup_picks_last_candidate(#[case] id: u64, #[case] expected_first: Option<u64>) {
        let index = StoreIndex {
            blocks: vec![block(1, 7), block(10, 20), block(20, 30)],
            ..StoreIndex::default()
        };
        assert_eq!(index.block_for(id).map(|b| b.first_id), expected_first);
    }
}
