//! Append-optimised `u64 → value` store backed by a block log.
//!
//! Values are bincode-encoded into blocks appended to `data.log`. Sequential
//! appends buffer many records per block and are indexed sparsely by id
//! range; random-access writes append one record per block and are indexed
//! densely. The index is persisted to `index.bin` when the store is closed
//! (or dropped).

use std::{
    collections::{BTreeMap, VecDeque, btree_map},
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write},
    iter::Peekable,
    sync::{Mutex, PoisonError},
};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs_utf8::Dir;
use log::{error, warn};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use super::index::{BlockEntry, BlockRef, StoreIndex, read_index, write_index};

pub(crate) const LOG_FILE: &str = "data.log";

/// Records buffered per sequential block unless overridden.
pub const DEFAULT_BLOCK_RECORDS: usize = 512;

/// Errors raised by [`EntityStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed at {path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode store data for {path}")]
    Encode {
        path: Utf8PathBuf,
        #[source]
        source: bincode::Error,
    },
    #[error("failed to decode block at offset {offset} of {path}")]
    BlockDecode {
        path: Utf8PathBuf,
        offset: u64,
        #[source]
        source: bincode::Error,
    },
    #[error("failed to decode store index {path}")]
    IndexDecode {
        path: Utf8PathBuf,
        #[source]
        source: bincode::Error,
    },
    #[error("invalid store index magic in {path}: expected {expected:?}, found {found:?}")]
    InvalidIndexMagic {
        path: Utf8PathBuf,
        expected: [u8; 4],
        found: [u8; 4],
    },
    #[error("unsupported store index version {found} in {path}; supported version is {supported}")]
    UnsupportedIndexVersion {
        path: Utf8PathBuf,
        found: u16,
        supported: u16,
    },
    /// The log holds fewer bytes than the index references.
    #[error("store log {path} is truncated: index expects {expected} bytes, found {found}")]
    Truncated {
        path: Utf8PathBuf,
        expected: u64,
        found: u64,
    },
    /// A sequential append went backwards.
    #[error("sequential append to {path} went backwards: id {id} after {last}")]
    NonMonotonicAppend { path: Utf8PathBuf, last: u64, id: u64 },
}

/// How writes are laid out in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Bulk load with non-decreasing ids, many records per block.
    Sequential,
    /// Arbitrary-order writes, one record per block.
    #[default]
    RandomAccess,
}

/// Tuning for an [`EntityStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub mode: AccessMode,
    /// Records buffered per sequential block.
    pub block_records: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            mode: AccessMode::default(),
            block_records: DEFAULT_BLOCK_RECORDS,
        }
    }
}

/// Persistent `u64 → T` store.
///
/// `get` and `iter` take `&self` and may run from several threads at once;
/// `put` takes `&mut self`, so the borrow checker keeps writers exclusive.
///
/// # Examples
/// ```
/// use camino::Utf8PathBuf;
/// use geoport_data::cache::{EntityStore, StoreOptions};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let tmp = tempfile::tempdir()?;
/// let path = Utf8PathBuf::from_path_buf(tmp.path().join("points")).expect("utf-8 path");
/// let mut store: EntityStore<String> = EntityStore::open(&path, StoreOptions::default())?;
/// store.put(7, "seven".to_owned())?;
/// assert_eq!(store.get(7)?, Some("seven".to_owned()));
/// store.close()?;
/// # Ok(())
/// # }
/// ```
pub struct EntityStore<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    path: Utf8PathBuf,
    dir: Dir,
    log: Mutex<File>,
    index: StoreIndex,
    pending: Vec<(u64, T)>,
    options: StoreOptions,
    closed: bool,
}

impl<T> std::fmt::Debug for EntityStore<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("path", &self.path)
            .field("mode", &self.options.mode)
            .field("blocks", &self.index.blocks.len())
            .field("dense", &self.index.dense.len())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl<T> EntityStore<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Whether a store directory exists at `path`.
    pub fn exists(path: &Utf8Path) -> Result<bool, StoreError> {
        geoport_fs::dir_exists(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Delete the store directory and everything in it.
    pub fn remove(path: &Utf8Path) -> Result<(), StoreError> {
        geoport_fs::remove_dir_all(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Open or create the store at `path`.
    pub fn open(path: &Utf8Path, options: StoreOptions) -> Result<Self, StoreError> {
        let io_error = |source: io::Error| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        geoport_fs::ensure_dir(path).map_err(io_error)?;
        let dir = geoport_fs::open_dir(path).map_err(io_error)?;
        let log = geoport_fs::open_read_write(&dir, LOG_FILE).map_err(|source| StoreError::Io {
            path: path.join(LOG_FILE),
            source,
        })?;
        let index = read_index(&dir, path)?.unwrap_or_default();
        reconcile_log_len(&log, &path.join(LOG_FILE), index.log_len)?;

        Ok(Self {
            path: path.to_path_buf(),
            dir,
            log: Mutex::new(log),
            index,
            pending: Vec::new(),
            options: StoreOptions {
                block_records: options.block_records.max(1),
                ..options
            },
            closed: false,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    #[must_use]
    pub fn mode(&self) -> AccessMode {
        self.options.mode
    }

    /// Whether the store holds no records at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.blocks.is_empty() && self.index.dense.is_empty() && self.pending.is_empty()
    }

    /// Switch access mode, flushing any pending sequential block first.
    pub fn set_mode(&mut self, mode: AccessMode) -> Result<(), StoreError> {
        self.flush()?;
        self.options.mode = mode;
        Ok(())
    }

    /// Store `value` under `id`, superseding any earlier value.
    pub fn put(&mut self, id: u64, value: T) -> Result<(), StoreError> {
        match self.options.mode {
            AccessMode::Sequential => self.put_sequential(id, value),
            AccessMode::RandomAccess => self.put_random(id, value),
        }
    }

    fn put_sequential(&mut self, id: u64, value: T) -> Result<(), StoreError> {
        let last = self
            .pending
            .last()
            .map(|(last, _)| *last)
            .or_else(|| self.index.last_sequential_id());
        if let Some(last) = last
            && id < last
        {
            return Err(StoreError::NonMonotonicAppend {
                path: self.path.clone(),
                last,
                id,
            });
        }
        self.index.dense.remove(&id);
        self.pending.push((id, value));
        if self.pending.len() >= self.options.block_records {
            self.flush()?;
        }
        Ok(())
    }

    fn put_random(&mut self, id: u64, value: T) -> Result<(), StoreError> {
        let record = (id, value);
        let block = self.append_block(std::slice::from_ref(&record))?;
        self.index.dense.insert(id, block);
        Ok(())
    }

    /// Write the pending sequential block, if any.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        let (Some(first), Some(last)) = (self.pending.first(), self.pending.last()) else {
            return Ok(());
        };
        let (first_id, last_id) = (first.0, last.0);
        let records = std::mem::take(&mut self.pending);
        let block = self.append_block(&records)?;
        self.index.blocks.push(BlockEntry {
            first_id,
            last_id,
            offset: block.offset,
            len: block.len,
        });
        Ok(())
    }

    fn append_block(&mut self, records: &[(u64, T)]) -> Result<BlockRef, StoreError> {
        let bytes = bincode::serialize(records).map_err(|source| StoreError::Encode {
            path: self.path.join(LOG_FILE),
            source,
        })?;
        let offset = self.index.log_len;
        let log_path = self.path.join(LOG_FILE);
        let log = self.log.get_mut().unwrap_or_else(PoisonError::into_inner);
        log.seek(SeekFrom::Start(offset))
            .and_then(|_| log.write_all(&bytes))
            .map_err(|source| StoreError::Io {
                path: log_path,
                source,
            })?;
        let len = bytes.len() as u64;
        self.index.log_len += len;
        Ok(BlockRef { offset, len })
    }

    /// Latest value stored under `id`.
    pub fn get(&self, id: u64) -> Result<Option<T>, StoreError> {
        if let Some((_, value)) = self.pending.iter().rev().find(|(pending, _)| *pending == id) {
            return Ok(Some(value.clone()));
        }
        let location = if let Some(block) = self.index.dense.get(&id) {
            *block
        } else if let Some(block) = self.index.block_for(id) {
            BlockRef {
                offset: block.offset,
                len: block.len,
            }
        } else {
            return Ok(None);
        };

        let records: Vec<(u64, T)> = {
            let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
            read_block(&mut log, &self.path, location)?
        };
        Ok(records
            .into_iter()
            .rev()
            .find_map(|(record, value)| (record == id).then_some(value)))
    }

    /// Lazily iterate every id in ascending order with its latest value.
    ///
    /// Each call opens its own log handle, so iteration never blocks `get`.
    pub fn iter(&self) -> Result<StoreIter<'_, T>, StoreError> {
        let log = geoport_fs::open_read(&self.dir, LOG_FILE).map_err(|source| StoreError::Io {
            path: self.path.join(LOG_FILE),
            source,
        })?;
        Ok(StoreIter {
            store_path: &self.path,
            log,
            blocks: self.index.blocks.iter(),
            pending: Some(&self.pending),
            buffered: VecDeque::new(),
            dense: self.index.dense.iter().peekable(),
            shadowed: &self.index.dense,
            failed: false,
        })
    }

    /// Flush pending data, sync the log and persist the index, keeping the
    /// store open.
    pub fn sync(&mut self) -> Result<(), StoreError> {
        self.persist()
    }

    /// Flush pending data, sync the log and persist the index.
    pub fn close(mut self) -> Result<(), StoreError> {
        let result = self.persist();
        self.closed = true;
        result
    }

    fn persist(&mut self) -> Result<(), StoreError> {
        self.flush()?;
        let log_path = self.path.join(LOG_FILE);
        self.log
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .sync_all()
            .map_err(|source| StoreError::Io {
                path: log_path,
                source,
            })?;
        write_index(&self.dir, &self.path, &self.index)
    }
}

impl<T> Drop for EntityStore<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.persist() {
            error!("Failed to persist store {} on drop: {err}", self.path);
        }
    }
}

fn reconcile_log_len(log: &File, path: &Utf8Path, expected: u64) -> Result<(), StoreError> {
    let found = log
        .metadata()
        .map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .len();
    if found < expected {
        return Err(StoreError::Truncated {
            path: path.to_path_buf(),
            expected,
            found,
        });
    }
    if found > expected {
        warn!(
            "Discarding {} unindexed trailing byte(s) of {path}",
            found - expected
        );
        log.set_len(expected).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

fn read_block<T: DeserializeOwned>(
    log: &mut File,
    store_path: &Utf8Path,
    location: BlockRef,
) -> Result<Vec<(u64, T)>, StoreError> {
    let log_path = store_path.join(LOG_FILE);
    let len = usize::try_from(location.len).map_err(|_| StoreError::Truncated {
        path: log_path.clone(),
        expected: location.offset.saturating_add(location.len),
        found: location.offset,
    })?;
    let mut bytes = vec![0_u8; len];
    log.seek(SeekFrom::Start(location.offset))
        .and_then(|_| log.read_exact(&mut bytes))
        .map_err(|source| StoreError::Io {
            path: log_path.clone(),
            source,
        })?;
    bincode::deserialize(&bytes).map_err(|source| StoreError::BlockDecode {
        path: log_path,
        offset: location.offset,
        source,
    })
}

/// Ascending iterator over an [`EntityStore`].
///
/// Dense entries shadow block entries with the same id, and repeated ids
/// within the block stream collapse to their last value.
pub struct StoreIter<'a, T> {
    store_path: &'a Utf8Path,
    log: File,
    blocks: std::slice::Iter<'a, BlockEntry>,
    pending: Option<&'a [(u64, T)]>,
    buffered: VecDeque<(u64, T)>,
    dense: Peekable<btree_map::Iter<'a, u64, BlockRef>>,
    shadowed: &'a BTreeMap<u64, BlockRef>,
    failed: bool,
}

impl<T> StoreIter<'_, T>
where
    T: DeserializeOwned + Clone,
{
    /// Refill the block buffer until it holds a record or the stream ends.
    fn fill(&mut self) -> Result<(), StoreError> {
        while self.buffered.is_empty() {
            if let Some(block) = self.blocks.next() {
                let location = BlockRef {
                    offset: block.offset,
                    len: block.len,
                };
                let records = read_block(&mut self.log, self.store_path, location)?;
                self.buffered.extend(records);
            } else if let Some(pending) = self.pending.take() {
                self.buffered.extend(pending.iter().cloned());
            } else {
                return Ok(());
            }
        }
        Ok(())
    }

    fn peek_block_id(&mut self) -> Result<Option<u64>, StoreError> {
        loop {
            self.fill()?;
            match self.buffered.front() {
                Some((id, _)) if self.shadowed.contains_key(id) => {
                    self.buffered.pop_front();
                }
                Some((id, _)) => return Ok(Some(*id)),
                None => return Ok(None),
            }
        }
    }

    /// Pop the next block record, keeping the last of any run of equal ids.
    fn next_block_record(&mut self) -> Result<Option<(u64, T)>, StoreError> {
        let Some(mut current) = self.buffered.pop_front() else {
            return Ok(None);
        };
        loop {
            self.fill()?;
            match self.buffered.front() {
                Some((id, _)) if *id == current.0 => {
                    if let Some(newer) = self.buffered.pop_front() {
                        current = newer;
                    }
                }
                _ => return Ok(Some(current)),
            }
        }
    }

    fn next_dense_record(&mut self) -> Result<Option<(u64, T)>, StoreError> {
        let Some((id, location)) = self.dense.next() else {
            return Ok(None);
        };
        let records: Vec<(u64, T)> = read_block(&mut self.log, self.store_path, *location)?;
        Ok(records
            .into_iter()
            .rev()
            .find(|(record, _)| record == id))
    }

    fn advance(&mut self) -> Result<Option<(u64, T)>, StoreError> {
        let block_id = self.peek_block_id()?;
        let dense_id = self.dense.peek().map(|(id, _)| **id);
        match (block_id, dense_id) {
            (Some(block), Some(dense)) if block < dense => self.next_block_record(),
            (Some(_), None) => self.next_block_record(),
            (_, Some(_)) => self.next_dense_record(),
            (None, None) => Ok(None),
        }
    }
}

impl<T> Iterator for StoreIter<'_, T>
where
    T: DeserializeOwned + Clone,
{
    type Item = Result<(u64, T), StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.advance() {
            Ok(record) => record.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn scratch() -> TempDir {
        tempfile::tempdir().expect("create temp dir")
    }

    fn store_path(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join("store")).expect("utf-8 temp path")
    }

    fn options(mode: AccessMode, block_records: usize) -> StoreOptions {
        StoreOptions {
            mode,
            block_records,
        }
    }

    fn collect(store: &EntityStore<String>) -> Vec<(u64, String)> {
        store
            .iter()
            .expect("open iterator")
            .collect::<Result<_, _>>()
            .expect("iterate store")
    }

    #[rstest]
    #[case(AccessMode::Sequential)]
    #[case(AccessMode::RandomAccess)]
    fn put_then_get_round_trips(scratch: TempDir, #[case] mode: AccessMode) {
        let mut store = EntityStore::open(&store_path(&scratch), options(mode, 2)).expect("open");
        for id in [1_u64, 2, 3, 5, 8] {
            store.put(id, format!("v{id}")).expect("put");
        }
        assert_eq!(store.get(5).expect("get"), Some("v5".to_owned()));
        assert_eq!(store.get(4).expect("get"), None);
        let ids: Vec<u64> = collect(&store).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, [1, 2, 3, 5, 8]);
    }

    #[rstest]
    fn sequential_accepts_equal_ids_and_rejects_lower(scratch: TempDir) {
        let mut store: EntityStore<String> =
            EntityStore::open(&store_path(&scratch), options(AccessMode::Sequential, 2))
                .expect("open");
        store.put(3, "a".into()).expect("first");
        store.put(3, "b".into()).expect("equal id");
        store.put(4, "c".into()).expect("higher id");
        match store.put(2, "d".into()) {
            Err(StoreError::NonMonotonicAppend { last, id, .. }) => {
                assert_eq!((last, id), (4, 2));
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(store.get(3).expect("get"), Some("b".to_owned()));
    }

    #[rstest]
    fn random_writes_shadow_sequential_blocks(scratch: TempDir) {
        let mut store: EntityStore<String> =
            EntityStore::open(&store_path(&scratch), options(AccessMode::Sequential, 3))
                .expect("open");
        for id in 1..=6 {
            store.put(id, format!("old{id}")).expect("put");
        }
        store.set_mode(AccessMode::RandomAccess).expect("switch mode");
        store.put(4, "new4".into()).expect("overwrite");
        store.put(9, "new9".into()).expect("append");

        assert_eq!(store.get(4).expect("get"), Some("new4".to_owned()));
        let values = collect(&store);
        assert_eq!(values.len(), 7);
        assert_eq!(values.get(3), Some(&(4, "new4".to_owned())));
        assert_eq!(values.last(), Some(&(9, "new9".to_owned())));
    }

    #[rstest]
    fn repeated_ids_across_blocks_keep_last_value(scratch: TempDir) {
        let mut store: EntityStore<String> =
            EntityStore::open(&store_path(&scratch), options(AccessMode::Sequential, 2))
                .expect("open");
        for (id, value) in [(1, "a"), (2, "b"), (2, "c"), (2, "d"), (3, "e")] {
            store.put(id, value.into()).expect("put");
        }
        assert_eq!(store.get(2).expect("get"), Some("d".to_owned()));
        assert_eq!(
            collect(&store),
            [(1, "a".to_owned()), (2, "d".to_owned()), (3, "e".to_owned())]
        );
    }

    #[rstest]
    fn pending_records_are_visible_before_flush(scratch: TempDir) {
        let mut store: EntityStore<String> =
            EntityStore::open(&store_path(&scratch), options(AccessMode::Sequential, 100))
                .expect("open");
        store.put(1, "one".into()).expect("put");
        assert_eq!(store.get(1).expect("get"), Some("one".to_owned()));
        assert_eq!(collect(&store), [(1, "one".to_owned())]);
    }

    #[rstest]
    fn iteration_is_restartable(scratch: TempDir) {
        let mut store = EntityStore::open(&store_path(&scratch), StoreOptions::default())
            .expect("open");
        store.put(2, "two".to_owned()).expect("put");
        store.put(1, "one".to_owned()).expect("put");
        assert_eq!(collect(&store), collect(&store));
        assert_eq!(collect(&store).first(), Some(&(1, "one".to_owned())));
    }

    #[rstest]
    fn closed_store_reopens_with_data(scratch: TempDir) {
        let path = store_path(&scratch);
        let mut store = EntityStore::open(&path, options(AccessMode::Sequential, 4))
            .expect("open");
        for id in 0..10 {
            store.put(id, format!("v{id}")).expect("put");
        }
        store.close().expect("close");

        assert!(EntityStore::<String>::exists(&path).expect("exists"));
        let reopened: EntityStore<String> =
            EntityStore::open(&path, StoreOptions::default()).expect("reopen");
        assert_eq!(reopened.get(9).expect("get"), Some("v9".to_owned()));
        assert_eq!(collect(&reopened).len(), 10);
    }

    #[rstest]
    fn dropped_store_persists_index(scratch: TempDir) {
        let path = store_path(&scratch);
        {
            let mut store = EntityStore::open(&path, StoreOptions::default()).expect("open");
            store.put(42, "answer".to_owned()).expect("put");
        }
        let reopened: EntityStore<String> =
            EntityStore::open(&path, StoreOptions::default()).expect("reopen");
        assert_eq!(reopened.get(42).expect("get"), Some("answer".to_owned()));
    }

    #[rstest]
    fn rejects_truncated_log(scratch: TempDir) {
        let path = store_path(&scratch);
        let mut store = EntityStore::open(&path, StoreOptions::default()).expect("open");
        store.put(1, "one".to_owned()).expect("put");
        store.close().expect("close");
        std::fs::write(path.join(LOG_FILE), b"").expect("truncate log");

        match EntityStore::<String>::open(&path, StoreOptions::default()) {
            Err(StoreError::Truncated { found, .. }) => assert_eq!(found, 0),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[rstest]
    fn rejects_foreign_index(scratch: TempDir) {
        let path = store_path(&scratch);
        EntityStore::<String>::open(&path, StoreOptions::default())
            .expect("open")
            .close()
            .expect("close");
        std::fs::write(path.join(crate::cache::index::INDEX_FILE), b"NOPE....").expect("clobber");

        match EntityStore::<String>::open(&path, StoreOptions::default()) {
            Err(StoreError::InvalidIndexMagic { found, .. }) => assert_eq!(&found, b"NOPE"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[rstest]
    fn remove_deletes_directory(scratch: TempDir) {
        let path = store_path(&scratch);
        EntityStore::<String>::open(&path, StoreOptions::default())
            .expect("open")
            .close()
            .expect("close");
        EntityStore::<String>::remove(&path).expect("remove");
        assert!(!EntityStore::<String>::exists(&path).expect("exists"));
    }
}
