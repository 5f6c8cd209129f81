//! Coordinate dependency log for incremental updates.
//!
//! While resolving, the write pass records which primitives depend on each
//! coordinate. A later incremental pass consumes the entries for changed
//! coordinates and recomputes only the affected rows.
//!
//! Entries live in an [`EntityStore`] under `<diff>/coords`. Fresh records
//! collect in a bounded buffer that is merged into the store once
//! [`PENDING_COORDS`] coordinates are waiting, and before every read.

use std::{
    collections::{BTreeMap, BTreeSet},
    io, mem,
    sync::{Mutex, MutexGuard, PoisonError},
};

use camino::{Utf8Path, Utf8PathBuf};
use geoport_core::ElementRef;
use log::error;
use thiserror::Error;

use super::store::{EntityStore, StoreError, StoreOptions};

const COORDS_STORE: &str = "coords";

/// Coordinates buffered in memory before they are merged into the store.
pub const PENDING_COORDS: usize = 16_384;

/// Sorted, deduplicated dependents of one coordinate. Empty once taken.
type Dependents = Vec<ElementRef>;

/// Errors raised by [`DiffLog`].
#[derive(Debug, Error)]
pub enum DiffLogError {
    #[error("diff log I/O failed at {path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("diff log store failed")]
    Store(#[from] StoreError),
}

#[derive(Debug)]
struct Entries {
    store: EntityStore<Dependents>,
    pending: BTreeMap<u64, BTreeSet<ElementRef>>,
    limit: usize,
}

impl Entries {
    fn record(&mut self, coord_id: u64, dependent: ElementRef) -> Result<(), StoreError> {
        self.pending.entry(coord_id).or_default().insert(dependent);
        if self.pending.len() >= self.limit {
            self.merge()?;
        }
        Ok(())
    }

    /// Fold buffered records into the store. Unchanged entries are not
    /// rewritten.
    fn merge(&mut self) -> Result<(), StoreError> {
        for (coord_id, recorded) in mem::take(&mut self.pending) {
            let mut dependents = self.store.get(coord_id)?.unwrap_or_default();
            let known = dependents.len();
            for dependent in recorded {
                if let Err(at) = dependents.binary_search(&dependent) {
                    dependents.insert(at, dependent);
                }
            }
            if dependents.len() != known {
                self.store.put(coord_id, dependents)?;
            }
        }
        Ok(())
    }
}

/// Deduplicated map from coordinate id to dependent primitives.
///
/// Recording takes `&self`, so resolver threads can share one log.
#[derive(Debug)]
pub struct DiffLog {
    path: Utf8PathBuf,
    entries: Mutex<Entries>,
    closed: bool,
}

impl DiffLog {
    pub fn exists(path: &Utf8Path) -> Result<bool, DiffLogError> {
        geoport_fs::dir_exists(path).map_err(|source| DiffLogError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn remove(path: &Utf8Path) -> Result<(), DiffLogError> {
        geoport_fs::remove_dir_all(path).map_err(|source| DiffLogError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Open the log at `path`, keeping previously persisted entries.
    pub fn open(path: &Utf8Path) -> Result<Self, DiffLogError> {
        Self::open_with_limit(path, PENDING_COORDS)
    }

    /// Open the log, merging buffered records once `limit` coordinates are
    /// waiting.
    pub fn open_with_limit(path: &Utf8Path, limit: usize) -> Result<Self, DiffLogError> {
        geoport_fs::ensure_dir(path).map_err(|source| DiffLogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let store = EntityStore::open(&path.join(COORDS_STORE), StoreOptions::default())?;
        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(Entries {
                store,
                pending: BTreeMap::new(),
                limit: limit.max(1),
            }),
            closed: false,
        })
    }

    /// Record that `dependent` uses coordinate `coord_id`.
    pub fn record_coord(&self, coord_id: u64, dependent: ElementRef) -> Result<(), StoreError> {
        self.lock().record(coord_id, dependent)
    }

    /// Recorded coordinate ids in ascending order.
    pub fn coord_ids(&self) -> Result<Vec<u64>, StoreError> {
        let mut entries = self.lock();
        entries.merge()?;
        let mut ids = Vec::new();
        for entry in entries.store.iter()? {
            let (coord_id, dependents) = entry?;
            if !dependents.is_empty() {
                ids.push(coord_id);
            }
        }
        Ok(ids)
    }

    /// Primitives depending on `coord_id`.
    pub fn dependents_of(&self, coord_id: u64) -> Result<Vec<ElementRef>, StoreError> {
        let mut entries = self.lock();
        entries.merge()?;
        Ok(entries.store.get(coord_id)?.unwrap_or_default())
    }

    /// Remove the entries for `coord_ids`, returning the union of their
    /// dependents.
    pub fn take_dependents<I>(&self, coord_ids: I) -> Result<BTreeSet<ElementRef>, StoreError>
    where
        I: IntoIterator<Item = u64>,
    {
        let mut entries = self.lock();
        entries.merge()?;
        let mut taken = BTreeSet::new();
        for coord_id in coord_ids {
            match entries.store.get(coord_id)? {
                Some(dependents) if !dependents.is_empty() => {
                    taken.extend(dependents);
                    entries.store.put(coord_id, Vec::new())?;
                }
                _ => {}
            }
        }
        Ok(taken)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.coord_ids()?.is_empty())
    }

    /// Persist the entries and release the log.
    pub fn close(mut self) -> Result<(), DiffLogError> {
        let result = self.persist();
        self.closed = true;
        result
    }

    fn persist(&mut self) -> Result<(), DiffLogError> {
        let entries = self
            .entries
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        entries.merge()?;
        entries.store.sync()?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DiffLog {
    fn drop(&mut self) {
        if !self.closed
            && let Err(err) = self.persist()
        {
            error!("Failed to persist diff log {} on drop: {err}", self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::index::INDEX_FILE;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn diff_dir() -> (TempDir, Utf8PathBuf) {
        let tmp = tempfile::tempdir().expect("create temp dir");
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("diff")).expect("utf-8 path");
        (tmp, path)
    }

    #[rstest]
    fn repeated_records_are_deduplicated(diff_dir: (TempDir, Utf8PathBuf)) {
        let (_tmp, path) = diff_dir;
        let log = DiffLog::open(&path).expect("open");
        log.record_coord(5, ElementRef::line(1)).expect("record");
        log.record_coord(5, ElementRef::line(1)).expect("record");
        log.record_coord(5, ElementRef::line(2)).expect("record");
        log.record_coord(3, ElementRef::line(2)).expect("record");
        assert_eq!(log.coord_ids().expect("ids"), [3, 5]);
        assert_eq!(
            log.dependents_of(5).expect("dependents"),
            [ElementRef::line(1), ElementRef::line(2)]
        );
    }

    #[rstest]
    fn records_spill_into_the_store_past_the_limit(diff_dir: (TempDir, Utf8PathBuf)) {
        let (_tmp, path) = diff_dir;
        let log = DiffLog::open_with_limit(&path, 2).expect("open");
        for coord_id in 1..=5 {
            log.record_coord(coord_id, ElementRef::line(10))
                .expect("record");
        }
        assert!(log.lock().pending.len() < 2, "buffer exceeded its limit");
        log.record_coord(1, ElementRef::line(10)).expect("record");
        log.record_coord(1, ElementRef::relation(20)).expect("record");

        assert_eq!(log.coord_ids().expect("ids"), [1, 2, 3, 4, 5]);
        assert_eq!(
            log.dependents_of(1).expect("dependents"),
            [ElementRef::line(10), ElementRef::relation(20)]
        );
    }

    #[rstest]
    fn take_dependents_consumes_entries(diff_dir: (TempDir, Utf8PathBuf)) {
        let (_tmp, path) = diff_dir;
        let log = DiffLog::open(&path).expect("open");
        log.record_coord(1, ElementRef::line(10)).expect("record");
        log.record_coord(2, ElementRef::line(10)).expect("record");
        log.record_coord(2, ElementRef::relation(20)).expect("record");
        log.record_coord(3, ElementRef::line(30)).expect("record");

        let taken = log.take_dependents([1, 2, 99]).expect("take");
        assert_eq!(
            taken.into_iter().collect::<Vec<_>>(),
            [ElementRef::line(10), ElementRef::relation(20)]
        );
        assert_eq!(log.coord_ids().expect("ids"), [3]);
        assert!(log.dependents_of(1).expect("dependents").is_empty());
    }

    #[rstest]
    fn entries_survive_reopen(diff_dir: (TempDir, Utf8PathBuf)) {
        let (_tmp, path) = diff_dir;
        let log = DiffLog::open(&path).expect("open");
        log.record_coord(7, ElementRef::line(1)).expect("record");
        log.close().expect("close");

        let reopened = DiffLog::open(&path).expect("reopen");
        assert_eq!(
            reopened.dependents_of(7).expect("dependents"),
            [ElementRef::line(1)]
        );
    }

    #[rstest]
    fn dropped_log_keeps_buffered_records(diff_dir: (TempDir, Utf8PathBuf)) {
        let (_tmp, path) = diff_dir;
        {
            let log = DiffLog::open(&path).expect("open");
            log.record_coord(7, ElementRef::line(1)).expect("record");
        }
        let reopened = DiffLog::open(&path).expect("reopen");
        assert_eq!(reopened.coord_ids().expect("ids"), [7]);
    }

    #[rstest]
    fn remove_then_open_starts_empty(diff_dir: (TempDir, Utf8PathBuf)) {
        let (_tmp, path) = diff_dir;
        {
            let log = DiffLog::open(&path).expect("open");
            log.record_coord(7, ElementRef::line(1)).expect("record");
        }
        DiffLog::remove(&path).expect("remove");
        assert!(!DiffLog::exists(&path).expect("exists"));
        assert!(DiffLog::open(&path).expect("reopen").is_empty().expect("is_empty"));
    }

    #[rstest]
    fn rejects_foreign_index(diff_dir: (TempDir, Utf8PathBuf)) {
        let (_tmp, path) = diff_dir;
        let store = path.join(COORDS_STORE);
        geoport_fs::ensure_dir(&store).expect("create dir");
        std::fs::write(store.join(INDEX_FILE), b"JUNKJUNK").expect("write junk");
        match DiffLog::open(&path) {
            Err(DiffLogError::Store(StoreError::InvalidIndexMagic { found, .. })) => {
                assert_eq!(&found, b"JUNK");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }
}
