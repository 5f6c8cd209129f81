//! On-disk entity cache shared by the read and write passes.
//!
//! Layout under the cache directory:
//!
//! ```text
//! <cachedir>/coords/     packed node coordinates
//! <cachedir>/points/     tagged nodes
//! <cachedir>/lines/      ways
//! <cachedir>/relations/  relations
//! <cachedir>/diff/       coordinate dependency log
//! ```
//!
//! The presence of the cache directory signals an existing cache.

mod diff;
mod index;
mod store;

use camino::{Utf8Path, Utf8PathBuf};
use geoport_core::{Line, PackedCoord, Point, Relation};
use log::info;
use thiserror::Error;

pub use diff::{DiffLog, DiffLogError, PENDING_COORDS};
pub use store::{
    AccessMode, DEFAULT_BLOCK_RECORDS, EntityStore, StoreError, StoreIter, StoreOptions,
};

/// Errors raised while managing the cache directory.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache directory {path} could not be inspected")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Diff(#[from] DiffLogError),
}

/// Paths of the stores inside a cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    root: Utf8PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    #[must_use]
    pub fn coords(&self) -> Utf8PathBuf {
        self.root.join("coords")
    }

    #[must_use]
    pub fn points(&self) -> Utf8PathBuf {
        self.root.join("points")
    }

    #[must_use]
    pub fn lines(&self) -> Utf8PathBuf {
        self.root.join("lines")
    }

    #[must_use]
    pub fn relations(&self) -> Utf8PathBuf {
        self.root.join("relations")
    }

    #[must_use]
    pub fn diff(&self) -> Utf8PathBuf {
        self.root.join("diff")
    }
}

/// The four primitive stores of a cache directory.
///
/// Fields are public so pipeline stages can borrow stores independently.
#[derive(Debug)]
pub struct OsmCache {
    layout: CacheLayout,
    pub coords: EntityStore<PackedCoord>,
    pub points: EntityStore<Point>,
    pub lines: EntityStore<Line>,
    pub relations: EntityStore<Relation>,
}

impl OsmCache {
    /// Whether a cache directory exists at `root`.
    pub fn exists(root: &Utf8Path) -> Result<bool, CacheError> {
        geoport_fs::dir_exists(root).map_err(|source| CacheError::Io {
            path: root.to_path_buf(),
            source,
        })
    }

    /// Delete the cache directory, including the diff log.
    pub fn remove(root: &Utf8Path) -> Result<(), CacheError> {
        info!("Removing cache {root}");
        geoport_fs::remove_dir_all(root).map_err(|source| CacheError::Io {
            path: root.to_path_buf(),
            source,
        })
    }

    /// Open (creating when absent) every store under `root`.
    pub fn open(root: &Utf8Path, options: StoreOptions) -> Result<Self, CacheError> {
        let layout = CacheLayout::new(root);
        Ok(Self {
            coords: EntityStore::open(&layout.coords(), options)?,
            points: EntityStore::open(&layout.points(), options)?,
            lines: EntityStore::open(&layout.lines(), options)?,
            relations: EntityStore::open(&layout.relations(), options)?,
            layout,
        })
    }

    #[must_use]
    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// Switch every store to `mode`, flushing pending sequential blocks.
    pub fn set_mode(&mut self, mode: AccessMode) -> Result<(), CacheError> {
        self.coords.set_mode(mode)?;
        self.points.set_mode(mode)?;
        self.lines.set_mode(mode)?;
        self.relations.set_mode(mode)?;
        Ok(())
    }

    /// Close every store, reporting the first failure after attempting all.
    pub fn close(self) -> Result<(), CacheError> {
        let results = [
            self.coords.close(),
            self.points.close(),
            self.lines.close(),
            self.relations.close(),
        ];
        results
            .into_iter()
            .find_map(Result::err)
            .map_or(Ok(()), |err| Err(err.into()))
    }
}
