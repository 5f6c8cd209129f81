//! Read pass: load an OSM PBF snapshot into the entity cache.

use std::path::{Path, PathBuf};

use geo::{Coord, Rect};
use log::info;
use osmpbf::ElementReader;
use thiserror::Error;

use crate::cache::{OsmCache, StoreError};

mod ids;
mod loader;
mod tags;

use loader::CacheLoader;

/// Counts of primitives written to the cache by one read pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OsmIngestSummary {
    /// Node coordinates stored, tagged or not.
    pub nodes: u64,
    /// Tagged nodes stored as points.
    pub points: u64,
    pub lines: u64,
    pub relations: u64,
    /// Elements rejected for negative ids, invalid coordinates or too few
    /// references.
    pub skipped: u64,
    /// Bounding box of every stored coordinate (`x = longitude`,
    /// `y = latitude`).
    pub bounds: Option<Rect<f64>>,
}

impl OsmIngestSummary {
    fn record_node(&mut self, location: Coord<f64>) {
        self.nodes += 1;
        self.bounds = Some(match self.bounds {
            Some(existing) => Rect::new(
                Coord {
                    x: existing.min().x.min(location.x),
                    y: existing.min().y.min(location.y),
                },
                Coord {
                    x: existing.max().x.max(location.x),
                    y: existing.max().y.max(location.y),
                },
            ),
            None => Rect::new(location, location),
        });
    }
}

/// Errors returned when ingesting an OSM PBF file.
#[derive(Debug, Error)]
pub enum OsmIngestError {
    #[error("failed to open OSM PBF file at {path:?}")]
    Open {
        #[source]
        source: osmpbf::Error,
        path: PathBuf,
    },
    #[error("failed to decode OSM PBF data at {path:?}")]
    Decode {
        #[source]
        source: osmpbf::Error,
        path: PathBuf,
    },
    #[error("failed to store elements from {path:?}")]
    Store {
        #[source]
        source: StoreError,
        path: PathBuf,
    },
}

/// Load every element of `path` into `cache`.
///
/// Elements are decoded in file order, which for well-formed snapshots is
/// ascending id per kind, so empty stores take the sequential fast path.
///
/// # Examples
/// ```no_run
/// use std::path::Path;
/// use camino::Utf8Path;
/// use geoport_data::{cache::{OsmCache, StoreOptions}, ingest_osm_pbf};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut cache = OsmCache::open(Utf8Path::new("/tmp/geoport"), StoreOptions::default())?;
/// let summary = ingest_osm_pbf(Path::new("berlin.osm.pbf"), &mut cache)?;
/// println!("Cached {} lines", summary.lines);
/// cache.close()?;
/// # Ok(())
/// # }
/// ```
pub fn ingest_osm_pbf(
    path: &Path,
    cache: &mut OsmCache,
) -> Result<OsmIngestSummary, OsmIngestError> {
    let reader = ElementReader::from_path(path).map_err(|source| OsmIngestError::Open {
        source,
        path: path.to_path_buf(),
    })?;
    let store_error = |source: StoreError| OsmIngestError::Store {
        source,
        path: path.to_path_buf(),
    };

    let mut loader = CacheLoader::new(cache).map_err(store_error)?;
    reader
        .for_each(|element| loader.process_element(element))
        .map_err(|source| OsmIngestError::Decode {
            source,
            path: path.to_path_buf(),
        })?;
    let summary = loader.finish().map_err(store_error)?;

    info!(
        "Cached {} coordinates, {} points, {} lines, {} relations from {} ({} skipped)",
        summary.nodes,
        summary.points,
        summary.lines,
        summary.relations,
        path.display(),
        summary.skipped
    );
    Ok(summary)
}
