//! Storage and pipelines for the geoport importer.
//!
//! Responsibilities:
//! - Persist snapshot primitives in the on-disk entity cache.
//! - Load OSM PBF snapshots into the cache (the read pass).
//! - Resolve cached primitives into rows and stream them to a sink (the write
//!   pass).
//! - Provide destination backends selected by connection string.
//!
//! Boundaries:
//! - Tag classification and the deployment lifecycle live in `geoport-core`.
//! - Flag parsing and process setup live in `geoport-cli`.
//!
//! Invariants:
//! - Cache directories have a single writer.
//! - The write pass never mutates the cache.

#![forbid(unsafe_code)]

pub mod cache;
mod config;
pub mod database;
mod ingest;
pub mod writer;

pub use config::{
    BATCH_SIZE_ENV, DEFAULT_BATCH_SIZE, DEFAULT_QUEUE_CAPACITY, PipelineConfig,
    batch_size_from_env,
};
pub use ingest::{OsmIngestError, OsmIngestSummary, ingest_osm_pbf};
pub use writer::{StageSummary, WriteError, WriteSummary, write_cache, write_pass};
