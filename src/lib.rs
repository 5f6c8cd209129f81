//! Facade crate for the geoport OpenStreetMap importer.
//!
//! This crate re-exports the domain model, the entity cache and the read and
//! write passes. Destination backends sit behind feature flags.

#![forbid(unsafe_code)]

pub use geoport_core::{
    Capabilities, Capability, Degradation, DeployError, Deployer, DeploymentController,
    DeploymentState, DeploymentStatus, ElementKind, ElementRef, Finisher, Line, MAX_RELATION_DEPTH,
    Mapping, MappingError, Member, Point, Relation, Resolution, Row, Sink, SinkError, TableType,
    Tags,
};

pub use geoport_data::{
    OsmIngestError, OsmIngestSummary, PipelineConfig, WriteError, WriteSummary,
    cache::{CacheError, DiffLog, EntityStore, OsmCache, StoreError, StoreOptions},
    database::{Connection, ConnectionError, open_sink},
    ingest_osm_pbf, write_pass,
};

#[cfg(feature = "store-sqlite")]
pub use geoport_data::database::SqliteSink;

#[cfg(feature = "test-support")]
pub use geoport_core::test_support::MemorySink;
