//! Error types emitted by the geoport CLI.
//!
//! Configuration variants are raised before the cache or the destination is
//! touched; the rest wrap failures of the import phases.

use std::{io, sync::Arc};

use camino::Utf8PathBuf;
use geoport_core::{Capability, DeployError, MappingError, SinkError};
use geoport_data::{
    OsmIngestError, WriteError, cache::CacheError, database::ConnectionError,
};
use thiserror::Error;

/// Errors emitted by the geoport CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// Two flags that may not be combined were both set.
    #[error("--{flag} cannot be combined with --{other}")]
    ConflictingFlags {
        flag: &'static str,
        other: &'static str,
    },
    /// A flag needs another option that was not provided.
    #[error("--{needed_by} requires --{field}")]
    MissingArgument {
        field: &'static str,
        needed_by: &'static str,
    },
    /// No read, write or deployment operation was requested.
    #[error("nothing to do: pass --read, --write or a deployment flag")]
    NothingToDo,
    /// The default cache directory is not valid UTF-8.
    #[error("temporary directory {path:?} is not valid UTF-8")]
    NonUtf8TempDir { path: std::path::PathBuf },
    /// The connection string was rejected or its backend failed to open.
    #[error("invalid connection: {0}")]
    Connection(#[source] ConnectionError),
    /// `--memprofile` could not be interpreted.
    #[error("invalid --memprofile value {value:?}: {reason}")]
    InvalidMemProfile {
        value: String,
        reason: &'static str,
    },
    /// The mapping file could not be loaded.
    #[error("failed to load mapping {path:?}")]
    LoadMapping {
        path: Utf8PathBuf,
        #[source]
        source: MappingError,
    },
    /// The destination lacks behaviour the invocation needs.
    #[error("the destination does not support the {capability} capability")]
    MissingCapability { capability: Capability },
    /// A read targets an existing cache without an overwrite or append choice.
    #[error("cache {path} already exists; pass --overwritecache or --appendcache")]
    CacheExists { path: Utf8PathBuf },
    /// A write was requested without a cache to read from.
    #[error("no cache at {path}; run with --read first")]
    MissingCache { path: Utf8PathBuf },
    /// Managing the cache directory failed.
    #[error("cache failure: {0}")]
    Cache(#[from] CacheError),
    /// The read pass failed.
    #[error("failed to read the snapshot: {0}")]
    Ingest(#[from] OsmIngestError),
    /// The destination rejected initialisation.
    #[error("failed to prepare the destination: {0}")]
    Sink(#[from] SinkError),
    /// The write pass failed.
    #[error("write pass failed: {0}")]
    Write(#[from] WriteError),
    /// A deployment operation failed; the destination is unchanged.
    #[error("deployment failed: {0}")]
    Deploy(#[from] DeployError),
    /// Profiling output could not be written.
    #[error("failed to write profile {path:?}: {source}")]
    Profile {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}
