//! Command-line interface for the geoport importer.
//!
//! One invocation may load a snapshot into the cache (`--read`), write the
//! cache into a destination (`--write`) and drive the deployment lifecycle.
//! Flags are layered with configuration files and environment variables,
//! then validated into an immutable [`ImportConfig`] before any file or
//! database is touched.
#![forbid(unsafe_code)]

mod error;
mod import;
mod profile;

use camino::Utf8PathBuf;
use clap::Parser;
use geoport_core::{Capabilities, Capability};
use geoport_data::{BATCH_SIZE_ENV, PipelineConfig, batch_size_from_env, database::Connection};
use log::info;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

pub use error::CliError;
pub use import::{DefaultSinkBuilder, ImportReport, SinkBuilder, run_import};
pub use profile::{DEFAULT_MEMPROFILE_INTERVAL, MemProfile, ProfileConfig};

pub(crate) const ARG_CACHE_DIR: &str = "cachedir";
pub(crate) const ARG_OVERWRITE_CACHE: &str = "overwritecache";
pub(crate) const ARG_APPEND_CACHE: &str = "appendcache";
pub(crate) const ARG_READ: &str = "read";
pub(crate) const ARG_WRITE: &str = "write";
pub(crate) const ARG_CONNECTION: &str = "connection";
pub(crate) const ARG_MAPPING: &str = "mapping";
pub(crate) const ARG_DEPLOY_PRODUCTION: &str = "deployproduction";
pub(crate) const ARG_REVERT_DEPLOY: &str = "revertdeploy";
pub(crate) const ARG_REMOVE_BACKUP: &str = "removebackup";
pub(crate) const ARG_CPU_PROFILE: &str = "cpuprofile";
pub(crate) const ARG_MEM_PROFILE: &str = "memprofile";

const DEFAULT_CACHE_DIR_NAME: &str = "geoport";

/// Run the importer with the current process arguments and environment.
pub fn run() -> Result<(), CliError> {
    let args = ImportArgs::try_parse().map_err(CliError::ArgumentParsing)?;
    let report = import_with(args, &DefaultSinkBuilder)?;
    report.log();
    Ok(())
}

/// Layer, validate and execute `args` against sinks from `builder`.
pub fn import_with(args: ImportArgs, builder: &dyn SinkBuilder) -> Result<ImportReport, CliError> {
    let config = args.into_config()?;
    run_import(&config, builder)
}

/// Flags accepted by `geoport`.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "geoport",
    about = "Import OpenStreetMap snapshots into a spatial database",
    long_about = "Load an OSM PBF snapshot into an on-disk cache, write the \
                 cached primitives into destination tables selected by a \
                 mapping file, and promote or roll back imports between the \
                 staging, production and backup namespaces.",
    version
)]
#[ortho_config(prefix = "GEOPORT")]
pub struct ImportArgs {
    /// Directory holding the entity cache (default: `geoport` under the
    /// system temporary directory).
    #[arg(long = ARG_CACHE_DIR, value_name = "path")]
    #[serde(default)]
    pub cache_dir: Option<Utf8PathBuf>,
    /// Discard an existing cache before reading.
    #[arg(long = ARG_OVERWRITE_CACHE)]
    #[serde(default)]
    pub overwrite_cache: bool,
    /// Add the snapshot to an existing cache.
    #[arg(long = ARG_APPEND_CACHE)]
    #[serde(default)]
    pub append_cache: bool,
    /// OSM PBF snapshot to load into the cache.
    #[arg(long = ARG_READ, value_name = "path")]
    #[serde(default)]
    pub read: Option<Utf8PathBuf>,
    /// Write the cache into the destination's staging tables.
    #[arg(long = ARG_WRITE)]
    #[serde(default)]
    pub write: bool,
    /// Destination, e.g. `sqlite:/var/lib/geoport/osm.sqlite`.
    #[arg(long = ARG_CONNECTION, value_name = "dsn")]
    #[serde(default)]
    pub connection: Option<String>,
    /// JSON mapping of tags to destination tables.
    #[arg(long = ARG_MAPPING, value_name = "path")]
    #[serde(default)]
    pub mapping: Option<Utf8PathBuf>,
    /// Promote staging to production, keeping the old production as backup.
    #[arg(long = ARG_DEPLOY_PRODUCTION)]
    #[serde(default)]
    pub deploy_production: bool,
    /// Restore the backup to production and return production to staging.
    #[arg(long = ARG_REVERT_DEPLOY)]
    #[serde(default)]
    pub revert_deploy: bool,
    /// Drop the backup namespace.
    #[arg(long = ARG_REMOVE_BACKUP)]
    #[serde(default)]
    pub remove_backup: bool,
    /// Write per-phase wall-clock timings to this file.
    #[arg(long = ARG_CPU_PROFILE, value_name = "path")]
    #[serde(default)]
    pub cpu_profile: Option<Utf8PathBuf>,
    /// Sample process memory into `dir` every `interval` (default 1m).
    #[arg(long = ARG_MEM_PROFILE, value_name = "dir[:interval]")]
    #[serde(default)]
    pub mem_profile: Option<String>,
}

impl ImportArgs {
    fn into_config(self) -> Result<ImportConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        ImportConfig::try_from(merged)
    }
}

/// What to do when `--read` finds an existing cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExistingCache {
    /// Fail with [`CliError::CacheExists`].
    #[default]
    Refuse,
    Overwrite,
    Append,
}

/// Deployment operations, applied in the order deploy, remove backup, revert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeploymentPlan {
    pub deploy: bool,
    pub remove_backup: bool,
    pub revert: bool,
}

impl DeploymentPlan {
    #[must_use]
    pub const fn is_empty(self) -> bool {
        !self.deploy && !self.remove_backup && !self.revert
    }

    const fn first_flag(self) -> Option<&'static str> {
        if self.deploy {
            Some(ARG_DEPLOY_PRODUCTION)
        } else if self.revert {
            Some(ARG_REVERT_DEPLOY)
        } else if self.remove_backup {
            Some(ARG_REMOVE_BACKUP)
        } else {
            None
        }
    }
}

/// Validated settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportConfig {
    pub cache_dir: Utf8PathBuf,
    pub existing_cache: ExistingCache,
    /// Snapshot to load, when reading.
    pub read: Option<Utf8PathBuf>,
    pub write: bool,
    pub mapping: Option<Utf8PathBuf>,
    pub connection: Option<Connection>,
    pub deployment: DeploymentPlan,
    pub pipeline: PipelineConfig,
    pub profile: ProfileConfig,
}

impl ImportConfig {
    /// Validate `args`, taking the batch size from the raw value of
    /// [`BATCH_SIZE_ENV`].
    ///
    /// Flag conflicts are reported before missing options.
    pub fn from_args(args: ImportArgs, batch_size: Option<&str>) -> Result<Self, CliError> {
        let reads_or_writes = args.read.is_some() || args.write;
        let deployment = DeploymentPlan {
            deploy: args.deploy_production,
            remove_backup: args.remove_backup,
            revert: args.revert_deploy,
        };
        check_conflicts(&args, reads_or_writes)?;
        if !reads_or_writes && deployment.is_empty() {
            return Err(CliError::NothingToDo);
        }
        if args.write && args.mapping.is_none() {
            return Err(CliError::MissingArgument {
                field: ARG_MAPPING,
                needed_by: ARG_WRITE,
            });
        }
        let sink_flag = if args.write {
            Some(ARG_WRITE)
        } else {
            deployment.first_flag()
        };
        let connection = match (args.connection.as_deref(), sink_flag) {
            (Some(raw), _) => Some(Connection::parse(raw).map_err(CliError::Connection)?),
            (None, Some(needed_by)) => {
                return Err(CliError::MissingArgument {
                    field: ARG_CONNECTION,
                    needed_by,
                });
            }
            (None, None) => None,
        };
        let existing_cache = if args.overwrite_cache {
            ExistingCache::Overwrite
        } else if args.append_cache {
            ExistingCache::Append
        } else {
            ExistingCache::Refuse
        };
        let cache_dir = match args.cache_dir {
            Some(dir) => dir,
            None => default_cache_dir()?,
        };
        let profile = ProfileConfig {
            cpu: args.cpu_profile,
            memory: args
                .mem_profile
                .as_deref()
                .map(MemProfile::parse)
                .transpose()?,
        };
        Ok(Self {
            cache_dir,
            existing_cache,
            read: args.read,
            write: args.write,
            mapping: args.mapping,
            connection,
            deployment,
            pipeline: PipelineConfig::default().with_batch_size(batch_size_from_env(batch_size)),
            profile,
        })
    }

    /// Capabilities the destination must advertise for this invocation.
    #[must_use]
    pub const fn required_capabilities(&self) -> Capabilities {
        let mut required = Capabilities::none();
        if self.write {
            required = required.with(Capability::Finisher);
        }
        if !self.deployment.is_empty() {
            required = required.with(Capability::Deployer);
        }
        required
    }
}

impl TryFrom<ImportArgs> for ImportConfig {
    type Error = CliError;

    fn try_from(args: ImportArgs) -> Result<Self, Self::Error> {
        let batch_size = std::env::var(BATCH_SIZE_ENV).ok();
        let config = Self::from_args(args, batch_size.as_deref())?;
        info!("Insert batch size {}", config.pipeline.batch_size);
        Ok(config)
    }
}

fn check_conflicts(args: &ImportArgs, reads_or_writes: bool) -> Result<(), CliError> {
    let read_or_write_flag = if args.read.is_some() {
        ARG_READ
    } else {
        ARG_WRITE
    };
    let conflicts = [
        (args.revert_deploy && reads_or_writes, ARG_REVERT_DEPLOY, read_or_write_flag),
        (args.remove_backup && reads_or_writes, ARG_REMOVE_BACKUP, read_or_write_flag),
        (
            args.revert_deploy && args.deploy_production,
            ARG_REVERT_DEPLOY,
            ARG_DEPLOY_PRODUCTION,
        ),
        (
            args.revert_deploy && args.remove_backup,
            ARG_REVERT_DEPLOY,
            ARG_REMOVE_BACKUP,
        ),
        (
            args.overwrite_cache && args.append_cache,
            ARG_OVERWRITE_CACHE,
            ARG_APPEND_CACHE,
        ),
    ];
    conflicts
        .into_iter()
        .find(|(conflicting, _, _)| *conflicting)
        .map_or(Ok(()), |(_, flag, other)| {
            Err(CliError::ConflictingFlags { flag, other })
        })
}

fn default_cache_dir() -> Result<Utf8PathBuf, CliError> {
    let dir = std::env::temp_dir().join(DEFAULT_CACHE_DIR_NAME);
    Utf8PathBuf::from_path_buf(dir).map_err(|path| CliError::NonUtf8TempDir { path })
}

#[cfg(test)]
pub(crate) fn config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<ImportConfig, CliError> {
    let merged = ImportArgs::merge_from_layers(layers).map_err(CliError::from)?;
    ImportConfig::from_args(merged, None)
}

#[cfg(test)]
mod tests;
