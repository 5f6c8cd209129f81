//! Import orchestration: read pass, write pass and deployment.

use camino::Utf8Path;
use geoport_core::{Capability, DeploymentController, DeploymentState, Mapping, Sink};
use geoport_data::{
    OsmIngestSummary, WriteSummary,
    cache::{OsmCache, StoreOptions},
    database::Connection,
    ingest_osm_pbf, write_pass,
};
use log::info;

use crate::{
    ARG_CONNECTION, ARG_DEPLOY_PRODUCTION, ARG_MAPPING, ARG_WRITE, CliError, ExistingCache,
    ImportConfig,
    profile::Profiler,
};

/// Opens the destination named by a connection string.
pub trait SinkBuilder {
    /// Open the destination for the tables of `mapping`.
    fn build(
        &self,
        connection: &Connection,
        mapping: Option<&Mapping>,
    ) -> Result<Box<dyn Sink>, CliError>;
}

/// Opens the backends compiled into `geoport-data`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSinkBuilder;

impl SinkBuilder for DefaultSinkBuilder {
    fn build(
        &self,
        connection: &Connection,
        mapping: Option<&Mapping>,
    ) -> Result<Box<dyn Sink>, CliError> {
        connection.open_sink(mapping).map_err(CliError::Connection)
    }
}

/// Results of the phases an invocation ran.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    pub ingest: Option<OsmIngestSummary>,
    pub write: Option<WriteSummary>,
    /// State after the last deployment operation.
    pub deployment: Option<DeploymentState>,
}

impl ImportReport {
    pub(crate) fn log(&self) {
        if let Some(ingest) = &self.ingest {
            info!(
                "Read {} coordinates, {} points, {} lines, {} relations ({} skipped)",
                ingest.nodes, ingest.points, ingest.lines, ingest.relations, ingest.skipped
            );
        }
        if let Some(write) = &self.write {
            info!("Wrote {} rows in {} batches", write.rows, write.batches);
        }
        if let Some(state) = self.deployment {
            info!("Deployment state: {state}");
        }
    }
}

/// Execute the phases requested by `config`.
///
/// The mapping is loaded and the destination's capabilities are checked
/// before the cache is touched. Profiling output is written even when a
/// phase fails.
pub fn run_import(
    config: &ImportConfig,
    builder: &dyn SinkBuilder,
) -> Result<ImportReport, CliError> {
    let mut profiler = Profiler::start(&config.profile)?;
    let outcome = run_phases(config, builder, &mut profiler);
    let profiled = profiler.finish();
    let report = outcome?;
    profiled?;
    Ok(report)
}

fn run_phases(
    config: &ImportConfig,
    builder: &dyn SinkBuilder,
    profiler: &mut Profiler,
) -> Result<ImportReport, CliError> {
    let mapping = config.mapping.as_deref().map(load_mapping).transpose()?;
    let mut sink = config
        .connection
        .as_ref()
        .map(|connection| open_sink(config, connection, mapping.as_ref(), builder))
        .transpose()?;
    let mut report = ImportReport::default();

    let mut cache = None;
    if let Some(snapshot) = &config.read {
        let mut opened = open_cache_for_read(config)?;
        let summary = profiler.time("read", || {
            ingest_osm_pbf(snapshot.as_std_path(), &mut opened)
        })?;
        report.ingest = Some(summary);
        cache = Some(opened);
    }

    if config.write {
        let mapping = mapping.as_ref().ok_or(CliError::MissingArgument {
            field: ARG_MAPPING,
            needed_by: ARG_WRITE,
        })?;
        let sink = sink.as_deref_mut().ok_or(CliError::MissingArgument {
            field: ARG_CONNECTION,
            needed_by: ARG_WRITE,
        })?;
        let opened = match cache.take() {
            Some(opened) => opened,
            None => open_existing_cache(&config.cache_dir)?,
        };
        sink.init()?;
        let summary = profiler.time("write", || {
            write_pass(&opened, mapping, sink, config.pipeline)
        })?;
        opened.close()?;
        report.write = Some(summary);
    }
    if let Some(opened) = cache {
        opened.close()?;
    }

    if !config.deployment.is_empty() {
        let sink = sink.as_deref_mut().ok_or(CliError::MissingArgument {
            field: ARG_CONNECTION,
            needed_by: config.deployment.first_flag().unwrap_or(ARG_DEPLOY_PRODUCTION),
        })?;
        report.deployment = Some(profiler.time("deploy", || deploy(config, sink))?);
    }
    Ok(report)
}

fn load_mapping(path: &Utf8Path) -> Result<Mapping, CliError> {
    let mapping = Mapping::from_path(path).map_err(|source| {
        CliError::LoadMapping {
            path: path.to_path_buf(),
            source,
        }
    })?;
    info!("Loaded {} mapping tables from {path}", mapping.tables().count());
    Ok(mapping)
}

fn open_sink(
    config: &ImportConfig,
    connection: &Connection,
    mapping: Option<&Mapping>,
    builder: &dyn SinkBuilder,
) -> Result<Box<dyn Sink>, CliError> {
    let sink = builder.build(connection, mapping)?;
    if let Some(capability) = sink
        .capabilities()
        .first_missing(config.required_capabilities())
    {
        return Err(CliError::MissingCapability { capability });
    }
    Ok(sink)
}

fn open_cache_for_read(config: &ImportConfig) -> Result<OsmCache, CliError> {
    let root = &config.cache_dir;
    if OsmCache::exists(root)? {
        match config.existing_cache {
            ExistingCache::Refuse => {
                return Err(CliError::CacheExists {
                    path: root.clone(),
                });
            }
            ExistingCache::Overwrite => OsmCache::remove(root)?,
            ExistingCache::Append => info!("Appending to cache {root}"),
        }
    }
    Ok(OsmCache::open(root, StoreOptions::default())?)
}

fn open_existing_cache(root: &Utf8Path) -> Result<OsmCache, CliError> {
    if !OsmCache::exists(root)? {
        return Err(CliError::MissingCache {
            path: root.to_path_buf(),
        });
    }
    Ok(OsmCache::open(root, StoreOptions::default())?)
}

fn deploy(config: &ImportConfig, sink: &mut dyn Sink) -> Result<DeploymentState, CliError> {
    let deployer = sink.as_deployer().ok_or(CliError::MissingCapability {
        capability: Capability::Deployer,
    })?;
    let mut controller = DeploymentController::new(deployer);
    let plan = config.deployment;
    let mut state = controller.state()?;
    if plan.deploy {
        state = controller.deploy()?;
    }
    if plan.remove_backup {
        state = controller.remove_backup()?;
    }
    if plan.revert {
        state = controller.revert_deploy()?;
    }
    Ok(state)
}
