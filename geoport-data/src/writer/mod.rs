//! Write pass: resolve cached primitives into rows and stream them to a sink.
//!
//! Stages run on scoped threads connected by bounded channels:
//!
//! ```text
//! relations ─┐
//! lines ─────┼─> insert buffer ─> flusher ─> Sink
//! points ────┘
//! ```
//!
//! The relation stage runs alone and ends with a flush marker. Only once the
//! flusher acknowledges that marker do the line and point stages start, so
//! every polygon row from a relation reaches the sink before any other row.

mod buffer;
mod flusher;
mod lines;
mod points;
mod relations;
mod rings;

use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread::{self, ScopedJoinHandle},
};

use geoport_core::{Capability, Mapping, Resolution, Sink, SinkError, TagMatcher};
use log::{info, warn};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{
    PipelineConfig,
    cache::{DiffLog, DiffLogError, OsmCache, StoreError},
};
use buffer::RowSender;

/// Batches queued between the insert buffer and the flusher.
const BATCH_QUEUE_CAPACITY: usize = 4;

/// Errors that abort a write pass.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to read the entity cache")]
    Store(#[from] StoreError),
    #[error("sink rejected the write")]
    Sink(#[from] SinkError),
    #[error("failed to manage the diff log")]
    Diff(#[from] DiffLogError),
    /// A downstream stage stopped before the pass finished.
    #[error("{stage} stopped unexpectedly")]
    Disconnected { stage: &'static str },
    #[error("{stage} worker panicked")]
    WorkerPanicked { stage: &'static str },
}

/// Outcome counts for one resolver stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageSummary {
    /// Primitives resolved without loss.
    pub full: u64,
    /// Primitives emitted after dropping dangling references.
    pub partial: u64,
    /// Matched primitives with nothing usable left.
    pub skipped: u64,
    /// Rows sent to the insert buffer.
    pub rows: u64,
}

impl StageSummary {
    fn record<T>(&mut self, resolution: &Resolution<T>) {
        match resolution {
            Resolution::Full(_) => self.full += 1,
            Resolution::Partial { .. } => self.partial += 1,
            Resolution::Skipped { .. } => self.skipped += 1,
        }
    }
}

/// Progress counters for a whole write pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub relations: StageSummary,
    pub lines: StageSummary,
    pub points: StageSummary,
    /// Rows accepted by the sink.
    pub rows: usize,
    /// `insert` calls made on the sink.
    pub batches: usize,
}

/// Shared stop flag; set by the first stage that fails.
#[derive(Debug, Default)]
pub(crate) struct Abort(AtomicBool);

impl Abort {
    pub(crate) fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Matchers {
    point: TagMatcher,
    line: TagMatcher,
    polygon: TagMatcher,
}

impl Matchers {
    fn new(mapping: &Mapping) -> Self {
        Self {
            point: mapping.point_matcher(),
            line: mapping.line_string_matcher(),
            polygon: mapping.polygon_matcher(),
        }
    }
}

/// Read-only state shared by the resolver stages.
pub(crate) struct StageContext<'a> {
    cache: &'a OsmCache,
    diff: &'a DiffLog,
    matchers: &'a Matchers,
    abort: &'a Abort,
}

/// Run a full write pass against an initialised `sink`.
///
/// The diff log under the cache directory is recreated before resolving
/// and persisted afterwards. The sink must be a finisher; `finish` runs once
/// every row is written.
///
/// # Errors
///
/// Returns [`SinkError::Unsupported`] before anything is written when the
/// sink cannot finish an import.
pub fn write_pass(
    cache: &OsmCache,
    mapping: &Mapping,
    sink: &mut dyn Sink,
    config: PipelineConfig,
) -> Result<WriteSummary, WriteError> {
    if !sink.capabilities().contains(Capability::Finisher) {
        return Err(SinkError::Unsupported(Capability::Finisher).into());
    }
    let diff_path = cache.layout().diff();
    DiffLog::remove(&diff_path)?;
    let diff = DiffLog::open(&diff_path)?;
    let summary = write_cache(cache, &diff, mapping, sink, config)?;
    sink.as_finisher()
        .ok_or(SinkError::Unsupported(Capability::Finisher))?
        .finish()?;
    diff.close()?;
    Ok(summary)
}

/// Resolve every cached primitive, recording coordinate dependencies in
/// `diff` and inserting rows through `sink`.
pub fn write_cache(
    cache: &OsmCache,
    diff: &DiffLog,
    mapping: &Mapping,
    sink: &mut dyn Sink,
    config: PipelineConfig,
) -> Result<WriteSummary, WriteError> {
    let matchers = Matchers::new(mapping);
    let abort = Abort::default();
    let ctx = StageContext {
        cache,
        diff,
        matchers: &matchers,
        abort: &abort,
    };
    let (row_tx, row_rx) = mpsc::channel(config.queue_capacity.max(1));
    let (batch_tx, batch_rx) = mpsc::channel(BATCH_QUEUE_CAPACITY);

    let mut summary = WriteSummary::default();
    let mut errors = Vec::new();
    thread::scope(|scope| {
        let abort = &abort;
        let ctx = &ctx;
        let flusher = scope.spawn(move || flusher::run(sink, batch_rx, abort));
        let buffer = scope.spawn(move || buffer::run(row_rx, &batch_tx, config.batch_size, abort));
        let rows = RowSender::new(row_tx);

        let relation_rows = rows.clone();
        let relation_stage = scope.spawn(move || -> Result<StageSummary, WriteError> {
            let stage = relations::run(ctx, &relation_rows)?;
            relation_rows.flush_and_wait()?;
            Ok(stage)
        });
        let relations_done = match join(relation_stage, "relation resolver", abort) {
            Ok(stage) => {
                summary.relations = stage;
                true
            }
            Err(err) => {
                errors.push(err);
                false
            }
        };

        if relations_done {
            let line_rows = rows.clone();
            let point_rows = rows;
            let line_stage = scope.spawn(move || lines::run(ctx, &line_rows));
            let point_stage = scope.spawn(move || points::run(ctx, &point_rows));
            match join(line_stage, "line resolver", abort) {
                Ok(stage) => summary.lines = stage,
                Err(err) => errors.push(err),
            }
            match join(point_stage, "point resolver", abort) {
                Ok(stage) => summary.points = stage,
                Err(err) => errors.push(err),
            }
        } else {
            drop(rows);
        }

        if let Err(err) = join(buffer, "insert buffer", abort) {
            errors.push(err);
        }
        match join(flusher, "flusher", abort) {
            Ok(stats) => {
                summary.rows = stats.rows;
                summary.batches = stats.batches;
            }
            Err(err) => errors.push(err),
        }
    });

    if let Some(err) = first_error(errors) {
        return Err(err);
    }
    log_summary(&summary);
    Ok(summary)
}

fn join<T>(
    handle: ScopedJoinHandle<'_, Result<T, WriteError>>,
    stage: &'static str,
    abort: &Abort,
) -> Result<T, WriteError> {
    let result = handle
        .join()
        .unwrap_or(Err(WriteError::WorkerPanicked { stage }));
    if result.is_err() {
        abort.trigger();
    }
    result
}

/// Prefer the root cause over the disconnections it provoked downstream.
fn first_error(errors: Vec<WriteError>) -> Option<WriteError> {
    let root = errors
        .iter()
        .position(|err| !matches!(err, WriteError::Disconnected { .. }))
        .unwrap_or(0);
    errors.into_iter().nth(root)
}

fn log_summary(summary: &WriteSummary) {
    for (kind, stage) in [
        ("relations", summary.relations),
        ("lines", summary.lines),
        ("points", summary.points),
    ] {
        info!(
            "Resolved {kind}: {} full, {} partial, {} skipped, {} rows",
            stage.full, stage.partial, stage.skipped, stage.rows
        );
        if stage.skipped > 0 {
            warn!("{} {kind} produced no rows", stage.skipped);
        }
    }
    info!(
        "Wrote {} rows in {} batches",
        summary.rows, summary.batches
    );
}
