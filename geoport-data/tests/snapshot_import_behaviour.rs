//! Behavioural tests for the read and write passes over a PBF snapshot.

use geo::Geometry;
use geoport_core::{ElementKind, Sink, test_support::MemorySink};
use geoport_data::{
    OsmIngestError, OsmIngestSummary, PipelineConfig,
    cache::{DiffLog, OsmCache, StoreOptions},
    ingest_osm_pbf, write_pass,
};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::{
    cell::RefCell,
    fs,
    path::{Path, PathBuf},
};
use tempfile::{TempDir, TempPath};

mod support;

use support::{assert_close, cache_root, decode_fixture, square_mapping};

enum Snapshot {
    Existing(TempPath),
    Missing(PathBuf),
}

impl Snapshot {
    fn path(&self) -> &Path {
        match self {
            Self::Existing(temp) => temp.as_ref(),
            Self::Missing(path) => path.as_path(),
        }
    }
}

/// Fields drop in order, so the cache persists before the scratch
/// directory is deleted.
struct ImportWorld {
    snapshot: RefCell<Option<Snapshot>>,
    cache: RefCell<Option<OsmCache>>,
    ingest: RefCell<Option<Result<OsmIngestSummary, OsmIngestError>>>,
    sink: MemorySink,
    scratch: TempDir,
}

impl ImportWorld {
    fn summary(&self) -> OsmIngestSummary {
        self.ingest
            .borrow()
            .as_ref()
            .expect("ingestion was attempted")
            .as_ref()
            .expect("expected successful ingestion")
            .clone()
    }

    fn error(&self) -> String {
        match self.ingest.borrow().as_ref().expect("ingestion was attempted") {
            Ok(summary) => panic!("expected an error, got {summary:?}"),
            Err(err) => format!("{err:?}"),
        }
    }
}

#[fixture]
fn world() -> ImportWorld {
    ImportWorld {
        snapshot: RefCell::new(None),
        cache: RefCell::new(None),
        ingest: RefCell::new(None),
        sink: MemorySink::new(),
        scratch: tempfile::tempdir().expect("create scratch dir"),
    }
}

#[given("the square park snapshot")]
fn square_snapshot(world: &ImportWorld) {
    let fixture = decode_fixture(&support::fixtures_dir(), "square");
    world.snapshot.replace(Some(Snapshot::Existing(fixture)));
}

#[given("a path to a missing snapshot")]
fn missing_snapshot(world: &ImportWorld) {
    let missing = support::fixtures_dir().join("missing.osm.pbf");
    world.snapshot.replace(Some(Snapshot::Missing(missing)));
}

#[given("a corrupted snapshot")]
fn corrupted_snapshot(world: &ImportWorld) {
    let fixture = decode_fixture(&support::fixtures_dir(), "invalid");
    world.snapshot.replace(Some(Snapshot::Existing(fixture)));
}

#[when("I load the snapshot into an empty cache")]
fn load_snapshot(world: &ImportWorld) {
    let root = cache_root(&world.scratch);
    let mut cache = OsmCache::open(&root, StoreOptions::default()).expect("open cache");
    let outcome = {
        let snapshot = world.snapshot.borrow();
        let path = snapshot.as_ref().expect("snapshot prepared").path();
        ingest_osm_pbf(path, &mut cache)
    };
    world.ingest.replace(Some(outcome));
    world.cache.replace(Some(cache));
}

#[when("I run the write pass")]
fn run_write_pass(world: &ImportWorld) {
    let cache = world.cache.borrow();
    let cache = cache.as_ref().expect("cache loaded");
    let mut sink = world.sink.clone();
    sink.init().expect("initialise sink");
    write_pass(
        cache,
        &square_mapping(),
        &mut sink,
        PipelineConfig::default().with_batch_size(2),
    )
    .expect("write pass should succeed");
}

#[then("the cache holds 4 coordinates, 3 points, 2 lines and 1 relation")]
fn cache_counts(world: &ImportWorld) {
    let summary = world.summary();
    assert_eq!(
        (summary.nodes, summary.points, summary.lines, summary.relations),
        (4, 3, 2, 1)
    );
    assert_eq!(summary.skipped, 0);
    let cache = world.cache.borrow();
    let cache = cache.as_ref().expect("cache loaded");
    let stored = cache.lines.iter().expect("iterate lines").count();
    assert_eq!(stored, 2);
}

#[then("the summary bounding box spans the square")]
fn summary_bounds(world: &ImportWorld) {
    let bounds = world.summary().bounds.expect("sample data has bounds");
    assert_close(bounds.min().x, 13.0);
    assert_close(bounds.max().x, 13.1);
    assert_close(bounds.min().y, 52.0);
    assert_close(bounds.max().y, 52.1);
}

#[then("the sink receives 1 polygon row, 2 road rows and 3 cafe rows")]
fn sink_rows(world: &ImportWorld) {
    let rows = world.sink.rows();
    let count = |table: &str| rows.iter().filter(|row| row.table == table).count();
    assert_eq!((count("parks"), count("roads"), count("cafes")), (1, 2, 3));
    assert!(world.sink.is_finished(), "finisher should have run");
}

#[then("the polygon row arrives first")]
fn polygon_first(world: &ImportWorld) {
    let rows = world.sink.rows();
    let first = rows.first().expect("rows were written");
    assert_eq!(first.element.kind, ElementKind::Relation);
    match &first.geometry {
        Geometry::Polygon(polygon) => assert_eq!(polygon.exterior().0.len(), 5),
        other => panic!("expected a polygon, got {other:?}"),
    }
}

#[then("the diff log lists coordinates 1 to 4")]
fn diff_log_ids(world: &ImportWorld) {
    let cache = world.cache.borrow();
    let cache = cache.as_ref().expect("cache loaded");
    let diff = DiffLog::open(&cache.layout().diff()).expect("open diff log");
    assert_eq!(diff.coord_ids().expect("ids"), [1, 2, 3, 4]);
}

#[then("an open error is returned")]
fn open_error(world: &ImportWorld) {
    let error = world.error();
    assert!(error.starts_with("Open"), "expected an open error, got {error}");
}

#[then("a decode error is returned")]
fn decode_error(world: &ImportWorld) {
    let error = world.error();
    assert!(error.starts_with("Decode"), "expected a decode error, got {error}");
}

#[scenario(path = "tests/features/snapshot_import.feature", index = 0)]
fn caching_a_snapshot(world: ImportWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/snapshot_import.feature", index = 1)]
fn writing_a_cached_snapshot(world: ImportWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/snapshot_import.feature", index = 2)]
fn reporting_a_missing_snapshot(world: ImportWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/snapshot_import.feature", index = 3)]
fn rejecting_a_corrupted_snapshot(world: ImportWorld) {
    let _ = world;
}

#[test]
fn scenario_indices_follow_feature_order() {
    let feature =
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/features/snapshot_import.feature");
    let contents = fs::read_to_string(&feature).unwrap_or_else(|err| {
        panic!("failed to read feature file {feature:?}: {err}");
    });
    let titles: Vec<&str> = contents
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Scenario: "))
        .collect();
    assert_eq!(
        titles,
        [
            "caching a snapshot",
            "writing a cached snapshot",
            "reporting a missing snapshot",
            "rejecting a corrupted snapshot",
        ],
        "scenario order changed in feature file"
    );
}
