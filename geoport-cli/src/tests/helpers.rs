//! Test helpers for staging snapshots, mappings and in-memory destinations.

use super::*;
use base64::{Engine as _, engine::general_purpose};
use camino::Utf8Path;
use geoport_core::{Mapping, Sink, test_support::MemorySink};
use std::{fs, path::PathBuf};
use tempfile::TempDir;

/// Tables covering every primitive of the square park fixture.
pub(super) const SQUARE_MAPPING: &str = r#"{
    "tables": {
        "cafes": { "type": "point", "mapping": { "amenity": ["cafe"] } },
        "roads": { "type": "linestring", "mapping": { "highway": ["__any__"] } },
        "parks": { "type": "polygon", "mapping": { "leisure": ["park"] } }
    }
}"#;

/// Rows the square park fixture produces: 3 cafes, 2 roads and 1 park.
pub(super) const SQUARE_ROWS: usize = 6;

/// Scratch directory holding a decoded snapshot and a mapping file.
#[derive(Debug)]
pub(super) struct Workspace {
    _dir: TempDir,
    root: Utf8PathBuf,
    snapshot: Utf8PathBuf,
    mapping: Utf8PathBuf,
}

impl Workspace {
    pub(super) fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .unwrap_or_else(|path| panic!("scratch path {path:?} is not UTF-8"));
        let snapshot = root.join("square.osm.pbf");
        fs::write(&snapshot, decode_fixture("square")).expect("write snapshot");
        let mapping = root.join("mapping.json");
        fs::write(&mapping, SQUARE_MAPPING).expect("write mapping");
        Self {
            _dir: dir,
            root,
            snapshot,
            mapping,
        }
    }

    pub(super) fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub(super) fn snapshot(&self) -> &Utf8Path {
        &self.snapshot
    }

    pub(super) fn mapping(&self) -> &Utf8Path {
        &self.mapping
    }

    pub(super) fn cache_dir(&self) -> Utf8PathBuf {
        self.root().join("cache")
    }

    pub(super) fn database(&self) -> Utf8PathBuf {
        self.root().join("db/osm.sqlite")
    }

    /// Full argument vector: cache, mapping and connection flags followed by
    /// `flags`, with `--read` expanded to the snapshot path.
    pub(super) fn invocation(&self, flags: &[&str]) -> Vec<String> {
        let mut invocation = vec![
            "geoport".to_owned(),
            format!("--{ARG_CACHE_DIR}"),
            self.cache_dir().into_string(),
            format!("--{ARG_MAPPING}"),
            self.mapping().to_string(),
            format!("--{ARG_CONNECTION}"),
            format!("sqlite:{}", self.database()),
        ];
        for flag in flags {
            invocation.push((*flag).to_owned());
            if *flag == "--read" {
                invocation.push(self.snapshot().to_string());
            }
        }
        invocation
    }

    /// Parse `flags` and validate them without consulting the environment.
    pub(super) fn config(&self, flags: &[&str]) -> ImportConfig {
        let args = ImportArgs::try_parse_from(self.invocation(flags)).expect("valid flags");
        ImportConfig::from_args(args, None).expect("valid configuration")
    }

    pub(super) fn run(
        &self,
        flags: &[&str],
        sink: &MemorySink,
    ) -> Result<ImportReport, CliError> {
        run_import(&self.config(flags), &MemorySinkBuilder::new(sink))
    }
}

/// Hands out clones of one [`MemorySink`] so tests can inspect what the
/// importer wrote.
pub(super) struct MemorySinkBuilder {
    sink: MemorySink,
}

impl MemorySinkBuilder {
    pub(super) fn new(sink: &MemorySink) -> Self {
        Self { sink: sink.clone() }
    }
}

impl SinkBuilder for MemorySinkBuilder {
    fn build(
        &self,
        _connection: &Connection,
        _mapping: Option<&Mapping>,
    ) -> Result<Box<dyn Sink>, CliError> {
        Ok(Box::new(self.sink.clone()))
    }
}

/// Decode `tests/fixtures/<stem>.osm.pbf.b64`.
pub(super) fn decode_fixture(stem: &str) -> Vec<u8> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(format!("{stem}.osm.pbf.b64"));
    let encoded = fs::read_to_string(&path).unwrap_or_else(|err| {
        panic!("failed to read base64 fixture {path:?}: {err}");
    });
    let cleaned: String = encoded
        .chars()
        .filter(|ch| !ch.is_ascii_whitespace())
        .collect();
    general_purpose::STANDARD
        .decode(cleaned.as_bytes())
        .unwrap_or_else(|err| panic!("failed to decode base64 fixture {path:?}: {err}"))
}
