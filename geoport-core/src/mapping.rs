//! Tag-to-table classification loaded from a JSON mapping file.
//!
//! A mapping declares destination tables, each with a geometry type and the
//! tag predicates that route a primitive into it:
//!
//! ```json
//! {
//!   "tables": {
//!     "roads": { "type": "linestring", "mapping": { "highway": ["__any__"] } },
//!     "cafes": { "type": "point", "mapping": { "amenity": ["cafe"] } }
//!   }
//! }
//! ```
//!
//! The mapping is loaded once at startup and never mutated afterwards.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use thiserror::Error;

use crate::Tags;

/// Value wildcard matching any value of a key.
pub const ANY_VALUE: &str = "__any__";

/// Geometry type of a destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableType {
    Point,
    LineString,
    Polygon,
}

/// Tag predicates for one destination table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TableSpec {
    #[serde(rename = "type")]
    pub table_type: TableType,
    /// Accepted values per tag key.
    pub mapping: BTreeMap<String, Vec<String>>,
}

impl TableSpec {
    fn matching_tag<'t>(&self, tags: &'t Tags) -> Option<(&'t str, &'t str)> {
        self.mapping.iter().find_map(|(key, values)| {
            let (tag_key, tag_value) = tags.get_key_value(key)?;
            values
                .iter()
                .any(|accepted| accepted == ANY_VALUE || accepted == tag_value)
                .then_some((tag_key.as_str(), tag_value.as_str()))
        })
    }
}

#[derive(Debug, Deserialize)]
struct MappingFile {
    tables: BTreeMap<String, TableSpec>,
}

/// A single classification result.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TableMatch {
    /// Destination table name.
    pub table: String,
    pub table_type: TableType,
    /// Tag key that selected the table.
    pub key: String,
    /// Tag value that selected the table.
    pub value: String,
}

impl TableMatch {
    #[must_use]
    pub fn is_point_match(&self) -> bool {
        self.table_type == TableType::Point
    }

    #[must_use]
    pub fn is_line_match(&self) -> bool {
        self.table_type == TableType::LineString
    }

    #[must_use]
    pub fn is_polygon_match(&self) -> bool {
        self.table_type == TableType::Polygon
    }
}

/// Errors raised while loading a mapping file.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("failed to read mapping file {path}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse mapping file {path}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("mapping declares no tables")]
    NoTables,
    #[error("table name {name:?} must be lowercase ASCII letters, digits or underscores")]
    InvalidTableName { name: String },
    #[error("table {name:?} declares no tag predicates")]
    EmptyTable { name: String },
}

/// Immutable tag mapping.
///
/// # Examples
/// ```
/// use geoport_core::{Mapping, Tags};
///
/// let mapping = Mapping::from_json(
///     r#"{"tables": {"roads": {"type": "linestring", "mapping": {"highway": ["__any__"]}}}}"#,
/// )
/// .expect("valid mapping");
/// let tags = Tags::from([("highway".into(), "primary".into())]);
/// let matches = mapping.classify(&tags);
/// assert_eq!(matches.len(), 1);
/// assert!(matches[0].is_line_match());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    tables: BTreeMap<String, TableSpec>,
}

impl Mapping {
    /// Load and validate a mapping file.
    pub fn from_path(path: &Utf8Path) -> Result<Self, MappingError> {
        let contents = geoport_fs::read_to_string(path).map_err(|source| MappingError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: MappingFile =
            serde_json::from_str(&contents).map_err(|source| MappingError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_tables(file.tables)
    }

    /// Parse and validate a mapping from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, MappingError> {
        let file: MappingFile =
            serde_json::from_str(json).map_err(|source| MappingError::Parse {
                path: Utf8PathBuf::from("<inline>"),
                source,
            })?;
        Self::from_tables(file.tables)
    }

    fn from_tables(tables: BTreeMap<String, TableSpec>) -> Result<Self, MappingError> {
        if tables.is_empty() {
            return Err(MappingError::NoTables);
        }
        for (name, spec) in &tables {
            if !is_valid_table_name(name) {
                return Err(MappingError::InvalidTableName { name: name.clone() });
            }
            if spec.mapping.is_empty() || spec.mapping.values().all(Vec::is_empty) {
                return Err(MappingError::EmptyTable { name: name.clone() });
            }
        }
        Ok(Self { tables })
    }

    /// Destination tables and their geometry types, ordered by name.
    pub fn tables(&self) -> impl Iterator<Item = (&str, TableType)> + '_ {
        self.tables
            .iter()
            .map(|(name, spec)| (name.as_str(), spec.table_type))
    }

    /// Classify tags against every table, at most one match per table.
    #[must_use]
    pub fn classify(&self, tags: &Tags) -> Vec<TableMatch> {
        classify_tables(self.tables.iter(), tags)
    }

    #[must_use]
    pub fn point_matcher(&self) -> TagMatcher {
        self.matcher(TableType::Point)
    }

    #[must_use]
    pub fn line_string_matcher(&self) -> TagMatcher {
        self.matcher(TableType::LineString)
    }

    #[must_use]
    pub fn polygon_matcher(&self) -> TagMatcher {
        self.matcher(TableType::Polygon)
    }

    fn matcher(&self, table_type: TableType) -> TagMatcher {
        let tables = self
            .tables
            .iter()
            .filter(|(_, spec)| spec.table_type == table_type)
            .map(|(name, spec)| (name.clone(), spec.clone()))
            .collect();
        TagMatcher { tables }
    }
}

/// Classifier restricted to tables of one geometry type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagMatcher {
    tables: BTreeMap<String, TableSpec>,
}

impl TagMatcher {
    /// Tables whose predicates accept the tags.
    #[must_use]
    pub fn matches(&self, tags: &Tags) -> Vec<TableMatch> {
        classify_tables(self.tables.iter(), tags)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

fn classify_tables<'a, I>(tables: I, tags: &Tags) -> Vec<TableMatch>
where
    I: IntoIterator<Item = (&'a String, &'a TableSpec)>,
{
    if tags.is_empty() {
        return Vec::new();
    }
    tables
        .into_iter()
        .filter_map(|(name, spec)| {
            spec.matching_tag(tags).map(|(key, value)| TableMatch {
                table: name.clone(),
                table_type: spec.table_type,
                key: key.to_owned(),
                value: value.to_owned(),
            })
        })
        .collect()
}

fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_lowercase() || first == '_')
        && chars.all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_')
}
