//! Destination backends selected by connection string.
//!
//! Connection strings take the form `<scheme>:<target>`. The only scheme is
//! `sqlite:<path>`, available with the `store-sqlite` feature.

#[cfg(feature = "store-sqlite")]
pub mod sqlite;

use camino::Utf8PathBuf;
use geoport_core::{Mapping, Sink, SinkError};
use thiserror::Error;

#[cfg(feature = "store-sqlite")]
pub use sqlite::SqliteSink;

/// Errors raised while interpreting or opening a connection string.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection string {connection:?} has no scheme")]
    MissingScheme { connection: String },
    #[error("unknown connection scheme {scheme:?}")]
    UnknownScheme { scheme: String },
    #[error("connection string {connection:?} names no target")]
    MissingTarget { connection: String },
    #[error("{scheme} support was not compiled in")]
    BackendDisabled { scheme: &'static str },
    #[error("failed to open {connection}")]
    Open {
        connection: String,
        #[source]
        source: SinkError,
    },
}

/// Parsed destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connection {
    Sqlite(Utf8PathBuf),
}

impl Connection {
    /// Parse `raw` without touching the destination.
    ///
    /// # Examples
    /// ```
    /// use geoport_data::database::Connection;
    ///
    /// let parsed = Connection::parse("sqlite:/tmp/osm.sqlite").expect("valid");
    /// assert_eq!(parsed, Connection::Sqlite("/tmp/osm.sqlite".into()));
    /// assert!(Connection::parse("postgis://localhost/osm").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<Self, ConnectionError> {
        let Some((scheme, target)) = raw.split_once(':') else {
            return Err(ConnectionError::MissingScheme {
                connection: raw.to_owned(),
            });
        };
        match scheme {
            "sqlite" if target.is_empty() => Err(ConnectionError::MissingTarget {
                connection: raw.to_owned(),
            }),
            "sqlite" => Ok(Self::Sqlite(Utf8PathBuf::from(target))),
            other => Err(ConnectionError::UnknownScheme {
                scheme: other.to_owned(),
            }),
        }
    }

    /// Open a sink for the tables of `mapping`.
    ///
    /// Deployment-only runs pass no mapping; the backend then works on the
    /// tables it already knows.
    pub fn open_sink(&self, mapping: Option<&Mapping>) -> Result<Box<dyn Sink>, ConnectionError> {
        match self {
            #[cfg(feature = "store-sqlite")]
            Self::Sqlite(path) => SqliteSink::open(path, mapping)
                .map(|sink| Box::new(sink) as Box<dyn Sink>)
                .map_err(|source| ConnectionError::Open {
                    connection: format!("sqlite:{path}"),
                    source,
                }),
            #[cfg(not(feature = "store-sqlite"))]
            Self::Sqlite(_) => {
                let _ = mapping;
                Err(ConnectionError::BackendDisabled { scheme: "sqlite" })
            }
        }
    }
}

/// Parse `connection` and open its sink.
pub fn open_sink(
    connection: &str,
    mapping: Option<&Mapping>,
) -> Result<Box<dyn Sink>, ConnectionError> {
    Connection::parse(connection)?.open_sink(mapping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("sqlite")]
    #[case("postgis://localhost/osm")]
    #[case("sqlite:")]
    fn rejects_unusable_connections(#[case] raw: &str) {
        assert!(Connection::parse(raw).is_err());
    }

    #[rstest]
    fn unknown_scheme_is_named() {
        match Connection::parse("mysql:osm") {
            Err(ConnectionError::UnknownScheme { scheme }) => assert_eq!(scheme, "mysql"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[cfg(feature = "store-sqlite")]
    #[rstest]
    fn opens_sqlite_sink() {
        let tmp = tempfile::tempdir().expect("create temp dir");
        let target = tmp.path().join("osm.sqlite");
        let mapping = Mapping::from_json(
            r#"{"tables": {"cafes": {"type": "point", "mapping": {"amenity": ["cafe"]}}}}"#,
        )
        .expect("mapping");
        let sink = open_sink(&format!("sqlite:{}", target.display()), Some(&mapping)).expect("open");
        assert!(!sink.capabilities().is_empty());
    }
}
