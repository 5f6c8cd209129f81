//! SQLite destination with staging, production and backup namespaces.
//!
//! Every mapping table exists in up to three namespaces distinguished by
//! name prefix: `import_<table>` (staging), `<table>` (production) and
//! `backup_<table>`. Deployment renames tables between namespaces inside a
//! single transaction.
//!
//! Table names are remembered in the `geoport_tables` registry so deployment
//! runs without a mapping still see every table an earlier import created.
//! Mapping tables may not use the registry name or a namespace prefix.
#![forbid(unsafe_code)]

use camino::{Utf8Path, Utf8PathBuf};
use geoport_core::{
    Capabilities, Deployer, DeploymentStatus, Finisher, Mapping, Row, Sink, SinkError, TableType,
};
use log::{debug, info};
use rusqlite::{Connection, OptionalExtension, Transaction};
use std::collections::BTreeSet;

const STAGING_PREFIX: &str = "import_";
const PRODUCTION_PREFIX: &str = "";
const BACKUP_PREFIX: &str = "backup_";
const REGISTRY_TABLE: &str = "geoport_tables";
const SQLITE_INTERNAL_PREFIX: &str = "sqlite_";

/// [`Sink`] writing rows into a SQLite database file.
///
/// Tags and geometries are stored as JSON text.
#[derive(Debug)]
pub struct SqliteSink {
    path: Utf8PathBuf,
    connection: Connection,
    mapped: Vec<(String, TableType)>,
    tables: BTreeSet<String>,
    initialised: bool,
}

impl SqliteSink {
    /// Open (creating when absent) the database at `path`.
    ///
    /// Rows are accepted for the tables of `mapping`; deployment covers those
    /// tables plus every table registered by earlier imports.
    pub fn open(path: &Utf8Path, mapping: Option<&Mapping>) -> Result<Self, SinkError> {
        if let Some(mapping) = mapping {
            check_table_names(mapping)?;
        }
        geoport_fs::ensure_parent_dir(path)
            .map_err(|source| SinkError::backend("create database directory", source))?;
        let connection = Connection::open(path.as_std_path())
            .map_err(|source| SinkError::backend("open database", source))?;
        connection
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {REGISTRY_TABLE} (
                     name TEXT PRIMARY KEY,
                     type TEXT NOT NULL
                 );"
            ))
            .map_err(|source| SinkError::backend("create table registry", source))?;
        let mapped: Vec<(String, TableType)> = mapping
            .map(|mapping| {
                mapping
                    .tables()
                    .map(|(name, table_type)| (name.to_owned(), table_type))
                    .collect()
            })
            .unwrap_or_default();
        let mut tables = registered_tables(&connection)?;
        tables.extend(mapped.iter().map(|(name, _)| name.clone()));
        Ok(Self {
            path: path.to_path_buf(),
            connection,
            mapped,
            tables,
            initialised: false,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Count rows of `table` in the staging namespace.
    pub fn staged_rows(&self, table: &str) -> Result<u64, SinkError> {
        self.count_rows(STAGING_PREFIX, table)
    }

    /// Count rows of `table` in the production namespace.
    pub fn production_rows(&self, table: &str) -> Result<u64, SinkError> {
        self.count_rows(PRODUCTION_PREFIX, table)
    }

    fn count_rows(&self, prefix: &str, table: &str) -> Result<u64, SinkError> {
        let name = qualified(prefix, table);
        if !table_exists(&self.connection, &name)? {
            return Ok(0);
        }
        let count: i64 = self
            .connection
            .query_row(&format!("SELECT COUNT(*) FROM \"{name}\""), [], |row| {
                row.get(0)
            })
            .map_err(|source| SinkError::backend("count rows", source))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn namespace_has_data(&self, prefix: &str) -> Result<bool, SinkError> {
        for table in &self.tables {
            if table_exists(&self.connection, &qualified(prefix, table))? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Sink for SqliteSink {
    fn init(&mut self) -> Result<(), SinkError> {
        let mapped = &self.mapped;
        in_transaction(&mut self.connection, "create staging tables", |tx| {
            for (table, table_type) in mapped {
                let name = qualified(STAGING_PREFIX, table);
                tx.execute_batch(&format!(
                    "DROP TABLE IF EXISTS \"{name}\";
                     CREATE TABLE \"{name}\" (
                         id INTEGER NOT NULL,
                         kind TEXT NOT NULL,
                         key TEXT NOT NULL,
                         value TEXT NOT NULL,
                         tags TEXT NOT NULL,
                         geometry TEXT NOT NULL
                     );"
                ))
                .map_err(|source| SinkError::backend("create staging table", source))?;
                tx.execute(
                    &format!("INSERT OR REPLACE INTO {REGISTRY_TABLE} (name, type) VALUES (?1, ?2)"),
                    (table, format!("{table_type:?}")),
                )
                .map_err(|source| SinkError::backend("register table", source))?;
                debug!("Created staging table {name} for {table_type:?} rows");
            }
            Ok(())
        })?;
        self.initialised = true;
        Ok(())
    }

    fn insert(&mut self, batch: &[Row]) -> Result<(), SinkError> {
        if !self.initialised {
            return Err(SinkError::NotInitialised);
        }
        let mapped = &self.mapped;
        in_transaction(&mut self.connection, "commit batch", |tx| {
            for row in batch {
                if !mapped.iter().any(|(table, _)| *table == row.table) {
                    return Err(SinkError::UnknownTable {
                        table: row.table.clone(),
                        element: row.element.to_string(),
                    });
                }
                let id = i64::try_from(row.element.id)
                    .map_err(|source| SinkError::backend("convert element id", source))?;
                let tags = serde_json::to_string(&row.tags)
                    .map_err(|source| SinkError::backend("encode tags", source))?;
                let geometry = serde_json::to_string(&row.geometry)
                    .map_err(|source| SinkError::backend("encode geometry", source))?;
                let name = qualified(STAGING_PREFIX, &row.table);
                tx.prepare_cached(&format!(
                    "INSERT INTO \"{name}\" (id, kind, key, value, tags, geometry)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                ))
                .and_then(|mut statement| {
                    statement.execute((
                        id,
                        row.element.kind.to_string(),
                        &row.key,
                        &row.value,
                        tags,
                        geometry,
                    ))
                })
                .map_err(|source| SinkError::backend("insert row", source))?;
            }
            Ok(())
        })
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    fn as_finisher(&mut self) -> Option<&mut dyn Finisher> {
        Some(self)
    }

    fn as_deployer(&mut self) -> Option<&mut dyn Deployer> {
        Some(self)
    }
}

impl Finisher for SqliteSink {
    fn finish(&mut self) -> Result<(), SinkError> {
        let mapped = &self.mapped;
        in_transaction(&mut self.connection, "create indexes", |tx| {
            for (table, _) in mapped {
                let name = qualified(STAGING_PREFIX, table);
                if table_exists(tx, &name)? {
                    create_id_index(tx, &name)?;
                }
            }
            Ok(())
        })?;
        info!("Indexed staging tables in {}", self.path);
        Ok(())
    }
}

impl Deployer for SqliteSink {
    fn status(&mut self) -> Result<DeploymentStatus, SinkError> {
        Ok(DeploymentStatus {
            staging: self.namespace_has_data(STAGING_PREFIX)?,
            production: self.namespace_has_data(PRODUCTION_PREFIX)?,
            backup: self.namespace_has_data(BACKUP_PREFIX)?,
        })
    }

    fn deploy(&mut self) -> Result<(), SinkError> {
        let tables = &self.tables;
        in_transaction(&mut self.connection, "deploy", |tx| {
            for table in tables {
                drop_table(tx, &qualified(BACKUP_PREFIX, table))?;
                move_table(tx, table, PRODUCTION_PREFIX, BACKUP_PREFIX)?;
                move_table(tx, table, STAGING_PREFIX, PRODUCTION_PREFIX)?;
            }
            Ok(())
        })
    }

    fn revert_deploy(&mut self) -> Result<(), SinkError> {
        let tables = &self.tables;
        in_transaction(&mut self.connection, "revert deploy", |tx| {
            for table in tables {
                drop_table(tx, &qualified(STAGING_PREFIX, table))?;
                move_table(tx, table, PRODUCTION_PREFIX, STAGING_PREFIX)?;
                move_table(tx, table, BACKUP_PREFIX, PRODUCTION_PREFIX)?;
            }
            Ok(())
        })
    }

    fn remove_backup(&mut self) -> Result<(), SinkError> {
        let tables = &self.tables;
        in_transaction(&mut self.connection, "remove backup", |tx| {
            for table in tables {
                drop_table(tx, &qualified(BACKUP_PREFIX, table))?;
            }
            Ok(())
        })
    }
}

fn in_transaction<F>(
    connection: &mut Connection,
    operation: &'static str,
    body: F,
) -> Result<(), SinkError>
where
    F: FnOnce(&Transaction<'_>) -> Result<(), SinkError>,
{
    let transaction = connection
        .transaction()
        .map_err(|source| SinkError::backend("begin transaction", source))?;
    body(&transaction)?;
    transaction
        .commit()
        .map_err(|source| SinkError::backend(operation, source))
}

fn check_table_names(mapping: &Mapping) -> Result<(), SinkError> {
    let reserved = |name: &str| {
        name == REGISTRY_TABLE
            || [STAGING_PREFIX, BACKUP_PREFIX, SQLITE_INTERNAL_PREFIX]
                .iter()
                .any(|prefix| name.starts_with(prefix))
    };
    mapping
        .tables()
        .find(|(name, _)| reserved(name))
        .map_or(Ok(()), |(name, _)| {
            Err(SinkError::ReservedTableName {
                table: name.to_owned(),
            })
        })
}

fn registered_tables(connection: &Connection) -> Result<BTreeSet<String>, SinkError> {
    let mut statement = connection
        .prepare(&format!("SELECT name FROM {REGISTRY_TABLE}"))
        .map_err(|source| SinkError::backend("read table registry", source))?;
    let names = statement
        .query_map([], |row| row.get::<_, String>(0))
        .and_then(|rows| rows.collect::<Result<BTreeSet<_>, _>>())
        .map_err(|source| SinkError::backend("read table registry", source))?;
    Ok(names)
}

fn qualified(prefix: &str, table: &str) -> String {
    format!("{prefix}{table}")
}

fn index_name(table: &str) -> String {
    format!("{table}_id_idx")
}

fn table_exists(connection: &Connection, name: &str) -> Result<bool, SinkError> {
    schema_entry_exists(connection, "table", name)
}

fn schema_entry_exists(connection: &Connection, kind: &str, name: &str) -> Result<bool, SinkError> {
    connection
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = ?1 AND name = ?2",
            [kind, name],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
        .map_err(|source| SinkError::backend("inspect schema", source))
}

fn create_id_index(tx: &Transaction<'_>, table: &str) -> Result<(), SinkError> {
    let index = index_name(table);
    tx.execute_batch(&format!(
        "CREATE INDEX IF NOT EXISTS \"{index}\" ON \"{table}\" (id);"
    ))
    .map_err(|source| SinkError::backend("create index", source))
}

fn drop_table(tx: &Transaction<'_>, name: &str) -> Result<(), SinkError> {
    tx.execute_batch(&format!("DROP TABLE IF EXISTS \"{name}\";"))
        .map_err(|source| SinkError::backend("drop table", source))
}

/// Rename `table` from one namespace to another, carrying its id index.
///
/// A missing source table is left alone.
fn move_table(
    tx: &Transaction<'_>,
    table: &str,
    from_prefix: &str,
    to_prefix: &str,
) -> Result<(), SinkError> {
    let from = qualified(from_prefix, table);
    let to = qualified(to_prefix, table);
    if !table_exists(tx, &from)? {
        return Ok(());
    }
    tx.execute_batch(&format!("ALTER TABLE \"{from}\" RENAME TO \"{to}\";"))
        .map_err(|source| SinkError::backend("rename table", source))?;
    // SQLite keeps index names across renames.
    if schema_entry_exists(tx, "index", &index_name(&from))? {
        tx.execute_batch(&format!("DROP INDEX \"{}\";", index_name(&from)))
            .map_err(|source| SinkError::backend("drop index", source))?;
        create_id_index(tx, &to)?;
    }
    Ok(())
}
