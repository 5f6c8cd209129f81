//! Database-ready rows produced by the write pass.

use geo::Geometry;

use crate::{ElementRef, TableMatch, Tags};

/// A classified, resolved primitive ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Destination table.
    pub table: String,
    /// Source primitive.
    pub element: ElementRef,
    /// Tag key and value that routed the primitive into `table`.
    pub key: String,
    pub value: String,
    pub tags: Tags,
    /// WGS84 geometry (`x = longitude`, `y = latitude`).
    pub geometry: Geometry<f64>,
}

impl Row {
    /// Build a row for one classification match.
    pub fn from_match(
        table_match: TableMatch,
        element: ElementRef,
        tags: Tags,
        geometry: Geometry<f64>,
    ) -> Self {
        Self {
            table: table_match.table,
            element,
            key: table_match.key,
            value: table_match.value,
            tags,
            geometry,
        }
    }
}
