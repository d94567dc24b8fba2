//! Catalog metadata types produced by introspection.

use serde::{Deserialize, Serialize};

/// Column metadata, as read from `INFORMATION_SCHEMA.COLUMNS`.
///
/// The catalog populates at most one sizing family per column: character
/// and binary types carry `max_length`, exact numerics carry
/// `precision`/`scale`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,

    /// Data type as reported by the catalog (e.g. "int", "varchar", "decimal").
    pub sql_type: String,

    /// Maximum length in characters (or bytes for binary types); `-1` means `max`.
    pub max_length: Option<i32>,

    /// Numeric precision.
    pub precision: Option<u8>,

    /// Numeric scale.
    pub scale: Option<i32>,

    /// Default expression exactly as stored in the catalog, e.g. `((0))`.
    pub default_expr: Option<String>,

    /// Whether the column accepts NULL.
    pub nullable: bool,
}

impl ColumnDescriptor {
    /// Precision and scale, when both are present.
    pub fn precision_scale(&self) -> Option<(u8, i32)> {
        match (self.precision, self.scale) {
            (Some(p), Some(s)) => Some((p, s)),
            _ => None,
        }
    }
}

/// Physical storage kind of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    Clustered,
    Nonclustered,
}

impl IndexKind {
    /// Map a `sys.indexes.type_desc` value.
    ///
    /// Only `CLUSTERED` rowstore indexes are clustered; every other storage
    /// type (nonclustered, columnstore, xml, spatial, ...) is recreated as a
    /// nonclustered index.
    pub fn from_type_desc(type_desc: &str) -> Self {
        if type_desc.trim().eq_ignore_ascii_case("CLUSTERED") {
            IndexKind::Clustered
        } else {
            IndexKind::Nonclustered
        }
    }

    /// SQL keyword for this kind.
    pub fn as_sql(&self) -> &'static str {
        match self {
            IndexKind::Clustered => "CLUSTERED",
            IndexKind::Nonclustered => "NONCLUSTERED",
        }
    }
}

/// Index or primary key metadata, merged from one row per key column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Index name on the source table.
    pub name: String,

    /// Clustered or nonclustered.
    pub kind: IndexKind,

    /// Whether this index backs the primary key constraint.
    pub is_primary_key: bool,

    /// Whether the index enforces uniqueness.
    pub is_unique: bool,

    /// Key columns, in key-ordinal order.
    pub columns: Vec<String>,

    /// Non-key columns carried in the leaf level (`INCLUDE`).
    pub included_columns: Vec<String>,

    /// Predicate of a filtered index, as stored in
    /// `sys.indexes.filter_definition` (e.g. `([Code] IS NOT NULL)`).
    pub filter: Option<String>,
}

/// A single row of index catalog output: one column of one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumnRow {
    pub index_name: String,
    pub type_desc: String,
    pub is_primary_key: bool,
    pub is_unique: bool,
    pub is_included: bool,
    pub column_name: String,
    pub filter: Option<String>,
}

/// Fold index catalog rows into descriptors.
///
/// Rows must arrive grouped by index name with key columns in key-ordinal
/// order. A change of index name closes the current group; the trailing
/// group is flushed once the rows run out.
pub fn group_index_rows<I>(rows: I) -> Vec<IndexDescriptor>
where
    I: IntoIterator<Item = IndexColumnRow>,
{
    let mut indexes = Vec::new();
    let mut current: Option<IndexDescriptor> = None;

    for row in rows {
        let starts_new_group = current
            .as_ref()
            .map_or(true, |index| index.name != row.index_name);

        if starts_new_group {
            if let Some(done) = current.take() {
                indexes.push(done);
            }
            current = Some(IndexDescriptor {
                name: row.index_name.clone(),
                kind: IndexKind::from_type_desc(&row.type_desc),
                is_primary_key: row.is_primary_key,
                is_unique: row.is_unique,
                columns: Vec::new(),
                included_columns: Vec::new(),
                filter: row.filter.clone(),
            });
        }

        if let Some(index) = current.as_mut() {
            if row.is_included {
                index.included_columns.push(row.column_name);
            } else {
                index.columns.push(row.column_name);
            }
        }
    }

    if let Some(done) = current {
        indexes.push(done);
    }

    indexes
}
