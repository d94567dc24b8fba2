//! Catalog introspection.
//!
//! Reads column, index and object metadata for one table. Every query is
//! issued through [`MssqlConnection::scope`], so a read on the connection
//! that owns the active transaction runs inside it and sees uncommitted
//! DDL, while a read on any other connection runs in autocommit mode.

use tiberius::{Row, ToSql};
use tracing::debug;

use crate::connection::{MssqlConnection, TransactionHandle};
use crate::core::{group_index_rows, ColumnDescriptor, IndexColumnRow, IndexDescriptor, TableRef};
use crate::error::{MigrateError, Result};

const COLUMNS_QUERY: &str = r#"
    SELECT
        c.COLUMN_NAME,
        c.DATA_TYPE,
        c.CHARACTER_MAXIMUM_LENGTH,
        c.NUMERIC_PRECISION,
        c.NUMERIC_SCALE,
        c.COLUMN_DEFAULT,
        c.IS_NULLABLE
    FROM INFORMATION_SCHEMA.COLUMNS c
    WHERE c.TABLE_SCHEMA = @P1 AND c.TABLE_NAME = @P2
    ORDER BY c.ORDINAL_POSITION
"#;

// Included columns carry key_ordinal 0, so they sort after the key columns.
// Partitioning columns that are neither key nor included are skipped, as
// are hypothetical (tuning-advisor) and disabled indexes.
const INDEXES_QUERY: &str = r#"
    SELECT
        i.name AS index_name,
        i.type_desc,
        i.is_primary_key,
        i.is_unique,
        ic.is_included_column,
        c.name AS column_name,
        i.filter_definition
    FROM sys.indexes i
    JOIN sys.index_columns ic
        ON i.object_id = ic.object_id AND i.index_id = ic.index_id
    JOIN sys.columns c
        ON ic.object_id = c.object_id AND ic.column_id = c.column_id
    JOIN sys.objects o
        ON o.object_id = i.object_id
    WHERE SCHEMA_NAME(o.schema_id) = @P1
        AND o.name = @P2
        AND i.is_hypothetical = 0
        AND i.is_disabled = 0
        AND (ic.key_ordinal > 0 OR ic.is_included_column = 1)
    ORDER BY i.name, ic.is_included_column, ic.key_ordinal, ic.index_column_id
"#;

const OBJECT_ID_QUERY: &str = r#"
    SELECT o.object_id
    FROM sys.objects o
    WHERE SCHEMA_NAME(o.schema_id) = @P1 AND o.name = @P2 AND o.type = 'U'
"#;

const TABLE_EXISTS_QUERY: &str = r#"
    SELECT COUNT(*)
    FROM INFORMATION_SCHEMA.TABLES
    WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
"#;

/// Read column descriptors for `table` in physical column order.
///
/// Returns an empty list when the table does not exist; callers that need
/// the table decide whether that is an error.
pub async fn read_columns(
    conn: &mut MssqlConnection,
    table: &TableRef,
    tx: Option<&TransactionHandle>,
) -> Result<Vec<ColumnDescriptor>> {
    let context = format!("reading columns of {}", table);
    let rows = query_table(conn, COLUMNS_QUERY, table, tx, &context).await?;

    let columns = rows
        .iter()
        .map(|row| column_from_row(row, &context))
        .collect::<Result<Vec<_>>>()?;

    debug!("Read {} columns from {}", columns.len(), table);
    Ok(columns)
}

/// Read index and primary key descriptors for `table`.
pub async fn read_indexes(
    conn: &mut MssqlConnection,
    table: &TableRef,
    tx: Option<&TransactionHandle>,
) -> Result<Vec<IndexDescriptor>> {
    let context = format!("reading indexes of {}", table);
    let rows = query_table(conn, INDEXES_QUERY, table, tx, &context).await?;

    let index_rows = rows
        .iter()
        .map(|row| index_row_from_row(row, &context))
        .collect::<Result<Vec<_>>>()?;

    let indexes = group_index_rows(index_rows);
    debug!("Read {} indexes from {}", indexes.len(), table);
    Ok(indexes)
}

/// Resolve the catalog object id of a user table.
pub async fn object_id(
    conn: &mut MssqlConnection,
    table: &TableRef,
    tx: Option<&TransactionHandle>,
) -> Result<i32> {
    let context = format!("resolving object id of {}", table);
    let rows = query_table(conn, OBJECT_ID_QUERY, table, tx, &context).await?;

    let row = rows
        .first()
        .ok_or_else(|| MigrateError::MetadataNotFound(table.to_string()))?;
    required::<i32>(row, 0, &context)
}

/// Whether `table` exists according to `INFORMATION_SCHEMA.TABLES`.
pub async fn table_exists(
    conn: &mut MssqlConnection,
    table: &TableRef,
    tx: Option<&TransactionHandle>,
) -> Result<bool> {
    let context = format!("checking existence of {}", table);
    let rows = query_table(conn, TABLE_EXISTS_QUERY, table, tx, &context).await?;

    let count = match rows.first() {
        Some(row) => required::<i32>(row, 0, &context)?,
        None => 0,
    };
    Ok(count > 0)
}

/// Run a catalog query parameterized by `(schema, name)` and collect its rows.
async fn query_table(
    conn: &mut MssqlConnection,
    sql: &str,
    table: &TableRef,
    tx: Option<&TransactionHandle>,
    context: &str,
) -> Result<Vec<Row>> {
    let schema = table.schema();
    let name = table.name();
    let params: [&dyn ToSql; 2] = [&schema, &name];

    let client = conn.scope(tx)?;
    let stream = client
        .query(sql, &params)
        .await
        .map_err(|e| MigrateError::from_driver(context, e))?;
    stream
        .into_first_result()
        .await
        .map_err(|e| MigrateError::from_driver(context, e))
}

fn column_from_row(row: &Row, context: &str) -> Result<ColumnDescriptor> {
    let name: &str = required(row, 0, context)?;
    let sql_type: &str = required(row, 1, context)?;
    let max_length: Option<i32> = optional(row, 2, context)?;
    let precision: Option<u8> = optional(row, 3, context)?;
    let scale: Option<i32> = optional(row, 4, context)?;
    let default_expr: Option<&str> = optional(row, 5, context)?;
    let is_nullable: &str = required(row, 6, context)?;

    Ok(column_from_catalog(
        name,
        sql_type,
        max_length,
        precision,
        scale,
        default_expr,
        is_nullable,
    ))
}

/// Build a descriptor from raw `INFORMATION_SCHEMA.COLUMNS` values.
///
/// When the catalog reports a length, any numeric sizing is dropped so that
/// at most one sizing family is populated.
pub fn column_from_catalog(
    name: &str,
    sql_type: &str,
    max_length: Option<i32>,
    precision: Option<u8>,
    scale: Option<i32>,
    default_expr: Option<&str>,
    is_nullable: &str,
) -> ColumnDescriptor {
    let (precision, scale) = if max_length.is_some() {
        (None, None)
    } else {
        (precision, scale)
    };

    ColumnDescriptor {
        name: name.to_string(),
        sql_type: sql_type.to_string(),
        max_length,
        precision,
        scale,
        default_expr: default_expr.map(str::to_string),
        nullable: is_nullable.trim().eq_ignore_ascii_case("YES"),
    }
}

fn index_row_from_row(row: &Row, context: &str) -> Result<IndexColumnRow> {
    let index_name: &str = required(row, 0, context)?;
    let type_desc: &str = required(row, 1, context)?;
    let is_primary_key: bool = required(row, 2, context)?;
    let is_unique: bool = required(row, 3, context)?;
    let is_included: bool = required(row, 4, context)?;
    let column_name: &str = required(row, 5, context)?;
    let filter: Option<&str> = optional(row, 6, context)?;

    Ok(IndexColumnRow {
        index_name: index_name.to_string(),
        type_desc: type_desc.to_string(),
        is_primary_key,
        is_unique,
        is_included,
        column_name: column_name.to_string(),
        filter: filter.map(str::to_string),
    })
}

fn optional<'a, T>(row: &'a Row, idx: usize, context: &str) -> Result<Option<T>>
where
    T: tiberius::FromSql<'a>,
{
    row.try_get::<T, _>(idx)
        .map_err(|e| MigrateError::from_driver(context, e))
}

fn required<'a, T>(row: &'a Row, idx: usize, context: &str) -> Result<T>
where
    T: tiberius::FromSql<'a>,
{
    optional(row, idx, context)?.ok_or_else(|| {
        MigrateError::MetadataNotFound(format!("{}: column {} is NULL", context, idx))
    })
}
