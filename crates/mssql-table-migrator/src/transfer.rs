//! Row data copy between a source and a destination table.
//!
//! Two strategies, matching the two session topologies:
//!
//! - [`DataMover::InDatabase`]: a single `INSERT INTO ... SELECT * FROM ...`
//!   on the shared connection, atomic within the active transaction.
//! - [`DataMover::Streaming`]: a forward-only read on the source connection
//!   feeding a TDS bulk load on the destination connection. Rows are
//!   forwarded one at a time, so memory use does not grow with table size,
//!   and the bulk load runs inside the destination transaction when one is
//!   active. Rows carrying strings too large for the bulk load are held
//!   back and written with parameterized `INSERT`s instead.

use std::borrow::Cow;

use futures::{Stream, TryStreamExt};
use tiberius::{ColumnData, Row, ToSql, TokenRow};
use tracing::{debug, info};

use crate::connection::{MssqlConnection, TdsClient, TransactionHandle};
use crate::core::{quote_column_list, TableRef};
use crate::error::{MigrateError, Result};

/// How row data travels from source to destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataMover {
    InDatabase,
    Streaming,
}

impl DataMover {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataMover::InDatabase => "insert-select",
            DataMover::Streaming => "bulk-load",
        }
    }
}

/// Statement used for the in-database copy.
pub fn insert_select_sql(source: &TableRef, destination: &TableRef) -> String {
    format!("INSERT INTO {} SELECT * FROM {}", destination, source)
}

/// Statement used to read the source for a streaming copy.
pub fn select_all_sql(source: &TableRef) -> String {
    format!("SELECT * FROM {}", source)
}

/// Copy all rows from `source` to `destination` on a single connection.
///
/// Returns the number of rows inserted.
pub async fn copy_in_database(
    conn: &mut MssqlConnection,
    source: &TableRef,
    destination: &TableRef,
    tx: Option<&TransactionHandle>,
) -> Result<u64> {
    let sql = insert_select_sql(source, destination);
    debug!("Data copy: {}", sql);

    let client = conn.scope(tx)?;
    let result = client.execute(sql.as_str(), &[]).await.map_err(|e| {
        MigrateError::from_driver(format!("copying rows {} -> {}", source, destination), e)
    })?;

    let rows = result.total();
    info!(
        "Copied {} rows {} -> {} ({})",
        rows,
        source,
        destination,
        DataMover::InDatabase.as_str()
    );
    Ok(rows)
}

/// Tiberius bulk load rejects string values whose UTF-16 encoding exceeds
/// this many bytes.
pub const BULK_LOAD_STRING_LIMIT: usize = 65535;

/// SQL Server caps a parameterized statement at 2100 parameters.
const MAX_STATEMENT_PARAMS: usize = 2100;

/// Stream all rows from `source` on one connection into `destination` on another.
///
/// `tx` is checked against both connections: it enlists the destination
/// writes when it belongs to the destination connection and is ignored for
/// the source read. The bulk load is opened on the first row it can carry,
/// so an empty source issues no bulk load at all. Rows holding a string
/// over [`BULK_LOAD_STRING_LIMIT`] are set aside and written afterwards
/// with parameterized `INSERT`s on the same connection and transaction.
/// Returns the number of rows written.
pub async fn copy_streaming(
    source_conn: &mut MssqlConnection,
    destination_conn: &mut MssqlConnection,
    source: &TableRef,
    destination: &TableRef,
    tx: Option<&TransactionHandle>,
) -> Result<u64> {
    let select = select_all_sql(source);
    let destination_name = destination.qualified();
    let read_context = format!("reading rows from {}", source);
    let load_context = format!("bulk loading rows into {}", destination);

    let source_client = source_conn.scope(tx)?;
    let destination_client = destination_conn.scope(tx)?;

    debug!("Data copy: {} -> bulk load {}", select, destination_name);

    let stream = source_client
        .simple_query(select)
        .await
        .map_err(|e| MigrateError::from_driver(read_context.as_str(), e))?;
    let mut rows = stream.into_row_stream();

    let mut columns = Vec::new();
    let mut oversized = Vec::new();
    let mut bulk_loaded = 0u64;

    let first = next_bulk_row(&mut rows, &mut columns, &mut oversized, &read_context).await?;
    if let Some(first) = first {
        let mut bulk_load = destination_client
            .bulk_insert(&destination_name)
            .await
            .map_err(|e| MigrateError::from_driver(load_context.as_str(), e))?;

        let mut next = Some(first);
        while let Some(values) = next {
            bulk_load
                .send(token_row(values))
                .await
                .map_err(|e| MigrateError::from_driver(load_context.as_str(), e))?;
            bulk_loaded += 1;
            next = next_bulk_row(&mut rows, &mut columns, &mut oversized, &read_context).await?;
        }

        bulk_load
            .finalize()
            .await
            .map_err(|e| MigrateError::from_driver(load_context.as_str(), e))?;
    } else {
        debug!("No bulk-loadable rows in {}", source);
    }

    let inserted = if oversized.is_empty() {
        0
    } else {
        debug!(
            "Falling back to INSERT for {} rows with oversized strings",
            oversized.len()
        );
        insert_rows(destination_client, destination, &columns, &oversized).await?
    };

    let copied = bulk_loaded + inserted;
    info!(
        "Copied {} rows {} -> {} ({}, {} via INSERT)",
        copied,
        source,
        destination,
        DataMover::Streaming.as_str(),
        inserted
    );
    Ok(copied)
}

/// Pull rows until one fits the bulk load, setting oversized rows aside.
///
/// Records the source column names from the first row seen.
async fn next_bulk_row<S>(
    rows: &mut S,
    columns: &mut Vec<String>,
    oversized: &mut Vec<Vec<ColumnData<'static>>>,
    context: &str,
) -> Result<Option<Vec<ColumnData<'static>>>>
where
    S: Stream<Item = tiberius::Result<Row>> + Unpin,
{
    while let Some(row) = rows
        .try_next()
        .await
        .map_err(|e| MigrateError::from_driver(context, e))?
    {
        if columns.is_empty() {
            *columns = row.columns().iter().map(|c| c.name().to_string()).collect();
        }

        let values: Vec<ColumnData<'static>> = row.into_iter().collect();
        if row_has_oversized_strings(&values) {
            oversized.push(values);
        } else {
            return Ok(Some(values));
        }
    }
    Ok(None)
}

fn token_row(values: Vec<ColumnData<'static>>) -> TokenRow<'static> {
    let mut row = TokenRow::new();
    for value in values {
        row.push(value);
    }
    row
}

/// Whether any string value is too large for the bulk load.
pub fn row_has_oversized_strings(values: &[ColumnData<'_>]) -> bool {
    values.iter().any(|value| match value {
        ColumnData::String(Some(s)) => utf16_byte_len(s) > BULK_LOAD_STRING_LIMIT,
        _ => false,
    })
}

fn utf16_byte_len(s: &str) -> usize {
    s.chars().map(|c| c.len_utf16() * 2).sum()
}

/// Rows per `INSERT` so that the statement stays under the parameter cap.
fn rows_per_insert(column_count: usize) -> usize {
    if column_count == 0 {
        1
    } else {
        (MAX_STATEMENT_PARAMS / column_count).max(1)
    }
}

/// Build `INSERT INTO t ([a], [b]) VALUES (@P1, @P2), (@P3, @P4), ...`.
fn insert_values_sql(destination: &TableRef, columns: &[String], row_count: usize) -> String {
    let mut param = 0;
    let groups: Vec<String> = (0..row_count)
        .map(|_| {
            let placeholders: Vec<String> = columns
                .iter()
                .map(|_| {
                    param += 1;
                    format!("@P{}", param)
                })
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        destination,
        quote_column_list(columns),
        groups.join(", ")
    )
}

/// Borrowed view of a streamed value, passed as a statement parameter.
struct ColumnParam<'a>(&'a ColumnData<'static>);

impl ToSql for ColumnParam<'_> {
    fn to_sql(&self) -> ColumnData<'_> {
        match self.0 {
            ColumnData::String(Some(s)) => ColumnData::String(Some(Cow::Borrowed(&**s))),
            ColumnData::Binary(Some(b)) => ColumnData::Binary(Some(Cow::Borrowed(&**b))),
            other => other.clone(),
        }
    }
}

/// Write rows with batched parameterized `INSERT`s.
async fn insert_rows(
    client: &mut TdsClient,
    destination: &TableRef,
    columns: &[String],
    rows: &[Vec<ColumnData<'static>>],
) -> Result<u64> {
    let context = format!("inserting oversized rows into {}", destination);
    let mut inserted = 0u64;

    for batch in rows.chunks(rows_per_insert(columns.len())) {
        let sql = insert_values_sql(destination, columns, batch.len());
        let params: Vec<ColumnParam<'_>> = batch.iter().flatten().map(ColumnParam).collect();
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();

        client
            .execute(sql.as_str(), &param_refs)
            .await
            .map_err(|e| MigrateError::from_driver(context.as_str(), e))?;
        inserted += batch.len() as u64;
    }

    Ok(inserted)
}
