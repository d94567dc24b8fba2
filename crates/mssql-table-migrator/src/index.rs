//! Primary key and index reconstruction on a destination table.

use chrono::{DateTime, Local};
use tracing::{debug, info};

use crate::connection::{MssqlConnection, TransactionHandle};
use crate::core::{quote_column_list, quote_mssql, IndexDescriptor, TableRef};
use crate::error::{MigrateError, Result};
use crate::metadata;

/// Format of the timestamp embedded in generated names (`yyyyMMddHHmmss`).
const NAME_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// A generated statement together with the object name it creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStatement {
    pub name: String,
    pub sql: String,
}

/// Generates constraint and index names for one replication call.
///
/// Every name shares the object id and timestamp captured when the namer
/// is created. The primary key is `PK_<objectId>_<timestamp>`; the first
/// other index is `IX_<objectId>_<timestamp>` and later ones get `_2`,
/// `_3`, ... appended.
#[derive(Debug)]
pub struct IndexNamer {
    object_id: i32,
    timestamp: String,
    indexes_named: u32,
}

impl IndexNamer {
    pub fn new(object_id: i32, now: DateTime<Local>) -> Self {
        Self {
            object_id,
            timestamp: now.format(NAME_TIMESTAMP_FORMAT).to_string(),
            indexes_named: 0,
        }
    }

    pub fn primary_key(&self) -> String {
        format!("PK_{}_{}", self.object_id, self.timestamp)
    }

    pub fn next_index(&mut self) -> String {
        self.indexes_named += 1;
        if self.indexes_named == 1 {
            format!("IX_{}_{}", self.object_id, self.timestamp)
        } else {
            format!(
                "IX_{}_{}_{}",
                self.object_id, self.timestamp, self.indexes_named
            )
        }
    }
}

/// Build the statements recreating `indexes` on `destination`, in order.
pub fn build_index_statements(
    destination: &TableRef,
    indexes: &[IndexDescriptor],
    namer: &mut IndexNamer,
) -> Vec<IndexStatement> {
    indexes
        .iter()
        .map(|index| {
            let kind = index.kind.as_sql();
            let columns = quote_column_list(&index.columns);

            if index.is_primary_key {
                let name = namer.primary_key();
                let sql = format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY {} ({})",
                    destination,
                    quote_mssql(&name),
                    kind,
                    columns
                );
                IndexStatement { name, sql }
            } else {
                let name = namer.next_index();
                let unique = if index.is_unique { "UNIQUE " } else { "" };
                let mut sql = format!(
                    "CREATE {}{} INDEX {} ON {} ({})",
                    unique,
                    kind,
                    quote_mssql(&name),
                    destination,
                    columns
                );
                if !index.included_columns.is_empty() {
                    sql.push_str(&format!(
                        " INCLUDE ({})",
                        quote_column_list(&index.included_columns)
                    ));
                }
                if let Some(filter) = &index.filter {
                    sql.push_str(" WHERE ");
                    sql.push_str(filter);
                }
                IndexStatement { name, sql }
            }
        })
        .collect()
}

/// Recreate `indexes` on `destination` over `conn`.
///
/// The timestamp is captured before anything else and the destination's
/// object id is looked up once. Statements run in descriptor order; the
/// first failure stops the remaining ones and is returned. Returns the
/// number of indexes created.
pub async fn create_indexes(
    conn: &mut MssqlConnection,
    destination: &TableRef,
    indexes: &[IndexDescriptor],
    tx: Option<&TransactionHandle>,
) -> Result<usize> {
    let now = Local::now();

    if indexes.is_empty() {
        debug!("No indexes to recreate on {}", destination);
        return Ok(0);
    }

    let object_id = metadata::object_id(conn, destination, tx).await?;
    let mut namer = IndexNamer::new(object_id, now);
    let statements = build_index_statements(destination, indexes, &mut namer);

    for statement in &statements {
        debug!("Index DDL: {}", statement.sql);
        let client = conn.scope(tx)?;
        client.execute(statement.sql.as_str(), &[]).await.map_err(|e| {
            MigrateError::from_driver(
                format!("creating {} on {}", statement.name, destination),
                e,
            )
        })?;
    }

    info!(
        "Recreated {} indexes on {}",
        statements.len(),
        destination
    );
    Ok(statements.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::IndexKind;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap()
    }

    fn index(name: &str, kind: IndexKind, pk: bool, columns: &[&str]) -> IndexDescriptor {
        IndexDescriptor {
            name: name.to_string(),
            kind,
            is_primary_key: pk,
            is_unique: pk,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            included_columns: Vec::new(),
            filter: None,
        }
    }

    #[test]
    fn test_namer_formats() {
        let mut namer = IndexNamer::new(581577110, fixed_now());
        assert_eq!(namer.primary_key(), "PK_581577110_20240305140709");
        assert_eq!(namer.next_index(), "IX_581577110_20240305140709");
        assert_eq!(namer.next_index(), "IX_581577110_20240305140709_2");
        assert_eq!(namer.next_index(), "IX_581577110_20240305140709_3");
    }

    #[test]
    fn test_clustered_primary_key_statement() {
        let destination = TableRef::dbo("Dest").unwrap();
        let indexes = vec![index("PK_TestTable", IndexKind::Clustered, true, &["ID", "SubId"])];
        let mut namer = IndexNamer::new(42, fixed_now());

        let statements = build_index_statements(&destination, &indexes, &mut namer);
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].name, "PK_42_20240305140709");
        assert_eq!(
            statements[0].sql,
            "ALTER TABLE [dbo].[Dest] ADD CONSTRAINT [PK_42_20240305140709] PRIMARY KEY CLUSTERED ([ID], [SubId])"
        );
    }

    #[test]
    fn test_nonclustered_index_statement() {
        let destination = TableRef::new("sales", "Orders").unwrap();
        let mut ix = index(
            "IX_Orders_Customer",
            IndexKind::Nonclustered,
            false,
            &["CustomerId", "OrderDate"],
        );
        ix.included_columns = vec!["Total".to_string()];
        let mut namer = IndexNamer::new(7, fixed_now());

        let statements = build_index_statements(&destination, &[ix], &mut namer);
        assert_eq!(
            statements[0].sql,
            "CREATE NONCLUSTERED INDEX [IX_7_20240305140709] ON [sales].[Orders] ([CustomerId], [OrderDate]) INCLUDE ([Total])"
        );
    }

    #[test]
    fn test_unique_index_statement() {
        let destination = TableRef::dbo("Dest").unwrap();
        let mut ux = index("UX_Code", IndexKind::Nonclustered, false, &["Code"]);
        ux.is_unique = true;
        let mut namer = IndexNamer::new(7, fixed_now());

        let statements = build_index_statements(&destination, &[ux], &mut namer);
        assert!(statements[0].sql.starts_with("CREATE UNIQUE NONCLUSTERED INDEX"));
    }

    #[test]
    fn test_filtered_unique_index_keeps_predicate() {
        let destination = TableRef::dbo("Dest").unwrap();
        let mut ux = index("UX_Code", IndexKind::Nonclustered, false, &["Code"]);
        ux.is_unique = true;
        ux.included_columns = vec!["Amount".to_string()];
        ux.filter = Some("([Code] IS NOT NULL)".to_string());
        let mut namer = IndexNamer::new(7, fixed_now());

        let statements = build_index_statements(&destination, &[ux], &mut namer);
        assert_eq!(
            statements[0].sql,
            "CREATE UNIQUE NONCLUSTERED INDEX [IX_7_20240305140709] ON [dbo].[Dest] ([Code]) \
             INCLUDE ([Amount]) WHERE ([Code] IS NOT NULL)"
        );
    }

    #[test]
    fn test_statements_follow_descriptor_order_with_unique_names() {
        let destination = TableRef::dbo("Dest").unwrap();
        let indexes = vec![
            index("IX_A", IndexKind::Nonclustered, false, &["A"]),
            index("PK_T", IndexKind::Nonclustered, true, &["ID"]),
            index("IX_B", IndexKind::Clustered, false, &["B"]),
        ];
        let mut namer = IndexNamer::new(9, fixed_now());

        let statements = build_index_statements(&destination, &indexes, &mut namer);
        let names: Vec<&str> = statements.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "IX_9_20240305140709",
                "PK_9_20240305140709",
                "IX_9_20240305140709_2"
            ]
        );
        assert!(statements[1].sql.contains("PRIMARY KEY NONCLUSTERED ([ID])"));
        assert!(statements[2].sql.starts_with("CREATE CLUSTERED INDEX"));
    }

    #[test]
    fn test_column_list_has_no_trailing_separator() {
        let destination = TableRef::dbo("Dest").unwrap();
        let indexes = vec![index("PK_T", IndexKind::Clustered, true, &["A", "B", "C"])];
        let mut namer = IndexNamer::new(1, fixed_now());

        let statements = build_index_statements(&destination, &indexes, &mut namer);
        assert!(statements[0].sql.ends_with("([A], [B], [C])"));
    }
}
