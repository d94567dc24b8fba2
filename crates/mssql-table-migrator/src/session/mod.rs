//! Migration sessions.
//!
//! A session owns its connection(s) and transaction for its whole
//! lifetime and exposes the operations callers drive a migration with:
//!
//! ```text
//! open -> [begin_transaction] -> check_table_exists / copy_table_schema / migrate_table
//!      -> [commit_transaction | rollback_transaction] -> close
//! ```
//!
//! Two strategies implement [`MigrationSession`]:
//!
//! - [`SingleTopologySession`]: one connection serves both sides; data is
//!   copied with `INSERT ... SELECT`.
//! - [`DualTopologySession`]: separate source and destination connections;
//!   transactions live on the destination only and data is streamed into a
//!   bulk load.
//!
//! Use [`SessionFactory`] to build either one from explicit or default
//! connection descriptors.

mod dual;
mod factory;
mod single;

pub use dual::DualTopologySession;
pub use factory::SessionFactory;
pub use single::SingleTopologySession;

use std::fmt;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::connection::{MssqlConnection, TransactionHandle};
use crate::core::{ColumnDescriptor, IndexDescriptor, TableRef};
use crate::error::{MigrateError, Result};
use crate::transfer::DataMover;
use crate::{ddl, index, metadata};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Open,
    InTransaction,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Closed => "closed",
            SessionState::Open => "open",
            SessionState::InTransaction => "in transaction",
        };
        f.write_str(s)
    }
}

/// How many physical connections back a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    Single,
    Dual,
}

impl Topology {
    /// Data copy strategy used by this topology.
    pub fn data_mover(&self) -> DataMover {
        match self {
            Topology::Single => DataMover::InDatabase,
            Topology::Dual => DataMover::Streaming,
        }
    }
}

/// Operations shared by every session strategy.
///
/// `copy_table_schema` and `migrate_table` return `Ok(true)` on success and
/// propagate every failure as an error; a failed call does not roll back
/// an active transaction, that is left to the caller or to `close`.
#[async_trait]
pub trait MigrationSession: Send {
    /// Which topology backs this session.
    fn topology(&self) -> Topology;

    /// Current lifecycle state.
    fn state(&self) -> SessionState;

    /// Establish every connection the strategy needs. Closed -> Open.
    async fn open(&mut self) -> Result<()>;

    /// Roll back any pending transaction and release all connections.
    ///
    /// Any state -> Closed. Calling it again is a no-op. Connections are
    /// released even when the rollback fails; that failure is returned.
    async fn close(&mut self) -> Result<()>;

    /// Open -> InTransaction.
    async fn begin_transaction(&mut self) -> Result<()>;

    /// InTransaction -> Open, keeping the work.
    async fn commit_transaction(&mut self) -> Result<()>;

    /// InTransaction -> Open, discarding the work.
    async fn rollback_transaction(&mut self) -> Result<()>;

    /// Whether `table` exists on the destination side.
    async fn check_table_exists(&mut self, table: &TableRef) -> Result<bool>;

    /// Create `destination` (default: same schema and name as `source`)
    /// with the source's columns, primary key and indexes, but no rows.
    async fn copy_table_schema(
        &mut self,
        source: &TableRef,
        destination: Option<&TableRef>,
    ) -> Result<bool>;

    /// `copy_table_schema` followed by a copy of every row.
    async fn migrate_table(
        &mut self,
        source: &TableRef,
        destination: Option<&TableRef>,
    ) -> Result<bool>;
}

/// Connections and transaction held by an open session.
///
/// Each strategy keeps one of these in an `Option`: `None` is Closed,
/// `Some` without a transaction is Open, and `Some` with a transaction is
/// InTransaction.
pub struct SessionContext<C> {
    pub connections: C,
    pub transaction: Option<TransactionHandle>,
}

impl<C> SessionContext<C> {
    pub fn new(connections: C) -> Self {
        Self {
            connections,
            transaction: None,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.transaction.is_some() {
            SessionState::InTransaction
        } else {
            SessionState::Open
        }
    }

    /// Fail unless the context is Open (no transaction yet).
    pub fn ensure_no_transaction(&self) -> Result<()> {
        if self.transaction.is_some() {
            return Err(MigrateError::state("a transaction is already active"));
        }
        Ok(())
    }
}

/// The active transaction, or a state error naming `operation`.
///
/// Takes the field rather than the context so the connections stay
/// borrowable alongside the returned handle.
pub fn active_transaction<'a>(
    transaction: &'a Option<TransactionHandle>,
    operation: &str,
) -> Result<&'a TransactionHandle> {
    transaction
        .as_ref()
        .ok_or_else(|| MigrateError::state(format!("no transaction to {}", operation)))
}

/// State of an optional context.
pub fn state_of<C>(context: &Option<SessionContext<C>>) -> SessionState {
    context
        .as_ref()
        .map_or(SessionState::Closed, SessionContext::state)
}

/// Borrow the context of an open session, or fail with a state error.
pub fn require_open<'a, C>(
    context: &'a mut Option<SessionContext<C>>,
    operation: &str,
) -> Result<&'a mut SessionContext<C>> {
    context
        .as_mut()
        .ok_or_else(|| MigrateError::state(format!("session must be opened before {}", operation)))
}

/// Destination for a copy: the explicit one, or the source's own name.
pub fn resolve_destination(source: &TableRef, destination: Option<&TableRef>) -> TableRef {
    destination.cloned().unwrap_or_else(|| source.clone())
}

/// Source table metadata captured before any destination DDL runs.
#[derive(Debug, Clone)]
pub struct SchemaSnapshot {
    pub columns: Vec<ColumnDescriptor>,
    pub indexes: Vec<IndexDescriptor>,
}

/// Read the columns and indexes of `source`.
///
/// Fails with `MetadataNotFound` when the table has no columns.
pub async fn read_schema(
    conn: &mut MssqlConnection,
    source: &TableRef,
    tx: Option<&TransactionHandle>,
) -> Result<SchemaSnapshot> {
    let columns = metadata::read_columns(conn, source, tx).await?;
    if columns.is_empty() {
        return Err(MigrateError::MetadataNotFound(source.to_string()));
    }
    let indexes = metadata::read_indexes(conn, source, tx).await?;
    Ok(SchemaSnapshot { columns, indexes })
}

/// Create `destination` from `snapshot`, then recreate its indexes.
pub async fn apply_schema(
    conn: &mut MssqlConnection,
    snapshot: &SchemaSnapshot,
    destination: &TableRef,
    tx: Option<&TransactionHandle>,
) -> Result<()> {
    let create_sql = ddl::build_create_table(&snapshot.columns, destination)?;
    debug!("Table DDL: {}", create_sql);

    let client = conn.scope(tx)?;
    client.execute(create_sql.as_str(), &[]).await.map_err(|e| {
        MigrateError::from_driver(format!("creating table {}", destination), e)
    })?;

    index::create_indexes(conn, destination, &snapshot.indexes, tx).await?;

    info!(
        "Created {} with {} columns and {} indexes",
        destination,
        snapshot.columns.len(),
        snapshot.indexes.len()
    );
    Ok(())
}
