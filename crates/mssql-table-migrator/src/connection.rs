//! Physical SQL Server connections and transaction scope.
//!
//! TDS transactions belong to a connection: once `BEGIN TRANSACTION` has
//! run, every later statement on that connection executes inside it. A
//! [`TransactionHandle`] records which connection the transaction was
//! opened on, and [`MssqlConnection::scope`] checks every statement against
//! it before handing out the client:
//!
//! - a handle for this connection enlists the statement;
//! - no handle, or a handle for another connection, means autocommit;
//! - a stale handle, or a missing handle while this connection has an open
//!   transaction, is a state error.

use std::sync::atomic::{AtomicU64, Ordering};

use tiberius::Client;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{MigrateError, Result};

/// Tiberius client over a tokio TCP stream.
pub type TdsClient = Client<Compat<TcpStream>>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which side of a migration a connection serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// One connection for both source and destination.
    Shared,
    Source,
    Destination,
}

impl ConnectionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionRole::Shared => "shared",
            ConnectionRole::Source => "source",
            ConnectionRole::Destination => "destination",
        }
    }
}

/// An open transaction, tied to the connection it was started on.
///
/// Deliberately not `Clone`: the session that began the transaction is its
/// only owner.
#[derive(Debug, PartialEq, Eq)]
pub struct TransactionHandle {
    connection: ConnectionId,
}

impl TransactionHandle {
    /// Connection this transaction runs on.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    /// Whether this transaction was opened on `connection`.
    pub fn is_bound_to(&self, connection: ConnectionId) -> bool {
        self.connection == connection
    }
}

/// Decide whether a statement on `connection` runs inside `tx`.
///
/// Returns `Ok(true)` when the statement is enlisted in the transaction and
/// `Ok(false)` when it runs in autocommit mode.
pub fn resolve_scope(
    connection: ConnectionId,
    in_transaction: bool,
    tx: Option<&TransactionHandle>,
) -> Result<bool> {
    let bound = tx.is_some_and(|t| t.is_bound_to(connection));
    match (bound, in_transaction) {
        (true, true) => Ok(true),
        (false, false) => Ok(false),
        (true, false) => Err(MigrateError::state(format!(
            "transaction handle refers to connection {} which has no open transaction",
            connection
        ))),
        (false, true) => Err(MigrateError::state(format!(
            "connection {} has an open transaction; statements on it must use that transaction",
            connection
        ))),
    }
}

/// One exclusively owned SQL Server connection.
pub struct MssqlConnection {
    id: ConnectionId,
    role: ConnectionRole,
    client: TdsClient,
    in_transaction: bool,
}

impl MssqlConnection {
    /// Establish a connection described by `config`.
    pub async fn connect(config: &ConnectionConfig, role: ConnectionRole) -> Result<Self> {
        let context = format!("connecting {} database ({})", role.as_str(), config.describe());
        let tds_config = config.to_tiberius_config()?;

        let tcp = TcpStream::connect(tds_config.get_addr())
            .await
            .map_err(|e| MigrateError::connection(e, context.clone()))?;
        tcp.set_nodelay(true).ok();

        let client = Client::connect(tds_config, tcp.compat_write())
            .await
            .map_err(|e| MigrateError::connection(e, context.clone()))?;

        let id = ConnectionId::next();
        info!(
            "Connected to MSSQL {}: {} (connection {})",
            role.as_str(),
            config.describe(),
            id
        );

        Ok(Self {
            id,
            role,
            client,
            in_transaction: false,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    /// Whether a transaction is open on this connection.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Borrow the client for one statement, checked against `tx`.
    pub fn scope(&mut self, tx: Option<&TransactionHandle>) -> Result<&mut TdsClient> {
        let enlisted = resolve_scope(self.id, self.in_transaction, tx)?;
        debug!(
            "Statement on {} connection {} ({})",
            self.role.as_str(),
            self.id,
            if enlisted { "in transaction" } else { "autocommit" }
        );
        Ok(&mut self.client)
    }

    /// Start a transaction on this connection.
    pub async fn begin_transaction(&mut self) -> Result<TransactionHandle> {
        if self.in_transaction {
            return Err(MigrateError::state(format!(
                "connection {} already has an open transaction",
                self.id
            )));
        }

        self.run_batch("BEGIN TRANSACTION", "beginning transaction").await?;
        self.in_transaction = true;
        debug!("Began transaction on {} connection {}", self.role.as_str(), self.id);

        Ok(TransactionHandle { connection: self.id })
    }

    /// Commit the transaction identified by `tx`.
    pub async fn commit(&mut self, tx: &TransactionHandle) -> Result<()> {
        self.check_owned(tx)?;
        self.run_batch("COMMIT TRANSACTION", "committing transaction").await?;
        self.in_transaction = false;
        debug!("Committed transaction on connection {}", self.id);
        Ok(())
    }

    /// Roll back the transaction identified by `tx`.
    ///
    /// Tolerates a transaction the server already rolled back on its own
    /// (e.g. after a batch-aborting error).
    pub async fn rollback(&mut self, tx: &TransactionHandle) -> Result<()> {
        self.check_owned(tx)?;
        self.run_batch(
            "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION",
            "rolling back transaction",
        )
        .await?;
        self.in_transaction = false;
        debug!("Rolled back transaction on connection {}", self.id);
        Ok(())
    }

    /// Close the connection.
    pub async fn close(self) -> Result<()> {
        if self.in_transaction {
            warn!(
                "Closing {} connection {} with an open transaction; the server will roll it back",
                self.role.as_str(),
                self.id
            );
        }
        let id = self.id;
        let role = self.role;
        self.client.close().await.map_err(|e| {
            MigrateError::connection(e, format!("closing {} connection", role.as_str()))
        })?;
        debug!("Closed {} connection {}", role.as_str(), id);
        Ok(())
    }

    fn check_owned(&self, tx: &TransactionHandle) -> Result<()> {
        if !tx.is_bound_to(self.id) {
            return Err(MigrateError::state(format!(
                "transaction belongs to connection {}, not {}",
                tx.connection_id(),
                self.id
            )));
        }
        if !self.in_transaction {
            return Err(MigrateError::state(format!(
                "connection {} has no open transaction",
                self.id
            )));
        }
        Ok(())
    }

    async fn run_batch(&mut self, sql: &str, context: &str) -> Result<()> {
        self.client
            .simple_query(sql)
            .await
            .map_err(|e| MigrateError::from_driver(context, e))?
            .into_results()
            .await
            .map_err(|e| MigrateError::from_driver(context, e))?;
        Ok(())
    }
}
