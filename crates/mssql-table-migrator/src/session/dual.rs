//! Session over separate source and destination connections.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{
    active_transaction, apply_schema, read_schema, require_open, resolve_destination, state_of,
    MigrationSession, SessionContext, SessionState, Topology,
};
use crate::config::{validate_connection, ConnectionConfig};
use crate::connection::{ConnectionRole, MssqlConnection};
use crate::core::TableRef;
use crate::error::{MigrateError, Result};
use crate::{metadata, transfer};

/// The two connections of an open dual-topology session.
pub struct DualConnections {
    pub source: MssqlConnection,
    pub destination: MssqlConnection,
}

/// Migrates tables between two databases over independent connections.
///
/// Transactions are begun, committed and rolled back on the destination
/// connection only. The source is always read in autocommit mode, so the
/// guarantee is destination-side atomicity: rolling back undoes the created
/// table and any bulk-loaded rows, and leaves the source untouched.
pub struct DualTopologySession {
    source_config: ConnectionConfig,
    destination_config: ConnectionConfig,
    context: Option<SessionContext<DualConnections>>,
}

impl DualTopologySession {
    /// Create a closed session for the two descriptors.
    pub fn new(source: ConnectionConfig, destination: ConnectionConfig) -> Result<Self> {
        validate_connection("source", &source)?;
        validate_connection("destination", &destination)?;
        Ok(Self {
            source_config: source,
            destination_config: destination,
            context: None,
        })
    }

    /// Copy schema and, when `with_data`, rows.
    async fn copy(
        &mut self,
        source: &TableRef,
        destination: Option<&TableRef>,
        with_data: bool,
    ) -> Result<bool> {
        let operation = if with_data {
            "migrating tables"
        } else {
            "copying table schemas"
        };
        let context = require_open(&mut self.context, operation)?;
        let destination = resolve_destination(source, destination);
        let DualConnections {
            source: source_conn,
            destination: destination_conn,
        } = &mut context.connections;
        let tx = context.transaction.as_ref();

        info!(
            "{} {} -> {} across connections",
            if with_data { "Migrating" } else { "Copying schema" },
            source,
            destination
        );

        // Source reads stay in autocommit.
        let snapshot = read_schema(source_conn, source, None).await?;
        apply_schema(destination_conn, &snapshot, &destination, tx).await?;

        if with_data {
            transfer::copy_streaming(source_conn, destination_conn, source, &destination, tx)
                .await?;
        }

        Ok(true)
    }
}

#[async_trait]
impl MigrationSession for DualTopologySession {
    fn topology(&self) -> Topology {
        Topology::Dual
    }

    fn state(&self) -> SessionState {
        state_of(&self.context)
    }

    async fn open(&mut self) -> Result<()> {
        if self.context.is_some() {
            return Err(MigrateError::state("session is already open"));
        }

        let source = MssqlConnection::connect(&self.source_config, ConnectionRole::Source).await?;
        let destination =
            match MssqlConnection::connect(&self.destination_config, ConnectionRole::Destination)
                .await
            {
                Ok(conn) => conn,
                Err(e) => {
                    if let Err(close_err) = source.close().await {
                        warn!("Failed to release source connection: {}", close_err);
                    }
                    return Err(e);
                }
            };

        self.context = Some(SessionContext::new(DualConnections {
            source,
            destination,
        }));
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut context) = self.context.take() else {
            debug!("Session already closed");
            return Ok(());
        };

        let rollback = match context.transaction.take() {
            Some(tx) => {
                warn!("Closing session with an active transaction; rolling back");
                context.connections.destination.rollback(&tx).await
            }
            None => Ok(()),
        };
        let DualConnections {
            source,
            destination,
        } = context.connections;
        let source_closed = source.close().await;
        let destination_closed = destination.close().await;

        rollback?;
        source_closed?;
        destination_closed
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        let context = require_open(&mut self.context, "beginning a transaction")?;
        context.ensure_no_transaction()?;
        let tx = context.connections.destination.begin_transaction().await?;
        context.transaction = Some(tx);
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<()> {
        let context = require_open(&mut self.context, "committing")?;
        let tx = active_transaction(&context.transaction, "commit")?;
        context.connections.destination.commit(tx).await?;
        context.transaction = None;
        info!("Destination transaction committed");
        Ok(())
    }

    async fn rollback_transaction(&mut self) -> Result<()> {
        let context = require_open(&mut self.context, "rolling back")?;
        let tx = active_transaction(&context.transaction, "roll back")?;
        context.connections.destination.rollback(tx).await?;
        context.transaction = None;
        info!("Destination transaction rolled back");
        Ok(())
    }

    async fn check_table_exists(&mut self, table: &TableRef) -> Result<bool> {
        let context = require_open(&mut self.context, "checking tables")?;
        metadata::table_exists(
            &mut context.connections.destination,
            table,
            context.transaction.as_ref(),
        )
        .await
    }

    async fn copy_table_schema(
        &mut self,
        source: &TableRef,
        destination: Option<&TableRef>,
    ) -> Result<bool> {
        self.copy(source, destination, false).await
    }

    async fn migrate_table(
        &mut self,
        source: &TableRef,
        destination: Option<&TableRef>,
    ) -> Result<bool> {
        self.copy(source, destination, true).await
    }
}

impl Drop for DualTopologySession {
    fn drop(&mut self) {
        if let Some(context) = &self.context {
            if context.transaction.is_some() {
                warn!(
                    "Session dropped with an active transaction; \
                     closing the destination connection rolls it back"
                );
            } else {
                debug!("Session dropped without close; releasing connections");
            }
        }
    }
}
