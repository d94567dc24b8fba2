//! Session over one connection shared by source and destination.

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

/// Migrates tables within one database over a single connection.
///
/// Source and destination may name different schemas or tables in the
/// same database. When a transaction is active every statement runs inside
/// it, metadata reads included, so tables created earlier in the
/// transaction are visible to later steps.
pub struct SingleTopologySession {
    config: ConnectionConfig,
    context: Option<SessionContext<MssqlConnection>>,
}

impl SingleTopologySession {
    /// Create a closed session for `config`.
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        validate_connection("connection", &config)?;
        Ok(Self {
            config,
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
        let conn = &mut context.connections;
        let tx = context.transaction.as_ref();

        info!(
            "{} {} -> {} on shared connection",
            if with_data { "Migrating" } else { "Copying schema" },
            source,
            destination
        );

        let snapshot = read_schema(conn, source, tx).await?;
        apply_schema(conn, &snapshot, &destination, tx).await?;

        if with_data {
            transfer::copy_in_database(conn, source, &destination, tx).await?;
        }

        Ok(true)
    }
}

#[async_trait]
impl MigrationSession for SingleTopologySession {
    fn topology(&self) -> Topology {
        Topology::Single
    }

    fn state(&self) -> SessionState {
        state_of(&self.context)
    }

    async fn open(&mut self) -> Result<()> {
        if self.context.is_some() {
            return Err(MigrateError::state("session is already open"));
        }
        let conn = MssqlConnection::connect(&self.config, ConnectionRole::Shared).await?;
        self.context = Some(SessionContext::new(conn));
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
                context.connections.rollback(&tx).await
            }
            None => Ok(()),
        };
        let closed = context.connections.close().await;

        rollback?;
        closed
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        let context = require_open(&mut self.context, "beginning a transaction")?;
        context.ensure_no_transaction()?;
        let tx = context.connections.begin_transaction().await?;
        context.transaction = Some(tx);
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<()> {
        let context = require_open(&mut self.context, "committing")?;
        let tx = active_transaction(&context.transaction, "commit")?;
        context.connections.commit(tx).await?;
        context.transaction = None;
        info!("Transaction committed");
        Ok(())
    }

    async fn rollback_transaction(&mut self) -> Result<()> {
        let context = require_open(&mut self.context, "rolling back")?;
        let tx = active_transaction(&context.transaction, "roll back")?;
        context.connections.rollback(tx).await?;
        context.transaction = None;
        info!("Transaction rolled back");
        Ok(())
    }

    async fn check_table_exists(&mut self, table: &TableRef) -> Result<bool> {
        let context = require_open(&mut self.context, "checking tables")?;
        metadata::table_exists(&mut context.connections, table, context.transaction.as_ref()).await
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

impl Drop for SingleTopologySession {
    fn drop(&mut self) {
        if let Some(context) = &self.context {
            if context.transaction.is_some() {
                warn!(
                    "Session dropped with an active transaction; closing the connection rolls it back"
                );
            } else {
                debug!("Session dropped without close; releasing connection");
            }
        }
    }
}
