//! # mssql-table-migrator
//!
//! Transactional replication of SQL Server tables.
//!
//! A [`MigrationSession`] reads a source table's columns, primary key and
//! indexes from the catalog, recreates them under a new name on the
//! destination, and optionally copies every row. Two topologies exist:
//!
//! - **Single**: source and destination share one connection and one
//!   database; rows move with `INSERT ... SELECT`.
//! - **Dual**: separate source and destination connections; rows are
//!   streamed from the source into a bulk load on the destination.
//!
//! Transactions wrap the destination side, so a rollback leaves no table
//! and no rows behind.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_table_migrator::{Config, SessionFactory, TableRef};
//!
//! #[tokio::main]
//! async fn main() -> mssql_table_migrator::Result<()> {
//!     let factory = SessionFactory::new(Config::load("config.yaml")?)?;
//!     let mut session = factory.from_defaults()?;
//!
//!     session.open().await?;
//!     session.begin_transaction().await?;
//!     let source = TableRef::dbo("Orders")?;
//!     let destination = TableRef::dbo("Orders_Copy")?;
//!     session.migrate_table(&source, Some(&destination)).await?;
//!     session.commit_transaction().await?;
//!     session.close().await
//! }
//! ```

pub mod config;
pub mod connection;
pub mod core;
pub mod ddl;
pub mod error;
pub mod index;
pub mod metadata;
pub mod session;
pub mod transfer;

// Re-exports for convenient access
pub use config::{Config, ConnectionConfig};
pub use core::{ColumnDescriptor, IndexDescriptor, IndexKind, TableRef};
pub use error::{MigrateError, Result};
pub use session::{
    DualTopologySession, MigrationSession, SessionFactory, SessionState, SingleTopologySession,
    Topology,
};
pub use transfer::DataMover;
