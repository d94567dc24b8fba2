//! Core value types shared by every layer of the migrator.
//!
//! - [`identifier`]: identifier validation and bracket quoting
//! - [`table`]: schema-qualified table references
//! - [`schema`]: column and index descriptors produced by introspection

pub mod identifier;
pub mod schema;
pub mod table;

pub use identifier::{quote_column_list, quote_mssql, validate_identifier};
pub use schema::{group_index_rows, ColumnDescriptor, IndexColumnRow, IndexDescriptor, IndexKind};
pub use table::{TableRef, DEFAULT_SCHEMA};
