//! Identifier validation and bracket quoting for generated SQL Server statements.
//!
//! Table, schema, column and index names cannot be bound as statement
//! parameters, so every DDL and DML statement this crate generates splices
//! them into the text. Names are validated first and then wrapped in
//! brackets with any closing bracket doubled.

use crate::error::{MigrateError, Result};

/// Maximum identifier length accepted by SQL Server (`sysname`).
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier for security issues.
///
/// Rejects:
/// - Empty or whitespace-only identifiers
/// - Identifiers containing null bytes (injection vector)
/// - Identifiers longer than [`MAX_IDENTIFIER_LENGTH`] characters
///
/// # Errors
///
/// Returns `MigrateError::Config` for invalid identifiers with a descriptive message.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    let length = name.chars().count();
    if length > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "Identifier exceeds maximum length of {} characters (got {}): {:?}",
            MAX_IDENTIFIER_LENGTH, length, name
        )));
    }

    Ok(())
}

/// Quote a SQL Server identifier using brackets.
///
/// Escapes closing brackets by doubling them and wraps in brackets.
///
/// ```ignore
/// assert_eq!(quote_mssql("users"), "[users]");
/// assert_eq!(quote_mssql("table]name"), "[table]]name]");
/// ```
pub fn quote_mssql(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Quote a list of column names and join them with `", "`.
pub fn quote_column_list<S: AsRef<str>>(columns: &[S]) -> String {
    columns
        .iter()
        .map(|c| quote_mssql(c.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}
