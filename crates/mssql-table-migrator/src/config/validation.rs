//! Configuration validation.

use super::{Config, ConnectionConfig};
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_connection("source", &config.source)?;
    if let Some(destination) = &config.destination {
        validate_connection("destination", destination)?;
    }
    Ok(())
}

/// Validate a single connection descriptor.
///
/// A non-blank connection string is sufficient on its own; otherwise host,
/// database and user are all required.
pub fn validate_connection(label: &str, conn: &ConnectionConfig) -> Result<()> {
    if let Some(connection_string) = &conn.connection_string {
        if connection_string.trim().is_empty() {
            return Err(MigrateError::Config(format!(
                "{}.connection_string cannot be blank",
                label
            )));
        }
        return Ok(());
    }

    if conn.host.trim().is_empty() {
        return Err(MigrateError::Config(format!("{}.host is required", label)));
    }
    if conn.database.trim().is_empty() {
        return Err(MigrateError::Config(format!(
            "{}.database is required",
            label
        )));
    }
    if conn.user.trim().is_empty() {
        return Err(MigrateError::Config(format!("{}.user is required", label)));
    }
    if conn.port == 0 {
        return Err(MigrateError::Config(format!(
            "{}.port must be non-zero",
            label
        )));
    }

    Ok(())
}
