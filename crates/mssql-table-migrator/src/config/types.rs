//! Configuration type definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Root configuration: the default connections handed to a
/// [`SessionFactory`](crate::session::SessionFactory).
///
/// Only `source` is required. When `destination` is present the factory
/// builds dual-topology sessions by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database connection (also the shared connection for
    /// single-topology sessions).
    pub source: ConnectionConfig,

    /// Destination database connection for dual-topology sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<ConnectionConfig>,
}

impl Config {
    /// Configuration with only a source connection.
    pub fn single(source: ConnectionConfig) -> Self {
        Self {
            source,
            destination: None,
        }
    }

    /// Configuration with both a source and a destination connection.
    pub fn dual(source: ConnectionConfig, destination: ConnectionConfig) -> Self {
        Self {
            source,
            destination: Some(destination),
        }
    }
}

/// SQL Server connection descriptor.
///
/// Either fill in the individual fields or supply an ADO-style
/// `connection_string`, which takes precedence when set.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Database host.
    #[serde(default)]
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    #[serde(default)]
    pub database: String,

    /// Username for SQL Server authentication.
    #[serde(default)]
    pub user: String,

    /// Password for SQL Server authentication.
    #[serde(default)]
    pub password: String,

    /// Encrypt connection (default: "true").
    #[serde(default = "default_true_string")]
    pub encrypt: String,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,

    /// Application name reported to the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_name: Option<String>,

    /// ADO connection string, e.g.
    /// `Server=tcp:localhost,1433;Database=app;User Id=sa;Password=...`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,
}

impl ConnectionConfig {
    /// Descriptor built from an ADO connection string.
    pub fn from_connection_string(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: Some(connection_string.into()),
            ..Self::default()
        }
    }

    /// Short human-readable description for logs (never includes secrets).
    pub fn describe(&self) -> String {
        if self.connection_string.is_some() {
            "connection string".to_string()
        } else {
            format!("{}:{}/{}", self.host, self.port, self.database)
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_mssql_port(),
            database: String::new(),
            user: String::new(),
            password: String::new(),
            encrypt: default_true_string(),
            trust_server_cert: false,
            application_name: None,
            connection_string: None,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .field("application_name", &self.application_name)
            .field(
                "connection_string",
                &self.connection_string.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

fn default_mssql_port() -> u16 {
    1433
}

fn default_true_string() -> String {
    "true".to_string()
}
