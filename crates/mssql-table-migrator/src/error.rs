//! Error types for the table migrator.

use thiserror::Error;

/// SQL Server error numbers reported when a created object already exists.
///
/// - 2714: there is already an object with that name in the database
/// - 1913: an index with that name already exists on the table
/// - 1779: the table already has a primary key defined
const DUPLICATE_OBJECT_CODES: [u32; 3] = [2714, 1913, 1779];

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing connection details, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A connection could not be established or was lost mid-statement.
    #[error("Connection error: {message}\n  Context: {context}")]
    Connection { message: String, context: String },

    /// Operation invoked in a session state that does not allow it.
    #[error("Invalid session state: {0}")]
    State(String),

    /// Destination table already exists (raised by callers, never by a session).
    #[error("Table {0} already exists")]
    AlreadyExists(String),

    /// The server refused to create an object because the name is taken.
    #[error("Duplicate object while {object}: {source}")]
    DuplicateObject {
        object: String,
        #[source]
        source: tiberius::error::Error,
    },

    /// Referenced table has no discoverable columns or catalog entry.
    #[error("No metadata found for {0}")]
    MetadataNotFound(String),

    /// Any other statement rejected by the server.
    #[error("Execution failed while {context}: {source}")]
    Execution {
        context: String,
        #[source]
        source: tiberius::error::Error,
    },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl MigrateError {
    /// Create a Connection error with context about where it occurred
    pub fn connection(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Connection {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a State error
    pub fn state(message: impl Into<String>) -> Self {
        MigrateError::State(message.into())
    }

    /// Classify a driver error raised while doing `context`.
    ///
    /// Transport failures become `Connection`, server rejections for names
    /// that are already taken become `DuplicateObject`, and everything else
    /// is an `Execution` error.
    pub fn from_driver(context: impl Into<String>, err: tiberius::error::Error) -> Self {
        let context = context.into();
        match &err {
            tiberius::error::Error::Io { .. }
            | tiberius::error::Error::Tls(_)
            | tiberius::error::Error::Routing { .. }
            | tiberius::error::Error::Protocol(_) => MigrateError::Connection {
                message: err.to_string(),
                context,
            },
            tiberius::error::Error::Server(token) if is_duplicate_object_code(token.code()) => {
                MigrateError::DuplicateObject {
                    object: context,
                    source: err,
                }
            }
            _ => MigrateError::Execution {
                context,
                source: err,
            },
        }
    }

    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 2,
            MigrateError::Connection { .. } => 3,
            MigrateError::State(_) => 4,
            MigrateError::AlreadyExists(_) => 5,
            MigrateError::MetadataNotFound(_) => 6,
            MigrateError::DuplicateObject { .. } | MigrateError::Execution { .. } => 7,
            MigrateError::Io(_) => 8,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

fn is_duplicate_object_code(code: u32) -> bool {
    DUPLICATE_OBJECT_CODES.contains(&code)
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
