//! Schema-qualified table references.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::identifier::{quote_mssql, validate_identifier};
use crate::error::{MigrateError, Result};

/// Schema used when a table is referenced without one.
pub const DEFAULT_SCHEMA: &str = "dbo";

/// Identifies a table by schema and name.
///
/// Both parts are validated at construction and cannot change afterwards.
/// `Display` renders the bracket-qualified form used in generated SQL,
/// e.g. `[dbo].[Orders]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTableRef")]
pub struct TableRef {
    schema: String,
    name: String,
}

#[derive(Deserialize)]
struct RawTableRef {
    #[serde(default = "default_schema")]
    schema: String,
    name: String,
}

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

impl TryFrom<RawTableRef> for TableRef {
    type Error = MigrateError;

    fn try_from(raw: RawTableRef) -> Result<Self> {
        TableRef::new(raw.schema, raw.name)
    }
}

impl TableRef {
    /// Create a table reference, validating both parts.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let schema = schema.into();
        let name = name.into();
        validate_identifier(&schema)?;
        validate_identifier(&name)?;
        Ok(Self { schema, name })
    }

    /// Create a reference in the `dbo` schema.
    pub fn dbo(name: impl Into<String>) -> Result<Self> {
        Self::new(DEFAULT_SCHEMA, name)
    }

    /// Schema name (unquoted).
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Table name (unquoted).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bracket-qualified name, identical to the `Display` output.
    pub fn qualified(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", quote_mssql(&self.schema), quote_mssql(&self.name))
    }
}

impl FromStr for TableRef {
    type Err = MigrateError;

    /// Parse `schema.name` or a bare `name` (which lands in `dbo`).
    ///
    /// Surrounding brackets on either part are accepted, so `[sales].[Order]`
    /// parses the same as `sales.Order`. Names containing a dot must use
    /// brackets.
    fn from_str(s: &str) -> Result<Self> {
        let parts = split_qualified(s.trim())?;
        match parts.as_slice() {
            [name] => Self::dbo(name.clone()),
            [schema, name] => Self::new(schema.clone(), name.clone()),
            _ => Err(MigrateError::Config(format!(
                "invalid table reference '{}': expected schema.name or name",
                s
            ))),
        }
    }
}

/// Split a possibly bracket-quoted dotted name into its parts.
fn split_qualified(s: &str) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars().peekable();
    let mut in_brackets = false;

    while let Some(c) = chars.next() {
        match c {
            '[' if !in_brackets && current.is_empty() => in_brackets = true,
            ']' if in_brackets => {
                if chars.peek() == Some(&']') {
                    chars.next();
                    current.push(']');
                } else {
                    in_brackets = false;
                }
            }
            '.' if !in_brackets => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }

    if in_brackets {
        return Err(MigrateError::Config(format!(
            "invalid table reference '{}': unterminated bracket",
            s
        )));
    }
    parts.push(current);
    Ok(parts)
}
