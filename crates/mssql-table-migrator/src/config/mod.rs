//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;
pub use validation::validate_connection;

use std::path::Path;

use tiberius::{AuthMethod, EncryptionLevel};

use crate::error::{MigrateError, Result};

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

impl ConnectionConfig {
    /// Build the tiberius client configuration for this descriptor.
    pub fn to_tiberius_config(&self) -> Result<tiberius::Config> {
        if let Some(connection_string) = &self.connection_string {
            return tiberius::Config::from_ado_string(connection_string)
                .map_err(|e| MigrateError::Config(format!("invalid connection string: {}", e)));
        }

        let mut config = tiberius::Config::new();
        config.host(&self.host);
        config.port(self.port);
        config.database(&self.database);
        config.authentication(AuthMethod::sql_server(&self.user, &self.password));

        if let Some(name) = &self.application_name {
            config.application_name(name);
        }

        match self.encrypt.to_lowercase().as_str() {
            "false" | "no" | "0" | "disable" => {
                config.encryption(EncryptionLevel::NotSupported);
            }
            _ => {
                if self.trust_server_cert {
                    config.trust_cert();
                }
                config.encryption(EncryptionLevel::Required);
            }
        }

        Ok(config)
    }
}
