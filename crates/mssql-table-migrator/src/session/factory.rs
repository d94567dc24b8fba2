//! Session construction from explicit or default connection descriptors.

use tracing::debug;

use super::{DualTopologySession, MigrationSession, SingleTopologySession};
use crate::config::{Config, ConnectionConfig};
use crate::error::{MigrateError, Result};

/// Builds sessions, falling back to configured defaults when a descriptor
/// is not given explicitly.
#[derive(Debug, Clone, Default)]
pub struct SessionFactory {
    defaults: Option<Config>,
}

impl SessionFactory {
    /// Factory backed by validated default descriptors.
    pub fn new(defaults: Config) -> Result<Self> {
        defaults.validate()?;
        Ok(Self {
            defaults: Some(defaults),
        })
    }

    /// Factory that requires every descriptor to be passed explicitly.
    pub fn without_defaults() -> Self {
        Self::default()
    }

    /// The configured defaults, if any.
    pub fn defaults(&self) -> Option<&Config> {
        self.defaults.as_ref()
    }

    /// Single-topology session over `connection` or the default source.
    pub fn single(
        &self,
        connection: Option<ConnectionConfig>,
    ) -> Result<Box<dyn MigrationSession>> {
        let connection = match connection {
            Some(c) => c,
            None => self.default_source()?,
        };
        debug!("Creating single-topology session for {}", connection.describe());
        Ok(Box::new(SingleTopologySession::new(connection)?))
    }

    /// Dual-topology session over the given or default descriptors.
    pub fn dual(
        &self,
        source: Option<ConnectionConfig>,
        destination: Option<ConnectionConfig>,
    ) -> Result<Box<dyn MigrationSession>> {
        let source = match source {
            Some(c) => c,
            None => self.default_source()?,
        };
        let destination = match destination {
            Some(c) => c,
            None => self.default_destination()?,
        };
        debug!(
            "Creating dual-topology session {} -> {}",
            source.describe(),
            destination.describe()
        );
        Ok(Box::new(DualTopologySession::new(source, destination)?))
    }

    /// Dual when the defaults name a destination, otherwise single.
    pub fn from_defaults(&self) -> Result<Box<dyn MigrationSession>> {
        let defaults = self.require_defaults()?;
        if defaults.destination.is_some() {
            self.dual(None, None)
        } else {
            self.single(None)
        }
    }

    fn require_defaults(&self) -> Result<&Config> {
        self.defaults
            .as_ref()
            .ok_or_else(|| MigrateError::Config("no default connections configured".into()))
    }

    fn default_source(&self) -> Result<ConnectionConfig> {
        Ok(self.require_defaults()?.source.clone())
    }

    fn default_destination(&self) -> Result<ConnectionConfig> {
        self.require_defaults()?.destination.clone().ok_or_else(|| {
            MigrateError::Config("no default destination connection configured".into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionState, Topology};

    fn connection(database: &str) -> ConnectionConfig {
        ConnectionConfig {
            host: "localhost".to_string(),
            database: database.to_string(),
            user: "sa".to_string(),
            ..ConnectionConfig::default()
        }
    }

    #[test]
    fn test_single_uses_default_source() {
        let factory = SessionFactory::new(Config::single(connection("TestA"))).unwrap();
        let session = factory.single(None).unwrap();
        assert_eq!(session.topology(), Topology::Single);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_dual_requires_default_destination() {
        let factory = SessionFactory::new(Config::single(connection("TestA"))).unwrap();
        let err = factory.dual(None, None).err().unwrap();
        assert!(matches!(err, MigrateError::Config(_)));

        let session = factory.dual(None, Some(connection("TestB"))).unwrap();
        assert_eq!(session.topology(), Topology::Dual);
    }

    #[test]
    fn test_from_defaults_picks_topology() {
        let single = SessionFactory::new(Config::single(connection("TestA"))).unwrap();
        assert_eq!(single.from_defaults().unwrap().topology(), Topology::Single);

        let dual =
            SessionFactory::new(Config::dual(connection("TestA"), connection("TestB"))).unwrap();
        assert_eq!(dual.from_defaults().unwrap().topology(), Topology::Dual);
    }

    #[test]
    fn test_without_defaults_needs_explicit_descriptors() {
        let factory = SessionFactory::without_defaults();
        assert!(matches!(factory.single(None).err().unwrap(), MigrateError::Config(_)));
        assert!(matches!(factory.from_defaults().err().unwrap(), MigrateError::Config(_)));
        assert!(factory.single(Some(connection("TestA"))).is_ok());
        assert!(factory
            .dual(Some(connection("TestA")), Some(connection("TestB")))
            .is_ok());
    }

    #[test]
    fn test_new_rejects_invalid_defaults() {
        assert!(SessionFactory::new(Config::single(ConnectionConfig::default())).is_err());
    }
}
