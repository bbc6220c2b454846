//! Configuration lookup and the settings the client reads from it.

use crate::constants::{
    CONTROLLER_0_NAME, DEFAULT_PULSE_INTERVAL_MS, SM_CLIENT_PORT_KEY, SM_SERVER_PORT_KEY,
};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::error;

/// Key/value configuration lookup.
pub trait ConfigSource: Send + Sync {
    /// Value stored under `key`, if any.
    fn get(&self, key: &str) -> Option<String>;
}

/// In-memory configuration table.
#[derive(Clone, Debug, Default)]
pub struct MemoryConfig {
    values: HashMap<String, String>,
}

impl MemoryConfig {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `key` = `value`, replacing any previous value.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Sets `key` = `value`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

impl ConfigSource for MemoryConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Configuration loaded from a `key=value` file.
#[derive(Clone, Debug, Default)]
pub struct FileConfig {
    inner: MemoryConfig,
}

impl FileConfig {
    /// Load every entry of the file at `path`.
    ///
    /// Lines follow dotenv syntax. Unquoted and double-quoted values expand
    /// `$VAR` and `${VAR}` from the environment; single-quote a value to keep
    /// it literal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigFile`] if the file cannot be opened or a line
    /// cannot be parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let entries = dotenvy::from_path_iter(path).map_err(|e| {
            error!("Failed to open configuration file {}: {e}", path.display());
            Error::ConfigFile(std::io::Error::other(e))
        })?;

        let mut inner = MemoryConfig::new();
        for entry in entries {
            let (key, value) = entry.map_err(|e| Error::ConfigFile(std::io::Error::other(e)))?;
            inner.set(key, value);
        }
        Ok(Self { inner })
    }
}

impl ConfigSource for FileConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }
}

/// Layers an override table over another source.
pub struct LayeredConfig<'a> {
    overrides: MemoryConfig,
    base: &'a dyn ConfigSource,
}

impl<'a> LayeredConfig<'a> {
    /// Looks keys up in `overrides` first, then in `base`.
    #[must_use]
    pub const fn new(overrides: MemoryConfig, base: &'a dyn ConfigSource) -> Self {
        Self { overrides, base }
    }
}

impl ConfigSource for LayeredConfig<'_> {
    fn get(&self, key: &str) -> Option<String> {
        self.overrides.get(key).or_else(|| self.base.get(key))
    }
}

/// Parse a port value read under `key`.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] unless `value` is a valid port number.
pub fn parse_port(key: &'static str, value: &str) -> Result<u16> {
    value.trim().parse::<u16>().map_err(|_| {
        error!("Runtime error: Invalid configuration {key}: {value}");
        Error::InvalidConfig {
            key,
            value: value.to_string(),
        }
    })
}

fn required_port(source: &dyn ConfigSource, key: &'static str) -> Result<u16> {
    let value = source.get(key).ok_or_else(|| {
        error!("Runtime error: system configuration {key} undefined");
        Error::MissingConfig(key)
    })?;
    parse_port(key, &value)
}

/// Settings for a [`ClusterHbsClient`](crate::ClusterHbsClient).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientConfig {
    /// Heartbeat agent port on loopback.
    pub server_port: u16,
    /// Local bind port on loopback.
    pub client_port: u16,
    /// Hostname of the controller in slot 0.
    pub controller0_name: String,
    /// Period of the scheduled alive pulse.
    pub pulse_interval: Duration,
}

impl ClientConfig {
    /// Settings with the given ports and defaults elsewhere.
    #[must_use]
    pub fn new(server_port: u16, client_port: u16) -> Self {
        Self {
            server_port,
            client_port,
            controller0_name: CONTROLLER_0_NAME.to_string(),
            pulse_interval: Duration::from_millis(DEFAULT_PULSE_INTERVAL_MS),
        }
    }

    /// Read both ports from `source`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if either port is missing or invalid.
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self> {
        let server_port = required_port(source, SM_SERVER_PORT_KEY)?;
        let client_port = required_port(source, SM_CLIENT_PORT_KEY)?;
        Ok(Self::new(server_port, client_port))
    }

    /// Override the controller-0 hostname.
    #[must_use]
    pub fn with_controller0_name(mut self, name: impl Into<String>) -> Self {
        self.controller0_name = name.into();
        self
    }

    /// Override the alive pulse period.
    #[must_use]
    pub const fn with_pulse_interval(mut self, interval: Duration) -> Self {
        self.pulse_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_source() {
        let source = MemoryConfig::new()
            .with(SM_SERVER_PORT_KEY, "2106")
            .with(SM_CLIENT_PORT_KEY, " 2107 ");
        let config = ClientConfig::from_source(&source).unwrap();
        assert_eq!(config.server_port, 2106);
        assert_eq!(config.client_port, 2107);
        assert_eq!(config.controller0_name, "controller-0");
    }

    #[test]
    fn test_missing_port() {
        let source = MemoryConfig::new().with(SM_SERVER_PORT_KEY, "2106");
        let err = ClientConfig::from_source(&source).unwrap_err();
        assert!(matches!(err, Error::MissingConfig(SM_CLIENT_PORT_KEY)));
        assert!(err.is_config());
    }

    #[test]
    fn test_invalid_ports() {
        for bad in ["-1", "abc", "65536", ""] {
            let source = MemoryConfig::new()
                .with(SM_SERVER_PORT_KEY, bad)
                .with(SM_CLIENT_PORT_KEY, "2107");
            assert!(
                matches!(
                    ClientConfig::from_source(&source),
                    Err(Error::InvalidConfig {
                        key: SM_SERVER_PORT_KEY,
                        ..
                    })
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_file_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# heartbeat ports").unwrap();
        writeln!(file, "sm_server_port=2106").unwrap();
        writeln!(file, "sm_client_port=2107").unwrap();
        file.flush().unwrap();

        let source = FileConfig::load(file.path()).unwrap();
        assert_eq!(source.get(SM_SERVER_PORT_KEY).as_deref(), Some("2106"));
        assert_eq!(
            ClientConfig::from_source(&source).unwrap(),
            ClientConfig::new(2106, 2107)
        );
    }

    #[test]
    fn test_file_config_single_quotes_are_literal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "controller0_name='$HOSTNAME-a'").unwrap();
        writeln!(file, "sm_server_port='2106'").unwrap();
        file.flush().unwrap();

        let source = FileConfig::load(file.path()).unwrap();
        assert_eq!(
            source.get("controller0_name").as_deref(),
            Some("$HOSTNAME-a")
        );
        assert_eq!(source.get(SM_SERVER_PORT_KEY).as_deref(), Some("2106"));
    }

    #[test]
    fn test_missing_file() {
        let err = FileConfig::load("/nonexistent/sm.conf").unwrap_err();
        assert!(matches!(err, Error::ConfigFile(_)));
    }

    #[test]
    fn test_layered_config() {
        let base = MemoryConfig::new()
            .with(SM_SERVER_PORT_KEY, "1")
            .with(SM_CLIENT_PORT_KEY, "2");
        let layered = LayeredConfig::new(MemoryConfig::new().with(SM_SERVER_PORT_KEY, "9"), &base);
        let config = ClientConfig::from_source(&layered).unwrap();
        assert_eq!((config.server_port, config.client_port), (9, 2));
    }
}
