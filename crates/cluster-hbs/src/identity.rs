//! Maps the local hostname to a controller slot.

use crate::constants::CONTROLLER_0_NAME;
use crate::error::{Error, Result};
use once_cell::sync::OnceCell;
use std::io;
use tracing::{debug, error};

/// Source of the local hostname.
pub trait HostnameSource: Send + Sync {
    /// Read the hostname.
    ///
    /// # Errors
    ///
    /// Returns an error if the hostname cannot be read from the environment.
    fn hostname(&self) -> io::Result<String>;
}

/// Reads the hostname from the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemHostname;

impl HostnameSource for SystemHostname {
    fn hostname(&self) -> io::Result<String> {
        let name = nix::unistd::gethostname().map_err(io::Error::from)?;
        name.into_string().map_err(|raw| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("hostname is not valid UTF-8: {raw:?}"),
            )
        })
    }
}

/// A fixed hostname, for overrides and tests.
#[derive(Clone, Debug)]
pub struct StaticHostname(pub String);

impl HostnameSource for StaticHostname {
    fn hostname(&self) -> io::Result<String> {
        Ok(self.0.clone())
    }
}

/// This controller's slot and its peer's slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ControllerIdentity {
    this_index: usize,
    peer_index: usize,
}

impl ControllerIdentity {
    /// Identity of the host named `hostname`.
    #[must_use]
    pub fn from_hostname(hostname: &str, controller0_name: &str) -> Self {
        if hostname == controller0_name {
            Self {
                this_index: 0,
                peer_index: 1,
            }
        } else {
            Self {
                this_index: 1,
                peer_index: 0,
            }
        }
    }

    /// Slot of the local controller.
    #[must_use]
    pub const fn this_index(&self) -> usize {
        self.this_index
    }

    /// Slot of the peer controller.
    #[must_use]
    pub const fn peer_index(&self) -> usize {
        self.peer_index
    }
}

/// Resolves and caches the controller identity.
pub struct ControllerIdentityResolver {
    source: Box<dyn HostnameSource>,
    controller0_name: String,
    cached: OnceCell<ControllerIdentity>,
}

impl ControllerIdentityResolver {
    /// Resolver comparing against the default controller-0 hostname.
    #[must_use]
    pub fn new(source: impl HostnameSource + 'static) -> Self {
        Self::with_controller0_name(source, CONTROLLER_0_NAME)
    }

    /// Resolver comparing against a custom controller-0 hostname.
    #[must_use]
    pub fn with_controller0_name(
        source: impl HostnameSource + 'static,
        controller0_name: impl Into<String>,
    ) -> Self {
        Self {
            source: Box::new(source),
            controller0_name: controller0_name.into(),
            cached: OnceCell::new(),
        }
    }

    /// Resolve the identity, reading the hostname only on the first success.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Hostname`] if the hostname cannot be read.
    pub fn resolve(&self) -> Result<ControllerIdentity> {
        self.cached
            .get_or_try_init(|| {
                let hostname = self.source.hostname().map_err(|e| {
                    error!("Failed to get hostname, error={e}");
                    Error::Hostname(e)
                })?;
                let identity = ControllerIdentity::from_hostname(&hostname, &self.controller0_name);
                debug!(
                    "Host {hostname} is controller index {}, peer index {}",
                    identity.this_index, identity.peer_index
                );
                Ok(identity)
            })
            .copied()
    }
}

impl std::fmt::Debug for ControllerIdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerIdentityResolver")
            .field("controller0_name", &self.controller0_name)
            .field("cached", &self.cached.get())
            .finish_non_exhaustive()
    }
}
