//! Error types for the cluster heartbeat client.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Result type alias for cluster heartbeat operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the cluster heartbeat client.
#[derive(Debug, Error)]
pub enum Error {
    /// A required configuration key is missing.
    #[error("Configuration {0} undefined")]
    MissingConfig(&'static str),

    /// A configuration value failed validation.
    #[error("Invalid configuration {key}: {value}")]
    InvalidConfig {
        /// The configuration key.
        key: &'static str,
        /// The offending value.
        value: String,
    },

    /// Configuration file could not be read.
    #[error("Failed to read configuration file: {0}")]
    ConfigFile(#[source] io::Error),

    /// The local hostname could not be read.
    #[error("Failed to get hostname: {0}")]
    Hostname(#[source] io::Error),

    /// Socket creation or option setup failed.
    #[error("Failed to set up socket: {0}")]
    Socket(#[source] io::Error),

    /// Binding the local socket failed.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// The address we tried to bind.
        addr: SocketAddr,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// Registration with the reactor or scheduler failed.
    #[error("Failed to register {0}")]
    Register(String),

    /// Sending a datagram failed.
    #[error("Failed to send to {addr}: {source}")]
    Send {
        /// The destination address.
        addr: SocketAddr,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// A received message was rejected.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Query payload serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The client has been finalized.
    #[error("Client is closed")]
    Closed,

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Reasons a cluster message is discarded.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ProtocolError {
    /// Fewer bytes than the fixed header.
    #[error("Message size {size} smaller than header size {header}")]
    Undersized {
        /// Received length.
        size: usize,
        /// Header length.
        header: usize,
    },

    /// Received length does not match the declared history count.
    #[error("Received size {size} not matching {expected} expected")]
    SizeMismatch {
        /// Received length.
        size: usize,
        /// Length implied by the header.
        expected: usize,
    },

    /// Declared more histories than a message can carry.
    #[error("Too many histories: {count} (max {max})")]
    TooManyHistories {
        /// Declared count.
        count: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// Controller id out of range.
    #[error("Invalid controller id {0}")]
    InvalidController(u8),

    /// Network id out of range.
    #[error("Invalid network id {0}")]
    InvalidNetwork(u8),

    /// Entry count exceeds the history capacity.
    #[error("Invalid entries {0}")]
    InvalidEntries(u8),

    /// Oldest entry index exceeds the history capacity.
    #[error("Invalid oldest entry index {0}")]
    InvalidOldestIndex(u8),
}

impl Error {
    /// Whether this error came from configuration or identity resolution.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(
            self,
            Self::MissingConfig(_)
                | Self::InvalidConfig { .. }
                | Self::ConfigFile(_)
                | Self::Hostname(_)
        )
    }
}
