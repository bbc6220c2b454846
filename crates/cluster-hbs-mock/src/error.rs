//! Error types for the mock heartbeat agent.

use thiserror::Error;

/// Error type for the mock heartbeat agent.
#[derive(Debug, Error)]
pub enum Error {
    /// The agent socket could not be bound.
    #[error("Failed to bind mock agent: {0}")]
    Bind(#[source] std::io::Error),

    /// Sending a datagram failed.
    #[error("Failed to send from mock agent: {0}")]
    Send(#[source] std::io::Error),

    /// Waiting for queries timed out.
    #[error("Timed out waiting for {expected} queries, saw {seen}")]
    Timeout {
        /// Queries waited for.
        expected: usize,
        /// Queries received so far.
        seen: usize,
    },
}
