//! Client keeping a node's view of cluster heartbeat state in sync with the
//! local heartbeat agent over loopback UDP.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod client;
pub mod codec;
pub mod config;
pub mod constants;
mod error;
pub mod identity;
mod report;
pub mod runtime;
pub mod state;
pub mod transport;

pub use client::{ClusterHbsClient, QueryCallback, SendOutcome};
pub use codec::{ClusterMessage, HistoryEntry, HistoryRecord, MessageHeader, QueryRequest};
pub use config::{ClientConfig, ConfigSource, FileConfig, LayeredConfig, MemoryConfig};
pub use error::{Error, ProtocolError, Result};
pub use identity::{ControllerIdentity, HostnameSource, StaticHostname, SystemHostname};
pub use report::{StateReport, StateSummary};
pub use runtime::{IntervalScheduler, Reactor, Registration, Scheduler, TokioReactor};
pub use state::{ClusterHbsState, ControllerHbsInfo, StateHistory};
