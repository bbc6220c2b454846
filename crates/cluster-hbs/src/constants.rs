//! Protocol and configuration constants.

/// Number of controller slots in a cluster state.
pub const N_CONTROLLERS: usize = 2;

/// Number of heartbeat networks a history may refer to.
pub const MAX_NETWORKS: usize = 2;

/// Capacity of the per-record circular history buffer.
pub const HISTORY_CAPACITY: usize = 15;

/// Most history records a single message can carry.
pub const MAX_HISTORY_ELEMENTS: usize = N_CONTROLLERS * MAX_NETWORKS;

/// Fixed message header size in bytes.
pub const HEADER_SIZE: usize = 12;

/// Size of one history entry (`hosts_enabled` + `hosts_responding`).
pub const ENTRY_SIZE: usize = 4;

/// Size of one history record in bytes.
pub const RECORD_SIZE: usize = 4 + HISTORY_CAPACITY * ENTRY_SIZE;

/// Largest well-formed message.
pub const MAX_MESSAGE_SIZE: usize = HEADER_SIZE + MAX_HISTORY_ELEMENTS * RECORD_SIZE;

/// Request id reserved for alive pulses (no response expected).
pub const INVALID_REQ_ID: u16 = 0;

/// Loopback address used for both ends of the exchange.
pub const LOOPBACK_IP: [u8; 4] = [127, 0, 0, 1];

/// Configuration key for the heartbeat agent's port.
pub const SM_SERVER_PORT_KEY: &str = "sm_server_port";

/// Configuration key for the local bind port.
pub const SM_CLIENT_PORT_KEY: &str = "sm_client_port";

/// Hostname of the controller occupying slot 0.
pub const CONTROLLER_0_NAME: &str = "controller-0";

/// Display names of the controller slots.
pub const CONTROLLER_NAMES: [&str; N_CONTROLLERS] = ["controller-0", "controller-1"];

/// Default alive pulse period in milliseconds.
pub const DEFAULT_PULSE_INTERVAL_MS: u64 = 500;
