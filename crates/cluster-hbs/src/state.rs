//! Cluster heartbeat state snapshots and the history reducer.

use crate::codec::ClusterMessage;
use crate::constants::{CONTROLLER_NAMES, N_CONTROLLERS};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Health of the cluster as seen by one controller.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ControllerHbsInfo {
    /// Whether storage-0 responds to this controller.
    pub storage0_responding: bool,
    /// Whether this controller's SM alive pulses to the agent failed.
    pub heartbeat_failed: bool,
    /// Nodes reachable from this controller.
    pub nodes_reachable: u16,
    /// Nodes enabled when `nodes_reachable` was sampled.
    pub nodes_enabled: u16,
}

/// Cluster-wide heartbeat snapshot.
///
/// Equality ignores `last_update`: a refresh with the same content compares
/// equal to the state it refreshes.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClusterHbsState {
    /// Whether storage-0 is provisioned.
    pub storage0_provisioned: bool,
    /// When this snapshot was built, `None` if never populated.
    pub last_update: Option<DateTime<Utc>>,
    /// Per-controller health, indexed by controller id.
    pub controllers: [ControllerHbsInfo; N_CONTROLLERS],
}

impl PartialEq for ClusterHbsState {
    fn eq(&self, other: &Self) -> bool {
        self.storage0_provisioned == other.storage0_provisioned
            && self.controllers == other.controllers
    }
}

impl Eq for ClusterHbsState {}

impl ClusterHbsState {
    /// Whether this snapshot has ever been populated from a message.
    #[must_use]
    pub const fn is_populated(&self) -> bool {
        self.last_update.is_some()
    }

    /// Seconds elapsed between `last_update` and `now`.
    #[must_use]
    pub fn age_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_update.map(|t| (now - t).num_seconds())
    }

    /// Fold a validated message into a fresh snapshot stamped with `now`.
    ///
    /// Later records for a controller overwrite its flags. Its reachable count
    /// only moves up, and the enabled count always comes from the same sample
    /// as the reachable count.
    #[must_use]
    pub fn reduce(message: &ClusterMessage, now: DateTime<Utc>) -> Self {
        let mut state = Self::default();

        if message.histories.is_empty() {
            debug!("No cluster hbs history data received");
        }

        for history in &message.histories {
            let controller = usize::from(history.controller);
            let entry = history.newest_entry();
            let slot = &mut state.controllers[controller];

            slot.storage0_responding = history.storage0_responding;
            slot.heartbeat_failed = history.heartbeat_failed();
            if slot.heartbeat_failed {
                info!(
                    "{} SM to hbsAgent alive pulse failed.",
                    CONTROLLER_NAMES[controller]
                );
            }

            if entry.hosts_responding > slot.nodes_reachable {
                slot.nodes_reachable = entry.hosts_responding;
                slot.nodes_enabled = entry.hosts_enabled;
            }

            debug!(
                "Oldest index {}, entries {}, newest index {}, nodes {}",
                history.oldest_entry_index,
                history.entries,
                history.newest_index(),
                entry.hosts_responding
            );
        }

        state.storage0_provisioned = message.header.storage0_enabled;
        state.last_update = Some(now);
        state
    }
}

/// The live current/previous pair.
#[derive(Clone, Copy, Debug, Default)]
pub struct StateHistory {
    current: ClusterHbsState,
    previous: ClusterHbsState,
}

impl StateHistory {
    /// The most recently accepted state.
    #[must_use]
    pub const fn current(&self) -> &ClusterHbsState {
        &self.current
    }

    /// The state `current` replaced at the last change.
    #[must_use]
    pub const fn previous(&self) -> &ClusterHbsState {
        &self.previous
    }

    /// Install `state` if it differs from current.
    ///
    /// Returns `true` when current changed. An equal state is discarded and
    /// leaves both snapshots untouched.
    pub fn apply(&mut self, state: ClusterHbsState) -> bool {
        if state == self.current {
            return false;
        }
        self.previous = std::mem::replace(&mut self.current, state);
        true
    }
}
