//! Human-readable renderings of cluster heartbeat state.

use crate::constants::CONTROLLER_NAMES;
use crate::state::ClusterHbsState;
use chrono::{DateTime, Utc};
use std::fmt;

/// Two-section diagnostic dump of the current and previous states.
#[derive(Clone, Copy, Debug)]
pub struct StateReport {
    current: ClusterHbsState,
    previous: ClusterHbsState,
    now: DateTime<Utc>,
}

impl StateReport {
    /// Build a report with ages measured against `now`.
    #[must_use]
    pub const fn new(
        current: ClusterHbsState,
        previous: ClusterHbsState,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            current,
            previous,
            now,
        }
    }

    fn write_state(f: &mut fmt::Formatter<'_>, state: &ClusterHbsState) -> fmt::Result {
        let not = |b: bool| if b { "" } else { "not " };

        writeln!(
            f,
            "  storage-0 is {}configured",
            not(state.storage0_provisioned)
        )?;
        for (name, controller) in CONTROLLER_NAMES.iter().zip(&state.controllers) {
            writeln!(f, "  From {name}")?;
            if state.storage0_provisioned {
                writeln!(
                    f,
                    "    storage-0 is {}responding",
                    not(controller.storage0_responding)
                )?;
            }
            writeln!(
                f,
                "    SM heartbeat {}",
                if controller.heartbeat_failed {
                    "FAILED"
                } else {
                    "ok"
                }
            )?;
            writeln!(
                f,
                "    {} nodes are responding, {} nodes enabled",
                controller.nodes_reachable, controller.nodes_enabled
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for StateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "cluster hbs info")?;
        match self.current.age_secs(self.now) {
            None => writeln!(f, "  Current state, no data received yet")?,
            Some(age) => {
                writeln!(f, "  Current state, last updated {age} seconds ago")?;
                Self::write_state(f, &self.current)?;
            }
        }

        if let Some(age) = self.previous.age_secs(self.now) {
            writeln!(f)?;
            writeln!(f, "  Previous state, since {age} seconds ago")?;
            Self::write_state(f, &self.previous)?;
        }
        Ok(())
    }
}

/// One-line summary logged when the current state changes.
#[derive(Clone, Copy, Debug)]
pub struct StateSummary<'a> {
    state: &'a ClusterHbsState,
    now: DateTime<Utc>,
}

impl<'a> StateSummary<'a> {
    /// Summarize `state` with its age measured against `now`.
    #[must_use]
    pub const fn new(state: &'a ClusterHbsState, now: DateTime<Utc>) -> Self {
        Self { state, now }
    }
}

impl fmt::Display for StateSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(age) = self.state.age_secs(self.now) else {
            return write!(f, "Cluster hbs state not available");
        };

        write!(
            f,
            "Cluster hbs last updated {age} secs ago, storage-0 is {}provisioned",
            if self.state.storage0_provisioned {
                ""
            } else {
                "not "
            }
        )?;
        for (name, controller) in CONTROLLER_NAMES.iter().zip(&self.state.controllers) {
            write!(
                f,
                "; from {name}: SM {}, {} nodes enabled, {} nodes reachable",
                if controller.heartbeat_failed {
                    "FAILED"
                } else {
                    "ok"
                },
                controller.nodes_enabled,
                controller.nodes_reachable
            )?;
            if self.state.storage0_provisioned {
                write!(
                    f,
                    ", storage-0 {} responding",
                    if controller.storage0_responding {
                        "is"
                    } else {
                        "is not"
                    }
                )?;
            }
        }
        Ok(())
    }
}
