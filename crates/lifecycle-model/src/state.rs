//! Machine state enumeration and transition table
//!
//! ACTIVE ⇄ FROZEN, ACTIVE → STARTING_DECOMMISSION → DECOMMISSIONING →
//! DECOMMISSIONED, with ACTIVE reachable again from every other state and
//! DEAD reachable from every state except DEAD itself.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a host or domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineState {
    /// Accepting work
    Active,
    /// Decommission requested, not yet picked up by the reconciler
    StartingDecommission,
    /// Resident tasks are being drained
    Decommissioning,
    /// Drained; terminal for the decommission cycle
    Decommissioned,
    /// No new placements, existing tasks keep running
    Frozen,
    /// Not seen in any offer since the scheduler restarted
    MissingOnStartup,
    /// Gone
    Dead,
}

impl MachineState {
    /// Every state, in declaration order.
    pub const ALL: [MachineState; 7] = [
        MachineState::Active,
        MachineState::StartingDecommission,
        MachineState::Decommissioning,
        MachineState::Decommissioned,
        MachineState::Frozen,
        MachineState::MissingOnStartup,
        MachineState::Dead,
    ];

    /// Check if transition from this state to target is legal
    pub fn can_transition_to(&self, target: MachineState) -> bool {
        use MachineState::*;

        match (self, target) {
            (Active, Frozen | StartingDecommission | Dead | MissingOnStartup) => true,

            // An operator may decommission a frozen host without unfreezing it first
            (Frozen, Active | StartingDecommission | Dead) => true,

            (StartingDecommission, Decommissioning | Active | Dead) => true,
            (Decommissioning, Decommissioned | Active | Dead) => true,
            (Decommissioned, Active | Dead) => true,
            (Dead, Active) => true,
            (MissingOnStartup, Active | Dead) => true,

            _ => false,
        }
    }

    /// Legal targets from this state.
    pub fn legal_targets(&self) -> Vec<MachineState> {
        Self::ALL
            .iter()
            .copied()
            .filter(|target| self.can_transition_to(*target))
            .collect()
    }

    /// In one of the states of an ongoing or finished decommission.
    pub fn is_decommissioning(&self) -> bool {
        matches!(
            self,
            MachineState::StartingDecommission
                | MachineState::Decommissioning
                | MachineState::Decommissioned
        )
    }

    /// Host no longer reachable.
    pub fn is_gone(&self) -> bool {
        matches!(self, MachineState::Dead | MachineState::MissingOnStartup)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MachineState::Active => "ACTIVE",
            MachineState::StartingDecommission => "STARTING_DECOMMISSION",
            MachineState::Decommissioning => "DECOMMISSIONING",
            MachineState::Decommissioned => "DECOMMISSIONED",
            MachineState::Frozen => "FROZEN",
            MachineState::MissingOnStartup => "MISSING_ON_STARTUP",
            MachineState::Dead => "DEAD",
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown machine state: '{0}'")]
pub struct UnknownState(pub String);

impl FromStr for MachineState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == normalized)
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}
