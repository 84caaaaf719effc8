//! Placement eligibility
//!
//! Consulted once per offer per host, before any placement scoring. Reads are
//! taken fresh on every call so a decommission or freeze takes effect on the
//! next offer.

use std::fmt;
use std::sync::Arc;

use lifecycle_model::{MachineKind, MachineState};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::LifecycleError;
use crate::store::LifecycleStore;

/// Placement policy knobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlacementPolicy {
    /// Allow new placements on a host that is itself being decommissioned.
    /// Used to satisfy instance counts during migration.
    #[serde(default)]
    pub allow_on_decommissioning: bool,
}

/// Why a host may not receive new placements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PlacementRejection {
    UnknownHost,
    HostState { state: MachineState },
    HostFrozen,
    DomainState { domain_id: String, state: MachineState },
}

impl fmt::Display for PlacementRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementRejection::UnknownHost => write!(f, "host is not registered"),
            PlacementRejection::HostState { state } => write!(f, "host is {}", state),
            PlacementRejection::HostFrozen => write!(f, "host is administratively frozen"),
            PlacementRejection::DomainState { domain_id, state } => {
                write!(f, "domain {} is {}", domain_id, state)
            }
        }
    }
}

/// Result of evaluating one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementDecision {
    Eligible,
    Rejected(PlacementRejection),
}

impl PlacementDecision {
    pub fn is_eligible(&self) -> bool {
        matches!(self, PlacementDecision::Eligible)
    }
}

/// Decides whether a host may accept new task placements.
pub struct PlacementGuard {
    store: Arc<dyn LifecycleStore>,
    policy: PlacementPolicy,
}

impl PlacementGuard {
    pub fn new(store: Arc<dyn LifecycleStore>, policy: PlacementPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &PlacementPolicy {
        &self.policy
    }

    /// Evaluate `host_id` against its own state, the frozen set and its
    /// domain's state.
    pub fn evaluate(&self, host_id: &str) -> Result<PlacementDecision, LifecycleError> {
        let Some(host) = self.store.get(MachineKind::Host, host_id)? else {
            return Ok(PlacementDecision::Rejected(PlacementRejection::UnknownHost));
        };

        let state = host.state();
        let host_ok = match state {
            MachineState::Active => true,
            MachineState::StartingDecommission | MachineState::Decommissioning => {
                self.policy.allow_on_decommissioning
            }
            _ => false,
        };
        if !host_ok {
            return Ok(PlacementDecision::Rejected(PlacementRejection::HostState {
                state,
            }));
        }

        if self.store.is_frozen(host_id)? {
            return Ok(PlacementDecision::Rejected(PlacementRejection::HostFrozen));
        }

        if let Some(domain_id) = host.domain_id.as_deref() {
            if let Some(domain) = self.store.get(MachineKind::Domain, domain_id)? {
                let domain_state = domain.state();
                if domain_blocks_placement(domain_state) {
                    return Ok(PlacementDecision::Rejected(PlacementRejection::DomainState {
                        domain_id: domain_id.to_string(),
                        state: domain_state,
                    }));
                }
            }
        }

        Ok(PlacementDecision::Eligible)
    }

    /// Whether `host_id` may accept new placements. Store failures reject.
    pub fn can_place_on(&self, host_id: &str) -> bool {
        match self.evaluate(host_id) {
            Ok(PlacementDecision::Eligible) => true,
            Ok(PlacementDecision::Rejected(reason)) => {
                debug!(host = %host_id, reason = %reason, "placement rejected");
                false
            }
            Err(e) => {
                warn!(host = %host_id, error = %e, "placement check failed; rejecting");
                false
            }
        }
    }

    /// Whether a replacement running on `host_id` counts as safely moved
    /// away: the host is not itself leaving or gone, and neither is its
    /// domain. Frozen hosts qualify, since freezing keeps existing tasks.
    pub fn can_host_replacement(&self, host_id: &str) -> Result<bool, LifecycleError> {
        let Some(host) = self.store.get(MachineKind::Host, host_id)? else {
            return Ok(false);
        };
        let state = host.state();
        if state.is_decommissioning() || state.is_gone() {
            return Ok(false);
        }

        if let Some(domain_id) = host.domain_id.as_deref() {
            if let Some(domain) = self.store.get(MachineKind::Domain, domain_id)? {
                let domain_state = domain.state();
                if domain_state.is_decommissioning() || domain_state == MachineState::Dead {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

fn domain_blocks_placement(state: MachineState) -> bool {
    matches!(
        state,
        MachineState::StartingDecommission
            | MachineState::Decommissioning
            | MachineState::Frozen
            | MachineState::Decommissioned
    )
}
