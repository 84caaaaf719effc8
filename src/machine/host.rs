//! Host lifecycle: registration from offers, loss, startup staleness

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use lifecycle_model::{
    Machine, MachineKind, MachineState, MachineStateRecord, StateChangeResult, TaskScope,
};
use serde::Serialize;
use tracing::{info, warn};

use super::{MachineStateMachine, TransitionHook};
use crate::config::{seconds_delta, LifecycleAction, LifecycleConfig, Tunables};
use crate::error::LifecycleError;
use crate::inventory::TaskInventory;
use crate::store::LifecycleStore;

/// Outcome of one startup staleness check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StartupCheckReport {
    pub skipped: bool,
    /// ACTIVE → MISSING_ON_STARTUP
    pub missing: Vec<String>,
    /// MISSING_ON_STARTUP → DEAD
    pub dead: Vec<String>,
}

/// Tracks individual hosts.
pub struct HostLifecycleManager {
    machines: MachineStateMachine,
    store: Arc<dyn LifecycleStore>,
    tunables: Arc<Tunables>,
    started_at: DateTime<Utc>,
    startup_grace: TimeDelta,
    missing_dead_after: TimeDelta,
}

impl HostLifecycleManager {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        tunables: Arc<Tunables>,
        config: &LifecycleConfig,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            machines: MachineStateMachine::new(MachineKind::Host, store.clone())
                .with_create_on_activate(config.create_on_activate),
            store,
            tunables,
            started_at,
            startup_grace: seconds(config.startup_grace_seconds),
            missing_dead_after: seconds(config.missing_on_startup_dead_seconds),
        }
    }

    /// Attach a hook run after every committed host transition.
    pub fn with_hook(mut self, hook: Arc<dyn TransitionHook>) -> Self {
        self.machines = self.machines.with_hook(hook);
        self
    }

    pub fn machines(&self) -> &MachineStateMachine {
        &self.machines
    }

    pub fn change_state(
        &self,
        host_id: &str,
        target: MachineState,
        message: Option<String>,
        user: Option<String>,
    ) -> Result<StateChangeResult, LifecycleError> {
        self.machines.change_state(host_id, target, message, user)
    }

    /// Pre-register a host in `domain_id` as ACTIVE.
    pub fn register(
        &self,
        host_id: &str,
        domain_id: &str,
        address: Option<&str>,
    ) -> Result<StateChangeResult, LifecycleError> {
        let record = MachineStateRecord::new(MachineState::Active, Utc::now());
        let mut host = Machine::host(host_id, domain_id, record);
        host.address = address.map(str::to_string);
        self.machines.register(host)
    }

    /// A host offered capacity: register it on first sight, bring it back if
    /// it had been given up on, and record that it was seen.
    ///
    /// Decommissioned, decommissioning and frozen hosts stay where they are;
    /// only an operator brings those back.
    pub fn observe_offer(
        &self,
        host_id: &str,
        address: &str,
        domain_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Machine, LifecycleError> {
        match self.store.get(MachineKind::Host, host_id)? {
            None => {
                self.register(host_id, domain_id, Some(address))?;
            }
            Some(host) => {
                if host.domain_id.as_deref() != Some(domain_id) {
                    warn!(
                        host = %host_id,
                        recorded = host.domain_id.as_deref().unwrap_or(""),
                        offered = %domain_id,
                        "host offered from a different domain than recorded"
                    );
                }
                if host.state().is_gone() {
                    let result = self.change_state(
                        host_id,
                        MachineState::Active,
                        Some("host offered capacity again".to_string()),
                        None,
                    );
                    match result {
                        Ok(_) | Err(LifecycleError::ConflictRetryable { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        self.store.touch(MachineKind::Host, host_id, now)?;

        self.store
            .get(MachineKind::Host, host_id)?
            .ok_or_else(|| LifecycleError::NotFound {
                kind: MachineKind::Host,
                id: host_id.to_string(),
            })
    }

    /// The host was reported gone. Repeated reports add no history.
    pub fn host_lost(&self, host_id: &str) -> Result<StateChangeResult, LifecycleError> {
        let result = self.change_state(
            host_id,
            MachineState::Dead,
            Some("host lost".to_string()),
            None,
        )?;
        if result.is_success() {
            info!(host = %host_id, "host lost");
        }
        Ok(result)
    }

    /// Mark hosts that have not offered since startup.
    ///
    /// After the grace window, ACTIVE hosts not seen since startup become
    /// MISSING_ON_STARTUP; after the longer window they become DEAD.
    pub fn check_missing_on_startup(
        &self,
        now: DateTime<Utc>,
    ) -> Result<StartupCheckReport, LifecycleError> {
        let mut report = StartupCheckReport::default();

        if self.tunables.is_disabled(LifecycleAction::StartupCheck) {
            warn!("startup check is currently disabled");
            report.skipped = true;
            return Ok(report);
        }

        let elapsed = now - self.started_at;
        if elapsed < self.startup_grace {
            return Ok(report);
        }

        for host in self.store.list_by_state(MachineKind::Host, MachineState::Active)? {
            if self.seen_since_startup(&host) {
                continue;
            }
            let result = self.change_state(
                &host.id,
                MachineState::MissingOnStartup,
                Some("not seen since startup".to_string()),
                None,
            );
            match result {
                Ok(StateChangeResult::Success) => report.missing.push(host.id),
                Ok(_) | Err(LifecycleError::ConflictRetryable { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        if elapsed < self.missing_dead_after {
            return Ok(report);
        }

        for host in self
            .store
            .list_by_state(MachineKind::Host, MachineState::MissingOnStartup)?
        {
            if self.seen_since_startup(&host) {
                continue;
            }
            let result = self.change_state(
                &host.id,
                MachineState::Dead,
                Some("never seen since startup".to_string()),
                None,
            );
            match result {
                Ok(StateChangeResult::Success) => report.dead.push(host.id),
                Ok(_) | Err(LifecycleError::ConflictRetryable { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    fn seen_since_startup(&self, host: &Machine) -> bool {
        host.last_seen_at
            .map(|seen| seen >= self.started_at)
            .unwrap_or(false)
    }

    /// Hosts recorded in `domain_id`.
    pub fn hosts_in_domain(&self, domain_id: &str) -> Result<Vec<Machine>, LifecycleError> {
        Ok(self
            .store
            .list(MachineKind::Host)?
            .into_iter()
            .filter(|host| host.domain_id.as_deref() == Some(domain_id))
            .collect())
    }

    /// Number of tasks the scheduler reports active on `host_id`.
    pub fn active_task_count(
        &self,
        host_id: &str,
        inventory: &dyn TaskInventory,
    ) -> Result<usize, LifecycleError> {
        inventory
            .list_active_tasks(&TaskScope::Host(host_id.to_string()))
            .map(|tasks| tasks.len())
            .map_err(|source| LifecycleError::ExternalCollaboratorFailure {
                kind: MachineKind::Host,
                id: host_id.to_string(),
                source,
            })
    }
}

/// Windows too long to represent never elapse.
fn seconds(value: u64) -> TimeDelta {
    seconds_delta(value).unwrap_or(TimeDelta::MAX)
}
