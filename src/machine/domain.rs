//! Domain lifecycle, partly derived from member hosts

use std::sync::Arc;

use chrono::Utc;
use lifecycle_model::{
    Machine, MachineKind, MachineState, MachineStateRecord, StateChangeResult,
};
use tracing::{debug, info};

use super::{MachineStateMachine, TransitionHook};
use crate::error::LifecycleError;
use crate::store::LifecycleStore;

/// Tracks failure domains.
///
/// Registered as a [`TransitionHook`] on the host engine: a domain goes
/// DEAD when its last ACTIVE host leaves ACTIVE and comes back when any
/// member re-enters ACTIVE. Those derived records carry no user.
pub struct DomainLifecycleManager {
    machines: MachineStateMachine,
    store: Arc<dyn LifecycleStore>,
    create_on_activate: bool,
}

impl DomainLifecycleManager {
    pub fn new(store: Arc<dyn LifecycleStore>, create_on_activate: bool) -> Self {
        Self {
            machines: MachineStateMachine::new(MachineKind::Domain, store.clone())
                .with_create_on_activate(create_on_activate),
            store,
            create_on_activate,
        }
    }

    pub fn machines(&self) -> &MachineStateMachine {
        &self.machines
    }

    pub fn change_state(
        &self,
        domain_id: &str,
        target: MachineState,
        message: Option<String>,
        user: Option<String>,
    ) -> Result<StateChangeResult, LifecycleError> {
        self.machines.change_state(domain_id, target, message, user)
    }

    pub fn register(&self, domain_id: &str) -> Result<StateChangeResult, LifecycleError> {
        let record = MachineStateRecord::new(MachineState::Active, Utc::now());
        self.machines
            .register(Machine::new(domain_id, MachineKind::Domain, record))
    }

    pub fn member_hosts(&self, domain_id: &str) -> Result<Vec<Machine>, LifecycleError> {
        Ok(self
            .store
            .list(MachineKind::Host)?
            .into_iter()
            .filter(|host| host.domain_id.as_deref() == Some(domain_id))
            .collect())
    }

    pub fn active_host_count(&self, domain_id: &str) -> Result<usize, LifecycleError> {
        Ok(self
            .member_hosts(domain_id)?
            .iter()
            .filter(|host| host.state() == MachineState::Active)
            .count())
    }

    /// Bring an ACTIVE or DEAD domain in line with its member hosts: DEAD
    /// with no active host, ACTIVE otherwise. Returns whether it changed.
    pub fn rederive(&self, domain_id: &str) -> Result<bool, LifecycleError> {
        let Some(domain) = self.store.get(MachineKind::Domain, domain_id)? else {
            return Ok(false);
        };
        match domain.state() {
            MachineState::Active if self.active_host_count(domain_id)? == 0 => {
                self.mark_dead(domain_id)
            }
            MachineState::Dead if self.active_host_count(domain_id)? > 0 => self.revive(domain_id),
            _ => Ok(false),
        }
    }

    /// [`rederive`](Self::rederive) every domain, skipping ones another
    /// writer is changing. Returns the ids that changed.
    pub fn rederive_all(&self) -> Result<Vec<String>, LifecycleError> {
        let mut changed = Vec::new();
        for domain in self.store.list(MachineKind::Domain)? {
            match self.rederive(&domain.id) {
                Ok(true) => changed.push(domain.id),
                Ok(false) => {}
                Err(e) if e.is_retryable() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(changed)
    }

    fn host_joined(&self, domain_id: &str) -> Result<(), LifecycleError> {
        if self.store.get(MachineKind::Domain, domain_id)?.is_none() {
            if self.create_on_activate {
                self.register(domain_id)?;
            }
            return Ok(());
        }
        self.rederive(domain_id)?;
        Ok(())
    }

    fn revive(&self, domain_id: &str) -> Result<bool, LifecycleError> {
        let result = self.change_state(
            domain_id,
            MachineState::Active,
            Some("member host active".to_string()),
            None,
        )?;
        if result.is_success() {
            info!(domain = %domain_id, "domain revived by member host");
        }
        Ok(result.is_success())
    }

    fn mark_dead(&self, domain_id: &str) -> Result<bool, LifecycleError> {
        let result = self.change_state(
            domain_id,
            MachineState::Dead,
            Some("no active member hosts".to_string()),
            None,
        )?;
        if !result.is_success() {
            return Ok(false);
        }
        info!(domain = %domain_id, "domain has no active hosts");

        // A host may have joined between the count and the write
        if self.active_host_count(domain_id)? > 0 {
            debug!(domain = %domain_id, "member host joined during derivation");
            self.revive(domain_id)?;
        }
        Ok(true)
    }
}

impl TransitionHook for DomainLifecycleManager {
    fn after_transition(
        &self,
        machine: &Machine,
        from: Option<MachineState>,
    ) -> Result<(), LifecycleError> {
        if machine.kind != MachineKind::Host {
            return Ok(());
        }
        let Some(domain_id) = machine.domain_id.as_deref() else {
            return Ok(());
        };

        let now_active = machine.state() == MachineState::Active;
        let was_active = from == Some(MachineState::Active);

        match (was_active, now_active) {
            (false, true) => self.host_joined(domain_id),
            (true, false) => self.rederive(domain_id).map(|_| ()),
            _ => Ok(()),
        }
    }
}
