//! Administrative operations
//!
//! Humans may decommission, freeze and reactivate machines. The remaining
//! states are reached only through the system: the reconciler drives
//! DECOMMISSIONING and DECOMMISSIONED, startup checks and host loss drive
//! MISSING_ON_STARTUP and DEAD, and a domain's ACTIVE/DEAD follows its hosts.

use std::sync::Arc;

use lifecycle_model::{MachineKind, MachineState, StateChangeResult};
use tracing::{debug, info};

use crate::config::{LifecycleAction, Tunables};
use crate::error::LifecycleError;
use crate::machine::{DomainLifecycleManager, HostLifecycleManager, MachineStateMachine};
use crate::store::LifecycleStore;

pub struct AdminSurface {
    store: Arc<dyn LifecycleStore>,
    hosts: Arc<HostLifecycleManager>,
    domains: Arc<DomainLifecycleManager>,
    tunables: Arc<Tunables>,
}

/// States only the system may enter.
fn system_only(target: MachineState) -> bool {
    matches!(
        target,
        MachineState::Decommissioning
            | MachineState::Decommissioned
            | MachineState::MissingOnStartup
            | MachineState::Dead
    )
}

impl AdminSurface {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        hosts: Arc<HostLifecycleManager>,
        domains: Arc<DomainLifecycleManager>,
        tunables: Arc<Tunables>,
    ) -> Self {
        Self {
            store,
            hosts,
            domains,
            tunables,
        }
    }

    fn machines(&self, kind: MachineKind) -> &MachineStateMachine {
        match kind {
            MachineKind::Host => self.hosts.machines(),
            MachineKind::Domain => self.domains.machines(),
        }
    }

    /// Human-requested state change.
    pub fn change_state(
        &self,
        kind: MachineKind,
        id: &str,
        target: MachineState,
        message: Option<String>,
        user: Option<String>,
    ) -> Result<StateChangeResult, LifecycleError> {
        if system_only(target) {
            debug!(kind = %kind, machine = %id, to = %target, "refused manual transition");
            return Ok(StateChangeResult::FailureIllegalTransition);
        }

        if kind == MachineKind::Domain && target == MachineState::Active {
            return self.activate_domain(id, message, user);
        }

        self.machines(kind).change_state(id, target, message, user)
    }

    /// A domain may only be put back in service while a member host is
    /// ACTIVE; a DEAD domain comes back only through its hosts.
    fn activate_domain(
        &self,
        id: &str,
        message: Option<String>,
        user: Option<String>,
    ) -> Result<StateChangeResult, LifecycleError> {
        match self.store.get(MachineKind::Domain, id)? {
            None => return Ok(StateChangeResult::FailureNotFound),
            Some(domain) if domain.state() == MachineState::Dead => {
                return Ok(StateChangeResult::FailureIllegalTransition);
            }
            Some(_) => {}
        }
        if self.domains.active_host_count(id)? == 0 {
            debug!(domain = %id, "refused activation without active hosts");
            return Ok(StateChangeResult::FailureIllegalTransition);
        }

        let result = self
            .domains
            .change_state(id, MachineState::Active, message, user)?;
        if result.is_success() {
            // The last host may have left between the count and the write
            self.domains.rederive(id)?;
        }
        Ok(result)
    }

    pub fn decommission(
        &self,
        kind: MachineKind,
        id: &str,
        message: Option<String>,
        user: Option<String>,
    ) -> Result<StateChangeResult, LifecycleError> {
        self.change_state(kind, id, MachineState::StartingDecommission, message, user)
    }

    pub fn freeze(
        &self,
        kind: MachineKind,
        id: &str,
        message: Option<String>,
        user: Option<String>,
    ) -> Result<StateChangeResult, LifecycleError> {
        self.change_state(kind, id, MachineState::Frozen, message, user)
    }

    pub fn activate(
        &self,
        kind: MachineKind,
        id: &str,
        message: Option<String>,
        user: Option<String>,
    ) -> Result<StateChangeResult, LifecycleError> {
        self.change_state(kind, id, MachineState::Active, message, user)
    }

    /// Delete a machine that is out of service.
    ///
    /// Machines still ACTIVE, FROZEN or draining are refused with
    /// `FailureIllegalTransition`.
    pub fn purge(&self, kind: MachineKind, id: &str) -> Result<StateChangeResult, LifecycleError> {
        let machines = self.machines(kind);
        let Some(machine) = machines.get_object(id)? else {
            return Ok(StateChangeResult::FailureNotFound);
        };
        let state = machine.state();
        if !(state.is_gone() || state == MachineState::Decommissioned) {
            return Ok(StateChangeResult::FailureIllegalTransition);
        }

        if !machines.delete_object_if_version(id, machine.version())? {
            return match machines.get_object(id)? {
                None => Ok(StateChangeResult::FailureNotFound),
                Some(_) => Err(LifecycleError::ConflictRetryable {
                    kind,
                    id: id.to_string(),
                }),
            };
        }
        info!(kind = %kind, machine = %id, state = %state, "machine purged");
        Ok(StateChangeResult::Success)
    }

    /// Add or remove a host from the frozen override set.
    pub fn set_frozen(&self, host_id: &str, frozen: bool) -> Result<(), LifecycleError> {
        self.store.set_frozen(host_id, frozen)?;
        info!(host = %host_id, frozen, "frozen override updated");
        Ok(())
    }

    pub fn set_retention_hours(&self, hours: u64) {
        self.tunables.set_retention_hours(hours);
        info!(hours, "dead machine retention updated");
    }

    pub fn disable_action(&self, action: LifecycleAction) {
        self.tunables.disable(action);
        info!(?action, "action disabled");
    }

    pub fn enable_action(&self, action: LifecycleAction) {
        self.tunables.enable(action);
        info!(?action, "action enabled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::LifecycleConfig;
    use crate::mock::MockTaskInventory;
    use crate::store::MemoryStore;
    use crate::Lifecycle;

    fn setup() -> (Lifecycle, MemoryStore) {
        let store = MemoryStore::new();
        let lifecycle = Lifecycle::new(
            Arc::new(store.clone()),
            Arc::new(MockTaskInventory::new()),
            &LifecycleConfig::default(),
        );
        lifecycle.hosts().register("h1", "d1", None).unwrap();
        (lifecycle, store)
    }

    #[test]
    fn test_system_states_refused() {
        let (lifecycle, _) = setup();
        let admin = lifecycle.admin();
        for target in [
            MachineState::Decommissioning,
            MachineState::Decommissioned,
            MachineState::MissingOnStartup,
            MachineState::Dead,
        ] {
            assert_eq!(
                admin
                    .change_state(MachineKind::Host, "h1", target, None, None)
                    .unwrap(),
                StateChangeResult::FailureIllegalTransition
            );
        }
    }

    #[test]
    fn test_decommission_freeze_activate() {
        let (lifecycle, store) = setup();
        let admin = lifecycle.admin();
        let user = Some("ops".to_string());

        assert!(admin
            .freeze(MachineKind::Host, "h1", None, user.clone())
            .unwrap()
            .is_success());
        assert!(admin
            .decommission(MachineKind::Host, "h1", None, user.clone())
            .unwrap()
            .is_success());
        assert!(admin
            .activate(MachineKind::Host, "h1", None, user)
            .unwrap()
            .is_success());
        let host = store.get(MachineKind::Host, "h1").unwrap().unwrap();
        assert_eq!(host.history().len(), 4);
    }

    #[test]
    fn test_dead_domain_not_manually_activated() {
        let (lifecycle, store) = setup();
        lifecycle.hosts().host_lost("h1").unwrap();
        assert_eq!(
            store.get(MachineKind::Domain, "d1").unwrap().unwrap().state(),
            MachineState::Dead
        );

        let admin = lifecycle.admin();
        assert_eq!(
            admin.activate(MachineKind::Domain, "d1", None, None).unwrap(),
            StateChangeResult::FailureIllegalTransition
        );
        assert_eq!(
            admin.activate(MachineKind::Domain, "nope", None, None).unwrap(),
            StateChangeResult::FailureNotFound
        );
    }

    #[test]
    fn test_domain_activation_needs_active_host() {
        let (lifecycle, store) = setup();
        let admin = lifecycle.admin();
        let domain_state = || store.get(MachineKind::Domain, "d1").unwrap().unwrap().state();

        admin.freeze(MachineKind::Domain, "d1", None, None).unwrap();
        lifecycle.hosts().host_lost("h1").unwrap();
        assert_eq!(domain_state(), MachineState::Frozen);

        assert_eq!(
            admin.activate(MachineKind::Domain, "d1", None, None).unwrap(),
            StateChangeResult::FailureIllegalTransition
        );
        assert_eq!(domain_state(), MachineState::Frozen);

        // With a member back in service the domain may be reactivated
        lifecycle.hosts().register("h2", "d1", None).unwrap();
        assert!(admin
            .activate(MachineKind::Domain, "d1", None, None)
            .unwrap()
            .is_success());
        assert_eq!(domain_state(), MachineState::Active);
    }

    #[test]
    fn test_purge_requires_out_of_service() {
        let (lifecycle, store) = setup();
        let admin = lifecycle.admin();
        assert_eq!(
            admin.purge(MachineKind::Host, "h1").unwrap(),
            StateChangeResult::FailureIllegalTransition
        );

        lifecycle.hosts().host_lost("h1").unwrap();
        assert_eq!(
            admin.purge(MachineKind::Host, "h1").unwrap(),
            StateChangeResult::Success
        );
        assert!(store.get(MachineKind::Host, "h1").unwrap().is_none());
        assert_eq!(
            admin.purge(MachineKind::Host, "h1").unwrap(),
            StateChangeResult::FailureNotFound
        );
    }

    #[test]
    fn test_tunables() {
        let (lifecycle, store) = setup();
        let admin = lifecycle.admin();

        admin.set_frozen("h1", true).unwrap();
        assert!(store.is_frozen("h1").unwrap());
        assert!(!lifecycle.can_place_on("h1"));

        admin.set_retention_hours(2);
        assert_eq!(lifecycle.tunables().retention_hours(), 2);

        admin.set_retention_hours(u64::MAX);
        assert!(lifecycle.run_staleness_sweep().unwrap().skipped);
        admin.set_retention_hours(2);

        admin.disable_action(LifecycleAction::StalenessSweep);
        assert!(lifecycle.run_staleness_sweep().unwrap().skipped);
        admin.enable_action(LifecycleAction::StalenessSweep);
        assert!(!lifecycle.run_staleness_sweep().unwrap().skipped);
    }
}
