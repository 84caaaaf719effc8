//! Decommission reconciliation
//!
//! One pass advances every STARTING_DECOMMISSION machine to DECOMMISSIONING,
//! then drains every DECOMMISSIONING machine:
//!
//! 1. list the tasks still active on it (on any member host for a domain)
//! 2. make sure each has a DECOMMISSIONING cleanup entry and a requested
//!    replacement
//! 3. kill a task only once its replacement is RUNNING on a different host
//!    that is not itself leaving
//! 4. finalize to DECOMMISSIONED once no task and no entry remains
//!
//! Cleanup entries are written before any side effect, so a pass interrupted
//! anywhere picks up where it left off. Kills are recorded on the entry; a
//! task still active once the kill retry window has passed is killed again.
//!
//! Each pass ends by re-deriving every domain's ACTIVE/DEAD state from its
//! hosts, repairing any derivation a failed write left behind.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use lifecycle_model::{
    CleanupEntry, CleanupReason, Machine, MachineKind, MachineState, StateChangeResult,
    TaskScope, TaskView,
};
use serde::Serialize;
use tracing::{debug, info, info_span, warn};
use ulid::Ulid;

use crate::config::{LifecycleAction, Tunables};
use crate::error::LifecycleError;
use crate::inventory::{CollaboratorError, TaskInventory};
use crate::machine::{DomainLifecycleManager, HostLifecycleManager, MachineStateMachine};
use crate::placement::PlacementGuard;
use crate::store::LifecycleStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineRef {
    pub kind: MachineKind,
    pub id: String,
}

impl MachineRef {
    fn of(machine: &Machine) -> Self {
        Self {
            kind: machine.kind,
            id: machine.id.clone(),
        }
    }
}

/// A machine the pass could not make progress on.
#[derive(Debug, Clone, Serialize)]
pub struct MachineFailure {
    pub machine: MachineRef,
    pub error: String,
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub pass_id: String,
    pub skipped: bool,
    /// STARTING_DECOMMISSION → DECOMMISSIONING
    pub advanced: Vec<MachineRef>,
    /// DECOMMISSIONING → DECOMMISSIONED
    pub finalized: Vec<MachineRef>,
    pub replacements_requested: usize,
    pub kills_issued: usize,
    /// Kills sent again after the retry window
    pub kills_reissued: usize,
    /// Domains whose ACTIVE/DEAD state was repaired
    pub rederived: Vec<MachineRef>,
    pub failures: Vec<MachineFailure>,
}

pub struct DecommissionReconciler {
    store: Arc<dyn LifecycleStore>,
    hosts: Arc<HostLifecycleManager>,
    domains: Arc<DomainLifecycleManager>,
    guard: Arc<PlacementGuard>,
    inventory: Arc<dyn TaskInventory>,
    tunables: Arc<Tunables>,
    kill_retry: TimeDelta,
}

impl DecommissionReconciler {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        hosts: Arc<HostLifecycleManager>,
        domains: Arc<DomainLifecycleManager>,
        guard: Arc<PlacementGuard>,
        inventory: Arc<dyn TaskInventory>,
        tunables: Arc<Tunables>,
    ) -> Self {
        Self {
            store,
            hosts,
            domains,
            guard,
            inventory,
            tunables,
            kill_retry: TimeDelta::minutes(10),
        }
    }

    /// How long a requested kill may go unanswered before it is sent again.
    pub fn with_kill_retry(mut self, kill_retry: TimeDelta) -> Self {
        self.kill_retry = kill_retry;
        self
    }

    fn machines(&self, kind: MachineKind) -> &MachineStateMachine {
        match kind {
            MachineKind::Host => self.hosts.machines(),
            MachineKind::Domain => self.domains.machines(),
        }
    }

    /// Run one pass. Per-machine failures are collected in the report; a
    /// store outage aborts the pass with `Err`.
    pub fn run_pass(&self) -> Result<ReconcileReport, LifecycleError> {
        let pass_id = Ulid::new().to_string();
        let span = info_span!("reconcile", pass_id = %pass_id);
        let _entered = span.enter();

        let mut report = ReconcileReport {
            pass_id,
            ..Default::default()
        };

        if self.tunables.is_disabled(LifecycleAction::Reconcile) {
            warn!("reconciliation is currently disabled");
            report.skipped = true;
            return Ok(report);
        }

        for kind in [MachineKind::Host, MachineKind::Domain] {
            self.advance(kind, &mut report)?;
        }

        for kind in [MachineKind::Host, MachineKind::Domain] {
            for machine in self.store.list_by_state(kind, MachineState::Decommissioning)? {
                if let Err(e) = self.drain(&machine, &mut report) {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    warn!(kind = %kind, machine = %machine.id, error = %e, "decommission stalled");
                    report.failures.push(MachineFailure {
                        machine: MachineRef::of(&machine),
                        error: e.to_string(),
                    });
                }
            }
        }

        report.rederived = self
            .domains
            .rederive_all()?
            .into_iter()
            .map(|id| MachineRef {
                kind: MachineKind::Domain,
                id,
            })
            .collect();

        info!(
            advanced = report.advanced.len(),
            finalized = report.finalized.len(),
            replacements = report.replacements_requested,
            kills = report.kills_issued,
            kills_reissued = report.kills_reissued,
            rederived = report.rederived.len(),
            failures = report.failures.len(),
            "reconciliation pass complete"
        );
        Ok(report)
    }

    fn advance(&self, kind: MachineKind, report: &mut ReconcileReport) -> Result<(), LifecycleError> {
        for machine in self
            .store
            .list_by_state(kind, MachineState::StartingDecommission)?
        {
            let user = machine.current_state().user.clone();
            let result = self.machines(kind).change_state(
                &machine.id,
                MachineState::Decommissioning,
                Some("draining tasks".to_string()),
                user,
            );
            match result {
                Ok(StateChangeResult::Success) => report.advanced.push(MachineRef::of(&machine)),
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => report.failures.push(MachineFailure {
                    machine: MachineRef::of(&machine),
                    error: e.to_string(),
                }),
            }
        }
        Ok(())
    }

    fn drain(&self, machine: &Machine, report: &mut ReconcileReport) -> Result<(), LifecycleError> {
        let kind = machine.kind;
        let scope = match kind {
            MachineKind::Host => TaskScope::Host(machine.id.clone()),
            MachineKind::Domain => TaskScope::Domain(machine.id.clone()),
        };
        let collaborator = |source: CollaboratorError| LifecycleError::ExternalCollaboratorFailure {
            kind,
            id: machine.id.clone(),
            source,
        };

        let tasks = self
            .inventory
            .list_active_tasks(&scope)
            .map_err(collaborator)?;
        let entries: Vec<CleanupEntry> = self
            .store
            .list_cleanups(kind, &machine.id)?
            .into_iter()
            .filter(|entry| entry.reason == CleanupReason::Decommissioning)
            .collect();

        // Tasks that are gone need no more work
        for entry in &entries {
            if !tasks.iter().any(|task| task.task_id == entry.task_id) {
                self.store.delete_cleanup(kind, &machine.id, &entry.task_id)?;
                debug!(machine = %machine.id, task = %entry.task_id, "task drained");
            }
        }

        for task in &tasks {
            let entry = entries
                .iter()
                .find(|entry| entry.task_id == task.task_id)
                .cloned();
            self.drain_task(machine, task, entry, report)
                .map_err(|e| match e {
                    DrainError::Lifecycle(e) => e,
                    DrainError::Collaborator(source) => collaborator(source),
                })?;
        }

        if !tasks.is_empty() {
            return Ok(());
        }

        let outstanding = self
            .store
            .list_cleanups(kind, &machine.id)?
            .iter()
            .any(|entry| entry.reason == CleanupReason::Decommissioning);
        if outstanding {
            return Ok(());
        }
        // Nothing may have landed since the first listing
        if !self
            .inventory
            .list_active_tasks(&scope)
            .map_err(collaborator)?
            .is_empty()
        {
            return Ok(());
        }

        self.finalize(machine, report)
    }

    fn drain_task(
        &self,
        machine: &Machine,
        task: &TaskView,
        entry: Option<CleanupEntry>,
        report: &mut ReconcileReport,
    ) -> Result<(), DrainError> {
        let now = Utc::now();
        let mut entry = match entry {
            Some(entry) => entry,
            None => {
                let entry = CleanupEntry::new(
                    machine.kind,
                    &machine.id,
                    &task.task_id,
                    CleanupReason::Decommissioning,
                    now,
                );
                self.store.put_cleanup(entry.clone())?;
                entry
            }
        };

        // A host inside a decommissioning domain is drained twice; share
        // whatever the other entry already did for this task.
        let siblings = self.store.find_cleanups_for_task(&task.task_id)?;
        if let Some(killed_at) = siblings
            .iter()
            .filter_map(|sibling| sibling.kill_requested_at)
            .max()
        {
            if now - killed_at < self.kill_retry {
                return Ok(());
            }
            self.inventory.kill(&task.task_id)?;
            entry.kill_requested_at = Some(now);
            self.store.put_cleanup(entry)?;
            report.kills_reissued += 1;
            warn!(
                machine = %machine.id,
                task = %task.task_id,
                killed_at = %killed_at,
                "task outlived its kill; killed again"
            );
            return Ok(());
        }
        if entry.replacement_task_id.is_none() {
            entry.replacement_task_id = siblings
                .iter()
                .find_map(|sibling| sibling.replacement_task_id.clone());
        }

        let replacement = match &entry.replacement_task_id {
            Some(replacement_id) => self
                .inventory
                .get_task(replacement_id)?
                .filter(|replacement| replacement.is_active),
            None => None,
        };

        let Some(replacement) = replacement else {
            let replacement_id = self.inventory.request_replacement(task)?;
            report.replacements_requested += 1;
            info!(
                machine = %machine.id,
                task = %task.task_id,
                replacement = %replacement_id,
                "replacement requested"
            );
            entry.replacement_task_id = Some(replacement_id);
            self.store.put_cleanup(entry)?;
            return Ok(());
        };
        self.store.put_cleanup(entry.clone())?;

        if !replacement.is_running
            || replacement.host_id.is_empty()
            || replacement.host_id == task.host_id
            || !self.guard.can_host_replacement(&replacement.host_id)?
        {
            return Ok(());
        }

        // Re-validate right before the irreversible step
        let still_draining = self
            .store
            .get(machine.kind, &machine.id)?
            .map(|current| current.state() == MachineState::Decommissioning)
            .unwrap_or(false);
        if !still_draining {
            return Ok(());
        }

        self.inventory.kill(&task.task_id)?;
        entry.kill_requested_at = Some(now);
        self.store.put_cleanup(entry)?;
        report.kills_issued += 1;
        info!(
            machine = %machine.id,
            task = %task.task_id,
            replacement = %replacement.task_id,
            replacement_host = %replacement.host_id,
            "task killed after replacement started"
        );
        Ok(())
    }

    fn finalize(&self, machine: &Machine, report: &mut ReconcileReport) -> Result<(), LifecycleError> {
        let requester = self
            .store
            .get(machine.kind, &machine.id)?
            .and_then(|current| current.decommission_requester().map(str::to_string));

        let result = self.machines(machine.kind).change_state(
            &machine.id,
            MachineState::Decommissioned,
            Some("all tasks drained".to_string()),
            requester,
        )?;
        if result.is_success() {
            report.finalized.push(MachineRef::of(machine));
        }
        Ok(())
    }
}

/// Errors inside one task's drain, before they are tied to the machine.
enum DrainError {
    Lifecycle(LifecycleError),
    Collaborator(CollaboratorError),
}

impl From<LifecycleError> for DrainError {
    fn from(e: LifecycleError) -> Self {
        DrainError::Lifecycle(e)
    }
}

impl From<crate::store::StoreError> for DrainError {
    fn from(e: crate::store::StoreError) -> Self {
        DrainError::Lifecycle(e.into())
    }
}

impl From<CollaboratorError> for DrainError {
    fn from(e: CollaboratorError) -> Self {
        DrainError::Collaborator(e)
    }
}
