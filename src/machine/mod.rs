//! Machine state machine
//!
//! One engine serves both hosts and domains. Kind-specific behaviour (domain
//! state derived from member hosts) is injected as a [`TransitionHook`] that
//! runs after a transition commits.
//!
//! Every mutation is a compare-and-set against the history length read just
//! before it. A writer that loses the race is told so; it never overwrites.

mod domain;
mod host;

pub use domain::DomainLifecycleManager;
pub use host::{HostLifecycleManager, StartupCheckReport};

use std::sync::Arc;

use chrono::Utc;
use lifecycle_model::{
    CleanupReason, Machine, MachineKind, MachineState, MachineStateRecord, StateChangeResult,
};
use tracing::{debug, info, warn};

use crate::error::LifecycleError;
use crate::store::{LifecycleStore, StoreError};

/// Runs after a transition has been committed.
///
/// `from` is `None` when the machine was just created.
pub trait TransitionHook: Send + Sync {
    fn after_transition(
        &self,
        machine: &Machine,
        from: Option<MachineState>,
    ) -> Result<(), LifecycleError>;
}

/// Generic lifecycle engine for one kind of machine.
pub struct MachineStateMachine {
    kind: MachineKind,
    store: Arc<dyn LifecycleStore>,
    create_on_activate: bool,
    hooks: Vec<Arc<dyn TransitionHook>>,
}

impl MachineStateMachine {
    pub fn new(kind: MachineKind, store: Arc<dyn LifecycleStore>) -> Self {
        Self {
            kind,
            store,
            create_on_activate: true,
            hooks: Vec::new(),
        }
    }

    /// Whether `change_state(unknown, ACTIVE)` registers a new machine.
    pub fn with_create_on_activate(mut self, enabled: bool) -> Self {
        self.create_on_activate = enabled;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn TransitionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn kind(&self) -> MachineKind {
        self.kind
    }

    /// Request a transition of `id` to `target`.
    ///
    /// Rejections come back as `Ok(StateChangeResult::Failure*)`. `Err` means
    /// the store failed or another writer changed the machine first
    /// ([`LifecycleError::ConflictRetryable`]).
    ///
    /// A store failure after the record was written still returns `Err`,
    /// but the transition stands. Derived domain state left behind is
    /// repaired by the next reconciliation pass.
    pub fn change_state(
        &self,
        id: &str,
        target: MachineState,
        message: Option<String>,
        user: Option<String>,
    ) -> Result<StateChangeResult, LifecycleError> {
        let record = MachineStateRecord::new(target, Utc::now())
            .with_message(message)
            .with_user(user);

        let machine = match self.store.get(self.kind, id)? {
            Some(machine) => machine,
            None if target == MachineState::Active && self.create_on_activate => {
                let machine = Machine::new(id, self.kind, record);
                return self.register(machine);
            }
            None => return Ok(StateChangeResult::FailureNotFound),
        };

        let from = machine.state();
        if from == target {
            return Ok(StateChangeResult::FailureAlreadyAtState);
        }
        if !from.can_transition_to(target) {
            return Ok(StateChangeResult::FailureIllegalTransition);
        }

        let updated = match self
            .store
            .append_state(self.kind, id, machine.version(), record)
        {
            Ok(updated) => updated,
            Err(StoreError::VersionConflict { .. }) => return self.resolve_conflict(id, target),
            Err(StoreError::NotFound { .. }) => return Ok(StateChangeResult::FailureNotFound),
            Err(e) => return Err(e.into()),
        };

        info!(
            kind = %self.kind,
            machine = %id,
            from = %from,
            to = %target,
            user = updated.current_state().user.as_deref().unwrap_or(""),
            "machine state changed"
        );

        // Committed; follow-up work all runs and the first failure is returned
        let follow_up = if from.is_decommissioning() && !target.is_decommissioning() {
            self.drop_decommission_cleanups(id)
        } else {
            Ok(())
        };
        let hooks = self.run_hooks(&updated, Some(from));
        follow_up.and(hooks)?;

        Ok(StateChangeResult::Success)
    }

    /// Create a machine with its initial history. Returns
    /// `FailureAlreadyAtState` if a machine with that id already exists.
    pub fn register(&self, machine: Machine) -> Result<StateChangeResult, LifecycleError> {
        match self.store.insert(machine.clone()) {
            Ok(()) => {}
            Err(StoreError::AlreadyExists { .. }) => {
                return Ok(StateChangeResult::FailureAlreadyAtState)
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            kind = %self.kind,
            machine = %machine.id,
            state = %machine.state(),
            "machine registered"
        );
        self.run_hooks(&machine, None)?;

        Ok(StateChangeResult::Success)
    }

    /// The other writer won. Report what the caller can act on.
    fn resolve_conflict(
        &self,
        id: &str,
        target: MachineState,
    ) -> Result<StateChangeResult, LifecycleError> {
        match self.store.get(self.kind, id)? {
            None => Ok(StateChangeResult::FailureNotFound),
            Some(current) if current.state() == target => {
                Ok(StateChangeResult::FailureAlreadyAtState)
            }
            Some(current) => {
                warn!(
                    kind = %self.kind,
                    machine = %id,
                    now = %current.state(),
                    wanted = %target,
                    "lost state change race"
                );
                Err(LifecycleError::ConflictRetryable {
                    kind: self.kind,
                    id: id.to_string(),
                })
            }
        }
    }

    /// Every hook runs. Lost races are logged; the first other failure is
    /// returned.
    fn run_hooks(&self, machine: &Machine, from: Option<MachineState>) -> Result<(), LifecycleError> {
        let mut first_failure = None;
        for hook in &self.hooks {
            if let Err(e) = hook.after_transition(machine, from) {
                warn!(
                    kind = %self.kind,
                    machine = %machine.id,
                    error = %e,
                    "post-transition hook failed"
                );
                if !e.is_retryable() && first_failure.is_none() {
                    first_failure = Some(e);
                }
            }
        }
        first_failure.map_or(Ok(()), Err)
    }

    /// An aborted decommission leaves nothing behind for the reconciler.
    fn drop_decommission_cleanups(&self, id: &str) -> Result<(), LifecycleError> {
        for entry in self.store.list_cleanups(self.kind, id)? {
            if entry.reason == CleanupReason::Decommissioning {
                self.store.delete_cleanup(self.kind, id, &entry.task_id)?;
            }
        }
        Ok(())
    }

    // === Reads ===

    pub fn get_object(&self, id: &str) -> Result<Option<Machine>, LifecycleError> {
        Ok(self.store.get(self.kind, id)?)
    }

    /// History oldest first; empty for unknown machines.
    pub fn get_history(&self, id: &str) -> Result<Vec<MachineStateRecord>, LifecycleError> {
        Ok(self
            .store
            .get(self.kind, id)?
            .map(|machine| machine.history().to_vec())
            .unwrap_or_default())
    }

    pub fn get_objects(&self) -> Result<Vec<Machine>, LifecycleError> {
        Ok(self.store.list(self.kind)?)
    }

    pub fn get_objects_filtered(&self, state: MachineState) -> Result<Vec<Machine>, LifecycleError> {
        Ok(self.store.list_by_state(self.kind, state)?)
    }

    pub fn get_num_objects_at_state(&self, state: MachineState) -> Result<usize, LifecycleError> {
        Ok(self.get_objects_filtered(state)?.len())
    }

    /// Remove the machine, its history, its cleanup entries and any frozen
    /// override. Returns whether the machine existed.
    pub fn delete_object(&self, id: &str) -> Result<bool, LifecycleError> {
        let existed = self.store.delete(self.kind, id)?;
        self.forget(id, existed)?;
        Ok(existed)
    }

    /// Delete the machine only if nothing changed it since `version` was
    /// read. Returns whether it was deleted.
    pub fn delete_object_if_version(&self, id: &str, version: u64) -> Result<bool, LifecycleError> {
        match self.store.delete_if_version(self.kind, id, version) {
            Ok(existed) => {
                self.forget(id, existed)?;
                Ok(existed)
            }
            Err(StoreError::VersionConflict { .. }) => {
                debug!(kind = %self.kind, machine = %id, "changed since read; not deleted");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn forget(&self, id: &str, existed: bool) -> Result<(), LifecycleError> {
        self.store.delete_cleanups_for(self.kind, id)?;
        if self.kind == MachineKind::Host {
            self.store.set_frozen(id, false)?;
        }
        if existed {
            info!(kind = %self.kind, machine = %id, "machine deleted");
        }
        Ok(())
    }
}

/// Convert a rejected result into the error taxonomy.
pub fn into_result(
    result: StateChangeResult,
    kind: MachineKind,
    id: &str,
    current: Option<MachineState>,
    target: MachineState,
) -> Result<(), LifecycleError> {
    match (result, current) {
        (StateChangeResult::Success, _) => Ok(()),
        (StateChangeResult::FailureNotFound, _) | (_, None) => Err(LifecycleError::NotFound {
            kind,
            id: id.to_string(),
        }),
        (StateChangeResult::FailureAlreadyAtState, Some(state)) => {
            Err(LifecycleError::AlreadyAtState {
                kind,
                id: id.to_string(),
                state,
            })
        }
        (StateChangeResult::FailureIllegalTransition, Some(from)) => {
            Err(LifecycleError::IllegalTransition {
                kind,
                id: id.to_string(),
                from,
                to: target,
            })
        }
    }
}
