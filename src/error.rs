//! Error taxonomy for lifecycle operations

use lifecycle_model::{MachineKind, MachineState};

use crate::inventory::CollaboratorError;
use crate::store::StoreError;

/// Errors surfaced by lifecycle operations.
///
/// `change_state` reports NOT_FOUND / ALREADY_AT_STATE / ILLEGAL_TRANSITION as
/// `StateChangeResult` values; the matching variants here exist for callers
/// that prefer `?` (see [`crate::machine::into_result`]).
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: MachineKind, id: String },

    #[error("{kind} '{id}': illegal transition from {from} to {to}")]
    IllegalTransition {
        kind: MachineKind,
        id: String,
        from: MachineState,
        to: MachineState,
    },

    #[error("{kind} '{id}' is already {state}")]
    AlreadyAtState {
        kind: MachineKind,
        id: String,
        state: MachineState,
    },

    /// Another writer changed the machine between our read and our write.
    #[error("{kind} '{id}' was changed concurrently; retry")]
    ConflictRetryable { kind: MachineKind, id: String },

    #[error("Task collaborator failed for {kind} '{id}': {source}")]
    ExternalCollaboratorFailure {
        kind: MachineKind,
        id: String,
        #[source]
        source: CollaboratorError,
    },

    /// Persistence failure; aborts whole passes.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl LifecycleError {
    /// Fatal errors abort a whole pass instead of a single machine.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LifecycleError::Store(StoreError::Unavailable(_)))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, LifecycleError::ConflictRetryable { .. })
    }
}
