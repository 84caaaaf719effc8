//! Persistence seam for machine records, cleanup entries and frozen overrides
//!
//! The lifecycle core only talks to storage through [`LifecycleStore`]. All
//! state transitions go through [`LifecycleStore::append_state`], a
//! compare-and-set on the machine's history length.

mod memory;

pub use memory::MemoryStore;

use chrono::{DateTime, Utc};
use lifecycle_model::{CleanupEntry, Machine, MachineKind, MachineState, MachineStateRecord};

/// Storage errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Backend unreachable or corrupted; not recoverable within a pass
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Compare-and-set lost against a concurrent writer
    #[error("{kind} '{id}' version conflict: expected {expected}, found {actual}")]
    VersionConflict {
        kind: MachineKind,
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("{kind} '{id}' already exists")]
    AlreadyExists { kind: MachineKind, id: String },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: MachineKind, id: String },
}

/// Durable store used by every lifecycle component.
///
/// Reads return snapshots; they may be stale relative to an in-flight write.
pub trait LifecycleStore: Send + Sync {
    // === Machines ===

    fn get(&self, kind: MachineKind, id: &str) -> Result<Option<Machine>, StoreError>;

    fn list(&self, kind: MachineKind) -> Result<Vec<Machine>, StoreError>;

    fn list_by_state(
        &self,
        kind: MachineKind,
        state: MachineState,
    ) -> Result<Vec<Machine>, StoreError> {
        Ok(self
            .list(kind)?
            .into_iter()
            .filter(|machine| machine.state() == state)
            .collect())
    }

    /// Insert a new machine; fails with `AlreadyExists` if the id is taken.
    fn insert(&self, machine: Machine) -> Result<(), StoreError>;

    /// Append `record` if the machine's version still equals
    /// `expected_version`. Returns the updated machine.
    fn append_state(
        &self,
        kind: MachineKind,
        id: &str,
        expected_version: u64,
        record: MachineStateRecord,
    ) -> Result<Machine, StoreError>;

    /// Record that a machine offered capacity. Does not change its version.
    fn touch(&self, kind: MachineKind, id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Remove a machine and its history. Returns whether it existed.
    fn delete(&self, kind: MachineKind, id: &str) -> Result<bool, StoreError>;

    /// Remove a machine only if its version still equals
    /// `expected_version`. Returns whether it existed; a changed machine is
    /// a `VersionConflict` and is left in place.
    fn delete_if_version(
        &self,
        kind: MachineKind,
        id: &str,
        expected_version: u64,
    ) -> Result<bool, StoreError>;

    // === Cleanup entries ===

    /// Insert or replace the entry keyed by (kind, machine id, task id).
    fn put_cleanup(&self, entry: CleanupEntry) -> Result<(), StoreError>;

    fn list_cleanups(&self, kind: MachineKind, id: &str) -> Result<Vec<CleanupEntry>, StoreError>;

    /// Entries for `task_id` across every machine.
    fn find_cleanups_for_task(&self, task_id: &str) -> Result<Vec<CleanupEntry>, StoreError>;

    fn delete_cleanup(&self, kind: MachineKind, id: &str, task_id: &str) -> Result<(), StoreError>;

    fn delete_cleanups_for(&self, kind: MachineKind, id: &str) -> Result<usize, StoreError>;

    // === Administrative frozen overrides ===

    fn set_frozen(&self, id: &str, frozen: bool) -> Result<(), StoreError>;

    fn is_frozen(&self, id: &str) -> Result<bool, StoreError>;

    fn frozen_ids(&self) -> Result<Vec<String>, StoreError>;
}
