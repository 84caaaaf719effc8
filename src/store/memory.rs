//! In-memory store.
//!
//! Thread-safe, cheap to clone (clones share state). Used by tests and the
//! CLI; a durable backend implements the same trait.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use lifecycle_model::{CleanupEntry, Machine, MachineKind, MachineStateRecord};

use super::{LifecycleStore, StoreError};

type MachineKey = (MachineKind, String);
type CleanupKey = (MachineKind, String, String);

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    machines: BTreeMap<MachineKey, Machine>,
    cleanups: BTreeMap<CleanupKey, CleanupEntry>,
    frozen: BTreeSet<String>,
    /// Failure injection: every call fails with `Unavailable`.
    unavailable: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backend going away (or coming back).
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut inner) = self.inner.write() {
            inner.unavailable = unavailable;
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>, StoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
        if inner.unavailable {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        Ok(inner)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>, StoreError> {
        let inner = self
            .inner
            .write()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
        if inner.unavailable {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        Ok(inner)
    }
}

impl LifecycleStore for MemoryStore {
    fn get(&self, kind: MachineKind, id: &str) -> Result<Option<Machine>, StoreError> {
        let inner = self.read()?;
        Ok(inner.machines.get(&(kind, id.to_string())).cloned())
    }

    fn list(&self, kind: MachineKind) -> Result<Vec<Machine>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .machines
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, machine)| machine.clone())
            .collect())
    }

    fn insert(&self, machine: Machine) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        let key = (machine.kind, machine.id.clone());
        if inner.machines.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: machine.kind,
                id: machine.id,
            });
        }
        inner.machines.insert(key, machine);
        Ok(())
    }

    fn append_state(
        &self,
        kind: MachineKind,
        id: &str,
        expected_version: u64,
        record: MachineStateRecord,
    ) -> Result<Machine, StoreError> {
        let mut inner = self.write()?;
        let machine = inner
            .machines
            .get_mut(&(kind, id.to_string()))
            .ok_or_else(|| StoreError::NotFound {
                kind,
                id: id.to_string(),
            })?;

        if machine.version() != expected_version {
            return Err(StoreError::VersionConflict {
                kind,
                id: id.to_string(),
                expected: expected_version,
                actual: machine.version(),
            });
        }

        *machine = machine.changed(record);
        Ok(machine.clone())
    }

    fn touch(&self, kind: MachineKind, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        match inner.machines.get_mut(&(kind, id.to_string())) {
            Some(machine) => {
                machine.last_seen_at = Some(at);
                Ok(())
            }
            None => Err(StoreError::NotFound {
                kind,
                id: id.to_string(),
            }),
        }
    }

    fn delete(&self, kind: MachineKind, id: &str) -> Result<bool, StoreError> {
        let mut inner = self.write()?;
        Ok(inner.machines.remove(&(kind, id.to_string())).is_some())
    }

    fn delete_if_version(
        &self,
        kind: MachineKind,
        id: &str,
        expected_version: u64,
    ) -> Result<bool, StoreError> {
        let mut inner = self.write()?;
        let key = (kind, id.to_string());
        let Some(machine) = inner.machines.get(&key) else {
            return Ok(false);
        };
        if machine.version() != expected_version {
            return Err(StoreError::VersionConflict {
                kind,
                id: id.to_string(),
                expected: expected_version,
                actual: machine.version(),
            });
        }
        inner.machines.remove(&key);
        Ok(true)
    }

    fn put_cleanup(&self, entry: CleanupEntry) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        let key = (
            entry.machine_kind,
            entry.machine_id.clone(),
            entry.task_id.clone(),
        );
        inner.cleanups.insert(key, entry);
        Ok(())
    }

    fn list_cleanups(&self, kind: MachineKind, id: &str) -> Result<Vec<CleanupEntry>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .cleanups
            .values()
            .filter(|entry| entry.machine_kind == kind && entry.machine_id == id)
            .cloned()
            .collect())
    }

    fn find_cleanups_for_task(&self, task_id: &str) -> Result<Vec<CleanupEntry>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .cleanups
            .values()
            .filter(|entry| entry.task_id == task_id)
            .cloned()
            .collect())
    }

    fn delete_cleanup(&self, kind: MachineKind, id: &str, task_id: &str) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        inner
            .cleanups
            .remove(&(kind, id.to_string(), task_id.to_string()));
        Ok(())
    }

    fn delete_cleanups_for(&self, kind: MachineKind, id: &str) -> Result<usize, StoreError> {
        let mut inner = self.write()?;
        let before = inner.cleanups.len();
        inner
            .cleanups
            .retain(|(k, machine_id, _), _| !(*k == kind && machine_id == id));
        Ok(before - inner.cleanups.len())
    }

    fn set_frozen(&self, id: &str, frozen: bool) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        if frozen {
            inner.frozen.insert(id.to_string());
        } else {
            inner.frozen.remove(id);
        }
        Ok(())
    }

    fn is_frozen(&self, id: &str) -> Result<bool, StoreError> {
        let inner = self.read()?;
        Ok(inner.frozen.contains(id))
    }

    fn frozen_ids(&self) -> Result<Vec<String>, StoreError> {
        let inner = self.read()?;
        Ok(inner.frozen.iter().cloned().collect())
    }
}
