//! Outstanding cleanup work attached to a machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::MachineKind;

/// Why the cleanup exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CleanupReason {
    Decommissioning,
    Freeze,
    ScaleDown,
}

/// One task that must be moved off a machine before its lifecycle
/// transition can complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupEntry {
    pub machine_kind: MachineKind,
    pub machine_id: String,
    pub task_id: String,
    pub reason: CleanupReason,
    pub created_at: DateTime<Utc>,

    /// Replacement requested from the scheduler, once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement_task_id: Option<String>,

    /// When the kill for `task_id` was issued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_requested_at: Option<DateTime<Utc>>,
}

impl CleanupEntry {
    pub fn new(
        machine_kind: MachineKind,
        machine_id: impl Into<String>,
        task_id: impl Into<String>,
        reason: CleanupReason,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            machine_kind,
            machine_id: machine_id.into(),
            task_id: task_id.into(),
            reason,
            created_at,
            replacement_task_id: None,
            kill_requested_at: None,
        }
    }
}
