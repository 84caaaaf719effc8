//! Read-only views over tasks owned by the scheduling subsystem

use serde::{Deserialize, Serialize};

/// What the lifecycle core needs to know about a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskView {
    pub task_id: String,
    pub host_id: String,
    pub domain_id: String,
    /// Not yet finished (pending, starting, or running)
    pub is_active: bool,
    /// Reported RUNNING by the executor
    #[serde(default)]
    pub is_running: bool,
}

impl TaskView {
    pub fn running(
        task_id: impl Into<String>,
        host_id: impl Into<String>,
        domain_id: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            host_id: host_id.into(),
            domain_id: domain_id.into(),
            is_active: true,
            is_running: true,
        }
    }

    pub fn in_scope(&self, scope: &TaskScope) -> bool {
        match scope {
            TaskScope::Host(id) => &self.host_id == id,
            TaskScope::Domain(id) => &self.domain_id == id,
        }
    }
}

/// Where to look for tasks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskScope {
    Host(String),
    Domain(String),
}
