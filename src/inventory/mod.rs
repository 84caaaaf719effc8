//! Task inventory collaborator
//!
//! The scheduling subsystem owns tasks. The lifecycle core only lists what is
//! active where, asks for replacements, and asks for kills. Implementations
//! must make `kill` idempotent: the reconciler may repeat it after a crash.

use lifecycle_model::{TaskScope, TaskView};

/// Errors reported by the task collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Task service unavailable: {0}")]
    Unavailable(String),

    #[error("Task service rejected the request: {0}")]
    Rejected(String),

    #[error("Unknown task: {0}")]
    UnknownTask(String),
}

/// Task inventory and execution calls consumed by the lifecycle core.
pub trait TaskInventory: Send + Sync {
    /// Tasks currently active on a host, or on any host of a domain.
    fn list_active_tasks(&self, scope: &TaskScope) -> Result<Vec<TaskView>, CollaboratorError>;

    /// Current view of one task; `None` once the scheduler forgot it.
    fn get_task(&self, task_id: &str) -> Result<Option<TaskView>, CollaboratorError>;

    /// Ask the scheduler to start a replacement elsewhere. Returns the new
    /// task's id. Placement of the replacement is the scheduler's business.
    fn request_replacement(&self, task: &TaskView) -> Result<String, CollaboratorError>;

    fn kill(&self, task_id: &str) -> Result<(), CollaboratorError>;
}
