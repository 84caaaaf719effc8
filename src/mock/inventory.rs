//! Mock task inventory

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use lifecycle_model::{TaskScope, TaskView};

use super::failure::{FailureConfig, FailureInjector, InventoryOp};
use crate::inventory::{CollaboratorError, TaskInventory};

#[derive(Debug, Default)]
struct MockTasks {
    tasks: BTreeMap<String, TaskView>,
    /// original task id -> replacement task id
    replacements: BTreeMap<String, String>,
    kill_requests: Vec<String>,
    finish_on_kill: bool,
}

/// Shared, cloneable task inventory.
///
/// Kills are only recorded by default; call [`MockTaskInventory::finish`] to
/// report the task gone, or enable [`MockTaskInventory::finish_on_kill`].
#[derive(Debug, Clone, Default)]
pub struct MockTaskInventory {
    state: Arc<Mutex<MockTasks>>,
    failures: Arc<Mutex<FailureInjector>>,
}

impl MockTaskInventory {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, MockTasks> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self, op: InventoryOp) -> Result<(), CollaboratorError> {
        let mut failures = self
            .failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match failures.check(op) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub fn add_task(&self, task: TaskView) {
        self.tasks().tasks.insert(task.task_id.clone(), task);
    }

    pub fn add_running(&self, task_id: &str, host_id: &str, domain_id: &str) {
        self.add_task(TaskView::running(task_id, host_id, domain_id));
    }

    /// Place a (replacement) task on a host and report it RUNNING.
    pub fn start(&self, task_id: &str, host_id: &str, domain_id: &str) {
        self.add_running(task_id, host_id, domain_id);
    }

    /// Report a task finished.
    pub fn finish(&self, task_id: &str) {
        if let Some(task) = self.tasks().tasks.get_mut(task_id) {
            task.is_active = false;
            task.is_running = false;
        }
    }

    /// Forget a task entirely.
    pub fn remove(&self, task_id: &str) {
        self.tasks().tasks.remove(task_id);
    }

    /// Make `kill` finish the task immediately.
    pub fn finish_on_kill(&self, enabled: bool) {
        self.tasks().finish_on_kill = enabled;
    }

    pub fn task(&self, task_id: &str) -> Option<TaskView> {
        self.tasks().tasks.get(task_id).cloned()
    }

    pub fn kill_requests(&self) -> Vec<String> {
        self.tasks().kill_requests.clone()
    }

    /// The most recent replacement requested for `task_id`.
    pub fn replacement_for(&self, task_id: &str) -> Option<String> {
        self.tasks().replacements.get(task_id).cloned()
    }

    pub fn replacement_count(&self) -> usize {
        self.tasks().replacements.len()
    }

    pub fn inject_failure(&self, op: InventoryOp, config: FailureConfig) {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .inject(op, config);
    }

    pub fn clear_failures(&self) {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl TaskInventory for MockTaskInventory {
    fn list_active_tasks(&self, scope: &TaskScope) -> Result<Vec<TaskView>, CollaboratorError> {
        self.check(InventoryOp::ListActiveTasks)?;
        Ok(self
            .tasks()
            .tasks
            .values()
            .filter(|task| task.is_active && task.in_scope(scope))
            .cloned()
            .collect())
    }

    fn get_task(&self, task_id: &str) -> Result<Option<TaskView>, CollaboratorError> {
        self.check(InventoryOp::GetTask)?;
        Ok(self.task(task_id))
    }

    fn request_replacement(&self, task: &TaskView) -> Result<String, CollaboratorError> {
        self.check(InventoryOp::RequestReplacement)?;
        let replacement_id = format!("{}-r-{}", task.task_id, uuid::Uuid::new_v4().simple());

        let mut tasks = self.tasks();
        tasks.tasks.insert(
            replacement_id.clone(),
            TaskView {
                task_id: replacement_id.clone(),
                host_id: String::new(),
                domain_id: String::new(),
                is_active: true,
                is_running: false,
            },
        );
        tasks
            .replacements
            .insert(task.task_id.clone(), replacement_id.clone());
        Ok(replacement_id)
    }

    fn kill(&self, task_id: &str) -> Result<(), CollaboratorError> {
        self.check(InventoryOp::Kill)?;
        let mut tasks = self.tasks();
        if !tasks.tasks.contains_key(task_id) {
            return Err(CollaboratorError::UnknownTask(task_id.to_string()));
        }
        tasks.kill_requests.push(task_id.to_string());
        if tasks.finish_on_kill {
            if let Some(task) = tasks.tasks.get_mut(task_id) {
                task.is_active = false;
                task.is_running = false;
            }
        }
        Ok(())
    }
}
