//! Failure injection for the mock inventory

use std::collections::HashMap;

use crate::inventory::CollaboratorError;

/// Inventory calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InventoryOp {
    ListActiveTasks,
    GetTask,
    RequestReplacement,
    Kill,
}

/// Failure configuration for an operation
#[derive(Debug, Clone)]
pub struct FailureConfig {
    pub error: CollaboratorError,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl FailureConfig {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            error: CollaboratorError::Unavailable(message.into()),
            fail_count: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            error: CollaboratorError::Rejected(message.into()),
            fail_count: None,
        }
    }

    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }
}

#[derive(Debug, Default)]
pub struct FailureInjector {
    configs: HashMap<InventoryOp, FailureConfig>,
    call_counts: HashMap<InventoryOp, u32>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&mut self, op: InventoryOp, config: FailureConfig) {
        self.configs.insert(op, config);
        self.call_counts.insert(op, 0);
    }

    pub fn clear(&mut self) {
        self.configs.clear();
        self.call_counts.clear();
    }

    pub fn clear_op(&mut self, op: InventoryOp) {
        self.configs.remove(&op);
        self.call_counts.remove(&op);
    }

    /// The error to return for this call of `op`, if any.
    pub fn check(&mut self, op: InventoryOp) -> Option<CollaboratorError> {
        let config = self.configs.get(&op)?;
        let count = self.call_counts.entry(op).or_insert(0);
        *count += 1;

        if let Some(fail_limit) = config.fail_count {
            if *count > fail_limit {
                return None;
            }
        }
        Some(config.error.clone())
    }
}
