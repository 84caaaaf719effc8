//! Runtime-adjustable settings shared by the periodic passes

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use super::effective::LifecycleConfig;

/// Periodic actions an administrator can switch off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Reconcile,
    StalenessSweep,
    StartupCheck,
}

/// Settings an administrator may change while the system runs.
#[derive(Debug)]
pub struct Tunables {
    dead_host_retention_hours: AtomicU64,
    disabled: RwLock<BTreeSet<LifecycleAction>>,
}

impl Tunables {
    pub fn new(retention_hours: u64) -> Self {
        Self {
            dead_host_retention_hours: AtomicU64::new(retention_hours),
            disabled: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn from_config(config: &LifecycleConfig) -> Self {
        let tunables = Self::new(config.dead_host_retention_hours);
        for action in &config.disabled_actions {
            tunables.disable(*action);
        }
        tunables
    }

    pub fn retention_hours(&self) -> u64 {
        self.dead_host_retention_hours.load(Ordering::SeqCst)
    }

    pub fn set_retention_hours(&self, hours: u64) {
        self.dead_host_retention_hours.store(hours, Ordering::SeqCst);
    }

    pub fn disable(&self, action: LifecycleAction) {
        if let Ok(mut disabled) = self.disabled.write() {
            disabled.insert(action);
        }
    }

    pub fn enable(&self, action: LifecycleAction) {
        if let Ok(mut disabled) = self.disabled.write() {
            disabled.remove(&action);
        }
    }

    pub fn is_disabled(&self, action: LifecycleAction) -> bool {
        self.disabled
            .read()
            .map(|disabled| disabled.contains(&action))
            .unwrap_or(false)
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self::from_config(&LifecycleConfig::default())
    }
}
