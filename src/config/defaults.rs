//! Built-in defaults (layer 1)

use serde::{Deserialize, Serialize};

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Dead hosts are purged after this many hours (default: 168 = 7 days)
    pub dead_host_retention_hours: u64,

    /// Hosts unseen this long after startup become MISSING_ON_STARTUP (default: 300)
    pub startup_grace_seconds: u64,

    /// MISSING_ON_STARTUP hosts unseen this long after startup become DEAD (default: 3600)
    pub missing_on_startup_dead_seconds: u64,

    /// A kill still unanswered after this long is sent again (default: 600)
    pub kill_retry_seconds: u64,

    /// changeState(unknown id, ACTIVE) registers the machine (default: true)
    pub create_on_activate: bool,

    /// New placements onto decommissioning hosts (default: false)
    pub allow_placement_on_decommissioning: bool,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            dead_host_retention_hours: 168,
            startup_grace_seconds: 300,
            missing_on_startup_dead_seconds: 3600,
            kill_retry_seconds: 600,
            create_on_activate: true,
            allow_placement_on_decommissioning: false,
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "dead_host_retention_hours": self.dead_host_retention_hours,
            "startup_grace_seconds": self.startup_grace_seconds,
            "missing_on_startup_dead_seconds": self.missing_on_startup_dead_seconds,
            "kill_retry_seconds": self.kill_retry_seconds,
            "create_on_activate": self.create_on_activate,
            "placement": {
                "allow_on_decommissioning": self.allow_placement_on_decommissioning
            },
            "disabled_actions": []
        })
    }
}
