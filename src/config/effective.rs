//! Effective configuration with provenance

use std::fs;
use std::path::Path;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;
use super::tunables::LifecycleAction;
use crate::placement::PlacementPolicy;

/// Origin of a configuration layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    File,
    Cli,
}

/// A contributing config layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 of the raw file bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Typed lifecycle configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LifecycleConfig {
    pub dead_host_retention_hours: u64,
    pub startup_grace_seconds: u64,
    pub missing_on_startup_dead_seconds: u64,
    pub kill_retry_seconds: u64,
    pub create_on_activate: bool,
    #[serde(default)]
    pub disabled_actions: Vec<LifecycleAction>,
    #[serde(default)]
    pub placement: PlacementPolicy,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        let defaults = BuiltinDefaults::default();
        Self {
            dead_host_retention_hours: defaults.dead_host_retention_hours,
            startup_grace_seconds: defaults.startup_grace_seconds,
            missing_on_startup_dead_seconds: defaults.missing_on_startup_dead_seconds,
            kill_retry_seconds: defaults.kill_retry_seconds,
            create_on_activate: defaults.create_on_activate,
            placement: PlacementPolicy {
                allow_on_decommissioning: defaults.allow_placement_on_decommissioning,
            },
            disabled_actions: Vec::new(),
        }
    }
}

impl LifecycleConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.startup_grace_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "startup_grace_seconds".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        for (field, value) in [
            ("startup_grace_seconds", self.startup_grace_seconds),
            ("missing_on_startup_dead_seconds", self.missing_on_startup_dead_seconds),
            ("kill_retry_seconds", self.kill_retry_seconds),
        ] {
            if seconds_delta(value).is_none() {
                return Err(ConfigError::Invalid {
                    field: field.to_string(),
                    reason: format!("must be at most {} seconds", MAX_SECONDS),
                });
            }
        }

        if hours_delta(self.dead_host_retention_hours).is_none() {
            return Err(ConfigError::Invalid {
                field: "dead_host_retention_hours".to_string(),
                reason: format!("must be at most {} hours", MAX_SECONDS / 3600),
            });
        }

        if self.missing_on_startup_dead_seconds < self.startup_grace_seconds {
            return Err(ConfigError::Invalid {
                field: "missing_on_startup_dead_seconds".to_string(),
                reason: format!(
                    "must be at least startup_grace_seconds ({})",
                    self.startup_grace_seconds
                ),
            });
        }

        Ok(())
    }
}

/// Longest duration the clock arithmetic can represent.
const MAX_SECONDS: u64 = i64::MAX as u64 / 1000;

/// `seconds` as a clock duration; `None` when out of range.
pub fn seconds_delta(seconds: u64) -> Option<TimeDelta> {
    i64::try_from(seconds).ok().and_then(TimeDelta::try_seconds)
}

/// `hours` as a clock duration; `None` when out of range.
pub fn hours_delta(hours: u64) -> Option<TimeDelta> {
    i64::try_from(hours).ok().and_then(TimeDelta::try_hours)
}

/// Merged configuration plus where it came from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub created_at: DateTime<Utc>,
    pub config: LifecycleConfig,
    /// Contributing layers in precedence order
    pub sources: Vec<ConfigSource>,
}

impl EffectiveConfig {
    /// Build from built-in defaults, an optional TOML file and optional
    /// overrides.
    pub fn build(file: Option<&Path>, overrides: Option<Value>) -> Result<Self, ConfigError> {
        let mut layers = vec![BuiltinDefaults::default().to_value()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        if let Some(path) = file {
            let (value, digest) = Self::load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::File,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let merged = merge_layers(layers);
        let config: LifecycleConfig = serde_json::from_value(merged)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;

        Ok(Self {
            created_at: Utc::now(),
            config,
            sources,
        })
    }

    /// Read a TOML file, returning it as JSON plus the digest of its bytes
    fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
        let bytes = fs::read(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = hex::encode(hasher.finalize());

        let contents = String::from_utf8(bytes)
            .map_err(|e| ConfigError::Parse(format!("Invalid UTF-8: {}", e)))?;
        let table: toml::Value = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(format!("TOML parse error: {}", e)))?;
        let value = serde_json::to_value(table)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok((value, digest))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },
}
