//! Lifecycle configuration
//!
//! Three layers, later layers win:
//! 1. Built-in defaults
//! 2. Config file (TOML)
//! 3. CLI / programmatic overrides (JSON)
//!
//! Retention and disabled actions can also be changed at runtime through
//! [`Tunables`].

mod defaults;
mod effective;
mod merge;
mod tunables;

pub use defaults::BuiltinDefaults;
pub use effective::{
    hours_delta, seconds_delta, ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig,
    LifecycleConfig,
};
pub use merge::{deep_merge, merge_layers};
pub use tunables::{LifecycleAction, Tunables};
