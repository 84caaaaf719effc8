//! Machine lifecycle core
//!
//! Tracks compute hosts and their failure domains as they join, freeze,
//! decommission and die, and keeps that lifecycle in step with task
//! placement and eviction so no host leaves service while work on it still
//! needs to move.

pub mod admin;
pub mod config;
pub mod error;
pub mod inventory;
mod lifecycle;
pub mod machine;
pub mod mock;
pub mod offers;
pub mod placement;
pub mod reconcile;
pub mod store;
pub mod sweep;

pub use config::{EffectiveConfig, LifecycleConfig};
pub use error::LifecycleError;
pub use lifecycle::Lifecycle;
pub use lifecycle_model::{
    CleanupEntry, CleanupReason, Machine, MachineKind, MachineState, MachineStateRecord,
    StateChangeResult, TaskScope, TaskView,
};
pub use machine::MachineStateMachine;
pub use placement::{PlacementGuard, PlacementPolicy};
pub use reconcile::{DecommissionReconciler, ReconcileReport};
pub use store::{LifecycleStore, MemoryStore};
pub use sweep::{StalenessSweeper, SweepReport};
