//! Machine Lifecycle Model
//!
//! Shared data types for hosts and their failure domains: lifecycle states,
//! the legal transition table, append-only state history, task views and
//! outstanding cleanup work.

pub mod cleanup;
pub mod record;
pub mod result;
pub mod state;
pub mod task;

pub use cleanup::{CleanupEntry, CleanupReason};
pub use record::{Machine, MachineKind, MachineStateRecord};
pub use result::StateChangeResult;
pub use state::MachineState;
pub use task::{TaskScope, TaskView};
