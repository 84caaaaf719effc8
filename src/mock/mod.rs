//! In-process task inventory for tests
//!
//! Models the scheduling subsystem closely enough to drive decommissions
//! end to end: tasks on hosts, replacement requests that start out pending,
//! kill requests, and per-operation failure injection.

mod failure;
mod inventory;

pub use failure::{FailureConfig, FailureInjector, InventoryOp};
pub use inventory::MockTaskInventory;
