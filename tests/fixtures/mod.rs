//! Shared fixtures for lifecycle integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use machine_lifecycle::mock::MockTaskInventory;
use machine_lifecycle::offers::Offer;
use machine_lifecycle::{
    Lifecycle, LifecycleConfig, LifecycleStore, MachineKind, MachineState, MemoryStore,
};

/// Route lifecycle logs to the test harness. Set RUST_LOG to see them.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A lifecycle core over an in-memory store and a mock scheduler.
pub struct Cluster {
    pub lifecycle: Lifecycle,
    pub store: MemoryStore,
    pub inventory: MockTaskInventory,
}

impl Cluster {
    pub fn new() -> Self {
        Self::with_config(LifecycleConfig::default())
    }

    pub fn with_config(config: LifecycleConfig) -> Self {
        Self::started_at(config, Utc::now())
    }

    pub fn started_at(config: LifecycleConfig, started_at: DateTime<Utc>) -> Self {
        init_tracing();
        let store = MemoryStore::new();
        let inventory = MockTaskInventory::new();
        let lifecycle = Lifecycle::started_at(
            Arc::new(store.clone()),
            Arc::new(inventory.clone()),
            &config,
            started_at,
        );
        Self {
            lifecycle,
            store,
            inventory,
        }
    }

    /// Deliver one offer from `host` in `domain`.
    pub fn offer(&self, host: &str, domain: &str) {
        self.lifecycle
            .process_offers(vec![offer(host, domain)])
            .expect("offer processing failed");
    }

    pub fn host_state(&self, id: &str) -> MachineState {
        self.state(MachineKind::Host, id)
    }

    pub fn domain_state(&self, id: &str) -> MachineState {
        self.state(MachineKind::Domain, id)
    }

    pub fn state(&self, kind: MachineKind, id: &str) -> MachineState {
        self.store
            .get(kind, id)
            .expect("store read failed")
            .unwrap_or_else(|| panic!("{} {} missing", kind, id))
            .state()
    }

    pub fn user(&self, kind: MachineKind, id: &str) -> Option<String> {
        self.store
            .get(kind, id)
            .expect("store read failed")
            .and_then(|machine| machine.current_state().user.clone())
    }

    pub fn count(&self, kind: MachineKind, state: MachineState) -> usize {
        self.store
            .list_by_state(kind, state)
            .expect("store read failed")
            .len()
    }

    /// Start the pending replacement for `task` on `host`.
    pub fn start_replacement(&self, task: &str, host: &str, domain: &str) -> String {
        let replacement = self
            .inventory
            .replacement_for(task)
            .unwrap_or_else(|| panic!("no replacement requested for {}", task));
        self.inventory.start(&replacement, host, domain);
        replacement
    }

    pub fn reconcile(&self) -> machine_lifecycle::ReconcileReport {
        self.lifecycle
            .run_reconciliation_pass()
            .expect("reconciliation pass failed")
    }
}

pub fn offer(host: &str, domain: &str) -> Offer {
    Offer {
        offer_id: format!("offer-{}", ulid::Ulid::new()),
        host_id: host.to_string(),
        host_address: format!("{}.cluster.local", host),
        domain_id: domain.to_string(),
        resources: BTreeMap::from([("cpus".to_string(), 1.0), ("mem".to_string(), 129.0)]),
    }
}

pub fn user(name: &str) -> Option<String> {
    Some(name.to_string())
}
