//! Wiring of the lifecycle core
//!
//! [`Lifecycle`] builds every component over one store and one task inventory
//! and exposes the operations the rest of the scheduler calls.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use lifecycle_model::{MachineKind, MachineState, StateChangeResult};

use crate::admin::AdminSurface;
use crate::config::{seconds_delta, LifecycleConfig, Tunables};
use crate::error::LifecycleError;
use crate::inventory::TaskInventory;
use crate::machine::{DomainLifecycleManager, HostLifecycleManager, StartupCheckReport};
use crate::offers::{Offer, OfferIntake, OfferOutcome};
use crate::placement::PlacementGuard;
use crate::reconcile::{DecommissionReconciler, ReconcileReport};
use crate::store::LifecycleStore;
use crate::sweep::{StalenessSweeper, SweepReport};

pub struct Lifecycle {
    store: Arc<dyn LifecycleStore>,
    tunables: Arc<Tunables>,
    hosts: Arc<HostLifecycleManager>,
    domains: Arc<DomainLifecycleManager>,
    guard: Arc<PlacementGuard>,
    offers: OfferIntake,
    reconciler: DecommissionReconciler,
    sweeper: StalenessSweeper,
    admin: AdminSurface,
}

impl Lifecycle {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        inventory: Arc<dyn TaskInventory>,
        config: &LifecycleConfig,
    ) -> Self {
        Self::started_at(store, inventory, config, Utc::now())
    }

    /// Like [`Lifecycle::new`], with an explicit process start time for the
    /// startup staleness check.
    pub fn started_at(
        store: Arc<dyn LifecycleStore>,
        inventory: Arc<dyn TaskInventory>,
        config: &LifecycleConfig,
        started_at: DateTime<Utc>,
    ) -> Self {
        let tunables = Arc::new(Tunables::from_config(config));
        let domains = Arc::new(DomainLifecycleManager::new(
            store.clone(),
            config.create_on_activate,
        ));
        let hosts = Arc::new(
            HostLifecycleManager::new(store.clone(), tunables.clone(), config, started_at)
                .with_hook(domains.clone()),
        );
        let guard = Arc::new(PlacementGuard::new(store.clone(), config.placement.clone()));

        Self {
            offers: OfferIntake::new(hosts.clone(), guard.clone()),
            reconciler: DecommissionReconciler::new(
                store.clone(),
                hosts.clone(),
                domains.clone(),
                guard.clone(),
                inventory,
                tunables.clone(),
            )
            .with_kill_retry(seconds_delta(config.kill_retry_seconds).unwrap_or(TimeDelta::MAX)),
            sweeper: StalenessSweeper::new(hosts.clone(), domains.clone(), tunables.clone()),
            admin: AdminSurface::new(
                store.clone(),
                hosts.clone(),
                domains.clone(),
                tunables.clone(),
            ),
            store,
            tunables,
            hosts,
            domains,
            guard,
        }
    }

    pub fn store(&self) -> &Arc<dyn LifecycleStore> {
        &self.store
    }

    pub fn tunables(&self) -> &Arc<Tunables> {
        &self.tunables
    }

    pub fn hosts(&self) -> &HostLifecycleManager {
        &self.hosts
    }

    pub fn domains(&self) -> &DomainLifecycleManager {
        &self.domains
    }

    pub fn guard(&self) -> &PlacementGuard {
        &self.guard
    }

    pub fn admin(&self) -> &AdminSurface {
        &self.admin
    }

    /// Engine-level state change for a host or domain.
    pub fn change_state(
        &self,
        kind: MachineKind,
        id: &str,
        target: MachineState,
        message: Option<String>,
        user: Option<String>,
    ) -> Result<StateChangeResult, LifecycleError> {
        match kind {
            MachineKind::Host => self.hosts.change_state(id, target, message, user),
            MachineKind::Domain => self.domains.change_state(id, target, message, user),
        }
    }

    pub fn can_place_on(&self, host_id: &str) -> bool {
        self.guard.can_place_on(host_id)
    }

    pub fn process_offers(&self, offers: Vec<Offer>) -> Result<OfferOutcome, LifecycleError> {
        self.offers.process_offers(offers)
    }

    pub fn host_lost(&self, host_id: &str) -> Result<StateChangeResult, LifecycleError> {
        self.hosts.host_lost(host_id)
    }

    pub fn check_missing_on_startup(
        &self,
        now: DateTime<Utc>,
    ) -> Result<StartupCheckReport, LifecycleError> {
        self.hosts.check_missing_on_startup(now)
    }

    pub fn run_reconciliation_pass(&self) -> Result<ReconcileReport, LifecycleError> {
        self.reconciler.run_pass()
    }

    pub fn run_staleness_sweep(&self) -> Result<SweepReport, LifecycleError> {
        self.sweeper.run_sweep()
    }

    pub fn run_staleness_sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, LifecycleError> {
        self.sweeper.run_sweep_at(now)
    }
}
