//! Dead machine retention
//!
//! Machines that have been DEAD for longer than the retention window are
//! deleted outright, history included. A host that comes back afterwards is
//! registered as new.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use lifecycle_model::{MachineKind, MachineState};
use serde::Serialize;
use tracing::{info, info_span, warn};
use ulid::Ulid;

use crate::config::{hours_delta, LifecycleAction, Tunables};
use crate::error::LifecycleError;
use crate::machine::{DomainLifecycleManager, HostLifecycleManager, MachineStateMachine};
use crate::reconcile::MachineRef;

/// Result of one sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub pass_id: String,
    pub skipped: bool,
    /// DEAD machines looked at
    pub scanned: usize,
    pub purged: Vec<MachineRef>,
}

pub struct StalenessSweeper {
    hosts: Arc<HostLifecycleManager>,
    domains: Arc<DomainLifecycleManager>,
    tunables: Arc<Tunables>,
}

impl StalenessSweeper {
    pub fn new(
        hosts: Arc<HostLifecycleManager>,
        domains: Arc<DomainLifecycleManager>,
        tunables: Arc<Tunables>,
    ) -> Self {
        Self {
            hosts,
            domains,
            tunables,
        }
    }

    pub fn run_sweep(&self) -> Result<SweepReport, LifecycleError> {
        self.run_sweep_at(Utc::now())
    }

    /// Sweep as of `now`. A retention of 0 hours, or one longer than the
    /// clock can represent, disables the sweep.
    pub fn run_sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, LifecycleError> {
        let pass_id = Ulid::new().to_string();
        let span = info_span!("staleness_sweep", pass_id = %pass_id);
        let _entered = span.enter();

        let mut report = SweepReport {
            pass_id,
            ..Default::default()
        };

        if self.tunables.is_disabled(LifecycleAction::StalenessSweep) {
            warn!("staleness sweep is currently disabled");
            report.skipped = true;
            return Ok(report);
        }

        let retention_hours = self.tunables.retention_hours();
        if retention_hours == 0 {
            report.skipped = true;
            return Ok(report);
        }
        let Some(retention) = hours_delta(retention_hours) else {
            warn!(retention_hours, "retention too long to represent; nothing purged");
            report.skipped = true;
            return Ok(report);
        };

        for machines in [self.hosts.machines(), self.domains.machines()] {
            self.sweep_kind(machines, now, retention, &mut report)?;
        }

        info!(
            scanned = report.scanned,
            purged = report.purged.len(),
            retention_hours,
            "staleness sweep complete"
        );
        Ok(report)
    }

    fn sweep_kind(
        &self,
        machines: &MachineStateMachine,
        now: DateTime<Utc>,
        retention: TimeDelta,
        report: &mut SweepReport,
    ) -> Result<(), LifecycleError> {
        for machine in machines.get_objects_filtered(MachineState::Dead)? {
            report.scanned += 1;
            let dead_for = now - machine.current_state().timestamp;
            if dead_for <= retention {
                continue;
            }

            // Skipped if another writer revived it since the listing
            if machines.delete_object_if_version(&machine.id, machine.version())? {
                info!(
                    kind = %machines.kind(),
                    machine = %machine.id,
                    dead_hours = dead_for.num_hours(),
                    "purged dead machine"
                );
                report.purged.push(MachineRef {
                    kind: machines.kind(),
                    id: machine.id,
                });
            }
        }
        Ok(())
    }
}
