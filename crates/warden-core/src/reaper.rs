//! Expiration reaper
//!
//! Batch job over expired managed VMs, invoked on an external schedule.
//! Reclaims each through the same delete primitive as interactive deletes,
//! so both paths agree on what deletion means.

use std::sync::Arc;
use tracing::{info, warn};
use warden_api::ReapSummary;
use warden_store::{AuditEvent, AuditEventType, VmStore};

use crate::{LifecycleResult, Orchestrator};

/// Scans the record store for expired managed VMs and reclaims them.
pub struct Reaper {
    store: Arc<dyn VmStore>,
    orchestrator: Arc<Orchestrator>,
}

impl Reaper {
    pub fn new(store: Arc<dyn VmStore>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            store,
            orchestrator,
        }
    }

    /// One reap pass. Per-item failures are logged and counted, never
    /// aborting the batch: one stuck VM must not block the rest, and its
    /// row survives for the next run.
    pub async fn run_once(&self) -> LifecycleResult<ReapSummary> {
        let now = warden_util::now();
        let expired = self.store.expired_managed_vms(now)?;

        let mut summary = ReapSummary {
            attempted: expired.len(),
            ..Default::default()
        };

        info!(expired = expired.len(), "Reap run starting");

        for vm in &expired {
            match self.orchestrator.delete_record(vm, "expired").await {
                Ok(()) => {
                    summary.succeeded += 1;
                    info!(
                        remote_vmid = %vm.remote_vmid,
                        user_id = %vm.user_id,
                        "Expired VM reclaimed"
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(
                        remote_vmid = %vm.remote_vmid,
                        user_id = %vm.user_id,
                        error = %e,
                        "Failed to reclaim expired VM"
                    );
                }
            }
        }

        if let Err(e) = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::ReapCompleted { summary }))
        {
            warn!(error = %e, "Failed to append reap audit event");
        }

        info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Reap run complete"
        );

        Ok(summary)
    }
}
