//! The VM lifecycle state machine
//!
//! States: `creating → running ⇄ stopped`, with `error` reachable from any
//! state on an unrecoverable remote failure, and removal (not a state) from
//! any state via delete. All operations run on the caller's task; the only
//! long wait (the clone poll) is async and cancellable.

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use warden_api::{ConsoleAccess, FleetVmView, PowerAction, VmSnapshot, VmStatus};
use warden_config::LifecycleSettings;
use warden_hypervisor::{Hypervisor, HypervisorError, TaskWaiter};
use warden_store::{
    AuditEvent, AuditEventType, GlobalConfig, NewVm, StoreError, VmRecord, VmStore,
};
use warden_util::{ChallengeId, UserId, VmId};

use crate::{LifecycleError, LifecycleResult, TtlCache};

/// Fixed key for the single global fleet view
const FLEET_CACHE_KEY: &str = "fleet-view";

/// The lifecycle orchestrator.
///
/// Owns no VM state of its own: the record store is the source of truth
/// locally, the cluster remotely, and every operation reconciles between
/// them.
pub struct Orchestrator {
    hypervisor: Arc<dyn Hypervisor>,
    store: Arc<dyn VmStore>,
    waiter: TaskWaiter,
    stop_settle: Duration,
    fleet_cache: TtlCache<Vec<FleetVmView>>,
}

impl Orchestrator {
    pub fn new(
        hypervisor: Arc<dyn Hypervisor>,
        store: Arc<dyn VmStore>,
        settings: &LifecycleSettings,
    ) -> Self {
        Self {
            hypervisor,
            store,
            waiter: TaskWaiter::new(settings.task_poll_interval, settings.task_timeout),
            stop_settle: settings.stop_settle,
            fleet_cache: TtlCache::new(settings.fleet_cache_ttl),
        }
    }

    /// Provision a VM for `user_id`: allocate identity, clone the template,
    /// wait for the clone, persist, boot.
    ///
    /// Nothing is persisted unless the clone completes; a failed or timed-out
    /// clone surfaces as its own error kind. A `start` failure after the row
    /// exists leaves it in `creating`, visible to its owner and the fleet
    /// view and reclaimable through the ordinary delete path.
    pub async fn create(&self, user_id: UserId) -> LifecycleResult<VmSnapshot> {
        let config = self
            .store
            .global_config()?
            .ok_or(LifecycleError::NotConfigured)?;

        if let Some(existing) = self.store.vm_for_user(user_id)? {
            return Err(LifecycleError::AlreadyExists(Box::new(
                existing.snapshot(warden_util::now()),
            )));
        }

        let remote_vmid = self.hypervisor.next_vmid().await?;
        let name = format!("warden-u{user_id}");
        let description = format!("vmwarden VM for user {user_id}");

        let task = self
            .hypervisor
            .clone_template(config.template_id, remote_vmid, &name, &description)
            .await?;

        info!(
            user_id = %user_id,
            template_id = %config.template_id,
            remote_vmid = %remote_vmid,
            task = %task,
            "Clone started"
        );

        self.waiter.wait(self.hypervisor.as_ref(), &task).await?;

        let now = warden_util::now();
        let new_vm = NewVm {
            user_id,
            remote_vmid,
            name,
            status: VmStatus::Creating,
            expires_at: now + ChronoDuration::hours(i64::from(config.max_duration_hours)),
            managed: true,
        };

        let record = match self.store.insert_vm(&new_vm) {
            Ok(record) => record,
            Err(StoreError::Conflict(_)) => {
                // A concurrent create won the race; the constraint, not the
                // earlier read, is the arbiter. The clone made moments ago
                // has no row referencing it, so reclaim it best-effort.
                if let Err(e) = self.hypervisor.delete(remote_vmid).await {
                    warn!(
                        remote_vmid = %remote_vmid,
                        error = %e,
                        "Failed to remove clone after losing create race"
                    );
                }
                let existing = self
                    .store
                    .vm_for_user(user_id)?
                    .ok_or(LifecycleError::NotFound)?;
                return Err(LifecycleError::AlreadyExists(Box::new(
                    existing.snapshot(warden_util::now()),
                )));
            }
            Err(e) => return Err(e.into()),
        };

        self.audit(AuditEventType::VmCreated {
            user_id,
            remote_vmid,
        });
        self.invalidate_fleet();

        self.hypervisor.start(remote_vmid).await?;

        let started_at = warden_util::now();
        self.store
            .update_status(record.id, VmStatus::Running, Some(started_at))?;

        info!(
            user_id = %user_id,
            remote_vmid = %remote_vmid,
            expires_at = %record.expires_at,
            "VM created and started"
        );

        let mut record = record;
        record.status = VmStatus::Running;
        record.last_started_at = Some(started_at);
        Ok(record.snapshot(started_at))
    }

    /// Reconcile the local row with the cluster's reported status, and pick
    /// up the guest address once the agent reports one.
    pub async fn refresh_status(&self, user_id: UserId) -> LifecycleResult<VmSnapshot> {
        let vm = self
            .store
            .vm_for_user(user_id)?
            .ok_or(LifecycleError::NotFound)?;

        let remote = self.hypervisor.current_status(vm.remote_vmid).await?;
        let status = normalize_status(&remote.status);
        self.store.update_status(vm.id, status, None)?;

        let mut record = vm;
        record.status = status;

        if status == VmStatus::Running {
            // Best-effort: a miss or lookup failure never clears an address
            // we already know.
            match self.hypervisor.guest_ipv4(record.remote_vmid).await {
                Ok(Some(address)) if !address.is_empty() => {
                    self.store.update_ip(record.id, &address)?;
                    record.ip_address = Some(address);
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(remote_vmid = %record.remote_vmid, error = %e, "Guest address lookup failed");
                }
            }
        }

        Ok(record.snapshot(warden_util::now()))
    }

    /// Apply a power action to the user's VM.
    ///
    /// Expired VMs may only be reclaimed, never power-cycled. The local
    /// status transitions optimistically on remote success, without a
    /// confirming status query.
    pub async fn power_action(
        &self,
        user_id: UserId,
        action: PowerAction,
    ) -> LifecycleResult<VmSnapshot> {
        let vm = self
            .store
            .vm_for_user(user_id)?
            .ok_or(LifecycleError::NotFound)?;

        if vm.is_expired(warden_util::now()) {
            return Err(LifecycleError::Expired);
        }

        self.apply_power(vm.remote_vmid, action).await?;

        let last_started_at = match action {
            PowerAction::Start | PowerAction::Restart => Some(warden_util::now()),
            PowerAction::Stop => None,
        };
        self.store
            .update_status(vm.id, action.target_status(), last_started_at)?;

        self.audit(AuditEventType::PowerApplied {
            remote_vmid: vm.remote_vmid,
            action,
        });
        self.invalidate_fleet();

        info!(user_id = %user_id, remote_vmid = %vm.remote_vmid, action = %action, "Power action applied");

        let mut record = vm;
        record.status = action.target_status();
        if last_started_at.is_some() {
            record.last_started_at = last_started_at;
        }
        Ok(record.snapshot(warden_util::now()))
    }

    /// Issue one-time console access to the user's running VM.
    ///
    /// The ticket is single-use and short-lived by hypervisor contract;
    /// it is never cached or reissued.
    pub async fn console_access(&self, user_id: UserId) -> LifecycleResult<ConsoleAccess> {
        let vm = self
            .store
            .vm_for_user(user_id)?
            .ok_or(LifecycleError::NotFound)?;

        if vm.status != VmStatus::Running {
            return Err(LifecycleError::InvalidState(vm.status));
        }

        let ticket = self.hypervisor.console_ticket(vm.remote_vmid).await?;
        let endpoint = self.hypervisor.endpoint();

        // Compatibility surface: the console client expects exactly this shape.
        let ws_url = format!(
            "wss://{}:8006/api2/json/nodes/{}/qemu/{}/vncwebsocket?port={}&vncticket={}",
            endpoint.host, endpoint.node, vm.remote_vmid, ticket.port, ticket.ticket
        );

        Ok(ConsoleAccess {
            ws_url,
            ticket: ticket.ticket,
            host: endpoint.host.clone(),
        })
    }

    /// Delete the user's VM through the shared delete primitive.
    pub async fn delete_for_user(&self, user_id: UserId) -> LifecycleResult<()> {
        let vm = self
            .store
            .vm_for_user(user_id)?
            .ok_or(LifecycleError::NotFound)?;
        self.delete_record(&vm, "owner request").await
    }

    /// The one delete path, shared by owner deletes, admin deletes and the
    /// reaper: best-effort graceful stop, remote delete, and only then
    /// local row removal.
    ///
    /// A remote-delete failure keeps the local row so the VM stays visible
    /// for retry. "Already gone", remotely or locally, counts as success so
    /// racing deleters converge.
    pub async fn delete_record(&self, vm: &VmRecord, reason: &str) -> LifecycleResult<()> {
        // Attempt, log, continue: a stop failure never blocks deletion.
        match self.hypervisor.current_status(vm.remote_vmid).await {
            Ok(remote) if remote.status == "running" => {
                if let Err(e) = self.hypervisor.shutdown(vm.remote_vmid).await {
                    warn!(remote_vmid = %vm.remote_vmid, error = %e, "Pre-delete shutdown failed");
                } else if !self.stop_settle.is_zero() {
                    tokio::time::sleep(self.stop_settle).await;
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(remote_vmid = %vm.remote_vmid, error = %e, "Could not check status before delete");
            }
        }

        match self.hypervisor.delete(vm.remote_vmid).await {
            Ok(()) => {}
            Err(HypervisorError::NotFound(_)) => {
                debug!(remote_vmid = %vm.remote_vmid, "Remote VM already gone");
            }
            Err(e) => return Err(e.into()),
        }

        let removed = self.store.delete_vm(vm.id)?;
        if !removed {
            debug!(vm_id = %vm.id, "VM row already gone");
        }

        self.audit(AuditEventType::VmDeleted {
            remote_vmid: vm.remote_vmid,
            reason: reason.to_string(),
        });
        self.invalidate_fleet();

        info!(
            user_id = %vm.user_id,
            remote_vmid = %vm.remote_vmid,
            reason,
            "VM deleted"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Admin surface
    // ------------------------------------------------------------------

    /// Current global template config
    pub fn config(&self) -> LifecycleResult<Option<GlobalConfig>> {
        Ok(self.store.global_config()?)
    }

    /// Create or replace the global template config
    pub fn set_config(&self, config: GlobalConfig) -> LifecycleResult<()> {
        self.store.set_global_config(&config)?;
        self.audit(AuditEventType::ConfigUpdated {
            template_id: config.template_id,
            max_duration_hours: config.max_duration_hours,
        });
        info!(
            template_id = %config.template_id,
            max_duration_hours = config.max_duration_hours,
            "Global config updated"
        );
        Ok(())
    }

    /// All challenges with their VM flags
    pub fn list_challenges(&self) -> LifecycleResult<Vec<warden_api::ChallengeView>> {
        Ok(self.store.list_challenges()?)
    }

    /// Toggle the VM panel flag for a challenge; returns whether anything
    /// changed.
    pub fn set_challenge_vm(
        &self,
        challenge_id: ChallengeId,
        enabled: bool,
    ) -> LifecycleResult<bool> {
        let changed = self.store.set_challenge_vm(challenge_id, enabled)?;
        if changed {
            self.audit(AuditEventType::ChallengeVmToggled {
                challenge_id,
                enabled,
            });
            info!(challenge_id = %challenge_id, enabled, "Challenge VM flag toggled");
        }
        Ok(changed)
    }

    /// Admin bulk view over all managed VMs, cached behind a short TTL.
    ///
    /// Refreshes each VM's status and address best-effort; a VM the cluster
    /// cannot answer for is listed from local state. Expiration checks never
    /// read this view; the cache is purely a remote-call saver.
    pub async fn list_fleet(&self) -> LifecycleResult<Vec<FleetVmView>> {
        if let Some(cached) = self.fleet_cache.get(FLEET_CACHE_KEY) {
            debug!("Fleet view served from cache");
            return Ok(cached);
        }

        let now = warden_util::now();
        let mut views = Vec::new();

        for vm in self.store.managed_vms()? {
            let mut record = vm;

            match self.hypervisor.current_status(record.remote_vmid).await {
                Ok(remote) => {
                    let status = normalize_status(&remote.status);
                    if let Err(e) = self.store.update_status(record.id, status, None) {
                        warn!(vm_id = %record.id, error = %e, "Failed to persist refreshed status");
                    }
                    record.status = status;

                    if status == VmStatus::Running
                        && let Ok(Some(address)) =
                            self.hypervisor.guest_ipv4(record.remote_vmid).await
                    {
                        if let Err(e) = self.store.update_ip(record.id, &address) {
                            warn!(vm_id = %record.id, error = %e, "Failed to persist guest address");
                        }
                        record.ip_address = Some(address);
                    }
                }
                Err(e) => {
                    debug!(remote_vmid = %record.remote_vmid, error = %e, "Fleet refresh skipped for VM");
                }
            }

            let owner_name = self
                .store
                .user_name(record.user_id)?
                .unwrap_or_else(|| "Unknown".to_string());
            let expires_at = record.expires_at;

            views.push(FleetVmView {
                vm: record.snapshot(now),
                owner_name,
                expires_at,
            });
        }

        self.fleet_cache.set(FLEET_CACHE_KEY, views.clone());
        Ok(views)
    }

    /// Admin power action by local id, managed VMs only.
    ///
    /// Status-only transition: no expiry gate and no `last_started_at` stamp.
    /// Reclamation of expired VMs goes through delete, not power.
    pub async fn admin_power(&self, vm_id: VmId, action: PowerAction) -> LifecycleResult<()> {
        let vm = self.managed_vm(vm_id)?;

        self.apply_power(vm.remote_vmid, action).await?;
        self.store.update_status(vm.id, action.target_status(), None)?;

        self.audit(AuditEventType::PowerApplied {
            remote_vmid: vm.remote_vmid,
            action,
        });
        self.invalidate_fleet();

        info!(vm_id = %vm_id, remote_vmid = %vm.remote_vmid, action = %action, "Admin power action applied");
        Ok(())
    }

    /// Admin delete by local id, managed VMs only
    pub async fn admin_delete(&self, vm_id: VmId) -> LifecycleResult<()> {
        let vm = self.managed_vm(vm_id)?;
        self.delete_record(&vm, "admin delete").await
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn managed_vm(&self, vm_id: VmId) -> LifecycleResult<VmRecord> {
        self.store
            .vm_by_id(vm_id)?
            .filter(|vm| vm.managed)
            .ok_or(LifecycleError::NotFound)
    }

    async fn apply_power(
        &self,
        remote_vmid: warden_util::RemoteVmId,
        action: PowerAction,
    ) -> LifecycleResult<()> {
        match action {
            PowerAction::Start => self.hypervisor.start(remote_vmid).await?,
            PowerAction::Stop => self.hypervisor.shutdown(remote_vmid).await?,
            PowerAction::Restart => self.hypervisor.reboot(remote_vmid).await?,
        }
        Ok(())
    }

    /// Audit is best-effort: a failed append never fails the operation.
    fn audit(&self, event: AuditEventType) {
        if let Err(e) = self.store.append_audit(AuditEvent::new(event)) {
            warn!(error = %e, "Failed to append audit event");
        }
    }

    fn invalidate_fleet(&self) {
        self.fleet_cache.delete(FLEET_CACHE_KEY);
    }
}

/// Normalize a raw remote status string into the closed local enum.
/// Anything unrecognized degrades to `Error` rather than being stored.
fn normalize_status(raw: &str) -> VmStatus {
    match VmStatus::from_remote(raw) {
        Some(status) => status,
        None => {
            warn!(remote_status = raw, "Unrecognized remote VM status");
            VmStatus::Error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use warden_hypervisor::{CloneScript, MockHypervisor};
    use warden_store::SqliteStore;
    use warden_util::RemoteVmId;

    fn test_settings() -> LifecycleSettings {
        LifecycleSettings {
            task_poll_interval: Duration::from_millis(2),
            task_timeout: Duration::from_millis(100),
            stop_settle: Duration::ZERO,
            fleet_cache_ttl: Duration::from_secs(30),
        }
    }

    fn setup() -> (Arc<MockHypervisor>, Arc<SqliteStore>, Orchestrator) {
        let hypervisor = Arc::new(MockHypervisor::new());
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.upsert_user(UserId::new(7), "alice").unwrap();
        let orchestrator = Orchestrator::new(
            hypervisor.clone(),
            store.clone(),
            &test_settings(),
        );
        (hypervisor, store, orchestrator)
    }

    fn seed_config(store: &SqliteStore) {
        store
            .set_global_config(&GlobalConfig {
                template_id: RemoteVmId::new(100),
                template_name: "Debian base".into(),
                max_duration_hours: 4,
            })
            .unwrap();
    }

    fn seed_vm(store: &SqliteStore, expires_in: ChronoDuration) -> VmRecord {
        let record = store
            .insert_vm(&NewVm {
                user_id: UserId::new(7),
                remote_vmid: RemoteVmId::new(501),
                name: "warden-u7".into(),
                status: VmStatus::Running,
                expires_at: warden_util::now() + expires_in,
                managed: true,
            })
            .unwrap();
        store
            .update_status(record.id, VmStatus::Running, Some(warden_util::now()))
            .unwrap();
        store.vm_by_id(record.id).unwrap().unwrap()
    }

    #[tokio::test]
    async fn create_requires_config() {
        let (_hv, _store, orchestrator) = setup();
        let err = orchestrator.create(UserId::new(7)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotConfigured));
    }

    #[tokio::test]
    async fn create_provisions_running_vm() {
        let (hv, store, orchestrator) = setup();
        seed_config(&store);

        let snapshot = orchestrator.create(UserId::new(7)).await.unwrap();

        assert_eq!(snapshot.remote_vmid, RemoteVmId::new(501));
        assert_eq!(snapshot.status, VmStatus::Running);
        assert_eq!(snapshot.name, "warden-u7");
        // expires ≈ now + 4h
        assert!(snapshot.remaining_seconds > 4 * 3600 - 5);
        assert!(snapshot.remaining_seconds <= 4 * 3600);

        let record = store.vm_for_user(UserId::new(7)).unwrap().unwrap();
        assert_eq!(record.status, VmStatus::Running);
        assert!(record.last_started_at.is_some());
        assert_eq!(hv.current_status(RemoteVmId::new(501)).await.unwrap().status, "running");
    }

    #[tokio::test]
    async fn create_returns_existing_vm() {
        let (_hv, store, orchestrator) = setup();
        seed_config(&store);

        orchestrator.create(UserId::new(7)).await.unwrap();
        let err = orchestrator.create(UserId::new(7)).await.unwrap_err();

        match err {
            LifecycleError::AlreadyExists(existing) => {
                assert_eq!(existing.remote_vmid, RemoteVmId::new(501));
            }
            other => panic!("expected AlreadyExists, got {other:?}"),
        }
        assert_eq!(store.managed_vms().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_clone_persists_nothing() {
        let (hv, store, orchestrator) = setup();
        seed_config(&store);
        hv.set_clone_script(CloneScript::FailTask("unable to create image".into()));

        let err = orchestrator.create(UserId::new(7)).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::RemoteTaskFailed(reason) if reason.contains("unable")
        ));
        assert!(store.vm_for_user(UserId::new(7)).unwrap().is_none());
    }

    #[tokio::test]
    async fn timed_out_clone_persists_nothing() {
        let (hv, store, orchestrator) = setup();
        seed_config(&store);
        hv.set_clone_script(CloneScript::NeverFinish);

        let err = orchestrator.create(UserId::new(7)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::RemoteTaskTimedOut));
        assert!(store.vm_for_user(UserId::new(7)).unwrap().is_none());
    }

    #[tokio::test]
    async fn start_failure_leaves_creating_row() {
        let (hv, store, orchestrator) = setup();
        seed_config(&store);
        hv.fail_start.store(true, std::sync::atomic::Ordering::SeqCst);

        let err = orchestrator.create(UserId::new(7)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::RemoteUnavailable(_)));

        // The row survives in `creating`, visible and reclaimable.
        let record = store.vm_for_user(UserId::new(7)).unwrap().unwrap();
        assert_eq!(record.status, VmStatus::Creating);
    }

    #[tokio::test]
    async fn power_on_expired_vm_is_rejected() {
        let (hv, store, orchestrator) = setup();
        seed_vm(&store, ChronoDuration::hours(-1));
        hv.register_vm(RemoteVmId::new(501), "stopped");

        for action in [PowerAction::Start, PowerAction::Stop, PowerAction::Restart] {
            let err = orchestrator
                .power_action(UserId::new(7), action)
                .await
                .unwrap_err();
            assert!(matches!(err, LifecycleError::Expired), "action {action}");
        }
    }

    #[tokio::test]
    async fn power_actions_transition_locally() {
        let (hv, store, orchestrator) = setup();
        seed_vm(&store, ChronoDuration::hours(4));
        hv.register_vm(RemoteVmId::new(501), "running");

        let snapshot = orchestrator
            .power_action(UserId::new(7), PowerAction::Stop)
            .await
            .unwrap();
        assert_eq!(snapshot.status, VmStatus::Stopped);

        let before = store.vm_for_user(UserId::new(7)).unwrap().unwrap();
        let snapshot = orchestrator
            .power_action(UserId::new(7), PowerAction::Start)
            .await
            .unwrap();
        assert_eq!(snapshot.status, VmStatus::Running);

        let after = store.vm_for_user(UserId::new(7)).unwrap().unwrap();
        assert!(after.last_started_at >= before.last_started_at);
    }

    #[tokio::test]
    async fn power_action_without_vm_is_not_found() {
        let (_hv, store, orchestrator) = setup();
        seed_config(&store);

        let err = orchestrator
            .power_action(UserId::new(7), PowerAction::Start)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound));
    }

    #[tokio::test]
    async fn refresh_never_clears_known_address() {
        let (hv, store, orchestrator) = setup();
        let record = seed_vm(&store, ChronoDuration::hours(4));
        store.update_ip(record.id, "10.0.0.5").unwrap();
        hv.register_vm(RemoteVmId::new(501), "running");
        // Agent reports nothing yet

        let snapshot = orchestrator.refresh_status(UserId::new(7)).await.unwrap();
        assert_eq!(snapshot.ip_address.as_deref(), Some("10.0.0.5"));

        hv.set_guest_ip(RemoteVmId::new(501), Some("10.0.0.9"));
        let snapshot = orchestrator.refresh_status(UserId::new(7)).await.unwrap();
        assert_eq!(snapshot.ip_address.as_deref(), Some("10.0.0.9"));
    }

    #[tokio::test]
    async fn refresh_normalizes_unknown_remote_status() {
        let (hv, store, orchestrator) = setup();
        seed_vm(&store, ChronoDuration::hours(4));
        hv.register_vm(RemoteVmId::new(501), "prelaunch");

        let snapshot = orchestrator.refresh_status(UserId::new(7)).await.unwrap();
        assert_eq!(snapshot.status, VmStatus::Error);

        let record = store.vm_for_user(UserId::new(7)).unwrap().unwrap();
        assert_eq!(record.status, VmStatus::Error);
    }

    #[tokio::test]
    async fn console_access_requires_running_vm() {
        let (hv, store, orchestrator) = setup();
        let record = seed_vm(&store, ChronoDuration::hours(4));
        hv.register_vm(RemoteVmId::new(501), "stopped");
        store
            .update_status(record.id, VmStatus::Stopped, None)
            .unwrap();

        let err = orchestrator.console_access(UserId::new(7)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidState(VmStatus::Stopped)));
    }

    #[tokio::test]
    async fn console_url_matches_compatibility_surface() {
        let (hv, store, orchestrator) = setup();
        seed_vm(&store, ChronoDuration::hours(4));
        hv.register_vm(RemoteVmId::new(501), "running");

        let access = orchestrator.console_access(UserId::new(7)).await.unwrap();
        assert_eq!(
            access.ws_url,
            "wss://hv.example.test:8006/api2/json/nodes/node1/qemu/501/vncwebsocket?port=5901&vncticket=PVEVNC:MOCKTICKET"
        );
        assert_eq!(access.host, "hv.example.test");
        assert_eq!(access.ticket, "PVEVNC:MOCKTICKET");
    }

    #[tokio::test]
    async fn delete_removes_remote_then_local() {
        let (hv, store, orchestrator) = setup();
        seed_config(&store);
        orchestrator.create(UserId::new(7)).await.unwrap();

        orchestrator.delete_for_user(UserId::new(7)).await.unwrap();

        assert!(store.vm_for_user(UserId::new(7)).unwrap().is_none());
        assert!(!hv.vm_exists(RemoteVmId::new(501)));
    }

    #[tokio::test]
    async fn remote_delete_failure_keeps_row() {
        let (hv, store, orchestrator) = setup();
        seed_config(&store);
        orchestrator.create(UserId::new(7)).await.unwrap();
        hv.fail_delete.store(true, std::sync::atomic::Ordering::SeqCst);

        let err = orchestrator.delete_for_user(UserId::new(7)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::RemoteUnavailable(_)));
        assert!(store.vm_for_user(UserId::new(7)).unwrap().is_some());

        // Retry succeeds once the cluster recovers
        hv.fail_delete.store(false, std::sync::atomic::Ordering::SeqCst);
        orchestrator.delete_for_user(UserId::new(7)).await.unwrap();
        assert!(store.vm_for_user(UserId::new(7)).unwrap().is_none());
    }

    #[tokio::test]
    async fn stop_failure_does_not_block_delete() {
        let (hv, store, orchestrator) = setup();
        seed_config(&store);
        orchestrator.create(UserId::new(7)).await.unwrap();
        hv.fail_shutdown.store(true, std::sync::atomic::Ordering::SeqCst);

        orchestrator.delete_for_user(UserId::new(7)).await.unwrap();
        assert!(store.vm_for_user(UserId::new(7)).unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_tolerates_missing_remote_vm() {
        let (_hv, store, orchestrator) = setup();
        seed_vm(&store, ChronoDuration::hours(4));
        // No remote VM registered: status check and delete both see "gone"

        orchestrator.delete_for_user(UserId::new(7)).await.unwrap();
        assert!(store.vm_for_user(UserId::new(7)).unwrap().is_none());
    }

    #[tokio::test]
    async fn admin_surface_ignores_unmanaged_vms() {
        let (hv, store, orchestrator) = setup();
        store.upsert_user(UserId::new(8), "bob").unwrap();
        let record = store
            .insert_vm(&NewVm {
                user_id: UserId::new(8),
                remote_vmid: RemoteVmId::new(777),
                name: "external".into(),
                status: VmStatus::Running,
                expires_at: warden_util::now() + ChronoDuration::hours(4),
                managed: false,
            })
            .unwrap();
        hv.register_vm(RemoteVmId::new(777), "running");

        let err = orchestrator.admin_delete(record.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound));
        let err = orchestrator
            .admin_power(record.id, PowerAction::Stop)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound));
    }

    #[tokio::test]
    async fn challenge_toggle_reports_changes() {
        let (_hv, store, orchestrator) = setup();
        store
            .upsert_challenge(ChallengeId::new(11), "pwn-01", "pwn")
            .unwrap();

        assert!(orchestrator.set_challenge_vm(ChallengeId::new(11), true).unwrap());
        assert!(!orchestrator.set_challenge_vm(ChallengeId::new(11), true).unwrap());

        let challenges = orchestrator.list_challenges().unwrap();
        assert_eq!(challenges.len(), 1);
        assert!(challenges[0].vm_enabled);
    }
}
