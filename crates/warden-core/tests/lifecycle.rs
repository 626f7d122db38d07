//! Integration tests for the VM lifecycle
//!
//! Drive the orchestrator and reaper end-to-end against the mock hypervisor
//! and an in-memory store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use warden_api::{PowerAction, VmStatus};
use warden_config::LifecycleSettings;
use warden_core::{LifecycleError, Orchestrator, Reaper};
use warden_hypervisor::MockHypervisor;
use warden_store::{GlobalConfig, NewVm, SqliteStore, VmStore};
use warden_util::{RemoteVmId, UserId};

fn test_settings() -> LifecycleSettings {
    LifecycleSettings {
        task_poll_interval: Duration::from_millis(5),
        task_timeout: Duration::from_millis(500),
        stop_settle: Duration::ZERO,
        fleet_cache_ttl: Duration::from_secs(30),
    }
}

fn setup() -> (Arc<MockHypervisor>, Arc<SqliteStore>, Arc<Orchestrator>) {
    let hypervisor = Arc::new(MockHypervisor::new());
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let orchestrator = Arc::new(Orchestrator::new(
        hypervisor.clone(),
        store.clone(),
        &test_settings(),
    ));
    (hypervisor, store, orchestrator)
}

fn seed_config(orchestrator: &Orchestrator) {
    orchestrator
        .set_config(GlobalConfig {
            template_id: RemoteVmId::new(100),
            template_name: "Debian base".into(),
            max_duration_hours: 4,
        })
        .unwrap();
}

fn seed_expired_vm(store: &SqliteStore, user: i64, remote: u32) {
    store
        .upsert_user(UserId::new(user), &format!("user{user}"))
        .unwrap();
    store
        .insert_vm(&NewVm {
            user_id: UserId::new(user),
            remote_vmid: RemoteVmId::new(remote),
            name: format!("warden-u{user}"),
            status: VmStatus::Running,
            expires_at: warden_util::now() - ChronoDuration::hours(1),
            managed: true,
        })
        .unwrap();
}

#[tokio::test]
async fn create_then_delete_leaves_nothing_behind() {
    let (hypervisor, store, orchestrator) = setup();
    store.upsert_user(UserId::new(7), "alice").unwrap();
    seed_config(&orchestrator);

    let snapshot = orchestrator.create(UserId::new(7)).await.unwrap();
    assert_eq!(snapshot.remote_vmid, RemoteVmId::new(501));
    assert_eq!(snapshot.status, VmStatus::Running);

    orchestrator.delete_for_user(UserId::new(7)).await.unwrap();

    assert!(store.vm_for_user(UserId::new(7)).unwrap().is_none());
    assert_eq!(hypervisor.vm_count(), 0);
}

#[tokio::test]
async fn concurrent_creates_yield_one_vm() {
    let (hypervisor, store, orchestrator) = setup();
    store.upsert_user(UserId::new(7), "alice").unwrap();
    seed_config(&orchestrator);

    // Both tasks pass the pre-check before either inserts; the UNIQUE
    // constraint on user_id arbitrates.
    let first = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.create(UserId::new(7)).await }
    });
    let second = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.create(UserId::new(7)).await }
    });

    let results = [first.await.unwrap(), second.await.unwrap()];
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let already_exists = results
        .iter()
        .filter(|r| matches!(r, Err(LifecycleError::AlreadyExists(_))))
        .count();

    assert_eq!(successes, 1);
    assert_eq!(already_exists, 1);
    assert_eq!(store.managed_vms().unwrap().len(), 1);
    // The losing request reclaimed its own clone
    assert_eq!(hypervisor.vm_count(), 1);
}

#[tokio::test]
async fn reaper_isolates_per_item_failures() {
    let (hypervisor, store, orchestrator) = setup();

    seed_expired_vm(&store, 1, 501);
    seed_expired_vm(&store, 2, 502);
    // A live VM the reaper must not touch
    store.upsert_user(UserId::new(3), "carol").unwrap();
    store
        .insert_vm(&NewVm {
            user_id: UserId::new(3),
            remote_vmid: RemoteVmId::new(503),
            name: "warden-u3".into(),
            status: VmStatus::Running,
            expires_at: warden_util::now() + ChronoDuration::hours(2),
            managed: true,
        })
        .unwrap();

    hypervisor.register_vm(RemoteVmId::new(501), "stopped");
    hypervisor.register_vm(RemoteVmId::new(502), "running");
    hypervisor.register_vm(RemoteVmId::new(503), "running");
    hypervisor.set_fail_delete_for(RemoteVmId::new(502));

    let reaper = Reaper::new(store.clone(), orchestrator);
    let summary = reaper.run_once().await.unwrap();

    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);

    // The reclaimed VM is gone on both sides; the failed one survives
    // locally for the next run; the live one is untouched.
    assert!(store.vm_for_user(UserId::new(1)).unwrap().is_none());
    assert!(!hypervisor.vm_exists(RemoteVmId::new(501)));
    assert!(store.vm_for_user(UserId::new(2)).unwrap().is_some());
    assert!(store.vm_for_user(UserId::new(3)).unwrap().is_some());
    assert!(hypervisor.vm_exists(RemoteVmId::new(503)));
}

#[tokio::test]
async fn reaper_with_nothing_expired_is_a_no_op() {
    let (_hypervisor, store, orchestrator) = setup();

    let reaper = Reaper::new(store, orchestrator);
    let summary = reaper.run_once().await.unwrap();

    assert_eq!(summary.attempted, 0);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn fleet_view_is_cached_until_a_mutation() {
    let (hypervisor, store, orchestrator) = setup();
    store.upsert_user(UserId::new(7), "alice").unwrap();
    seed_config(&orchestrator);

    let snapshot = orchestrator.create(UserId::new(7)).await.unwrap();
    hypervisor.set_guest_ip(snapshot.remote_vmid, Some("10.0.0.5"));
    let baseline = hypervisor.status_call_count();

    let fleet = orchestrator.list_fleet().await.unwrap();
    assert_eq!(fleet.len(), 1);
    assert_eq!(fleet[0].owner_name, "alice");
    assert_eq!(fleet[0].vm.status, VmStatus::Running);
    assert_eq!(fleet[0].vm.ip_address.as_deref(), Some("10.0.0.5"));
    let after_first = hypervisor.status_call_count();
    assert_eq!(after_first, baseline + 1);

    // Second listing inside the TTL: served from cache, no remote calls
    let cached = orchestrator.list_fleet().await.unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(hypervisor.status_call_count(), after_first);

    // A mutating admin action invalidates synchronously; the next listing
    // reflects fresh remote state.
    orchestrator
        .admin_power(snapshot.id, PowerAction::Stop)
        .await
        .unwrap();

    let fresh = orchestrator.list_fleet().await.unwrap();
    assert!(hypervisor.status_call_count() > after_first);
    assert_eq!(fresh[0].vm.status, VmStatus::Stopped);
}

#[tokio::test]
async fn fleet_view_lists_unreachable_vms_from_local_state() {
    let (hypervisor, store, orchestrator) = setup();
    store.upsert_user(UserId::new(7), "alice").unwrap();
    store
        .insert_vm(&NewVm {
            user_id: UserId::new(7),
            remote_vmid: RemoteVmId::new(501),
            name: "warden-u7".into(),
            status: VmStatus::Running,
            expires_at: warden_util::now() + ChronoDuration::hours(2),
            managed: true,
        })
        .unwrap();
    hypervisor
        .fail_status
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let fleet = orchestrator.list_fleet().await.unwrap();
    assert_eq!(fleet.len(), 1);
    // Refresh failed; the locally known status is shown
    assert_eq!(fleet[0].vm.status, VmStatus::Running);
}

#[tokio::test]
async fn fleet_view_attaches_owner_names() {
    let (hypervisor, store, orchestrator) = setup();
    store.upsert_user(UserId::new(9), "dana").unwrap();
    store
        .insert_vm(&NewVm {
            user_id: UserId::new(9),
            remote_vmid: RemoteVmId::new(501),
            name: "warden-u9".into(),
            status: VmStatus::Stopped,
            expires_at: warden_util::now() + ChronoDuration::hours(2),
            managed: true,
        })
        .unwrap();
    hypervisor.register_vm(RemoteVmId::new(501), "stopped");

    let fleet = orchestrator.list_fleet().await.unwrap();
    assert_eq!(fleet[0].owner_name, "dana");
    assert_eq!(fleet[0].vm.name, "warden-u9");
}
