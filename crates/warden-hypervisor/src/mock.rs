//! Mock hypervisor for testing

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use warden_util::RemoteVmId;

use crate::{
    ConsoleTicket, HvResult, Hypervisor, HypervisorEndpoint, HypervisorError, RuntimeStatus,
    TaskHandle, TaskStatus,
};

/// How a scripted clone task should play out
#[derive(Debug, Clone)]
pub enum CloneScript {
    /// Task completes with exit status OK after the configured poll count
    Succeed,
    /// Task reaches terminal state with this non-OK exit status
    FailTask(String),
    /// Task never leaves the running state (for timeout tests)
    NeverFinish,
}

#[derive(Debug)]
enum TaskOutcome {
    Ok,
    Fail(String),
    Never,
}

#[derive(Debug)]
struct MockTask {
    polls_remaining: u32,
    outcome: TaskOutcome,
}

/// Remote-side state of a mock VM
#[derive(Debug, Clone)]
pub struct MockVmState {
    pub name: String,
    /// Raw status string, as the cluster would report it
    pub status: String,
    pub ip: Option<String>,
}

/// Mock hypervisor for unit/integration testing.
///
/// Tracks remote VM state in memory, scripts clone task outcomes, and counts
/// status/agent calls so cache behavior can be asserted.
pub struct MockHypervisor {
    endpoint: HypervisorEndpoint,
    next_id: AtomicU32,
    task_seq: AtomicU64,
    clone_polls: AtomicU32,
    clone_script: Mutex<CloneScript>,
    tasks: Mutex<HashMap<String, MockTask>>,
    vms: Mutex<HashMap<RemoteVmId, MockVmState>>,

    /// Configure power/delete/status calls to fail
    pub fail_start: AtomicBool,
    pub fail_shutdown: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_status: AtomicBool,
    fail_delete_vmids: Mutex<HashSet<RemoteVmId>>,

    status_calls: AtomicUsize,
    ip_calls: AtomicUsize,
}

impl MockHypervisor {
    pub fn new() -> Self {
        Self {
            endpoint: HypervisorEndpoint {
                host: "hv.example.test".into(),
                node: "node1".into(),
            },
            next_id: AtomicU32::new(501),
            task_seq: AtomicU64::new(1),
            clone_polls: AtomicU32::new(1),
            clone_script: Mutex::new(CloneScript::Succeed),
            tasks: Mutex::new(HashMap::new()),
            vms: Mutex::new(HashMap::new()),
            fail_start: AtomicBool::new(false),
            fail_shutdown: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            fail_status: AtomicBool::new(false),
            fail_delete_vmids: Mutex::new(HashSet::new()),
            status_calls: AtomicUsize::new(0),
            ip_calls: AtomicUsize::new(0),
        }
    }

    /// Script the outcome of subsequent clone tasks
    pub fn set_clone_script(&self, script: CloneScript) {
        *self.clone_script.lock().unwrap() = script;
    }

    /// How many polls a successful clone task reports `running` before
    /// turning terminal
    pub fn set_clone_polls(&self, polls: u32) {
        self.clone_polls.store(polls, Ordering::SeqCst);
    }

    /// Register a pre-existing remote VM
    pub fn register_vm(&self, vmid: RemoteVmId, status: &str) {
        self.vms.lock().unwrap().insert(
            vmid,
            MockVmState {
                name: format!("mock-{vmid}"),
                status: status.into(),
                ip: None,
            },
        );
    }

    /// Set or clear the address the guest agent reports
    pub fn set_guest_ip(&self, vmid: RemoteVmId, ip: Option<&str>) {
        if let Some(vm) = self.vms.lock().unwrap().get_mut(&vmid) {
            vm.ip = ip.map(String::from);
        }
    }

    /// Override the raw status string the cluster reports
    pub fn set_remote_status(&self, vmid: RemoteVmId, status: &str) {
        if let Some(vm) = self.vms.lock().unwrap().get_mut(&vmid) {
            vm.status = status.into();
        }
    }

    /// Make delete fail for one specific VM only
    pub fn set_fail_delete_for(&self, vmid: RemoteVmId) {
        self.fail_delete_vmids.lock().unwrap().insert(vmid);
    }

    pub fn vm_exists(&self, vmid: RemoteVmId) -> bool {
        self.vms.lock().unwrap().contains_key(&vmid)
    }

    pub fn vm_count(&self) -> usize {
        self.vms.lock().unwrap().len()
    }

    pub fn status_call_count(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn ip_call_count(&self) -> usize {
        self.ip_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockHypervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Hypervisor for MockHypervisor {
    async fn next_vmid(&self) -> HvResult<RemoteVmId> {
        Ok(RemoteVmId::new(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn clone_template(
        &self,
        _template: RemoteVmId,
        newid: RemoteVmId,
        name: &str,
        _description: &str,
    ) -> HvResult<TaskHandle> {
        let seq = self.task_seq.fetch_add(1, Ordering::SeqCst);
        let handle = TaskHandle::new(format!("UPID:mock:{seq:08X}:qmclone:{newid}"));

        let outcome = match &*self.clone_script.lock().unwrap() {
            CloneScript::Succeed => {
                // The clone exists (stopped) once the task completes; the
                // mock materializes it up front since nothing observes it
                // before the waiter returns.
                self.vms.lock().unwrap().insert(
                    newid,
                    MockVmState {
                        name: name.into(),
                        status: "stopped".into(),
                        ip: None,
                    },
                );
                TaskOutcome::Ok
            }
            CloneScript::FailTask(reason) => TaskOutcome::Fail(reason.clone()),
            CloneScript::NeverFinish => TaskOutcome::Never,
        };

        self.tasks.lock().unwrap().insert(
            handle.as_str().to_string(),
            MockTask {
                polls_remaining: self.clone_polls.load(Ordering::SeqCst),
                outcome,
            },
        );

        Ok(handle)
    }

    async fn task_status(&self, task: &TaskHandle) -> HvResult<TaskStatus> {
        let mut tasks = self.tasks.lock().unwrap();
        let entry = tasks
            .get_mut(task.as_str())
            .ok_or_else(|| HypervisorError::NotFound(format!("no such task: {task}")))?;

        let exit_status = match &entry.outcome {
            TaskOutcome::Never => return Ok(TaskStatus::Running),
            TaskOutcome::Ok => "OK".to_string(),
            TaskOutcome::Fail(reason) => reason.clone(),
        };

        if entry.polls_remaining > 0 {
            entry.polls_remaining -= 1;
            return Ok(TaskStatus::Running);
        }

        Ok(TaskStatus::Stopped { exit_status })
    }

    async fn start(&self, vmid: RemoteVmId) -> HvResult<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(HypervisorError::Api {
                status: 500,
                message: "mock start failure".into(),
            });
        }

        let mut vms = self.vms.lock().unwrap();
        let vm = vms
            .get_mut(&vmid)
            .ok_or_else(|| HypervisorError::NotFound(format!("VM {vmid} does not exist")))?;
        vm.status = "running".into();
        Ok(())
    }

    async fn shutdown(&self, vmid: RemoteVmId) -> HvResult<()> {
        if self.fail_shutdown.load(Ordering::SeqCst) {
            return Err(HypervisorError::Api {
                status: 500,
                message: "mock shutdown failure".into(),
            });
        }

        let mut vms = self.vms.lock().unwrap();
        let vm = vms
            .get_mut(&vmid)
            .ok_or_else(|| HypervisorError::NotFound(format!("VM {vmid} does not exist")))?;
        vm.status = "stopped".into();
        Ok(())
    }

    async fn reboot(&self, vmid: RemoteVmId) -> HvResult<()> {
        let mut vms = self.vms.lock().unwrap();
        let vm = vms
            .get_mut(&vmid)
            .ok_or_else(|| HypervisorError::NotFound(format!("VM {vmid} does not exist")))?;
        vm.status = "running".into();
        Ok(())
    }

    async fn delete(&self, vmid: RemoteVmId) -> HvResult<()> {
        if self.fail_delete.load(Ordering::SeqCst)
            || self.fail_delete_vmids.lock().unwrap().contains(&vmid)
        {
            return Err(HypervisorError::Api {
                status: 500,
                message: "mock delete failure".into(),
            });
        }

        let removed = self.vms.lock().unwrap().remove(&vmid);
        if removed.is_none() {
            return Err(HypervisorError::NotFound(format!(
                "VM {vmid} does not exist"
            )));
        }
        Ok(())
    }

    async fn current_status(&self, vmid: RemoteVmId) -> HvResult<RuntimeStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_status.load(Ordering::SeqCst) {
            return Err(HypervisorError::Transport("mock status failure".into()));
        }

        let vms = self.vms.lock().unwrap();
        let vm = vms
            .get(&vmid)
            .ok_or_else(|| HypervisorError::NotFound(format!("VM {vmid} does not exist")))?;

        Ok(RuntimeStatus {
            status: vm.status.clone(),
            uptime_secs: if vm.status == "running" { 42 } else { 0 },
        })
    }

    async fn guest_ipv4(&self, vmid: RemoteVmId) -> HvResult<Option<String>> {
        self.ip_calls.fetch_add(1, Ordering::SeqCst);

        let vms = self.vms.lock().unwrap();
        Ok(vms.get(&vmid).and_then(|vm| {
            if vm.status == "running" {
                vm.ip.clone()
            } else {
                None
            }
        }))
    }

    async fn console_ticket(&self, vmid: RemoteVmId) -> HvResult<ConsoleTicket> {
        let vms = self.vms.lock().unwrap();
        if !vms.contains_key(&vmid) {
            return Err(HypervisorError::NotFound(format!(
                "VM {vmid} does not exist"
            )));
        }

        Ok(ConsoleTicket {
            port: 5901,
            ticket: "PVEVNC:MOCKTICKET".into(),
        })
    }

    fn endpoint(&self) -> &HypervisorEndpoint {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identities_are_sequential() {
        let hv = MockHypervisor::new();
        assert_eq!(hv.next_vmid().await.unwrap(), RemoteVmId::new(501));
        assert_eq!(hv.next_vmid().await.unwrap(), RemoteVmId::new(502));
    }

    #[tokio::test]
    async fn clone_creates_vm_and_power_cycles_it() {
        let hv = MockHypervisor::new();
        let vmid = RemoteVmId::new(501);
        hv.clone_template(RemoteVmId::new(100), vmid, "warden-u7", "")
            .await
            .unwrap();
        assert!(hv.vm_exists(vmid));

        hv.start(vmid).await.unwrap();
        assert_eq!(hv.current_status(vmid).await.unwrap().status, "running");

        hv.shutdown(vmid).await.unwrap();
        assert_eq!(hv.current_status(vmid).await.unwrap().status, "stopped");
    }

    #[tokio::test]
    async fn delete_is_not_found_after_removal() {
        let hv = MockHypervisor::new();
        let vmid = RemoteVmId::new(501);
        hv.register_vm(vmid, "stopped");

        hv.delete(vmid).await.unwrap();
        let err = hv.delete(vmid).await.unwrap_err();
        assert!(matches!(err, HypervisorError::NotFound(_)));
    }

    #[tokio::test]
    async fn guest_ip_only_reported_while_running() {
        let hv = MockHypervisor::new();
        let vmid = RemoteVmId::new(501);
        hv.register_vm(vmid, "stopped");
        hv.set_guest_ip(vmid, Some("10.0.0.5"));

        assert_eq!(hv.guest_ipv4(vmid).await.unwrap(), None);
        hv.start(vmid).await.unwrap();
        assert_eq!(
            hv.guest_ipv4(vmid).await.unwrap().as_deref(),
            Some("10.0.0.5")
        );
    }
}
