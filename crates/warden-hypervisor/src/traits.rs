//! Hypervisor trait definitions

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use warden_util::RemoteVmId;

use crate::HvResult;

/// Opaque handle to an in-progress asynchronous hypervisor operation
/// (a UPID on Proxmox). Only good for polling its status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle(String);

impl TaskHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a long-running hypervisor task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    /// Terminal. The task succeeded only when `exit_status` is `"OK"`.
    Stopped { exit_status: String },
}

/// Live status of a VM as reported by the cluster.
///
/// `status` is the raw remote string; normalization into the closed local
/// enum happens at the orchestrator boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeStatus {
    pub status: String,
    pub uptime_secs: u64,
}

/// One-time VNC proxy ticket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleTicket {
    pub port: u16,
    pub ticket: String,
}

/// Cluster coordinates needed to compose console endpoint addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HypervisorEndpoint {
    pub host: String,
    pub node: String,
}

/// Hypervisor control-plane operations.
///
/// Stateless by contract: every call stands alone, scoped to the configured
/// cluster node, keyed by the remote VM identity.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Allocate the next free VM identity on the cluster
    async fn next_vmid(&self) -> HvResult<RemoteVmId>;

    /// Start a linked clone of `template` as `newid`. Returns the task
    /// handle to poll; the clone is not usable until the task succeeds.
    async fn clone_template(
        &self,
        template: RemoteVmId,
        newid: RemoteVmId,
        name: &str,
        description: &str,
    ) -> HvResult<TaskHandle>;

    /// Poll a task
    async fn task_status(&self, task: &TaskHandle) -> HvResult<TaskStatus>;

    /// Power on
    async fn start(&self, vmid: RemoteVmId) -> HvResult<()>;

    /// Graceful guest shutdown (not a forced power-off)
    async fn shutdown(&self, vmid: RemoteVmId) -> HvResult<()>;

    /// Guest reboot
    async fn reboot(&self, vmid: RemoteVmId) -> HvResult<()>;

    /// Destroy the VM and its disks
    async fn delete(&self, vmid: RemoteVmId) -> HvResult<()>;

    /// Current power state and uptime
    async fn current_status(&self, vmid: RemoteVmId) -> HvResult<RuntimeStatus>;

    /// First usable guest IPv4 address, if the guest agent has reported one.
    /// `Ok(None)` is the expected transient state for a freshly booted VM.
    async fn guest_ipv4(&self, vmid: RemoteVmId) -> HvResult<Option<String>>;

    /// Obtain a one-time console ticket
    async fn console_ticket(&self, vmid: RemoteVmId) -> HvResult<ConsoleTicket>;

    /// Cluster coordinates for console URL composition
    fn endpoint(&self) -> &HypervisorEndpoint;
}
