//! Shared types crossing the vmwarden boundary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use warden_util::{ChallengeId, RemoteVmId, VmId};

/// Lifecycle state of a managed VM.
///
/// Closed set: remote status strings are normalized into it and never stored
/// verbatim. `Error` covers unrecoverable remote failures and any status the
/// hypervisor reports that this system has no vocabulary for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmStatus {
    Creating,
    Running,
    Stopped,
    Error,
}

impl VmStatus {
    /// Normalize a status string reported by the hypervisor.
    ///
    /// Returns `None` for anything outside the known vocabulary; callers
    /// decide how to degrade (the orchestrator warns and records `Error`).
    pub fn from_remote(status: &str) -> Option<Self> {
        match status {
            "running" => Some(Self::Running),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VmStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(Self::Creating),
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "error" => Ok(Self::Error),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A status string outside the closed `VmStatus` set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown VM status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

/// Power action requested against a VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerAction {
    Start,
    Stop,
    Restart,
}

impl PowerAction {
    /// Local status the VM transitions to when the remote call succeeds.
    pub fn target_status(&self) -> VmStatus {
        match self {
            Self::Start | Self::Restart => VmStatus::Running,
            Self::Stop => VmStatus::Stopped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PowerAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            other => Err(format!("invalid power action: {other}")),
        }
    }
}

/// Snapshot of a VM as returned to its owner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmSnapshot {
    pub id: VmId,
    pub remote_vmid: RemoteVmId,
    pub name: String,
    pub ip_address: Option<String>,
    pub status: VmStatus,
    pub remaining_seconds: u64,
    pub remaining_formatted: String,
}

/// One row of the admin fleet view: snapshot plus owner display name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetVmView {
    #[serde(flatten)]
    pub vm: VmSnapshot,
    pub owner_name: String,
    pub expires_at: DateTime<Utc>,
}

/// One-time console access grant.
///
/// The ticket is single-use and short-lived by hypervisor contract; it is
/// never cached or reissued, and the URL shape is a compatibility surface for
/// the existing console client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleAccess {
    pub ws_url: String,
    pub ticket: String,
    pub host: String,
}

/// A challenge with its VM-panel flag, for the admin listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeView {
    pub id: ChallengeId,
    pub name: String,
    pub category: String,
    pub vm_enabled: bool,
}

/// Per-run summary reported by the expiration reaper
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}
