//! Persisted entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_api::{VmSnapshot, VmStatus};
use warden_util::{RemoteVmId, UserId, VmId};

/// Global VM provisioning config. Singleton row, admin-written.
///
/// Its absence blocks all VM creation; there is no built-in default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Remote identity of the clonable source image
    pub template_id: RemoteVmId,

    /// Display name for the template
    pub template_name: String,

    /// Time-to-live granted to every new VM
    pub max_duration_hours: u32,
}

/// A managed (or externally administered) VM row. One per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRecord {
    pub id: VmId,
    pub user_id: UserId,
    pub remote_vmid: RemoteVmId,
    pub name: String,
    pub ip_address: Option<String>,
    pub status: VmStatus,
    pub created_at: DateTime<Utc>,
    pub last_started_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    /// True when this system is responsible for reclaiming the VM at expiry
    pub managed: bool,
}

impl VmRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Owner-facing view with remaining time computed against `now`.
    pub fn snapshot(&self, now: DateTime<Utc>) -> VmSnapshot {
        let remaining = warden_util::remaining_seconds(self.expires_at, now);
        VmSnapshot {
            id: self.id,
            remote_vmid: self.remote_vmid,
            name: self.name.clone(),
            ip_address: self.ip_address.clone(),
            status: self.status,
            remaining_seconds: remaining,
            remaining_formatted: warden_util::format_remaining(remaining),
        }
    }
}

/// Fields for inserting a fresh VM row; the store assigns the local id.
#[derive(Debug, Clone)]
pub struct NewVm {
    pub user_id: UserId,
    pub remote_vmid: RemoteVmId,
    pub name: String,
    pub status: VmStatus,
    pub expires_at: DateTime<Utc>,
    pub managed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(expires_at: DateTime<Utc>) -> VmRecord {
        VmRecord {
            id: VmId::new(1),
            user_id: UserId::new(7),
            remote_vmid: RemoteVmId::new(501),
            name: "warden-u7".into(),
            ip_address: Some("10.0.0.5".into()),
            status: VmStatus::Running,
            created_at: warden_util::now(),
            last_started_at: None,
            expires_at,
            managed: true,
        }
    }

    #[test]
    fn expiry_is_strict() {
        let now = warden_util::now();
        assert!(!record(now).is_expired(now));
        assert!(record(now - Duration::seconds(1)).is_expired(now));
    }

    #[test]
    fn snapshot_carries_remaining_time() {
        let now = warden_util::now();
        let snapshot = record(now + Duration::hours(4)).snapshot(now);
        assert_eq!(snapshot.remaining_seconds, 4 * 3600);
        assert_eq!(snapshot.remaining_formatted, "4h 0m");
        assert_eq!(snapshot.ip_address.as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn snapshot_of_expired_vm_reads_zero() {
        let now = warden_util::now();
        let snapshot = record(now - Duration::hours(1)).snapshot(now);
        assert_eq!(snapshot.remaining_seconds, 0);
        assert_eq!(snapshot.remaining_formatted, "0h 0m");
    }
}
