//! Audit event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_api::{PowerAction, ReapSummary};
use warden_util::{ChallengeId, RemoteVmId, UserId};

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Global template config created or updated
    ConfigUpdated {
        template_id: RemoteVmId,
        max_duration_hours: u32,
    },

    /// Challenge VM flag toggled
    ChallengeVmToggled {
        challenge_id: ChallengeId,
        enabled: bool,
    },

    /// VM cloned, started and recorded
    VmCreated {
        user_id: UserId,
        remote_vmid: RemoteVmId,
    },

    /// Power action applied
    PowerApplied {
        remote_vmid: RemoteVmId,
        action: PowerAction,
    },

    /// VM removed remotely and locally
    VmDeleted {
        remote_vmid: RemoteVmId,
        reason: String,
    },

    /// An expiration reap run finished
    ReapCompleted { summary: ReapSummary },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID (assigned by the store)
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0,
            timestamp: warden_util::now(),
            event,
        }
    }
}
