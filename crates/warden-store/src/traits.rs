//! Store trait definitions

use chrono::{DateTime, Utc};
use warden_api::{ChallengeView, VmStatus};
use warden_util::{ChallengeId, UserId, VmId};

use crate::{AuditEvent, GlobalConfig, NewVm, StoreResult, VmRecord};

/// Main store trait
pub trait VmStore: Send + Sync {
    // Global config (singleton)

    /// Get the global template config, if an admin has set one
    fn global_config(&self) -> StoreResult<Option<GlobalConfig>>;

    /// Create or replace the global template config
    fn set_global_config(&self, config: &GlobalConfig) -> StoreResult<()>;

    // VM records

    /// Look up a user's VM
    fn vm_for_user(&self, user_id: UserId) -> StoreResult<Option<VmRecord>>;

    /// Look up a VM by local id
    fn vm_by_id(&self, id: VmId) -> StoreResult<Option<VmRecord>>;

    /// Insert a fresh VM row.
    ///
    /// The UNIQUE constraint on `user_id` is the arbiter of one-VM-per-user:
    /// a concurrent create losing the race gets `StoreError::Conflict`, not
    /// a second row.
    fn insert_vm(&self, vm: &NewVm) -> StoreResult<VmRecord>;

    /// Update status, optionally stamping `last_started_at`
    fn update_status(
        &self,
        id: VmId,
        status: VmStatus,
        last_started_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;

    /// Record a discovered guest address
    fn update_ip(&self, id: VmId, ip_address: &str) -> StoreResult<()>;

    /// Delete a VM row. Returns false when the row was already gone,
    /// which callers treat as success.
    fn delete_vm(&self, id: VmId) -> StoreResult<bool>;

    /// All managed VM rows
    fn managed_vms(&self) -> StoreResult<Vec<VmRecord>>;

    /// Managed VM rows whose deadline has passed
    fn expired_managed_vms(&self, now: DateTime<Utc>) -> StoreResult<Vec<VmRecord>>;

    // Challenge VM flags

    /// Set or clear the VM flag for a challenge. Returns whether anything
    /// changed (toggling to the current state is a no-op).
    fn set_challenge_vm(&self, challenge_id: ChallengeId, enabled: bool) -> StoreResult<bool>;

    /// Whether a challenge exposes the VM panel
    fn challenge_vm_enabled(&self, challenge_id: ChallengeId) -> StoreResult<bool>;

    /// All challenges with their VM flags, ordered by id
    fn list_challenges(&self) -> StoreResult<Vec<ChallengeView>>;

    // Platform tables (owned by the embedding platform; modeled here so the
    // store is self-contained for integrations and tests)

    /// Owner display name, if the user row exists
    fn user_name(&self, user_id: UserId) -> StoreResult<Option<String>>;

    /// Seed or update a user row
    fn upsert_user(&self, user_id: UserId, name: &str) -> StoreResult<()>;

    /// Seed or update a challenge row
    fn upsert_challenge(
        &self,
        challenge_id: ChallengeId,
        name: &str,
        category: &str,
    ) -> StoreResult<()>;

    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Health

    /// Check if the store is healthy
    fn is_healthy(&self) -> bool;
}
