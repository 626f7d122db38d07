//! VM lifecycle core for vmwarden
//!
//! Composes the hypervisor client, the task waiter and the record store into
//! the lifecycle state machine (`Orchestrator`), the expiration reaper
//! (`Reaper`) and the admin fleet-view cache (`TtlCache`).
//!
//! Every remote or persistence failure is converted into a `LifecycleError`
//! kind at this boundary; callers never see raw transport or database errors.

mod cache;
mod orchestrator;
mod reaper;

pub use cache::*;
pub use orchestrator::*;
pub use reaper::*;

use thiserror::Error;
use warden_api::{VmSnapshot, VmStatus};
use warden_hypervisor::{HypervisorError, WaitError};
use warden_store::StoreError;

/// Structured, user-visible lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// No global template config has been set by an admin yet
    #[error("VM system is not configured yet")]
    NotConfigured,

    /// The user already owns a VM; carries its current snapshot
    #[error("A VM already exists for this user")]
    AlreadyExists(Box<VmSnapshot>),

    /// No VM for this user / id
    #[error("No VM found")]
    NotFound,

    /// Operation not valid for the VM's current status
    #[error("VM is {0}, operation not allowed")]
    InvalidState(VmStatus),

    /// The deadline has passed; the VM may only be reclaimed
    #[error("VM has expired")]
    Expired,

    /// The hypervisor reported non-OK completion of an async task
    #[error("Hypervisor task failed: {0}")]
    RemoteTaskFailed(String),

    /// The async task outlived the waiting deadline
    #[error("Hypervisor task did not complete in time")]
    RemoteTaskTimedOut,

    /// Transport or auth failure talking to the hypervisor
    #[error("Hypervisor unavailable: {0}")]
    RemoteUnavailable(String),

    /// Local persistence failure
    #[error("Store error: {0}")]
    Store(String),
}

impl From<StoreError> for LifecycleError {
    fn from(e: StoreError) -> Self {
        LifecycleError::Store(e.to_string())
    }
}

impl From<HypervisorError> for LifecycleError {
    fn from(e: HypervisorError) -> Self {
        LifecycleError::RemoteUnavailable(e.to_string())
    }
}

impl From<WaitError> for LifecycleError {
    fn from(e: WaitError) -> Self {
        match e {
            WaitError::Failed(reason) => LifecycleError::RemoteTaskFailed(reason),
            WaitError::TimedOut(_) => LifecycleError::RemoteTaskTimedOut,
            WaitError::Remote(e) => e.into(),
        }
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
