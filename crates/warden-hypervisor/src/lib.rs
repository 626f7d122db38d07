//! Hypervisor control-plane client for vmwarden
//!
//! The `Hypervisor` trait is the seam between the lifecycle orchestrator and
//! the cluster: `ProxmoxClient` implements it over authenticated HTTPS,
//! `MockHypervisor` implements it for tests. `TaskWaiter` turns the one
//! asynchronous remote operation (clone) into a bounded, cancellable wait.

mod mock;
mod proxmox;
mod task;
mod traits;

pub use mock::*;
pub use proxmox::*;
pub use task::*;
pub use traits::*;

use thiserror::Error;

/// Errors from hypervisor operations
#[derive(Debug, Error)]
pub enum HypervisorError {
    /// Could not reach the control plane at all (DNS, TLS, connect, timeout)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The control plane answered with a non-success status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The referenced VM or task no longer exists on the cluster
    #[error("Not found: {0}")]
    NotFound(String),

    /// A response arrived but did not have the expected shape
    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for HypervisorError {
    fn from(e: reqwest::Error) -> Self {
        HypervisorError::Transport(e.to_string())
    }
}

pub type HvResult<T> = Result<T, HypervisorError>;
