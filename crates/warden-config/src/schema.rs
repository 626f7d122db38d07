//! Raw settings schema (as parsed from TOML) and the validated form

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable consulted when `token_value` is absent from the file,
/// so the secret can be kept out of on-disk settings.
pub const TOKEN_VALUE_ENV_VAR: &str = "WARDEN_TOKEN_VALUE";

/// Raw settings as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawSettings {
    /// Settings schema version
    pub config_version: u32,

    /// Hypervisor endpoint and credentials
    pub hypervisor: RawHypervisor,

    /// Lifecycle tuning
    #[serde(default)]
    pub lifecycle: RawLifecycle,

    /// Service-level settings
    #[serde(default)]
    pub service: RawService,
}

/// Hypervisor connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawHypervisor {
    /// Cluster host name (also embedded in console URLs)
    pub host: String,

    /// Cluster node all VM operations are scoped to
    pub node: String,

    /// API token user, e.g. "warden@pve"
    pub user: String,

    /// API token name
    pub token_name: String,

    /// API token secret; falls back to `WARDEN_TOKEN_VALUE`
    pub token_value: Option<String>,

    /// Verify the cluster's TLS certificate (clusters commonly self-sign)
    #[serde(default)]
    pub verify_tls: bool,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Lifecycle tuning knobs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawLifecycle {
    /// Seconds between polls of a long-running hypervisor task
    #[serde(default = "default_task_poll_interval_secs")]
    pub task_poll_interval_secs: u64,

    /// Seconds before a long-running hypervisor task is abandoned
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// Seconds to let a graceful shutdown settle before delete
    #[serde(default = "default_stop_settle_secs")]
    pub stop_settle_secs: u64,

    /// Seconds the admin fleet view stays cached
    #[serde(default = "default_fleet_cache_ttl_secs")]
    pub fleet_cache_ttl_secs: u64,
}

impl Default for RawLifecycle {
    fn default() -> Self {
        Self {
            task_poll_interval_secs: default_task_poll_interval_secs(),
            task_timeout_secs: default_task_timeout_secs(),
            stop_settle_secs: default_stop_settle_secs(),
            fleet_cache_ttl_secs: default_fleet_cache_ttl_secs(),
        }
    }
}

/// Service-level settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawService {
    /// Record store path
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for RawService {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_task_poll_interval_secs() -> u64 {
    2
}

fn default_task_timeout_secs() -> u64 {
    300
}

fn default_stop_settle_secs() -> u64 {
    5
}

fn default_fleet_cache_ttl_secs() -> u64 {
    30
}

fn default_db_path() -> PathBuf {
    PathBuf::from("warden.db")
}

/// Validated settings used by the rest of the system
#[derive(Debug, Clone)]
pub struct Settings {
    pub hypervisor: HypervisorSettings,
    pub lifecycle: LifecycleSettings,
    pub service: ServiceSettings,
}

/// Validated hypervisor connection settings
#[derive(Debug, Clone)]
pub struct HypervisorSettings {
    pub host: String,
    pub node: String,
    pub user: String,
    pub token_name: String,
    pub token_value: String,
    pub verify_tls: bool,
    pub request_timeout: Duration,
}

/// Validated lifecycle tuning
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub task_poll_interval: Duration,
    pub task_timeout: Duration,
    pub stop_settle: Duration,
    pub fleet_cache_ttl: Duration,
}

/// Validated service settings
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub db_path: PathBuf,
}

impl Settings {
    pub(crate) fn from_raw(raw: RawSettings) -> Self {
        let token_value = raw
            .hypervisor
            .token_value
            .filter(|v| !v.is_empty())
            .or_else(|| std::env::var(TOKEN_VALUE_ENV_VAR).ok())
            .unwrap_or_default();

        Self {
            hypervisor: HypervisorSettings {
                host: raw.hypervisor.host,
                node: raw.hypervisor.node,
                user: raw.hypervisor.user,
                token_name: raw.hypervisor.token_name,
                token_value,
                verify_tls: raw.hypervisor.verify_tls,
                request_timeout: Duration::from_secs(raw.hypervisor.request_timeout_secs),
            },
            lifecycle: LifecycleSettings {
                task_poll_interval: Duration::from_secs(raw.lifecycle.task_poll_interval_secs),
                task_timeout: Duration::from_secs(raw.lifecycle.task_timeout_secs),
                stop_settle: Duration::from_secs(raw.lifecycle.stop_settle_secs),
                fleet_cache_ttl: Duration::from_secs(raw.lifecycle.fleet_cache_ttl_secs),
            },
            service: ServiceSettings {
                db_path: raw.service.db_path,
            },
        }
    }
}
