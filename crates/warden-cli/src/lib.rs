//! Shared wiring for the vmwarden binaries

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use warden_config::Settings;
use warden_core::Orchestrator;
use warden_hypervisor::{Hypervisor, ProxmoxClient};
use warden_store::SqliteStore;

/// Initialize logging; `RUST_LOG` overrides the flag.
pub fn init_tracing(log_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Open the record store and hypervisor client and wire the orchestrator.
pub fn build_components(settings: &Settings) -> Result<(Arc<SqliteStore>, Arc<Orchestrator>)> {
    let store = Arc::new(
        SqliteStore::open(&settings.service.db_path).with_context(|| {
            format!("Failed to open database {:?}", settings.service.db_path)
        })?,
    );

    let hypervisor: Arc<dyn Hypervisor> = Arc::new(
        ProxmoxClient::new(&settings.hypervisor)
            .context("Failed to build hypervisor client")?,
    );

    let orchestrator = Arc::new(Orchestrator::new(
        hypervisor,
        store.clone(),
        &settings.lifecycle,
    ));

    Ok((store, orchestrator))
}
