//! warden-reaper - scheduled reclamation entry point
//!
//! Run from cron (or any scheduler): deletes expired managed VMs from the
//! cluster and the record store, one reap pass per invocation. Per-item
//! failures are logged and left for the next run; the exit code stays zero
//! so the schedule does not flap on one stuck VM.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use warden_cli::{build_components, init_tracing};
use warden_config::load_settings;
use warden_core::Reaper;

/// vmwarden expiration reaper
#[derive(Parser, Debug)]
#[command(name = "warden-reaper")]
#[command(about = "Reclaim expired vmwarden VMs", long_about = None)]
struct Args {
    /// Settings file path (or set WARDEN_CONFIG)
    #[arg(short, long, env = "WARDEN_CONFIG", default_value = "warden.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "warden-reaper starting");

    let settings = load_settings(&args.config)
        .with_context(|| format!("Failed to load settings from {:?}", args.config))?;
    let (store, orchestrator) = build_components(&settings)?;

    let reaper = Reaper::new(store, orchestrator);
    let summary = reaper.run_once().await?;

    println!(
        "Reaped {} of {} expired VMs ({} failed)",
        summary.succeeded, summary.attempted, summary.failed
    );

    Ok(())
}
