//! wardenctl - admin configuration entry point
//!
//! Sets the global template config and toggles per-challenge VM flags,
//! mirroring what the admin UI does over its own transport.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use warden_cli::{build_components, init_tracing};
use warden_config::load_settings;
use warden_store::GlobalConfig;
use warden_util::{ChallengeId, RemoteVmId};

/// vmwarden admin configuration tool
#[derive(Parser, Debug)]
#[command(name = "wardenctl")]
#[command(about = "Configure the vmwarden VM provisioning system", long_about = None)]
struct Args {
    /// Settings file path (or set WARDEN_CONFIG)
    #[arg(short, long, env = "WARDEN_CONFIG", default_value = "warden.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Set the global template config
    Config {
        /// Remote identity of the clonable template
        template_id: u32,
        /// Display name for the template
        name: String,
        /// Time-to-live for new VMs, in hours
        hours: u32,
    },

    /// Show the current global template config
    ShowConfig,

    /// Enable the VM panel for a challenge
    Enable { challenge_id: i64 },

    /// Disable the VM panel for a challenge
    Disable { challenge_id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let settings = load_settings(&args.config)
        .with_context(|| format!("Failed to load settings from {:?}", args.config))?;
    let (_store, orchestrator) = build_components(&settings)?;

    match args.command {
        Command::Config {
            template_id,
            name,
            hours,
        } => {
            orchestrator.set_config(GlobalConfig {
                template_id: RemoteVmId::new(template_id),
                template_name: name.clone(),
                max_duration_hours: hours,
            })?;
            println!("OK Global config: template={template_id} name={name} hours={hours}");
        }

        Command::ShowConfig => match orchestrator.config()? {
            Some(config) => {
                println!(
                    "template={} name={} hours={}",
                    config.template_id, config.template_name, config.max_duration_hours
                );
            }
            None => println!("VM system not configured yet"),
        },

        Command::Enable { challenge_id } => {
            let changed = orchestrator.set_challenge_vm(ChallengeId::new(challenge_id), true)?;
            if changed {
                println!("OK VM enabled for challenge {challenge_id}");
            } else {
                println!("No change: challenge {challenge_id} VM already enabled");
            }
        }

        Command::Disable { challenge_id } => {
            let changed = orchestrator.set_challenge_vm(ChallengeId::new(challenge_id), false)?;
            if changed {
                println!("OK VM disabled for challenge {challenge_id}");
            } else {
                println!("No change: challenge {challenge_id} VM already disabled");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_subcommand() {
        let args =
            Args::try_parse_from(["wardenctl", "config", "100", "Debian base", "4"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Config { template_id: 100, ref name, hours: 4 } if name == "Debian base"
        ));
    }

    #[test]
    fn parses_challenge_toggles() {
        let args = Args::try_parse_from(["wardenctl", "enable", "11"]).unwrap();
        assert!(matches!(args.command, Command::Enable { challenge_id: 11 }));

        let args = Args::try_parse_from(["wardenctl", "disable", "11"]).unwrap();
        assert!(matches!(args.command, Command::Disable { challenge_id: 11 }));
    }

    #[test]
    fn rejects_missing_arguments() {
        assert!(Args::try_parse_from(["wardenctl", "config", "100"]).is_err());
        assert!(Args::try_parse_from(["wardenctl"]).is_err());
    }
}
