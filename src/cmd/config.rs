//! Configuration view and validation commands: `boardsync config`.

use anyhow::{Context, Result};
use boardsync::config::SyncConfig;

use super::{config_path, load_config};
use crate::{Cli, ConfigCommands};

pub fn cmd_config(cli: &Cli, command: Option<ConfigCommands>) -> Result<()> {
    let path = config_path(cli);

    match command {
        None | Some(ConfigCommands::Show) => {
            if path.exists() {
                println!("# Config file: {}", path.display());
            } else {
                println!("# No config file at {}; using defaults", path.display());
            }
            println!("# Effective values (with env/CLI overrides)");
            println!();

            let config = load_config(cli)?;
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            print!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            if !path.exists() {
                println!("No config file at {}. Using defaults (valid).", path.display());
                return Ok(());
            }

            let config = SyncConfig::load(&path)?;
            let warnings = config.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init) => {
            if path.exists() {
                println!("{} already exists.", path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            SyncConfig::default().save(&path)?;
            println!("Created {}", path.display());
        }
    }

    Ok(())
}
