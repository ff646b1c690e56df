//! `pivrun config init` and `pivrun config show`

use anyhow::{Context, Result};
use clap::Subcommand;

use pivrun_core::config;

use super::home_dir;

/// Manage ~/.pivrun/config.yaml.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write the default config unless one already exists.
    Init,

    /// Print the effective config as YAML.
    Show,
}

pub fn run(cmd: ConfigCommand) -> Result<()> {
    let home = home_dir()?;
    match cmd {
        ConfigCommand::Init => {
            let outcome = config::init_at(&home).context("failed to write config")?;
            if outcome.created {
                println!("✓ wrote default config to {}", outcome.path.display());
            } else {
                println!("✓ config already exists at {}", outcome.path.display());
            }
        }
        ConfigCommand::Show => {
            let config = config::load_at(&home).context("failed to load config")?;
            let yaml = serde_yaml::to_string(&config).context("failed to serialize config")?;
            print!("{yaml}");
        }
    }
    Ok(())
}
