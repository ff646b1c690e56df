//! pivrun: batch launcher for PIV processing runs.
//!
//! # Usage
//!
//! ```text
//! pivrun run <parent> <output> [--first-index N] [--per-item-output] [--dry-run] [--json]
//! pivrun scan <parent> [--extension EXT] [--json]
//! pivrun instances list [--json]
//! pivrun instances prune
//! pivrun instances forget <isolation-path>
//! pivrun config init|show
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    config::ConfigCommand, instances::InstancesCommand, run::RunArgs, scan::ScanArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "pivrun",
    version,
    about = "Launch one isolated PIV instance per image-sequence folder",
    long_about = None,
)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan a parent folder and launch one target instance per work item.
    Run(RunArgs),

    /// List the work items a run would process.
    Scan(ScanArgs),

    /// Inspect and maintain the instance registry.
    Instances {
        #[command(subcommand)]
        command: InstancesCommand,
    },

    /// Manage ~/.pivrun/config.yaml.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Run(args) => args.run(),
        Commands::Scan(args) => args.run(),
        Commands::Instances { command } => commands::instances::run(command),
        Commands::Config { command } => commands::config::run(command),
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
