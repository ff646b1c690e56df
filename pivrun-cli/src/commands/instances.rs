//! `pivrun instances list|prune|forget`

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use pivrun_core::{registry, InstanceRecord, LivenessProbe, SystemProbe};

use super::home_dir;

/// Inspect and maintain the instance registry.
#[derive(Subcommand, Debug)]
pub enum InstancesCommand {
    /// Show every recorded instance and whether it is still running.
    List(ListArgs),

    /// Remove entries whose process is no longer running.
    Prune,

    /// Drop one entry regardless of liveness.
    Forget(ForgetArgs),
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ForgetArgs {
    /// Isolation folder the entry is keyed by.
    pub isolation_path: PathBuf,
}

pub fn run(cmd: InstancesCommand) -> Result<()> {
    match cmd {
        InstancesCommand::List(args) => list(args),
        InstancesCommand::Prune => prune(),
        InstancesCommand::Forget(args) => forget(args),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InstanceJson<'a> {
    isolation_path: &'a PathBuf,
    live: bool,
    #[serde(flatten)]
    record: &'a InstanceRecord,
}

#[derive(Tabled)]
struct InstanceTableRow {
    #[tabled(rename = "")]
    indicator: String,
    #[tabled(rename = "pid")]
    pid: String,
    #[tabled(rename = "source")]
    source: String,
    #[tabled(rename = "isolation")]
    isolation: String,
    #[tabled(rename = "launched")]
    launched: String,
}

fn list(args: ListArgs) -> Result<()> {
    let home = home_dir()?;
    let registry = registry::load_at(&home).context("failed to load instance registry")?;
    let probe = SystemProbe;

    if args.json {
        let payload: Vec<InstanceJson<'_>> = registry
            .iter()
            .map(|(path, record)| InstanceJson {
                isolation_path: path,
                live: probe.is_record_live(record),
                record,
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).context("failed to serialize instances JSON")?
        );
        return Ok(());
    }

    if registry.is_empty() {
        println!("No instances recorded.");
        return Ok(());
    }

    let mut dead = 0;
    let rows: Vec<InstanceTableRow> = registry
        .iter()
        .map(|(path, record)| {
            let live = probe.is_record_live(record);
            if !live {
                dead += 1;
            }
            InstanceTableRow {
                indicator: if live {
                    "■".green().bold().to_string()
                } else {
                    "■".bright_black().bold().to_string()
                },
                pid: record.process_id.to_string(),
                source: record.source_folder.display().to_string(),
                isolation: path.display().to_string(),
                launched: record
                    .launched_at
                    .map(format_age)
                    .unwrap_or_else(|| "unknown".to_string()),
            }
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    println!("{} recorded | {} not running", registry.len(), dead);
    if dead > 0 {
        println!("Run 'pivrun instances prune' to drop finished instances.");
    }
    Ok(())
}

fn prune() -> Result<()> {
    let home = home_dir()?;
    let outcome =
        registry::prune_at(&home, &SystemProbe).context("failed to prune instance registry")?;
    if outcome.removed.is_empty() {
        println!("✓ nothing to prune ({} running)", outcome.registry.len());
        return Ok(());
    }
    for (path, record) in &outcome.removed {
        println!("  - pid {} {}", record.process_id, path.display());
    }
    println!(
        "✓ pruned {} entr{} ({} running)",
        outcome.removed.len(),
        if outcome.removed.len() == 1 { "y" } else { "ies" },
        outcome.registry.len()
    );
    Ok(())
}

fn forget(args: ForgetArgs) -> Result<()> {
    let home = home_dir()?;
    let removed = registry::remove_at(&home, &args.isolation_path)
        .context("failed to update instance registry")?;
    match removed {
        Some(record) => {
            println!(
                "✓ forgot pid {} ({})",
                record.process_id,
                args.isolation_path.display()
            );
            Ok(())
        }
        None => bail!(
            "no instance recorded for {}",
            args.isolation_path.display()
        ),
    }
}

fn format_age(timestamp: DateTime<Utc>) -> String {
    let seconds = Utc::now()
        .signed_duration_since(timestamp)
        .num_seconds()
        .max(0) as u64;
    let age = if seconds < 60 {
        format!("{seconds}s")
    } else if seconds < 60 * 60 {
        format!("{}m", seconds / 60)
    } else if seconds < 60 * 60 * 24 {
        format!("{}h", seconds / (60 * 60))
    } else {
        format!("{}d", seconds / (60 * 60 * 24))
    };
    format!("{age} ago")
}
