//! `pivrun run`: launch one target instance per work item.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use pivrun_core::{config, InstanceRecord};
use pivrun_launch::{ChannelCall, InstanceLauncher, ItemOutcome, Orchestrator, RunReport};
use pivrun_scanner::ScanOptions;

use super::home_dir;

/// Arguments for `pivrun run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Folder whose immediate subfolders hold image sequences.
    pub parent: PathBuf,

    /// Destination folder passed to every instance.
    pub output: PathBuf,

    /// First sequence index typed into the target (overrides `indices.first_index`).
    #[arg(long, value_name = "N")]
    pub first_index: Option<u64>,

    /// Give every work item its own `<output>/<folder name>` directory.
    #[arg(long)]
    pub per_item_output: bool,

    /// Show what would be launched. Reads the registry but writes nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let mut config = config::load_at(&home).context("failed to load config")?;
        if let Some(first) = self.first_index {
            config.indices.first_index = first;
        }
        if self.per_item_output {
            config.per_item_output = true;
        }

        let output = absolute(&self.output)?;
        tracing::debug!(
            parent = %self.parent.display(),
            output = %output.display(),
            dry_run = self.dry_run,
            "effective run settings",
        );
        let launcher =
            InstanceLauncher::from_config(&config).context("invalid isolation root")?;
        let scan_options = ScanOptions {
            extension: config.scan.extension.clone(),
        };
        let mut orchestrator =
            Orchestrator::new(&home, scan_options, launcher).with_dry_run(self.dry_run);

        let report = orchestrator
            .run(&self.parent, &output)
            .with_context(|| format!("run failed for {}", self.parent.display()))?;

        if self.json {
            print_json(&report)?;
        } else {
            print_table(&report);
        }
        Ok(())
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("could not determine current directory")?;
    Ok(cwd.join(path))
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct RunReportJson<'a> {
    dry_run: bool,
    summary: RunSummaryJson,
    items: Vec<ItemJson<'a>>,
    skipped_folders: Vec<SkippedFolderJson<'a>>,
    pruned: &'a [PathBuf],
}

#[derive(Serialize)]
struct RunSummaryJson {
    items: usize,
    launched: usize,
    warned: usize,
    skipped: usize,
}

#[derive(Serialize)]
struct ItemJson<'a> {
    source_folder: &'a Path,
    name_prefix: &'a str,
    final_index: u64,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    isolation_path: Option<&'a Path>,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<&'a InstanceRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_folder: Option<&'a Path>,
    #[serde(skip_serializing_if = "Option::is_none")]
    calls: Option<&'a [ChannelCall]>,
}

#[derive(Serialize)]
struct SkippedFolderJson<'a> {
    path: &'a Path,
    reason: &'a str,
}

fn print_json(report: &RunReport) -> Result<()> {
    let items = report
        .items
        .iter()
        .map(|r| {
            let mut json = ItemJson {
                source_folder: &r.item.folder_path,
                name_prefix: &r.item.name_prefix,
                final_index: r.item.final_index,
                status: outcome_key(&r.outcome),
                isolation_path: None,
                record: None,
                detail: None,
                output_folder: None,
                calls: None,
            };
            match &r.outcome {
                ItemOutcome::Launched {
                    isolation_path,
                    record,
                } => {
                    json.isolation_path = Some(isolation_path.as_path());
                    json.record = Some(record);
                }
                ItemOutcome::Warned {
                    isolation_path,
                    record,
                    warning,
                } => {
                    json.isolation_path = Some(isolation_path.as_path());
                    json.record = Some(record);
                    json.detail = Some(warning.as_str());
                }
                ItemOutcome::Skipped { reason } => json.detail = Some(reason.as_str()),
                ItemOutcome::Planned {
                    output_folder,
                    calls,
                } => {
                    json.output_folder = Some(output_folder.as_path());
                    json.calls = Some(calls.as_slice());
                }
            }
            json
        })
        .collect();

    let payload = RunReportJson {
        dry_run: report.dry_run,
        summary: RunSummaryJson {
            items: report.items.len(),
            launched: report.launched(),
            warned: report.warned(),
            skipped: report.skipped(),
        },
        items,
        skipped_folders: report
            .skipped_folders
            .iter()
            .map(|s| SkippedFolderJson {
                path: &s.path,
                reason: &s.reason,
            })
            .collect(),
        pruned: &report.pruned,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize run JSON")?
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

#[derive(Tabled)]
struct RunTableRow {
    #[tabled(rename = "folder")]
    folder: String,
    #[tabled(rename = "prefix")]
    prefix: String,
    #[tabled(rename = "final")]
    final_index: u64,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "detail")]
    detail: String,
}

fn print_table(report: &RunReport) {
    let prefix = if report.dry_run { "[dry-run] " } else { "" };

    for skipped in &report.skipped_folders {
        println!(
            "{} {} ({})",
            "skipped folder".yellow().bold(),
            skipped.path.display(),
            skipped.reason
        );
    }

    if report.nothing_to_do() {
        println!("{prefix}nothing to do");
        return;
    }

    let rows: Vec<RunTableRow> = report
        .items
        .iter()
        .map(|r| RunTableRow {
            folder: r.item.folder_name(),
            prefix: r.item.name_prefix.clone(),
            final_index: r.item.final_index,
            status: outcome_label(&r.outcome),
            detail: outcome_detail(&r.outcome),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if !report.pruned.is_empty() {
        let verb = if report.dry_run { "would prune" } else { "pruned" };
        println!("{prefix}{verb} {} finished instance(s)", report.pruned.len());
    }
    if report.dry_run {
        println!("{prefix}{} item(s) would be launched", report.items.len());
    } else {
        println!(
            "✓ {} launched | {} with warnings | {} skipped",
            report.launched(),
            report.warned(),
            report.skipped()
        );
    }
}

fn outcome_key(outcome: &ItemOutcome) -> &'static str {
    match outcome {
        ItemOutcome::Launched { .. } => "launched",
        ItemOutcome::Warned { .. } => "warned",
        ItemOutcome::Skipped { .. } => "skipped",
        ItemOutcome::Planned { .. } => "planned",
    }
}

fn outcome_label(outcome: &ItemOutcome) -> String {
    match outcome {
        ItemOutcome::Launched { .. } => "LAUNCHED".green().bold().to_string(),
        ItemOutcome::Warned { .. } => "WARNED".yellow().bold().to_string(),
        ItemOutcome::Skipped { .. } => "SKIPPED".red().bold().to_string(),
        ItemOutcome::Planned { .. } => "PLANNED".cyan().bold().to_string(),
    }
}

fn outcome_detail(outcome: &ItemOutcome) -> String {
    match outcome {
        ItemOutcome::Launched {
            isolation_path,
            record,
        } => format!("pid {} in {}", record.process_id, isolation_path.display()),
        ItemOutcome::Warned {
            record, warning, ..
        } => format!("pid {}: {warning}", record.process_id),
        ItemOutcome::Skipped { reason } => reason.clone(),
        ItemOutcome::Planned {
            output_folder,
            calls,
        } => format!("{} -> {} keystroke call(s)", output_folder.display(), calls.len()),
    }
}
