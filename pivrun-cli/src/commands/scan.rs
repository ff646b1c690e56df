//! `pivrun scan`: list the work items under a parent folder.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use pivrun_core::config;
use pivrun_scanner::{scan, ScanOptions, ScanReport};

use super::home_dir;

/// Arguments for `pivrun scan`.
#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Folder whose immediate subfolders hold image sequences.
    pub parent: PathBuf,

    /// Image extension to match (overrides `scan.extension`).
    #[arg(long, value_name = "EXT")]
    pub extension: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ScanArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let config = config::load_at(&home).context("failed to load config")?;
        let options = ScanOptions {
            extension: self.extension.unwrap_or(config.scan.extension),
        };

        let report = scan(&self.parent, &options)
            .with_context(|| format!("scan failed for {}", self.parent.display()))?;

        if self.json {
            print_json(&report, &config.indices)?;
        } else {
            print_table(&report, &config.indices);
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct ScanReportJson<'a> {
    items: Vec<WorkItemJson<'a>>,
    skipped: Vec<SkippedJson<'a>>,
}

#[derive(Serialize)]
struct WorkItemJson<'a> {
    #[serde(flatten)]
    item: &'a pivrun_core::WorkItem,
    first_index: u64,
    last_index: u64,
}

#[derive(Serialize)]
struct SkippedJson<'a> {
    path: &'a std::path::Path,
    reason: &'a str,
}

#[derive(Tabled)]
struct ScanTableRow {
    #[tabled(rename = "folder")]
    folder: String,
    #[tabled(rename = "prefix")]
    prefix: String,
    #[tabled(rename = "final")]
    final_index: u64,
    #[tabled(rename = "typed range")]
    range: String,
}

fn print_json(report: &ScanReport, indices: &config::IndexConfig) -> Result<()> {
    let payload = ScanReportJson {
        items: report
            .items
            .iter()
            .map(|item| WorkItemJson {
                item,
                first_index: indices.first_index,
                last_index: indices.last_index(item.final_index),
            })
            .collect(),
        skipped: report
            .skipped
            .iter()
            .map(|s| SkippedJson {
                path: &s.path,
                reason: &s.reason,
            })
            .collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize scan JSON")?
    );
    Ok(())
}

fn print_table(report: &ScanReport, indices: &config::IndexConfig) {
    if report.items.is_empty() {
        println!("No work items found.");
    } else {
        let rows: Vec<ScanTableRow> = report
            .items
            .iter()
            .map(|item| ScanTableRow {
                folder: item.folder_path.display().to_string(),
                prefix: item.name_prefix.clone(),
                final_index: item.final_index,
                range: format!(
                    "{}..{}",
                    indices.first_index,
                    indices.last_index(item.final_index)
                ),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        println!("{} work item(s)", report.items.len());
    }

    for skipped in &report.skipped {
        println!(
            "{} {} ({})",
            "skipped".yellow().bold(),
            skipped.path.display(),
            skipped.reason
        );
    }
}
