//! Batch driver: scan once, then prune, launch and record each work item
//! in discovery order.
//!
//! Items are processed strictly one after another. A failure on one item is
//! reported in its [`ItemOutcome`] and the batch moves on; the only thing
//! that stops a run part-way is a registry document that cannot be parsed.

use std::path::{Path, PathBuf};

use pivrun_core::{registry, InstanceRecord, RegistryError, WorkItem};
use pivrun_scanner::{scan, ScanOptions, SkippedFolder};

use crate::error::OrchestratorError;
use crate::injection::{run_sequence, ChannelCall, FieldValues, RecordingChannel};
use crate::launcher::InstanceLauncher;
use crate::readiness::NoWait;

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// What happened to one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Started, fields written, recorded.
    Launched {
        isolation_path: PathBuf,
        record: InstanceRecord,
    },
    /// Started, but injection or recording went wrong.
    Warned {
        isolation_path: PathBuf,
        record: InstanceRecord,
        warning: String,
    },
    /// Not started.
    Skipped { reason: String },
    /// Dry run: what would have been typed into the target.
    Planned {
        output_folder: PathBuf,
        calls: Vec<ChannelCall>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    pub item: WorkItem,
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub items: Vec<ItemReport>,
    /// Subfolders the scan could not read.
    pub skipped_folders: Vec<SkippedFolder>,
    /// Isolation paths of registry entries removed as dead during the run.
    /// A dry run lists the ones a real run would remove.
    pub pruned: Vec<PathBuf>,
    pub dry_run: bool,
}

impl RunReport {
    /// No work items were discovered.
    pub fn nothing_to_do(&self) -> bool {
        self.items.is_empty()
    }

    pub fn launched(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Launched { .. }))
    }

    pub fn warned(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Warned { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Skipped { .. }))
    }

    fn count(&self, pred: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|r| pred(&r.outcome)).count()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    home: PathBuf,
    scan_options: ScanOptions,
    launcher: InstanceLauncher,
    dry_run: bool,
}

impl Orchestrator {
    /// `home` locates the registry (`<home>/.pivrun/instances.json`).
    pub fn new(
        home: impl Into<PathBuf>,
        scan_options: ScanOptions,
        launcher: InstanceLauncher,
    ) -> Self {
        Self {
            home: home.into(),
            scan_options,
            launcher,
            dry_run: false,
        }
    }

    /// Report what would be launched without starting anything. A dry run
    /// only reads the registry and never creates isolation folders.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn run(&mut self, parent: &Path, output: &Path) -> Result<RunReport, OrchestratorError> {
        let scanned = scan(parent, &self.scan_options)?;
        let mut report = RunReport {
            skipped_folders: scanned.skipped,
            dry_run: self.dry_run,
            ..RunReport::default()
        };

        if scanned.items.is_empty() {
            tracing::info!(parent = %parent.display(), "no work items found");
            return Ok(report);
        }
        tracing::info!(count = scanned.items.len(), dry_run = self.dry_run, "starting batch");

        if self.dry_run {
            report.pruned = self.stale()?;
            for item in scanned.items {
                let outcome = self.plan(&item, output);
                report.items.push(ItemReport { item, outcome });
            }
            return Ok(report);
        }

        for item in scanned.items {
            let outcome = match self.prune()? {
                Some(removed) => {
                    report.pruned.extend(removed);
                    self.launch_and_record(&item, output)
                }
                None => ItemOutcome::Skipped {
                    reason: "registry could not be pruned".to_string(),
                },
            };
            report.items.push(ItemReport { item, outcome });
        }

        tracing::info!(
            launched = report.launched(),
            warned = report.warned(),
            skipped = report.skipped(),
            "batch finished",
        );
        Ok(report)
    }

    /// `Ok(None)` on a recoverable registry failure, `Err` when the document
    /// is corrupt.
    fn prune(&self) -> Result<Option<Vec<PathBuf>>, OrchestratorError> {
        match registry::prune_at(&self.home, self.launcher.probe()) {
            Ok(outcome) => Ok(Some(outcome.removed.into_iter().map(|(path, _)| path).collect())),
            Err(err @ RegistryError::Corrupt { .. }) => Err(err.into()),
            Err(err) => {
                tracing::warn!(error = %err, "registry prune failed");
                Ok(None)
            }
        }
    }

    /// Dry-run counterpart of [`prune`](Self::prune): the entries a prune
    /// would drop, with the registry left untouched.
    fn stale(&self) -> Result<Vec<PathBuf>, OrchestratorError> {
        match registry::stale_at(&self.home, self.launcher.probe()) {
            Ok(stale) => Ok(stale.into_iter().map(|(path, _)| path).collect()),
            Err(err @ RegistryError::Corrupt { .. }) => Err(err.into()),
            Err(err) => {
                tracing::warn!(error = %err, "registry could not be read");
                Ok(Vec::new())
            }
        }
    }

    fn launch_and_record(&mut self, item: &WorkItem, output: &Path) -> ItemOutcome {
        let launch = match self.launcher.launch(item, output) {
            Ok(launch) => launch,
            Err(err) => {
                tracing::warn!(source = %item.folder_path.display(), error = %err, "launch failed");
                return ItemOutcome::Skipped {
                    reason: err.to_string(),
                };
            }
        };

        let recorded =
            registry::record_at(&self.home, launch.isolation_path.clone(), launch.record.clone());

        let mut warnings: Vec<String> = launch.injection_warning.into_iter().collect();
        if let Err(err) = recorded {
            tracing::warn!(
                pid = %launch.record.process_id,
                error = %err,
                "instance running but not recorded",
            );
            warnings.push(format!("running but not recorded: {err}"));
        }

        if warnings.is_empty() {
            ItemOutcome::Launched {
                isolation_path: launch.isolation_path,
                record: launch.record,
            }
        } else {
            ItemOutcome::Warned {
                isolation_path: launch.isolation_path,
                record: launch.record,
                warning: warnings.join("; "),
            }
        }
    }

    fn plan(&self, item: &WorkItem, output: &Path) -> ItemOutcome {
        let settings = self.launcher.settings();
        let output_folder = settings.output_folder_for(item, output);
        let values = FieldValues::new(item, &output_folder, &settings.indices);
        let mut channel = RecordingChannel::new();
        if let Err(err) = run_sequence(&settings.steps, &values, &mut channel, &NoWait) {
            return ItemOutcome::Skipped {
                reason: err.to_string(),
            };
        }
        ItemOutcome::Planned {
            output_folder,
            calls: channel.take(),
        }
    }
}
