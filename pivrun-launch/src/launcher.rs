//! Launching one work item.
//!
//! Flow per item:
//! 1. allocate an isolation folder
//! 2. resolve (and with `per_item_output`, create) the output folder
//! 3. spawn the target with its scratch variables pointed at the isolation folder
//! 4. wait for the target to settle
//! 5. play the injection sequence
//! 6. hand back the instance record for the registry
//!
//! Once step 3 succeeds a real process exists, so later failures only
//! produce a warning on the returned [`Launch`].

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use pivrun_core::config::{ChannelConfig, IndexConfig, SettleConfig};
use pivrun_core::{Config, InjectionStep, InstanceRecord, LivenessProbe, SystemProbe, WorkItem};

use crate::error::LaunchError;
use crate::injection::{run_sequence, FieldChannel, FieldValues, XdotoolChannel};
use crate::isolation::IsolationAllocator;
use crate::readiness::{FixedDelay, ReadinessWait, Stage};
use crate::spawn::{CommandSpawner, EnvOverrides, Spawner, TargetCommand};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// The parts of [`Config`] the launcher needs.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSettings {
    pub target: TargetCommand,
    pub env_vars: Vec<String>,
    pub steps: Vec<InjectionStep>,
    pub indices: IndexConfig,
    pub per_item_output: bool,
    pub channel: ChannelConfig,
    pub settle: SettleConfig,
}

impl From<&Config> for LaunchSettings {
    fn from(config: &Config) -> Self {
        Self {
            target: TargetCommand::from(&config.target),
            env_vars: config.isolation.env_vars.clone(),
            steps: config.injection.steps.clone(),
            indices: config.indices,
            per_item_output: config.per_item_output,
            channel: config.channel.clone(),
            settle: config.settle,
        }
    }
}

impl LaunchSettings {
    /// Output folder for `item`: `output_root` itself, or
    /// `<output_root>/<source folder name>` with `per_item_output`.
    pub fn output_folder_for(&self, item: &WorkItem, output_root: &Path) -> PathBuf {
        if self.per_item_output {
            output_root.join(item.folder_name())
        } else {
            output_root.to_path_buf()
        }
    }

    /// Every configured scratch variable pointed at `isolation_path`.
    pub fn env_overrides(&self, isolation_path: &Path) -> EnvOverrides {
        self.env_vars
            .iter()
            .map(|name| (name.clone(), isolation_path.as_os_str().to_owned()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Launch result
// ---------------------------------------------------------------------------

/// A started instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    pub isolation_path: PathBuf,
    pub record: InstanceRecord,
    /// Set when field injection failed after the process started.
    pub injection_warning: Option<String>,
}

// ---------------------------------------------------------------------------
// Launcher
// ---------------------------------------------------------------------------

pub struct InstanceLauncher {
    settings: LaunchSettings,
    allocator: IsolationAllocator,
    spawner: Box<dyn Spawner>,
    channel: Box<dyn FieldChannel>,
    readiness: Box<dyn ReadinessWait>,
    probe: Box<dyn LivenessProbe>,
}

impl InstanceLauncher {
    /// Launcher with the production collaborators: real process spawning,
    /// the configured keystroke helper, and fixed settle delays.
    pub fn from_config(config: &Config) -> Result<Self, LaunchError> {
        let allocator = IsolationAllocator::new(config.isolation.resolved_root())?;
        Ok(Self::new(LaunchSettings::from(config), allocator))
    }

    /// Production collaborators for `settings`; swap any of them with the
    /// `with_*` methods.
    pub fn new(settings: LaunchSettings, allocator: IsolationAllocator) -> Self {
        let channel = XdotoolChannel::new(&settings.channel);
        let readiness = FixedDelay::from(settings.settle);
        Self {
            settings,
            allocator,
            spawner: Box::new(CommandSpawner),
            channel: Box::new(channel),
            readiness: Box::new(readiness),
            probe: Box::new(SystemProbe),
        }
    }

    pub fn with_spawner(mut self, spawner: Box<dyn Spawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn with_channel(mut self, channel: Box<dyn FieldChannel>) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_readiness(mut self, readiness: Box<dyn ReadinessWait>) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_probe(mut self, probe: Box<dyn LivenessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn settings(&self) -> &LaunchSettings {
        &self.settings
    }

    pub fn allocator(&self) -> &IsolationAllocator {
        &self.allocator
    }

    pub fn probe(&self) -> &dyn LivenessProbe {
        self.probe.as_ref()
    }

    /// Start one target instance for `item`.
    pub fn launch(&mut self, item: &WorkItem, output_root: &Path) -> Result<Launch, LaunchError> {
        let isolation_path = self.allocator.allocate()?;

        let output_folder = self.settings.output_folder_for(item, output_root);
        if self.settings.per_item_output {
            if let Err(source) = fs::create_dir_all(&output_folder) {
                release(&isolation_path);
                return Err(LaunchError::Output {
                    path: output_folder,
                    source,
                });
            }
        }

        let env = self.settings.env_overrides(&isolation_path);
        let spawned = match self.spawner.spawn(&self.settings.target, &env) {
            Ok(spawned) => spawned,
            Err(source) => {
                release(&isolation_path);
                return Err(LaunchError::Spawn {
                    program: self.settings.target.program.clone(),
                    source,
                });
            }
        };
        let process_start_time = self.probe.start_time(spawned.pid);
        tracing::info!(
            pid = %spawned.pid,
            source = %item.folder_path.display(),
            isolation = %isolation_path.display(),
            "target instance started",
        );

        self.readiness.wait_for_ready(Stage::AfterSpawn);

        let values = FieldValues::new(item, &output_folder, &self.settings.indices);
        let injection_warning = match run_sequence(
            &self.settings.steps,
            &values,
            self.channel.as_mut(),
            self.readiness.as_ref(),
        ) {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(pid = %spawned.pid, error = %err, "field injection failed");
                Some(err.to_string())
            }
        };

        let record = InstanceRecord {
            process_id: spawned.pid,
            process_start_time,
            source_folder: item.folder_path.clone(),
            name_prefix: item.name_prefix.clone(),
            final_index: item.final_index,
            output_folder,
            launched_at: Some(Utc::now()),
        };

        Ok(Launch {
            isolation_path,
            record,
            injection_warning,
        })
    }
}

/// Drop an isolation folder that never got a process.
fn release(isolation_path: &Path) {
    if let Err(err) = fs::remove_dir(isolation_path) {
        tracing::debug!(path = %isolation_path.display(), error = %err, "cannot remove unused isolation folder");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readiness::NoWait;
    use crate::spawn::SpawnedProcess;
    use pivrun_core::{ProcessId, StaticProbe};
    use rstest::rstest;
    use std::io;
    use tempfile::TempDir;

    struct FixedPid(u32);

    impl Spawner for FixedPid {
        fn spawn(&self, _: &TargetCommand, _: &EnvOverrides) -> io::Result<SpawnedProcess> {
            Ok(SpawnedProcess {
                pid: ProcessId(self.0),
            })
        }
    }

    fn item() -> WorkItem {
        WorkItem {
            folder_path: PathBuf::from("/data/A/B1"),
            name_prefix: "run".into(),
            final_index: 50,
        }
    }

    #[rstest]
    #[case(false, "/out")]
    #[case(true, "/out/B1")]
    fn output_folder_follows_per_item_setting(#[case] per_item: bool, #[case] expected: &str) {
        let mut settings = LaunchSettings::from(&Config::default());
        settings.per_item_output = per_item;
        assert_eq!(
            settings.output_folder_for(&item(), Path::new("/out")),
            PathBuf::from(expected)
        );
    }

    #[test]
    fn env_overrides_cover_every_configured_variable() {
        let mut settings = LaunchSettings::from(&Config::default());
        settings.env_vars = vec!["TEMP".into(), "PIV_SCRATCH".into()];
        let env = settings.env_overrides(Path::new("/iso/piv-1"));
        assert_eq!(env.len(), 2);
        assert_eq!(env["PIV_SCRATCH"], Path::new("/iso/piv-1").as_os_str());
    }

    #[test]
    fn launch_captures_start_time_and_item_fields() {
        let iso = TempDir::new().unwrap();
        let mut launcher = InstanceLauncher::new(
            LaunchSettings::from(&Config::default()),
            IsolationAllocator::new(iso.path()).unwrap(),
        )
        .with_spawner(Box::new(FixedPid(77)))
        .with_channel(Box::new(crate::injection::RecordingChannel::new()))
        .with_readiness(Box::new(NoWait))
        .with_probe(Box::new(StaticProbe::new().with_process(77, 1_234)));

        let launch = launcher.launch(&item(), Path::new("/out")).expect("launch");

        assert!(launch.isolation_path.is_dir());
        assert!(launch.injection_warning.is_none());
        assert_eq!(launch.record.process_id, ProcessId(77));
        assert_eq!(launch.record.process_start_time, Some(1_234));
        assert_eq!(launch.record.name_prefix, "run");
        assert_eq!(launch.record.final_index, 50);
        assert_eq!(launch.record.output_folder, PathBuf::from("/out"));
    }

    #[test]
    fn process_gone_before_probe_leaves_start_time_unset() {
        let iso = TempDir::new().unwrap();
        let mut launcher = InstanceLauncher::new(
            LaunchSettings::from(&Config::default()),
            IsolationAllocator::new(iso.path()).unwrap(),
        )
        .with_spawner(Box::new(FixedPid(78)))
        .with_channel(Box::new(crate::injection::RecordingChannel::new()))
        .with_readiness(Box::new(NoWait))
        .with_probe(Box::new(StaticProbe::new()));

        let launch = launcher.launch(&item(), Path::new("/out")).expect("launch");
        assert_eq!(launch.record.process_start_time, None);
    }
}
