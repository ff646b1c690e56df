//! Batch runs against fake collaborators.
//!
//! The spawner hands out fixed pids, the probe knows exactly those pids, and
//! the channel records keystrokes, so nothing here starts a real process.

use std::cell::RefCell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use pivrun_core::config::Config;
use pivrun_core::{registry, InstanceRecord, ProcessId, StaticProbe};
use pivrun_launch::{
    ChannelCall, EnvOverrides, FieldChannel, InjectionError, InstanceLauncher, IsolationAllocator,
    ItemOutcome, LaunchSettings, NoWait, Orchestrator, OrchestratorError, RecordingChannel,
    SpawnedProcess, Spawner, TargetCommand,
};
use pivrun_scanner::ScanOptions;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

const FIRST_PID: u32 = 40_001;
const START_TIME: u64 = 1_700_000_000;

#[derive(Default)]
struct SpawnLog {
    envs: Vec<EnvOverrides>,
    fail_on: Vec<usize>,
    /// Replace this registry file with a directory during the first spawn.
    block_registry: Option<PathBuf>,
}

#[derive(Clone, Default)]
struct FakeSpawner(Rc<RefCell<SpawnLog>>);

impl Spawner for FakeSpawner {
    fn spawn(&self, _command: &TargetCommand, env: &EnvOverrides) -> io::Result<SpawnedProcess> {
        let mut log = self.0.borrow_mut();
        let call = log.envs.len();
        log.envs.push(env.clone());
        if log.fail_on.contains(&call) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such program"));
        }
        if let Some(path) = log.block_registry.take() {
            block_registry(&path);
        }
        Ok(SpawnedProcess {
            pid: ProcessId(FIRST_PID + call as u32),
        })
    }
}

#[derive(Clone, Default)]
struct SharedChannel {
    inner: Rc<RefCell<RecordingChannel>>,
    fail_writes: bool,
}

impl FieldChannel for SharedChannel {
    fn navigate(&mut self, count: u32) -> Result<(), InjectionError> {
        self.inner.borrow_mut().navigate(count)
    }

    fn write(&mut self, text: &str) -> Result<(), InjectionError> {
        if self.fail_writes {
            return Err(InjectionError::Channel("target window not found".into()));
        }
        self.inner.borrow_mut().write(text)
    }

    fn trigger(&mut self, action: &str) -> Result<(), InjectionError> {
        self.inner.borrow_mut().trigger(action)
    }
}

/// Make the registry unreadable and unwritable by putting a directory where
/// the document lives.
fn block_registry(path: &Path) {
    if path.is_file() {
        fs::remove_file(path).expect("remove registry");
    }
    fs::create_dir_all(path).expect("registry dir");
}

struct Fixture {
    home: TempDir,
    data: TempDir,
    out: TempDir,
    iso: TempDir,
    spawner: FakeSpawner,
    channel: SharedChannel,
    config: Config,
}

impl Fixture {
    fn new() -> Self {
        Self {
            home: TempDir::new().expect("home"),
            data: TempDir::new().expect("data"),
            out: TempDir::new().expect("out"),
            iso: TempDir::new().expect("iso"),
            spawner: FakeSpawner::default(),
            channel: SharedChannel::default(),
            config: Config::default(),
        }
    }

    fn folder(&self, name: &str, prefix: &str, last: u64) -> PathBuf {
        let dir = self.data.path().join(name);
        fs::create_dir_all(&dir).expect("mkdir");
        for n in 1..=last {
            fs::write(dir.join(format!("{prefix}{n:06}.bmp")), b"").expect("image");
        }
        dir
    }

    fn orchestrator(&self) -> Orchestrator {
        let probe = (0..8).fold(StaticProbe::new(), |p, i| p.with_process(FIRST_PID + i, START_TIME));
        let launcher = InstanceLauncher::new(
            LaunchSettings::from(&self.config),
            IsolationAllocator::new(self.isolation_root()).expect("allocator"),
        )
        .with_spawner(Box::new(self.spawner.clone()))
        .with_channel(Box::new(self.channel.clone()))
        .with_readiness(Box::new(NoWait))
        .with_probe(Box::new(probe));
        Orchestrator::new(self.home.path(), ScanOptions::default(), launcher)
    }

    fn spawn_count(&self) -> usize {
        self.spawner.0.borrow().envs.len()
    }

    fn isolation_root(&self) -> PathBuf {
        self.iso.path().join("isolation")
    }

    fn isolation_dirs(&self) -> usize {
        match fs::read_dir(self.isolation_root()) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

fn stale_record() -> InstanceRecord {
    InstanceRecord {
        process_id: ProcessId(9999),
        process_start_time: Some(1),
        source_folder: PathBuf::from("/old/source"),
        name_prefix: "old".into(),
        final_index: 3,
        output_folder: PathBuf::from("/old/out"),
        launched_at: None,
    }
}

fn record_of(outcome: &ItemOutcome) -> (&Path, &InstanceRecord) {
    match outcome {
        ItemOutcome::Launched { isolation_path, record }
        | ItemOutcome::Warned { isolation_path, record, .. } => (isolation_path.as_path(), record),
        other => panic!("expected a started instance, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[test]
fn every_item_is_launched_and_recorded_in_discovery_order() {
    let fx = Fixture::new();
    fx.folder("B1", "run", 50);
    fx.folder("B2", "cal", 4);
    fs::create_dir_all(fx.data.path().join("B3-empty")).unwrap();

    let report = fx.orchestrator().run(fx.data.path(), fx.out.path()).expect("run");

    assert_eq!(report.items.len(), 2);
    assert_eq!(report.launched(), 2);
    assert!(report.items[0].item.folder_path.ends_with("B1"));
    assert!(report.items[1].item.folder_path.ends_with("B2"));

    let registry = registry::load_at(fx.home.path()).expect("load");
    assert_eq!(registry.len(), 2);
    for item in &report.items {
        let (iso, record) = record_of(&item.outcome);
        assert!(iso.is_dir());
        assert_eq!(registry.get(iso), Some(record));
        assert_eq!(record.process_start_time, Some(START_TIME));
        assert_eq!(record.output_folder, fx.out.path());
        assert!(record.launched_at.is_some());
    }
    let (iso_a, _) = record_of(&report.items[0].outcome);
    let (iso_b, _) = record_of(&report.items[1].outcome);
    assert_ne!(iso_a, iso_b);
}

#[test]
fn scratch_variables_point_at_each_isolation_folder() {
    let fx = Fixture::new();
    fx.folder("B1", "run", 2);

    let report = fx.orchestrator().run(fx.data.path(), fx.out.path()).expect("run");
    let (iso, _) = record_of(&report.items[0].outcome);

    let log = fx.spawner.0.borrow();
    let env = &log.envs[0];
    for var in ["TEMP", "TMP", "TMPDIR"] {
        assert_eq!(env.get(var).map(PathBuf::from).as_deref(), Some(iso), "{var}");
    }
}

#[test]
fn fields_are_typed_with_last_index_one_below_final() {
    let fx = Fixture::new();
    let b1 = fx.folder("B1", "run", 50);

    fx.orchestrator().run(fx.data.path(), fx.out.path()).expect("run");

    let calls = fx.channel.inner.borrow().calls().to_vec();
    let writes: Vec<_> = calls
        .iter()
        .filter_map(|c| match c {
            ChannelCall::Write(text) => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        writes,
        [
            b1.display().to_string(),
            "run".to_string(),
            "1".to_string(),
            "49".to_string(),
            fx.out.path().display().to_string(),
        ]
    );
    assert_eq!(calls.last(), Some(&ChannelCall::Trigger("start".into())));
}

#[test]
fn stale_entries_are_pruned_before_launch() {
    let fx = Fixture::new();
    fx.folder("B1", "run", 2);
    registry::record_at(fx.home.path(), PathBuf::from("/tmp/iso1"), stale_record()).unwrap();

    let report = fx.orchestrator().run(fx.data.path(), fx.out.path()).expect("run");

    assert_eq!(report.pruned, vec![PathBuf::from("/tmp/iso1")]);
    let registry = registry::load_at(fx.home.path()).unwrap();
    assert!(registry.get(Path::new("/tmp/iso1")).is_none());
    assert_eq!(registry.len(), 1);
}

#[test]
fn per_item_output_creates_a_folder_per_source() {
    let mut fx = Fixture::new();
    fx.config.per_item_output = true;
    fx.folder("B1", "run", 2);

    let report = fx.orchestrator().run(fx.data.path(), fx.out.path()).expect("run");
    let (_, record) = record_of(&report.items[0].outcome);

    let expected = fx.out.path().join("B1");
    assert!(expected.is_dir());
    assert_eq!(record.output_folder, expected);
}

// ---------------------------------------------------------------------------
// Nothing to do / dry run
// ---------------------------------------------------------------------------

#[test]
fn empty_parent_is_nothing_to_do() {
    let fx = Fixture::new();
    fs::create_dir_all(fx.data.path().join("empty")).unwrap();

    let report = fx.orchestrator().run(fx.data.path(), fx.out.path()).expect("run");

    assert!(report.nothing_to_do());
    assert_eq!(fx.spawn_count(), 0);
    assert!(!registry::registry_path_at(fx.home.path()).exists());
}

#[test]
fn dry_run_plans_without_spawning() {
    let fx = Fixture::new();
    fx.folder("B1", "run", 5);

    let report = fx
        .orchestrator()
        .with_dry_run(true)
        .run(fx.data.path(), fx.out.path())
        .expect("run");

    assert!(report.dry_run);
    assert_eq!(fx.spawn_count(), 0);
    assert_eq!(fx.isolation_dirs(), 0);
    match &report.items[0].outcome {
        ItemOutcome::Planned { output_folder, calls } => {
            assert_eq!(output_folder, fx.out.path());
            assert!(calls.contains(&ChannelCall::Write("4".into())));
        }
        other => panic!("expected Planned, got {other:?}"),
    }
    assert!(registry::load_at(fx.home.path()).unwrap().is_empty());
}

#[test]
fn dry_run_reports_stale_entries_and_writes_nothing() {
    let fx = Fixture::new();
    fx.folder("B1", "run", 5);
    registry::record_at(fx.home.path(), PathBuf::from("/tmp/iso1"), stale_record()).unwrap();
    let path = registry::registry_path_at(fx.home.path());
    let before = fs::read(&path).unwrap();

    let report = fx
        .orchestrator()
        .with_dry_run(true)
        .run(fx.data.path(), fx.out.path())
        .expect("run");

    assert_eq!(report.pruned, vec![PathBuf::from("/tmp/iso1")]);
    assert_eq!(fs::read(&path).unwrap(), before);
    assert!(!fx.isolation_root().exists());
}

#[test]
fn dry_run_on_fresh_home_creates_no_files() {
    let fx = Fixture::new();
    fx.folder("B1", "run", 5);

    let report = fx
        .orchestrator()
        .with_dry_run(true)
        .run(fx.data.path(), fx.out.path())
        .expect("run");

    assert_eq!(report.items.len(), 1);
    assert!(!fx.home.path().join(".pivrun").exists());
    assert!(!fx.isolation_root().exists());
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn spawn_failure_skips_only_that_item() {
    let fx = Fixture::new();
    fx.folder("B1", "run", 2);
    fx.folder("B2", "run", 2);
    fx.spawner.0.borrow_mut().fail_on.push(0);

    let report = fx.orchestrator().run(fx.data.path(), fx.out.path()).expect("run");

    assert!(matches!(&report.items[0].outcome, ItemOutcome::Skipped { reason } if reason.contains("spawn")));
    assert!(matches!(report.items[1].outcome, ItemOutcome::Launched { .. }));
    assert_eq!(registry::load_at(fx.home.path()).unwrap().len(), 1);
    // The unused isolation folder is released.
    assert_eq!(fx.isolation_dirs(), 1);
}

#[test]
fn injection_failure_keeps_the_record() {
    let mut fx = Fixture::new();
    fx.channel.fail_writes = true;
    fx.folder("B1", "run", 2);

    let report = fx.orchestrator().run(fx.data.path(), fx.out.path()).expect("run");

    match &report.items[0].outcome {
        ItemOutcome::Warned { isolation_path, warning, .. } => {
            assert!(warning.contains("target window not found"), "got: {warning}");
            let registry = registry::load_at(fx.home.path()).unwrap();
            assert!(registry.get(isolation_path).is_some());
        }
        other => panic!("expected Warned, got {other:?}"),
    }
    assert_eq!(report.warned(), 1);
}

#[test]
fn corrupt_registry_halts_before_any_launch() {
    let fx = Fixture::new();
    fx.folder("B1", "run", 2);
    let path = registry::registry_path_at(fx.home.path());
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "{ not json").unwrap();

    let err = fx.orchestrator().run(fx.data.path(), fx.out.path()).unwrap_err();

    assert!(matches!(err, OrchestratorError::Registry(ref e) if e.is_corrupt()), "got: {err}");
    assert_eq!(fx.spawn_count(), 0);
    assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
}

#[test]
fn missing_parent_fails_the_run() {
    let fx = Fixture::new();
    let err = fx
        .orchestrator()
        .run(&fx.data.path().join("missing"), fx.out.path())
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Scan(_)));
}

#[test]
fn unreadable_registry_skips_items_and_the_batch_goes_on() {
    let fx = Fixture::new();
    fx.folder("B1", "run", 2);
    fx.folder("B2", "run", 2);
    block_registry(&registry::registry_path_at(fx.home.path()));

    let report = fx.orchestrator().run(fx.data.path(), fx.out.path()).expect("run");

    assert_eq!(report.items.len(), 2);
    for item in &report.items {
        assert!(
            matches!(&item.outcome, ItemOutcome::Skipped { reason } if reason.contains("could not be pruned")),
            "got {:?}",
            item.outcome
        );
    }
    assert_eq!(report.skipped(), 2);
    assert_eq!(fx.spawn_count(), 0);
    assert_eq!(fx.isolation_dirs(), 0);
}

#[test]
fn record_failure_after_spawn_warns_and_keeps_the_instance() {
    let fx = Fixture::new();
    fx.folder("B1", "run", 2);
    fx.folder("B2", "run", 2);
    let path = registry::registry_path_at(fx.home.path());
    fx.spawner.0.borrow_mut().block_registry = Some(path);

    let report = fx.orchestrator().run(fx.data.path(), fx.out.path()).expect("run");

    match &report.items[0].outcome {
        ItemOutcome::Warned { isolation_path, record, warning } => {
            assert!(warning.contains("running but not recorded"), "got: {warning}");
            assert_eq!(record.process_id, ProcessId(FIRST_PID));
            assert!(isolation_path.is_dir());
        }
        other => panic!("expected Warned, got {other:?}"),
    }
    // The batch still reaches the next item; with the registry blocked it
    // cannot be pruned, so it is skipped rather than launched blind.
    assert_eq!(report.items.len(), 2);
    assert!(matches!(report.items[1].outcome, ItemOutcome::Skipped { .. }));
    assert_eq!(fx.spawn_count(), 1);
    assert_eq!(fx.isolation_dirs(), 1);
}
