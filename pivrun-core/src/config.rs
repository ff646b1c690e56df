//! YAML configuration at `<home>/.pivrun/config.yaml`.
//!
//! Every field has a default, so a missing file, an empty file, or a file
//! that sets only a few keys are all valid. CLI flags override file values.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::registry::pivrun_root;
use crate::types::{default_injection_sequence, FieldValue, InjectionStep};

pub const CONFIG_FILE: &str = "config.yaml";

/// Default isolation root directory name under the system temp directory.
pub const ISOLATION_ROOT_NAME: &str = "pivrun-isolation";

/// Effective configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub target: TargetConfig,
    pub isolation: IsolationConfig,
    pub settle: SettleConfig,
    pub indices: IndexConfig,
    pub scan: ScanConfig,
    pub channel: ChannelConfig,
    /// Ordered field-injection protocol.
    pub injection: InjectionConfig,
    /// Give every work item its own `<output>/<source folder name>` directory.
    pub per_item_output: bool,
}

/// How to start the target application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("PIV"),
            args: Vec::new(),
        }
    }
}

/// Where isolation folders are created and which variables point at them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationConfig {
    /// `None` means `<system temp dir>/pivrun-isolation`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    /// Scratch-directory environment variables redirected per instance.
    pub env_vars: Vec<String>,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            root: None,
            env_vars: vec!["TEMP".into(), "TMP".into(), "TMPDIR".into()],
        }
    }
}

impl IsolationConfig {
    pub fn resolved_root(&self) -> PathBuf {
        self.root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(ISOLATION_ROOT_NAME))
    }
}

/// Fixed waits standing in for a readiness signal the target does not offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    #[serde(with = "humantime_serde")]
    pub after_spawn: Duration,
    #[serde(with = "humantime_serde")]
    pub after_load: Duration,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            after_spawn: Duration::from_secs(5),
            after_load: Duration::from_secs(5),
        }
    }
}

/// First/last sequence-index values typed into the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub first_index: u64,
    /// Last index written is `final_index - last_index_offset` (saturating).
    pub last_index_offset: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            first_index: 1,
            last_index_offset: 1,
        }
    }
}

impl IndexConfig {
    pub fn last_index(&self, final_index: u64) -> u64 {
        final_index.saturating_sub(self.last_index_offset)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Image extension without the dot, matched case-insensitively.
    pub extension: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extension: "bmp".into(),
        }
    }
}

/// Keystroke helper used by the field-injection channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub program: PathBuf,
    /// Key name sent for field navigation.
    pub navigate_key: String,
    /// Key name sent for each named action.
    pub actions: BTreeMap<String, String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("xdotool"),
            navigate_key: "Tab".into(),
            actions: [
                ("load".to_string(), "Return".to_string()),
                ("start".to_string(), "Return".to_string()),
            ]
            .into_iter()
            .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionConfig {
    pub steps: Vec<InjectionStep>,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            steps: default_injection_sequence(),
        }
    }
}

impl Config {
    /// Reject configurations that cannot drive a launch.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.program.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("target.program must not be empty".into()));
        }
        if self.scan.extension.trim_start_matches('.').is_empty() {
            return Err(ConfigError::Invalid("scan.extension must not be empty".into()));
        }
        for step in &self.injection.steps {
            if let InjectionStep::Trigger { action } = step {
                if !self.channel.actions.contains_key(action) {
                    return Err(ConfigError::Invalid(format!(
                        "injection step triggers '{action}' but channel.actions has no key for it"
                    )));
                }
            }
        }
        let writes_last = self
            .injection
            .steps
            .iter()
            .any(|s| matches!(s, InjectionStep::Write { value: FieldValue::LastIndex }));
        if !writes_last {
            tracing::warn!("injection sequence never writes last_index");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// `<home>/.pivrun/config.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    pivrun_root(home).join(CONFIG_FILE)
}

/// Load the config, falling back to defaults when the file does not exist.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    let path = config_path_at(home);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(source) => return Err(ConfigError::Io { path, source }),
    };
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config =
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })?;
    config.validate()?;
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&home()?)
}

/// Result of [`init_at`].
#[derive(Debug, Clone, PartialEq)]
pub struct InitOutcome {
    pub path: PathBuf,
    pub config: Config,
    /// `false` when a config file was already in place.
    pub created: bool,
}

/// Write the default config if no config file exists yet.
///
/// Idempotent: an existing file is loaded and returned unchanged. The
/// defaults go to a uniquely named temp file that is moved into place only
/// if nothing else got there first, so concurrent inits never clobber each
/// other.
pub fn init_at(home: &Path) -> Result<InitOutcome, ConfigError> {
    let path = config_path_at(home);
    let dir = pivrun_root(home);
    std::fs::create_dir_all(&dir).map_err(|source| ConfigError::Io {
        path: dir.clone(),
        source,
    })?;

    let config = Config::default();
    let yaml = serde_yaml::to_string(&config)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".config.")
        .suffix(".yaml.tmp")
        .tempfile_in(&dir)
        .map_err(|source| ConfigError::Io {
            path: dir.clone(),
            source,
        })?;
    tmp.write_all(yaml.as_bytes())
        .map_err(|source| ConfigError::Io {
            path: tmp.path().to_path_buf(),
            source,
        })?;

    match tmp.persist_noclobber(&path) {
        Ok(_) => Ok(InitOutcome {
            path,
            config,
            created: true,
        }),
        Err(err) if err.error.kind() == std::io::ErrorKind::AlreadyExists => {
            let config = load_at(home)?;
            Ok(InitOutcome {
                path,
                config,
                created: false,
            })
        }
        Err(err) => Err(ConfigError::Io {
            path,
            source: err.error,
        }),
    }
}

/// `init_at` convenience wrapper.
pub fn init() -> Result<InitOutcome, ConfigError> {
    init_at(&home()?)
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}
