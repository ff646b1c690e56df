//! Domain types for pivrun.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! Registry types serialize to the camelCase JSON document described in
//! [`crate::registry`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Operating-system process identifier of a launched target instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        Self(pid)
    }
}

// ---------------------------------------------------------------------------
// Work items
// ---------------------------------------------------------------------------

/// One input folder plus the parameters derived from its image filenames.
///
/// Produced by the scanner, consumed once by the launcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkItem {
    /// Absolute path to the folder holding the numbered images.
    pub folder_path: PathBuf,
    /// Filename prefix of the lowest-numbered image.
    pub name_prefix: String,
    /// Sequence number of the highest-numbered image.
    pub final_index: u64,
}

impl WorkItem {
    /// Last path component of the source folder, used to name per-item output folders.
    pub fn folder_name(&self) -> String {
        self.folder_path
            .file_name()
            .unwrap_or_else(|| self.folder_path.as_os_str())
            .to_string_lossy()
            .into_owned()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Metadata for one launched target instance.
///
/// Keyed in the [`Registry`] by its isolation folder. Never mutated after
/// creation; entries are only inserted or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRecord {
    pub process_id: ProcessId,
    /// Start time of the process (seconds since the Unix epoch), used to tell
    /// the original process apart from a later one that reused its pid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_start_time: Option<u64>,
    pub source_folder: PathBuf,
    pub name_prefix: String,
    pub final_index: u64,
    pub output_folder: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launched_at: Option<DateTime<Utc>>,
}

/// Mapping of isolation folder to the instance running inside it.
///
/// Serialized as a flat JSON object; a `BTreeMap` keeps the document order
/// stable across saves.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registry {
    pub instances: BTreeMap<PathBuf, InstanceRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn get(&self, isolation_path: &Path) -> Option<&InstanceRecord> {
        self.instances.get(isolation_path)
    }

    /// Insert or overwrite the entry for `isolation_path`.
    pub fn insert(
        &mut self,
        isolation_path: PathBuf,
        record: InstanceRecord,
    ) -> Option<InstanceRecord> {
        self.instances.insert(isolation_path, record)
    }

    pub fn remove(&mut self, isolation_path: &Path) -> Option<InstanceRecord> {
        self.instances.remove(isolation_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &InstanceRecord)> {
        self.instances.iter()
    }
}

impl FromIterator<(PathBuf, InstanceRecord)> for Registry {
    fn from_iter<I: IntoIterator<Item = (PathBuf, InstanceRecord)>>(iter: I) -> Self {
        Self {
            instances: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Injection sequence
// ---------------------------------------------------------------------------

/// Value written into one field of the target application.
///
/// In config files the item-derived values are bare names
/// (`value: last_index`) and a fixed text is a one-key map
/// (`value: {literal: '2'}`). Both forms survive the `step` tag on
/// [`InjectionStep`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FieldValueRepr", into = "FieldValueRepr")]
pub enum FieldValue {
    SourceFolder,
    NamePrefix,
    FirstIndex,
    LastIndex,
    OutputFolder,
    Literal(String),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum FieldValueRepr {
    Named(String),
    Literal { literal: String },
}

impl From<FieldValue> for FieldValueRepr {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Literal(literal) => FieldValueRepr::Literal { literal },
            named => FieldValueRepr::Named(named.to_string()),
        }
    }
}

impl TryFrom<FieldValueRepr> for FieldValue {
    type Error = String;

    fn try_from(repr: FieldValueRepr) -> Result<Self, Self::Error> {
        let name = match repr {
            FieldValueRepr::Literal { literal } => return Ok(FieldValue::Literal(literal)),
            FieldValueRepr::Named(name) => name,
        };
        match name.as_str() {
            "source_folder" => Ok(FieldValue::SourceFolder),
            "name_prefix" => Ok(FieldValue::NamePrefix),
            "first_index" => Ok(FieldValue::FirstIndex),
            "last_index" => Ok(FieldValue::LastIndex),
            "output_folder" => Ok(FieldValue::OutputFolder),
            other => Err(format!(
                "unknown field value `{other}` (expected source_folder, name_prefix, \
                 first_index, last_index, output_folder or {{literal: ...}})"
            )),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::SourceFolder => write!(f, "source_folder"),
            FieldValue::NamePrefix => write!(f, "name_prefix"),
            FieldValue::FirstIndex => write!(f, "first_index"),
            FieldValue::LastIndex => write!(f, "last_index"),
            FieldValue::OutputFolder => write!(f, "output_folder"),
            FieldValue::Literal(text) => write!(f, "literal({text})"),
        }
    }
}

/// One step of the field-injection protocol.
///
/// The order and navigation counts mirror the target application's current
/// UI layout; changing them is a compatibility change with that layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum InjectionStep {
    /// Move focus forward by `count` fields.
    Navigate { count: u32 },
    /// Type a value into the focused field.
    Write { value: FieldValue },
    /// Fire a named action (e.g. `load`, `start`).
    Trigger { action: String },
    /// Wait the post-load settle interval.
    Settle,
}

impl InjectionStep {
    pub fn navigate(count: u32) -> Self {
        InjectionStep::Navigate { count }
    }

    pub fn write(value: FieldValue) -> Self {
        InjectionStep::Write { value }
    }

    pub fn trigger(action: &str) -> Self {
        InjectionStep::Trigger {
            action: action.to_owned(),
        }
    }
}

/// The sequence the target application's current layout expects.
pub fn default_injection_sequence() -> Vec<InjectionStep> {
    vec![
        InjectionStep::navigate(3),
        InjectionStep::write(FieldValue::SourceFolder),
        InjectionStep::navigate(2),
        InjectionStep::write(FieldValue::NamePrefix),
        InjectionStep::navigate(3),
        InjectionStep::write(FieldValue::FirstIndex),
        InjectionStep::navigate(1),
        InjectionStep::write(FieldValue::LastIndex),
        InjectionStep::navigate(7),
        InjectionStep::write(FieldValue::OutputFolder),
        InjectionStep::navigate(3),
        InjectionStep::trigger("load"),
        InjectionStep::Settle,
        InjectionStep::navigate(4),
        InjectionStep::trigger("start"),
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
