//! Field injection into a freshly started target instance.
//!
//! The target has no programmatic interface; its fields are filled by
//! moving focus and typing, in the order given by an [`InjectionStep`]
//! sequence. A [`FieldChannel`] is the transport for those keystrokes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use pivrun_core::config::{ChannelConfig, IndexConfig};
use pivrun_core::{FieldValue, InjectionStep, WorkItem};

use crate::error::InjectionError;
use crate::readiness::{ReadinessWait, Stage};

// ---------------------------------------------------------------------------
// Channel trait
// ---------------------------------------------------------------------------

pub trait FieldChannel {
    /// Move focus forward by `count` fields.
    fn navigate(&mut self, count: u32) -> Result<(), InjectionError>;
    /// Type `text` into the focused field.
    fn write(&mut self, text: &str) -> Result<(), InjectionError>;
    /// Fire a named action such as `load` or `start`.
    fn trigger(&mut self, action: &str) -> Result<(), InjectionError>;
}

// ---------------------------------------------------------------------------
// Field values
// ---------------------------------------------------------------------------

/// Concrete text for every [`FieldValue`] of one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldValues {
    pub source_folder: PathBuf,
    pub name_prefix: String,
    pub first_index: u64,
    pub last_index: u64,
    pub output_folder: PathBuf,
}

impl FieldValues {
    pub fn new(item: &WorkItem, output_folder: &Path, indices: &IndexConfig) -> Self {
        Self {
            source_folder: item.folder_path.clone(),
            name_prefix: item.name_prefix.clone(),
            first_index: indices.first_index,
            last_index: indices.last_index(item.final_index),
            output_folder: output_folder.to_path_buf(),
        }
    }

    pub fn resolve(&self, value: &FieldValue) -> String {
        match value {
            FieldValue::SourceFolder => self.source_folder.display().to_string(),
            FieldValue::NamePrefix => self.name_prefix.clone(),
            FieldValue::FirstIndex => self.first_index.to_string(),
            FieldValue::LastIndex => self.last_index.to_string(),
            FieldValue::OutputFolder => self.output_folder.display().to_string(),
            FieldValue::Literal(text) => text.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sequence runner
// ---------------------------------------------------------------------------

/// Play `steps` against `channel`. Stops at the first failing step.
pub fn run_sequence(
    steps: &[InjectionStep],
    values: &FieldValues,
    channel: &mut dyn FieldChannel,
    readiness: &dyn ReadinessWait,
) -> Result<(), InjectionError> {
    for (index, step) in steps.iter().enumerate() {
        let result = match step {
            InjectionStep::Navigate { count } => channel.navigate(*count),
            InjectionStep::Write { value } => channel.write(&values.resolve(value)),
            InjectionStep::Trigger { action } => channel.trigger(action),
            InjectionStep::Settle => {
                readiness.wait_for_ready(Stage::AfterLoad);
                Ok(())
            }
        };
        result.map_err(|source| InjectionError::Step {
            step: index + 1,
            description: describe(step),
            source: Box::new(source),
        })?;
    }
    Ok(())
}

fn describe(step: &InjectionStep) -> String {
    match step {
        InjectionStep::Navigate { count } => format!("navigate {count}"),
        InjectionStep::Write { value } => format!("write {value}"),
        InjectionStep::Trigger { action } => format!("trigger {action}"),
        InjectionStep::Settle => "settle".to_string(),
    }
}

// ---------------------------------------------------------------------------
// xdotool-style helper
// ---------------------------------------------------------------------------

/// Drives a keystroke helper program with the `xdotool` command line:
///
/// - navigate: `key --repeat <count> <navigate_key>`
/// - write: `type -- <text>`
/// - trigger: `key <action key>`
#[derive(Debug, Clone)]
pub struct XdotoolChannel {
    program: PathBuf,
    navigate_key: String,
    actions: BTreeMap<String, String>,
}

impl XdotoolChannel {
    pub fn new(config: &ChannelConfig) -> Self {
        Self {
            program: config.program.clone(),
            navigate_key: config.navigate_key.clone(),
            actions: config.actions.clone(),
        }
    }

    /// Argument vectors for each call. Split out so the command lines can
    /// be checked without a display.
    pub fn navigate_args(&self, count: u32) -> Vec<String> {
        vec![
            "key".into(),
            "--repeat".into(),
            count.to_string(),
            self.navigate_key.clone(),
        ]
    }

    pub fn write_args(&self, text: &str) -> Vec<String> {
        vec!["type".into(), "--".into(), text.into()]
    }

    pub fn trigger_args(&self, action: &str) -> Result<Vec<String>, InjectionError> {
        let key = self
            .actions
            .get(action)
            .ok_or_else(|| InjectionError::UnknownAction(action.to_string()))?;
        Ok(vec!["key".into(), key.clone()])
    }

    fn invoke(&self, args: &[String]) -> Result<(), InjectionError> {
        tracing::trace!(program = %self.program.display(), ?args, "keystroke helper");
        let status = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .map_err(|source| InjectionError::Helper {
                program: self.program.clone(),
                source,
            })?;
        if !status.success() {
            return Err(InjectionError::HelperStatus {
                program: self.program.clone(),
                status,
            });
        }
        Ok(())
    }
}

impl FieldChannel for XdotoolChannel {
    fn navigate(&mut self, count: u32) -> Result<(), InjectionError> {
        if count == 0 {
            return Ok(());
        }
        self.invoke(&self.navigate_args(count))
    }

    fn write(&mut self, text: &str) -> Result<(), InjectionError> {
        self.invoke(&self.write_args(text))
    }

    fn trigger(&mut self, action: &str) -> Result<(), InjectionError> {
        let args = self.trigger_args(action)?;
        self.invoke(&args)
    }
}

// ---------------------------------------------------------------------------
// Recording channel
// ---------------------------------------------------------------------------

/// One call made against a [`RecordingChannel`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "call", content = "arg", rename_all = "snake_case")]
pub enum ChannelCall {
    Navigate(u32),
    Write(String),
    Trigger(String),
}

/// Records every call instead of sending keystrokes.
#[derive(Debug, Default, Clone)]
pub struct RecordingChannel {
    calls: Vec<ChannelCall>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[ChannelCall] {
        &self.calls
    }

    /// Hand back everything recorded so far and start over.
    pub fn take(&mut self) -> Vec<ChannelCall> {
        std::mem::take(&mut self.calls)
    }
}

impl FieldChannel for RecordingChannel {
    fn navigate(&mut self, count: u32) -> Result<(), InjectionError> {
        self.calls.push(ChannelCall::Navigate(count));
        Ok(())
    }

    fn write(&mut self, text: &str) -> Result<(), InjectionError> {
        self.calls.push(ChannelCall::Write(text.to_string()));
        Ok(())
    }

    fn trigger(&mut self, action: &str) -> Result<(), InjectionError> {
        self.calls.push(ChannelCall::Trigger(action.to_string()));
        Ok(())
    }
}
