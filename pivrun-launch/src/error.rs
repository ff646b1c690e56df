use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Failures that stop a single work item from launching.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("cannot prepare isolation root {path}: {source}")]
    IsolationRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot create isolation folder {path}: {source}")]
    Isolation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no unique isolation folder under {root} after {attempts} attempts")]
    IsolationExhausted { root: PathBuf, attempts: usize },

    #[error("cannot create output folder {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures of the field-injection channel.
///
/// These never undo a launch: by the time a field is typed the target
/// process exists and must stay tracked.
#[derive(Debug, Error)]
pub enum InjectionError {
    #[error("keystroke helper {program} could not run: {source}")]
    Helper {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("keystroke helper {program} exited with {status}")]
    HelperStatus { program: PathBuf, status: ExitStatus },

    #[error("no key configured for action '{0}'")]
    UnknownAction(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("injection step {step} ({description}) failed: {source}")]
    Step {
        step: usize,
        description: String,
        #[source]
        source: Box<InjectionError>,
    },
}

/// Failures that abort a whole batch run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("scan failed: {0}")]
    Scan(#[from] pivrun_scanner::ScanError),

    #[error("registry error: {0}")]
    Registry(#[from] pivrun_core::RegistryError),

    #[error("launch setup failed: {0}")]
    Launch(#[from] LaunchError),
}
