//! Error types for pivrun-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Underlying I/O failure reading, writing, or renaming the document.
    #[error("registry I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document exists but is not a valid instance mapping.
    #[error("registry at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// JSON serialization error (save path).
    #[error("registry serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// `dirs::home_dir()` returned `None`; cannot locate `~/.pivrun/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

impl RegistryError {
    /// Whether this error means the persisted document itself is unusable.
    ///
    /// Corruption halts a batch run; every other registry error only skips
    /// the current work item.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, RegistryError::Corrupt { .. })
    }
}

/// Errors loading or writing the YAML configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load, with file path and serde_yaml line context.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RegistryError {
    RegistryError::Io {
        path: path.into(),
        source,
    }
}
