//! Per-instance isolation folders.
//!
//! Every launched instance gets a fresh directory under one shared root and
//! uses it as its scratch/temp area. Uniqueness comes from `create_dir`
//! failing with `AlreadyExists`, so it holds across threads and across
//! independently started orchestrators sharing the same root. There is no
//! separate existence check.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::LaunchError;

/// Name prefix of every isolation folder.
pub const ISOLATION_PREFIX: &str = "piv-";

/// Bound on name regenerations after a collision.
pub const MAX_ALLOCATION_ATTEMPTS: usize = 16;

/// Hands out fresh isolation folders under a fixed root.
#[derive(Debug, Clone)]
pub struct IsolationAllocator {
    root: PathBuf,
}

impl IsolationAllocator {
    /// Allocator for `root`, made absolute against the working directory.
    ///
    /// Nothing is created until the first [`allocate`](Self::allocate); the
    /// root is never removed by pivrun.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, LaunchError> {
        let root = root.into();
        let root = std::path::absolute(&root)
            .map_err(|source| LaunchError::IsolationRoot { path: root, source })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create and return a new, never-before-returned isolation folder.
    pub fn allocate(&self) -> Result<PathBuf, LaunchError> {
        self.allocate_with(|| Uuid::new_v4().simple().to_string())
    }

    pub(crate) fn allocate_with(
        &self,
        mut next_name: impl FnMut() -> String,
    ) -> Result<PathBuf, LaunchError> {
        fs::create_dir_all(&self.root).map_err(|source| LaunchError::IsolationRoot {
            path: self.root.clone(),
            source,
        })?;
        for attempt in 1..=MAX_ALLOCATION_ATTEMPTS {
            let path = self.root.join(format!("{ISOLATION_PREFIX}{}", next_name()));
            match fs::create_dir(&path) {
                Ok(()) => return Ok(path),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    tracing::debug!(path = %path.display(), attempt, "isolation name collision, retrying");
                }
                Err(source) => return Err(LaunchError::Isolation { path, source }),
            }
        }
        Err(LaunchError::IsolationExhausted {
            root: self.root.clone(),
            attempts: MAX_ALLOCATION_ATTEMPTS,
        })
    }
}
