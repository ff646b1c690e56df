//! Persisted instance registry.
//!
//! # Storage layout
//!
//! ```text
//! ~/.pivrun/
//!   instances.json   (isolation path -> instance record, mode 0600)
//!   config.yaml      (see crate::config)
//! ```
//!
//! The document is shared by every orchestrator on the host. All mutation is
//! load → modify → save, and save swaps the whole document atomically, so a
//! reader sees either the previous or the next version. Two orchestrators
//! racing on the same document resolve as last-writer-wins.
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home, used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{io_err, RegistryError};
use crate::liveness::LivenessProbe;
use crate::types::{InstanceRecord, Registry};

pub const REGISTRY_FILE: &str = "instances.json";

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.pivrun/`
pub fn pivrun_root(home: &Path) -> PathBuf {
    home.join(".pivrun")
}

/// `<home>/.pivrun/instances.json`. Pure, no I/O.
pub fn registry_path_at(home: &Path) -> PathBuf {
    pivrun_root(home).join(REGISTRY_FILE)
}

/// `registry_path_at` convenience wrapper.
pub fn registry_path() -> Result<PathBuf, RegistryError> {
    Ok(registry_path_at(&home()?))
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load the registry document.
///
/// Returns an empty registry if the document does not exist yet, and
/// `RegistryError::Corrupt` if it exists but is not a valid instance mapping.
pub fn load_at(home: &Path) -> Result<Registry, RegistryError> {
    let path = registry_path_at(home);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Registry::new()),
        Err(err) => return Err(io_err(path, err)),
    };
    serde_json::from_str(&contents).map_err(|source| RegistryError::Corrupt { path, source })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Registry, RegistryError> {
    load_at(&home()?)
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically replace the registry document.
///
/// Write flow: serialize → uniquely named temp file in `~/.pivrun/` → fsync
/// → `chmod 0600` → rename over `instances.json`. The temp file lives in the
/// same directory as the target so the rename never crosses filesystems; if
/// anything fails before the rename the temp file is removed on drop.
pub fn save_at(home: &Path, registry: &Registry) -> Result<(), RegistryError> {
    let dir = ensure_root_at(home)?;
    let path = registry_path_at(home);

    let json = serde_json::to_vec_pretty(registry)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".instances.")
        .suffix(".json.tmp")
        .tempfile_in(&dir)
        .map_err(|e| io_err(&dir, e))?;
    tmp.write_all(&json).map_err(|e| io_err(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| io_err(tmp.path(), e))?;
    set_file_permissions(tmp.path())?;
    tmp.persist(&path).map_err(|e| io_err(&path, e.error))?;

    tracing::debug!(path = %path.display(), entries = registry.len(), "registry saved");
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(registry: &Registry) -> Result<(), RegistryError> {
    save_at(&home()?, registry)
}

// ---------------------------------------------------------------------------
// 4. Prune
// ---------------------------------------------------------------------------

/// Result of a prune pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneOutcome {
    /// The registry as saved after pruning.
    pub registry: Registry,
    /// Entries that were dropped because their process is gone.
    pub removed: Vec<(PathBuf, InstanceRecord)>,
}

/// Drop every entry whose process is no longer live, save, and return the
/// pruned registry.
///
/// The document is saved even when nothing was removed, so a prune also
/// normalizes a hand-edited document.
pub fn prune_at(home: &Path, probe: &dyn LivenessProbe) -> Result<PruneOutcome, RegistryError> {
    let loaded = load_at(home)?;
    let (live, dead): (Vec<_>, Vec<_>) = loaded
        .instances
        .into_iter()
        .partition(|(_, record)| probe.is_record_live(record));

    for (isolation, record) in &dead {
        tracing::info!(
            isolation = %isolation.display(),
            pid = %record.process_id,
            "pruning finished instance",
        );
    }

    let registry: Registry = live.into_iter().collect();
    save_at(home, &registry)?;
    Ok(PruneOutcome {
        registry,
        removed: dead,
    })
}

/// Entries a prune would drop right now. Read-only: the document is never
/// written, and a missing document has no stale entries.
pub fn stale_at(
    home: &Path,
    probe: &dyn LivenessProbe,
) -> Result<Vec<(PathBuf, InstanceRecord)>, RegistryError> {
    Ok(load_at(home)?
        .instances
        .into_iter()
        .filter(|(_, record)| !probe.is_record_live(record))
        .collect())
}

/// `prune_at` convenience wrapper.
pub fn prune(probe: &dyn LivenessProbe) -> Result<PruneOutcome, RegistryError> {
    prune_at(home()?.as_path(), probe)
}

// ---------------------------------------------------------------------------
// 5. Record / remove
// ---------------------------------------------------------------------------

/// Insert (or overwrite) the entry for `isolation_path` and save.
pub fn record_at(
    home: &Path,
    isolation_path: PathBuf,
    record: InstanceRecord,
) -> Result<Registry, RegistryError> {
    let mut registry = load_at(home)?;
    tracing::debug!(
        isolation = %isolation_path.display(),
        pid = %record.process_id,
        "recording instance",
    );
    registry.insert(isolation_path, record);
    save_at(home, &registry)?;
    Ok(registry)
}

/// `record_at` convenience wrapper.
pub fn record(isolation_path: PathBuf, record: InstanceRecord) -> Result<Registry, RegistryError> {
    record_at(&home()?, isolation_path, record)
}

/// Remove the entry for `isolation_path`, if any, and save.
///
/// The document is left untouched when there is no such entry.
pub fn remove_at(
    home: &Path,
    isolation_path: &Path,
) -> Result<Option<InstanceRecord>, RegistryError> {
    let mut registry = load_at(home)?;
    let removed = registry.remove(isolation_path);
    if removed.is_some() {
        save_at(home, &registry)?;
    }
    Ok(removed)
}

/// `remove_at` convenience wrapper.
pub fn remove(isolation_path: &Path) -> Result<Option<InstanceRecord>, RegistryError> {
    remove_at(&home()?, isolation_path)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, RegistryError> {
    dirs::home_dir().ok_or(RegistryError::HomeNotFound)
}

/// Create `<home>/.pivrun/` (mode `0700`) if it does not yet exist.
fn ensure_root_at(home: &Path) -> Result<PathBuf, RegistryError> {
    let dir = pivrun_root(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
