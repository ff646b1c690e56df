//! Work-item discovery for `pivrun-scanner`.
//!
//! `scan(parent, options)` looks at every immediate subdirectory of `parent`
//! and turns the ones holding numbered image sequences into [`WorkItem`]s.
//! Image files are named `<prefix><six digits>.<ext>`; the sequence is
//! ordered by the parsed number, never by the filename.

use std::fs;
use std::path::{Path, PathBuf};

use pivrun_core::WorkItem;
use regex::{Regex, RegexBuilder};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Scanner settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Image extension, with or without the leading dot.
    pub extension: String,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            extension: "bmp".to_string(),
        }
    }
}

/// A subdirectory that could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFolder {
    pub path: PathBuf,
    pub reason: String,
}

/// Everything one scan found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Valid work items, in folder-name order.
    pub items: Vec<WorkItem>,
    /// Subdirectories skipped because they could not be read.
    pub skipped: Vec<SkippedFolder>,
}

/// Errors from work-item discovery.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("cannot read parent folder {path}: {source}")]
    Parent {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid image extension '{0}'")]
    Extension(String),
}

/// One image filename split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceName {
    pub prefix: String,
    pub index: u64,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Discover the work items under `parent`.
///
/// Subdirectories without a single matching image are excluded silently.
/// Subdirectories that cannot be listed are reported in
/// [`ScanReport::skipped`]; only an unreadable `parent` is an error.
pub fn scan(parent: &Path, options: &ScanOptions) -> Result<ScanReport, ScanError> {
    let pattern = sequence_pattern(&options.extension)?;
    // Absolute, not canonical: symlinks stay unresolved and Windows paths
    // carry no `\\?\` prefix.
    let parent = std::path::absolute(parent).map_err(|source| ScanError::Parent {
        path: parent.to_path_buf(),
        source,
    })?;

    let mut folders: Vec<PathBuf> = fs::read_dir(&parent)
        .map_err(|source| ScanError::Parent {
            path: parent.clone(),
            source,
        })?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| fs::metadata(p).map(|m| m.is_dir()).unwrap_or(false))
        .collect();
    folders.sort();

    let mut report = ScanReport::default();
    for folder in folders {
        match scan_folder(&folder, &pattern) {
            Ok(Some(item)) => {
                tracing::debug!(
                    folder = %item.folder_path.display(),
                    prefix = %item.name_prefix,
                    final_index = item.final_index,
                    "work item found",
                );
                report.items.push(item);
            }
            Ok(None) => {
                tracing::debug!(folder = %folder.display(), "no numbered images, excluded");
            }
            Err(err) => {
                tracing::warn!(folder = %folder.display(), error = %err, "skipping unreadable folder");
                report.skipped.push(SkippedFolder {
                    path: folder,
                    reason: err.to_string(),
                });
            }
        }
    }
    Ok(report)
}

/// Split `file_name` into prefix and sequence number if it matches
/// `<prefix><six digits>.<extension>`.
pub fn parse_sequence_name(file_name: &str, extension: &str) -> Option<SequenceName> {
    let pattern = sequence_pattern(extension).ok()?;
    parse_with(&pattern, file_name)
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

fn sequence_pattern(extension: &str) -> Result<Regex, ScanError> {
    let ext = extension.trim_start_matches('.');
    if ext.is_empty() {
        return Err(ScanError::Extension(extension.to_string()));
    }
    // Lazy prefix: the six digits are the ones directly before the extension.
    RegexBuilder::new(&format!(r"^(.*?)([0-9]{{6}})\.{}$", regex::escape(ext)))
        .case_insensitive(true)
        .build()
        .map_err(|_| ScanError::Extension(extension.to_string()))
}

fn parse_with(pattern: &Regex, file_name: &str) -> Option<SequenceName> {
    let caps = pattern.captures(file_name)?;
    let index = caps.get(2)?.as_str().parse().ok()?;
    Some(SequenceName {
        prefix: caps.get(1)?.as_str().to_string(),
        index,
    })
}

fn scan_folder(folder: &Path, pattern: &Regex) -> std::io::Result<Option<WorkItem>> {
    let mut names: Vec<SequenceName> = Vec::new();
    for entry in fs::read_dir(folder)? {
        let entry = entry?;
        // Follows symlinks; a dangling link is not an image.
        if !fs::metadata(entry.path()).map(|m| m.is_file()).unwrap_or(false) {
            continue;
        }
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if let Some(parsed) = parse_with(pattern, file_name) {
            names.push(parsed);
        }
    }

    names.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.prefix.cmp(&b.prefix)));
    let (Some(first), Some(last)) = (names.first(), names.last()) else {
        return Ok(None);
    };

    Ok(Some(WorkItem {
        folder_path: folder.to_path_buf(),
        name_prefix: first.prefix.clone(),
        final_index: last.index,
    }))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
