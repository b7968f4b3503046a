//! Pre-build inventory scan: every reducible file plus the directory list
//! used for watch registration and empty-directory pruning.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use serde::Serialize;

use crate::core::config::InventoryConfig;
use crate::core::errors::{KslError, Result};

// ──────────────────── exclusion rules ────────────────────

/// Which parts of the tree are never reduced.
#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
    /// Entry names skipped at any depth (e.g. `.git`).
    pub names: Vec<OsString>,
    /// Root-relative paths skipped together with everything below them.
    pub paths: Vec<PathBuf>,
    /// Patterns matched against the `/`-separated relative path.
    pub patterns: Vec<Regex>,
}

impl ExclusionRules {
    /// Build the rule set from the `[inventory]` config section. The build
    /// driver, when named, is excluded like any other path.
    pub fn from_config(config: &InventoryConfig) -> Result<Self> {
        let mut paths: Vec<PathBuf> = config
            .excluded_paths
            .iter()
            .map(String::as_str)
            .map(relative_path)
            .collect();
        if let Some(driver) = &config.build_driver {
            paths.push(relative_path(driver));
        }
        let patterns = config
            .exclude_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| KslError::InvalidConfig {
                    details: format!("inventory.exclude_patterns entry {p:?}: {e}"),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            names: config.excluded_names.iter().map(OsString::from).collect(),
            paths,
            patterns,
        })
    }

    /// Whether the entry at `relative` (named `name`) is out of scope.
    #[must_use]
    pub fn is_excluded(&self, relative: &Path, name: &OsStr) -> bool {
        if self.names.iter().any(|n| n == name) {
            return true;
        }
        if self.paths.iter().any(|p| relative.starts_with(p)) {
            return true;
        }
        if self.patterns.is_empty() {
            return false;
        }
        let joined = relative.to_string_lossy();
        self.patterns.iter().any(|re| re.is_match(&joined))
    }
}

/// `./scripts/` and `scripts` name the same prefix.
fn relative_path(raw: &str) -> PathBuf {
    Path::new(raw)
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

// ──────────────────── inventory ────────────────────

/// Result of scanning a tree.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Inventory {
    /// Candidate files, relative to the root.
    pub files: BTreeSet<PathBuf>,
    /// In-scope directories, parents before children; `"."` is first.
    pub dirs: Vec<PathBuf>,
}

impl Inventory {
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains(path)
    }

    #[must_use]
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// Walk `root` without following symlinks.
///
/// Symlinks are neither descended into nor listed, so they always survive a
/// reduction. Unreadable directories fail the scan: a directory that cannot
/// be listed cannot be watched either.
pub fn scan_inventory(root: &Path, rules: &ExclusionRules) -> Result<Inventory> {
    let meta = fs::metadata(root).map_err(|e| KslError::io(root, e))?;
    if !meta.is_dir() {
        return Err(KslError::io(
            root,
            std::io::Error::new(std::io::ErrorKind::NotADirectory, "tree root is not a directory"),
        ));
    }

    let mut inventory = Inventory::default();
    let mut pending = vec![PathBuf::from(".")];

    while let Some(relative) = pending.pop() {
        let absolute = if relative == Path::new(".") {
            root.to_path_buf()
        } else {
            root.join(&relative)
        };

        let mut entries = fs::read_dir(&absolute)
            .map_err(|e| KslError::io(&absolute, e))?
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|e| KslError::io(&absolute, e))?;
        entries.sort_by_key(fs::DirEntry::file_name);

        let mut children = Vec::new();
        for entry in entries {
            let name = entry.file_name();
            let child = if relative == Path::new(".") {
                PathBuf::from(&name)
            } else {
                relative.join(&name)
            };
            if rules.is_excluded(&child, &name) {
                continue;
            }

            let file_type = entry
                .file_type()
                .map_err(|e| KslError::io(entry.path(), e))?;
            if file_type.is_dir() {
                children.push(child);
            } else if file_type.is_file() {
                inventory.files.insert(child);
            }
        }

        inventory.dirs.push(relative);
        // Reverse so the stack pops children in name order.
        pending.extend(children.into_iter().rev());
    }

    Ok(inventory)
}
