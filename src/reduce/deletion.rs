//! Delete the unused set and prune directories it leaves empty.

#![allow(missing_docs)]

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::errors::{KslError, Result};
use crate::reduce::inventory::Inventory;
use crate::reduce::planner::ReductionPlan;

/// How the deletion pass behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionOptions {
    /// Report what would be removed without touching the tree.
    pub dry_run: bool,
    /// Remove directories emptied by the pass.
    pub prune_empty_dirs: bool,
}

impl Default for DeletionOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            prune_empty_dirs: true,
        }
    }
}

/// One entry that could not be removed.
#[derive(Debug, Clone, Serialize)]
pub struct DeletionFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Result of one deletion pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeletionReport {
    pub deleted: usize,
    pub already_absent: usize,
    pub dirs_pruned: usize,
    pub failures: Vec<DeletionFailure>,
    pub dry_run: bool,
}

impl DeletionReport {
    /// Surface collected failures as a single error.
    pub fn ensure_complete(&self) -> Result<()> {
        match self.failures.first() {
            None => Ok(()),
            Some(first) => Err(KslError::Deletion {
                failed: self.failures.len(),
                path: first.path.clone(),
                details: first.error.clone(),
            }),
        }
    }
}

/// Remove every unused file under `root`, then prune in-scope directories
/// deepest-first. Every entry is attempted; failures are collected.
#[must_use]
pub fn execute(
    root: &Path,
    plan: &ReductionPlan,
    inventory: &Inventory,
    options: DeletionOptions,
) -> DeletionReport {
    let mut report = DeletionReport {
        dry_run: options.dry_run,
        ..DeletionReport::default()
    };

    if options.dry_run {
        report.deleted = plan.unused().len();
        return report;
    }

    for relative in plan.unused() {
        let path = root.join(relative);
        match fs::remove_file(&path) {
            Ok(()) => report.deleted += 1,
            Err(err) if err.kind() == ErrorKind::NotFound => report.already_absent += 1,
            Err(err) => report.failures.push(DeletionFailure {
                path: relative.clone(),
                error: err.to_string(),
            }),
        }
    }

    if options.prune_empty_dirs {
        report.dirs_pruned = prune_empty_dirs(root, &inventory.dirs, &mut report.failures);
    }

    report
}

/// Returns the number of directories removed. The root is never removed.
fn prune_empty_dirs(root: &Path, dirs: &[PathBuf], failures: &mut Vec<DeletionFailure>) -> usize {
    let mut ordered: Vec<&PathBuf> = dirs.iter().filter(|d| *d != Path::new(".")).collect();
    ordered.sort_by(|a, b| {
        b.components()
            .count()
            .cmp(&a.components().count())
            .then_with(|| b.cmp(a))
    });

    let mut pruned = 0;
    for relative in ordered {
        match fs::remove_dir(root.join(relative)) {
            Ok(()) => pruned += 1,
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::DirectoryNotEmpty | ErrorKind::NotFound
                ) => {}
            Err(err) => failures.push(DeletionFailure {
                path: relative.clone(),
                error: err.to_string(),
            }),
        }
    }
    pruned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reduce::inventory::{ExclusionRules, scan_inventory};
    use std::collections::BTreeSet;

    fn tree(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for f in files {
            let path = dir.path().join(f);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, f).unwrap();
        }
        dir
    }

    fn plan_for(inventory: &Inventory, touched: &[&str]) -> ReductionPlan {
        let translated: BTreeSet<PathBuf> = touched.iter().map(PathBuf::from).collect();
        ReductionPlan::compute(inventory, &translated, touched.len())
    }

    #[test]
    fn scenario_a_deletes_unused_and_keeps_touched_dirs() {
        let dir = tree(&["a.c", "b.h", "sub/c.c"]);
        let inventory = scan_inventory(dir.path(), &ExclusionRules::default()).unwrap();
        let plan = plan_for(&inventory, &["a.c", "sub/c.c"]);

        let report = execute(dir.path(), &plan, &inventory, DeletionOptions::default());
        report.ensure_complete().unwrap();
        assert_eq!(report.deleted, 1);
        assert!(!dir.path().join("b.h").exists());
        assert!(dir.path().join("a.c").exists());
        assert!(dir.path().join("sub/c.c").exists());
        assert_eq!(report.dirs_pruned, 0);
    }

    #[test]
    fn emptied_directories_are_pruned_bottom_up() {
        let dir = tree(&["keep.c", "drivers/net/eth/e1000.c", "drivers/net/phy.c"]);
        let inventory = scan_inventory(dir.path(), &ExclusionRules::default()).unwrap();
        let plan = plan_for(&inventory, &["keep.c"]);

        let report = execute(dir.path(), &plan, &inventory, DeletionOptions::default());
        assert_eq!(report.deleted, 2);
        assert_eq!(report.dirs_pruned, 3);
        assert!(!dir.path().join("drivers").exists());
        assert!(dir.path().exists(), "root is never removed");
    }

    #[test]
    fn directories_with_excluded_content_survive() {
        let dir = tree(&["arch/x.c", "arch/.git/HEAD"]);
        let rules = ExclusionRules {
            names: vec![".git".into()],
            ..ExclusionRules::default()
        };
        let inventory = scan_inventory(dir.path(), &rules).unwrap();
        let plan = plan_for(&inventory, &[]);

        let report = execute(dir.path(), &plan, &inventory, DeletionOptions::default());
        report.ensure_complete().unwrap();
        assert!(dir.path().join("arch/.git/HEAD").exists());
        assert_eq!(report.dirs_pruned, 0);
    }

    #[test]
    fn already_absent_counts_as_success() {
        let dir = tree(&["a.c", "gone.c"]);
        let inventory = scan_inventory(dir.path(), &ExclusionRules::default()).unwrap();
        let plan = plan_for(&inventory, &["a.c"]);
        fs::remove_file(dir.path().join("gone.c")).unwrap();

        let report = execute(dir.path(), &plan, &inventory, DeletionOptions::default());
        assert_eq!(report.already_absent, 1);
        assert!(report.ensure_complete().is_ok());
    }

    #[test]
    fn dry_run_leaves_tree_untouched() {
        let dir = tree(&["a.c", "sub/b.c"]);
        let inventory = scan_inventory(dir.path(), &ExclusionRules::default()).unwrap();
        let plan = plan_for(&inventory, &[]);

        let report = execute(
            dir.path(),
            &plan,
            &inventory,
            DeletionOptions {
                dry_run: true,
                prune_empty_dirs: true,
            },
        );
        assert!(report.dry_run);
        assert_eq!(report.deleted, 2);
        assert!(dir.path().join("a.c").exists());
        assert!(dir.path().join("sub/b.c").exists());
    }

    #[test]
    fn keep_empty_dirs_skips_pruning() {
        let dir = tree(&["sub/b.c"]);
        let inventory = scan_inventory(dir.path(), &ExclusionRules::default()).unwrap();
        let plan = plan_for(&inventory, &[]);

        let report = execute(
            dir.path(),
            &plan,
            &inventory,
            DeletionOptions {
                dry_run: false,
                prune_empty_dirs: false,
            },
        );
        assert_eq!(report.dirs_pruned, 0);
        assert!(dir.path().join("sub").is_dir());
    }

    #[test]
    fn failures_surface_as_deletion_error() {
        let report = DeletionReport {
            failures: vec![DeletionFailure {
                path: PathBuf::from("x.c"),
                error: "Permission denied".to_string(),
            }],
            ..DeletionReport::default()
        };
        let err = report.ensure_complete().unwrap_err();
        assert_eq!(err.code(), "KSL-3003");
        assert!(err.to_string().contains("x.c"));
    }
}
