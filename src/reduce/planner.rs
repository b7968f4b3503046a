//! Turn decoded events into the touched/unused partition of the inventory.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::core::errors::{KslError, Result};
use crate::reduce::inventory::{ExclusionRules, Inventory, scan_inventory};
use crate::watch::backend::WatchBackend;
use crate::watch::decoder::DecodedEvent;
use crate::watch::mask::EventMask;
use crate::watch::session::WatchSession;

/// Scans a tree, registers its watches and partitions it after the build.
#[derive(Debug, Clone)]
pub struct ReductionPlanner {
    root: PathBuf,
    rules: ExclusionRules,
    mask: EventMask,
}

impl ReductionPlanner {
    /// Planner for `root` using the production event mask.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, rules: ExclusionRules) -> Self {
        Self {
            root: root.into(),
            rules,
            mask: EventMask::REDUCTION,
        }
    }

    #[must_use]
    pub fn with_mask(mut self, mask: EventMask) -> Self {
        self.mask = mask;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn mask(&self) -> EventMask {
        self.mask
    }

    pub fn scan(&self) -> Result<Inventory> {
        scan_inventory(&self.root, &self.rules)
    }

    /// Watch every in-scope directory. Returns the number of distinct
    /// watches the session now holds.
    pub fn register<B: WatchBackend>(
        &self,
        session: &mut WatchSession<B>,
        inventory: &Inventory,
    ) -> Result<usize> {
        for dir in &inventory.dirs {
            session.add_watch(dir, self.mask)?;
        }
        Ok(session.watch_count())
    }

    /// Decode everything the session captured and partition the inventory.
    pub fn plan<B: WatchBackend>(
        &self,
        session: &WatchSession<B>,
        inventory: &Inventory,
    ) -> Result<ReductionPlan> {
        let events = session.buffer().decode_all()?;
        let translated = translate(&events, session)?;
        Ok(ReductionPlan::compute(inventory, &translated, events.len()))
    }
}

/// Map decoded events to root-relative paths.
///
/// Root events already carry the top-level name; other events are joined
/// onto their watch's directory. An event on the directory itself maps to
/// that directory.
pub fn translate<B: WatchBackend>(
    events: &[DecodedEvent],
    session: &WatchSession<B>,
) -> Result<BTreeSet<PathBuf>> {
    let mut paths = BTreeSet::new();
    for event in events {
        let Some(dir) = session.path_of(event.descriptor) else {
            return Err(KslError::UnknownDescriptor {
                descriptor: event.descriptor.raw(),
            });
        };
        let path = if event.name.is_empty() {
            dir.to_path_buf()
        } else if session.is_root(event.descriptor) {
            PathBuf::from(&event.name)
        } else {
            dir.join(&event.name)
        };
        paths.insert(path);
    }
    Ok(paths)
}

/// Touched and unused halves of an inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReductionPlan {
    touched: BTreeSet<PathBuf>,
    unused: BTreeSet<PathBuf>,
    /// Decoded events the plan was built from.
    pub events: usize,
    /// Translated paths that are not inventory files (directories,
    /// excluded areas, files created during the build).
    pub outside_inventory: usize,
}

impl ReductionPlan {
    #[must_use]
    pub fn compute(inventory: &Inventory, translated: &BTreeSet<PathBuf>, events: usize) -> Self {
        let touched: BTreeSet<PathBuf> = translated
            .iter()
            .filter(|p| inventory.contains(p))
            .cloned()
            .collect();
        let unused = inventory.files.difference(&touched).cloned().collect();
        Self {
            outside_inventory: translated.len() - touched.len(),
            touched,
            unused,
            events,
        }
    }

    /// Files the build opened.
    #[must_use]
    pub fn touched(&self) -> &BTreeSet<PathBuf> {
        &self.touched
    }

    /// Files to delete.
    #[must_use]
    pub fn unused(&self) -> &BTreeSet<PathBuf> {
        &self.unused
    }

    /// Whether touched and unused are disjoint and together cover exactly
    /// the inventory's files.
    #[must_use]
    pub fn is_partition_of(&self, inventory: &Inventory) -> bool {
        self.touched.is_disjoint(&self.unused)
            && self.touched.len() + self.unused.len() == inventory.files.len()
            && self
                .touched
                .iter()
                .chain(&self.unused)
                .all(|p| inventory.contains(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::WatchDescriptor;
    use crate::watch::backend::ScriptedBackend;
    use proptest::prelude::*;
    use std::ffi::OsString;
    use std::fs;

    fn event(wd: WatchDescriptor, name: &str) -> DecodedEvent {
        DecodedEvent {
            descriptor: wd,
            mask: EventMask::OPEN,
            cookie: 0,
            name: OsString::from(name),
        }
    }

    fn scenario_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        for f in ["a.c", "b.h", "sub/c.c"] {
            fs::write(dir.path().join(f), f).unwrap();
        }
        dir
    }

    #[test]
    fn root_events_map_directly_and_others_join() {
        let dir = scenario_tree();
        let planner = ReductionPlanner::new(dir.path(), ExclusionRules::default());
        let inventory = planner.scan().unwrap();
        let mut session = WatchSession::with_backend(dir.path(), ScriptedBackend::new());
        planner.register(&mut session, &inventory).unwrap();

        let root = session.root().unwrap();
        let sub = session.backend().descriptor_for(&dir.path().join("sub")).unwrap();
        let paths = translate(&[event(root, "a.c"), event(sub, "c.c"), event(sub, "")], &session)
            .unwrap();

        let expected: BTreeSet<PathBuf> = ["a.c", "sub/c.c", "sub"].iter().map(PathBuf::from).collect();
        assert_eq!(paths, expected);
    }

    #[test]
    fn unknown_descriptor_is_a_defect() {
        let session = WatchSession::with_backend("/unused", ScriptedBackend::new());
        let err = translate(&[event(WatchDescriptor::from_raw(42), "x.c")], &session).unwrap_err();
        assert!(matches!(err, KslError::UnknownDescriptor { descriptor: 42 }));
        assert!(err.is_defect());
    }

    #[test]
    fn scenario_a_partitions_inventory() {
        let dir = scenario_tree();
        let planner = ReductionPlanner::new(dir.path(), ExclusionRules::default());
        let inventory = planner.scan().unwrap();
        let mut session = WatchSession::with_backend(dir.path(), ScriptedBackend::new());
        assert_eq!(planner.register(&mut session, &inventory).unwrap(), 2);

        session.backend_mut().schedule_open(dir.path(), "a.c");
        session.backend_mut().schedule_open(&dir.path().join("sub"), "c.c");
        for _ in 0..2 {
            session.capture(Some(std::time::Duration::from_millis(1)), None).unwrap();
        }

        let plan = planner.plan(&session, &inventory).unwrap();
        let touched: Vec<&str> = plan.touched().iter().map(|p| p.to_str().unwrap()).collect();
        let unused: Vec<&str> = plan.unused().iter().map(|p| p.to_str().unwrap()).collect();
        assert_eq!(touched, vec!["a.c", "sub/c.c"]);
        assert_eq!(unused, vec!["b.h"]);
        assert!(plan.is_partition_of(&inventory));
    }

    #[test]
    fn scenario_d_repeated_opens_collapse() {
        let dir = scenario_tree();
        let planner = ReductionPlanner::new(dir.path(), ExclusionRules::default());
        let inventory = planner.scan().unwrap();
        let mut session = WatchSession::with_backend(dir.path(), ScriptedBackend::new());
        planner.register(&mut session, &inventory).unwrap();

        // Both opens land in the same grace window, so one chunk.
        let root = session.root().unwrap().raw();
        let mut burst = crate::watch::decoder::encode_record(root, EventMask::OPEN, 0, b"a.c");
        burst.extend(crate::watch::decoder::encode_record(root, EventMask::OPEN, 0, b"a.c"));
        session.backend_mut().schedule(burst);
        session
            .capture(
                Some(std::time::Duration::from_millis(20)),
                Some(std::time::Duration::from_millis(1)),
            )
            .unwrap();

        assert_eq!(session.buffer().chunk_count(), 1);
        let plan = planner.plan(&session, &inventory).unwrap();
        assert_eq!(plan.events, 2);
        assert_eq!(plan.touched().len(), 1);
        assert_eq!(plan.unused().len(), 2);
    }

    #[test]
    fn scenario_b_lost_events_abort_planning() {
        let dir = scenario_tree();
        let planner = ReductionPlanner::new(dir.path(), ExclusionRules::default());
        let inventory = planner.scan().unwrap();
        let mut session = WatchSession::with_backend(dir.path(), ScriptedBackend::new());
        planner.register(&mut session, &inventory).unwrap();
        session.backend_mut().preload(&crate::watch::decoder::encode_record(
            -1,
            EventMask::QUEUE_OVERFLOW,
            0,
            b"",
        ));
        session.capture_remaining().unwrap();

        let err = planner.plan(&session, &inventory).unwrap_err();
        assert!(matches!(err, KslError::EventsLost { .. }));
    }

    #[test]
    fn paths_outside_inventory_are_counted_not_kept() {
        let mut inventory = Inventory::default();
        inventory.files.insert(PathBuf::from("a.c"));
        let translated: BTreeSet<PathBuf> =
            ["a.c", "out/a.o", "sub"].iter().map(PathBuf::from).collect();

        let plan = ReductionPlan::compute(&inventory, &translated, 3);
        assert_eq!(plan.touched().len(), 1);
        assert_eq!(plan.outside_inventory, 2);
        assert!(plan.unused().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Touched and unused always partition the inventory, whatever the
        /// build happened to open.
        #[test]
        fn touched_and_unused_partition_inventory(
            files in prop::collection::btree_set("[a-d]{1,2}(/[a-d]{1,2}){0,2}\\.c", 0..30),
            opened in prop::collection::btree_set("[a-d]{1,2}(/[a-d]{1,2}){0,2}\\.[ch]", 0..30),
        ) {
            let inventory = Inventory {
                files: files.iter().map(PathBuf::from).collect(),
                dirs: vec![PathBuf::from(".")],
            };
            let translated: BTreeSet<PathBuf> = opened.iter().map(PathBuf::from).collect();
            let plan = ReductionPlan::compute(&inventory, &translated, translated.len());

            prop_assert!(plan.is_partition_of(&inventory));
            let union: BTreeSet<PathBuf> = plan.touched().union(plan.unused()).cloned().collect();
            prop_assert_eq!(union, inventory.files.clone());
        }
    }
}
