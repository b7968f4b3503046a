//! Source reduction: scan, watch, build, partition, delete.

pub mod coordinator;
pub mod deletion;
pub mod inventory;
pub mod planner;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Command;
use std::time::Instant;

use serde::Serialize;

use crate::core::config::Config;
use crate::core::errors::Result;
use crate::logger::journal::{Journal, JournalEntry, JournalEvent, Severity};
use crate::reduce::coordinator::RunCoordinator;
use crate::reduce::deletion::{DeletionOptions, DeletionReport};
use crate::reduce::inventory::{ExclusionRules, Inventory};
use crate::reduce::planner::ReductionPlanner;
use crate::watch::backend::WatchBackend;
use crate::watch::mask::EventMask;
use crate::watch::session::{OpenOptions, WatchSession};

/// Everything one reduction run needs.
#[derive(Debug, Clone)]
pub struct ReductionRequest {
    pub root: PathBuf,
    pub rules: ExclusionRules,
    pub mask: EventMask,
    pub coordinator: RunCoordinator,
    pub open: OpenOptions,
    pub deletion: DeletionOptions,
}

impl ReductionRequest {
    pub fn from_config(root: impl Into<PathBuf>, config: &Config) -> Result<Self> {
        Ok(Self {
            root: root.into(),
            rules: ExclusionRules::from_config(&config.inventory)?,
            mask: EventMask::REDUCTION,
            coordinator: RunCoordinator::from_config(&config.watch),
            open: OpenOptions {
                inheritable: config.watch.inheritable,
                nonblocking: config.watch.nonblocking,
            },
            deletion: DeletionOptions {
                dry_run: config.reduce.dry_run,
                prune_empty_dirs: config.reduce.prune_empty_dirs,
            },
        })
    }

    fn planner(&self) -> ReductionPlanner {
        ReductionPlanner::new(&self.root, self.rules.clone()).with_mask(self.mask)
    }
}

/// Report of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct ReductionOutcome {
    pub root: PathBuf,
    pub dry_run: bool,
    pub inventory_files: usize,
    pub watches: usize,
    pub polls: u64,
    pub chunks: usize,
    pub bytes: usize,
    pub events: usize,
    /// Files the build opened; what survives the reduction.
    pub touched: BTreeSet<PathBuf>,
    pub unused: usize,
    pub deletion: DeletionReport,
    pub elapsed_ms: u64,
}

/// Reduce the tree at `request.root` to what `command` opens.
///
/// A failed build, lost events or a corrupt stream abort before anything is
/// deleted. Individual deletion failures do not abort the pass; they are
/// listed in the outcome's [`DeletionReport`], which callers should check
/// with [`DeletionReport::ensure_complete`].
#[cfg(target_os = "linux")]
pub fn reduce(
    request: &ReductionRequest,
    command: &mut Command,
    journal: &mut Journal,
) -> Result<ReductionOutcome> {
    journaled(journal, |journal| {
        let planner = request.planner();
        let inventory = planner.scan()?;
        let session = WatchSession::open(&request.root, request.open)?;
        run_session(request, &planner, &inventory, session, command, journal)
    })
}

/// [`reduce`] over an already-open session.
pub fn reduce_with<B: WatchBackend>(
    request: &ReductionRequest,
    session: WatchSession<B>,
    command: &mut Command,
    journal: &mut Journal,
) -> Result<ReductionOutcome> {
    journaled(journal, |journal| {
        let planner = request.planner();
        let inventory = planner.scan()?;
        run_session(request, &planner, &inventory, session, command, journal)
    })
}

fn journaled<F>(journal: &mut Journal, run: F) -> Result<ReductionOutcome>
where
    F: FnOnce(&mut Journal) -> Result<ReductionOutcome>,
{
    let result = run(journal);
    if let Err(err) = &result {
        journal.write(&JournalEntry::failure(err));
    }
    result
}

fn run_session<B: WatchBackend>(
    request: &ReductionRequest,
    planner: &ReductionPlanner,
    inventory: &Inventory,
    mut session: WatchSession<B>,
    command: &mut Command,
    journal: &mut Journal,
) -> Result<ReductionOutcome> {
    let started = Instant::now();

    let mut entry =
        JournalEntry::new(JournalEvent::ReductionStart, Severity::Info).with_root(&request.root);
    entry.count = Some(inventory.file_count() as u64);
    entry.details = Some(format!("mask={}", planner.mask()));
    journal.write(&entry);

    let watches = planner.register(&mut session, inventory)?;
    let mut entry = JournalEntry::new(JournalEvent::WatchesRegistered, Severity::Info);
    entry.count = Some(watches as u64);
    journal.write(&entry);

    let run = request.coordinator.run(&mut session, command)?;
    let mut entry = JournalEntry::new(JournalEvent::BuildFinished, Severity::Info);
    entry.count = Some(run.bytes as u64);
    entry.duration_ms = Some(millis(run.elapsed));
    entry.ok = Some(true);
    journal.write(&entry);

    let plan = planner.plan(&session, inventory)?;
    session.close()?;

    let mut entry = JournalEntry::new(JournalEvent::ReductionPlanned, Severity::Info);
    entry.count = Some(plan.events as u64);
    entry.touched = Some(plan.touched().len() as u64);
    entry.unused = Some(plan.unused().len() as u64);
    if request.deletion.dry_run {
        entry.details = Some("dry run".to_string());
    }
    journal.write(&entry);

    let report = deletion::execute(&request.root, &plan, inventory, request.deletion);
    for failure in &report.failures {
        let mut entry = JournalEntry::new(JournalEvent::DeletionFailed, Severity::Warning);
        entry.path = Some(failure.path.to_string_lossy().into_owned());
        entry.error_message = Some(failure.error.clone());
        journal.write(&entry);
    }

    let elapsed_ms = millis(started.elapsed());
    let mut entry = JournalEntry::new(JournalEvent::ReductionComplete, Severity::Info)
        .with_root(&request.root);
    entry.count = Some(report.deleted as u64);
    entry.duration_ms = Some(elapsed_ms);
    entry.ok = Some(report.failures.is_empty());
    journal.write(&entry);

    Ok(ReductionOutcome {
        root: request.root.clone(),
        dry_run: report.dry_run,
        inventory_files: inventory.file_count(),
        watches,
        polls: run.polls,
        chunks: run.chunks,
        bytes: run.bytes,
        events: plan.events,
        unused: plan.unused().len(),
        touched: plan.touched().clone(),
        deletion: report,
        elapsed_ms,
    })
}

fn millis(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
