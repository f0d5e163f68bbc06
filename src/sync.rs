// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Root sync orchestration.
//!
//! A push runs after chezmoi applies the mirror root, and walks through the
//! following phases in order:
//!
//! 1. __Guard__: skip if there is nothing meaningful to do, e.g., chezmoi
//!    did not apply anything, or applied something outside the mirror root.
//! 2. __Propagate__: copy every new or changed mirror file onto its
//!    privileged counterpart.
//! 3. __Plan__: find privileged paths that are no longer managed through
//!    [`RemovalPlanner`].
//! 4. __Confirm__: remove whatever the user agrees to through [`Confirmer`].
//! 5. __Persist__: record anything left over in the rootlist, so the next run
//!    offers it again.
//!
//! Propagation always finishes before planning starts, because planning
//! trusts the mirror to reflect the latest rendered source state.
//!
//! A pull does the reverse through [`Puller`] before chezmoi applies
//! anything, so edits made directly to privileged files are not lost.
//!
//! Either run can be cut short through an [`Interrupt`]. Work already done
//! stays done, nothing is rolled back.

pub mod compare;
pub mod confirm;
pub mod exact;
pub mod plan;
pub mod pull;

pub use compare::{Comparator, CompareError};
pub use confirm::{AutoConfirm, Confirmer, Decision, InquirePrompter, PromptError, Prompter};
pub use exact::ExactnessClassifier;
pub use plan::RemovalPlanner;
pub use pull::{PullReport, Puller};

use crate::{
    chezmoi::SourceLookup,
    context::{Context, Trigger},
    elevate::{Elevate, ElevateError},
    helper::{self, EntryKind, HelperError, Status},
    rootlist::{RootList, RootListError},
};

use ignore::WalkBuilder;
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    collections::BTreeSet,
    ffi::OsStr,
    fmt::{Display, Formatter, Result as FmtResult},
    fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, info, instrument, warn};

/// Reason a run did nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skip {
    /// Mirror root does not exist, or is not a directory.
    MirrorMissing(PathBuf),

    /// Chezmoi ran a subcommand other than apply.
    NotApply(String),

    /// Script trigger without target paths, the hook already covers it.
    ScriptWithoutTargets,

    /// Chezmoi was asked not to change anything.
    DryRun,

    /// No target path touches the mirror root.
    OutsideMirror,
}

impl Display for Skip {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::MirrorMissing(path) => write!(fmt, "no mirror root at {}", path.display()),
            Self::NotApply(subcommand) => write!(fmt, "subcommand {subcommand:?} is not apply"),
            Self::ScriptWithoutTargets => write!(fmt, "script run without target paths"),
            Self::DryRun => write!(fmt, "dry run"),
            Self::OutsideMirror => write!(fmt, "no target path inside mirror root"),
        }
    }
}

/// Result of a push.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PushReport {
    /// Number of files copied onto privileged paths.
    pub copied: usize,

    /// Privileged paths removed.
    pub removed: BTreeSet<PathBuf>,

    /// Mirror paths deferred to the next run.
    pub deferred: RootList,
}

/// Result of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Skipped(Skip),
    Pushed(PushReport),
    Pulled(PullReport),

    /// User interrupted the run before it could finish.
    Interrupted,
}

/// Flag raised when the user interrupts a run.
///
/// Checked between items, so the item in flight finishes or fails on its
/// own before the run stops.
#[derive(Debug, Default, Clone)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Reconcile mirror root with privileged file system.
pub struct RootSync<'a> {
    context: &'a Context,
    elevator: &'a dyn Elevate,
    lookup: &'a dyn SourceLookup,
    interrupt: Interrupt,
}

impl<'a> RootSync<'a> {
    /// Construct new root sync.
    pub fn new(context: &'a Context, elevator: &'a dyn Elevate, lookup: &'a dyn SourceLookup) -> Self {
        Self {
            context,
            elevator,
            lookup,
            interrupt: Interrupt::default(),
        }
    }

    /// Stop early once interrupt is raised.
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Push mirror root onto privileged file system.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError`] for setup problems and unexpected file system
    ///   state. Skipped, failed, or interrupted removals are not errors.
    #[instrument(skip(self, prompter), level = "debug")]
    pub fn push(&self, prompter: &mut dyn Prompter) -> Result<Outcome> {
        if let Some(skip) = self.push_guard() {
            info!("skip push: {skip}");
            return Ok(Outcome::Skipped(skip));
        }
        if let Err(err) = self.warm_up() {
            return self.interrupted_or(err);
        }

        let mapping = self.context.mapping();
        let copied = self.propagate()?;
        if self.interrupt.is_raised() {
            warn!("interrupted after copying {copied} files, nothing removed");
            return Ok(Outcome::Interrupted);
        }

        let history = RootList::load(self.context.rootlist())?;
        let classifier = ExactnessClassifier::new(
            mapping.mirror_root(),
            self.context.source_dir().map(Path::to_path_buf),
            self.context.exact_pattern().clone(),
            self.lookup,
        );
        let removable = RemovalPlanner::new(mapping, classifier, self.elevator)
            .find_removable(self.context.invocation().target_paths(), &history)?;

        let mut candidates = BTreeSet::new();
        for path in &removable {
            if let Some(privileged) = mapping.to_privileged(path) {
                if probe(self.elevator, &privileged)?.0.is_some() {
                    candidates.insert(privileged);
                }
            }
        }
        let removed = Confirmer::new(mapping, self.elevator, prompter)
            .with_interrupt(self.interrupt.clone())
            .confirm_and_remove(&candidates)?;

        let removed_mirror: BTreeSet<PathBuf> =
            removed.iter().filter_map(|path| mapping.to_mirror(path)).collect();
        let mut deferred = RootList::new();
        for path in removable.iter().chain(history.iter()) {
            if !removed_mirror.contains(path) && self.is_deferrable(path)? {
                deferred.insert(path.clone());
            }
        }
        deferred.save(self.context.rootlist())?;
        if !deferred.is_empty() {
            warn!("{} removable paths deferred to next run", deferred.len());
        }

        Ok(Outcome::Pushed(PushReport {
            copied,
            removed,
            deferred,
        }))
    }

    /// Pull privileged changes back into mirror root.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::MirrorNotDir`] if mirror root is not a directory.
    /// - Return [`SyncError`] if mirror cannot be walked or elevation is
    ///   unavailable.
    #[instrument(skip(self), level = "debug")]
    pub fn pull(&self) -> Result<Outcome> {
        let mirror_root = self.context.mapping().mirror_root();
        if !mirror_root.exists() {
            let skip = Skip::MirrorMissing(mirror_root.to_path_buf());
            info!("skip pull: {skip}");
            return Ok(Outcome::Skipped(skip));
        }
        if !mirror_root.is_dir() {
            return Err(SyncError::MirrorNotDir(mirror_root.to_path_buf()));
        }
        if !self.touches_mirror() {
            info!("skip pull: {}", Skip::OutsideMirror);
            return Ok(Outcome::Skipped(Skip::OutsideMirror));
        }
        if let Err(err) = self.warm_up() {
            return self.interrupted_or(err);
        }

        let report = Puller::new(self.context.mapping(), self.elevator)
            .with_interrupt(self.interrupt.clone())
            .pull()?;
        if self.interrupt.is_raised() {
            warn!(
                "interrupted after pulling {} changed and {} removed files",
                report.refreshed, report.removed
            );
            return Ok(Outcome::Interrupted);
        }

        Ok(Outcome::Pulled(report))
    }

    /// Swallow error of operation cut short by interrupt.
    fn interrupted_or(&self, err: SyncError) -> Result<Outcome> {
        if self.interrupt.is_raised() {
            warn!("interrupted before anything was done");
            return Ok(Outcome::Interrupted);
        }
        Err(err)
    }

    fn push_guard(&self) -> Option<Skip> {
        let mirror_root = self.context.mapping().mirror_root();
        let invocation = self.context.invocation();

        if !mirror_root.is_dir() {
            return Some(Skip::MirrorMissing(mirror_root.to_path_buf()));
        }
        if invocation.subcommand() != "apply" {
            return Some(Skip::NotApply(invocation.subcommand().to_string()));
        }
        if self.context.trigger() == Trigger::Script && invocation.target_paths().is_empty() {
            return Some(Skip::ScriptWithoutTargets);
        }
        if invocation.is_dry_run() {
            return Some(Skip::DryRun);
        }
        if !self.touches_mirror() {
            return Some(Skip::OutsideMirror);
        }

        None
    }

    /// Check if chezmoi is working on anything in the mirror root.
    ///
    /// A target above the mirror root covers it too.
    fn touches_mirror(&self) -> bool {
        let mirror_root = self.context.mapping().mirror_root();
        let targets = self.context.invocation().target_paths();
        targets.is_empty()
            || targets
                .iter()
                .any(|target| target.starts_with(mirror_root) || mirror_root.starts_with(target))
    }

    fn warm_up(&self) -> Result<()> {
        if self.context.elevation().non_interactive {
            return Ok(());
        }
        Ok(self.elevator.warm_up()?)
    }

    #[instrument(skip(self), level = "debug")]
    fn propagate(&self) -> Result<usize> {
        let mapping = self.context.mapping();
        let bar = ProgressBar::new_spinner();
        bar.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
        bar.enable_steady_tick(Duration::from_millis(100));

        let mut copied = 0;
        for path in descendants(mapping.mirror_root())? {
            if self.interrupt.is_raised() {
                break;
            }
            let Some(status) = helper::stat(&path)? else {
                continue;
            };
            let Some(privileged) = mapping.to_privileged(&path) else {
                continue;
            };
            match status.kind {
                EntryKind::File | EntryKind::Symlink => {}
                EntryKind::Dir => continue,
                EntryKind::Other => {
                    warn!("skip special file {}", path.display());
                    continue;
                }
            }

            bar.set_message(privileged.display().to_string());
            let result = self.needs_copy(&path, status.kind, &privileged).and_then(|needed| {
                if needed {
                    bar.suspend(|| self.elevator.copy_file(&path, &privileged))?;
                }
                Ok(needed)
            });
            match result {
                Ok(true) => copied += 1,
                Ok(false) => {}
                Err(_) if self.interrupt.is_raised() => break,
                Err(err) => return Err(err),
            }
        }
        bar.finish_and_clear();
        info!(
            "copied {copied} files from {}",
            mapping.mirror_root().display()
        );

        Ok(copied)
    }

    fn needs_copy(&self, mirror: &Path, kind: EntryKind, privileged: &Path) -> Result<bool> {
        let (status, _) = probe(self.elevator, privileged)?;
        let Some(status) = status else {
            if let Some((path, found)) = self.blocking_ancestor(privileged)? {
                return Err(SyncError::NotADirectory { path, found });
            }
            debug!("{} does not exist yet", privileged.display());
            return Ok(true);
        };

        match (kind, status.kind) {
            (_, found @ (EntryKind::Dir | EntryKind::Other)) => Err(SyncError::UnexpectedKind {
                path: privileged.to_path_buf(),
                found,
            }),
            (EntryKind::Symlink, EntryKind::Symlink) => {
                match (fs::read_link(mirror), fs::read_link(privileged)) {
                    (Ok(ours), Ok(theirs)) => Ok(ours != theirs),
                    _ => Ok(true),
                }
            }
            (EntryKind::File, EntryKind::File) => {
                Ok(Comparator::new(self.elevator).has_changed(mirror, privileged)?)
            }
            _ => Ok(true),
        }
    }

    /// Closest existing ancestor of privileged path, if it cannot hold
    /// entries.
    fn blocking_ancestor(&self, privileged: &Path) -> Result<Option<(PathBuf, EntryKind)>> {
        let root = self.context.mapping().privileged_root();
        for ancestor in privileged.ancestors().skip(1) {
            if !ancestor.starts_with(root) {
                break;
            }
            let Some(status) = probe(self.elevator, ancestor)?.0 else {
                continue;
            };

            return match status.kind {
                EntryKind::Dir => Ok(None),
                // INVARIANT: Symlinked directories hold entries just fine.
                EntryKind::Symlink if fs::metadata(ancestor).map_or(true, |m| m.is_dir()) => {
                    Ok(None)
                }
                found => Ok(Some((ancestor.to_path_buf(), found))),
            };
        }

        Ok(None)
    }

    /// Check if mirror path still belongs in the rootlist.
    ///
    /// It must be gone from the mirror, and its privileged counterpart must
    /// still be around to be removed.
    fn is_deferrable(&self, path: &Path) -> Result<bool> {
        if helper::stat(path)?.is_some() {
            return Ok(false);
        }
        let Some(privileged) = self.context.mapping().to_privileged(path) else {
            return Ok(false);
        };

        Ok(probe(self.elevator, &privileged)?.0.is_some())
    }
}

/// Every path beneath root in sorted walk order, excluding root itself.
///
/// Symlinks are reported, never followed. A missing root has no descendants.
pub(crate) fn descendants(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a: &OsStr, b: &OsStr| a.cmp(b))
        .build();

    let mut paths = Vec::new();
    for entry in walker {
        let entry = entry?;
        if entry.depth() > 0 {
            paths.push(entry.into_path());
        }
    }

    Ok(paths)
}

/// Status of privileged path, elevating if it cannot be inspected directly.
///
/// Also reports whether elevation was needed.
pub(crate) fn probe(elevator: &dyn Elevate, path: &Path) -> Result<(Option<Status>, bool)> {
    match helper::stat(path) {
        Ok(status) => Ok((status, false)),
        Err(err) if err.is_permission_denied() => {
            debug!("stat {} elevated for permission error", path.display());
            Ok((elevator.stat(path)?, true))
        }
        Err(err) => Err(err.into()),
    }
}

/// Root sync error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Mirror root exists but is not a directory.
    #[error("mirror root {:?} is not a directory", .0.display())]
    MirrorNotDir(PathBuf),

    /// Privileged counterpart is neither file nor symlink.
    #[error("expected file or symlink at {:?}, found {found:?}", path.display())]
    UnexpectedKind { path: PathBuf, found: EntryKind },

    /// Existing ancestor of privileged path is not a directory.
    #[error("expected directory at {:?}, found {found:?}", path.display())]
    NotADirectory { path: PathBuf, found: EntryKind },

    /// Removal would hit a protected path.
    #[error("refusing to remove protected path {:?}", .0.display())]
    UnsafeRemoval(PathBuf),

    /// Path could not be inspected.
    #[error("failed to inspect {:?}", path.display())]
    Inspect {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Mirror path could not be removed.
    #[error("failed to remove {:?}", path.display())]
    Remove {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Change detection failed.
    #[error(transparent)]
    Compare(#[from] CompareError),

    /// Elevated operation failed.
    #[error(transparent)]
    Elevate(#[from] ElevateError),

    /// Local helper operation failed.
    #[error(transparent)]
    Helper(#[from] HelperError),

    /// Rootlist could not be loaded or saved.
    #[error(transparent)]
    RootList(#[from] RootListError),

    /// Mirror tree could not be walked.
    #[error(transparent)]
    Walk(#[from] ignore::Error),

    /// Progress bar template is invalid.
    #[error(transparent)]
    ProgressStyle(#[from] indicatif::style::TemplateError),
}

impl SyncError {
    /// Process exit code for error.
    ///
    /// Setup problems exit with 1, unexpected state found mid-run exits with 2.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::UnexpectedKind { .. } | Self::NotADirectory { .. } | Self::UnsafeRemoval(_) => 2,
            Self::Compare(CompareError::NotFound(_) | CompareError::InvalidInput(_)) => 2,
            Self::Helper(err) | Self::Elevate(ElevateError::Helper(err)) => match err {
                HelperError::ProtectedRoot(_) | HelperError::IsDirectory(_) => 2,
                _ => 1,
            },
            _ => 1,
        }
    }

    /// Check if error came from elevation being unavailable altogether.
    pub fn is_elevation_unavailable(&self) -> bool {
        match self {
            Self::Elevate(err) | Self::Compare(CompareError::Elevate(err)) => err.is_unavailable(),
            _ => false,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn descendants_sorted_without_root() -> anyhow::Result<()> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("etc/cron.d"))?;
        fs::write(dir.path().join("etc/cron.d/jobA"), "")?;
        fs::write(dir.path().join("etc/.hidden"), "")?;
        fs::write(dir.path().join("boot"), "")?;

        let result = descendants(dir.path())?;
        let expect: Vec<PathBuf> = ["boot", "etc", "etc/.hidden", "etc/cron.d", "etc/cron.d/jobA"]
            .into_iter()
            .map(|path| dir.path().join(path))
            .collect();
        assert_eq!(result, expect);
        assert!(descendants(&dir.path().join("missing"))?.is_empty());

        Ok(())
    }

    #[test]
    fn exit_codes_split_setup_from_state() {
        assert_eq!(SyncError::MirrorNotDir("/home/blah/.root".into()).exit_code(), 1);
        assert_eq!(SyncError::UnsafeRemoval("/".into()).exit_code(), 2);
        assert_eq!(
            SyncError::UnexpectedKind {
                path: "/etc/hosts".into(),
                found: EntryKind::Dir
            }
            .exit_code(),
            2
        );
        assert_eq!(
            SyncError::NotADirectory {
                path: "/etc/foo".into(),
                found: EntryKind::File
            }
            .exit_code(),
            2
        );
        assert_eq!(SyncError::Elevate(ElevateError::NotInstalled("sudo")).exit_code(), 1);
    }

    #[test]
    fn interrupt_is_shared_between_clones() {
        let interrupt = Interrupt::new();
        let handler = interrupt.clone();
        assert!(!interrupt.is_raised());

        handler.raise();
        assert!(interrupt.is_raised());
    }

    #[test]
    fn unavailable_elevation_is_detected_through_compare() {
        let err = SyncError::Compare(CompareError::Elevate(ElevateError::NoCredential("sudo")));
        assert!(err.is_elevation_unavailable());
        assert!(!SyncError::UnsafeRemoval("/".into()).is_elevation_unavailable());
    }
}
