// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Reverse sync from the privileged file system into the mirror.
//!
//! Run before chezmoi applies anything, so that edits made directly to
//! privileged files show up in the mirror and thus in `chezmoi diff` or
//! `chezmoi re-add`, instead of being silently overwritten by the push.

use crate::{
    elevate::{Elevate, InProcess},
    helper::{self, EntryKind},
    path::RootMapping,
    sync::{compare::Comparator, descendants, probe, Interrupt, Result, SyncError},
};

use std::{
    fs::{self, File},
    io::{self, Read},
    path::Path,
};
use tracing::{debug, error, info, instrument, warn};

/// Tally of one pull pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PullReport {
    /// Mirror files overwritten with privileged content.
    pub refreshed: usize,

    /// Mirror files deleted because their privileged counterpart is gone.
    pub removed: usize,
}

enum Pulled {
    Unchanged,
    Refreshed,
    Removed,
}

/// Refreshes the mirror from the privileged file system.
pub struct Puller<'a> {
    mapping: &'a RootMapping,
    elevator: &'a dyn Elevate,
    interrupt: Interrupt,
}

impl<'a> Puller<'a> {
    /// Construct new puller.
    pub fn new(mapping: &'a RootMapping, elevator: &'a dyn Elevate) -> Self {
        Self {
            mapping,
            elevator,
            interrupt: Interrupt::default(),
        }
    }

    /// Stop pulling once interrupt is raised.
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Pull privileged changes into every file of the mirror.
    ///
    /// Failures on single files are logged and skipped.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Walk`] if mirror tree cannot be walked.
    /// - Return [`SyncError::Elevate`] if elevation is unavailable.
    #[instrument(skip(self), level = "debug")]
    pub fn pull(&self) -> Result<PullReport> {
        let mut report = PullReport::default();
        for path in descendants(self.mapping.mirror_root())? {
            if self.interrupt.is_raised() {
                break;
            }
            match self.pull_one(&path) {
                Ok(Pulled::Unchanged) => {}
                Ok(Pulled::Refreshed) => report.refreshed += 1,
                Ok(Pulled::Removed) => report.removed += 1,
                Err(err) if err.is_elevation_unavailable() => return Err(err),
                Err(err) => error!("failed to pull {}: {err:?}", path.display()),
            }
        }
        info!(
            "pulled {} changed and {} removed files into {}",
            report.refreshed,
            report.removed,
            self.mapping.mirror_root().display()
        );

        Ok(report)
    }

    fn pull_one(&self, mirror: &Path) -> Result<Pulled> {
        let mirror_status = helper::stat(mirror)?;
        let Some(mirror_status) = mirror_status.filter(|status| status.kind != EntryKind::Dir)
        else {
            return Ok(Pulled::Unchanged);
        };
        let Some(privileged) = self.mapping.to_privileged(mirror) else {
            return Ok(Pulled::Unchanged);
        };

        let (status, elevated) = probe(self.elevator, &privileged)?;
        let Some(status) = status else {
            info!("remove {} for missing {}", mirror.display(), privileged.display());
            fs::remove_file(mirror).map_err(|err| SyncError::Remove {
                source: err,
                path: mirror.to_path_buf(),
            })?;
            return Ok(Pulled::Removed);
        };

        match (status.kind, mirror_status.kind) {
            (EntryKind::Symlink, EntryKind::Symlink) => {
                if fs::read_link(&privileged).ok() == fs::read_link(mirror).ok() {
                    return Ok(Pulled::Unchanged);
                }
                InProcess.copy_file(&privileged, mirror)?;
            }
            (EntryKind::Symlink, _) => InProcess.copy_file(&privileged, mirror)?,
            (EntryKind::File, kind) => {
                let comparator = Comparator::new(self.elevator);
                let changed = match kind {
                    EntryKind::File if elevated => comparator.has_changed_su(&privileged, mirror)?,
                    EntryKind::File => comparator.has_changed(&privileged, mirror)?,
                    _ => true,
                };
                if !changed {
                    return Ok(Pulled::Unchanged);
                }
                self.refresh(&privileged, mirror, status.mode)?;
            }
            (kind, _) => {
                warn!("skip pulling {} of kind {kind:?}", privileged.display());
                return Ok(Pulled::Unchanged);
            }
        }

        Ok(Pulled::Refreshed)
    }

    fn refresh(&self, privileged: &Path, mirror: &Path, mode: u32) -> Result<()> {
        info!("pulling file {} -> {}", privileged.display(), mirror.display());
        let content = match File::open(privileged) {
            Ok(mut file) => {
                let mut content = Vec::new();
                file.read_to_end(&mut content)
                    .map_err(|err| SyncError::Inspect {
                        source: err,
                        path: privileged.to_path_buf(),
                    })?;
                content
            }
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                debug!("read {} elevated for permission error", privileged.display());
                let mut content = Vec::new();
                self.elevator.read_into(privileged, &mut content)?;
                content
            }
            Err(err) => {
                return Err(SyncError::Inspect {
                    source: err,
                    path: privileged.to_path_buf(),
                })
            }
        };

        // INVARIANT: Replace instead of truncate, the old file may be read-only or a symlink.
        InProcess.remove(mirror)?;
        InProcess.write_from(mirror, &mut content.as_slice())?;
        helper::set_mode(mirror, mode)?;

        Ok(())
    }
}
