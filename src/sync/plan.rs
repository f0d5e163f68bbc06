// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Removal planning.
//!
//! A privileged path is removable when its mirror path is gone, or when it
//! sits inside an exact directory whose rendered mirror lacks it. The first
//! case alone misses privileged files that never had a mirror counterpart,
//! so exact directories are always cross-checked against their privileged
//! listing.

use crate::{
    elevate::Elevate,
    helper,
    path::RootMapping,
    rootlist::RootList,
    sync::{descendants, exact::ExactnessClassifier, Result, SyncError},
};

use std::{
    collections::BTreeSet,
    ffi::OsString,
    fs,
    io,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Compute mirror paths whose privileged counterparts should be removed.
pub struct RemovalPlanner<'a> {
    mapping: &'a RootMapping,
    classifier: ExactnessClassifier<'a>,
    elevator: &'a dyn Elevate,
}

impl<'a> RemovalPlanner<'a> {
    /// Construct new removal planner.
    pub fn new(
        mapping: &'a RootMapping,
        classifier: ExactnessClassifier<'a>,
        elevator: &'a dyn Elevate,
    ) -> Self {
        Self {
            mapping,
            classifier,
            elevator,
        }
    }

    /// Find removable mirror paths.
    ///
    /// Scope the candidate universe to descendants of target paths, or the
    /// whole mirror root if none are given, then add every path carried over
    /// from history.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::UnsafeRemoval`] if a candidate projects onto a
    ///   protected privileged path.
    /// - Return [`SyncError::Walk`] if mirror tree cannot be walked.
    /// - Return [`SyncError::Elevate`] if privileged directory cannot be
    ///   listed even with elevation.
    #[instrument(skip(self, target_paths, history), level = "debug")]
    pub fn find_removable(
        &mut self,
        target_paths: &BTreeSet<PathBuf>,
        history: &RootList,
    ) -> Result<BTreeSet<PathBuf>> {
        let candidates = self.candidates(target_paths, history)?;
        debug!("considering {} candidates", candidates.len());

        let mut removable = BTreeSet::new();
        let mut exact_dirs = BTreeSet::new();
        for candidate in &candidates {
            if let Some(parent) = candidate.parent().filter(|p| self.mapping.in_mirror(p)) {
                if self.classifier.is_exact(parent) {
                    exact_dirs.insert(parent.to_path_buf());
                }
            }

            match fs::symlink_metadata(candidate) {
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    debug!("mirror path {} is gone", candidate.display());
                    removable.insert(candidate.clone());
                }
                Ok(metadata) if metadata.is_dir() => {
                    if self.classifier.is_exact(candidate) {
                        exact_dirs.insert(candidate.clone());
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    return Err(SyncError::Inspect {
                        source: err,
                        path: candidate.clone(),
                    })
                }
            }
        }

        for dir in &exact_dirs {
            removable.extend(self.strays(dir)?);
        }

        for path in &removable {
            self.check_safe(path)?;
        }
        info!(
            "found {} removable paths across {} exact directories",
            removable.len(),
            exact_dirs.len()
        );

        Ok(removable)
    }

    fn candidates(
        &self,
        target_paths: &BTreeSet<PathBuf>,
        history: &RootList,
    ) -> Result<BTreeSet<PathBuf>> {
        let mirror_root = self.mapping.mirror_root();
        let mut candidates = BTreeSet::new();

        // INVARIANT: A target at or above the mirror root scopes the whole mirror.
        let scoped: Vec<&PathBuf> = target_paths
            .iter()
            .filter(|target| target.starts_with(mirror_root))
            .collect();
        if scoped.is_empty() || scoped.iter().any(|target| target.as_path() == mirror_root) {
            candidates.extend(descendants(mirror_root)?);
        } else {
            for target in scoped {
                candidates.insert(target.clone());
                if target.is_dir() {
                    candidates.extend(descendants(target)?);
                }
            }
        }

        for path in history {
            if self.mapping.in_mirror(path) {
                candidates.insert(path.clone());
            } else {
                warn!("ignore history entry {} outside mirror root", path.display());
            }
        }

        Ok(candidates)
    }

    /// Privileged entries of exact directory with no rendered mirror entry.
    fn strays(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let Some(privileged) = self.mapping.to_privileged(dir) else {
            return Ok(Vec::new());
        };

        let mirrored: BTreeSet<OsString> = helper::list(dir)?.into_iter().collect();

        let strays = self
            .privileged_listing(&privileged)?
            .into_iter()
            .filter(|name| !mirrored.contains(name))
            .map(|name| dir.join(name))
            .collect::<Vec<_>>();
        if !strays.is_empty() {
            debug!("exact directory {} has strays {strays:?}", dir.display());
        }

        Ok(strays)
    }

    /// Entry names of privileged directory, none if it does not exist yet.
    fn privileged_listing(&self, dir: &Path) -> Result<Vec<OsString>> {
        match helper::list(dir) {
            Ok(names) => Ok(names),
            Err(err) if err.is_permission_denied() => {
                debug!("list {} elevated for permission error", dir.display());
                Ok(self.elevator.list(dir)?)
            }
            Err(err) => Err(SyncError::Helper(err)),
        }
    }

    fn check_safe(&self, path: &Path) -> Result<()> {
        match self.mapping.to_privileged(path) {
            Some(privileged) if !self.mapping.is_protected(&privileged) => Ok(()),
            Some(privileged) => Err(SyncError::UnsafeRemoval(privileged)),
            None => Err(SyncError::UnsafeRemoval(path.to_path_buf())),
        }
    }
}
