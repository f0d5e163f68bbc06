// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Exact directory classification.
//!
//! Chezmoi marks a directory as __exact__ through an `exact_` attribute in the
//! name of its source directory, e.g., `dot_root/etc/exact_cron.d`. Anything
//! inside the privileged counterpart of an exact directory that the rendered
//! mirror lacks is a stray, and thus removable.
//!
//! Asking chezmoi for the source path of every directory is slow, so the
//! source directory is globbed first. Each mirror path component is turned
//! into a pattern that tolerates any attribute prefix, and only when the glob
//! does not settle on a single directory is chezmoi asked.

use crate::chezmoi::SourceLookup;

use regex::Regex;
use std::{
    collections::HashMap,
    path::{Component, Path, PathBuf},
};
use tracing::{debug, instrument};

/// Decide which mirror directories demand exact membership.
pub struct ExactnessClassifier<'a> {
    mirror_root: PathBuf,
    source_dir: Option<PathBuf>,
    pattern: Regex,
    lookup: &'a dyn SourceLookup,
    memo: HashMap<PathBuf, bool>,
}

impl<'a> ExactnessClassifier<'a> {
    /// Construct new classifier for directories under target mirror root.
    ///
    /// Without a source directory to glob, every query goes through lookup.
    pub fn new(
        mirror_root: impl Into<PathBuf>,
        source_dir: Option<PathBuf>,
        pattern: Regex,
        lookup: &'a dyn SourceLookup,
    ) -> Self {
        Self {
            mirror_root: mirror_root.into(),
            source_dir,
            pattern,
            lookup,
            memo: HashMap::new(),
        }
    }

    /// Check if mirror directory is exact.
    ///
    /// Memoized per path for the lifetime of the classifier. A directory
    /// whose source path cannot be found is never exact.
    #[instrument(skip(self), level = "debug")]
    pub fn is_exact(&mut self, dir: &Path) -> bool {
        if let Some(exact) = self.memo.get(dir) {
            return *exact;
        }

        let source = match self.glob_source(dir) {
            Some(source) => Some(source),
            None => self.lookup.source_path(dir),
        };
        let exact = source
            .as_deref()
            .and_then(Path::file_name)
            .is_some_and(|name| self.pattern.is_match(&name.to_string_lossy()));
        debug!("{} exact: {exact} (source {source:?})", dir.display());

        self.memo.insert(dir.to_path_buf(), exact);
        exact
    }

    fn glob_source(&self, dir: &Path) -> Option<PathBuf> {
        let source_dir = self.source_dir.as_deref()?;
        let pattern = source_pattern(&self.mirror_root, source_dir, dir)?;

        let mut matches = glob::glob(&pattern)
            .ok()?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.is_dir());
        let found = matches.next()?;

        // INVARIANT: Ambiguity is settled by chezmoi, not by glob order.
        if matches.next().is_some() {
            debug!("glob {pattern:?} is ambiguous, asking chezmoi");
            return None;
        }

        Some(found)
    }
}

/// Glob pattern locating source directory of mirror directory.
///
/// Path components are taken relative to the parent of the mirror root, so
/// the mirror root's own name takes part in the match. A leading dot becomes
/// `dot_`, and every component may carry any attribute prefix.
fn source_pattern(mirror_root: &Path, source_dir: &Path, dir: &Path) -> Option<String> {
    let relative = dir.strip_prefix(mirror_root.parent()?).ok()?;

    let mut parts = Vec::new();
    for component in relative.components() {
        let Component::Normal(name) = component else {
            return None;
        };
        let name = name.to_string_lossy();
        let name = match name.strip_prefix('.') {
            Some(rest) => format!("dot_{rest}"),
            None => name.into_owned(),
        };
        parts.push(format!("*{}", glob::Pattern::escape(&name)));
    }
    if parts.is_empty() {
        return None;
    }

    let base = glob::Pattern::escape(&source_dir.to_string_lossy());
    Some(format!("{base}/**/{}", parts.join("/")))
}
