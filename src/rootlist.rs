// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deferred removal tracking.
//!
//! Removing privileged files is never done without the user's say so. Any
//! removable path the user skipped, or that failed to be removed, must be
//! offered again on the next run even if nothing else points at it anymore.
//! Dotroot keeps these paths in the __rootlist__, a plain text file inside
//! the cache directory.
//!
//! # Layout
//!
//! One mirror path per line, UTF-8, newline terminated. Blank lines are
//! ignored. A missing rootlist is the same as an empty one.

use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read_to_string, write},
    io,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Persisted set of deferred removal candidates.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RootList {
    paths: BTreeSet<PathBuf>,
}

impl RootList {
    /// Construct new empty rootlist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rootlist from file.
    ///
    /// # Errors
    ///
    /// - Return [`RootListError::Read`] if file exists but cannot be read.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = match read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("no rootlist at {}, starting without history", path.display());
                return Ok(Self::new());
            }
            Err(err) => {
                return Err(RootListError::Read {
                    source: err,
                    path: path.to_path_buf(),
                })
            }
        };

        let rootlist = Self::from(content.as_str());
        debug!(
            "loaded {} deferred paths from {}",
            rootlist.len(),
            path.display()
        );

        Ok(rootlist)
    }

    /// Save rootlist to file, replacing whatever was there.
    ///
    /// # Errors
    ///
    /// - Return [`RootListError::Write`] if file or its parent directory
    ///   cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let to_error = |err: io::Error| RootListError::Write {
            source: err,
            path: path.to_path_buf(),
        };

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            mkdirp::mkdirp(parent).map_err(to_error)?;
        }
        write(path, self.to_string().as_bytes()).map_err(to_error)?;
        debug!("saved {} deferred paths to {}", self.len(), path.display());

        Ok(())
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>) -> bool {
        self.paths.insert(path.into())
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.paths.iter()
    }
}

impl Display for RootList {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for path in &self.paths {
            writeln!(fmt, "{}", path.display())?;
        }

        Ok(())
    }
}

impl From<&str> for RootList {
    fn from(content: &str) -> Self {
        let paths = content
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.trim().is_empty())
            .map(PathBuf::from)
            .collect();

        Self { paths }
    }
}

impl FromIterator<PathBuf> for RootList {
    fn from_iter<I: IntoIterator<Item = PathBuf>>(iter: I) -> Self {
        Self {
            paths: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a RootList {
    type Item = &'a PathBuf;
    type IntoIter = std::collections::btree_set::Iter<'a, PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.iter()
    }
}

/// Rootlist persistence error types.
#[derive(Debug, thiserror::Error)]
pub enum RootListError {
    /// Rootlist cannot be read from.
    #[error("failed to read rootlist at {:?}", path.display())]
    Read {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Rootlist cannot be written to.
    #[error("failed to write rootlist at {:?}", path.display())]
    Write {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = RootListError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn parse_skips_blank_lines() {
        let rootlist = RootList::from(indoc! {"
            /home/blah/.root/etc/cron.d/jobB

            /home/blah/.root/etc/hosts.deny
        "});

        let expect: Vec<&Path> = vec![
            Path::new("/home/blah/.root/etc/cron.d/jobB"),
            Path::new("/home/blah/.root/etc/hosts.deny"),
        ];
        assert_eq!(rootlist.iter().map(PathBuf::as_path).collect::<Vec<_>>(), expect);
    }

    #[test]
    fn display_is_sorted_and_newline_terminated() {
        let rootlist: RootList = ["/b", "/a", "/c with space"]
            .into_iter()
            .map(PathBuf::from)
            .collect();

        let expect = indoc! {"
            /a
            /b
            /c with space
        "};
        assert_eq!(rootlist.to_string(), expect);
    }

    #[test]
    fn missing_file_is_empty_history() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let rootlist = RootList::load(dir.path().join("rootlist"))?;
        assert!(rootlist.is_empty());

        Ok(())
    }

    #[test]
    fn save_then_load_yields_same_set() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested/cache/rootlist");
        let mut rootlist = RootList::new();
        rootlist.insert("/home/blah/.root/etc/cron.d/jobB");
        rootlist.insert("/home/blah/.root/etc/sudoers.d/old");

        rootlist.save(&path)?;
        assert_eq!(RootList::load(&path)?, rootlist);

        // Overwrites instead of appending.
        RootList::new().save(&path)?;
        assert!(RootList::load(&path)?.is_empty());

        Ok(())
    }
}
