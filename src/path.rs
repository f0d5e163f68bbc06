// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, and map paths between the mirror root and the privileged
//! file system it stands in for.
//!
//! # Mirror Root
//!
//! The __mirror root__ is a directory inside the user's home, `~/.root` by
//! default, whose subtree structurally mirrors the privileged file system
//! rooted at `/`. Thus, `~/.root/etc/hosts` stands in for `/etc/hosts`. The
//! mapping between the two is a pure path transform that needs no other state.

use std::path::{Component, Path, PathBuf};

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine default absolute path to the settings file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/dotroot/config.toml`.
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if configuration directory cannot be determined.
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("dotroot").join("config.toml"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to the cache directory.
///
/// Uses XDG Base Directory path `$XDG_CACHE_HOME/dotroot`. Only consulted
/// when chezmoi did not hand us its own cache directory.
///
/// # Errors
///
/// - Return [`NoWayHome`] if cache directory cannot be determined.
pub fn default_cache_dir() -> Result<PathBuf> {
    dirs::cache_dir()
        .map(|path| path.join("dotroot"))
        .ok_or(NoWayHome)
}

/// Default privileged root for the current platform.
///
/// `/` on POSIX systems, the system drive root on Windows.
pub fn default_privileged_root() -> PathBuf {
    #[cfg(windows)]
    {
        let drive = std::env::var("SystemDrive").unwrap_or_else(|_| "C:".into());
        PathBuf::from(format!("{drive}\\"))
    }
    #[cfg(not(windows))]
    {
        PathBuf::from("/")
    }
}

/// Check if path is the root of whatever file system it lives on.
///
/// A path is a file system root when it has no normal components at all,
/// e.g., `/`, `C:\`, or `\\?\C:\`.
pub fn is_filesystem_root(path: impl AsRef<Path>) -> bool {
    path.as_ref().has_root()
        && path
            .as_ref()
            .components()
            .all(|component| !matches!(component, Component::Normal(_)))
}

/// Invertible mapping between mirror paths and privileged paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootMapping {
    mirror_root: PathBuf,
    privileged_root: PathBuf,
}

impl RootMapping {
    /// Construct new root mapping.
    pub fn new(mirror_root: impl Into<PathBuf>, privileged_root: impl Into<PathBuf>) -> Self {
        Self {
            mirror_root: mirror_root.into(),
            privileged_root: privileged_root.into(),
        }
    }

    pub fn mirror_root(&self) -> &Path {
        self.mirror_root.as_path()
    }

    pub fn privileged_root(&self) -> &Path {
        self.privileged_root.as_path()
    }

    /// Check if path is the mirror root or lives somewhere beneath it.
    pub fn in_mirror(&self, path: impl AsRef<Path>) -> bool {
        path.as_ref().starts_with(&self.mirror_root)
    }

    /// Project mirror path into privileged space.
    ///
    /// Returns `None` if path does not live under the mirror root.
    pub fn to_privileged(&self, mirror_path: impl AsRef<Path>) -> Option<PathBuf> {
        mirror_path
            .as_ref()
            .strip_prefix(&self.mirror_root)
            .ok()
            .map(|relative| self.privileged_root.join(relative))
    }

    /// Project privileged path back into mirror space.
    ///
    /// Returns `None` if path does not live under the privileged root.
    pub fn to_mirror(&self, privileged_path: impl AsRef<Path>) -> Option<PathBuf> {
        privileged_path
            .as_ref()
            .strip_prefix(&self.privileged_root)
            .ok()
            .map(|relative| self.mirror_root.join(relative))
    }

    /// Check if privileged path must never be touched by a removal.
    ///
    /// Both the configured privileged root and any real file system root are
    /// off limits.
    pub fn is_protected(&self, privileged_path: impl AsRef<Path>) -> bool {
        let path = privileged_path.as_ref();
        is_filesystem_root(path) || path == self.privileged_root
    }
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
