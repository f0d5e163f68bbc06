// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Chezmoi collaboration.
//!
//! Dotroot never manages dotfiles itself. It rides on top of chezmoi, and asks
//! it a small number of questions: what subcommand is running, what paths it
//! is running on, what its template data says, and what source path backs a
//! given target path. Everything else chezmoi does is treated as a black box.
//!
//! # See Also
//!
//! - [Chezmoi hooks](https://www.chezmoi.io/reference/configuration-file/hooks/)
//! - [Source state attributes](https://www.chezmoi.io/reference/source-state-attributes/)

pub mod args;

pub use args::{ArgsError, Invocation};

use serde::Deserialize;
use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, instrument};

/// Resolve target paths to the source paths that back them.
pub trait SourceLookup {
    /// Lookup source path backing target path.
    ///
    /// Returns `None` if the target is not managed, or the lookup failed.
    fn source_path(&self, target: &Path) -> Option<PathBuf>;
}

/// Chezmoi command-line client.
#[derive(Debug, Clone)]
pub struct Chezmoi {
    executable: PathBuf,
}

impl Chezmoi {
    /// Construct new chezmoi client around binary at target path.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Locate chezmoi binary through `PATH`.
    ///
    /// # Errors
    ///
    /// - Return [`ChezmoiError::NotFound`] if chezmoi is not installed.
    pub fn locate() -> Result<Self> {
        which::which("chezmoi")
            .map(Self::new)
            .map_err(|_| ChezmoiError::NotFound)
    }

    pub fn executable(&self) -> &Path {
        self.executable.as_path()
    }

    /// Query template data of chezmoi.
    ///
    /// # Errors
    ///
    /// - Return [`ChezmoiError::Syscall`] if chezmoi cannot be run or fails.
    /// - Return [`ChezmoiError::Data`] if output is not valid JSON data.
    #[instrument(skip(self), level = "debug")]
    pub fn data(&self) -> Result<ChezmoiData> {
        let output = self.call(["data", "--format", "json"])?;
        Ok(output.parse()?)
    }

    fn call(&self, args: impl IntoIterator<Item = impl AsRef<OsStr>>) -> Result<String> {
        let output = Command::new(&self.executable)
            .args(args)
            .output()
            .map_err(|err| ChezmoiError::Syscall {
                source: err,
                program: self.executable.clone(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(output.stderr.as_slice());
            return Err(ChezmoiError::Failed {
                program: self.executable.clone(),
                status: output.status.code(),
                stderr: stderr.trim_end().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(output.stdout.as_slice()).into_owned())
    }
}

impl SourceLookup for Chezmoi {
    /// Ask chezmoi for the source path of target.
    ///
    /// Failure is never fatal here. A target chezmoi does not know about has
    /// no source path.
    fn source_path(&self, target: &Path) -> Option<PathBuf> {
        match self.call([OsStr::new("source-path"), target.as_os_str()]) {
            Ok(stdout) => {
                let stdout = stdout.trim();
                (!stdout.is_empty()).then(|| PathBuf::from(stdout))
            }
            Err(error) => {
                debug!("failed to find source path of {}: {error}", target.display());
                None
            }
        }
    }
}

/// Subset of chezmoi template data that dotroot cares about.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct ChezmoiData {
    #[serde(default)]
    pub chezmoi: ChezmoiInfo,
}

impl std::str::FromStr for ChezmoiData {
    type Err = serde_json::Error;

    fn from_str(data: &str) -> std::result::Result<Self, Self::Err> {
        serde_json::from_str(data)
    }
}

/// Runtime information chezmoi exposes under the `chezmoi` data key.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChezmoiInfo {
    pub home_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub source_dir: Option<PathBuf>,
    pub executable: Option<PathBuf>,
}

/// Chezmoi collaboration error types.
#[derive(Debug, thiserror::Error)]
pub enum ChezmoiError {
    /// Chezmoi binary is not installed.
    #[error("cannot find chezmoi binary in PATH")]
    NotFound,

    /// Chezmoi could not be spawned.
    #[error("failed to run {:?}", program.display())]
    Syscall {
        #[source]
        source: std::io::Error,
        program: PathBuf,
    },

    /// Chezmoi exited unsuccessfully.
    #[error("command {:?} failed with status {status:?}: {stderr}", program.display())]
    Failed {
        program: PathBuf,
        status: Option<i32>,
        stderr: String,
    },

    /// Chezmoi data output was not valid.
    #[error(transparent)]
    Data(#[from] serde_json::Error),
}

/// Friendly result alias :3
type Result<T, E = ChezmoiError> = std::result::Result<T, E>;
