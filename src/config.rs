// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the optional settings file that dotroot reads at
//! startup to simplify the process of serialization and deserialization. File
//! I/O is left to the caller to figure out.
//!
//! # General Layout
//!
//! The settings file is split into three tables: `root` describes where the
//! mirror root, privileged root, and rootlist live; `elevation` describes how
//! privileged operations get performed; `source` describes how the source
//! state of chezmoi is interpreted. Every field is optional, and anything left
//! out is filled in from chezmoi's environment or platform defaults.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::PathBuf,
    str::FromStr,
};

/// Default pattern matching the name of an exact source directory.
pub const DEFAULT_EXACT_PATTERN: &str = r"^(\w+_)*exact_.+";

/// Settings file layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Locations of mirror root, privileged root, and rootlist.
    #[serde(default)]
    pub root: RootSettings,

    /// Privilege elevation settings.
    #[serde(default)]
    pub elevation: ElevationSettings,

    /// Source state interpretation settings.
    #[serde(default)]
    pub source: SourceSettings,
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        settings.root.mirror = settings.root.mirror.map(expand).transpose()?;
        settings.root.privileged = settings.root.privileged.map(expand).transpose()?;
        settings.root.rootlist = settings.root.rootlist.map(expand).transpose()?;

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

fn expand(path: PathBuf) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())?.into_owned(),
    ))
}

/// Root location settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct RootSettings {
    /// Mirror root standing in for the privileged root.
    pub mirror: Option<PathBuf>,

    /// Privileged root that the mirror root stands in for.
    pub privileged: Option<PathBuf>,

    /// File to persist deferred removals into.
    pub rootlist: Option<PathBuf>,
}

/// Privilege elevation settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ElevationSettings {
    /// How to perform privileged operations.
    #[serde(default)]
    pub mode: ElevationMode,

    /// Fail instead of prompting for credentials.
    #[serde(default)]
    pub non_interactive: bool,
}

/// Way to perform privileged operations.
#[derive(Default, Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ElevationMode {
    /// Escalate through sudo or gsudo depending on platform.
    #[default]
    Auto,

    /// Never escalate, current process is trusted to have enough access.
    Never,
}

/// Source state interpretation settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SourceSettings {
    /// Regular expression matching exact source directory names.
    pub exact_pattern: Option<String>,
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
