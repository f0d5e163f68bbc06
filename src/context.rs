// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Run context.
//!
//! Everything a sync run needs to know is gathered exactly once at process
//! entry into an immutable [`Context`], which then gets handed to every
//! component. Nothing reads the process environment after that point.
//!
//! # Resolution Order
//!
//! Each field is resolved from the first source that provides it:
//!
//! 1. Command-line flags.
//! 2. Settings file.
//! 3. Environment chezmoi hands its hooks and scripts, i.e., `CHEZMOI_ARGS`,
//!    `CHEZMOI_HOME_DIR`, `CHEZMOI_CACHE_DIR`, `CHEZMOI_SOURCE_DIR`, and
//!    `CHEZMOI_EXECUTABLE`.
//! 4. Output of `chezmoi data`, only queried if the environment came up short.
//! 5. Platform defaults.

use crate::{
    chezmoi::{ArgsError, Chezmoi, ChezmoiInfo, Invocation},
    config::{ConfigError, ElevationMode, ElevationSettings, Settings, DEFAULT_EXACT_PATTERN},
    path::{self, NoWayHome, RootMapping},
};

use regex::Regex;
use std::{
    fs::read_to_string,
    io,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Way the sync got triggered by chezmoi.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Trigger {
    /// Command hook, runs on every matching chezmoi command.
    #[default]
    Hook,

    /// `run_after_` script, only meaningful for targeted applies.
    Script,
}

/// Values chezmoi exports to its hooks and scripts.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub args: Option<String>,
    pub home_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub source_dir: Option<PathBuf>,
    pub executable: Option<PathBuf>,
}

impl Environment {
    /// Gather environment through lookup function.
    ///
    /// Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|value| !value.is_empty());
        Self {
            args: var("CHEZMOI_ARGS"),
            home_dir: var("CHEZMOI_HOME_DIR").map(PathBuf::from),
            cache_dir: var("CHEZMOI_CACHE_DIR").map(PathBuf::from),
            source_dir: var("CHEZMOI_SOURCE_DIR").map(PathBuf::from),
            executable: var("CHEZMOI_EXECUTABLE").map(PathBuf::from),
        }
    }

    /// Gather environment of current process.
    pub fn from_process() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Check if any directory chezmoi could tell us about is missing.
    pub fn is_incomplete(&self) -> bool {
        self.home_dir.is_none() || self.cache_dir.is_none() || self.source_dir.is_none()
    }

    /// Fill missing values from chezmoi runtime information.
    pub fn fill_from(&mut self, info: ChezmoiInfo) {
        self.home_dir = self.home_dir.take().or(info.home_dir);
        self.cache_dir = self.cache_dir.take().or(info.cache_dir);
        self.source_dir = self.source_dir.take().or(info.source_dir);
        self.executable = self.executable.take().or(info.executable);
    }
}

/// Command-line overrides.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Overrides {
    pub mirror: Option<PathBuf>,
    pub privileged: Option<PathBuf>,
    pub rootlist: Option<PathBuf>,
    pub args: Option<String>,
    pub trigger: Trigger,
    pub elevation: Option<ElevationMode>,
    pub non_interactive: bool,
}

/// Immutable context of one sync run.
#[derive(Debug, Clone)]
pub struct Context {
    mapping: RootMapping,
    rootlist: PathBuf,
    source_dir: Option<PathBuf>,
    chezmoi: Chezmoi,
    invocation: Invocation,
    trigger: Trigger,
    exact_pattern: Regex,
    elevation: ElevationSettings,
}

impl Context {
    /// Resolve context from every source of information.
    ///
    /// # Errors
    ///
    /// - Return [`ContextError::MissingArgs`] if no chezmoi invocation is known.
    /// - Return [`ContextError::Args`] if chezmoi invocation is malformed.
    /// - Return [`ContextError::Pattern`] if exact pattern is not valid.
    /// - Return [`ContextError::NoWayHome`] if a default directory is needed
    ///   but cannot be determined.
    pub fn resolve(settings: Settings, overrides: Overrides, env: Environment) -> Result<Self> {
        let args = overrides
            .args
            .or(env.args)
            .ok_or(ContextError::MissingArgs)?;
        let invocation = Invocation::parse(&args)?;

        let mirror = match overrides.mirror.or(settings.root.mirror) {
            Some(mirror) => mirror,
            None => match env.home_dir {
                Some(home) => home.join(".root"),
                None => path::home_dir()?.join(".root"),
            },
        };
        let privileged = overrides
            .privileged
            .or(settings.root.privileged)
            .unwrap_or_else(path::default_privileged_root);
        let rootlist = match overrides.rootlist.or(settings.root.rootlist) {
            Some(rootlist) => rootlist,
            None => match env.cache_dir {
                Some(cache) => cache.join("rootlist"),
                None => path::default_cache_dir()?.join("rootlist"),
            },
        };

        let pattern = settings
            .source
            .exact_pattern
            .unwrap_or_else(|| DEFAULT_EXACT_PATTERN.to_string());
        let exact_pattern = Regex::new(&pattern)?;

        let elevation = ElevationSettings {
            mode: overrides.elevation.unwrap_or(settings.elevation.mode),
            non_interactive: overrides.non_interactive || settings.elevation.non_interactive,
        };

        let context = Self {
            mapping: RootMapping::new(mirror, privileged),
            rootlist,
            source_dir: env.source_dir,
            chezmoi: Chezmoi::new(env.executable.unwrap_or_else(|| PathBuf::from("chezmoi"))),
            invocation,
            trigger: overrides.trigger,
            exact_pattern,
            elevation,
        };
        debug!("resolved {context:?}");

        Ok(context)
    }

    /// Resolve context from current process, querying chezmoi data if the
    /// environment did not provide enough.
    ///
    /// # Errors
    ///
    /// - Same as [`Context::resolve`].
    pub fn from_process(settings: Settings, overrides: Overrides) -> Result<Self> {
        let mut env = Environment::from_process();
        if env.is_incomplete() {
            let chezmoi = match env.executable.clone() {
                Some(executable) => Ok(Chezmoi::new(executable)),
                None => Chezmoi::locate(),
            };
            match chezmoi.and_then(|chezmoi| chezmoi.data()) {
                Ok(data) => env.fill_from(data.chezmoi),
                Err(err) => debug!("no chezmoi data to fall back on: {err}"),
            }
        }

        Self::resolve(settings, overrides, env)
    }

    pub fn mapping(&self) -> &RootMapping {
        &self.mapping
    }

    pub fn rootlist(&self) -> &Path {
        self.rootlist.as_path()
    }

    pub fn source_dir(&self) -> Option<&Path> {
        self.source_dir.as_deref()
    }

    pub fn chezmoi(&self) -> &Chezmoi {
        &self.chezmoi
    }

    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    pub fn exact_pattern(&self) -> &Regex {
        &self.exact_pattern
    }

    pub fn elevation(&self) -> &ElevationSettings {
        &self.elevation
    }
}

/// Load settings file.
///
/// A missing file at the default location means default settings. A missing
/// file that was asked for explicitly is an error.
///
/// # Errors
///
/// - Return [`ContextError::ReadSettings`] if file cannot be read.
/// - Return [`ContextError::Config`] if file content is not valid.
/// - Return [`ContextError::NoWayHome`] if default location is unknown.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let (path, explicit) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (path::default_config_path()?, false),
    };

    match read_to_string(&path) {
        Ok(data) => Ok(data.parse()?),
        Err(err) if err.kind() == io::ErrorKind::NotFound && !explicit => {
            debug!("no settings file at {}, using defaults", path.display());
            Ok(Settings::default())
        }
        Err(err) => Err(ContextError::ReadSettings { source: err, path }),
    }
}

/// Run context error types.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// Chezmoi invocation is unknown.
    #[error("CHEZMOI_ARGS is not set, run dotroot from a chezmoi hook or pass --args")]
    MissingArgs,

    /// Chezmoi invocation is malformed.
    #[error(transparent)]
    Args(#[from] ArgsError),

    /// Exact pattern is not a valid regular expression.
    #[error(transparent)]
    Pattern(#[from] regex::Error),

    /// Settings file cannot be read.
    #[error("failed to read settings file {:?}", path.display())]
    ReadSettings {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Settings file content is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Default directory cannot be determined.
    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),
}

/// Friendly result alias :3
type Result<T, E = ContextError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    fn chezmoi_env() -> Environment {
        Environment {
            args: Some("/usr/bin/chezmoi apply ~/.root/etc".into()),
            home_dir: Some("/home/blah".into()),
            cache_dir: Some("/home/blah/.cache/chezmoi".into()),
            source_dir: Some("/home/blah/.local/share/chezmoi".into()),
            executable: Some("/usr/bin/chezmoi".into()),
        }
    }

    #[sealed_test(env = [
        ("CHEZMOI_ARGS", "chezmoi apply"),
        ("CHEZMOI_HOME_DIR", "/home/blah"),
        ("CHEZMOI_CACHE_DIR", ""),
    ])]
    fn environment_from_process() {
        let env = Environment::from_process();
        assert_eq!(env.args.as_deref(), Some("chezmoi apply"));
        assert_eq!(env.home_dir, Some(PathBuf::from("/home/blah")));
        assert_eq!(env.cache_dir, None);
        assert!(env.is_incomplete());
    }

    #[test]
    fn environment_fills_gaps_only() {
        let mut env = Environment {
            home_dir: Some("/home/blah".into()),
            ..Default::default()
        };
        env.fill_from(ChezmoiInfo {
            home_dir: Some("/home/other".into()),
            cache_dir: Some("/home/other/.cache/chezmoi".into()),
            source_dir: None,
            executable: None,
        });

        assert_eq!(env.home_dir, Some(PathBuf::from("/home/blah")));
        assert_eq!(env.cache_dir, Some(PathBuf::from("/home/other/.cache/chezmoi")));
        assert_eq!(env.source_dir, None);
    }

    #[test]
    fn resolve_from_chezmoi_environment() -> anyhow::Result<()> {
        let context = Context::resolve(Settings::default(), Overrides::default(), chezmoi_env())?;

        assert_eq!(context.mapping().mirror_root(), Path::new("/home/blah/.root"));
        assert_eq!(
            context.rootlist(),
            Path::new("/home/blah/.cache/chezmoi/rootlist")
        );
        assert_eq!(
            context.source_dir(),
            Some(Path::new("/home/blah/.local/share/chezmoi"))
        );
        assert_eq!(context.chezmoi().executable(), Path::new("/usr/bin/chezmoi"));
        assert_eq!(context.invocation().subcommand(), "apply");
        assert!(context.exact_pattern().is_match("exact_cron.d"));
        assert_eq!(context.elevation().mode, ElevationMode::Auto);

        Ok(())
    }

    #[test]
    fn overrides_beat_settings_beat_environment() -> anyhow::Result<()> {
        let settings: Settings = r#"
            [root]
            mirror = "/srv/mirror"
            privileged = "/srv/root"
            rootlist = "/srv/rootlist"

            [elevation]
            mode = "never"
        "#
        .parse()?;
        let overrides = Overrides {
            mirror: Some("/tmp/mirror".into()),
            args: Some("chezmoi diff".into()),
            trigger: Trigger::Script,
            non_interactive: true,
            ..Default::default()
        };

        let context = Context::resolve(settings, overrides, chezmoi_env())?;

        assert_eq!(context.mapping().mirror_root(), Path::new("/tmp/mirror"));
        assert_eq!(context.mapping().privileged_root(), Path::new("/srv/root"));
        assert_eq!(context.rootlist(), Path::new("/srv/rootlist"));
        assert_eq!(context.invocation().subcommand(), "diff");
        assert_eq!(context.trigger(), Trigger::Script);
        assert_eq!(
            context.elevation(),
            &ElevationSettings {
                mode: ElevationMode::Never,
                non_interactive: true
            }
        );

        Ok(())
    }

    #[test]
    fn missing_args_is_error() {
        let env = Environment {
            args: None,
            ..chezmoi_env()
        };
        let result = Context::resolve(Settings::default(), Overrides::default(), env);
        assert!(matches!(result, Err(ContextError::MissingArgs)));
    }

    #[test]
    fn invalid_pattern_is_error() -> anyhow::Result<()> {
        let settings: Settings = "[source]\nexact_pattern = \"(exact_\"".parse()?;
        let result = Context::resolve(settings, Overrides::default(), chezmoi_env());
        assert!(matches!(result, Err(ContextError::Pattern(_))));

        Ok(())
    }

    #[test]
    fn explicit_missing_settings_file_is_error() {
        let result = load_settings(Some(Path::new("/nonexistent/dotroot.toml")));
        assert!(matches!(result, Err(ContextError::ReadSettings { .. })));
    }
}
