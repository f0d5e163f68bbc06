// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT


use anyhow::Result;
use dotroot::{
    config::{RootSettings, Settings},
    context::{Environment, Overrides, Trigger},
    sync::{PromptError, Prompter},
    Context, RootList, SourceLookup,
};
use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

/// Home with a mirror root, a fake privileged root, a chezmoi source
/// directory, and a cache directory, all inside one temporary directory.
pub(crate) struct SyncFixture {
    _dir: TempDir,
    home: PathBuf,
    root: PathBuf,
}

impl SyncFixture {
    pub(crate) fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let home = dir.path().join("home");
        let root = dir.path().join("root");

        // INVARIANT: Mirror root must exist or every push is skipped.
        fs::create_dir_all(home.join(".root"))?;
        fs::create_dir_all(home.join("source/dot_root"))?;
        fs::create_dir_all(&root)?;

        Ok(Self {
            _dir: dir,
            home,
            root,
        })
    }

    pub(crate) fn mirror_root(&self) -> PathBuf {
        self.home.join(".root")
    }

    pub(crate) fn mirror(&self, path: impl AsRef<Path>) -> PathBuf {
        self.mirror_root().join(path)
    }

    pub(crate) fn privileged(&self, path: impl AsRef<Path>) -> PathBuf {
        self.root.join(path)
    }

    pub(crate) fn rootlist_path(&self) -> PathBuf {
        self.home.join(".cache/chezmoi/rootlist")
    }

    pub(crate) fn rootlist(&self) -> Result<RootList> {
        Ok(RootList::load(self.rootlist_path())?)
    }

    pub(crate) fn write_mirror(&self, path: impl AsRef<Path>, content: &str) -> Result<PathBuf> {
        write(self.mirror(path), content)
    }

    pub(crate) fn write_privileged(&self, path: impl AsRef<Path>, content: &str) -> Result<PathBuf> {
        write(self.privileged(path), content)
    }

    /// Create source directory in chezmoi source state, e.g.,
    /// `dot_root/etc/exact_cron.d`.
    pub(crate) fn source_dir(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::create_dir_all(self.home.join("source").join(path))?;
        Ok(())
    }

    pub(crate) fn context(&self, args: impl Into<String>) -> Result<Context> {
        self.context_with(args, Trigger::Hook)
    }

    pub(crate) fn context_with(&self, args: impl Into<String>, trigger: Trigger) -> Result<Context> {
        let settings = Settings {
            root: RootSettings {
                privileged: Some(self.root.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        let overrides = Overrides {
            trigger,
            ..Default::default()
        };
        let env = Environment {
            args: Some(args.into()),
            home_dir: Some(self.home.clone()),
            cache_dir: Some(self.home.join(".cache/chezmoi")),
            source_dir: Some(self.home.join("source")),
            executable: None,
        };

        Ok(Context::resolve(settings, overrides, env)?)
    }
}

fn write(path: PathBuf, content: &str) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, content)?;
    Ok(path)
}

/// Source lookup that knows nothing, forcing decisions onto the source glob.
pub(crate) struct NoLookup;

impl SourceLookup for NoLookup {
    fn source_path(&self, _: &Path) -> Option<PathBuf> {
        None
    }
}

/// Prompter replaying canned answers, interrupting once they run out.
pub(crate) struct ScriptedPrompter {
    answers: VecDeque<&'static str>,
    asked: usize,
}

impl ScriptedPrompter {
    pub(crate) fn new(answers: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            asked: 0,
        }
    }

    pub(crate) fn asked(&self) -> usize {
        self.asked
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&mut self, _: &str) -> std::result::Result<String, PromptError> {
        self.asked += 1;
        self.answers
            .pop_front()
            .map(String::from)
            .ok_or(PromptError::Interrupted)
    }
}
