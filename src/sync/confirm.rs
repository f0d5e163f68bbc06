// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Confirmation gate for privileged removals.
//!
//! Every removal candidate is put in front of the user with three options:
//! `remove` this one, `all-remove` this one and everything after it, or `skip`
//! it. Any unique case-insensitive prefix of an option selects it, so `r`,
//! `a`, and `s` all work. Whatever is skipped, interrupted, or fails to be
//! removed is left for the rootlist to offer again next time.

use crate::{
    elevate::{Elevate, ElevateError},
    helper::{self, Status},
    path::RootMapping,
    sync::{Interrupt, Result, SyncError},
};

use inquire::{InquireError, Text};
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};
use tracing::{error, info, instrument, warn};

/// Option names offered for each removal candidate.
pub const OPTIONS: [&str; 3] = ["remove", "all-remove", "skip"];

/// Source of answers to confirmation questions.
pub trait Prompter {
    /// Ask question and return the raw answer.
    ///
    /// # Errors
    ///
    /// - Return [`PromptError::Interrupted`] if user cancelled.
    /// - Return [`PromptError::Unavailable`] if no answer can be obtained.
    fn ask(&mut self, question: &str) -> std::result::Result<String, PromptError>;
}

/// Prompt user on the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct InquirePrompter;

impl Prompter for InquirePrompter {
    fn ask(&mut self, question: &str) -> std::result::Result<String, PromptError> {
        let help = format!("one of: {}", OPTIONS.join(", "));
        Text::new(question)
            .with_help_message(&help)
            .prompt()
            .map_err(|err| match err {
                InquireError::OperationCanceled | InquireError::OperationInterrupted => {
                    PromptError::Interrupted
                }
                InquireError::NotTTY => PromptError::Unavailable("no terminal available".into()),
                err => PromptError::Unavailable(err.to_string()),
            })
    }
}

/// Answer `all-remove` to everything without asking.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoConfirm;

impl Prompter for AutoConfirm {
    fn ask(&mut self, _: &str) -> std::result::Result<String, PromptError> {
        Ok("all-remove".into())
    }
}

/// Reasons a prompter gave no answer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PromptError {
    /// User cancelled the prompt.
    #[error("prompt interrupted")]
    Interrupted,

    /// Prompt could not be shown.
    #[error("cannot prompt: {0}")]
    Unavailable(String),
}

/// Choice made for one removal candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Remove,
    RemoveAll,
    Skip,
}

impl Decision {
    /// Parse answer as unique case-insensitive prefix of an option name.
    ///
    /// Returns `None` for empty, unknown, or ambiguous answers.
    pub fn parse(answer: &str) -> Option<Self> {
        let answer = answer.trim().to_lowercase();
        if answer.is_empty() {
            return None;
        }

        let mut matches = OPTIONS
            .iter()
            .copied()
            .filter(|option| option.starts_with(answer.as_str()));
        let found = matches.next()?;
        if matches.next().is_some() {
            return None;
        }

        match found {
            "remove" => Some(Self::Remove),
            "all-remove" => Some(Self::RemoveAll),
            _ => Some(Self::Skip),
        }
    }
}

/// Removes privileged paths the user agreed to remove.
pub struct Confirmer<'a> {
    mapping: &'a RootMapping,
    elevator: &'a dyn Elevate,
    prompter: &'a mut dyn Prompter,
    interrupt: Interrupt,
}

impl<'a> Confirmer<'a> {
    /// Construct new confirmer.
    pub fn new(
        mapping: &'a RootMapping,
        elevator: &'a dyn Elevate,
        prompter: &'a mut dyn Prompter,
    ) -> Self {
        Self {
            mapping,
            elevator,
            prompter,
            interrupt: Interrupt::default(),
        }
    }

    /// Stop removing once interrupt is raised.
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Confirm and remove privileged paths.
    ///
    /// Returns the privileged paths that were actually removed. Skipped,
    /// missing, and failed paths are simply left out.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::UnsafeRemoval`] if any candidate is protected.
    ///   Checked before anything is removed.
    /// - Return [`SyncError::Elevate`] if elevation itself is unavailable.
    #[instrument(skip(self, candidates), level = "debug")]
    pub fn confirm_and_remove(&mut self, candidates: &BTreeSet<PathBuf>) -> Result<BTreeSet<PathBuf>> {
        if let Some(path) = candidates.iter().find(|path| self.mapping.is_protected(path)) {
            return Err(SyncError::UnsafeRemoval(path.clone()));
        }

        let mut removed = BTreeSet::new();
        if candidates.is_empty() {
            return Ok(removed);
        }
        warn!("{} privileged paths are no longer managed", candidates.len());

        let mut remove_all = false;
        for (index, path) in candidates.iter().enumerate() {
            if self.interrupt.is_raised() {
                warn!("interrupted, leaving {} removable paths", candidates.len() - index);
                break;
            }

            // INVARIANT: Never ask about a path an earlier removal already took out.
            match self.status(path) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    warn!("ignore not found privileged path {}", path.display());
                    continue;
                }
                Err(err) => {
                    self.absorb(path, err)?;
                    continue;
                }
            }

            if !remove_all {
                let decision = match self.decide(path) {
                    Ok(decision) => decision,
                    Err(PromptError::Interrupted) => {
                        warn!("interrupted, leaving {} removable paths", candidates.len() - index);
                        break;
                    }
                    Err(PromptError::Unavailable(reason)) => {
                        warn!("{reason}, leaving {} removable paths", candidates.len() - index);
                        break;
                    }
                };

                match decision {
                    Decision::Skip => {
                        info!("skip removing {}", path.display());
                        continue;
                    }
                    Decision::RemoveAll => remove_all = true,
                    Decision::Remove => {}
                }
            }

            if self.remove(path)? {
                removed.insert(path.clone());
            }
        }
        info!("removed {} of {} privileged paths", removed.len(), candidates.len());

        Ok(removed)
    }

    fn decide(&mut self, path: &Path) -> std::result::Result<Decision, PromptError> {
        let question = format!("remove privileged {}?", path.display());
        loop {
            let answer = self.prompter.ask(&question)?;
            match Decision::parse(&answer) {
                Some(decision) => return Ok(decision),
                None => warn!("unknown option {answer:?}, expected one of {OPTIONS:?}"),
            }
        }
    }

    fn status(&self, path: &Path) -> std::result::Result<Option<Status>, ElevateError> {
        match helper::stat(path) {
            Ok(status) => Ok(status),
            Err(err) if err.is_permission_denied() => self.elevator.stat(path),
            Err(err) => Err(ElevateError::Helper(err)),
        }
    }

    /// Remove single path, returning whether it was removed.
    fn remove(&self, path: &Path) -> Result<bool> {
        info!("removing privileged {}", path.display());
        match self.elevator.remove(path) {
            Ok(()) => Ok(true),
            Err(err) => self.absorb(path, err),
        }
    }

    fn absorb(&self, path: &Path, err: ElevateError) -> Result<bool> {
        if err.is_unavailable() {
            return Err(SyncError::Elevate(err));
        }
        error!("failed to remove {}: {err:?}", path.display());
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevate::InProcess;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;
    use std::{collections::VecDeque, fs};
    use tempfile::tempdir;

    /// Prompter replaying canned answers, interrupting once they run out.
    struct Scripted(VecDeque<&'static str>);

    impl Prompter for Scripted {
        fn ask(&mut self, _: &str) -> std::result::Result<String, PromptError> {
            self.0
                .pop_front()
                .map(String::from)
                .ok_or(PromptError::Interrupted)
        }
    }

    #[test_case("remove", Some(Decision::Remove); "full remove")]
    #[test_case("r", Some(Decision::Remove); "prefix remove")]
    #[test_case("A", Some(Decision::RemoveAll); "uppercase prefix all")]
    #[test_case("all-remove", Some(Decision::RemoveAll); "full all")]
    #[test_case(" s ", Some(Decision::Skip); "padded skip")]
    #[test_case("", None; "empty")]
    #[test_case("x", None; "unknown")]
    #[test_case("removes", None; "longer than option")]
    #[test]
    fn parse_decision(answer: &str, expect: Option<Decision>) {
        pretty_assertions::assert_eq!(Decision::parse(answer), expect);
    }

    fn setup(names: &[&str]) -> anyhow::Result<(tempfile::TempDir, RootMapping, BTreeSet<PathBuf>)> {
        let dir = tempdir()?;
        let mapping = RootMapping::new(dir.path().join("mirror"), dir.path().join("root"));
        let mut candidates = BTreeSet::new();
        for name in names {
            let path = mapping.privileged_root().join(name);
            fs::create_dir_all(path.parent().unwrap())?;
            fs::write(&path, "")?;
            candidates.insert(path);
        }
        Ok((dir, mapping, candidates))
    }

    #[test]
    fn remove_skip_then_reprompt() -> anyhow::Result<()> {
        let (_dir, mapping, candidates) = setup(&["a", "b", "c"])?;
        let mut prompter = Scripted(VecDeque::from(["r", "s", "what", "re"]));

        let removed = Confirmer::new(&mapping, &InProcess, &mut prompter)
            .confirm_and_remove(&candidates)?;

        let root = mapping.privileged_root();
        assert_eq!(removed, BTreeSet::from([root.join("a"), root.join("c")]));
        assert!(root.join("b").exists());

        Ok(())
    }

    #[test]
    fn all_remove_stops_prompting() -> anyhow::Result<()> {
        let (_dir, mapping, candidates) = setup(&["a", "b", "c"])?;
        let mut prompter = Scripted(VecDeque::from(["s", "all"]));

        let removed = Confirmer::new(&mapping, &InProcess, &mut prompter)
            .confirm_and_remove(&candidates)?;

        assert_eq!(removed.len(), 2);
        assert!(prompter.0.is_empty());

        Ok(())
    }

    #[test]
    fn interrupt_leaves_the_rest() -> anyhow::Result<()> {
        let (_dir, mapping, candidates) = setup(&["a", "b", "c"])?;
        let mut prompter = Scripted(VecDeque::from(["remove"]));

        let removed = Confirmer::new(&mapping, &InProcess, &mut prompter)
            .confirm_and_remove(&candidates)?;

        assert_eq!(removed.len(), 1);
        assert!(mapping.privileged_root().join("b").exists());
        assert!(mapping.privileged_root().join("c").exists());

        Ok(())
    }

    #[test]
    fn vanished_candidate_is_not_removed() -> anyhow::Result<()> {
        let (_dir, mapping, mut candidates) = setup(&["a"])?;
        candidates.insert(mapping.privileged_root().join("gone"));

        let removed = Confirmer::new(&mapping, &InProcess, &mut AutoConfirm)
            .confirm_and_remove(&candidates)?;

        assert_eq!(removed, BTreeSet::from([mapping.privileged_root().join("a")]));

        Ok(())
    }

    #[test]
    fn path_taken_out_with_its_parent_is_not_asked_about() -> anyhow::Result<()> {
        let (_dir, mapping, mut candidates) = setup(&["etc/foo/bar", "etc/motd"])?;
        candidates.insert(mapping.privileged_root().join("etc/foo"));
        let mut prompter = Scripted(VecDeque::from(["remove", "skip"]));

        let removed = Confirmer::new(&mapping, &InProcess, &mut prompter)
            .confirm_and_remove(&candidates)?;

        let root = mapping.privileged_root();
        assert_eq!(removed, BTreeSet::from([root.join("etc/foo")]));
        assert!(prompter.0.is_empty());
        assert!(root.join("etc/motd").exists());

        Ok(())
    }

    #[test]
    fn raised_interrupt_removes_nothing() -> anyhow::Result<()> {
        let (_dir, mapping, candidates) = setup(&["a", "b"])?;
        let interrupt = Interrupt::new();
        interrupt.raise();

        let removed = Confirmer::new(&mapping, &InProcess, &mut AutoConfirm)
            .with_interrupt(interrupt)
            .confirm_and_remove(&candidates)?;

        assert!(removed.is_empty());
        assert!(mapping.privileged_root().join("a").exists());

        Ok(())
    }

    #[test]
    fn protected_candidate_is_fatal_before_anything_is_removed() -> anyhow::Result<()> {
        let (_dir, mapping, mut candidates) = setup(&["a"])?;
        candidates.insert(PathBuf::from("/"));

        let result =
            Confirmer::new(&mapping, &InProcess, &mut AutoConfirm).confirm_and_remove(&candidates);

        assert!(matches!(result, Err(SyncError::UnsafeRemoval(_))));
        assert!(mapping.privileged_root().join("a").exists());

        Ok(())
    }
}
