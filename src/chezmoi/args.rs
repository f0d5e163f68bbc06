// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Chezmoi invocation parsing.
//!
//! Chezmoi hands its hooks and scripts the command line it was invoked with
//! through `CHEZMOI_ARGS`, as one string. We recover the subcommand, the
//! handful of flags we care about, and the target paths from that string in
//! two passes: a tokenizer that splits it into words, and a small grammar
//! that walks those words.
//!
//! # Grammar
//!
//! ```text
//! args       := program global-opt* subcommand (opt | operand)*
//! opt        := "--" name ["=" value] | "-" shortflags
//! shortflags := letter+
//! word       := bare | '"' ... '"' | "'" ... "'"
//! ```
//!
//! Options that take a value consume the next word unless the value is
//! attached. A lone `--` terminates option parsing.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

/// Long options that take a value.
const LONG_VALUE_OPTS: &[&str] = &[
    "cache",
    "color",
    "config",
    "config-format",
    "destination",
    "exclude",
    "include",
    "mode",
    "output",
    "override-data",
    "override-data-file",
    "persistent-state",
    "progress",
    "source",
    "working-tree",
];

/// Short options that take a value.
const SHORT_VALUE_OPTS: &[char] = &['c', 'D', 'i', 'o', 'S', 'W', 'x'];

/// Structured view of a chezmoi invocation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Invocation {
    subcommand: String,
    target_paths: BTreeSet<PathBuf>,
    debug: bool,
    dry_run: bool,
}

impl Invocation {
    /// Parse invocation from raw `CHEZMOI_ARGS` string.
    ///
    /// # Errors
    ///
    /// - Return [`ArgsError`] if string cannot be tokenized, or does not fit
    ///   the invocation grammar.
    pub fn parse(args: impl AsRef<str>) -> Result<Self> {
        let words = tokenize(args.as_ref())?;
        Self::from_words(words)
    }

    /// Construct invocation from already split words.
    ///
    /// # Errors
    ///
    /// - Return [`ArgsError`] if words do not fit the invocation grammar.
    pub fn from_words(words: impl IntoIterator<Item = impl Into<String>>) -> Result<Self> {
        let mut words = words.into_iter().map(Into::into);
        let program = words.next().ok_or(ArgsError::Empty)?;
        if !is_chezmoi_program(&program) {
            return Err(ArgsError::NotChezmoi(program));
        }

        let mut invocation = Self::default();
        let mut options_done = false;
        while let Some(word) = words.next() {
            if options_done || !word.starts_with('-') || word == "-" {
                if invocation.subcommand.is_empty() {
                    invocation.subcommand = word;
                } else {
                    invocation.target_paths.insert(expand_target(&word));
                }
                continue;
            }

            if word == "--" {
                options_done = true;
            } else if let Some(long) = word.strip_prefix("--") {
                let (name, attached) = match long.split_once('=') {
                    Some((name, value)) => (name, Some(value)),
                    None => (long, None),
                };
                if LONG_VALUE_OPTS.contains(&name) && attached.is_none() {
                    words
                        .next()
                        .ok_or_else(|| ArgsError::MissingValue(word.clone()))?;
                    continue;
                }
                invocation.flag(name);
            } else {
                let shorts = &word[1..];
                for (idx, short) in shorts.char_indices() {
                    if SHORT_VALUE_OPTS.contains(&short) {
                        // INVARIANT: Value is either attached to the flag, or the next word.
                        if idx + short.len_utf8() == shorts.len() {
                            words
                                .next()
                                .ok_or_else(|| ArgsError::MissingValue(word.clone()))?;
                        }
                        break;
                    }
                    invocation.short_flag(short);
                }
            }
        }

        if invocation.subcommand.is_empty() {
            return Err(ArgsError::MissingSubcommand);
        }

        Ok(invocation)
    }

    fn flag(&mut self, name: &str) {
        match name {
            "debug" => self.debug = true,
            "dry-run" => self.dry_run = true,
            _ => {}
        }
    }

    fn short_flag(&mut self, flag: char) {
        match flag {
            'n' => self.dry_run = true,
            _ => {}
        }
    }

    /// Name of chezmoi subcommand, e.g., "apply".
    pub fn subcommand(&self) -> &str {
        self.subcommand.as_str()
    }

    /// Set of target paths given to subcommand. Empty means the whole tree.
    pub fn target_paths(&self) -> &BTreeSet<PathBuf> {
        &self.target_paths
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Log level chezmoi itself was asked to run at.
    ///
    /// Verbose runs stay at info.
    pub fn log_level(&self) -> &'static str {
        if self.is_debug() {
            "debug"
        } else {
            "info"
        }
    }
}

fn is_chezmoi_program(word: &str) -> bool {
    let name = Path::new(word)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    name == "chezmoi" || name.eq_ignore_ascii_case("chezmoi.exe")
}

fn expand_target(word: &str) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(word).into_owned());
    if expanded.is_relative() {
        std::path::absolute(&expanded).unwrap_or(expanded)
    } else {
        expanded
    }
}

/// Split command line string into words.
///
/// Words are separated by unquoted whitespace. Single quotes preserve
/// everything literally, double quotes allow backslash escapes, and a
/// backslash outside quotes escapes the next character.
///
/// # Errors
///
/// - Return [`ArgsError::UnterminatedQuote`] if a quote is left open.
/// - Return [`ArgsError::DanglingEscape`] if string ends on a backslash.
pub fn tokenize(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(ch) = chars.next() {
        match ch {
            ch if ch.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err(ArgsError::UnterminatedQuote('\'')),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\')) => current.push(escaped),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => return Err(ArgsError::UnterminatedQuote('"')),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err(ArgsError::UnterminatedQuote('"')),
                    }
                }
            }
            '\\' if cfg!(windows) => {
                // Backslash is a path separator on Windows, never an escape.
                in_word = true;
                current.push(ch);
            }
            '\\' => {
                in_word = true;
                current.push(chars.next().ok_or(ArgsError::DanglingEscape)?);
            }
            ch => {
                in_word = true;
                current.push(ch);
            }
        }
    }

    if in_word {
        words.push(current);
    }

    Ok(words)
}

/// Invocation parsing error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArgsError {
    #[error("chezmoi invocation is empty")]
    Empty,

    #[error("expected chezmoi program, found {0:?}")]
    NotChezmoi(String),

    #[error("chezmoi invocation has no subcommand")]
    MissingSubcommand,

    #[error("option {0:?} expects a value")]
    MissingValue(String),

    #[error("unterminated {0} quote in chezmoi invocation")]
    UnterminatedQuote(char),

    #[error("chezmoi invocation ends with a dangling escape")]
    DanglingEscape,
}

/// Friendly result alias :3
type Result<T, E = ArgsError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case("chezmoi apply", &["chezmoi", "apply"]; "bare words")]
    #[test_case("  chezmoi   apply  ", &["chezmoi", "apply"]; "surrounding whitespace")]
    #[test_case("chezmoi apply '/tmp/a b'", &["chezmoi", "apply", "/tmp/a b"]; "single quoted space")]
    #[test_case(r#"chezmoi apply "/tmp/a b""#, &["chezmoi", "apply", "/tmp/a b"]; "double quoted space")]
    #[test_case(r#"chezmoi apply "say \"hi\"""#, &["chezmoi", "apply", r#"say "hi""#]; "escaped double quote")]
    #[test_case("chezmoi apply pre'mid dle'post", &["chezmoi", "apply", "premid dlepost"]; "adjacent quoting")]
    #[test_case("chezmoi apply ''", &["chezmoi", "apply", ""]; "empty quoted word")]
    #[test]
    fn tokenize_words(line: &str, expect: &[&str]) {
        let result = tokenize(line).unwrap();
        pretty_assertions::assert_eq!(result, expect);
    }

    #[cfg(not(windows))]
    #[test]
    fn tokenize_backslash_escaped_space() {
        let result = tokenize(r"chezmoi apply /tmp/a\ b").unwrap();
        assert_eq!(result, ["chezmoi", "apply", "/tmp/a b"]);
    }

    #[test_case("chezmoi apply 'open", ArgsError::UnterminatedQuote('\''); "open single quote")]
    #[test_case(r#"chezmoi apply "open"#, ArgsError::UnterminatedQuote('"'); "open double quote")]
    #[test]
    fn tokenize_rejects(line: &str, expect: ArgsError) {
        pretty_assertions::assert_eq!(tokenize(line), Err(expect));
    }

    #[test_case("chezmoi apply", "apply", false, false; "no options")]
    #[test_case("chezmoi --debug apply", "apply", true, false; "global debug")]
    #[test_case("chezmoi apply -v", "apply", false, false; "short verbose")]
    #[test_case("chezmoi apply --verbose", "apply", false, false; "long verbose")]
    #[test_case("chezmoi apply -nv", "apply", false, true; "combined short flags")]
    #[test_case("chezmoi -v --dry-run diff", "diff", false, true; "global flags before subcommand")]
    #[test_case("/usr/bin/chezmoi.exe init", "init", false, false; "windows program path")]
    #[test_case("chezmoi -c /tmp/conf.toml apply", "apply", false, false; "short option value")]
    #[test_case("chezmoi --config /tmp/conf.toml apply", "apply", false, false; "long option value")]
    #[test_case("chezmoi --config=/tmp/conf.toml apply -v", "apply", false, false; "attached long value")]
    #[test_case("chezmoi -vS/tmp/src apply", "apply", false, false; "attached short value")]
    #[test]
    fn parse_invocation(line: &str, subcommand: &str, debug: bool, dry_run: bool) {
        let result = Invocation::parse(line).unwrap();
        pretty_assertions::assert_eq!(result.subcommand(), subcommand);
        pretty_assertions::assert_eq!(result.is_debug(), debug);
        pretty_assertions::assert_eq!(result.is_dry_run(), dry_run);
        assert!(result.target_paths().is_empty());
    }

    #[test]
    fn parse_target_paths() {
        let result =
            Invocation::parse("chezmoi --debug apply -v /etc/hosts '/tmp/with space' --force /srv")
                .unwrap();
        let expect: BTreeSet<PathBuf> = ["/etc/hosts", "/tmp/with space", "/srv"]
            .into_iter()
            .map(PathBuf::from)
            .collect();
        assert_eq!(result.target_paths(), &expect);
        assert!(result.is_debug());
        assert_eq!(result.log_level(), "debug");
    }

    #[test]
    fn parse_operands_after_terminator() {
        let result = Invocation::parse("chezmoi apply -- /tmp/-odd").unwrap();
        assert!(result.target_paths().contains(Path::new("/tmp/-odd")));
        assert!(!result.is_dry_run());
    }

    #[test]
    fn parse_expands_tilde() {
        let home = dirs::home_dir().unwrap();
        let result = Invocation::parse("chezmoi apply ~/.root/etc").unwrap();
        assert!(result.target_paths().contains(&home.join(".root/etc")));
    }

    #[test_case("", ArgsError::Empty; "empty string")]
    #[test_case("git status", ArgsError::NotChezmoi("git".into()); "foreign program")]
    #[test_case("chezmoi --debug", ArgsError::MissingSubcommand; "missing subcommand")]
    #[test_case("chezmoi apply --config", ArgsError::MissingValue("--config".into()); "missing long value")]
    #[test_case("chezmoi apply -c", ArgsError::MissingValue("-c".into()); "missing short value")]
    #[test]
    fn parse_rejects(line: &str, expect: ArgsError) {
        pretty_assertions::assert_eq!(Invocation::parse(line), Err(expect));
    }
}
