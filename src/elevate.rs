// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Privilege elevation.
//!
//! Chezmoi cannot write outside of the user's home without help. Dotroot gets
//! that help by spawning itself as an elevated [`helper`](crate::helper)
//! process through whatever escalation tool the platform offers:
//!
//! - POSIX systems use `sudo`, with `-n` for non-interactive runs.
//! - Windows uses [gsudo](https://github.com/gerardog/gsudo), which keeps its
//!   credential cache tied to the calling process unless told otherwise.
//!
//! Both are hidden behind the [`Elevate`] trait, which offers three call
//! shapes: one-shot with captured output, one-shot with streamed input, and
//! one-shot with streamed output.

use crate::helper::{self, HelperError, Request, Status};

use std::{
    ffi::OsString,
    io::{self, Read, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStderr, Command, ExitStatus, Stdio},
    thread::{self, JoinHandle},
};
use tracing::{debug, info, instrument};

/// Layer of indirection for privileged operations.
pub trait Elevate {
    /// Run helper operation and capture its standard output.
    fn output(&self, request: &Request) -> Result<String>;

    /// Run helper operation, streaming its standard output into sink.
    fn stream_out(&self, request: &Request, sink: &mut dyn Write) -> Result<()>;

    /// Run helper operation, streaming source into its standard input.
    fn stream_in(&self, request: &Request, source: &mut dyn Read) -> Result<()>;

    /// Make sure later operations will not stop to ask for credentials.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }

    /// Copy file or symlink to privileged destination.
    fn copy_file(&self, from: &Path, to: &Path) -> Result<()> {
        info!("copying file {} -> {}", from.display(), to.display());
        self.output(&Request::Copy {
            from: from.into(),
            to: to.into(),
        })
        .map(|_| ())
    }

    /// Stream privileged file content into sink.
    fn read_into(&self, path: &Path, sink: &mut dyn Write) -> Result<()> {
        self.stream_out(&Request::Read { path: path.into() }, sink)
    }

    /// Stream source into privileged file.
    fn write_from(&self, path: &Path, source: &mut dyn Read) -> Result<()> {
        self.stream_in(&Request::Write { path: path.into() }, source)
    }

    /// Status of privileged path, `None` if missing.
    fn stat(&self, path: &Path) -> Result<Option<Status>> {
        let output = self.output(&Request::Stat { path: path.into() })?;
        match output.trim() {
            "missing" => Ok(None),
            line => Ok(Some(line.parse()?)),
        }
    }

    /// Entry names of privileged directory.
    fn list(&self, path: &Path) -> Result<Vec<OsString>> {
        let output = self.output(&Request::List { path: path.into() })?;
        Ok(output.lines().map(OsString::from).collect())
    }

    /// Remove privileged path.
    fn remove(&self, path: &Path) -> Result<()> {
        self.output(&Request::Remove { path: path.into() }).map(|_| ())
    }
}

/// Platform escalation tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElevationTool {
    /// POSIX sudo.
    Sudo(PathBuf),

    /// Windows gsudo.
    Gsudo(PathBuf),
}

impl ElevationTool {
    /// Locate escalation tool of current platform.
    ///
    /// # Errors
    ///
    /// - Return [`ElevateError::NotInstalled`] if tool cannot be found in PATH.
    pub fn detect() -> Result<Self> {
        if cfg!(windows) {
            which::which("gsudo")
                .map(Self::Gsudo)
                .map_err(|_| ElevateError::NotInstalled("gsudo"))
        } else {
            which::which("sudo")
                .map(Self::Sudo)
                .map_err(|_| ElevateError::NotInstalled("sudo"))
        }
    }

    /// Full argument vector running program with escalated privileges.
    pub fn argv(
        &self,
        non_interactive: bool,
        program: &Path,
        args: impl IntoIterator<Item = OsString>,
    ) -> Vec<OsString> {
        let mut argv = Vec::new();
        match self {
            Self::Sudo(sudo) => {
                argv.push(sudo.as_os_str().to_os_string());
                if non_interactive {
                    argv.push("-n".into());
                }
            }
            Self::Gsudo(gsudo) => {
                // INVARIANT: Direct mode skips shell detection of gsudo.
                argv.push(gsudo.as_os_str().to_os_string());
                argv.push("-d".into());
            }
        }
        argv.push(program.as_os_str().to_os_string());
        argv.extend(args);
        argv
    }

    /// Argument vector caching credentials ahead of time.
    pub fn warm_up_argv(&self, non_interactive: bool) -> Vec<OsString> {
        match self {
            Self::Sudo(sudo) if non_interactive => {
                vec![sudo.as_os_str().to_os_string(), "-n".into(), "-v".into()]
            }
            Self::Sudo(sudo) => vec![sudo.as_os_str().to_os_string(), "-v".into()],
            // -p 0 lets any process use the cache, not just the caller.
            Self::Gsudo(gsudo) => {
                let mut argv = vec![gsudo.as_os_str().to_os_string()];
                argv.extend(["cache", "on", "-p", "0"].map(OsString::from));
                argv
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Sudo(_) => "sudo",
            Self::Gsudo(_) => "gsudo",
        }
    }
}

/// Elevation through platform escalation tool.
#[derive(Debug, Clone)]
pub struct Escalator {
    tool: ElevationTool,
    helper: PathBuf,
    non_interactive: bool,
}

impl Escalator {
    /// Construct new escalator running helper binary at target path.
    pub fn new(tool: ElevationTool, helper: impl Into<PathBuf>, non_interactive: bool) -> Self {
        Self {
            tool,
            helper: helper.into(),
            non_interactive,
        }
    }

    /// Construct escalator for current platform using current executable as
    /// helper binary.
    ///
    /// # Errors
    ///
    /// - Return [`ElevateError::NotInstalled`] if escalation tool is missing.
    /// - Return [`ElevateError::NoCredential`] if non-interactive gsudo has no
    ///   cached credential available.
    /// - Return [`ElevateError::CurrentExe`] if current executable cannot be
    ///   located.
    pub fn detect(non_interactive: bool) -> Result<Self> {
        let tool = ElevationTool::detect()?;
        let helper = std::env::current_exe().map_err(ElevateError::CurrentExe)?;
        let escalator = Self::new(tool, helper, non_interactive);

        if let ElevationTool::Gsudo(gsudo) = &escalator.tool {
            if non_interactive {
                escalator.check_gsudo_cache(gsudo)?;
            }
        }

        Ok(escalator)
    }

    fn check_gsudo_cache(&self, gsudo: &Path) -> Result<()> {
        let output = Command::new(gsudo)
            .arg("status")
            .output()
            .map_err(|err| ElevateError::Spawn {
                source: err,
                program: gsudo.to_path_buf(),
            })?;
        let status = String::from_utf8_lossy(output.stdout.as_slice());
        debug!("gsudo status: {status}");
        if !status.contains("Available for this process: True") {
            return Err(ElevateError::NoCredential("gsudo"));
        }

        Ok(())
    }

    fn command(&self, request: &Request) -> Command {
        let mut helper_args = vec![OsString::from("helper")];
        helper_args.extend(request.to_args());
        let argv = self
            .tool
            .argv(self.non_interactive, &self.helper, helper_args);
        debug!("elevate running {argv:?}");

        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]);
        command
    }

    fn spawn(&self, command: &mut Command) -> Result<Child> {
        command.spawn().map_err(|err| ElevateError::Spawn {
            source: err,
            program: PathBuf::from(command.get_program()),
        })
    }

    fn check(&self, request: &Request, status: ExitStatus, stderr: &[u8]) -> Result<()> {
        if status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(stderr).trim_end().to_string();
        if self.non_interactive && stderr.contains("password is required") {
            return Err(ElevateError::NoCredential(self.tool.name()));
        }

        Err(ElevateError::Failed {
            request: format!("{request:?}"),
            status: status.code(),
            stderr,
        })
    }
}

impl Elevate for Escalator {
    #[instrument(skip(self), level = "debug")]
    fn output(&self, request: &Request) -> Result<String> {
        let mut command = self.command(request);
        let output = command
            .stdin(Stdio::null())
            .output()
            .map_err(|err| ElevateError::Spawn {
                source: err,
                program: PathBuf::from(command.get_program()),
            })?;
        self.check(request, output.status, output.stderr.as_slice())?;

        Ok(String::from_utf8_lossy(output.stdout.as_slice()).into_owned())
    }

    #[instrument(skip(self, sink), level = "debug")]
    fn stream_out(&self, request: &Request, sink: &mut dyn Write) -> Result<()> {
        let mut command = self.command(request);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = self.spawn(&mut command)?;
        let stderr = drain(child.stderr.take());

        if let Some(mut stdout) = child.stdout.take() {
            io::copy(&mut stdout, sink).map_err(ElevateError::Stream)?;
        }

        let status = child.wait().map_err(ElevateError::Stream)?;
        self.check(request, status, join(stderr).as_slice())
    }

    #[instrument(skip(self, source), level = "debug")]
    fn stream_in(&self, request: &Request, source: &mut dyn Read) -> Result<()> {
        let mut command = self.command(request);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let mut child = self.spawn(&mut command)?;
        let stderr = drain(child.stderr.take());

        // INVARIANT: Close stdin after copying, or the helper never sees EOF.
        if let Some(mut stdin) = child.stdin.take() {
            io::copy(source, &mut stdin).map_err(ElevateError::Stream)?;
        }

        let status = child.wait().map_err(ElevateError::Stream)?;
        self.check(request, status, join(stderr).as_slice())
    }

    fn warm_up(&self) -> Result<()> {
        let argv = self.tool.warm_up_argv(self.non_interactive);
        info!("checking super permission with {argv:?}");
        let status = Command::new(&argv[0])
            .args(&argv[1..])
            .stdout(Stdio::null())
            .status()
            .map_err(|err| ElevateError::Spawn {
                source: err,
                program: PathBuf::from(&argv[0]),
            })?;

        if !status.success() {
            return Err(ElevateError::NoCredential(self.tool.name()));
        }

        Ok(())
    }
}

// INVARIANT: Stderr is read alongside the main stream, a full pipe would stall the helper.
fn drain(stderr: Option<ChildStderr>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut stderr) = stderr {
            if let Err(err) = stderr.read_to_end(&mut buffer) {
                debug!("cannot read helper stderr: {err}");
            }
        }
        buffer
    })
}

fn join(stderr: JoinHandle<Vec<u8>>) -> Vec<u8> {
    stderr.join().unwrap_or_default()
}

/// Elevation that performs helper operations inside the current process.
///
/// Used when the current process already has all the access it needs.
#[derive(Debug, Default, Clone, Copy)]
pub struct InProcess;

impl Elevate for InProcess {
    fn output(&self, request: &Request) -> Result<String> {
        let mut output = Vec::new();
        helper::execute(request, &mut io::empty(), &mut output)?;
        Ok(String::from_utf8_lossy(output.as_slice()).into_owned())
    }

    fn stream_out(&self, request: &Request, sink: &mut dyn Write) -> Result<()> {
        Ok(helper::execute(request, &mut io::empty(), sink)?)
    }

    fn stream_in(&self, request: &Request, source: &mut dyn Read) -> Result<()> {
        Ok(helper::execute(request, source, &mut io::sink())?)
    }
}

/// Privilege elevation error types.
#[derive(Debug, thiserror::Error)]
pub enum ElevateError {
    /// Escalation tool is not installed.
    #[error("cannot find {0} in PATH")]
    NotInstalled(&'static str),

    /// No cached credential available for non-interactive escalation.
    #[error("{0} has no cached credential for non-interactive use, authenticate in advance")]
    NoCredential(&'static str),

    /// Path to the current executable cannot be determined.
    #[error("cannot locate current executable to use as privileged helper")]
    CurrentExe(#[source] io::Error),

    /// Escalated process could not be spawned.
    #[error("failed to spawn {:?}", program.display())]
    Spawn {
        #[source]
        source: io::Error,
        program: PathBuf,
    },

    /// Streaming data to or from escalated process failed.
    #[error("failed to stream data through privileged helper")]
    Stream(#[source] io::Error),

    /// Escalated helper exited unsuccessfully.
    #[error("privileged {request} failed with status {status:?}: {stderr}")]
    Failed {
        request: String,
        status: Option<i32>,
        stderr: String,
    },

    /// Helper operation failed in process.
    #[error(transparent)]
    Helper(#[from] HelperError),
}

impl ElevateError {
    /// Check if escalation itself is unavailable, as opposed to an operation
    /// failing once escalated.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::NotInstalled(_) | Self::NoCredential(_) | Self::CurrentExe(_) | Self::Spawn { .. }
        )
    }
}

/// Friendly result alias :3
pub type Result<T, E = ElevateError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    fn strings(argv: Vec<OsString>) -> Vec<String> {
        argv.into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn sudo_argv() {
        let tool = ElevationTool::Sudo("/usr/bin/sudo".into());
        let args = Request::Remove {
            path: "/etc/cron.d/jobB".into(),
        }
        .to_args();

        let result = strings(tool.argv(true, Path::new("/usr/bin/dotroot"), args.clone()));
        let expect = [
            "/usr/bin/sudo",
            "-n",
            "/usr/bin/dotroot",
            "remove",
            "--",
            "/etc/cron.d/jobB",
        ];
        assert_eq!(result, expect);

        let result = strings(tool.argv(false, Path::new("/usr/bin/dotroot"), args));
        assert_eq!(result[1], "/usr/bin/dotroot");
    }

    #[test]
    fn gsudo_argv() {
        let tool = ElevationTool::Gsudo("C:\\gsudo.exe".into());
        let result = strings(tool.argv(true, Path::new("dotroot.exe"), [OsString::from("stat")]));
        assert_eq!(result, ["C:\\gsudo.exe", "-d", "dotroot.exe", "stat"]);

        let result = strings(tool.warm_up_argv(false));
        assert_eq!(result, ["C:\\gsudo.exe", "cache", "on", "-p", "0"]);
    }

    #[test]
    fn sudo_warm_up_argv() {
        let tool = ElevationTool::Sudo("sudo".into());
        assert_eq!(strings(tool.warm_up_argv(false)), ["sudo", "-v"]);
        assert_eq!(strings(tool.warm_up_argv(true)), ["sudo", "-n", "-v"]);
    }

    #[test]
    fn in_process_call_shapes() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("etc/foo.conf");

        InProcess.write_from(&path, &mut "foo = 1".as_bytes())?;
        let mut content = Vec::new();
        InProcess.read_into(&path, &mut content)?;
        assert_eq!(content, b"foo = 1");

        let status = InProcess.stat(&path)?.unwrap();
        assert_eq!(status.kind, helper::EntryKind::File);
        assert_eq!(InProcess.list(&dir.path().join("etc"))?, ["foo.conf"]);

        InProcess.remove(&path)?;
        assert_eq!(InProcess.stat(&path)?, None);

        Ok(())
    }

    #[test]
    fn missing_directory_lists_empty() -> anyhow::Result<()> {
        let dir = tempdir()?;
        assert!(InProcess.list(&dir.path().join("root/.ssh"))?.is_empty());

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn streams_survive_noisy_stderr() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let helper = dir.path().join("noisy-helper");
        fs::write(
            &helper,
            "head -c 262144 /dev/zero >&2\ncat >/dev/null\necho done\n",
        )?;
        let escalator = Escalator::new(ElevationTool::Sudo("/bin/sh".into()), &helper, false);
        let request = Request::Read {
            path: "/etc/hosts".into(),
        };

        let mut sink = Vec::new();
        escalator.stream_out(&request, &mut sink)?;
        assert_eq!(sink, b"done\n");

        escalator.stream_in(&request, &mut "ignored".as_bytes())?;

        Ok(())
    }

    #[test]
    fn spawn_failure_is_unavailable() {
        let escalator = Escalator::new(
            ElevationTool::Sudo("/nonexistent/sudo".into()),
            "/nonexistent/dotroot",
            true,
        );
        let result = escalator.output(&Request::Stat { path: "/".into() });
        assert!(result.is_err_and(|error| error.is_unavailable()));
    }
}
