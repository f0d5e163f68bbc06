// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Privileged helper operations.
//!
//! Anything dotroot does to the privileged file system goes through a fixed
//! vocabulary of small operations: copy, read, write, stat, list, and remove.
//! The same binary carries these as a hidden `helper` subcommand, so an
//! elevated child process is always `dotroot helper <op> <paths>...` with
//! structured arguments. No generated scripts, nothing to inject into.
//!
//! The functions here perform the operations directly, with whatever access
//! the current process has. Getting the process elevated in the first place
//! is the job of [`elevate`](crate::elevate).

use std::{
    ffi::OsString,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{self, File, FileTimes, Metadata},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Fixed set of privileged helper operations.
#[derive(Debug, Clone, PartialEq, Eq, clap::Subcommand)]
pub enum Request {
    /// Copy file or symlink, preserving link target, mode bits, and timestamps.
    Copy { from: PathBuf, to: PathBuf },

    /// Stream file content to standard output.
    Read { path: PathBuf },

    /// Stream standard input into file.
    Write { path: PathBuf },

    /// Print kind and mode of path, or "missing".
    Stat { path: PathBuf },

    /// Print entry names of directory, one per line.
    List { path: PathBuf },

    /// Remove file, symlink, or directory tree.
    Remove { path: PathBuf },
}

impl Request {
    /// Command-line arguments that select this operation in the helper.
    pub fn to_args(&self) -> Vec<OsString> {
        let (name, paths): (&str, Vec<&Path>) = match self {
            Self::Copy { from, to } => ("copy", vec![from, to]),
            Self::Read { path } => ("read", vec![path]),
            Self::Write { path } => ("write", vec![path]),
            Self::Stat { path } => ("stat", vec![path]),
            Self::List { path } => ("list", vec![path]),
            Self::Remove { path } => ("remove", vec![path]),
        };

        // INVARIANT: Terminate options so paths starting with '-' stay operands.
        let mut args = vec![OsString::from(name), OsString::from("--")];
        args.extend(paths.into_iter().map(|path| path.as_os_str().to_os_string()));
        args
    }
}

/// Perform helper operation with access of current process.
///
/// # Errors
///
/// - Return [`HelperError::Io`] if file system operation fails.
/// - Return [`HelperError::ProtectedRoot`] if asked to remove a file system root.
/// - Return [`HelperError::IsDirectory`] if asked to copy over a directory.
pub fn execute(request: &Request, input: &mut dyn Read, output: &mut dyn Write) -> Result<()> {
    match request {
        Request::Copy { from, to } => copy(from, to),
        Request::Read { path } => {
            let mut file = File::open(path).map_err(|err| HelperError::io(path, err))?;
            io::copy(&mut file, output).map_err(|err| HelperError::io(path, err))?;
            Ok(())
        }
        Request::Write { path } => {
            create_parent(path)?;
            let mut file = File::create(path).map_err(|err| HelperError::io(path, err))?;
            io::copy(input, &mut file).map_err(|err| HelperError::io(path, err))?;
            Ok(())
        }
        Request::Stat { path } => {
            let line = match stat(path)? {
                Some(status) => status.to_string(),
                None => "missing".to_string(),
            };
            writeln!(output, "{line}").map_err(|err| HelperError::io(path, err))
        }
        Request::List { path } => {
            for name in list(path)? {
                writeln!(output, "{}", name.to_string_lossy())
                    .map_err(|err| HelperError::io(path, err))?;
            }
            Ok(())
        }
        Request::Remove { path } => remove(path),
    }
}

/// Status of path without following symlinks.
///
/// Returns `None` if nothing exists at path, including when an ancestor of
/// path is not a directory.
///
/// # Errors
///
/// - Return [`HelperError::Io`] if path cannot be inspected for any reason
///   other than not existing.
pub fn stat(path: &Path) -> Result<Option<Status>> {
    match fs::symlink_metadata(path) {
        Ok(metadata) => Ok(Some(Status::from(&metadata))),
        Err(err) if is_missing(&err) => Ok(None),
        Err(err) => Err(HelperError::io(path, err)),
    }
}

/// Entry names of directory.
///
/// A missing directory has no entries.
///
/// # Errors
///
/// - Return [`HelperError::Io`] if directory cannot be read.
pub fn list(path: &Path) -> Result<Vec<OsString>> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(HelperError::io(path, err)),
    };

    let mut names = Vec::new();
    for entry in entries {
        names.push(entry.map_err(|err| HelperError::io(path, err))?.file_name());
    }
    names.sort();
    Ok(names)
}

// INVARIANT: Stat only reports NotADirectory for a file among the ancestors.
fn is_missing(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

fn copy(from: &Path, to: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(from).map_err(|err| HelperError::io(from, err))?;
    create_parent(to)?;

    // INVARIANT: Never write through an existing symlink at destination.
    match stat(to)? {
        Some(status) if status.kind == EntryKind::Dir => {
            return Err(HelperError::IsDirectory(to.to_path_buf()));
        }
        Some(status) if status.kind == EntryKind::Symlink || metadata.is_symlink() => {
            fs::remove_file(to).map_err(|err| HelperError::io(to, err))?;
        }
        _ => {}
    }

    if metadata.is_symlink() {
        let target = fs::read_link(from).map_err(|err| HelperError::io(from, err))?;
        return symlink(&target, to).map_err(|err| HelperError::io(to, err));
    }

    fs::copy(from, to).map_err(|err| HelperError::io(to, err))?;

    // INVARIANT: Stamp times before mode, a read-only mode would block the open.
    let mut times = FileTimes::new();
    if let Ok(accessed) = metadata.accessed() {
        times = times.set_accessed(accessed);
    }
    if let Ok(modified) = metadata.modified() {
        times = times.set_modified(modified);
    }
    File::options()
        .write(true)
        .open(to)
        .and_then(|file| file.set_times(times))
        .map_err(|err| HelperError::io(to, err))?;
    fs::set_permissions(to, metadata.permissions()).map_err(|err| HelperError::io(to, err))?;

    Ok(())
}

fn remove(path: &Path) -> Result<()> {
    if crate::path::is_filesystem_root(path) {
        return Err(HelperError::ProtectedRoot(path.to_path_buf()));
    }

    match stat(path)? {
        None => Ok(()),
        Some(status) if status.kind == EntryKind::Dir => {
            fs::remove_dir_all(path).map_err(|err| HelperError::io(path, err))
        }
        Some(_) => fs::remove_file(path).map_err(|err| HelperError::io(path, err)),
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        mkdirp::mkdirp(parent).map_err(|err| HelperError::io(parent, err))?;
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

/// Kind of file system entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    Other,
}

impl EntryKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Dir => "dir",
            Self::Symlink => "symlink",
            Self::Other => "other",
        }
    }
}

/// Kind and permission bits of file system entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub kind: EntryKind,
    pub mode: u32,
}

impl From<&Metadata> for Status {
    fn from(metadata: &Metadata) -> Self {
        let file_type = metadata.file_type();
        let kind = if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };

        Self {
            kind,
            mode: file_mode(metadata),
        }
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{} {:o}", self.kind.as_str(), self.mode)
    }
}

impl FromStr for Status {
    type Err = HelperError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let bad_line = || HelperError::BadStatus(line.to_string());
        let (kind, mode) = line.trim().split_once(' ').ok_or_else(bad_line)?;
        let kind = match kind {
            "file" => EntryKind::File,
            "dir" => EntryKind::Dir,
            "symlink" => EntryKind::Symlink,
            "other" => EntryKind::Other,
            _ => return Err(bad_line()),
        };
        let mode = u32::from_str_radix(mode, 8).map_err(|_| bad_line())?;

        Ok(Self { kind, mode })
    }
}

/// Permission bits of entry.
#[cfg(unix)]
pub fn file_mode(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

/// Permission bits of entry.
///
/// Windows only knows the read-only attribute, so map it onto POSIX bits.
#[cfg(windows)]
pub fn file_mode(metadata: &Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o666
    }
}

/// Set permission bits of file.
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|err| HelperError::io(path, err))
}

/// Set permission bits of file.
///
/// Only the write bits matter, they decide the read-only attribute.
#[cfg(windows)]
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    let mut permissions = fs::metadata(path)
        .map_err(|err| HelperError::io(path, err))?
        .permissions();
    permissions.set_readonly(mode & 0o222 == 0);
    fs::set_permissions(path, permissions).map_err(|err| HelperError::io(path, err))
}

/// Privileged helper error types.
#[derive(Debug, thiserror::Error)]
pub enum HelperError {
    /// File system operation failed.
    #[error("helper failed on {:?}", path.display())]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Attempted to remove a file system root.
    #[error("refusing to remove file system root {:?}", .0.display())]
    ProtectedRoot(PathBuf),

    /// Attempted to copy over a directory.
    #[error("refusing to copy over directory {:?}", .0.display())]
    IsDirectory(PathBuf),

    /// Stat output could not be understood.
    #[error("malformed stat output {0:?}")]
    BadStatus(String),
}

impl HelperError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            source,
            path: path.into(),
        }
    }

    /// Check if failure came from lacking permission.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::PermissionDenied)
    }
}

/// Friendly result alias :3
pub type Result<T, E = HelperError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn run(request: Request) -> Result<String> {
        let mut output = Vec::new();
        execute(&request, &mut io::empty(), &mut output)?;
        Ok(String::from_utf8(output).unwrap())
    }

    #[test]
    fn copy_creates_parents_and_preserves_mode() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let from = dir.path().join("foo.conf");
        let to = dir.path().join("etc/deep/foo.conf");
        fs::write(&from, "hello")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&from, fs::Permissions::from_mode(0o640))?;
        }

        run(Request::Copy {
            from: from.clone(),
            to: to.clone(),
        })?;

        assert_eq!(fs::read_to_string(&to)?, "hello");
        assert_eq!(stat(&to)?, stat(&from)?);
        assert_eq!(
            fs::metadata(&to)?.modified()?,
            fs::metadata(&from)?.modified()?
        );

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn copy_preserves_symlinks() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let from = dir.path().join("link");
        let to = dir.path().join("out/link");
        std::os::unix::fs::symlink("/etc/hosts", &from)?;

        run(Request::Copy {
            from,
            to: to.clone(),
        })?;

        assert_eq!(fs::read_link(&to)?, PathBuf::from("/etc/hosts"));

        Ok(())
    }

    #[test]
    fn copy_refuses_directory_destination() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let from = dir.path().join("foo");
        let to = dir.path().join("bar");
        fs::write(&from, "foo")?;
        fs::create_dir(&to)?;

        let result = run(Request::Copy { from, to });
        assert!(matches!(result, Err(HelperError::IsDirectory(_))));

        Ok(())
    }

    #[test]
    fn write_streams_input() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("etc/motd");
        let request = Request::Write { path: path.clone() };

        execute(&request, &mut "test write super".as_bytes(), &mut io::sink())?;
        assert_eq!(fs::read_to_string(&path)?, "test write super");

        Ok(())
    }

    #[test]
    fn stat_and_list_output() -> anyhow::Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("b"), "")?;
        fs::create_dir(dir.path().join("a"))?;

        let listing = run(Request::List {
            path: dir.path().into(),
        })?;
        assert_eq!(listing, "a\nb\n");

        let missing = run(Request::Stat {
            path: dir.path().join("c"),
        })?;
        assert_eq!(missing, "missing\n");

        let status: Status = run(Request::Stat {
            path: dir.path().join("a"),
        })?
        .parse()?;
        assert_eq!(status.kind, EntryKind::Dir);

        Ok(())
    }

    #[test]
    fn missing_directory_lists_nothing() -> anyhow::Result<()> {
        let dir = tempdir()?;

        let listing = run(Request::List {
            path: dir.path().join("root/.ssh"),
        })?;
        assert_eq!(listing, "");

        fs::write(dir.path().join("file"), "")?;
        let result = run(Request::List {
            path: dir.path().join("file"),
        });
        assert!(result.is_err());

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn file_ancestor_means_missing() -> anyhow::Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("foo"), "")?;

        assert_eq!(stat(&dir.path().join("foo/bar.conf"))?, None);

        Ok(())
    }

    #[test]
    fn remove_refuses_filesystem_root() {
        let result = run(Request::Remove { path: "/".into() });
        assert!(matches!(result, Err(HelperError::ProtectedRoot(_))));
    }

    #[test]
    fn remove_tolerates_missing_path() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let tree = dir.path().join("tree");
        fs::create_dir_all(tree.join("nested"))?;

        run(Request::Remove { path: tree.clone() })?;
        assert!(!tree.exists());
        run(Request::Remove { path: tree })?;

        Ok(())
    }

    #[test]
    fn status_round_trips_through_text() -> anyhow::Result<()> {
        let status = Status {
            kind: EntryKind::File,
            mode: 0o644,
        };
        assert_eq!(status.to_string(), "file 644");
        assert_eq!("file 644\n".parse::<Status>()?, status);
        assert!("file rw-".parse::<Status>().is_err());

        Ok(())
    }

    #[test]
    fn request_arguments() {
        let args = Request::Copy {
            from: "/a".into(),
            to: "/b".into(),
        }
        .to_args();
        assert_eq!(args, ["copy", "--", "/a", "/b"]);
    }
}
