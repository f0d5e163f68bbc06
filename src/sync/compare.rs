// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Change detection between a source file and its destination.
//!
//! Two files differ when their permission bits differ, or when the SHA-256
//! digests of their content differ. Either side may be unreadable to the
//! current user, in which case the digest is computed from an elevated read.

use crate::{
    elevate::{Elevate, ElevateError},
    helper::{self, EntryKind, Status},
};

use sha2::{Digest, Sha256};
use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};
use tracing::debug;

const CHUNK_SIZE: usize = 64 * 1024;

/// Decide whether destination needs to be replaced by source.
pub struct Comparator<'a> {
    elevator: &'a dyn Elevate,
}

impl<'a> Comparator<'a> {
    /// Construct new comparator falling back on target elevator.
    pub fn new(elevator: &'a dyn Elevate) -> Self {
        Self { elevator }
    }

    /// Check if destination differs from source.
    ///
    /// Reads mode bits directly, and only elevates for the digest when content
    /// cannot be read.
    ///
    /// # Errors
    ///
    /// - Return [`CompareError::NotFound`] if source does not exist.
    /// - Return [`CompareError::InvalidInput`] if source is not a regular file.
    /// - Return [`CompareError::Io`] if either side cannot be inspected.
    /// - Return [`CompareError::Elevate`] if elevated fallback fails.
    pub fn has_changed(&self, src: &Path, dst: &Path) -> Result<bool> {
        let src_status = helper::stat(src).map_err(CompareError::Io)?;
        check_source(src, src_status)?;

        let src_mode = src_status.map(|status| status.mode).unwrap_or_default();
        let dst_mode = match fs::metadata(dst) {
            Ok(metadata) => helper::file_mode(&metadata),
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                debug!("stat {} elevated for permission error", dst.display());
                self.elevated_mode(dst)?
            }
            Err(err) => return Err(CompareError::io(dst, err)),
        };

        if src_mode != dst_mode {
            debug!("mode changed {src_mode:o} -> {dst_mode:o} for {}", dst.display());
            return Ok(true);
        }

        Ok(self.digest(src)? != self.digest(dst)?)
    }

    /// Check if destination differs from source when both sides may be
    /// unreadable.
    ///
    /// Mode bits of both sides are fetched through elevated stat.
    ///
    /// # Errors
    ///
    /// - Same as [`Comparator::has_changed`].
    pub fn has_changed_su(&self, src: &Path, dst: &Path) -> Result<bool> {
        let src_status = self.elevator.stat(src)?;
        check_source(src, src_status)?;

        let src_mode = src_status.map(|status| status.mode).unwrap_or_default();
        let dst_mode = self.elevated_mode(dst)?;
        if src_mode != dst_mode {
            return Ok(true);
        }

        Ok(self.digest(src)? != self.digest(dst)?)
    }

    /// Compute SHA-256 digest of file content as lowercase hex.
    ///
    /// Falls back to streaming the file through the elevator if it cannot be
    /// read for lack of permission.
    ///
    /// # Errors
    ///
    /// - Return [`CompareError::Io`] if file cannot be read.
    /// - Return [`CompareError::Elevate`] if elevated read fails.
    pub fn digest(&self, path: &Path) -> Result<String> {
        match File::open(path) {
            Ok(mut file) => {
                let mut sink = DigestSink::default();
                let mut buffer = vec![0; CHUNK_SIZE];
                loop {
                    let count = file
                        .read(&mut buffer)
                        .map_err(|err| CompareError::io(path, err))?;
                    if count == 0 {
                        break;
                    }
                    sink.0.update(&buffer[..count]);
                }
                Ok(sink.finish())
            }
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                debug!("try elevate to read file {} without read permission", path.display());
                let mut sink = DigestSink::default();
                self.elevator.read_into(path, &mut sink)?;
                Ok(sink.finish())
            }
            Err(err) => Err(CompareError::io(path, err)),
        }
    }

    fn elevated_mode(&self, path: &Path) -> Result<u32> {
        self.elevator
            .stat(path)?
            .map(|status| status.mode)
            .ok_or_else(|| CompareError::NotFound(path.to_path_buf()))
    }
}

fn check_source(src: &Path, status: Option<Status>) -> Result<()> {
    match status {
        None => Err(CompareError::NotFound(src.to_path_buf())),
        Some(status) if status.kind != EntryKind::File => {
            Err(CompareError::InvalidInput(src.to_path_buf()))
        }
        Some(_) => Ok(()),
    }
}

/// Writer feeding everything it receives into a SHA-256 hasher.
#[derive(Default)]
struct DigestSink(Sha256);

impl DigestSink {
    fn finish(self) -> String {
        format!("{:x}", self.0.finalize())
    }
}

impl Write for DigestSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Change detection error types.
#[derive(Debug, thiserror::Error)]
pub enum CompareError {
    /// Source of comparison does not exist.
    #[error("{:?} does not exist", .0.display())]
    NotFound(PathBuf),

    /// Source of comparison is not a regular file.
    #[error("{:?} is not a regular file", .0.display())]
    InvalidInput(PathBuf),

    /// Either side could not be inspected.
    #[error(transparent)]
    Io(helper::HelperError),

    /// Elevated fallback failed.
    #[error(transparent)]
    Elevate(#[from] ElevateError),
}

impl CompareError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io(helper::HelperError::Io {
            source,
            path: path.to_path_buf(),
        })
    }
}

/// Friendly result alias :3
pub type Result<T, E = CompareError> = std::result::Result<T, E>;
