// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Privileged file management on top of chezmoi.
//!
//! Chezmoi only manages files inside the user's home. Dotroot extends it to
//! privileged files by letting chezmoi render them into a __mirror root__,
//! `~/.root` by default, and reconciling that mirror with the real privileged
//! file system from chezmoi hooks:
//!
//! - `dotroot push` after `chezmoi apply` copies new and changed mirror files
//!   onto their privileged counterparts, then offers to remove privileged
//!   files that are no longer managed.
//! - `dotroot pull` before `chezmoi apply` brings privileged edits back into
//!   the mirror.
//!
//! # Exact Directories
//!
//! Removal follows chezmoi's `exact_` attribute. Inside the privileged
//! counterpart of an exact directory, anything the rendered mirror lacks is
//! offered for removal. Outside of exact directories, only paths that used to
//! be in the mirror and disappeared are offered. Nothing is removed without
//! confirmation, and whatever is not removed is remembered in the
//! [`rootlist`] for the next run.

pub mod chezmoi;
pub mod config;
pub mod context;
pub mod elevate;
pub mod helper;
pub mod path;
pub mod rootlist;
pub mod sync;

pub use chezmoi::{Chezmoi, Invocation, SourceLookup};
pub use config::Settings;
pub use context::{Context, Overrides, Trigger};
pub use elevate::{Elevate, Escalator, InProcess};
pub use path::RootMapping;
pub use rootlist::RootList;
pub use sync::{Interrupt, Outcome, RootSync, SyncError};
