// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent local path information for files rollout reads on the
//! operator's machine.

use crate::config::MANIFEST_FILE;

use std::path::{Path, PathBuf};

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine default public key to authorize on new accounts.
///
/// Uses `~/.ssh/id_rsa.pub`. Does not check if the path returned actually
/// exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_pubkey() -> Result<PathBuf> {
    home_dir().map(|home| home.join(".ssh").join("id_rsa.pub"))
}

/// Default manifest path, relative to the current directory.
pub fn default_manifest() -> PathBuf {
    PathBuf::from(MANIFEST_FILE)
}

/// Project root a manifest describes.
///
/// The directory holding the manifest, or the current directory for a bare
/// file name.
pub fn project_root(manifest: &Path) -> PathBuf {
    match manifest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
