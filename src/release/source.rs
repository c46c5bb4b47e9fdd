// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Source snapshots.
//!
//! A release starts life as a __snapshot__: one commit of the project
//! repository, resolved from whatever revision the operator named (a tag,
//! a branch, an abbreviated hash) and packaged into a single compressed
//! archive ready to ship.

use git2::Repository;
use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, info, instrument};

/// Commit resolved from a revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Revision as named by the operator.
    pub revision: String,

    /// Full commit id the revision resolved to.
    pub commit: String,
}

/// Source control backend.
pub trait SourceControl {
    /// Resolve revision to snapshot.
    fn resolve_revision(&self, revision: &str) -> Result<Snapshot>;

    /// Package snapshot into local archive, returning its path.
    fn package_snapshot(&self, snapshot: &Snapshot) -> Result<PathBuf>;
}

/// Source control through libgit2, packaging through git-archive.
pub struct Git2Source {
    repository: Repository,
    output_dir: PathBuf,
}

impl Git2Source {
    /// Open repository containing target path.
    ///
    /// Archives are written to the current directory.
    ///
    /// # Errors
    ///
    /// - Return [`SourceError::Open`] if no repository contains the path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let repository = Repository::discover(path.as_ref()).map_err(|err| SourceError::Open {
            source: err,
            path: path.as_ref().to_path_buf(),
        })?;

        Ok(Self {
            repository,
            output_dir: PathBuf::from("."),
        })
    }

    /// Write archives into target directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }
}

impl SourceControl for Git2Source {
    #[instrument(skip(self), level = "debug")]
    fn resolve_revision(&self, revision: &str) -> Result<Snapshot> {
        let commit = self
            .repository
            .revparse_single(revision)
            .and_then(|object| object.peel_to_commit())
            .map_err(|err| SourceError::Resolve {
                source: err,
                revision: revision.into(),
            })?;

        debug!("{revision} resolved to {}", commit.id());
        Ok(Snapshot {
            revision: revision.into(),
            commit: commit.id().to_string(),
        })
    }

    #[instrument(skip(self), level = "debug")]
    fn package_snapshot(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        let archive = self.output_dir.join(format!("{}.tar.gz", snapshot.commit));
        let gitdir = self.repository.path().to_string_lossy().into_owned();
        let output = archive.to_string_lossy().into_owned();

        syscall_non_interactive(
            "git",
            [
                "--git-dir",
                gitdir.as_str(),
                "archive",
                "--format=tar.gz",
                "-o",
                output.as_str(),
                snapshot.commit.as_str(),
            ],
        )?;
        info!("packaged {} into {}", snapshot.revision, archive.display());

        Ok(archive)
    }
}

fn syscall_non_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<String> {
    let output = Command::new(cmd.as_ref()).args(args).output()?;
    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();
    let mut message = String::new();

    if !stdout.is_empty() {
        message.push_str(format!("stdout: {stdout}").as_str());
    }

    if !stderr.is_empty() {
        message.push_str(format!("stderr: {stderr}").as_str());
    }

    // INVARIANT: Chomp trailing newlines.
    let message = message
        .strip_suffix("\r\n")
        .or(message.strip_suffix('\n'))
        .map(ToString::to_string)
        .unwrap_or(message);

    if !output.status.success() {
        return Err(SourceError::Package(std::io::Error::other(format!(
            "command {:?} failed:\n{message}",
            cmd.as_ref()
        ))));
    }

    Ok(message)
}

/// Snapshot error types.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Repository cannot be opened.
    #[error("failed to open repository at {:?}", path.display())]
    Open {
        #[source]
        source: git2::Error,
        path: PathBuf,
    },

    /// Revision does not name a commit.
    #[error("cannot resolve revision {revision:?}")]
    Resolve {
        #[source]
        source: git2::Error,
        revision: String,
    },

    /// Snapshot cannot be packaged.
    #[error(transparent)]
    Package(#[from] std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = SourceError> = std::result::Result<T, E>;
