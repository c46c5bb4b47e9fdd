// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote host interaction.
//!
//! Everything rollout does to a host goes through the [`RemoteExecutor`]
//! seam: run one [`ShellCommand`], or copy one file in either direction.
//! Commands are issued one at a time, and each call blocks until the remote
//! side finishes. Timeouts and interrupt handling belong to the executor.
//!
//! On top of the raw seam, [`Remote`] binds an executor to a single
//! destination and offers the handful of file primitives the rest of the
//! crate is built from: existence checks, whole-file reads, atomic whole-file
//! writes, and atomic symlink replacement.

pub mod command;
pub mod ssh;

#[cfg(test)]
pub(crate) mod fake;

pub use command::ShellCommand;
pub use ssh::SshExecutor;

use std::{
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Execution options for a single remote command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExecOptions {
    /// Run command as this user through sudo.
    pub as_user: Option<String>,

    /// Record a non-zero exit instead of failing.
    pub warn_only: bool,
}

impl ExecOptions {
    pub fn as_user(user: impl Into<String>) -> Self {
        Self {
            as_user: Some(user.into()),
            warn_only: false,
        }
    }

    pub fn warn_only(mut self) -> Self {
        self.warn_only = true;
        self
    }
}

/// Captured result of a remote command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
    pub status: Option<i32>,
}

impl Output {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            status: Some(0),
        }
    }

    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            status: Some(status),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == Some(0)
    }

    /// Enforce execution policy on command result.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::Command`] if the command failed outside of
    ///   warn-only mode.
    pub fn check(self, host: &str, command: &ShellCommand, options: &ExecOptions) -> Result<Self> {
        if self.succeeded() {
            return Ok(self);
        }

        if options.warn_only {
            warn!(
                "[{host}] command {:?} failed with status {:?} (ignored): {}",
                command.to_string(),
                self.status,
                self.stderr.trim()
            );
            return Ok(self);
        }

        Err(RemoteError::Command {
            host: host.into(),
            command: command.to_string(),
            status: self.status,
            stderr: self.stderr.trim().into(),
        })
    }
}

/// Direction of a directory synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    Upload,
    Download,
}

/// Narrow interface to a remote command runner.
///
/// Implementations must honor [`ExecOptions::warn_only`] through
/// [`Output::check`], so a failing command is an error unless the caller
/// explicitly asked to tolerate it.
pub trait RemoteExecutor {
    /// Execute command on host.
    fn execute(&self, host: &str, command: &ShellCommand, options: &ExecOptions) -> Result<Output>;

    /// Copy local file to remote path, returning the remote path.
    fn transfer_to_remote(&self, host: &str, local: &Path, remote: &Path) -> Result<PathBuf>;

    /// Copy remote file to local path.
    fn transfer_from_remote(&self, host: &str, remote: &Path, local: &Path) -> Result<()>;

    /// Mirror directory contents between local and remote side.
    fn sync_directory(
        &self,
        host: &str,
        local: &Path,
        remote: &Path,
        direction: SyncDirection,
        delete: bool,
    ) -> Result<()>;
}

/// Executor bound to one destination.
#[derive(Debug)]
pub struct Remote<'a, E>
where
    E: RemoteExecutor,
{
    executor: &'a E,
    destination: String,
}

impl<'a, E> Remote<'a, E>
where
    E: RemoteExecutor,
{
    /// Construct new remote for destination, e.g., `user@host`.
    pub fn new(executor: &'a E, destination: impl Into<String>) -> Self {
        Self {
            executor,
            destination: destination.into(),
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn executor(&self) -> &'a E {
        self.executor
    }

    /// Execute command with explicit options.
    pub fn execute(&self, command: &ShellCommand, options: &ExecOptions) -> Result<Output> {
        debug!("[{}] run: {command}", self.destination);
        self.executor.execute(&self.destination, command, options)
    }

    /// Execute command as login user, failing on non-zero exit.
    pub fn run(&self, command: ShellCommand) -> Result<Output> {
        self.execute(&command, &ExecOptions::default())
    }

    /// Execute command as target user, failing on non-zero exit.
    pub fn run_as(&self, user: &str, command: ShellCommand) -> Result<Output> {
        self.execute(&command, &ExecOptions::as_user(user))
    }

    /// Execute command as login user, tolerating non-zero exit.
    pub fn run_warn(&self, command: ShellCommand) -> Result<Output> {
        self.execute(&command, &ExecOptions::default().warn_only())
    }

    fn options_for(as_user: Option<&str>) -> ExecOptions {
        ExecOptions {
            as_user: as_user.map(Into::into),
            warn_only: false,
        }
    }

    /// Check if path exists on remote side.
    pub fn exists(&self, path: &Path, as_user: Option<&str>) -> Result<bool> {
        let mut options = Self::options_for(as_user);
        options.warn_only = true;
        let output = self.execute(&ShellCommand::new("test").arg("-e").path(path), &options)?;
        Ok(output.succeeded())
    }

    /// Check if directory exists on remote side.
    pub fn dir_exists(&self, path: &Path, as_user: Option<&str>) -> Result<bool> {
        let mut options = Self::options_for(as_user);
        options.warn_only = true;
        let output = self.execute(&ShellCommand::new("test").arg("-d").path(path), &options)?;
        Ok(output.succeeded())
    }

    /// Read entire remote file.
    pub fn read_file(&self, path: &Path, as_user: Option<&str>) -> Result<String> {
        let output = self.execute(
            &ShellCommand::new("cat").path(path),
            &Self::options_for(as_user),
        )?;
        Ok(output.stdout)
    }

    /// Replace entire remote file.
    ///
    /// Content is uploaded, copied next to the target, and renamed over it,
    /// so readers see either the old or the new content, never a torn
    /// write. See [`replace_file`].
    ///
    /// [`replace_file`]: Self::replace_file
    pub fn write_file(&self, path: &Path, content: &str, as_user: Option<&str>) -> Result<()> {
        let mut local = tempfile::NamedTempFile::new().map_err(RemoteError::LocalIo)?;
        local
            .write_all(content.as_bytes())
            .map_err(RemoteError::LocalIo)?;
        local.flush().map_err(RemoteError::LocalIo)?;

        self.replace_file(local.path(), path, as_user)
    }

    /// Replace remote file with local file.
    ///
    /// The local file lands in a fresh `mktemp` file owned by the login
    /// user. As `as_user`, its content is then copied into a second `mktemp`
    /// file inside the target's directory and renamed over the target. The
    /// target's mode and owner are kept when it already exists. New files
    /// get mode 644.
    pub fn replace_file(&self, local: &Path, path: &Path, as_user: Option<&str>) -> Result<()> {
        let upload = self.mktemp(None, None)?;
        let result = self
            .upload(local, &upload)
            .and_then(|_| self.install_staged(&upload, path, as_user));
        self.run_warn(ShellCommand::new("rm").arg("-f").path(&upload))?;

        result
    }

    // INVARIANT: The final rename stays within the target's directory, so
    //            it never turns into a cross-filesystem copy.
    fn install_staged(&self, upload: &Path, path: &Path, as_user: Option<&str>) -> Result<()> {
        let options = Self::options_for(as_user);
        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let staging = self.mktemp(Some(dir), as_user)?;

        let installed = self
            .execute(
                &ShellCommand::new("cp").path(upload).path(&staging),
                &options,
            )
            .and_then(|_| self.copy_attributes(path, &staging, as_user))
            .and_then(|_| {
                self.execute(
                    &ShellCommand::new("mv").arg("-f").path(&staging).path(path),
                    &options,
                )
            });
        if installed.is_err() {
            self.execute(
                &ShellCommand::new("rm").arg("-f").path(&staging),
                &options.clone().warn_only(),
            )?;
        }

        installed.map(|_| ())
    }

    fn copy_attributes(&self, path: &Path, staging: &Path, as_user: Option<&str>) -> Result<()> {
        let options = Self::options_for(as_user);
        if !self.exists(path, as_user)? {
            self.execute(
                &ShellCommand::new("chmod").arg("644").path(staging),
                &options,
            )?;
            return Ok(());
        }

        for program in ["chmod", "chown"] {
            self.execute(
                &ShellCommand::new(program)
                    .arg("--reference")
                    .path(path)
                    .path(staging),
                &options,
            )?;
        }

        Ok(())
    }

    /// Create empty remote temporary file, optionally inside target directory.
    pub fn mktemp(&self, dir: Option<&Path>, as_user: Option<&str>) -> Result<PathBuf> {
        let mut command = ShellCommand::new("mktemp");
        if let Some(dir) = dir {
            command = command.arg("-p").path(dir);
        }

        let output = self.execute(&command, &Self::options_for(as_user))?;
        let path = output.stdout.trim();
        if path.is_empty() {
            return Err(RemoteError::Command {
                host: self.destination.clone(),
                command: command.to_string(),
                status: output.status,
                stderr: "no temporary file name printed".into(),
            });
        }

        Ok(PathBuf::from(path))
    }

    /// Point link at target, replacing any existing link atomically.
    ///
    /// The new link is created under a temporary name and renamed over the
    /// old one, so the link never disappears in between.
    pub fn symlink(&self, target: &Path, link: &Path, as_user: Option<&str>) -> Result<()> {
        let options = Self::options_for(as_user);
        let staging = PathBuf::from(format!("{}.next", link.display()));
        self.execute(
            &ShellCommand::new("ln")
                .arg("-sfn")
                .path(target)
                .path(&staging),
            &options,
        )?;
        self.execute(
            &ShellCommand::new("mv").arg("-Tf").path(&staging).path(link),
            &options,
        )?;

        Ok(())
    }

    /// Resolve symlink target, if link exists.
    pub fn readlink(&self, link: &Path) -> Result<Option<PathBuf>> {
        let output = self.execute(
            &ShellCommand::new("readlink").path(link),
            &ExecOptions::default().warn_only(),
        )?;
        if !output.succeeded() {
            return Ok(None);
        }

        let target = output.stdout.trim();
        if target.is_empty() {
            return Ok(None);
        }

        Ok(Some(PathBuf::from(target)))
    }

    /// Upload local file to remote path.
    pub fn upload(&self, local: &Path, remote: &Path) -> Result<PathBuf> {
        debug!(
            "[{}] upload {} -> {}",
            self.destination,
            local.display(),
            remote.display()
        );
        self.executor
            .transfer_to_remote(&self.destination, local, remote)
    }

    /// Download remote file to local path.
    pub fn download(&self, remote: &Path, local: &Path) -> Result<()> {
        debug!(
            "[{}] download {} -> {}",
            self.destination,
            remote.display(),
            local.display()
        );
        self.executor
            .transfer_from_remote(&self.destination, remote, local)
    }

    pub fn sync_directory(
        &self,
        local: &Path,
        remote: &Path,
        direction: SyncDirection,
        delete: bool,
    ) -> Result<()> {
        self.executor
            .sync_directory(&self.destination, local, remote, direction, delete)
    }
}

/// Remote interaction error types.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Remote command exited with non-zero status.
    #[error("[{host}] command {command:?} failed with status {status:?}: {stderr}")]
    Command {
        host: String,
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    /// File copy between local and remote side did not complete.
    #[error("[{host}] transfer {from:?} -> {to:?} failed: {message}")]
    Transfer {
        host: String,
        from: PathBuf,
        to: PathBuf,
        message: String,
    },

    /// Transport binary could not be spawned.
    #[error("failed to spawn {program:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        program: String,
    },

    /// Local file handling failed.
    #[error(transparent)]
    LocalIo(#[from] std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = RemoteError> = std::result::Result<T, E>;
