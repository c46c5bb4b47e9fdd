// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Idempotent line editing of remote text files.
//!
//! Live configuration on a host is a plain `KEY = value` file, and a few
//! other files rollout touches (authorized keys, sudoers drop-ins, shell
//! profiles) are lists of lines. Both are edited the same way: download the
//! file, apply the edit to a [`LineEdit`] in memory, upload the result in one
//! atomic replace, then read the file back and check that the edit stuck.
//!
//! # Settings Lines
//!
//! A setting is one line of the form `KEY = value`. Keys match
//! case-insensitively, with any amount of whitespace around the `=`, but are
//! always written back in uppercase. Setting a key first drops every line
//! for that key, so a file that somehow picked up duplicate or oddly cased
//! lines heals on the next write. Removing a key also collapses the runs of
//! blank lines the removal leaves behind.
//!
//! # Verification
//!
//! The file is live configuration, so a silently lost edit is worse than a
//! loud failure. Every write is followed by a read back. If the result does
//! not hold exactly what was intended, [`EditError::Verification`] is raised
//! and nothing is retried.

use crate::remote::{Remote, RemoteExecutor};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// In-memory line editor.
///
/// # Invariant
///
/// - After [`LineEdit::set`], exactly one line exists for the key.
/// - After [`LineEdit::remove`], no line exists for the key, and no run of
///   more than one blank line exists.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LineEdit {
    lines: Vec<String>,
    changed: bool,
}

impl LineEdit {
    /// Construct new empty line editor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Render canonical settings line for key and value.
    pub fn setting_line(key: &str, value: &str) -> String {
        format!("{} = {value}", key.to_ascii_uppercase())
    }

    /// Check if line assigns target key.
    ///
    /// Matches `key`, case-insensitive, at the start of the line, followed
    /// by optional whitespace and `=`.
    pub fn key_matches(line: &str, key: &str) -> bool {
        let Some(head) = line.get(..key.len()) else {
            return false;
        };

        if !head.eq_ignore_ascii_case(key) {
            return false;
        }

        line[key.len()..].trim_start().starts_with('=')
    }

    /// Check if any line assigns target key.
    pub fn has_key(&self, key: &str) -> bool {
        self.lines.iter().any(|line| Self::key_matches(line, key))
    }

    /// Count lines assigning target key.
    pub fn key_count(&self, key: &str) -> usize {
        self.lines
            .iter()
            .filter(|line| Self::key_matches(line, key))
            .count()
    }

    /// Check if exact line exists.
    pub fn contains_line(&self, line: &str) -> bool {
        self.lines.iter().any(|current| current == line)
    }

    /// Whether any edit changed the content.
    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Set key to value, replacing every existing line for that key.
    ///
    /// Returns the canonical line that was appended.
    pub fn set(&mut self, key: &str, value: &str) -> String {
        let target = Self::setting_line(key, value);
        self.remove(key);
        self.squeeze_blank_lines();
        self.lines.push(target.clone());
        self.changed = true;
        target
    }

    /// Remove every line for key.
    ///
    /// Returns the number of removed lines. Removing an absent key does not
    /// touch the content at all.
    pub fn remove(&mut self, key: &str) -> usize {
        self.remove_matching(|line| Self::key_matches(line, key))
    }

    /// Remove every line that satisfies predicate.
    pub fn remove_matching<P>(&mut self, predicate: P) -> usize
    where
        P: Fn(&str) -> bool,
    {
        let before = self.lines.len();
        self.lines.retain(|line| !predicate(line.as_str()));
        let removed = before - self.lines.len();

        if removed > 0 {
            self.squeeze_blank_lines();
            self.changed = true;
        }

        removed
    }

    /// Append exact line unless it already exists.
    pub fn ensure_line(&mut self, line: &str) -> bool {
        if self.contains_line(line) {
            return false;
        }

        self.lines.push(line.into());
        self.changed = true;
        true
    }

    fn squeeze_blank_lines(&mut self) {
        let mut previous_blank = false;
        self.lines.retain(|line| {
            let blank = line.trim().is_empty();
            let keep = !(blank && previous_blank);
            previous_blank = blank;
            keep
        });
    }
}

impl Display for LineEdit {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for line in &self.lines {
            writeln!(fmt, "{line}")?;
        }

        Ok(())
    }
}

impl From<&str> for LineEdit {
    fn from(content: &str) -> Self {
        Self {
            lines: content.lines().map(str::to_owned).collect(),
            changed: false,
        }
    }
}

impl From<String> for LineEdit {
    fn from(content: String) -> Self {
        Self::from(content.as_str())
    }
}

/// Side effect to run after a settings change becomes live.
pub trait Refresh {
    fn refresh(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Whether an edit triggers the configured refresh.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
    #[default]
    Refresh,
    Suppress,
}

/// Line editor for one remote file.
pub struct LineEditor<'a, E>
where
    E: RemoteExecutor,
{
    remote: &'a Remote<'a, E>,
    path: PathBuf,
    as_user: Option<String>,
    refresh: Option<&'a dyn Refresh>,
}

impl<'a, E> LineEditor<'a, E>
where
    E: RemoteExecutor,
{
    /// Construct new editor for remote file.
    pub fn new(remote: &'a Remote<'a, E>, path: impl Into<PathBuf>) -> Self {
        Self {
            remote,
            path: path.into(),
            as_user: None,
            refresh: None,
        }
    }

    /// Read and write file as target user.
    pub fn as_user(mut self, user: impl Into<String>) -> Self {
        self.as_user = Some(user.into());
        self
    }

    /// Run side effect after each settings change.
    pub fn with_refresh(mut self, refresh: &'a dyn Refresh) -> Self {
        self.refresh = Some(refresh);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw content of remote file.
    pub fn list(&self) -> Result<String> {
        Ok(self.remote.read_file(&self.path, self.as_user.as_deref())?)
    }

    fn read(&self) -> Result<LineEdit> {
        if !self.remote.exists(&self.path, self.as_user.as_deref())? {
            return Ok(LineEdit::new());
        }

        Ok(LineEdit::from(self.list()?))
    }

    fn write(&self, edit: &LineEdit) -> Result<()> {
        self.remote
            .write_file(&self.path, &edit.to_string(), self.as_user.as_deref())?;
        Ok(())
    }

    fn trigger(&self, policy: RefreshPolicy) -> Result<()> {
        if let (RefreshPolicy::Refresh, Some(refresh)) = (policy, self.refresh) {
            refresh.refresh().map_err(EditError::Refresh)?;
        }

        Ok(())
    }

    /// Set key to value, refreshing afterwards.
    pub fn set(&self, key: &str, value: &str) -> Result<String> {
        self.set_with(key, value, RefreshPolicy::Refresh)
    }

    /// Set key to value.
    ///
    /// Drops every existing line for the key, appends the canonical line,
    /// and verifies that exactly that one line for the key survives.
    ///
    /// # Errors
    ///
    /// - Return [`EditError::InvalidKey`] or [`EditError::InvalidValue`] if
    ///   the pair cannot be represented as a single line.
    /// - Return [`EditError::Verification`] if the read back disagrees.
    /// - Return [`EditError::Remote`] if the remote side fails.
    #[instrument(skip(self, value), level = "debug")]
    pub fn set_with(&self, key: &str, value: &str, policy: RefreshPolicy) -> Result<String> {
        validate_key(key)?;
        if value.contains(['\n', '\r']) {
            return Err(EditError::InvalidValue { key: key.into() });
        }

        let mut edit = self.read()?;
        let target = edit.set(key, value);
        self.write(&edit)?;

        let written = self.read()?;
        if !written.contains_line(&target) || written.key_count(key) != 1 {
            return Err(EditError::Verification {
                path: self.path.clone(),
                detail: format!("expected exactly one line {target:?}"),
            });
        }
        info!("{}: {target}", self.path.display());

        self.trigger(policy)?;
        Ok(target)
    }

    /// Remove key, refreshing afterwards.
    pub fn remove(&self, key: &str) -> Result<usize> {
        self.remove_with(key, RefreshPolicy::Refresh)
    }

    /// Remove every line for key.
    ///
    /// Absence of the key is not an error, and leaves the file untouched.
    ///
    /// # Errors
    ///
    /// - Return [`EditError::Verification`] if a line for the key survives.
    /// - Return [`EditError::Remote`] if the remote side fails.
    #[instrument(skip(self), level = "debug")]
    pub fn remove_with(&self, key: &str, policy: RefreshPolicy) -> Result<usize> {
        validate_key(key)?;

        let mut edit = self.read()?;
        let removed = edit.remove(key);
        if removed > 0 {
            self.write(&edit)?;
            info!("{}: removed {removed} line(s) for {key:?}", self.path.display());
        } else {
            debug!("{}: no line for {key:?}", self.path.display());
        }

        if self.read()?.has_key(key) {
            return Err(EditError::Verification {
                path: self.path.clone(),
                detail: format!("line for {key:?} still present"),
            });
        }

        self.trigger(policy)?;
        Ok(removed)
    }

    /// Append exact line unless already present.
    ///
    /// # Errors
    ///
    /// - Return [`EditError::Verification`] if the line is missing after
    ///   the write.
    #[instrument(skip(self), level = "debug")]
    pub fn ensure_line(&self, line: &str) -> Result<bool> {
        let mut edit = self.read()?;
        if !edit.ensure_line(line) {
            debug!("{}: line already present", self.path.display());
            return Ok(false);
        }

        self.write(&edit)?;
        if !self.read()?.contains_line(line) {
            return Err(EditError::Verification {
                path: self.path.clone(),
                detail: format!("expected line {line:?}"),
            });
        }

        Ok(true)
    }

    /// Remove every line satisfying predicate.
    pub fn remove_matching<P>(&self, predicate: P) -> Result<usize>
    where
        P: Fn(&str) -> bool,
    {
        let mut edit = self.read()?;
        let removed = edit.remove_matching(&predicate);
        if removed == 0 {
            return Ok(0);
        }

        self.write(&edit)?;
        if self.read()?.lines().iter().any(|line| predicate(line.as_str())) {
            return Err(EditError::Verification {
                path: self.path.clone(),
                detail: "matching line still present".into(),
            });
        }

        Ok(removed)
    }

    /// Download file into local directory.
    pub fn download(&self, local_dir: &Path) -> Result<PathBuf> {
        let name = self
            .path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("download"));
        let local = local_dir.join(name);
        self.remote.download(&self.path, &local)?;
        Ok(local)
    }

    /// Replace remote file with local file.
    pub fn upload(&self, local: &Path) -> Result<()> {
        let content = std::fs::read_to_string(local).map_err(|err| EditError::ReadLocal {
            source: err,
            path: local.to_path_buf(),
        })?;
        self.write(&LineEdit::from(content))?;
        Ok(())
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_graphic() && c != '=') {
        return Err(EditError::InvalidKey { key: key.into() });
    }

    Ok(())
}

/// Line editing error types.
#[derive(Debug, thiserror::Error)]
pub enum EditError {
    /// Written file does not hold the intended content.
    #[error("config write verification failed for {:?}: {detail}", path.display())]
    Verification { path: PathBuf, detail: String },

    /// Key cannot be represented in a settings line.
    #[error("invalid key {key:?}")]
    InvalidKey { key: String },

    /// Value would span more than one line.
    #[error("value for {key:?} must be a single line")]
    InvalidValue { key: String },

    /// Local file cannot be read.
    #[error("failed to read {:?}", path.display())]
    ReadLocal {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Post-edit side effect failed.
    #[error("refresh after config change failed")]
    Refresh(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Remote(#[from] crate::remote::RemoteError),
}

/// Friendly result alias :3
pub type Result<T, E = EditError> = std::result::Result<T, E>;
