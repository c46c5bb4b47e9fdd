// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Parameterized shell command construction.
//!
//! Every remote operation is described as a [`ShellCommand`]: a program, a
//! list of arguments, and optionally a working directory and environment
//! assignments. Nothing is ever spliced into a shell string by hand. Each
//! token is quoted at render time, so a value like `$(rm -rf ~)` reaches the
//! remote program as the literal argument it is.

use shell_escape::unix::escape;
use std::{
    borrow::Cow,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};

/// Shell command to run on a remote host.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    program: String,
    args: Vec<String>,
    dir: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl ShellCommand {
    /// Construct new command for target program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a listing of arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append a path argument.
    pub fn path(self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_string_lossy().into_owned();
        self.arg(path)
    }

    /// Run command from within target directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Set environment variable for the command only.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn environment(&self) -> &[(String, String)] {
        &self.env
    }

    /// Command needs a shell to interpret its working directory or
    /// environment assignments.
    pub fn needs_shell(&self) -> bool {
        self.dir.is_some() || !self.env.is_empty()
    }

    /// Render program and arguments without directory or environment
    /// prefixes.
    pub fn render_invocation(&self) -> String {
        let mut out = quote(&self.program).into_owned();
        for arg in &self.args {
            out.push(' ');
            out.push_str(&quote(arg));
        }

        out
    }
}

impl Display for ShellCommand {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        if let Some(dir) = &self.dir {
            write!(fmt, "cd {} && ", quote(&dir.to_string_lossy()))?;
        }

        for (key, value) in &self.env {
            // INVARIANT: Variable names are never quoted, so only accept
            //   identifiers that cannot smuggle shell syntax.
            let key: String = key
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            write!(fmt, "{key}={} ", quote(value))?;
        }

        fmt.write_str(&self.render_invocation())
    }
}

/// Quote one shell token.
pub fn quote(token: &str) -> Cow<'_, str> {
    if token.is_empty() {
        return Cow::Borrowed("''");
    }

    escape(Cow::Borrowed(token))
}
