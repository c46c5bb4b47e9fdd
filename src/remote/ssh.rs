// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! OpenSSH backed executor.
//!
//! Shells out to the system `ssh`, `scp`, and `rsync` binaries so the user's
//! own SSH configuration, agent, and known hosts apply unchanged.

use crate::remote::{
    command::quote, ExecOptions, Output, RemoteError, RemoteExecutor, Result, ShellCommand,
    SyncDirection,
};

use indicatif::{ProgressBar, ProgressStyle};
use std::{
    ffi::OsString,
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::Duration,
};
use tracing::{debug, instrument};

/// Executor that runs commands through OpenSSH.
#[derive(Debug, Default, Clone)]
pub struct SshExecutor {
    sudo_password: Option<String>,
    port: Option<u16>,
}

impl SshExecutor {
    /// Construct new executor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed password to sudo through stdin.
    ///
    /// Without a password sudo runs non-interactively, which only works for
    /// NOPASSWD rules.
    pub fn with_sudo_password(mut self, password: impl Into<String>) -> Self {
        self.sudo_password = Some(password.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Render full command line the remote shell receives.
    pub fn remote_command_line(&self, command: &ShellCommand, options: &ExecOptions) -> String {
        let Some(user) = &options.as_user else {
            return command.to_string();
        };

        let sudo = match self.sudo_password {
            Some(_) => format!("sudo -S -p '' -u {} -H --", quote(user)),
            None => format!("sudo -n -u {} -H --", quote(user)),
        };

        if command.needs_shell() {
            format!("{sudo} sh -c {}", quote(&command.to_string()))
        } else {
            format!("{sudo} {}", command.render_invocation())
        }
    }

    fn ssh_args(&self, host: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(port) = self.port {
            args.push("-p".into());
            args.push(port.to_string().into());
        }
        args.push(host.into());
        args
    }

    fn spinner(message: String) -> ProgressBar {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{elapsed_precise:.green}  {spinner}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(style);
        bar.set_message(message);
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    }
}

impl RemoteExecutor for SshExecutor {
    #[instrument(skip(self, command, options), level = "debug")]
    fn execute(&self, host: &str, command: &ShellCommand, options: &ExecOptions) -> Result<Output> {
        let line = self.remote_command_line(command, options);
        debug!("ssh {host} {line}");

        let feed_password = options.as_user.is_some() && self.sudo_password.is_some();
        let mut child = Command::new("ssh")
            .args(self.ssh_args(host))
            .arg(&line)
            .stdin(if feed_password {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| RemoteError::Spawn {
                source: err,
                program: "ssh".into(),
            })?;

        if let (true, Some(password)) = (feed_password, &self.sudo_password) {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(format!("{password}\n").as_bytes())?;
            }
        }

        let output = child.wait_with_output()?;
        Output {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code(),
        }
        .check(host, command, options)
    }

    #[instrument(skip(self), level = "debug")]
    fn transfer_to_remote(&self, host: &str, local: &Path, remote: &Path) -> Result<PathBuf> {
        let bar = Self::spinner(format!("upload {}", local.display()));
        let mut cmd = Command::new("scp");
        cmd.arg("-q");
        if let Some(port) = self.port {
            cmd.arg("-P").arg(port.to_string());
        }
        let output = cmd
            .arg(local)
            .arg(format!("{host}:{}", remote.display()))
            .stdin(Stdio::null())
            .output()
            .map_err(|err| RemoteError::Spawn {
                source: err,
                program: "scp".into(),
            })?;
        bar.finish_and_clear();

        if !output.status.success() {
            return Err(RemoteError::Transfer {
                host: host.into(),
                from: local.to_path_buf(),
                to: remote.to_path_buf(),
                message: String::from_utf8_lossy(&output.stderr).trim().into(),
            });
        }

        Ok(remote.to_path_buf())
    }

    #[instrument(skip(self), level = "debug")]
    fn transfer_from_remote(&self, host: &str, remote: &Path, local: &Path) -> Result<()> {
        let bar = Self::spinner(format!("download {}", remote.display()));
        let mut cmd = Command::new("scp");
        cmd.arg("-q");
        if let Some(port) = self.port {
            cmd.arg("-P").arg(port.to_string());
        }
        let output = cmd
            .arg(format!("{host}:{}", remote.display()))
            .arg(local)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| RemoteError::Spawn {
                source: err,
                program: "scp".into(),
            })?;
        bar.finish_and_clear();

        if !output.status.success() {
            return Err(RemoteError::Transfer {
                host: host.into(),
                from: remote.to_path_buf(),
                to: local.to_path_buf(),
                message: String::from_utf8_lossy(&output.stderr).trim().into(),
            });
        }

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn sync_directory(
        &self,
        host: &str,
        local: &Path,
        remote: &Path,
        direction: SyncDirection,
        delete: bool,
    ) -> Result<()> {
        // INVARIANT: Trailing slashes make rsync copy directory contents.
        let local_spec = with_slash(&local.to_string_lossy());
        let remote_spec = format!("{host}:{}", with_slash(&remote.to_string_lossy()));
        let (from, to) = match direction {
            SyncDirection::Upload => (local_spec, remote_spec),
            SyncDirection::Download => (remote_spec, local_spec),
        };

        let shell = match self.port {
            Some(port) => format!("ssh -p {port}"),
            None => "ssh".into(),
        };

        let mut cmd = Command::new("rsync");
        cmd.arg("-az").arg("-e").arg(shell);
        if delete {
            cmd.arg("--delete");
        }
        let status = cmd
            .arg(&from)
            .arg(&to)
            .stdin(Stdio::inherit())
            .status()
            .map_err(|err| RemoteError::Spawn {
                source: err,
                program: "rsync".into(),
            })?;

        if !status.success() {
            return Err(RemoteError::Transfer {
                host: host.into(),
                from: from.into(),
                to: to.into(),
                message: format!("rsync exited with {:?}", status.code()),
            });
        }

        Ok(())
    }
}

fn with_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.into()
    } else {
        format!("{path}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_command_line() {
        let executor = SshExecutor::new();
        let cmd = ShellCommand::new("mkdir").arg("-p").arg("/srv/app");
        assert_eq!(
            executor.remote_command_line(&cmd, &ExecOptions::default()),
            "mkdir -p /srv/app"
        );
    }

    #[test]
    fn sudo_without_password_is_non_interactive() {
        let executor = SshExecutor::new();
        let cmd = ShellCommand::new("service").args(["nginx", "restart"]);
        assert_eq!(
            executor.remote_command_line(&cmd, &ExecOptions::as_user("root")),
            "sudo -n -u root -H -- service nginx restart"
        );
    }

    #[test]
    fn sudo_wraps_shell_when_needed() {
        let executor = SshExecutor::new().with_sudo_password("hunter2");
        let cmd = ShellCommand::new("psql").arg("template1").current_dir("/tmp");
        assert_eq!(
            executor.remote_command_line(&cmd, &ExecOptions::as_user("postgres")),
            r#"sudo -S -p '' -u postgres -H -- sh -c 'cd /tmp && psql template1'"#
        );
    }

    #[test]
    fn slash_is_added_once() {
        assert_eq!(with_slash("/srv/media"), "/srv/media/");
        assert_eq!(with_slash("/srv/media/"), "/srv/media/");
    }
}
