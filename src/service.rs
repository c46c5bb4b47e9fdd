// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dependent OS services.
//!
//! After a release goes live the host needs to notice: the cron table is
//! reloaded from the release's `host/jobs.cron`, then the log shipper,
//! reverse proxy, and process supervisor are restarted in that order.

use crate::{
    config::Environment,
    edit::Refresh,
    remote::{Remote, RemoteError, RemoteExecutor, ShellCommand},
};

use std::{error::Error, path::PathBuf};
use tracing::{info, instrument, warn};

/// Restarts the services an environment depends on.
#[derive(Debug)]
pub struct ServiceController<'a, E>
where
    E: RemoteExecutor,
{
    remote: &'a Remote<'a, E>,
    env: &'a Environment,
}

impl<'a, E> ServiceController<'a, E>
where
    E: RemoteExecutor,
{
    pub fn new(remote: &'a Remote<'a, E>, env: &'a Environment) -> Self {
        Self { remote, env }
    }

    /// Path of the cron table shipped with the live release.
    pub fn cron_table(&self) -> PathBuf {
        self.env.current.join("host").join("jobs.cron")
    }

    /// Path of the application log on the host.
    pub fn log_file(&self) -> PathBuf {
        PathBuf::from(format!("/var/log/{}.log", self.env.appname))
    }

    fn restart_steps(&self) -> Vec<(Option<&'static str>, ShellCommand)> {
        vec![
            (None, ShellCommand::new("crontab").path(self.cron_table())),
            (
                Some("root"),
                ShellCommand::new("service").args(["rsyslog", "restart"]),
            ),
            (
                Some("root"),
                ShellCommand::new("service").args(["nginx", "restart"]),
            ),
            (
                Some("root"),
                ShellCommand::new("supervisorctl").arg("reload"),
            ),
        ]
    }

    /// Reload cron table and restart dependent services.
    ///
    /// Every step is attempted even when an earlier one fails.
    ///
    /// # Errors
    ///
    /// - Return [`ServiceError::Restart`] listing every step that failed.
    #[instrument(skip(self), level = "debug")]
    pub fn restart(&self) -> Result<()> {
        let mut failures = Vec::new();
        for (as_user, command) in self.restart_steps() {
            let rendered = command.to_string();
            let result = match as_user {
                Some(user) => self.remote.run_as(user, command),
                None => self.remote.run(command),
            };

            if let Err(err) = result {
                warn!("[{}] {err}", self.remote.destination());
                failures.push(RestartFailure {
                    command: rendered,
                    source: err,
                });
            }
        }

        if !failures.is_empty() {
            return Err(ServiceError::Restart {
                host: self.remote.destination().into(),
                failures,
            });
        }

        info!("[{}] services restarted", self.remote.destination());
        Ok(())
    }

    /// Fetch the last lines of the application log.
    #[instrument(skip(self), level = "debug")]
    pub fn logs(&self, lines: usize) -> Result<String> {
        let output = self.remote.run_as(
            "root",
            ShellCommand::new("tail")
                .arg("-n")
                .arg(lines.to_string())
                .path(self.log_file()),
        )?;

        Ok(output.stdout)
    }
}

impl<E> Refresh for ServiceController<'_, E>
where
    E: RemoteExecutor,
{
    fn refresh(&self) -> std::result::Result<(), Box<dyn Error + Send + Sync>> {
        self.restart().map_err(Into::into)
    }
}

/// One failed restart step.
#[derive(Debug)]
pub struct RestartFailure {
    pub command: String,
    pub source: RemoteError,
}

/// Service error types.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// One or more restart steps failed.
    #[error("[{host}] {} restart step(s) failed: {}", failures.len(), summarize(failures))]
    Restart {
        host: String,
        failures: Vec<RestartFailure>,
    },

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

fn summarize(failures: &[RestartFailure]) -> String {
    failures
        .iter()
        .map(|failure| failure.command.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Friendly result alias :3
pub type Result<T, E = ServiceError> = std::result::Result<T, E>;
