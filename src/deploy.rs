// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deploy orchestration.
//!
//! Sequences release management and service control across every host of
//! an environment. Hosts are handled one after the other, and the first
//! failure stops the whole run: hosts after the failing one are left on
//! their previous release.

use crate::{
    config::Environment,
    release::{ReleaseError, ReleaseManager, SourceControl, TemplateRenderer},
    remote::{Remote, RemoteError, RemoteExecutor, SyncDirection},
    service::{ServiceController, ServiceError},
};

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Optional steps of a deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployOptions {
    /// Apply database migrations before going live.
    pub migrate: bool,

    /// Load snippets fixture before going live.
    pub load_snippets: bool,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            migrate: true,
            load_snippets: false,
        }
    }
}

/// Drives deploys of one environment.
pub struct DeployOrchestrator<'a, E>
where
    E: RemoteExecutor,
{
    executor: &'a E,
    env: &'a Environment,
    clock: fn() -> DateTime<Utc>,
}

impl<'a, E> DeployOrchestrator<'a, E>
where
    E: RemoteExecutor,
{
    pub fn new(executor: &'a E, env: &'a Environment) -> Self {
        Self {
            executor,
            env,
            clock: Utc::now,
        }
    }

    /// Use target clock to name new releases.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    fn remote(&self, host: &str) -> Remote<'a, E> {
        Remote::new(self.executor, self.env.destination(host))
    }

    /// Full deploy of revision to every host.
    ///
    /// The revision is resolved once, so every host receives the same commit.
    /// Per host: push, build, migrate (optional), clear cache, load snippets
    /// (optional), release, restart. Returns the release directory of each
    /// host, in host order.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::Release`] or [`DeployError::Service`] from the
    ///   first failing step. Later steps and hosts are not attempted.
    #[instrument(skip(self, source, renderer), level = "debug")]
    pub fn deploy(
        &self,
        source: &dyn SourceControl,
        renderer: &dyn TemplateRenderer,
        revision: &str,
        options: DeployOptions,
    ) -> Result<Vec<PathBuf>> {
        let snapshot = source
            .resolve_revision(revision)
            .map_err(ReleaseError::from)?;

        let mut releases = Vec::with_capacity(self.env.hosts.len());
        for host in &self.env.hosts {
            info!("[{host}] deploying {revision} ({})", snapshot.commit);
            let remote = self.remote(host);
            let manager = ReleaseManager::new(&remote, self.env).with_clock(self.clock);

            let release = manager.push_snapshot(source, &snapshot)?;
            manager.build(renderer, &release)?;
            if options.migrate {
                manager.migrate(Some(release.as_path()))?;
            }
            manager.clearcache(Some(release.as_path()))?;
            if options.load_snippets {
                manager.load_snippets(Some(release.as_path()))?;
            }
            manager.release(&release)?;
            ServiceController::new(&remote, self.env).restart()?;

            info!("[{host}] live on {}", release.display());
            releases.push(release);
        }

        Ok(releases)
    }

    /// Roll every host back, then restart its services.
    ///
    /// Without a target each host goes back to the release preceding its
    /// current one.
    #[instrument(skip(self), level = "debug")]
    pub fn rollback(&self, target: Option<&str>) -> Result<Vec<PathBuf>> {
        let mut releases = Vec::with_capacity(self.env.hosts.len());
        for host in &self.env.hosts {
            let remote = self.remote(host);
            let release = ReleaseManager::new(&remote, self.env).rollback(target)?;
            ServiceController::new(&remote, self.env).restart()?;

            info!("[{host}] rolled back to {}", release.display());
            releases.push(release);
        }

        Ok(releases)
    }

    /// Mirror local `<package>/media` with every host's media directory.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::MissingMedia`] when uploading from a local
    ///   media directory that does not exist.
    #[instrument(skip(self), level = "debug")]
    pub fn sync_media(&self, project_root: &Path, upload: bool, delete: bool) -> Result<()> {
        let local = project_root.join(&self.env.package).join("media");
        let direction = if upload {
            if !local.is_dir() {
                return Err(DeployError::MissingMedia { path: local });
            }
            SyncDirection::Upload
        } else {
            mkdirp::mkdirp(&local).map_err(RemoteError::LocalIo)?;
            SyncDirection::Download
        };

        for host in &self.env.hosts {
            self.remote(host)
                .sync_directory(&local, &self.env.media, direction, delete)?;
            info!("[{host}] media synced ({direction:?})");
        }

        Ok(())
    }
}

/// Deploy error types.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error(transparent)]
    Release(#[from] ReleaseError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Local media directory to upload is missing.
    #[error("local media directory not found: {:?}", path.display())]
    MissingMedia { path: PathBuf },
}

/// Friendly result alias :3
pub type Result<T, E = DeployError> = std::result::Result<T, E>;
