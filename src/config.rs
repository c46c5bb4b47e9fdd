// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! A project describes itself through a __manifest__ file, `rollout.toml`,
//! kept at the root of its repository. The manifest names the project and
//! lists each deploy environment, or __instance__, with the hosts that serve
//! it.
//!
//! # Environments
//!
//! Everything rollout knows about a remote host is derived from two names:
//! the project and the instance. From those, [`Environment`] computes the
//! whole remote directory layout deterministically:
//!
//! ```text
//! /home/<user>                  (root)
//! +---- /<instance>             (app)
//! |     +---- /releases
//! |     |     +---- /<release>
//! |     |     +---- /current -> <release>
//! |     +---- /share
//! |     |     +---- /settings.ini
//! |     |     +---- /media
//! |     +---- /tmp
//! +---- /logs
//!       +---- /<instance>       (logs)
//! ```
//!
//! Nothing about an environment is persisted anywhere. One user serves one
//! project across all of its instances, which keeps deploy access per
//! project simple to grant and revoke.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Default file name of a project manifest.
pub const MANIFEST_FILE: &str = "rollout.toml";

/// Project manifest layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Manifest {
    /// Settings shared by every environment.
    pub project: ProjectSettings,

    /// Deploy environments by instance name.
    #[serde(rename = "environment", default)]
    pub environments: BTreeMap<String, EnvironmentSettings>,
}

impl Manifest {
    /// Load manifest from file.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if the file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if the manifest is malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = read_to_string(path.as_ref()).map_err(|err| ConfigError::Read {
            source: err,
            path: path.as_ref().to_path_buf(),
        })?;

        data.parse()
    }

    /// Derive environment for target instance.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::UnknownEnvironment`] if the manifest does not
    ///   define the instance.
    pub fn environment(&self, instance: impl AsRef<str>) -> Result<Environment> {
        let instance = instance.as_ref();
        let settings = self.environments.get(instance).ok_or_else(|| {
            ConfigError::UnknownEnvironment {
                instance: instance.into(),
                known: self.environments.keys().cloned().collect(),
            }
        })?;

        if settings.hosts.is_empty() {
            return Err(ConfigError::NoHosts {
                instance: instance.into(),
            });
        }

        Ok(Environment::new(&self.project, instance, settings))
    }
}

impl FromStr for Manifest {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut manifest: Manifest = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on local path fields.
        for path in [&mut manifest.project.templates, &mut manifest.project.scripts] {
            *path = PathBuf::from(
                shellexpand::full(path.to_string_lossy().as_ref())
                    .map_err(ConfigError::ShellExpansion)?
                    .into_owned(),
            );
        }

        Ok(manifest)
    }
}

impl Display for Manifest {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Project wide settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ProjectSettings {
    /// Project name.
    pub name: String,

    /// Application package directory inside the repository.
    pub package: Option<String>,

    /// Remote user that owns and runs the application.
    pub user: Option<String>,

    /// Sudo capable login used for provisioning.
    pub admin: Option<String>,

    /// Local directory of per-host templates.
    #[serde(default = "default_templates")]
    pub templates: PathBuf,

    /// Local directory of server setup scripts.
    #[serde(default = "default_scripts")]
    pub scripts: PathBuf,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            package: None,
            user: None,
            admin: None,
            templates: default_templates(),
            scripts: default_scripts(),
        }
    }
}

fn default_templates() -> PathBuf {
    PathBuf::from("host")
}

fn default_scripts() -> PathBuf {
    PathBuf::from("scripts")
}

/// Settings of one deploy environment.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct EnvironmentSettings {
    /// Hosts serving this environment, deployed to in order.
    pub hosts: Vec<String>,
}

/// Fully derived deploy environment.
///
/// Immutable for the duration of one invocation, and passed explicitly to
/// every component that needs it. Doubles as the context for host templates.
#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
pub struct Environment {
    pub project: String,
    pub instance: String,
    pub package: String,
    pub user: String,
    pub admin: String,
    pub appname: String,
    pub hosts: Vec<String>,
    pub templates: PathBuf,
    pub scripts: PathBuf,
    pub root: PathBuf,
    pub app: PathBuf,
    pub releases: PathBuf,
    pub current: PathBuf,
    pub share: PathBuf,
    pub tmp: PathBuf,
    pub media: PathBuf,
    pub settings: PathBuf,
    pub logs: PathBuf,
}

impl Environment {
    /// Derive environment from project settings and instance name.
    pub fn new(project: &ProjectSettings, instance: &str, settings: &EnvironmentSettings) -> Self {
        let user = project.user.clone().unwrap_or_else(|| project.name.clone());
        let admin = project
            .admin
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "root".into());

        let root = PathBuf::from("/home").join(&user);
        let app = root.join(instance);
        let releases = app.join("releases");
        let share = app.join("share");

        Self {
            project: project.name.clone(),
            instance: instance.into(),
            package: project
                .package
                .clone()
                .unwrap_or_else(|| project.name.clone()),
            appname: format!("{}-{instance}", project.name),
            hosts: settings.hosts.clone(),
            templates: project.templates.clone(),
            scripts: project.scripts.clone(),
            current: releases.join("current"),
            media: share.join("media"),
            settings: share.join("settings.ini"),
            tmp: app.join("tmp"),
            logs: root.join("logs").join(instance),
            user,
            admin,
            root,
            app,
            releases,
            share,
        }
    }

    /// SSH destination for application user on host.
    pub fn destination(&self, host: &str) -> String {
        format!("{}@{host}", self.user)
    }

    /// SSH destination for admin user on host.
    pub fn admin_destination(&self, host: &str) -> String {
        format!("{}@{host}", self.admin)
    }

    /// Directories owned by the application user, parents first.
    pub fn dirs(&self) -> Vec<PathBuf> {
        vec![
            self.app.clone(),
            self.releases.clone(),
            self.share.clone(),
            self.tmp.clone(),
            self.media.clone(),
            self.root.join("logs"),
            self.logs.clone(),
        ]
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Manifest file cannot be read.
    #[error("failed to read manifest at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Requested environment is not defined.
    #[error("environment {instance:?} is not defined (known: {known:?})")]
    UnknownEnvironment { instance: String, known: Vec<String> },

    /// Environment defines no hosts to act on.
    #[error("environment {instance:?} lists no hosts")]
    NoHosts { instance: String },
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
