// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Host provisioning.
//!
//! One-time setup of a host or of one environment on a host: OS accounts,
//! the application directory tree, the persistent settings file, and the
//! service configuration links that point into the live release. Every
//! step checks before it acts, so provisioning an already provisioned host
//! either does nothing or refuses loudly.
//!
//! Provisioning runs through the admin login and escalates to root with
//! sudo for each step.

pub mod database;
pub mod user;

pub use database::{Database, DatabaseError};

use crate::{
    config::Environment,
    edit::{EditError, LineEditor},
    remote::{Remote, RemoteError, RemoteExecutor, ShellCommand},
};

use std::{
    fs::read_to_string,
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};
use tracing::{info, instrument, warn};

/// Group the web server runs as.
pub const WEB_GROUP: &str = "www-data";

const SSHD_CONFIG: &str = "/etc/ssh/sshd_config";
const SETUP_DIR: &str = "/tmp/rollout-setup";

/// Database server installed during server setup.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseEngine {
    #[default]
    Postgres,
    Mysql,
    None,
}

impl DatabaseEngine {
    /// Extra setup scripts the engine needs.
    pub fn scripts(self) -> &'static [&'static str] {
        match self {
            Self::Postgres => &["pg_hba.conf", "postgresql.sh"],
            Self::Mysql => &["mysql.sh"],
            Self::None => &[],
        }
    }
}

/// Parameters of a fresh server setup.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    pub hostname: Option<String>,
    pub fqdn: Option<String>,
    pub email: Option<String>,
    pub database: DatabaseEngine,
}

/// Password hash scheme understood by `openssl passwd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashScheme {
    /// SHA-512 crypt, for `/etc/shadow`.
    Sha512,

    /// Apache MD5, for `.htpasswd`.
    Apr1,
}

impl HashScheme {
    fn flag(self) -> &'static str {
        match self {
            Self::Sha512 => "-6",
            Self::Apr1 => "-apr1",
        }
    }
}

/// Hash password locally so it never appears on a remote command line.
///
/// # Errors
///
/// - Return [`ProvisionError::PasswordHash`] if `openssl` is unavailable or
///   fails.
pub fn hash_password(password: &str, scheme: HashScheme) -> Result<String> {
    let mut child = Command::new("openssl")
        .args(["passwd", scheme.flag(), "-stdin"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(ProvisionError::PasswordHash)?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(format!("{password}\n").as_bytes())
            .map_err(ProvisionError::PasswordHash)?;
    }

    let output = child
        .wait_with_output()
        .map_err(ProvisionError::PasswordHash)?;
    if !output.status.success() {
        return Err(ProvisionError::PasswordHash(std::io::Error::other(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().into())
}

/// Read public key file.
///
/// # Errors
///
/// - Return [`ProvisionError::MissingKey`] if the file is missing or empty.
pub fn read_pubkey(path: &Path) -> Result<String> {
    let key = read_to_string(path).map_err(|_| ProvisionError::MissingKey {
        path: path.to_path_buf(),
    })?;

    let key = key.trim();
    if key.is_empty() || key.contains('\n') {
        return Err(ProvisionError::MissingKey {
            path: path.to_path_buf(),
        });
    }

    Ok(key.into())
}

/// Provisions hosts and environments.
#[derive(Debug)]
pub struct Provisioner<'a, E>
where
    E: RemoteExecutor,
{
    remote: &'a Remote<'a, E>,
    env: &'a Environment,
}

impl<'a, E> Provisioner<'a, E>
where
    E: RemoteExecutor,
{
    /// Construct new provisioner over an admin session.
    pub fn new(remote: &'a Remote<'a, E>, env: &'a Environment) -> Self {
        Self { remote, env }
    }

    fn root(&self, command: ShellCommand) -> Result<()> {
        self.remote.run_as("root", command)?;
        Ok(())
    }

    fn root_editor(&self, path: impl Into<PathBuf>) -> LineEditor<'a, E> {
        LineEditor::new(self.remote, path).as_user("root")
    }

    /// Service configuration links, as (release host file, system path).
    pub fn service_links(&self) -> Vec<(PathBuf, PathBuf)> {
        let host = self.env.current.join("host");
        let appname = &self.env.appname;
        vec![
            (
                host.join("nginx.conf"),
                PathBuf::from(format!("/etc/nginx/conf.d/{appname}.conf")),
            ),
            (
                host.join("nginx.vhost"),
                PathBuf::from(format!("/etc/nginx/sites-enabled/{appname}.vhost")),
            ),
            (
                host.join("uwsgi.conf"),
                PathBuf::from(format!("/etc/supervisor/conf.d/{appname}.conf")),
            ),
            (
                host.join("rsyslog.conf"),
                PathBuf::from(format!("/etc/rsyslog.d/{appname}.conf")),
            ),
        ]
    }

    /// Set up application environment on host.
    ///
    /// Creates the project user when missing, then the directory tree,
    /// the settings file, and the service configuration links. When the
    /// application directory already exists, `confirm` decides whether it is
    /// wiped and rebuilt.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError::AppExists`] if the application directory
    ///   exists and the rebuild was not confirmed. Nothing is changed then.
    #[instrument(skip(self, pubkey, confirm), level = "debug")]
    pub fn application<F>(&self, pubkey: &str, confirm: F) -> Result<()>
    where
        F: FnOnce(&Path) -> bool,
    {
        let user = self.env.user.as_str();
        if !self.user_exists(user)? {
            info!("creating project user {user}");
            self.create_project_user(user, pubkey)?;
        }

        if self.remote.dir_exists(&self.env.app, Some("root"))? {
            warn!("application detected at {}", self.env.app.display());
            if !confirm(&self.env.app) {
                return Err(ProvisionError::AppExists {
                    path: self.env.app.clone(),
                });
            }
            self.root(ShellCommand::new("rm").arg("-rf").path(&self.env.app))?;
        }

        for dir in self.env.dirs() {
            self.root(
                ShellCommand::new("install")
                    .args(["-d", "-m", "755", "-o", user, "-g", WEB_GROUP])
                    .path(dir),
            )?;
        }

        // INVARIANT: Settings file gets restrictive mode before any content.
        self.root(
            ShellCommand::new("install")
                .args(["-m", "600", "-o", user, "-g", WEB_GROUP])
                .path("/dev/null")
                .path(&self.env.settings),
        )?;
        self.root_editor(&self.env.settings)
            .ensure_line("[settings]")?;

        for (target, link) in self.service_links() {
            self.root(ShellCommand::new("ln").arg("-sfn").path(target).path(link))?;
        }
        info!("application {} ready", self.env.appname);

        Ok(())
    }

    /// Bootstrap a fresh server.
    ///
    /// Ships the setup scripts from the local scripts directory, runs
    /// `server_setup.sh <hostname> <fqdn> <email>` as root, and allows user
    /// environments in sshd.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError::MissingFile`] if a setup script is missing
    ///   locally. Nothing is uploaded then.
    #[instrument(skip(self), level = "debug")]
    pub fn server(&self, host: &str, options: &ServerOptions) -> Result<()> {
        let hostname = options
            .hostname
            .clone()
            .unwrap_or_else(|| self.env.instance.clone());
        let fqdn = options.fqdn.clone().unwrap_or_else(|| host.into());
        let email = options
            .email
            .clone()
            .unwrap_or_else(|| format!("root@{fqdn}"));
        info!("setting up server: hostname={hostname} fqdn={fqdn} email={email}");

        let mut files = vec!["server_setup.sh", "postfix.sh", "watchdog.sh"];
        files.extend(options.database.scripts());

        let local: Vec<PathBuf> = files
            .iter()
            .map(|name| self.env.scripts.join(name))
            .collect();
        if let Some(missing) = local.iter().find(|path| !path.is_file()) {
            return Err(ProvisionError::MissingFile {
                path: missing.clone(),
            });
        }

        let setup_dir = PathBuf::from(SETUP_DIR);
        self.remote
            .run(ShellCommand::new("mkdir").arg("-p").path(&setup_dir))?;
        for (path, name) in local.iter().zip(&files) {
            let remote = setup_dir.join(name);
            self.remote.upload(path, &remote)?;
            if name.ends_with(".sh") {
                self.remote
                    .run(ShellCommand::new("chmod").arg("755").path(&remote))?;
            }
        }

        self.root(
            ShellCommand::new("./server_setup.sh")
                .args([hostname, fqdn, email])
                .current_dir(&setup_dir),
        )?;
        self.root_editor(SSHD_CONFIG)
            .ensure_line("PermitUserEnvironment yes")?;
        info!("server setup complete");

        Ok(())
    }

    /// Delete application directory.
    ///
    /// Returns whether anything was deleted.
    #[instrument(skip(self, confirm), level = "debug")]
    pub fn delete_app<F>(&self, confirm: F) -> Result<bool>
    where
        F: FnOnce(&Path) -> bool,
    {
        if !self.remote.dir_exists(&self.env.app, Some("root"))? {
            info!("no application at {}", self.env.app.display());
            return Ok(false);
        }

        if !confirm(&self.env.app) {
            return Ok(false);
        }

        self.root(ShellCommand::new("rm").arg("-rf").path(&self.env.app))?;
        warn!("deleted {}", self.env.app.display());

        Ok(true)
    }

    /// Copy local file into the share directory.
    ///
    /// An existing remote file is only replaced when `confirm_overwrite`
    /// agrees. Returns whether the file was sent.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError::MissingFile`] if the local file is missing.
    #[instrument(skip(self, confirm_overwrite), level = "debug")]
    pub fn send_to_share<F>(&self, local: &Path, confirm_overwrite: F) -> Result<bool>
    where
        F: FnOnce(&Path) -> bool,
    {
        let name = match (local.is_file(), local.file_name()) {
            (true, Some(name)) => name.to_string_lossy().into_owned(),
            _ => {
                return Err(ProvisionError::MissingFile {
                    path: local.to_path_buf(),
                })
            }
        };

        let remote = self.env.share.join(&name);
        if self.remote.exists(&remote, Some("root"))? && !confirm_overwrite(&remote) {
            return Ok(false);
        }

        self.remote.replace_file(local, &remote, Some("root"))?;
        self.root(
            ShellCommand::new("chown")
                .arg(format!("{}:{WEB_GROUP}", self.env.user))
                .path(&remote),
        )?;
        info!("sent {} to {}", local.display(), remote.display());

        Ok(true)
    }

    /// Detailed listing of the share directory.
    pub fn list_share(&self) -> Result<String> {
        let output = self.remote.run_as(
            "root",
            ShellCommand::new("ls").arg("-lah").path(&self.env.share),
        )?;
        Ok(output.stdout)
    }

    /// Authorize public key for the application user.
    ///
    /// Returns whether the key was new.
    #[instrument(skip(self, pubkey), level = "debug")]
    pub fn add_key(&self, pubkey: &str) -> Result<bool> {
        self.authorize_key(&self.env.user, pubkey)
    }

    /// Add or replace basic auth credentials in the share `.htpasswd`.
    #[instrument(skip(self, password), level = "debug")]
    pub fn add_htpasswd_user(&self, username: &str, password: &str) -> Result<()> {
        if username.is_empty() || username.contains([':', '\n', '\r']) {
            return Err(ProvisionError::InvalidName {
                name: username.into(),
            });
        }

        let path = self.env.share.join(".htpasswd");
        if !self.remote.exists(&path, Some("root"))? {
            self.root(
                ShellCommand::new("install")
                    .args(["-m", "640", "-o", self.env.user.as_str(), "-g", WEB_GROUP])
                    .path("/dev/null")
                    .path(&path),
            )?;
        }

        let hash = hash_password(password, HashScheme::Apr1)?;
        let prefix = format!("{username}:");
        let editor = self.root_editor(&path);
        editor.remove_matching(|line| line.starts_with(&prefix))?;
        editor.ensure_line(&format!("{prefix}{hash}"))?;
        info!("htpasswd user {username} set");

        Ok(())
    }
}

/// Provisioning error types.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Application directory exists and rebuild was not confirmed.
    #[error("application already exists at {:?}", path.display())]
    AppExists { path: PathBuf },

    /// Public key file is missing or malformed.
    #[error("public key file does not exist or is invalid: {:?}", path.display())]
    MissingKey { path: PathBuf },

    /// Local file to send is missing.
    #[error("local file not found: {:?}", path.display())]
    MissingFile { path: PathBuf },

    /// Public key does not fit on one `authorized_keys` line.
    #[error("public key must be a single non-empty line")]
    InvalidKey,

    /// Name cannot be used for an account.
    #[error("invalid name {name:?}")]
    InvalidName { name: String },

    /// Local password hashing failed.
    #[error("failed to hash password")]
    PasswordHash(#[source] std::io::Error),

    #[error(transparent)]
    Edit(#[from] EditError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Friendly result alias :3
pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;
