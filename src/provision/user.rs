// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! OS accounts.
//!
//! Two kinds of account exist. A plain user is a person: SSH key, optional
//! password, full sudo. A project user owns one application and may only
//! run exactly three administrative commands as root without a password:
//! `crontab`, `service`, and `supervisorctl`. That rule lives in its own
//! drop-in under `/etc/sudoers.d` and is the project user's only privilege.

use crate::{
    provision::{hash_password, HashScheme, ProvisionError, Provisioner, Result, WEB_GROUP},
    remote::{ExecOptions, RemoteExecutor, ShellCommand},
};

use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};

const SUDOERS_DIR: &str = "/etc/sudoers.d";
const PROFILE_LINE: &str = "export PIP_DOWNLOAD_CACHE=~/.pip";

/// Passwordless sudo rule granted to a project user.
pub fn project_sudo_rule(name: &str) -> String {
    format!("{name} ALL=(root) NOPASSWD: /usr/bin/crontab, /usr/sbin/service, /usr/bin/supervisorctl")
}

fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_first = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if !valid_first || !valid_rest || name.len() > 32 {
        return Err(ProvisionError::InvalidName { name: name.into() });
    }

    Ok(())
}

impl<E> Provisioner<'_, E>
where
    E: RemoteExecutor,
{
    /// Check if account exists on host.
    pub fn user_exists(&self, name: &str) -> Result<bool> {
        let output = self.remote.execute(
            &ShellCommand::new("id").arg("-u").arg(name),
            &ExecOptions::default().warn_only(),
        )?;
        Ok(output.succeeded())
    }

    fn home(name: &str) -> PathBuf {
        PathBuf::from("/home").join(name)
    }

    /// Create plain user with full sudo.
    ///
    /// Returns `false` without touching anything when the account already
    /// exists.
    #[instrument(skip(self, pubkey, password), level = "debug")]
    pub fn create_user(&self, name: &str, pubkey: &str, password: Option<&str>) -> Result<bool> {
        validate_name(name)?;
        if self.user_exists(name)? {
            info!("user {name} already exists");
            return Ok(false);
        }

        let hash = password
            .map(|password| hash_password(password, HashScheme::Sha512))
            .transpose()?;
        self.add_account(name, pubkey, hash.as_deref())?;
        self.root(ShellCommand::new("usermod").args(["-a", "-G", "sudo", name]))?;
        info!("created user {name}");

        Ok(true)
    }

    /// Create project user.
    ///
    /// Returns `false` without touching anything when the account already
    /// exists.
    #[instrument(skip(self, pubkey), level = "debug")]
    pub fn create_project_user(&self, name: &str, pubkey: &str) -> Result<bool> {
        validate_name(name)?;
        if self.user_exists(name)? {
            info!("project user {name} already exists");
            return Ok(false);
        }

        self.add_account(name, pubkey, None)?;
        self.root(ShellCommand::new("usermod").args(["-a", "-G", WEB_GROUP, name]))?;
        self.grant_project_sudo(name)?;

        let home = Self::home(name);
        for profile in [".profile", ".bashrc"] {
            let path = home.join(profile);
            self.root_editor(&path).ensure_line(PROFILE_LINE)?;
            self.root(
                ShellCommand::new("chown")
                    .arg(format!("{name}:{name}"))
                    .path(&path),
            )?;
        }
        info!("created project user {name}");

        Ok(true)
    }

    fn add_account(&self, name: &str, pubkey: &str, hash: Option<&str>) -> Result<()> {
        let mut useradd = ShellCommand::new("useradd").args(["-m", "-s", "/bin/bash"]);
        if let Some(hash) = hash {
            useradd = useradd.arg("-p").arg(hash);
        }
        self.root(useradd.arg(name))?;
        self.authorize_key(name, pubkey)?;

        Ok(())
    }

    fn grant_project_sudo(&self, name: &str) -> Result<()> {
        let path = PathBuf::from(SUDOERS_DIR).join(name);

        // INVARIANT: Drop-in exists with mode 0440 before the rule is written.
        if !self.remote.exists(&path, Some("root"))? {
            self.root(
                ShellCommand::new("install")
                    .args(["-m", "440", "-o", "root", "-g", "root"])
                    .path("/dev/null")
                    .path(&path),
            )?;
        }
        self.root_editor(&path)
            .ensure_line(&project_sudo_rule(name))?;

        if let Err(err) = self.root(ShellCommand::new("visudo").arg("-cf").path(&path)) {
            warn!("invalid sudoers drop-in {}, removing it", path.display());
            self.root(ShellCommand::new("rm").arg("-f").path(&path))?;
            return Err(err);
        }
        debug!("granted project sudo rule to {name}");

        Ok(())
    }

    /// Append public key to account's `authorized_keys`.
    ///
    /// Returns whether the key was new.
    pub fn authorize_key(&self, name: &str, pubkey: &str) -> Result<bool> {
        let pubkey = pubkey.trim();
        if pubkey.is_empty() || pubkey.contains(['\n', '\r']) {
            return Err(ProvisionError::InvalidKey);
        }

        let ssh = Self::home(name).join(".ssh");
        let owner = format!("{name}:{name}");
        self.root(
            ShellCommand::new("install")
                .args(["-d", "-m", "700", "-o", name, "-g", name])
                .path(&ssh),
        )?;

        let keys = ssh.join("authorized_keys");
        let added = self.root_editor(&keys).ensure_line(pubkey)?;
        self.root(ShellCommand::new("chmod").arg("644").path(&keys))?;
        self.root(ShellCommand::new("chown").arg(owner).path(&keys))?;

        Ok(added)
    }

    /// Delete account, its home, and its sudo rule.
    ///
    /// Returns `false` when the account does not exist.
    #[instrument(skip(self), level = "debug")]
    pub fn remove_user(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        if !self.user_exists(name)? {
            info!("user {name} does not exist");
            return Ok(false);
        }

        self.root(ShellCommand::new("userdel").arg(name))?;
        self.root(ShellCommand::new("rm").arg("-rf").path(Self::home(name)))?;
        self.root(
            ShellCommand::new("rm")
                .arg("-f")
                .path(PathBuf::from(SUDOERS_DIR).join(name)),
        )?;
        info!("removed user {name}");

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Environment, Manifest},
        remote::{fake::FakeHost, Remote},
    };
    use simple_test_case::test_case;

    const KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIExample deployer@laptop";

    fn environment() -> Environment {
        let manifest: Manifest = r#"
            [project]
            name = "eventex"
            admin = "deployer"

            [environment.stage]
            hosts = ["stage.eventex.com.br"]
        "#
        .parse()
        .unwrap();
        manifest.environment("stage").unwrap()
    }

    #[test_case("eventex", true; "plain")]
    #[test_case("_svc-1", true; "underscore and digits")]
    #[test_case("", false; "empty")]
    #[test_case("Eventex", false; "uppercase")]
    #[test_case("event ex", false; "whitespace")]
    #[test_case("1eventex", false; "leading digit")]
    #[test]
    fn account_names(name: &str, valid: bool) {
        assert_eq!(validate_name(name).is_ok(), valid);
    }

    #[test]
    fn existing_project_user_is_noop() {
        let env = environment();
        let host = FakeHost::default();
        host.put_user("eventex");
        let remote = Remote::new(&host, "deployer@stage");

        let created = Provisioner::new(&remote, &env)
            .create_project_user("eventex", KEY)
            .unwrap();
        assert!(!created);
        assert_eq!(host.commands(), ["id -u eventex"]);
    }

    #[test]
    fn project_user_gets_scoped_sudo_only() {
        let env = environment();
        let host = FakeHost::default();
        let remote = Remote::new(&host, "deployer@stage");

        let created = Provisioner::new(&remote, &env)
            .create_project_user("eventex", KEY)
            .unwrap();
        assert!(created);
        assert!(host.has_user("eventex"));

        assert_eq!(
            host.file("/etc/sudoers.d/eventex"),
            Some(format!("{}\n", project_sudo_rule("eventex")))
        );
        let commands = host.commands_as("root");
        assert!(commands.contains(
            &"install -m 440 -o root -g root /dev/null /etc/sudoers.d/eventex".to_string()
        ));
        assert!(commands.contains(&"usermod -a -G www-data eventex".to_string()));
        assert!(!commands.iter().any(|cmd| cmd.contains("-G sudo")));
        assert!(!commands.iter().any(|cmd| cmd.contains("/etc/sudoers ")));

        assert_eq!(
            host.file("/home/eventex/.ssh/authorized_keys"),
            Some(format!("{KEY}\n"))
        );
        assert_eq!(
            host.file("/home/eventex/.bashrc"),
            Some(format!("{PROFILE_LINE}\n"))
        );
    }

    #[test]
    fn plain_user_joins_sudo() {
        let env = environment();
        let host = FakeHost::default();
        let remote = Remote::new(&host, "root@stage");

        Provisioner::new(&remote, &env)
            .create_user("jason", KEY, None)
            .unwrap();
        assert!(host
            .commands_as("root")
            .contains(&"usermod -a -G sudo jason".to_string()));
        assert_eq!(host.file("/etc/sudoers.d/jason"), None);
    }

    #[test]
    fn remove_user_drops_sudo_rule() {
        let env = environment();
        let host = FakeHost::default();
        host.put_user("eventex");
        host.put_file("/etc/sudoers.d/eventex", &project_sudo_rule("eventex"));
        host.put_file("/home/eventex/.profile", PROFILE_LINE);
        let remote = Remote::new(&host, "deployer@stage");
        let provisioner = Provisioner::new(&remote, &env);

        assert!(provisioner.remove_user("eventex").unwrap());
        assert!(!host.has_user("eventex"));
        assert_eq!(host.file("/etc/sudoers.d/eventex"), None);
        assert_eq!(host.file("/home/eventex/.profile"), None);

        assert!(!provisioner.remove_user("eventex").unwrap());
    }

    #[test]
    fn multiline_key_is_rejected() {
        let env = environment();
        let host = FakeHost::default();
        let remote = Remote::new(&host, "deployer@stage");

        let result = Provisioner::new(&remote, &env).authorize_key("eventex", "ssh-rsa A\nssh-rsa B");
        assert!(matches!(result, Err(ProvisionError::InvalidKey)));
        assert!(host.commands().is_empty());
    }
}
