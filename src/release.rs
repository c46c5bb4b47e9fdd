// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Release management.
//!
//! A __release__ is one immutable directory under `<app>/releases`, named by
//! the time it was pushed. Its life runs in three steps: [`push`] unpacks a
//! source snapshot into a fresh directory, [`build`] prepares it to run
//! (host files, virtualenv, static assets), and [`release`] flips the
//! `current` pointer to it. Earlier releases are never touched, which is
//! what makes [`rollback`] a plain pointer flip.
//!
//! [`push`]: ReleaseManager::push
//! [`build`]: ReleaseManager::build
//! [`release`]: ReleaseManager::release
//! [`rollback`]: ReleaseManager::rollback

pub mod source;
pub mod template;

pub use source::{Git2Source, Snapshot, SourceControl, SourceError};
pub use template::{host_templates, MiniJinjaRenderer, TemplateError, TemplateRenderer};

use crate::{
    config::Environment,
    remote::{ExecOptions, Remote, RemoteError, RemoteExecutor, ShellCommand},
};

use chrono::{DateTime, Utc};
use std::{
    fmt,
    path::{Component, Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Marker file written once a release finished building.
pub const BUILT_MARKER: &str = ".built";

const RELEASE_ID_FORMAT: &str = "%Y%m%d%H%M%S";
const MAX_ID_ATTEMPTS: usize = 100;

/// Name of a release directory.
///
/// Second resolution timestamp, with a `-<n>` suffix when two pushes land in
/// the same second. Lexical order is chronological order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReleaseId(String);

impl ReleaseId {
    pub fn from_time(time: DateTime<Utc>) -> Self {
        Self(time.format(RELEASE_ID_FORMAT).to_string())
    }

    /// Derive collision candidate from base id.
    pub fn with_suffix(&self, attempt: usize) -> Self {
        if attempt == 0 {
            return self.clone();
        }

        Self(format!("{}-{attempt}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Releases present on a host.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReleaseListing {
    /// Release names, oldest first.
    pub releases: Vec<String>,

    /// Release the `current` pointer names.
    pub current: Option<String>,
}

/// Manages releases of one environment on one host.
pub struct ReleaseManager<'a, E>
where
    E: RemoteExecutor,
{
    remote: &'a Remote<'a, E>,
    env: &'a Environment,
    clock: fn() -> DateTime<Utc>,
}

impl<'a, E> ReleaseManager<'a, E>
where
    E: RemoteExecutor,
{
    pub fn new(remote: &'a Remote<'a, E>, env: &'a Environment) -> Self {
        Self {
            remote,
            env,
            clock: Utc::now,
        }
    }

    /// Use target clock to name new releases.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Resolve release name or path to release directory.
    ///
    /// Accepts a bare release name, or an absolute path naming a directory
    /// directly under the releases directory.
    ///
    /// # Errors
    ///
    /// - Return [`ReleaseError::UnknownRelease`] if the name escapes the
    ///   releases directory or names the `current` pointer.
    pub fn release_dir(&self, release: impl AsRef<Path>) -> Result<PathBuf> {
        let release = release.as_ref();
        let unknown = || ReleaseError::UnknownRelease {
            release: release.to_path_buf(),
        };

        let name = if release.is_absolute() {
            release
                .strip_prefix(&self.env.releases)
                .map_err(|_| unknown())?
        } else {
            release
        };

        let mut components = name.components();
        let (Some(Component::Normal(name)), None) = (components.next(), components.next()) else {
            return Err(unknown());
        };
        let name = name.to_string_lossy();
        if !is_release_name(&name) {
            return Err(unknown());
        }

        Ok(self.env.releases.join(name.as_ref()))
    }

    /// Ship revision into a new release directory.
    ///
    /// Resolves the revision, then hands off to [`push_snapshot`].
    ///
    /// [`push_snapshot`]: Self::push_snapshot
    ///
    /// # Errors
    ///
    /// - Return [`ReleaseError::Source`] if the revision cannot be resolved.
    /// - Return any error of [`push_snapshot`].
    #[instrument(skip(self, source), level = "debug")]
    pub fn push(&self, source: &dyn SourceControl, revision: &str) -> Result<PathBuf> {
        let snapshot = source.resolve_revision(revision)?;
        self.push_snapshot(source, &snapshot)
    }

    /// Ship resolved snapshot into a new release directory.
    ///
    /// The snapshot archive is staged in the environment's tmp directory,
    /// unpacked, and removed on both sides. Returns the new release
    /// directory.
    ///
    /// # Errors
    ///
    /// - Return [`ReleaseError::Source`] if the snapshot cannot be packaged.
    ///   Nothing is transferred in that case.
    /// - Return [`ReleaseError::Remote`] if transfer or unpacking fails.
    #[instrument(skip(self, source), level = "debug")]
    pub fn push_snapshot(
        &self,
        source: &dyn SourceControl,
        snapshot: &Snapshot,
    ) -> Result<PathBuf> {
        let archive = source.package_snapshot(snapshot)?;

        let staged = self.stage_archive(&archive);
        if let Err(err) = std::fs::remove_file(&archive) {
            warn!("failed to remove local archive {}: {err}", archive.display());
        }
        let staged = staged?;

        let release = self.claim_release_dir()?;
        self.remote.run(
            ShellCommand::new("tar")
                .arg("-xzf")
                .path(&staged)
                .arg("-C")
                .path(&release),
        )?;
        self.remote
            .run(ShellCommand::new("rm").arg("-f").path(&staged))?;

        info!(
            "pushed {} ({}) to {}",
            snapshot.revision,
            snapshot.commit,
            release.display()
        );
        Ok(release)
    }

    fn stage_archive(&self, archive: &Path) -> Result<PathBuf> {
        self.remote.run(
            ShellCommand::new("mkdir")
                .arg("-p")
                .path(&self.env.tmp)
                .path(&self.env.releases),
        )?;

        let name = archive
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot.tar.gz".into());
        let staged = self.env.tmp.join(name);

        Ok(self.remote.upload(archive, &staged)?)
    }

    // INVARIANT: Plain mkdir fails on existing directories, so a successful
    //            call means this push owns the directory.
    fn claim_release_dir(&self) -> Result<PathBuf> {
        let base = ReleaseId::from_time((self.clock)());
        for attempt in 0..MAX_ID_ATTEMPTS {
            let id = base.with_suffix(attempt);
            let dir = self.env.releases.join(id.as_str());
            let output = self.remote.execute(
                &ShellCommand::new("mkdir").path(&dir),
                &ExecOptions::default().warn_only(),
            )?;
            if output.succeeded() {
                return Ok(dir);
            }

            if !self.remote.exists(&dir, None)? {
                return Err(RemoteError::Command {
                    host: self.remote.destination().into(),
                    command: format!("mkdir {}", dir.display()),
                    status: output.status,
                    stderr: output.stderr.trim().into(),
                }
                .into());
            }
            debug!("release {id} taken, trying next suffix");
        }

        Err(ReleaseError::IdExhausted { base: base.0 })
    }

    /// Make release directory runnable.
    ///
    /// Every host template is rendered before anything touches the host, so
    /// a template error leaves the release exactly as [`push`] left it.
    ///
    /// [`push`]: Self::push
    ///
    /// # Errors
    ///
    /// - Return [`ReleaseError::UnknownRelease`] if the directory is missing.
    /// - Return [`ReleaseError::Template`] if the template directory is
    ///   missing or any template fails to render.
    /// - Return [`ReleaseError::Remote`] if any build step fails.
    #[instrument(skip(self, renderer), level = "debug")]
    pub fn build(&self, renderer: &dyn TemplateRenderer, release: &Path) -> Result<()> {
        let release = self.release_dir(release)?;
        if !self.remote.dir_exists(&release, None)? {
            return Err(ReleaseError::UnknownRelease { release });
        }

        let mut rendered = Vec::new();
        for template in host_templates(&self.env.templates)? {
            let content = renderer.render(&template, self.env)?;
            let name = template
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            rendered.push((name, content));
        }

        let host_dir = release.join("host");
        self.remote
            .run(ShellCommand::new("mkdir").arg("-p").path(&host_dir))?;
        for (name, content) in &rendered {
            self.remote
                .write_file(&host_dir.join(name), content, None)?;
        }
        debug!("installed {} host files", rendered.len());

        for command in self.build_steps(&release) {
            self.remote.run(command)?;
        }

        self.remote
            .run(ShellCommand::new("touch").path(release.join(BUILT_MARKER)))?;
        info!("built {}", release.display());

        Ok(())
    }

    fn build_steps(&self, release: &Path) -> Vec<ShellCommand> {
        let package = release.join(&self.env.package);
        vec![
            ShellCommand::new("ln")
                .arg("-sfn")
                .path(&self.env.settings)
                .path(package.join("settings.ini")),
            ShellCommand::new("ln")
                .arg("-sfn")
                .path(&self.env.media)
                .path(package.join("media")),
            ShellCommand::new("virtualenv")
                .arg(".")
                .current_dir(release),
            ShellCommand::new("bin/pip")
                .args(["install", "--upgrade", "pip"])
                .current_dir(release),
            ShellCommand::new("bin/pip")
                .args(["install", "-r", "requirements.txt"])
                .env("CFLAGS", "-O0")
                .current_dir(release),
            ShellCommand::new("bin/python")
                .args(["manage.py", "collectstatic", "--noinput"])
                .current_dir(release),
        ]
    }

    /// Point `current` at release.
    ///
    /// # Errors
    ///
    /// - Return [`ReleaseError::UnknownRelease`] if the directory is missing.
    /// - Return [`ReleaseError::NotBuilt`] if the release never finished
    ///   building.
    #[instrument(skip(self), level = "debug")]
    pub fn release(&self, release: &Path) -> Result<()> {
        let release = self.release_dir(release)?;
        if !self.remote.dir_exists(&release, None)? {
            return Err(ReleaseError::UnknownRelease { release });
        }

        if !self.remote.exists(&release.join(BUILT_MARKER), None)? {
            return Err(ReleaseError::NotBuilt { release });
        }

        self.remote.symlink(&release, &self.env.current, None)?;
        info!("current -> {}", release.display());

        Ok(())
    }

    /// Apply database migrations from release, or from current.
    pub fn migrate(&self, release: Option<&Path>) -> Result<()> {
        self.manage(release, &["migrate", "--noinput"])
    }

    /// Clear application cache from release, or from current.
    pub fn clearcache(&self, release: Option<&Path>) -> Result<()> {
        self.manage(release, &["clearcache"])
    }

    /// Load snippets fixture from release, or from current.
    pub fn load_snippets(&self, release: Option<&Path>) -> Result<()> {
        self.manage(release, &["loaddata", "snippets"])
    }

    #[instrument(skip(self), level = "debug")]
    fn manage(&self, release: Option<&Path>, args: &[&str]) -> Result<()> {
        let dir = match release {
            Some(release) => self.release_dir(release)?,
            None => self.env.current.clone(),
        };
        self.remote.run(
            ShellCommand::new("bin/python")
                .arg("manage.py")
                .args(args.iter().copied())
                .current_dir(&dir),
        )?;

        Ok(())
    }

    /// List releases and the one currently live.
    pub fn releases(&self) -> Result<ReleaseListing> {
        let output = self.remote.execute(
            &ShellCommand::new("ls").arg("-1").path(&self.env.releases),
            &ExecOptions::default().warn_only(),
        )?;

        let mut releases: Vec<String> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .filter(|name| is_release_name(name))
            .map(Into::into)
            .collect();
        releases.sort();

        let current = self.remote.readlink(&self.env.current)?.and_then(|target| {
            target
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        });

        Ok(ReleaseListing { releases, current })
    }

    /// Point `current` back at an earlier release.
    ///
    /// Without a target, the release just before the current one is chosen.
    /// Returns the release directory now live.
    ///
    /// # Errors
    ///
    /// - Return [`ReleaseError::NoPreviousRelease`] if no target was given and
    ///   the current release is the oldest one.
    /// - Return [`ReleaseError::NotBuilt`] if the target never finished
    ///   building.
    #[instrument(skip(self), level = "debug")]
    pub fn rollback(&self, target: Option<&str>) -> Result<PathBuf> {
        let target = match target {
            Some(target) => target.to_string(),
            None => {
                let listing = self.releases()?;
                let current = listing
                    .current
                    .as_deref()
                    .ok_or(ReleaseError::NoPreviousRelease)?;
                let position = listing
                    .releases
                    .iter()
                    .position(|name| name == current)
                    .ok_or(ReleaseError::NoPreviousRelease)?;
                if position == 0 {
                    return Err(ReleaseError::NoPreviousRelease);
                }
                listing.releases[position - 1].clone()
            }
        };

        let release = self.release_dir(&target)?;
        self.release(&release)?;

        Ok(release)
    }
}

// INVARIANT: The `current` pointer and its `.next` staging link share the
//            releases directory but are never releases themselves.
fn is_release_name(name: &str) -> bool {
    name != "current" && !name.ends_with(".next")
}

/// Release error types.
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Release was pushed but never finished building.
    #[error("release {:?} is not built", release.display())]
    NotBuilt { release: PathBuf },

    /// Release directory does not exist.
    #[error("release {:?} does not exist", release.display())]
    UnknownRelease { release: PathBuf },

    /// Nothing older than current to roll back to.
    #[error("no previous release to roll back to")]
    NoPreviousRelease,

    /// Every suffix for this second is taken.
    #[error("cannot allocate release directory for {base:?}")]
    IdExhausted { base: String },
}

/// Friendly result alias :3
pub type Result<T, E = ReleaseError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Manifest, remote::fake::FakeHost};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::{cell::RefCell, fs::write};
    use tempfile::TempDir;

    struct FakeSource {
        dir: TempDir,
        packaged: RefCell<Vec<String>>,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                packaged: RefCell::new(Vec::new()),
            }
        }
    }

    impl SourceControl for FakeSource {
        fn resolve_revision(&self, revision: &str) -> source::Result<Snapshot> {
            if revision == "missing" {
                return Err(SourceError::Package(std::io::Error::other("no such rev")));
            }

            Ok(Snapshot {
                revision: revision.into(),
                commit: format!("{revision}-commit"),
            })
        }

        fn package_snapshot(&self, snapshot: &Snapshot) -> source::Result<PathBuf> {
            let archive = self.dir.path().join(format!("{}.tar.gz", snapshot.commit));
            write(&archive, "tarball")?;
            self.packaged.borrow_mut().push(snapshot.commit.clone());
            Ok(archive)
        }
    }

    struct FailingRenderer;

    impl TemplateRenderer for FailingRenderer {
        fn render(&self, template: &Path, _: &Environment) -> template::Result<String> {
            Err(TemplateError::Read {
                source: std::io::Error::other("boom"),
                path: template.to_path_buf(),
            })
        }
    }

    fn environment(templates: &Path) -> Environment {
        let manifest: Manifest = format!(
            r#"
            [project]
            name = "eventex"
            admin = "deployer"
            templates = "{}"

            [environment.stage]
            hosts = ["stage.eventex.com.br"]
            "#,
            templates.display()
        )
        .parse()
        .unwrap();
        manifest.environment("stage").unwrap()
    }

    fn templates() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path().join("jobs.cron"), "# {{ appname }}\n").unwrap();
        write(dir.path().join("nginx.vhost"), "root {{ current }};\n").unwrap();
        dir
    }

    fn fixed_clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 15, 9, 26).unwrap()
    }

    #[test]
    fn release_id_format_and_suffix() {
        let id = ReleaseId::from_time(fixed_clock());
        assert_eq!(id.as_str(), "20250314150926");
        assert_eq!(id.with_suffix(0), id);
        assert_eq!(id.with_suffix(2).as_str(), "20250314150926-2");
        assert!(id < id.with_suffix(1));
    }

    #[test]
    fn push_build_release() -> anyhow::Result<()> {
        let templates = templates();
        let env = environment(templates.path());
        let host = FakeHost::default();
        let remote = Remote::new(&host, env.destination("stage.eventex.com.br"));
        let source = FakeSource::new();
        let manager = ReleaseManager::new(&remote, &env).with_clock(fixed_clock);

        let release = manager.push(&source, "v1.0")?;
        assert_eq!(
            release,
            PathBuf::from("/home/eventex/stage/releases/20250314150926")
        );
        assert!(host.has_dir("/home/eventex/stage/releases/20250314150926"));
        assert_eq!(
            host.uploads()[0].1,
            PathBuf::from("/home/eventex/stage/tmp/v1.0-commit.tar.gz")
        );
        assert_eq!(host.file("/home/eventex/stage/tmp/v1.0-commit.tar.gz"), None);
        assert!(!source.dir.path().join("v1.0-commit.tar.gz").exists());

        manager.build(&MiniJinjaRenderer::new(), &release)?;
        assert_eq!(
            host.file("/home/eventex/stage/releases/20250314150926/host/jobs.cron")
                .as_deref(),
            Some("# eventex-stage\n")
        );
        assert_eq!(
            host.link("/home/eventex/stage/releases/20250314150926/eventex/settings.ini")
                .as_deref(),
            Some("/home/eventex/stage/share/settings.ini")
        );
        assert!(host
            .commands()
            .iter()
            .any(|cmd| cmd.ends_with("CFLAGS=-O0 bin/pip install -r requirements.txt")));

        manager.release(&release)?;
        assert_eq!(
            host.link("/home/eventex/stage/releases/current").as_deref(),
            Some("/home/eventex/stage/releases/20250314150926")
        );

        Ok(())
    }

    #[test]
    fn push_same_second_gets_suffix() -> anyhow::Result<()> {
        let templates = templates();
        let env = environment(templates.path());
        let host = FakeHost::default();
        let remote = Remote::new(&host, "eventex@web");
        let source = FakeSource::new();
        let manager = ReleaseManager::new(&remote, &env).with_clock(fixed_clock);

        let first = manager.push(&source, "v1.0")?;
        let second = manager.push(&source, "v1.1")?;
        assert_ne!(first, second);
        assert_eq!(
            second,
            PathBuf::from("/home/eventex/stage/releases/20250314150926-1")
        );

        Ok(())
    }

    #[test]
    fn unresolvable_revision_transfers_nothing() {
        let templates = templates();
        let env = environment(templates.path());
        let host = FakeHost::default();
        let remote = Remote::new(&host, "eventex@web");
        let manager = ReleaseManager::new(&remote, &env);

        let result = manager.push(&FakeSource::new(), "missing");
        assert!(matches!(result, Err(ReleaseError::Source(_))));
        assert!(host.uploads().is_empty());
        assert!(host.commands().is_empty());
    }

    #[test]
    fn template_failure_leaves_release_untouched() {
        let templates = templates();
        let env = environment(templates.path());
        let host = FakeHost::default();
        host.put_dir("/home/eventex/stage/releases/20250314150926");
        let remote = Remote::new(&host, "eventex@web");
        let manager = ReleaseManager::new(&remote, &env);

        let result = manager.build(&FailingRenderer, Path::new("20250314150926"));
        assert!(matches!(result, Err(ReleaseError::Template(_))));
        assert!(host
            .link("/home/eventex/stage/releases/20250314150926/eventex/settings.ini")
            .is_none());
        assert!(host.commands().iter().all(|cmd| cmd.starts_with("test")));
    }

    #[test]
    fn missing_template_dir_fails_build() {
        let env = environment(Path::new("/nonexistent/host-templates"));
        let host = FakeHost::default();
        host.put_dir("/home/eventex/stage/releases/20250314150926");
        let remote = Remote::new(&host, "eventex@web");
        let manager = ReleaseManager::new(&remote, &env);

        let result = manager.build(&MiniJinjaRenderer::new(), Path::new("20250314150926"));
        assert!(matches!(
            result,
            Err(ReleaseError::Template(TemplateError::MissingDir { .. }))
        ));
        assert_eq!(
            host.file("/home/eventex/stage/releases/20250314150926/.built"),
            None
        );

        let result = manager.release(Path::new("20250314150926"));
        assert!(matches!(result, Err(ReleaseError::NotBuilt { .. })));
        assert!(host.link("/home/eventex/stage/releases/current").is_none());
    }

    #[test]
    fn pointer_and_escaping_names_are_refused() {
        let templates = templates();
        let env = environment(templates.path());
        let host = FakeHost::default();
        host.put_file("/home/eventex/stage/releases/20250101000000/.built", "");
        host.put_dir("/home/eventex/stage/releases/20250101000000");
        host.put_dir("/home/eventex/stage/x");
        host.put_file("/home/eventex/stage/x/.built", "");
        let remote = Remote::new(&host, "eventex@web");
        let manager = ReleaseManager::new(&remote, &env);
        manager.release(Path::new("20250101000000")).unwrap();

        for name in [
            "current",
            "current.next",
            "../x",
            "a/b",
            "/home/eventex/stage/x",
            "/home/eventex/stage/releases/../x",
        ] {
            let result = manager.release(Path::new(name));
            assert!(
                matches!(result, Err(ReleaseError::UnknownRelease { .. })),
                "{name} was accepted"
            );
        }
        let result = manager.rollback(Some("current"));
        assert!(matches!(result, Err(ReleaseError::UnknownRelease { .. })));

        assert_eq!(
            host.link("/home/eventex/stage/releases/current").as_deref(),
            Some("/home/eventex/stage/releases/20250101000000")
        );
        assert_eq!(
            manager.release_dir("/home/eventex/stage/releases/20250101000000").unwrap(),
            PathBuf::from("/home/eventex/stage/releases/20250101000000")
        );
    }

    #[test]
    fn unbuilt_release_is_refused() {
        let templates = templates();
        let env = environment(templates.path());
        let host = FakeHost::default();
        host.put_dir("/home/eventex/stage/releases/20250314150926");
        let remote = Remote::new(&host, "eventex@web");
        let manager = ReleaseManager::new(&remote, &env);

        let result = manager.release(Path::new("20250314150926"));
        assert!(matches!(result, Err(ReleaseError::NotBuilt { .. })));
        assert!(host.link("/home/eventex/stage/releases/current").is_none());
    }

    #[test]
    fn unknown_release_is_refused() {
        let templates = templates();
        let env = environment(templates.path());
        let host = FakeHost::default();
        let remote = Remote::new(&host, "eventex@web");
        let manager = ReleaseManager::new(&remote, &env);

        let result = manager.release(Path::new("19990101000000"));
        assert!(matches!(result, Err(ReleaseError::UnknownRelease { .. })));
    }

    #[test]
    fn rollback_returns_to_previous() -> anyhow::Result<()> {
        let templates = templates();
        let env = environment(templates.path());
        let host = FakeHost::default();
        for id in ["20250101000000", "20250201000000"] {
            host.put_file(
                &format!("/home/eventex/stage/releases/{id}/{BUILT_MARKER}"),
                "",
            );
            host.put_dir(&format!("/home/eventex/stage/releases/{id}"));
        }
        let remote = Remote::new(&host, "eventex@web");
        let manager = ReleaseManager::new(&remote, &env);

        manager.release(Path::new("20250101000000"))?;
        manager.release(Path::new("20250201000000"))?;
        let listing = manager.releases()?;
        assert_eq!(listing.releases, ["20250101000000", "20250201000000"]);
        assert_eq!(listing.current.as_deref(), Some("20250201000000"));

        let live = manager.rollback(None)?;
        assert_eq!(
            live,
            PathBuf::from("/home/eventex/stage/releases/20250101000000")
        );
        assert_eq!(
            host.link("/home/eventex/stage/releases/current").as_deref(),
            Some("/home/eventex/stage/releases/20250101000000")
        );

        let result = manager.rollback(None);
        assert!(matches!(result, Err(ReleaseError::NoPreviousRelease)));

        manager.rollback(Some("20250201000000"))?;
        assert_eq!(
            manager.releases()?.current.as_deref(),
            Some("20250201000000")
        );

        Ok(())
    }

    #[test]
    fn maintenance_commands_run_in_current() -> anyhow::Result<()> {
        let templates = templates();
        let env = environment(templates.path());
        let host = FakeHost::default();
        let remote = Remote::new(&host, "eventex@web");
        let manager = ReleaseManager::new(&remote, &env);

        manager.migrate(None)?;
        manager.clearcache(None)?;
        manager.load_snippets(None)?;
        assert_eq!(
            host.commands(),
            [
                "cd /home/eventex/stage/releases/current && bin/python manage.py migrate --noinput",
                "cd /home/eventex/stage/releases/current && bin/python manage.py clearcache",
                "cd /home/eventex/stage/releases/current && bin/python manage.py loaddata snippets",
            ]
        );

        Ok(())
    }
}
