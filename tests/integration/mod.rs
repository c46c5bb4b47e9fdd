// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::RepoFixture;

use anyhow::Result;
use indoc::indoc;
use pretty_assertions::assert_eq;
use rollout::{
    config::{ConfigError, Manifest},
    path::project_root,
    release::{Git2Source, Snapshot, SourceControl, SourceError},
};
use std::{fs::write, path::PathBuf, process::Command};

#[test]
fn resolve_tag_and_branch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let project = RepoFixture::new(dir.path())?;
    let first = project.commit_file("manage.py", "print('v1')\n")?;
    project.tag("v1.0", first)?;
    let second = project.commit_file("manage.py", "print('v2')\n")?;

    let source = Git2Source::open(dir.path())?;
    let tagged = source.resolve_revision("v1.0")?;
    assert_eq!(tagged.revision, "v1.0");
    assert_eq!(tagged.commit, first.to_string());

    let branch = source.resolve_revision("main")?;
    assert_eq!(branch.commit, second.to_string());

    let short = source.resolve_revision(&second.to_string()[..10])?;
    assert_eq!(short.commit, second.to_string());

    Ok(())
}

#[test]
fn resolve_missing_revision() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let project = RepoFixture::new(dir.path())?;
    project.commit_file("manage.py", "")?;

    let result = Git2Source::open(dir.path())?.resolve_revision("v9.9");
    assert!(matches!(result, Err(SourceError::Resolve { .. })));

    Ok(())
}

#[test]
fn package_tagged_snapshot() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    let project = RepoFixture::new(dir.path())?;
    let first = project.commit_file("manage.py", "print('v1')\n")?;
    project.tag("v1.0", first)?;

    let source = Git2Source::open(dir.path())?.with_output_dir(out.path());
    let snapshot = source.resolve_revision("v1.0")?;
    let archive = source.package_snapshot(&snapshot)?;
    assert_eq!(archive, out.path().join(format!("{first}.tar.gz")));
    assert!(archive.metadata()?.len() > 0);

    let listing = Command::new("tar").arg("-tzf").arg(&archive).output()?;
    assert!(listing.status.success());
    let files = String::from_utf8_lossy(&listing.stdout);
    assert!(files.lines().any(|line| line == "manage.py"), "{files}");

    Ok(())
}

#[test]
fn package_unknown_commit() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    let project = RepoFixture::new(dir.path())?;
    project.commit_file("manage.py", "")?;

    let snapshot = Snapshot {
        revision: "bogus".into(),
        commit: "0".repeat(40),
    };
    let result = Git2Source::open(dir.path())?
        .with_output_dir(out.path())
        .package_snapshot(&snapshot);
    assert!(matches!(result, Err(SourceError::Package(_))));

    Ok(())
}

#[test]
fn open_outside_repository() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let result = Git2Source::open(dir.path().join("nowhere"));
    assert!(matches!(result, Err(SourceError::Open { .. })));

    Ok(())
}

#[test]
fn load_manifest_from_project() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let manifest_path = dir.path().join("rollout.toml");
    write(
        &manifest_path,
        indoc! {r#"
            [project]
            name = "eventex"
            admin = "deployer"

            [environment.production]
            hosts = ["eventex.com.br"]
        "#},
    )?;

    let manifest = Manifest::load(&manifest_path)?;
    let env = manifest.environment("production")?;
    assert_eq!(env.hosts, ["eventex.com.br"]);
    assert_eq!(env.destination("eventex.com.br"), "eventex@eventex.com.br");
    assert_eq!(env.current, PathBuf::from("/home/eventex/production/releases/current"));
    assert_eq!(project_root(&manifest_path), dir.path());

    let result = manifest.environment("stage");
    assert!(matches!(result, Err(ConfigError::UnknownEnvironment { .. })));

    Ok(())
}

#[test]
fn load_missing_manifest() {
    let result = Manifest::load("/nonexistent/rollout.toml");
    assert!(matches!(result, Err(ConfigError::Read { .. })));
}
