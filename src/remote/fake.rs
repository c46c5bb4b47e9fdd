// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! In-memory remote host for tests.
//!
//! Interprets the small command vocabulary rollout issues against a fake
//! filesystem, and records every command so tests can assert on ordering.

use crate::remote::{ExecOptions, Output, RemoteExecutor, Result, ShellCommand, SyncDirection};

use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

#[derive(Debug, Default)]
struct State {
    files: BTreeMap<String, String>,
    dirs: BTreeSet<String>,
    links: BTreeMap<String, String>,
    users: BTreeSet<String>,
    commands: Vec<(String, Option<String>)>,
    uploads: Vec<(PathBuf, PathBuf)>,
    syncs: Vec<(PathBuf, PathBuf, SyncDirection, bool)>,
    failing: Vec<String>,
    temp_files: usize,
}

#[derive(Debug, Default)]
pub(crate) struct FakeHost {
    state: RefCell<State>,
}

impl FakeHost {
    pub(crate) fn put_file(&self, path: &str, content: &str) {
        let mut state = self.state.borrow_mut();
        add_parents(&mut state.dirs, path);
        state.files.insert(path.into(), content.into());
    }

    pub(crate) fn put_dir(&self, path: &str) {
        let mut state = self.state.borrow_mut();
        add_parents(&mut state.dirs, path);
        state.dirs.insert(path.into());
    }

    pub(crate) fn put_user(&self, name: &str) {
        self.state.borrow_mut().users.insert(name.into());
    }

    /// Make every command running target program fail.
    pub(crate) fn fail_program(&self, program: &str) {
        self.state.borrow_mut().failing.push(program.into());
    }

    pub(crate) fn file(&self, path: &str) -> Option<String> {
        self.state.borrow().files.get(path).cloned()
    }

    /// Files at any depth below target directory.
    pub(crate) fn files_under(&self, dir: &str) -> Vec<String> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.state
            .borrow()
            .files
            .keys()
            .filter(|path| path.starts_with(&prefix))
            .cloned()
            .collect()
    }

    pub(crate) fn has_dir(&self, path: &str) -> bool {
        self.state.borrow().dirs.contains(path)
    }

    pub(crate) fn link(&self, path: &str) -> Option<String> {
        self.state.borrow().links.get(path).cloned()
    }

    pub(crate) fn has_user(&self, name: &str) -> bool {
        self.state.borrow().users.contains(name)
    }

    /// Rendered commands in issue order.
    pub(crate) fn commands(&self) -> Vec<String> {
        self.state
            .borrow()
            .commands
            .iter()
            .map(|(cmd, _)| cmd.clone())
            .collect()
    }

    /// Rendered commands that ran through sudo as target user.
    pub(crate) fn commands_as(&self, user: &str) -> Vec<String> {
        self.state
            .borrow()
            .commands
            .iter()
            .filter(|(_, as_user)| as_user.as_deref() == Some(user))
            .map(|(cmd, _)| cmd.clone())
            .collect()
    }

    pub(crate) fn uploads(&self) -> Vec<(PathBuf, PathBuf)> {
        self.state.borrow().uploads.clone()
    }

    pub(crate) fn syncs(&self) -> Vec<(PathBuf, PathBuf, SyncDirection, bool)> {
        self.state.borrow().syncs.clone()
    }

    fn interpret(&self, command: &ShellCommand) -> Output {
        let mut state = self.state.borrow_mut();
        if state.failing.iter().any(|p| p == command.program()) {
            return Output::failure(1, format!("{}: simulated failure", command.program()));
        }

        let args = command.arguments();
        let operands: Vec<&str> = args
            .iter()
            .map(String::as_str)
            .filter(|arg| !arg.starts_with('-'))
            .collect();
        let last = operands.last().copied().unwrap_or_default();

        match command.program() {
            "test" => {
                let exists = match args.first().map(String::as_str) {
                    Some("-d") => {
                        state.dirs.contains(last)
                            || state
                                .links
                                .get(last)
                                .is_some_and(|target| state.dirs.contains(target))
                    }
                    Some("-f") => state.files.contains_key(last),
                    _ => {
                        state.files.contains_key(last)
                            || state.dirs.contains(last)
                            || state.links.contains_key(last)
                    }
                };
                status(exists)
            }
            "cat" => match state.files.get(last) {
                Some(content) => Output::success(content.clone()),
                None => Output::failure(1, format!("cat: {last}: No such file or directory")),
            },
            "readlink" => match state.links.get(last) {
                Some(target) => Output::success(format!("{target}\n")),
                None => Output::failure(1, ""),
            },
            "ln" => {
                let target = operands[0].to_string();
                state.links.insert(last.into(), target);
                Output::success("")
            }
            "mv" => {
                let from = operands[0].to_string();
                if let Some(target) = state.links.remove(&from) {
                    state.links.insert(last.into(), target);
                } else if let Some(content) = state.files.remove(&from) {
                    state.files.insert(last.into(), content);
                } else {
                    return Output::failure(1, format!("mv: cannot stat {from}"));
                }
                Output::success("")
            }
            "mkdir" => {
                let parents = args.iter().any(|arg| arg == "-p");
                for dir in operands.iter().filter(|op| op.starts_with('/')) {
                    if !parents && state.dirs.contains(*dir) {
                        return Output::failure(1, format!("mkdir: {dir}: File exists"));
                    }
                    add_parents(&mut state.dirs, dir);
                    state.dirs.insert((*dir).into());
                }
                Output::success("")
            }
            "install" => {
                if args.iter().any(|arg| arg == "-d") {
                    add_parents(&mut state.dirs, last);
                    state.dirs.insert(last.into());
                } else {
                    state.files.entry(last.into()).or_default();
                }
                Output::success("")
            }
            "mktemp" => {
                let dir = if args.iter().any(|arg| arg == "-p") {
                    operands.first().copied().unwrap_or("/tmp")
                } else {
                    "/tmp"
                };
                state.temp_files += 1;
                let path = format!("{dir}/tmp.rollout{}", state.temp_files);
                state.files.insert(path.clone(), String::new());
                Output::success(format!("{path}\n"))
            }
            "cp" => match state.files.get(operands[0]).cloned() {
                Some(content) => {
                    state.files.insert(last.into(), content);
                    Output::success("")
                }
                None => Output::failure(1, format!("cp: cannot stat {}", operands[0])),
            },
            "touch" => {
                state.files.entry(last.into()).or_default();
                Output::success("")
            }
            "rm" => {
                let prefix = format!("{last}/");
                state.files.retain(|path, _| path != last && !path.starts_with(&prefix));
                state.dirs.retain(|path| path != last && !path.starts_with(&prefix));
                state.links.remove(last);
                Output::success("")
            }
            "id" => status(state.users.contains(last)),
            "useradd" => {
                state.users.insert(last.into());
                state.dirs.insert(format!("/home/{last}"));
                Output::success("")
            }
            "userdel" => {
                state.users.remove(last);
                Output::success("")
            }
            "openssl" => Output::success("0123456789abcdef0123456789abcdef\n"),
            "ls" => {
                let prefix = format!("{last}/");
                let mut names: BTreeSet<String> = BTreeSet::new();
                let children = state
                    .dirs
                    .iter()
                    .chain(state.files.keys())
                    .chain(state.links.keys());
                for path in children {
                    if let Some(rest) = path.strip_prefix(&prefix) {
                        if let Some(name) = rest.split('/').next() {
                            names.insert(name.into());
                        }
                    }
                }
                let mut out = String::new();
                for name in names {
                    out.push_str(&name);
                    out.push('\n');
                }
                Output::success(out)
            }
            _ => Output::success(""),
        }
    }
}

impl RemoteExecutor for FakeHost {
    fn execute(&self, host: &str, command: &ShellCommand, options: &ExecOptions) -> Result<Output> {
        self.state
            .borrow_mut()
            .commands
            .push((command.to_string(), options.as_user.clone()));
        self.interpret(command).check(host, command, options)
    }

    fn transfer_to_remote(&self, _host: &str, local: &Path, remote: &Path) -> Result<PathBuf> {
        let content = std::fs::read_to_string(local).unwrap_or_default();
        let mut state = self.state.borrow_mut();
        let remote_str = remote.to_string_lossy().into_owned();
        let target = if state.dirs.contains(&remote_str) {
            let name = local
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            format!("{}/{name}", remote_str.trim_end_matches('/'))
        } else {
            remote_str
        };
        state.files.insert(target.clone(), content);
        state.uploads.push((local.to_path_buf(), PathBuf::from(&target)));

        Ok(PathBuf::from(target))
    }

    fn transfer_from_remote(&self, _host: &str, remote: &Path, local: &Path) -> Result<()> {
        let content = self
            .state
            .borrow()
            .files
            .get(remote.to_string_lossy().as_ref())
            .cloned()
            .unwrap_or_default();
        std::fs::write(local, content)?;
        Ok(())
    }

    fn sync_directory(
        &self,
        _host: &str,
        local: &Path,
        remote: &Path,
        direction: SyncDirection,
        delete: bool,
    ) -> Result<()> {
        self.state.borrow_mut().syncs.push((
            local.to_path_buf(),
            remote.to_path_buf(),
            direction,
            delete,
        ));
        Ok(())
    }
}

fn status(ok: bool) -> Output {
    if ok {
        Output::success("")
    } else {
        Output::failure(1, "")
    }
}

fn add_parents(dirs: &mut BTreeSet<String>, path: &str) {
    let mut current = Path::new(path).parent();
    while let Some(dir) = current {
        let dir_str = dir.to_string_lossy();
        if dir_str.is_empty() || dir_str == "/" {
            break;
        }
        dirs.insert(dir_str.into_owned());
        current = dir.parent();
    }
}
