// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Host template rendering.
//!
//! Files under the project's template directory (nginx vhosts, supervisor
//! programs, cron tables, and so on) are rendered against the
//! [`Environment`] and shipped into every release under `host/`.

use crate::config::Environment;

use minijinja::UndefinedBehavior;
use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
};

/// Renders one template file against an environment.
pub trait TemplateRenderer {
    fn render(&self, template: &Path, context: &Environment) -> Result<String>;
}

/// Jinja style renderer.
///
/// Referencing a variable the environment does not define is an error, not
/// an empty string.
#[derive(Debug)]
pub struct MiniJinjaRenderer {
    env: minijinja::Environment<'static>,
}

impl MiniJinjaRenderer {
    pub fn new() -> Self {
        let mut env = minijinja::Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        Self { env }
    }
}

impl Default for MiniJinjaRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer for MiniJinjaRenderer {
    fn render(&self, template: &Path, context: &Environment) -> Result<String> {
        let source = read_to_string(template).map_err(|err| TemplateError::Read {
            source: err,
            path: template.to_path_buf(),
        })?;

        self.env
            .render_str(&source, context)
            .map_err(|err| TemplateError::Render {
                source: err,
                path: template.to_path_buf(),
            })
    }
}

/// List template files in directory, sorted by name.
///
/// # Errors
///
/// - Return [`TemplateError::MissingDir`] if the directory does not exist.
/// - Return [`TemplateError::Pattern`] if the directory path is not a valid
///   glob prefix.
/// - Return [`TemplateError::Glob`] if a directory entry cannot be read.
pub fn host_templates(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(TemplateError::MissingDir { path: dir.to_path_buf() });
    }

    let pattern = dir.join("*");
    let mut templates = Vec::new();
    for entry in glob::glob(&pattern.to_string_lossy())? {
        let path = entry?;
        if path.is_file() {
            templates.push(path);
        }
    }
    templates.sort();

    Ok(templates)
}

/// Template error types.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to read template {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("failed to render template {:?}", path.display())]
    Render {
        #[source]
        source: minijinja::Error,
        path: PathBuf,
    },

    #[error("template directory {:?} does not exist", path.display())]
    MissingDir { path: PathBuf },

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    #[error(transparent)]
    Glob(#[from] glob::GlobError),
}

/// Friendly result alias :3
pub type Result<T, E = TemplateError> = std::result::Result<T, E>;
