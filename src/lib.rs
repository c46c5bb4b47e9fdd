// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Release deployment and host provisioning over SSH.
//!
//! Rollout ships a revision of a web application to every host of a named
//! environment, builds it in a fresh release directory, and atomically
//! switches the live `current` pointer to it. The same tool provisions
//! hosts (accounts, directory layout, database) and edits the environment's
//! persistent `settings.ini` one key at a time.
//!
//! # Layout
//!
//! Each environment lives under its project user's home:
//!
//! ```text
//! /home/<user>
//! +---- /<instance>              (app)
//! |     +---- /releases
//! |     |     +---- /<release>
//! |     |     +---- /current -> <release>
//! |     +---- /share             (settings.ini, media, .pgpass, .htpasswd)
//! |     +---- /tmp
//! +---- /logs
//!       +---- /<instance>
//! ```
//!
//! Releases are never modified once live, so rolling back is only a matter
//! of pointing `current` somewhere else.

pub mod config;
pub mod deploy;
pub mod edit;
pub mod path;
pub mod provision;
pub mod release;
pub mod remote;
pub mod service;

pub use config::{Environment, Manifest};
pub use deploy::{DeployOptions, DeployOrchestrator};
pub use edit::{LineEditor, Refresh, RefreshPolicy};
pub use provision::Provisioner;
pub use release::ReleaseManager;
pub use remote::{Remote, RemoteExecutor, SshExecutor};
pub use service::ServiceController;
