// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use rollout::{
    config::{Environment, Manifest},
    deploy::{DeployOptions, DeployOrchestrator},
    edit::{LineEditor, RefreshPolicy},
    path::{default_manifest, default_pubkey, project_root},
    provision::{read_pubkey, Database, DatabaseEngine, Provisioner, ServerOptions},
    release::{Git2Source, MiniJinjaRenderer, ReleaseManager},
    remote::{Remote, SshExecutor},
    service::ServiceController,
};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use inquire::{Confirm, Password, Text};
use std::{
    path::{Path, PathBuf},
    process::exit,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "rollout [options] <instance> <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to project manifest.
    #[arg(short, long, value_name = "path")]
    pub manifest: Option<PathBuf>,

    /// SSH port of every host.
    #[arg(short, long, value_name = "port")]
    pub port: Option<u16>,

    /// Prompt for a sudo password instead of relying on NOPASSWD rules.
    #[arg(short = 'S', long)]
    pub ask_sudo_password: bool,

    /// Environment to act on, e.g., stage or production.
    #[arg(value_name = "instance")]
    pub instance: String,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let ctx = Context::load(&self)?;
        match self.command {
            Command::Push(opts) => run_push(&ctx, opts),
            Command::Build(opts) => run_build(&ctx, opts),
            Command::Release(opts) => run_release(&ctx, opts),
            Command::Migrate(opts) => run_maintenance(&ctx, opts, Maintenance::Migrate),
            Command::Clearcache(opts) => run_maintenance(&ctx, opts, Maintenance::Clearcache),
            Command::LoadSnippets(opts) => run_maintenance(&ctx, opts, Maintenance::LoadSnippets),
            Command::Restart => run_restart(&ctx),
            Command::Deploy(opts) => run_deploy(&ctx, opts),
            Command::Rollback(opts) => run_rollback(&ctx, opts),
            Command::Releases => run_releases(&ctx),
            Command::Logs(opts) => run_logs(&ctx, opts),
            Command::SyncMedia(opts) => run_sync_media(&ctx, opts),
            Command::Config(cmd) => run_config(&ctx, cmd),
            Command::Setup(cmd) => run_setup(&ctx, cmd),
            Command::Db(cmd) => run_db(&ctx, cmd),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Ship revision into a new release directory.
    #[command(override_usage = "rollout <instance> push <revision>")]
    Push(PushOptions),

    /// Build pushed release.
    #[command(override_usage = "rollout <instance> build <release>")]
    Build(ReleaseOptions),

    /// Point current at built release.
    #[command(override_usage = "rollout <instance> release <release>")]
    Release(ReleaseOptions),

    /// Apply database migrations.
    Migrate(MaintenanceOptions),

    /// Clear application cache.
    Clearcache(MaintenanceOptions),

    /// Load snippets fixture.
    LoadSnippets(MaintenanceOptions),

    /// Reload cron table and restart dependent services.
    Restart,

    /// Push, build, migrate, release, and restart on every host.
    #[command(override_usage = "rollout <instance> deploy [options] <revision>")]
    Deploy(DeployArgs),

    /// Point current back at an earlier release.
    Rollback(RollbackOptions),

    /// List releases of every host.
    Releases,

    /// Show the tail of the application log.
    Logs(LogsOptions),

    /// Mirror media between local package and hosts.
    SyncMedia(SyncMediaOptions),

    /// Edit persistent settings file.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Provision hosts and accounts.
    #[command(subcommand)]
    Setup(SetupCommand),

    /// Manage application database.
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PushOptions {
    /// Tag, branch, or commit to ship.
    #[arg(value_name = "revision")]
    pub revision: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ReleaseOptions {
    /// Release name or absolute release directory.
    #[arg(value_name = "release")]
    pub release: PathBuf,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct MaintenanceOptions {
    /// Release to run in instead of current.
    #[arg(value_name = "release")]
    pub release: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DeployArgs {
    /// Tag, branch, or commit to deploy.
    #[arg(value_name = "revision")]
    pub revision: String,

    /// Skip database migrations.
    #[arg(long)]
    pub no_migrate: bool,

    /// Load snippets fixture before going live.
    #[arg(short, long)]
    pub load_snippets: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RollbackOptions {
    /// Release to go back to, defaults to the one before current.
    #[arg(value_name = "release")]
    pub target: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct LogsOptions {
    /// Number of lines to show.
    #[arg(short = 'n', long, default_value_t = 100, value_name = "lines")]
    pub lines: usize,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SyncMediaOptions {
    /// Copy from hosts to local package instead.
    #[arg(short, long)]
    pub download: bool,

    /// Delete files missing on the sending side.
    #[arg(long)]
    pub delete: bool,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Show settings file.
    List,

    /// Set key, prompting for the value when omitted.
    Set {
        #[arg(value_name = "key")]
        key: String,

        #[arg(value_name = "value")]
        value: Option<String>,

        /// Do not restart services afterwards.
        #[arg(long)]
        no_restart: bool,
    },

    /// Remove key.
    Remove {
        #[arg(value_name = "key")]
        key: String,

        /// Do not restart services afterwards.
        #[arg(long)]
        no_restart: bool,
    },

    /// Download settings file into directory.
    Download {
        #[arg(value_name = "dir", default_value = ".")]
        dir: PathBuf,
    },

    /// Replace settings file with local file.
    Upload {
        #[arg(value_name = "file")]
        file: PathBuf,
    },

    /// Add basic auth user, prompting for the password.
    Htpasswd {
        #[arg(value_name = "username")]
        username: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DatabaseChoice {
    Postgres,
    Mysql,
    None,
}

impl From<DatabaseChoice> for DatabaseEngine {
    fn from(choice: DatabaseChoice) -> Self {
        match choice {
            DatabaseChoice::Postgres => Self::Postgres,
            DatabaseChoice::Mysql => Self::Mysql,
            DatabaseChoice::None => Self::None,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum SetupCommand {
    /// Set up application directories, settings, and service links.
    Application {
        /// Public key of the project user, defaults to ~/.ssh/id_rsa.pub.
        #[arg(short, long, value_name = "path")]
        pubkey: Option<PathBuf>,
    },

    /// Bootstrap fresh server.
    Server {
        #[arg(long, value_name = "name")]
        hostname: Option<String>,

        #[arg(long, value_name = "name")]
        fqdn: Option<String>,

        #[arg(long, value_name = "address")]
        email: Option<String>,

        /// Database server to install.
        #[arg(long, value_enum, default_value = "postgres")]
        database: DatabaseChoice,

        /// Also create superuser with this name.
        #[arg(long, value_name = "username")]
        superuser: Option<String>,

        /// Public key of the superuser, defaults to ~/.ssh/id_rsa.pub.
        #[arg(short, long, value_name = "path")]
        pubkey: Option<PathBuf>,
    },

    /// Create user with full sudo.
    User {
        #[arg(value_name = "username")]
        username: String,

        #[arg(short, long, value_name = "path")]
        pubkey: Option<PathBuf>,

        /// Leave password disabled.
        #[arg(long)]
        no_password: bool,
    },

    /// Create project user with scoped sudo.
    ProjectUser {
        #[arg(value_name = "username")]
        username: String,

        #[arg(short, long, value_name = "path")]
        pubkey: Option<PathBuf>,
    },

    /// Remove user, home, and sudo rule.
    RemoveUser {
        #[arg(value_name = "username")]
        username: String,
    },

    /// Authorize public key for the project user.
    AddKey {
        #[arg(value_name = "path")]
        pubkey: PathBuf,
    },

    /// Copy local file into share directory.
    SendToShare {
        #[arg(value_name = "file")]
        file: PathBuf,
    },

    /// List share directory.
    ListShare,

    /// Delete application directory.
    DeleteApp,
}

#[derive(Debug, Clone, Subcommand)]
enum DbCommand {
    /// Create database and owner with random password.
    Create {
        #[arg(long, value_name = "name")]
        dbuser: Option<String>,

        #[arg(long, value_name = "name")]
        dbname: Option<String>,
    },

    /// Drop database and owner.
    Drop {
        #[arg(long, value_name = "name")]
        dbuser: Option<String>,

        #[arg(long, value_name = "name")]
        dbname: Option<String>,
    },

    /// Download dump into directory.
    Backup {
        #[arg(value_name = "dir", default_value = ".")]
        dir: PathBuf,
    },

    /// Restore local dump.
    Restore {
        #[arg(value_name = "file")]
        file: PathBuf,
    },
}

enum Maintenance {
    Migrate,
    Clearcache,
    LoadSnippets,
}

struct Context {
    env: Environment,
    executor: SshExecutor,
    root: PathBuf,
}

impl Context {
    fn load(cli: &Cli) -> Result<Self> {
        let manifest_path = cli.manifest.clone().unwrap_or_else(default_manifest);
        let manifest = Manifest::load(&manifest_path)?;
        let root = project_root(&manifest_path);
        let mut env = manifest.environment(&cli.instance)?;
        env.templates = root.join(&env.templates);
        env.scripts = root.join(&env.scripts);

        let mut executor = SshExecutor::new();
        if let Some(port) = cli.port {
            executor = executor.with_port(port);
        }
        if cli.ask_sudo_password {
            let password = Password::new("sudo password")
                .without_confirmation()
                .prompt()?;
            executor = executor.with_sudo_password(password);
        }

        Ok(Self {
            env,
            executor,
            root,
        })
    }

    fn app(&self, host: &str) -> Remote<'_, SshExecutor> {
        Remote::new(&self.executor, self.env.destination(host))
    }

    fn admin(&self, host: &str) -> Remote<'_, SshExecutor> {
        Remote::new(&self.executor, self.env.admin_destination(host))
    }
}

fn confirm(message: &str) -> bool {
    Confirm::new(message)
        .with_default(false)
        .prompt()
        .unwrap_or(false)
}

fn pubkey(path: Option<PathBuf>) -> Result<String> {
    let path = match path {
        Some(path) => path,
        None => default_pubkey()?,
    };

    Ok(read_pubkey(&path)?)
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn run_push(ctx: &Context, opts: PushOptions) -> Result<()> {
    let source = Git2Source::open(&ctx.root)?.with_output_dir(std::env::temp_dir());
    for host in &ctx.env.hosts {
        let remote = ctx.app(host);
        let release = ReleaseManager::new(&remote, &ctx.env).push(&source, &opts.revision)?;
        println!("{host}: {}", release.display());
    }

    Ok(())
}

fn run_build(ctx: &Context, opts: ReleaseOptions) -> Result<()> {
    let renderer = MiniJinjaRenderer::new();
    for host in &ctx.env.hosts {
        let remote = ctx.app(host);
        ReleaseManager::new(&remote, &ctx.env).build(&renderer, &opts.release)?;
    }

    Ok(())
}

fn run_release(ctx: &Context, opts: ReleaseOptions) -> Result<()> {
    for host in &ctx.env.hosts {
        let remote = ctx.app(host);
        ReleaseManager::new(&remote, &ctx.env).release(&opts.release)?;
    }

    Ok(())
}

fn run_maintenance(ctx: &Context, opts: MaintenanceOptions, task: Maintenance) -> Result<()> {
    for host in &ctx.env.hosts {
        let remote = ctx.app(host);
        let manager = ReleaseManager::new(&remote, &ctx.env);
        let release = opts.release.as_deref();
        match task {
            Maintenance::Migrate => manager.migrate(release)?,
            Maintenance::Clearcache => manager.clearcache(release)?,
            Maintenance::LoadSnippets => manager.load_snippets(release)?,
        }
    }

    Ok(())
}

fn run_restart(ctx: &Context) -> Result<()> {
    for host in &ctx.env.hosts {
        let remote = ctx.app(host);
        ServiceController::new(&remote, &ctx.env).restart()?;
    }

    Ok(())
}

fn run_deploy(ctx: &Context, opts: DeployArgs) -> Result<()> {
    let source = Git2Source::open(&ctx.root)?.with_output_dir(std::env::temp_dir());
    let options = DeployOptions {
        migrate: !opts.no_migrate,
        load_snippets: opts.load_snippets,
    };

    let releases = DeployOrchestrator::new(&ctx.executor, &ctx.env).deploy(
        &source,
        &MiniJinjaRenderer::new(),
        &opts.revision,
        options,
    )?;
    info!("deployed {} to {} host(s)", opts.revision, releases.len());

    Ok(())
}

fn run_rollback(ctx: &Context, opts: RollbackOptions) -> Result<()> {
    DeployOrchestrator::new(&ctx.executor, &ctx.env).rollback(opts.target.as_deref())?;
    Ok(())
}

fn run_releases(ctx: &Context) -> Result<()> {
    for host in &ctx.env.hosts {
        let remote = ctx.app(host);
        let listing = ReleaseManager::new(&remote, &ctx.env).releases()?;
        println!("{host}:");
        for release in &listing.releases {
            let marker = if listing.current.as_ref() == Some(release) {
                "*"
            } else {
                " "
            };
            println!("  {marker} {release}");
        }
    }

    Ok(())
}

fn run_logs(ctx: &Context, opts: LogsOptions) -> Result<()> {
    for host in &ctx.env.hosts {
        let remote = ctx.admin(host);
        let output = ServiceController::new(&remote, &ctx.env).logs(opts.lines)?;
        println!("==> {host} <==");
        print!("{output}");
    }

    Ok(())
}

fn run_sync_media(ctx: &Context, opts: SyncMediaOptions) -> Result<()> {
    DeployOrchestrator::new(&ctx.executor, &ctx.env).sync_media(
        &ctx.root,
        !opts.download,
        opts.delete,
    )?;
    Ok(())
}

fn run_config(ctx: &Context, cmd: ConfigCommand) -> Result<()> {
    if let ConfigCommand::Htpasswd { username } = &cmd {
        let password = Password::new(&format!("{username}'s password")).prompt()?;
        for host in &ctx.env.hosts {
            let remote = ctx.admin(host);
            Provisioner::new(&remote, &ctx.env).add_htpasswd_user(username, &password)?;
        }
        return Ok(());
    }

    let value = match &cmd {
        ConfigCommand::Set {
            key, value: None, ..
        } => Some(Text::new(&format!("{}:", key.to_uppercase())).prompt()?),
        ConfigCommand::Set { value, .. } => value.clone(),
        _ => None,
    };

    for host in &ctx.env.hosts {
        let remote = ctx.app(host);
        let services = ServiceController::new(&remote, &ctx.env);
        let editor = LineEditor::new(&remote, &ctx.env.settings).with_refresh(&services);

        match &cmd {
            ConfigCommand::List => {
                println!("==> {host} <==");
                print!("{}", editor.list()?);
            }
            ConfigCommand::Set {
                key, no_restart, ..
            } => {
                let value = value.as_deref().unwrap_or_default();
                editor.set_with(key, value, refresh_policy(*no_restart))?;
            }
            ConfigCommand::Remove { key, no_restart } => {
                if editor.remove_with(key, refresh_policy(*no_restart))? == 0 {
                    warn!("[{host}] no setting named {key:?}");
                }
            }
            ConfigCommand::Download { dir } => {
                let local = dir.join(host);
                mkdirp::mkdirp(&local)?;
                let path = editor.download(&local)?;
                info!("[{host}] saved {}", path.display());
            }
            ConfigCommand::Upload { file } => editor.upload(file)?,
            ConfigCommand::Htpasswd { .. } => {}
        }
    }

    Ok(())
}

fn refresh_policy(no_restart: bool) -> RefreshPolicy {
    if no_restart {
        RefreshPolicy::Suppress
    } else {
        RefreshPolicy::Refresh
    }
}

fn run_setup(ctx: &Context, cmd: SetupCommand) -> Result<()> {
    match cmd {
        SetupCommand::Application { pubkey: key } => {
            let key = pubkey(key)?;
            for host in &ctx.env.hosts {
                let remote = ctx.admin(host);
                Provisioner::new(&remote, &ctx.env).application(&key, |app| {
                    confirm(&format!("Rebuild application at {}?", app.display()))
                })?;
            }
        }
        SetupCommand::Server {
            hostname,
            fqdn,
            email,
            database,
            superuser,
            pubkey: key,
        } => {
            let options = ServerOptions {
                hostname,
                fqdn,
                email,
                database: database.into(),
            };
            let superuser = match superuser {
                Some(name) => Some((name, pubkey(key)?)),
                None => None,
            };
            for host in &ctx.env.hosts {
                let remote = Remote::new(&ctx.executor, format!("root@{host}"));
                let provisioner = Provisioner::new(&remote, &ctx.env);
                provisioner.server(host, &options)?;
                if let Some((name, key)) = &superuser {
                    let password = Password::new(&format!("{name}'s password")).prompt()?;
                    provisioner.create_user(name, key, Some(&password))?;
                }
            }
        }
        SetupCommand::User {
            username,
            pubkey: key,
            no_password,
        } => {
            let key = pubkey(key)?;
            let password = if no_password {
                None
            } else {
                Some(Password::new(&format!("{username}'s password")).prompt()?)
            };
            for host in &ctx.env.hosts {
                let remote = ctx.admin(host);
                Provisioner::new(&remote, &ctx.env).create_user(
                    &username,
                    &key,
                    password.as_deref(),
                )?;
            }
        }
        SetupCommand::ProjectUser {
            username,
            pubkey: key,
        } => {
            let key = pubkey(key)?;
            for host in &ctx.env.hosts {
                let remote = ctx.admin(host);
                Provisioner::new(&remote, &ctx.env).create_project_user(&username, &key)?;
            }
        }
        SetupCommand::RemoveUser { username } => {
            for host in &ctx.env.hosts {
                let remote = ctx.admin(host);
                Provisioner::new(&remote, &ctx.env).remove_user(&username)?;
            }
        }
        SetupCommand::AddKey { pubkey: key } => {
            let key = read_pubkey(&key)?;
            for host in &ctx.env.hosts {
                let remote = ctx.admin(host);
                Provisioner::new(&remote, &ctx.env).add_key(&key)?;
            }
        }
        SetupCommand::SendToShare { file } => {
            for host in &ctx.env.hosts {
                let remote = ctx.admin(host);
                Provisioner::new(&remote, &ctx.env).send_to_share(&file, |path| {
                    confirm(&format!("Overwrite {} on {host}?", path.display()))
                })?;
            }
        }
        SetupCommand::ListShare => {
            for host in &ctx.env.hosts {
                let remote = ctx.admin(host);
                println!("==> {host} <==");
                print!("{}", Provisioner::new(&remote, &ctx.env).list_share()?);
            }
        }
        SetupCommand::DeleteApp => {
            for host in &ctx.env.hosts {
                let remote = ctx.admin(host);
                Provisioner::new(&remote, &ctx.env).delete_app(|app| {
                    confirm(&format!("Do you want to DELETE the app at {} on {host}?", app.display()))
                })?;
            }
        }
    }

    Ok(())
}

fn run_db(ctx: &Context, cmd: DbCommand) -> Result<()> {
    for host in &ctx.env.hosts {
        match &cmd {
            DbCommand::Create { dbuser, dbname } => {
                let remote = ctx.admin(host);
                let url = Database::new(&remote, &ctx.env)
                    .create(dbuser.as_deref(), dbname.as_deref())?;
                println!("{host}: DATABASE_URL={url}");
            }
            DbCommand::Drop { dbuser, dbname } => {
                let remote = ctx.admin(host);
                Database::new(&remote, &ctx.env).drop(dbuser.as_deref(), dbname.as_deref())?;
            }
            DbCommand::Backup { dir } => {
                let remote = ctx.app(host);
                let local = Database::new(&remote, &ctx.env).backup(dir, None, None)?;
                info!("[{host}] dump saved to {}", local.display());
            }
            DbCommand::Restore { file } => {
                let remote = ctx.app(host);
                restore(&remote, &ctx.env, file)?;
            }
        }
    }

    Ok(())
}

fn restore(remote: &Remote<'_, SshExecutor>, env: &Environment, file: &Path) -> Result<()> {
    if !confirm(&format!(
        "Restore {} into {} on {}?",
        file.display(),
        env.appname,
        remote.destination()
    )) {
        warn!("restore skipped");
        return Ok(());
    }

    Database::new(remote, env).restore(file, None, None)?;
    Ok(())
}
