pub mod completions;
pub mod config;
pub mod container;
pub mod db;
pub mod domain;
pub mod project;
pub mod stack;
pub mod templates;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "yads")]
#[command(author, version, about = "Yet Another Development Server", long_about = None)]
pub struct Cli {
    /// Print external commands instead of running them
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install the development stack
    Install(InstallArgs),

    /// Remove the packages a native install added
    Uninstall,

    /// Report which external tools are available
    Check(CheckArgs),

    /// Show the state of the stack services
    Status,

    /// Start the stack
    Start,

    /// Stop the stack
    Stop,

    /// Restart the stack or a single service
    Restart(RestartArgs),

    /// Read and write settings
    Config(ConfigArgs),

    /// Domains, certificates and tunnel routing
    Domain(DomainArgs),

    /// Create and manage projects
    Project(ProjectArgs),

    /// Container monitoring, scaling and backups
    Container(ContainerArgs),

    /// Database helpers
    Db(DbArgs),

    /// Remote project templates
    Templates(TemplatesArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct InstallArgs {
    /// Run the stack through Docker Compose instead of host packages
    #[arg(long)]
    pub docker: bool,
}

#[derive(Parser)]
pub struct CheckArgs {
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct RestartArgs {
    /// Service to restart (empty = whole stack)
    pub service: Option<String>,
}

#[derive(Parser)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// List effective settings, defaults included
    List,
    /// Print one setting
    Get { key: String },
    /// Store a setting
    Set { key: String, value: String },
    /// Remove a stored setting
    Unset { key: String },
    /// Print the config file location
    Path,
}

#[derive(Parser)]
pub struct DomainArgs {
    #[command(subcommand)]
    pub command: DomainCommands,
}

#[derive(Subcommand)]
pub enum DomainCommands {
    /// Set the base domain projects are served under
    Setup { domain: String },
    /// Issue a TLS certificate for a host
    Ssl {
        host: String,

        /// Registration email (defaults to SSL_EMAIL)
        #[arg(long)]
        email: Option<String>,
    },
    /// Route a host through the cloudflared tunnel
    Tunnel {
        host: String,

        /// Tunnel name (defaults to TUNNEL_NAME)
        #[arg(long)]
        tunnel: Option<String>,
    },
    /// Map enabled project hosts to 127.0.0.1 in /etc/hosts
    Hosts {
        /// Hosts file to manage instead of /etc/hosts
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[derive(Parser)]
pub struct ProjectArgs {
    #[command(subcommand)]
    pub command: ProjectCommands,
}

#[derive(Subcommand)]
pub enum ProjectCommands {
    /// Scaffold a new project
    Create(ProjectCreateArgs),
    /// List projects
    List,
    /// Enable a disabled project
    Enable { name: String },
    /// Disable a project without deleting it
    Disable { name: String },
    /// Delete a project
    Remove {
        name: String,

        /// Also remove the project's virtual host
        #[arg(long)]
        vhost: bool,
    },
    /// Show a project's location and environment
    Info { name: String },
}

#[derive(Parser)]
pub struct ProjectCreateArgs {
    /// Project name
    pub name: String,

    /// Project type (php, laravel, wordpress, node, python, static) or a
    /// cached remote template name
    #[arg(default_value = "php")]
    pub project_type: String,

    /// Skip composer/npm/pip dependency installation
    #[arg(long)]
    pub no_deps: bool,

    /// Also write and enable a virtual host (native mode)
    #[arg(long)]
    pub vhost: bool,
}

#[derive(Parser)]
pub struct ContainerArgs {
    #[command(subcommand)]
    pub command: ContainerCommands,
}

#[derive(Subcommand)]
pub enum ContainerCommands {
    /// Resource usage per container
    Monitor {
        /// Refresh every N seconds until interrupted
        #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
        watch: Option<u64>,
    },
    /// Containers of the stack
    Ps,
    /// Set the replica count of a service
    Scale { service: String, replicas: u32 },
    /// Scale services by CPU usage
    AutoScale(AutoScaleArgs),
    /// Container health and an HTTP probe of the web endpoint
    Health {
        /// URL to probe (defaults to http://localhost)
        #[arg(long)]
        url: Option<String>,
    },
    /// Archive a volume
    Backup {
        volume: String,

        /// Destination directory (defaults to ~/.yads/backups)
        dir: Option<PathBuf>,
    },
    /// Archive every volume of the stack
    BackupAll {
        /// Destination directory (defaults to ~/.yads/backups)
        dir: Option<PathBuf>,
    },
    /// Restore a volume from an archive
    Restore { volume: String, archive: PathBuf },
    /// Show service logs
    Logs {
        service: String,

        #[arg(short, long)]
        follow: bool,

        /// Number of lines from the end
        #[arg(long)]
        tail: Option<u32>,
    },
    /// Restart one service
    Restart { service: String },
    /// Prune stopped containers, dangling images and unused networks
    Cleanup,
}

#[derive(Parser)]
pub struct AutoScaleArgs {
    /// Services eligible for scaling
    #[arg(short, long, default_value = "php", value_delimiter = ',')]
    pub services: Vec<String>,

    /// Scale up above this average CPU percentage
    #[arg(long, default_value_t = 80.0)]
    pub up: f64,

    /// Scale down below this average CPU percentage
    #[arg(long, default_value_t = 20.0)]
    pub down: f64,

    #[arg(long, default_value_t = 1)]
    pub min: u32,

    #[arg(long, default_value_t = 5)]
    pub max: u32,

    /// Repeat every N seconds until interrupted
    #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
    pub watch: Option<u64>,
}

#[derive(Parser)]
pub struct DbArgs {
    #[command(subcommand)]
    pub command: DbCommands,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Create a database
    Create {
        name: String,
        /// mysql or postgresql (defaults to DATABASE)
        kind: Option<String>,
    },
    /// Drop a database
    Drop { name: String, kind: Option<String> },
    /// List databases
    List { kind: Option<String> },
    /// Dump a database into a file
    Backup {
        name: String,
        file: PathBuf,
        kind: Option<String>,
    },
    /// Load a dump file into a database
    Restore {
        name: String,
        file: PathBuf,
        kind: Option<String>,
    },
}

#[derive(Parser)]
pub struct TemplatesArgs {
    #[command(subcommand)]
    pub command: TemplatesCommands,
}

#[derive(Subcommand)]
pub enum TemplatesCommands {
    /// Built-in project types and cached remote templates
    List,
    /// Clone or update the remote template repository
    Update {
        /// Branch to check out
        #[arg(long)]
        branch: Option<String>,
    },
}
