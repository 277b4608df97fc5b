mod commands;
mod context;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use commands::{Cli, Commands};
use context::AppContext;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { "yads=debug" } else { "yads=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli).await {
        print_error(&err);
        std::process::exit(1);
    }
}

/// Execute a command with automatic error context
macro_rules! run_command {
    ($name:expr, $cmd:expr) => {
        $cmd.await
            .with_context(|| format!("Command '{}' failed", $name))
    };
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Completions { shell } = cli.command {
        commands::completions::run(shell);
        return Ok(());
    }

    let mut ctx = AppContext::load(cli.dry_run)?;

    match cli.command {
        Commands::Install(args) => run_command!("install", commands::stack::install(args, &ctx)),
        Commands::Uninstall => run_command!("uninstall", commands::stack::uninstall(&ctx)),
        Commands::Check(args) => run_command!("check", commands::stack::check(args)),
        Commands::Status => run_command!("status", commands::stack::status(&ctx)),
        Commands::Start => run_command!("start", commands::stack::start(&ctx)),
        Commands::Stop => run_command!("stop", commands::stack::stop(&ctx)),
        Commands::Restart(args) => run_command!("restart", commands::stack::restart(args, &ctx)),
        Commands::Config(args) => run_command!("config", commands::config::run(args, &mut ctx)),
        Commands::Domain(args) => run_command!("domain", commands::domain::run(args, &mut ctx)),
        Commands::Project(args) => run_command!("project", commands::project::run(args, &ctx)),
        Commands::Container(args) => {
            run_command!("container", commands::container::run(args, &ctx))
        }
        Commands::Db(args) => run_command!("db", commands::db::run(args, &ctx)),
        Commands::Templates(args) => {
            run_command!("templates", commands::templates::run(args, &ctx))
        }
        Commands::Completions { .. } => Ok(()),
    }
}

fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    // Print the error chain
    let mut source = err.source();
    while let Some(cause) = source {
        eprintln!("  {} {}", "Caused by:".yellow(), cause);
        source = cause.source();
    }
}
