use super::{DbArgs, DbCommands};
use crate::context::AppContext;
use colored::Colorize;
use yads_core::config::InstallMode;
use yads_core::{DatabaseManager, DbKind, DbTarget, Settings};

fn resolve_kind(arg: Option<String>, settings: &Settings) -> anyhow::Result<DbKind> {
    Ok(match arg {
        Some(value) => value.parse()?,
        None => DbKind::from_settings(settings)?,
    })
}

pub async fn run(args: DbArgs, ctx: &AppContext) -> anyhow::Result<()> {
    let compose;
    let target = match ctx.settings.install_mode()? {
        InstallMode::Docker => {
            compose = ctx.compose();
            DbTarget::Container(&compose)
        }
        InstallMode::Native => DbTarget::Host,
    };
    let manager = DatabaseManager::new(ctx.runner(), target, &ctx.settings);

    match args.command {
        DbCommands::Create { name, kind: k } => {
            let kind = resolve_kind(k, &ctx.settings)?;
            manager.create(&name, kind)?;
            println!("{} Created {} database {}", "✓".green(), kind, name.bold());
        }
        DbCommands::Drop { name, kind: k } => {
            let kind = resolve_kind(k, &ctx.settings)?;
            manager.drop(&name, kind)?;
            println!("{} Dropped {} database {}", "✓".green(), kind, name.bold());
        }
        DbCommands::List { kind: k } => {
            let kind = resolve_kind(k, &ctx.settings)?;
            let databases = manager.list(kind)?;
            if databases.is_empty() {
                println!("No {} databases found", kind);
                return Ok(());
            }
            println!("{}", format!("{} databases:", kind).bold());
            println!();
            for db in databases {
                println!("  {} {}", "●".cyan(), db);
            }
        }
        DbCommands::Backup {
            name,
            file,
            kind: k,
        } => {
            let kind = resolve_kind(k, &ctx.settings)?;
            manager.backup(&name, &file, kind)?;
            println!(
                "{} {} backed up to {}",
                "✓".green(),
                name.bold(),
                file.display()
            );
        }
        DbCommands::Restore {
            name,
            file,
            kind: k,
        } => {
            let kind = resolve_kind(k, &ctx.settings)?;
            manager.restore(&name, &file, kind)?;
            println!(
                "{} {} restored from {}",
                "✓".green(),
                name.bold(),
                file.display()
            );
        }
    }
    Ok(())
}
