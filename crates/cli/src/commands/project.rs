use super::{ProjectArgs, ProjectCommands, ProjectCreateArgs};
use crate::context::AppContext;
use colored::Colorize;
use std::path::Path;
use yads_core::domains::{self, Vhost};
use yads_core::os;
use yads_core::project::TemplateSource;
use yads_core::{CreateOptions, ProjectManager, Settings};

pub async fn run(args: ProjectArgs, ctx: &AppContext) -> anyhow::Result<()> {
    match args.command {
        ProjectCommands::Create(create_args) => create(create_args, ctx),
        ProjectCommands::List => list(ctx),
        ProjectCommands::Enable { name } => {
            let project = manager(ctx).enable(&name)?;
            println!("{} {} enabled", "✓".green(), project.name.bold());
            Ok(())
        }
        ProjectCommands::Disable { name } => {
            let project = manager(ctx).disable(&name)?;
            println!("{} {} disabled", "✓".green(), project.name.bold());
            Ok(())
        }
        ProjectCommands::Remove { name, vhost } => {
            let manager = manager(ctx);
            let project = manager.find(&name)?;
            if vhost {
                let host = host_for(&project.name, &ctx.settings)?;
                vhost_for(&host, &project.path, ctx)?.remove(ctx.runner())?;
            }
            manager.remove(&name)?;
            println!("{} {} removed", "✓".green(), project.name.bold());
            Ok(())
        }
        ProjectCommands::Info { name } => info(&name, ctx),
    }
}

fn manager(ctx: &AppContext) -> ProjectManager<'_> {
    ProjectManager::new(ctx.config.projects_dir(&ctx.settings), ctx.runner())
}

/// Host name a project is served under.
fn host_for(name: &str, settings: &Settings) -> anyhow::Result<String> {
    Ok(match settings.domain() {
        Some(domain) => domains::subdomain_for(name, domain)?,
        None => format!("{}.localhost", name.to_lowercase()),
    })
}

/// Native vhost for `host`, laid out for the host's distribution.
fn vhost_for<'a>(
    host: &'a str,
    root: &'a Path,
    ctx: &'a AppContext,
) -> anyhow::Result<Vhost<'a>> {
    let family = os::detect_os()?.package_manager()?;
    Ok(Vhost {
        web: ctx.settings.web_server()?,
        family,
        host,
        root,
        php_version: ctx.settings.php_version(),
    })
}

fn create(args: ProjectCreateArgs, ctx: &AppContext) -> anyhow::Result<()> {
    let options = CreateOptions {
        template: args.project_type.to_lowercase(),
        install_dependencies: !args.no_deps,
    };

    let fetcher = ctx.template_fetcher();
    let mut manager = manager(ctx);
    if let Some(fetcher) = fetcher.as_ref() {
        manager = manager.with_templates(fetcher);
    }

    println!(
        "{} Creating {} project {}...",
        "▶".blue(),
        options.template,
        args.name.bold()
    );
    let created = manager.create(&args.name, &ctx.settings, &options)?;

    match &created.source {
        TemplateSource::Remote(dir) => {
            println!("  Template: {}", dir.display().to_string().dimmed())
        }
        TemplateSource::Builtin(_) => println!("  Template: {}", "built-in".dimmed()),
    }

    if args.vhost {
        let host = host_for(&args.name, &ctx.settings)?;
        vhost_for(&host, &created.document_root, ctx)?.install(ctx.runner(), &ctx.config)?;
        println!("  Virtual host: {}", host.cyan());
    }

    println!(
        "{} {} created at {}",
        "✓".green(),
        created.project.name.bold(),
        created.project.path.display()
    );
    println!("  URL: {}", created.url.cyan());
    Ok(())
}

fn list(ctx: &AppContext) -> anyhow::Result<()> {
    let projects = manager(ctx).list()?;

    if projects.is_empty() {
        println!("No projects found");
        println!();
        println!(
            "Use {} to create one",
            "yads project create <name> [type]".cyan()
        );
        return Ok(());
    }

    println!("{}", "Projects:".bold());
    println!();
    for project in projects {
        if project.enabled {
            let url = domains::project_url(&project.name, &ctx.settings)?;
            println!("  {} {} {}", "●".green(), project.name.bold(), url.cyan());
        } else {
            println!(
                "  {} {} {}",
                "○".dimmed(),
                project.name.dimmed(),
                "(disabled)".dimmed()
            );
        }
    }
    Ok(())
}

fn info(name: &str, ctx: &AppContext) -> anyhow::Result<()> {
    let manager = manager(ctx);
    let project = manager.find(name)?;
    let env = manager.env(name)?;

    let state = if project.enabled {
        "enabled".green()
    } else {
        "disabled".yellow()
    };
    println!("{} [{}]", project.name.bold(), state);
    println!("  Path: {}", project.path.display());
    println!("  URL:  {}", domains::project_url(name, &ctx.settings)?.cyan());

    if !env.is_empty() {
        println!();
        println!("{}", "Environment:".bold());
        for (key, value) in &env {
            if key.contains("PASSWORD") {
                println!("  {}={}", key, "********".dimmed());
            } else {
                println!("  {}={}", key, value);
            }
        }
    }
    Ok(())
}
