use super::{TemplatesArgs, TemplatesCommands};
use crate::context::AppContext;
use colored::Colorize;
use yads_core::config;
use yads_core::{ProjectType, TemplateFetcher};

pub async fn run(args: TemplatesArgs, ctx: &AppContext) -> anyhow::Result<()> {
    match args.command {
        TemplatesCommands::List => list(ctx),
        TemplatesCommands::Update { branch } => {
            let Some(repo) = ctx
                .settings
                .get(config::TEMPLATES_REPO)
                .filter(|url| !url.is_empty())
            else {
                anyhow::bail!(
                    "No template repository configured. Set one with 'yads config set {} <url>'",
                    config::TEMPLATES_REPO
                );
            };

            println!("{} Fetching templates from {}...", "▶".blue(), repo.cyan());
            let fetcher =
                TemplateFetcher::new(repo.to_string(), ctx.config.templates_dir.clone(), branch);
            fetcher.update()?;

            let names = fetcher.list()?;
            println!("{} {} template(s) available", "✓".green(), names.len());
            Ok(())
        }
    }
}

fn list(ctx: &AppContext) -> anyhow::Result<()> {
    println!("{}", "Project types:".bold());
    println!();
    for kind in ProjectType::ALL {
        println!("  {} {}", "●".cyan(), kind.as_str().bold());
    }

    let cached = match ctx.template_fetcher() {
        Some(fetcher) => fetcher.list()?,
        None => Vec::new(),
    };

    println!();
    if cached.is_empty() {
        println!("No remote templates cached");
        println!(
            "Use {} to fetch them",
            "yads templates update".cyan()
        );
    } else {
        println!("{}", "Remote templates (cached):".bold());
        println!();
        for name in cached {
            println!("  {} {}", "●".cyan(), name);
        }
    }
    Ok(())
}
