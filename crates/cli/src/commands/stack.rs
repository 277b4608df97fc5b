use super::{CheckArgs, InstallArgs, RestartArgs};
use crate::context::AppContext;
use colored::Colorize;
use yads_core::config::{self, InstallMode};
use yads_core::exec;
use yads_core::install::{self, InstallPlan};
use yads_core::os;

pub async fn install(args: InstallArgs, ctx: &AppContext) -> anyhow::Result<()> {
    let mode = if args.docker {
        InstallMode::Docker
    } else {
        ctx.settings.install_mode()?
    };

    match mode {
        InstallMode::Docker => {
            let docker_present = exec::tool_available("docker");
            let plan = InstallPlan::docker(&ctx.settings, &ctx.config, docker_present)?;
            run_plan(&plan, ctx)?;

            println!("{} Starting containers...", "▶".blue());
            let compose = ctx.compose();
            install::docker_up(&ctx.settings, &ctx.config, &compose)?;
            println!(
                "{} Compose file written to {}",
                "✓".green(),
                ctx.config.compose_file.display().to_string().cyan()
            );
        }
        InstallMode::Native => {
            let os = os::detect_os()?;
            println!("{} Detected {}", "ℹ".blue(), os.display_name().bold());
            let plan = InstallPlan::for_settings(&ctx.settings, &os)?;
            run_plan(&plan, ctx)?;
        }
    }

    // start/stop/status follow INSTALL_MODE from here on.
    if args.docker && !ctx.dry_run {
        let mut settings = ctx.settings.clone();
        settings.set(config::INSTALL_MODE, "docker")?;
        settings.save(&ctx.config.config_file)?;
    }

    println!();
    println!("{} Installation complete", "✓".green());
    Ok(())
}

fn run_plan(plan: &InstallPlan, ctx: &AppContext) -> anyhow::Result<()> {
    let total = plan.steps.len();
    for (i, step) in plan.steps.iter().enumerate() {
        println!("{} [{}/{}] {}", "▶".blue(), i + 1, total, step.name.bold());
        step.run(ctx.runner())?;
    }
    Ok(())
}

pub async fn uninstall(ctx: &AppContext) -> anyhow::Result<()> {
    match ctx.settings.install_mode()? {
        InstallMode::Docker => {
            println!("{} Removing containers...", "▶".blue());
            ctx.compose().down()?;
        }
        InstallMode::Native => {
            let os = os::detect_os()?;
            let plan = InstallPlan::uninstall(&ctx.settings, &os)?;
            run_plan(&plan, ctx)?;
        }
    }
    println!("{} Stack removed", "✓".green());
    Ok(())
}

pub async fn check(args: CheckArgs) -> anyhow::Result<()> {
    let tools = install::check_tools();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }

    println!("{}", "External tools:".bold());
    println!();
    for tool in &tools {
        if tool.available {
            println!("  {} {}", "✓".green(), tool.name);
        } else {
            println!("  {} {} {}", "✗".red(), tool.name, "(not found)".dimmed());
        }
    }

    let missing = tools.iter().filter(|t| !t.available).count();
    println!();
    if missing == 0 {
        println!("{} All tools available", "✓".green());
    } else {
        println!("{} {} tool(s) missing", "⚠".yellow(), missing);
    }
    Ok(())
}

pub async fn status(ctx: &AppContext) -> anyhow::Result<()> {
    match ctx.settings.install_mode()? {
        InstallMode::Docker => {
            let containers = ctx.compose().ps()?;
            if containers.is_empty() {
                println!("No containers running");
                println!("\nUse {} to start the stack", "yads start".cyan());
                return Ok(());
            }

            println!("{}", "Containers:".bold());
            println!();
            for c in containers {
                let marker = if c.state == "running" {
                    "●".green()
                } else {
                    "●".red()
                };
                println!("  {} {} {} {}", marker, c.service.bold(), c.name, c.status.dimmed());
            }
        }
        InstallMode::Native => {
            let os = os::detect_os()?;
            println!("{}", "Services:".bold());
            println!();
            for unit in install::service_units(&ctx.settings, &os)? {
                let state = if install::unit_active(ctx.runner(), &unit) {
                    "active".green()
                } else {
                    "inactive".red()
                };
                println!("  {} {} [{}]", "●".cyan(), unit.bold(), state);
            }
        }
    }
    Ok(())
}

pub async fn start(ctx: &AppContext) -> anyhow::Result<()> {
    match ctx.settings.install_mode()? {
        InstallMode::Docker => {
            let compose = ctx.compose();
            install::docker_up(&ctx.settings, &ctx.config, &compose)?;
        }
        InstallMode::Native => systemctl(ctx, "start")?,
    }
    println!("{} Stack started", "✓".green());
    Ok(())
}

pub async fn stop(ctx: &AppContext) -> anyhow::Result<()> {
    match ctx.settings.install_mode()? {
        InstallMode::Docker => ctx.compose().down()?,
        InstallMode::Native => systemctl(ctx, "stop")?,
    }
    println!("{} Stack stopped", "✓".green());
    Ok(())
}

pub async fn restart(args: RestartArgs, ctx: &AppContext) -> anyhow::Result<()> {
    match ctx.settings.install_mode()? {
        InstallMode::Docker => ctx.compose().restart(args.service.as_deref())?,
        InstallMode::Native => {
            let os = os::detect_os()?;
            let units = match args.service {
                Some(unit) => vec![unit],
                None => install::service_units(&ctx.settings, &os)?,
            };
            ctx.runner().run(&install::systemctl("restart", &units))?;
        }
    }
    println!("{} Restarted", "✓".green());
    Ok(())
}

fn systemctl(ctx: &AppContext, action: &str) -> anyhow::Result<()> {
    let os = os::detect_os()?;
    let units = install::service_units(&ctx.settings, &os)?;
    ctx.runner().run(&install::systemctl(action, &units))?;
    Ok(())
}
