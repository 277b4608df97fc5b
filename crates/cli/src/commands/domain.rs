use super::{DomainArgs, DomainCommands};
use crate::context::AppContext;
use colored::Colorize;
use std::path::PathBuf;
use yads_core::config;
use yads_core::domains::{self, HostsSection};
use yads_core::exec;
use yads_core::{InstallMode, ProjectManager};

pub async fn run(args: DomainArgs, ctx: &mut AppContext) -> anyhow::Result<()> {
    match args.command {
        DomainCommands::Setup { domain } => setup(&domain, ctx),
        DomainCommands::Ssl { host, email } => ssl(&host, email, ctx),
        DomainCommands::Tunnel { host, tunnel: name } => tunnel(&host, name, ctx),
        DomainCommands::Hosts { file } => hosts(file, ctx),
    }
}

fn setup(domain: &str, ctx: &mut AppContext) -> anyhow::Result<()> {
    domains::setup_domain(&mut ctx.settings, domain)?;
    ctx.save_settings()?;

    let domain = ctx.settings.domain().unwrap_or(domain).to_string();
    println!("{} Domain set to {}", "✓".green(), domain.bold());
    println!(
        "  Projects will be served as {}",
        format!("<project>.{}", domain).cyan()
    );

    // Docker mode runs cloudflared as a compose service instead.
    let token = ctx
        .settings
        .get(config::CLOUDFLARE_TOKEN)
        .filter(|t| !t.is_empty());
    if let (Some(token), InstallMode::Native) = (token, ctx.settings.install_mode()?) {
        println!("{} Installing cloudflared service...", "▶".blue());
        if !domains::install_tunnel_service(ctx.runner(), token)? {
            println!("  {}", "cloudflared service already installed".dimmed());
        }
    }
    Ok(())
}

fn ssl(host: &str, email: Option<String>, ctx: &AppContext) -> anyhow::Result<()> {
    let web = ctx.settings.web_server()?;
    let email = email.or_else(|| ctx.settings.get(config::SSL_EMAIL).map(str::to_string));
    if email.is_none() {
        println!(
            "{} No SSL_EMAIL set; registering without an email address",
            "⚠".yellow()
        );
    }

    if !ctx.dry_run {
        exec::require_tool("certbot")?;
    }
    println!("{} Requesting certificate for {}...", "▶".blue(), host.bold());
    domains::issue_certificate(ctx.runner(), web, host, email.as_deref())?;
    println!("{} Certificate installed for {}", "✓".green(), host.bold());
    Ok(())
}

fn tunnel(host: &str, tunnel: Option<String>, ctx: &AppContext) -> anyhow::Result<()> {
    let tunnel = match tunnel {
        Some(name) => name,
        None => ctx
            .settings
            .get_or_default(config::TUNNEL_NAME)
            .unwrap_or("yads")
            .to_string(),
    };

    if !ctx.dry_run {
        exec::require_tool("cloudflared")?;
    }
    domains::route_tunnel(ctx.runner(), &tunnel, host)?;
    println!(
        "{} {} routed through tunnel {}",
        "✓".green(),
        host.bold(),
        tunnel.cyan()
    );
    Ok(())
}

fn hosts(file: Option<PathBuf>, ctx: &AppContext) -> anyhow::Result<()> {
    let projects_dir = ctx.config.projects_dir(&ctx.settings);
    let manager = ProjectManager::new(projects_dir, ctx.runner());

    let mut hosts = Vec::new();
    for project in manager.list()?.into_iter().filter(|p| p.enabled) {
        let host = match ctx.settings.domain() {
            Some(domain) => domains::subdomain_for(&project.name, domain)?,
            None => format!("{}.localhost", project.name.to_lowercase()),
        };
        hosts.push(host);
    }

    let section = match file {
        Some(path) => HostsSection::with_path(path),
        None => HostsSection::new(),
    };
    let current = if section.path().exists() {
        section.read()?
    } else {
        String::new()
    };
    let updated = section.update_content(&current, &hosts);
    let dropped: Vec<String> = HostsSection::managed_hosts(&current)
        .into_iter()
        .filter(|h| !hosts.contains(h))
        .collect();

    if updated == current {
        println!("{} {} is up to date", "ℹ".blue(), section.path().display());
        return Ok(());
    }

    section.write(ctx.runner(), &ctx.config.home_dir.join("staging"), &updated)?;
    println!(
        "{} Mapped {} host(s) in {}",
        "✓".green(),
        hosts.len(),
        section.path().display()
    );
    for host in &hosts {
        println!("  {} {}", "●".cyan(), host);
    }
    for host in &dropped {
        println!("  {} {} {}", "○".dimmed(), host, "(removed)".dimmed());
    }
    Ok(())
}
