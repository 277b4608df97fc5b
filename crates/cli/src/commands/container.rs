use super::{AutoScaleArgs, ContainerArgs, ContainerCommands};
use crate::context::AppContext;
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;
use yads_core::orchestrator::{self, ContainerStats};
use yads_core::{AutoScalePolicy, Error, Orchestrator};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(args: ContainerArgs, ctx: &AppContext) -> anyhow::Result<()> {
    let compose = ctx.compose();
    let orchestrator = Orchestrator::new(&compose);

    match args.command {
        ContainerCommands::Monitor { watch } => match watch {
            Some(secs) => {
                loop {
                    print_stats(&orchestrator.monitor()?);
                    if !pause(secs).await {
                        break;
                    }
                    println!();
                }
                Ok(())
            }
            None => {
                print_stats(&orchestrator.monitor()?);
                Ok(())
            }
        },
        ContainerCommands::Ps => {
            let containers = orchestrator.ps()?;
            if containers.is_empty() {
                println!("No containers running");
                return Ok(());
            }
            println!(
                "{:<12} {:<28} {:<10} {}",
                "SERVICE".bold(),
                "CONTAINER".bold(),
                "STATE".bold(),
                "STATUS".bold()
            );
            for c in containers {
                println!("{:<12} {:<28} {:<10} {}", c.service, c.name, c.state, c.status);
            }
            Ok(())
        }
        ContainerCommands::Scale { service, replicas } => {
            orchestrator.scale(&service, replicas)?;
            println!(
                "{} {} scaled to {} replica(s)",
                "✓".green(),
                service.bold(),
                replicas
            );
            Ok(())
        }
        ContainerCommands::AutoScale(scale_args) => auto_scale(scale_args, &orchestrator).await,
        ContainerCommands::Health { url } => health(url, &orchestrator).await,
        ContainerCommands::Backup { volume, dir } => {
            let dest = dir.unwrap_or_else(|| ctx.config.backups_dir.clone());
            let archive = orchestrator.backup_volume(&volume, &dest)?;
            println!(
                "{} {} backed up to {}",
                "✓".green(),
                volume.bold(),
                archive.display()
            );
            Ok(())
        }
        ContainerCommands::BackupAll { dir } => backup_all(dir, ctx, &orchestrator),
        ContainerCommands::Restore { volume, archive } => {
            orchestrator.restore_volume(&volume, &archive)?;
            println!("{} {} restored", "✓".green(), volume.bold());
            Ok(())
        }
        ContainerCommands::Logs {
            service,
            follow,
            tail,
        } => {
            orchestrator.logs(Some(&service), follow, tail)?;
            Ok(())
        }
        ContainerCommands::Restart { service } => {
            orchestrator.restart(Some(&service))?;
            println!("{} {} restarted", "✓".green(), service.bold());
            Ok(())
        }
        ContainerCommands::Cleanup => {
            let output = orchestrator.cleanup()?;
            if !output.trim().is_empty() {
                println!("{}", output.trim_end());
            }
            println!("{} Cleanup complete", "✓".green());
            Ok(())
        }
    }
}

/// Sleep between watch iterations; false once Ctrl-C is pressed.
async fn pause(secs: u64) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(secs)) => true,
        _ = tokio::signal::ctrl_c() => false,
    }
}

fn print_stats(stats: &[ContainerStats]) {
    if stats.is_empty() {
        println!("No containers running");
        return;
    }
    println!(
        "{:<28} {:>8} {:>8} {:<22} {}",
        "CONTAINER".bold(),
        "CPU %".bold(),
        "MEM %".bold(),
        "MEM USAGE".bold(),
        "NET I/O".bold()
    );
    for s in stats {
        let cpu = format!("{:.1}", s.cpu_percent());
        let cpu = if s.cpu_percent() > 80.0 {
            cpu.red()
        } else {
            cpu.normal()
        };
        println!(
            "{:<28} {:>8} {:>8.1} {:<22} {}",
            s.name,
            cpu,
            s.mem_percent(),
            s.mem_usage,
            s.net_io
        );
    }
}

async fn auto_scale(args: AutoScaleArgs, orchestrator: &Orchestrator<'_>) -> anyhow::Result<()> {
    let policy = AutoScalePolicy {
        services: args.services,
        scale_up_cpu: args.up,
        scale_down_cpu: args.down,
        min_replicas: args.min,
        max_replicas: args.max,
    };
    if policy.scale_down_cpu >= policy.scale_up_cpu {
        anyhow::bail!(
            "--down ({}) must be lower than --up ({})",
            policy.scale_down_cpu,
            policy.scale_up_cpu
        );
    }

    loop {
        let decisions = orchestrator.auto_scale(&policy)?;
        if decisions.is_empty() {
            println!("{} No scaling needed", "ℹ".blue());
        }
        for d in &decisions {
            let arrow = if d.target > d.current {
                "▲".green()
            } else {
                "▼".yellow()
            };
            println!(
                "{} {} {} -> {} (avg CPU {:.1}%)",
                arrow,
                d.service.bold(),
                d.current,
                d.target,
                d.avg_cpu
            );
        }

        let Some(secs) = args.watch else {
            break;
        };
        if !pause(secs).await {
            break;
        }
    }
    Ok(())
}

async fn health(url: Option<String>, orchestrator: &Orchestrator<'_>) -> anyhow::Result<()> {
    let reports = orchestrator.health_check()?;
    let mut unhealthy = 0;

    println!("{}", "Containers:".bold());
    for report in &reports {
        if report.healthy() {
            println!("  {} {} ({})", "✓".green(), report.container, report.state);
        } else {
            unhealthy += 1;
            let detail = if report.health.is_empty() {
                report.state.clone()
            } else {
                format!("{}, {}", report.state, report.health)
            };
            println!("  {} {} ({})", "✗".red(), report.container, detail);
        }
    }
    if reports.is_empty() {
        println!("  No containers running");
    }

    let url = url.unwrap_or_else(|| "http://localhost".to_string());
    print!("\n{} Probing {}...", "▶".blue(), url);
    if orchestrator::probe_http(&url, PROBE_TIMEOUT).await {
        println!(" {}", "✓".green());
    } else {
        println!(" {}", "✗".red());
        unhealthy += 1;
    }

    if unhealthy > 0 {
        return Err(Error::HealthCheckFailed(format!("{} check(s) failed", unhealthy)).into());
    }
    println!("{} All checks passed", "✓".green());
    Ok(())
}

fn backup_all(
    dir: Option<PathBuf>,
    ctx: &AppContext,
    orchestrator: &Orchestrator<'_>,
) -> anyhow::Result<()> {
    let dest = dir.unwrap_or_else(|| ctx.config.backups_dir.clone());
    let archives = orchestrator.backup_all(&dest)?;
    if archives.is_empty() {
        println!("{} No volumes backed up", "ℹ".blue());
        return Ok(());
    }
    for archive in &archives {
        println!("  {} {}", "✓".green(), archive.display());
    }
    println!("{} Backed up {} volume(s)", "✓".green(), archives.len());
    Ok(())
}
