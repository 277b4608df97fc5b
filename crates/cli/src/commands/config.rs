use super::{ConfigArgs, ConfigCommands};
use crate::context::AppContext;
use colored::Colorize;

pub async fn run(args: ConfigArgs, ctx: &mut AppContext) -> anyhow::Result<()> {
    match args.command {
        ConfigCommands::List => {
            let effective = ctx.settings.effective();
            for (key, value) in &effective {
                if ctx.settings.get(key).is_some() {
                    println!("{}=\"{}\"", key.bold(), value);
                } else {
                    println!("{}=\"{}\" {}", key, value, "(default)".dimmed());
                }
            }
        }
        ConfigCommands::Get { key } => match ctx.settings.get_or_default(&key) {
            Some(value) => println!("{}", value),
            None => anyhow::bail!("Setting '{}' is not set", key),
        },
        ConfigCommands::Set { key, value } => {
            ctx.settings.set(&key, &value)?;
            ctx.save_settings()?;
            println!("{} {}=\"{}\"", "✓".green(), key.bold(), value);
        }
        ConfigCommands::Unset { key } => {
            if ctx.settings.unset(&key) {
                ctx.save_settings()?;
                println!("{} Removed {}", "✓".green(), key.bold());
            } else {
                println!("{} {} was not set", "ℹ".blue(), key);
            }
        }
        ConfigCommands::Path => {
            println!("{}", ctx.config.config_file.display());
        }
    }
    Ok(())
}
