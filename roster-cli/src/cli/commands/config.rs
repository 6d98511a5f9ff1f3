//! `config init` and `config show`

use anyhow::{Context, Result};
use colored::*;

use crate::cli::ConfigCommands;
use roster_cli::config::{self, Config};

pub fn handle_config_command(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Init { force } => init(force),
        ConfigCommands::Show => show(),
    }
}

fn init(force: bool) -> Result<()> {
    let path = config::config_path();
    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {} (use --force to overwrite)",
            path.display()
        );
    }

    Config::with_defaults().save_to(&path)?;
    println!(
        "{} {}",
        "Wrote".bright_green(),
        path.display().to_string().cyan()
    );
    println!("Fill in [auth] tenant_id/client_id and [site] host/path before signing in.");
    Ok(())
}

fn show() -> Result<()> {
    let config = Config::load()?;
    println!("{}", format!("# {}", config::config_path().display()).dimmed());
    print!(
        "{}",
        toml::to_string_pretty(&config).context("Failed to serialize config")?
    );
    Ok(())
}
