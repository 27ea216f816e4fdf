//! Configuration management CLI commands.
//!
//! Provides `config init`, `config show`, `config get`, `config set` and
//! `config path` for viewing and modifying settings from the command line.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use tileflow::config::{ConfigKey, TileflowConfig};

use super::resolve_config_path;
use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Write a configuration file with default settings
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show all configuration settings
    Show,

    /// Get a configuration value
    Get {
        /// Configuration key in format section.key (e.g., source.max_zoom)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key in format section.key (e.g., source.max_zoom)
        key: String,

        /// Value to set (empty clears optional settings)
        value: String,
    },

    /// Show the configuration file path
    Path,
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands, explicit: Option<PathBuf>) -> Result<(), CliError> {
    let path = resolve_config_path(explicit.as_deref())?;
    match command {
        ConfigCommands::Init { force } => run_init(&path, force),
        ConfigCommands::Show => run_show(&path),
        ConfigCommands::Get { key } => run_get(&path, &key),
        ConfigCommands::Set { key, value } => run_set(&path, &key, &value),
        ConfigCommands::Path => {
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn parse_key(key: &str) -> Result<ConfigKey, CliError> {
    key.parse().map_err(|_| {
        CliError::Config(format!(
            "Unknown configuration key '{}'. Use 'tileflow config show' to see available keys.",
            key
        ))
    })
}

fn run_init(path: &Path, force: bool) -> Result<(), CliError> {
    if path.exists() && !force {
        return Err(CliError::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    TileflowConfig::default().save(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn run_show(path: &Path) -> Result<(), CliError> {
    let config = TileflowConfig::load(path)?;

    println!("Configuration Settings ({})", path.display());
    println!("======================");

    let mut current_section = "";
    for key in ConfigKey::all() {
        let section = key.section();
        if section != current_section {
            println!();
            println!("[{}]", section);
            current_section = section;
        }

        let value = key.get(&config);
        if value.is_empty() {
            println!("  {} = (not set)", key.key_name());
        } else {
            println!("  {} = {}", key.key_name(), value);
        }
    }
    Ok(())
}

fn run_get(path: &Path, key: &str) -> Result<(), CliError> {
    let key = parse_key(key)?;
    let config = TileflowConfig::load(path)?;
    let value = key.get(&config);
    if value.is_empty() {
        println!("(not set)");
    } else {
        println!("{}", value);
    }
    Ok(())
}

fn run_set(path: &Path, key: &str, value: &str) -> Result<(), CliError> {
    let key = parse_key(key)?;
    let mut config = TileflowConfig::load(path)?;
    key.set(&mut config, value)?;
    config.save(path)?;
    println!("Set {} = {}", key.name(), value);
    Ok(())
}
