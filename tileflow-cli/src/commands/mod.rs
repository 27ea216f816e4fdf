//! CLI subcommands.

pub mod config;
pub mod simulate;

use std::path::{Path, PathBuf};

use tileflow::config::{config_file_path, TileflowConfig};

use crate::error::CliError;

/// The explicit `--config` path, else the default location.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf, CliError> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(config_file_path()?),
    }
}

/// Load the configuration; a missing file yields defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<TileflowConfig, CliError> {
    let path = resolve_config_path(explicit)?;
    Ok(TileflowConfig::load(&path)?)
}
