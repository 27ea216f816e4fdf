//! Tileflow CLI - command-line interface
//!
//! Drives the tileflow library: simulate a panning map client against a
//! tile server (or a built-in synthetic source) and manage the
//! configuration file.

mod commands;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::simulate::SimulateArgs;

#[derive(Debug, Parser)]
#[command(name = "tileflow", version, about = "Tile loading and caching for map clients")]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Pan a viewport across the map and report tile cache statistics
    Simulate {
        /// Tile URL template, e.g. https://tiles.example.com/{z}/{x}/{y}.pbf
        /// (defaults to the config file, then a synthetic source)
        #[arg(long)]
        url: Option<String>,

        /// Number of viewport updates
        #[arg(long, default_value_t = 20)]
        steps: u32,

        /// Viewport zoom level
        #[arg(long, default_value_t = 4.0)]
        zoom: f64,

        /// Worker threads (defaults to the config file, then CPU count)
        #[arg(long)]
        workers: Option<usize>,

        /// Viewport width in pixels
        #[arg(long, default_value_t = 1280)]
        width: u32,

        /// Viewport height in pixels
        #[arg(long, default_value_t = 720)]
        height: u32,

        /// Eastward pan per step, in world widths
        #[arg(long, default_value_t = 0.02)]
        pan: f64,

        /// Time budget per step in milliseconds
        #[arg(long, default_value_t = 250)]
        interval_ms: u64,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Simulate {
            url,
            steps,
            zoom,
            workers,
            width,
            height,
            pan,
            interval_ms,
        } => commands::simulate::run(SimulateArgs {
            config_path: cli.config,
            url,
            steps,
            zoom,
            workers,
            width,
            height,
            pan,
            interval_ms,
        }),
        Commands::Config { command } => commands::config::run(command, cli.config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
