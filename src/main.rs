//! Browse and modify a directory through a metadata-caching filesystem facade.
use std::path::PathBuf;

use clap::Parser;
use tracing::error;

mod app_config;
mod commands;
mod trc;

use crate::app_config::Config;
use crate::commands::Command;
use crate::trc::Trc;

#[derive(Parser)]
#[command(
    version,
    about = "A filesystem facade that remembers what it has already seen."
)]
struct Args {
    #[arg(
        short,
        long,
        value_parser,
        help = "Optional path to a cachedfs config TOML."
    )]
    config_path: Option<PathBuf>,

    #[arg(short, long, value_parser, help = "Serve this directory instead of the configured root.")]
    root: Option<PathBuf>,

    #[arg(short, long, help = "Log everything the cache does.")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Main entry point for the application.
fn main() {
    let args = Args::parse();

    // Errors use eprintln since tracing isn't initialized yet.
    let mut config = Config::load(args.config_path.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(1);
    });
    if let Some(root) = args.root {
        config.root = root;
    }
    if let Err(error_messages) = config.validate() {
        eprintln!("Configuration is invalid.");
        for msg in &error_messages {
            eprintln!(" - {msg}");
        }
        std::process::exit(1);
    }

    if let Err(e) = Trc::default().verbose(args.verbose).init() {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = commands::run(&config, args.command) {
        error!("{e}");
        std::process::exit(1);
    }
}
