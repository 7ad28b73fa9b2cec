//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod config_cmd;
mod fetch;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use slop_scraper::config::Config;
use slop_scraper::rate_limit::RequestClass;

#[derive(Parser)]
#[command(name = "slop")]
#[command(about = "Collect game launch options without getting blocked")]
#[command(version)]
pub struct Cli {
    /// Config file (default: auto-discovered slop.toml/yaml/json)
    #[arg(long, global = true, env = "SLOP_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch URLs through the admission controller and save the results
    Fetch {
        /// URLs to fetch
        urls: Vec<String>,
        /// File with one URL per line (blank lines and # comments ignored)
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Request class for every URL (default: inferred from the host)
        #[arg(short, long)]
        class: Option<RequestClass>,
        /// Output JSON file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print admission statistics when done
        #[arg(long)]
        stats: bool,
    },

    /// Show the effective configuration with defaults and clamping applied
    Config,
}

async fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Ok(Config::load_from_path(&path).await?)
        }
        None => Ok(Config::load().await),
    }
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config).await?;

    match cli.command {
        Commands::Fetch {
            urls,
            input,
            class,
            output,
            stats,
        } => {
            let options = fetch::FetchOptions {
                urls,
                input,
                class,
                output,
                show_stats: stats,
            };
            fetch::cmd_fetch(&config, options).await
        }
        Commands::Config => config_cmd::cmd_config_show(&config),
    }
}
