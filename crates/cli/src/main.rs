//! `peerlink` command-line tool

mod demo;
mod settings;

use anyhow::Result;
use clap::{Parser, Subcommand};

use peerlink_infra_common::errors::ErrorExt;
use peerlink_infra_common::logging::{log_welcome, setup_logging};

#[derive(Parser, Debug)]
#[command(name = "peerlink", version, about = "Peer session demo: names, calls, media and chat")]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "PEERLINK_LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// TOML file with [logging] and [peer] tables
    #[arg(long, global = true, env = "PEERLINK_CONFIG")]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register two agents, call, chat and hang up
    Demo(demo::DemoArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = settings::Settings::load(cli.config.as_deref())?
        .with_log_level(cli.log_level.as_deref())?
        .with_json_logs(cli.json_logs);
    setup_logging(settings.logging.clone()).with_context("cli", "setup_logging")?;
    log_welcome("peerlink", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Demo(args) => demo::run(args, settings.peer).await,
    }
}
