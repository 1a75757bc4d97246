mod commands;
mod config;
mod progress;

use std::path::PathBuf;

use clap::Parser;
use paibackup_core::ObjectKind;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(
    name = "paibackup",
    version,
    about = "Compress files and directories and ship them to object storage or an HTTP file service"
)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: <config dir>/paibackup/paibackup.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config_path = cli.config.unwrap_or_else(AppConfig::default_path);

    match cli.command {
        commands::Command::BackupFile(args) => {
            commands::backup::run(&config_path, ObjectKind::File, args).await
        }
        commands::Command::BackupDirectory(args) => {
            commands::backup::run(&config_path, ObjectKind::Directory, args).await
        }
        commands::Command::Download(args) => commands::download::run(&config_path, args).await,
        commands::Command::Config(args) => commands::settings::run(&config_path, args),
        commands::Command::History(args) => commands::history::run(&config_path, args),
    }
}
