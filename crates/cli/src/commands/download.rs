use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use paibackup_core::history::Operation;
use paibackup_core::{DownloadRequest, HistoryRecord};

use crate::commands::record;
use crate::config::AppConfig;
use crate::progress;

#[derive(Args)]
pub struct DownloadArgs {
    /// Object key (bucket key or cdn key)
    #[arg(long)]
    key: String,

    /// Destination directory (default: current directory)
    #[arg(long)]
    path: Option<PathBuf>,
}

pub async fn run(config_path: &Path, args: DownloadArgs) -> Result<()> {
    let config = AppConfig::load(config_path)?;
    let orchestrator = config.orchestrator();

    let spinner = progress::create_spinner(&format!("Downloading {}...", args.key));
    let result = orchestrator
        .download(DownloadRequest {
            key: args.key.clone(),
            path: args.path,
        })
        .await;
    spinner.finish_and_clear();

    match result {
        Ok(outcome) => {
            record(
                &config,
                HistoryRecord::succeeded(Operation::Download, &outcome.key, &outcome.key, outcome.backend),
            );
            println!("Downloaded {} to {}", outcome.key, outcome.path.display());
            Ok(())
        }
        Err(err) => {
            record(&config, HistoryRecord::failed(Operation::Download, &args.key, &err));
            Err(err).with_context(|| format!("download of {} failed", args.key))
        }
    }
}
