use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use paibackup_core::history::Operation;
use paibackup_core::{BackupRequest, HistoryRecord, ObjectKind};

use crate::commands::{format_bytes, record};
use crate::config::AppConfig;
use crate::progress;

#[derive(Args)]
pub struct BackupArgs {
    /// File or directory to back up
    #[arg(long)]
    path: PathBuf,

    /// Archive name (default: base name of --path)
    #[arg(long)]
    name: Option<String>,

    /// Keep the local archive after a successful upload
    #[arg(long)]
    keep_local_copy: bool,
}

pub async fn run(config_path: &Path, kind: ObjectKind, args: BackupArgs) -> Result<()> {
    let config = AppConfig::load(config_path)?;
    let orchestrator = config.orchestrator();
    let operation = match kind {
        ObjectKind::File => Operation::BackupFile,
        ObjectKind::Directory => Operation::BackupDirectory,
    };
    let label = args
        .name
        .clone()
        .unwrap_or_else(|| args.path.display().to_string());
    let request = BackupRequest {
        path: args.path,
        name: args.name,
        keep_local_copy: args.keep_local_copy,
    };

    let spinner = progress::create_spinner(&format!("Backing up {label}..."));
    let result = match kind {
        ObjectKind::File => orchestrator.backup_file(request).await,
        ObjectKind::Directory => orchestrator.backup_directory(request).await,
    };
    spinner.finish_and_clear();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            record(&config, HistoryRecord::failed(operation, &label, &err));
            return Err(err).with_context(|| format!("{operation} of {label} failed"));
        }
    };
    record(
        &config,
        HistoryRecord::succeeded(operation, &outcome.name, &outcome.key, outcome.backend),
    );

    println!(
        "Backed up {} ({}) to {}",
        outcome.name, outcome.kind, outcome.backend
    );
    println!("  Archive:  {} ({})", outcome.archive_key, format_bytes(outcome.bytes));
    println!("  Key:      {}", outcome.key);
    if let Some(cdn_key) = &outcome.cdn_key {
        println!("  CDN key:  {cdn_key}");
    }
    match (&outcome.local_archive, &outcome.cleanup_error) {
        (Some(path), None) => println!("  Local:    kept at {}", path.display()),
        (Some(path), Some(err)) => {
            println!("  Local:    could not remove {}: {err}", path.display())
        }
        (None, _) => println!("  Local:    removed"),
    }
    Ok(())
}
