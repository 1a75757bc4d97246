pub mod backup;
pub mod download;
pub mod history;
pub mod settings;

use clap::Subcommand;
use paibackup_core::HistoryRecord;
use tracing::warn;

use crate::config::AppConfig;

#[derive(Subcommand)]
pub enum Command {
    /// Compress a file to <name>.gz and upload it
    BackupFile(backup::BackupArgs),
    /// Compress a directory to <name>.tgz and upload it
    BackupDirectory(backup::BackupArgs),
    /// Fetch a stored object by key
    Download(download::DownloadArgs),
    /// Show or change backend settings
    Config(settings::ConfigArgs),
    /// List past operations
    History(history::HistoryArgs),
}

/// Append to the history log. Failures are logged and otherwise ignored.
pub(crate) fn record(config: &AppConfig, record: HistoryRecord) {
    let log = config.history();
    if let Err(e) = log.append(&record) {
        warn!(path = %log.path().display(), error = %e, "Could not record history");
    }
}

pub(crate) fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
