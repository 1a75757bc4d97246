use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use paibackup_core::history::Status;

use crate::config::AppConfig;

#[derive(Args)]
pub struct HistoryArgs {
    /// Number of entries to show
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

pub fn run(config_path: &Path, args: HistoryArgs) -> Result<()> {
    let config = AppConfig::load(config_path)?;
    let log = config.history();
    let records = log
        .list()
        .with_context(|| format!("failed to read history {}", log.path().display()))?;

    if records.is_empty() {
        println!("No operations recorded.");
        return Ok(());
    }

    println!(
        "{:<10} {:<20} {:<18} {:<24} {:<30} {:<8}",
        "ID", "TIME", "OPERATION", "NAME", "KEY", "STATUS"
    );
    println!("{}", "-".repeat(112));
    for rec in records.iter().take(args.limit) {
        let status = match rec.status {
            Status::Succeeded => "ok",
            Status::Failed => "failed",
        };
        println!(
            "{:<10} {:<20} {:<18} {:<24} {:<30} {:<8}",
            rec.short_id(),
            rec.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            rec.operation.to_string(),
            rec.name,
            rec.key.as_deref().unwrap_or("-"),
            status,
        );
        if let Some(err) = &rec.error {
            println!("{:<10} {err}", "");
        }
    }
    if records.len() > args.limit {
        println!("... and {} more", records.len() - args.limit);
    }
    Ok(())
}
