use std::path::Path;

use anyhow::Result;
use clap::{Args, Subcommand};

use paibackup_core::{ConfigKey, ConfigSource};

use crate::config::AppConfig;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    action: ConfigAction,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Set a parameter; an empty value clears it
    Set {
        /// BACKUP_SERVICE, OBJECT_STORE_BUCKET, OBJECT_STORE_CREDENTIALS_PATH or HTTP_BASE_URL
        name: String,
        value: String,
    },
    /// Print the current settings
    Show,
}

pub fn run(config_path: &Path, args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Set { name, value } => {
            let mut config = AppConfig::load(config_path)?;
            let key = config.values.set(&name, &value)?;
            config.save()?;
            if config.values.get(key).is_some() {
                println!("{key} set.");
            } else {
                println!("{key} cleared.");
            }
        }
        ConfigAction::Show => {
            let config = AppConfig::load(config_path)?;
            println!("Config: {}", config.path().display());
            println!();
            println!("{:<32} {:<40}", "PARAMETER", "VALUE");
            println!("{}", "-".repeat(72));
            for key in ConfigKey::ALL {
                let value = config.values.get(key);
                println!("{:<32} {:<40}", key.as_str(), value.as_deref().unwrap_or("-"));
            }
        }
    }
    Ok(())
}
