use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use paibackup_core::{ConfigMap, HistoryLog, Orchestrator};

const CONFIG_DIR: &str = "paibackup";
const CONFIG_FILE: &str = "paibackup.toml";
const HISTORY_FILE: &str = "history.jsonl";

/// Backend settings on disk plus the location they were read from.
#[derive(Debug, Clone)]
pub struct AppConfig {
    path: PathBuf,
    pub values: ConfigMap,
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_DIR)
            .join(CONFIG_FILE)
    }

    /// A missing file is an empty configuration.
    pub fn load(path: &Path) -> Result<Self> {
        let values = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)
                .with_context(|| format!("failed to parse config {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ConfigMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read config {}", path.display()));
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            values,
        })
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(&self.values)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("failed to write config to {}", self.path.display()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// History lives next to the configuration file.
    pub fn history(&self) -> HistoryLog {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        HistoryLog::new(dir.join(HISTORY_FILE))
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(Arc::new(self.values.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paibackup_core::{ConfigKey, ConfigSource};

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.values, ConfigMap::new());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paibackup").join(CONFIG_FILE);
        let mut config = AppConfig::load(&path).unwrap();
        config.values.set("BACKUP_SERVICE", "http").unwrap();
        config.values.set("HTTP_BASE_URL", "http://cdn.local").unwrap();
        config.save().unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.values.get(ConfigKey::BackupService).as_deref(), Some("http"));
        assert_eq!(
            loaded.history().path(),
            dir.path().join("paibackup").join(HISTORY_FILE)
        );
    }

    #[test]
    fn broken_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "BACKUP_SERVICE = [").unwrap();
        assert!(AppConfig::load(&path).is_err());
    }
}
