use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{BackupError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigKey {
    BackupService,
    ObjectStoreBucket,
    ObjectStoreCredentialsPath,
    HttpBaseUrl,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 4] = [
        ConfigKey::BackupService,
        ConfigKey::ObjectStoreBucket,
        ConfigKey::ObjectStoreCredentialsPath,
        ConfigKey::HttpBaseUrl,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConfigKey::BackupService => "BACKUP_SERVICE",
            ConfigKey::ObjectStoreBucket => "OBJECT_STORE_BUCKET",
            ConfigKey::ObjectStoreCredentialsPath => "OBJECT_STORE_CREDENTIALS_PATH",
            ConfigKey::HttpBaseUrl => "HTTP_BASE_URL",
        }
    }
}

impl std::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConfigKey {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        ConfigKey::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                BackupError::InvalidRequest(format!("unknown configuration parameter: {s}"))
            })
    }
}

/// Read-only view of the backend configuration.
pub trait ConfigSource: Send + Sync {
    fn get(&self, key: ConfigKey) -> Option<String>;
}

/// Ordered name/value store, persisted as TOML by the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigMap {
    values: BTreeMap<String, String>,
}

impl ConfigMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` to `value`. An empty value removes the entry.
    pub fn set(&mut self, name: &str, value: &str) -> Result<ConfigKey> {
        let key: ConfigKey = name.parse()?;
        let value = value.trim();
        if value.is_empty() {
            self.values.remove(key.as_str());
        } else {
            self.values.insert(key.as_str().to_string(), value.to_string());
        }
        Ok(key)
    }

    pub fn with(mut self, key: ConfigKey, value: &str) -> Self {
        self.values.insert(key.as_str().to_string(), value.to_string());
        self
    }

    /// Entries in display order; unknown names kept on disk are ignored.
    pub fn entries(&self) -> impl Iterator<Item = (ConfigKey, &str)> {
        ConfigKey::ALL
            .into_iter()
            .filter_map(|k| self.values.get(k.as_str()).map(|v| (k, v.as_str())))
    }
}

impl ConfigSource for ConfigMap {
    fn get(&self, key: ConfigKey) -> Option<String> {
        self.values
            .get(key.as_str())
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackendKind {
    ObjectStore,
    Http,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::ObjectStore => write!(f, "OBJECT_STORE"),
            BackendKind::Http => write!(f, "HTTP"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OBJECT_STORE" | "S3" => Ok(BackendKind::ObjectStore),
            "HTTP" | "PAI_HTTP" => Ok(BackendKind::Http),
            _ => Err(BackupError::UnknownBackend(format!(
                "{} is `{s}`, expected OBJECT_STORE or HTTP",
                ConfigKey::BackupService
            ))),
        }
    }
}

/// Backend selection resolved from configuration for a single call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSettings {
    ObjectStore {
        bucket: String,
        credentials_path: PathBuf,
    },
    Http {
        base_url: String,
    },
}

impl BackendSettings {
    pub fn resolve(source: &dyn ConfigSource) -> Result<Self> {
        let kind: BackendKind = source
            .get(ConfigKey::BackupService)
            .ok_or_else(|| {
                BackupError::UnknownBackend(format!("{} is not set", ConfigKey::BackupService))
            })?
            .parse()?;

        match kind {
            BackendKind::ObjectStore => {
                let bucket = source
                    .get(ConfigKey::ObjectStoreBucket)
                    .ok_or(BackupError::MissingConfig(ConfigKey::ObjectStoreBucket))?;
                let credentials_path = source
                    .get(ConfigKey::ObjectStoreCredentialsPath)
                    .ok_or_else(|| {
                        BackupError::Auth(format!(
                            "no credentials file configured ({})",
                            ConfigKey::ObjectStoreCredentialsPath
                        ))
                    })?;
                Ok(BackendSettings::ObjectStore {
                    bucket,
                    credentials_path: PathBuf::from(credentials_path),
                })
            }
            BackendKind::Http => {
                let base_url = source
                    .get(ConfigKey::HttpBaseUrl)
                    .ok_or(BackupError::MissingConfig(ConfigKey::HttpBaseUrl))?;
                Ok(BackendSettings::Http { base_url })
            }
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            BackendSettings::ObjectStore { .. } => BackendKind::ObjectStore,
            BackendSettings::Http { .. } => BackendKind::Http,
        }
    }
}
