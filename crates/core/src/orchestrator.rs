use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::archive;
use crate::backend::{Backend, open_backend};
use crate::config::{BackendKind, BackendSettings, ConfigSource};
use crate::error::{BackupError, Result};
use crate::locks::KeyLocks;
use crate::object::{BackupObject, ObjectKind};

/// Request shape shared by `backupFile` and `backupDirectory`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRequest {
    pub path: PathBuf,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    pub keep_local_copy: bool,
}

impl BackupRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn keep_local_copy(mut self, keep: bool) -> Self {
        self.keep_local_copy = keep;
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadRequest {
    pub key: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl DownloadRequest {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            path: None,
        }
    }

    pub fn into_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

fn blank_as_none<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(de)?;
    Ok(value.filter(|v| !v.trim().is_empty()))
}

// hosts send the flag either as a JSON bool or as "true"/"false"
fn flag<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Option::<Flag>::deserialize(de)? {
        None => Ok(false),
        Some(Flag::Bool(b)) => Ok(b),
        Some(Flag::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected true or false, got `{other}`"
            ))),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Created,
    Archived,
    Uploaded,
    Fetched,
    Finalized,
    Failed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Created => write!(f, "created"),
            Stage::Archived => write!(f, "archived"),
            Stage::Uploaded => write!(f, "uploaded"),
            Stage::Fetched => write!(f, "fetched"),
            Stage::Finalized => write!(f, "finalized"),
            Stage::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOutcome {
    pub name: String,
    pub kind: ObjectKind,
    pub backend: BackendKind,
    /// Key derived from the name, also the local archive's file name.
    pub archive_key: String,
    /// Compressed size.
    pub bytes: u64,
    /// Key the backend stored the archive under.
    pub key: String,
    pub cdn_key: Option<String>,
    /// Set when the archive is still on disk.
    pub local_archive: Option<PathBuf>,
    /// Removing the local archive failed. The upload itself succeeded.
    pub cleanup_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadOutcome {
    pub key: String,
    pub backend: BackendKind,
    pub path: PathBuf,
}

/// Runs backup and download calls against the configured backend.
///
/// Configuration is read at the start of every call. Calls are independent
/// except that two calls targeting the same local file wait for each other.
pub struct Orchestrator {
    config: Arc<dyn ConfigSource>,
    work_dir: PathBuf,
    timeout: Option<Duration>,
    locks: KeyLocks,
}

impl Orchestrator {
    pub fn new(config: Arc<dyn ConfigSource>) -> Self {
        Self {
            config,
            work_dir: PathBuf::from("."),
            timeout: None,
            locks: KeyLocks::new(),
        }
    }

    /// Directory archives are written to.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Deadline for a whole call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub async fn backup_file(&self, request: BackupRequest) -> Result<BackupOutcome> {
        self.bounded(self.backup(ObjectKind::File, request))
            .await
            .inspect_err(|e| warn!(stage = %Stage::Failed, kind = "file", error = %e, "Backup failed"))
    }

    pub async fn backup_directory(&self, request: BackupRequest) -> Result<BackupOutcome> {
        self.bounded(self.backup(ObjectKind::Directory, request))
            .await
            .inspect_err(
                |e| warn!(stage = %Stage::Failed, kind = "directory", error = %e, "Backup failed"),
            )
    }

    pub async fn download(&self, request: DownloadRequest) -> Result<DownloadOutcome> {
        self.bounded(self.fetch(request))
            .await
            .inspect_err(|e| warn!(stage = %Stage::Failed, error = %e, "Download failed"))
    }

    fn open(&self) -> Result<Arc<dyn Backend>> {
        let settings = BackendSettings::resolve(self.config.as_ref())?;
        open_backend(&settings)
    }

    async fn bounded<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, op)
                .await
                .map_err(|_| BackupError::Timeout(format!("operation exceeded {limit:?}")))?,
            None => op.await,
        }
    }

    async fn backup(&self, kind: ObjectKind, request: BackupRequest) -> Result<BackupOutcome> {
        let backend = self.open()?;
        let object = BackupObject::for_backup(
            kind,
            &request.path,
            request.name.as_deref(),
            &self.work_dir,
        )?;
        let (Some(source), Some(local)) = (object.source_path(), object.archive_path()) else {
            return Err(BackupError::InvalidRequest(format!(
                "`{}` is not a backup entity",
                object.name()
            )));
        };
        debug!(
            stage = %Stage::Created,
            name = object.name(),
            key = object.key(),
            %kind,
            backend = %backend.kind(),
            "entity created"
        );

        // shared with the archive job so a timed-out call keeps the lock
        // until that job has stopped
        let guard = Arc::new(self.locks.acquire(local).await);

        let bytes = match kind {
            ObjectKind::File => archive::compress_file(source, local, Arc::clone(&guard)).await?,
            ObjectKind::Directory => {
                archive::compress_directory(source, local, Arc::clone(&guard)).await?
            }
        };
        debug!(stage = %Stage::Archived, key = object.key(), bytes, path = %local.display(), "archive written");

        let key = backend.put(local, object.key()).await.inspect_err(|_| {
            warn!(
                key = object.key(),
                path = %local.display(),
                "Upload failed, local archive kept"
            )
        })?;
        debug!(stage = %Stage::Uploaded, key = %key, "archive stored");

        let cdn_key = (backend.kind() == BackendKind::Http).then(|| key.clone());
        let (local_archive, cleanup_error) = if request.keep_local_copy {
            (Some(local.to_path_buf()), None)
        } else {
            match tokio::fs::remove_file(local).await {
                Ok(()) => (None, None),
                Err(e) => {
                    warn!(path = %local.display(), error = %e, "Could not remove local archive");
                    (Some(local.to_path_buf()), Some(e.to_string()))
                }
            }
        };

        info!(
            stage = %Stage::Finalized,
            name = object.name(),
            key = %key,
            backend = %backend.kind(),
            kept = local_archive.is_some(),
            "Backup complete"
        );
        Ok(BackupOutcome {
            name: object.name().to_string(),
            kind,
            backend: backend.kind(),
            archive_key: object.key().to_string(),
            bytes,
            key,
            cdn_key,
            local_archive,
            cleanup_error,
        })
    }

    async fn fetch(&self, request: DownloadRequest) -> Result<DownloadOutcome> {
        let backend = self.open()?;
        let object = BackupObject::for_download(&request.key, request.path.as_deref())?;
        let Some(destination) = object.destination() else {
            return Err(BackupError::InvalidRequest(format!(
                "`{}` has no destination",
                object.key()
            )));
        };
        debug!(stage = %Stage::Created, key = object.key(), backend = %backend.kind(), "entity created");

        let path = backend.get(object.key(), destination, &self.locks).await?;
        debug!(stage = %Stage::Fetched, key = object.key(), path = %path.display(), "object fetched");

        info!(stage = %Stage::Finalized, key = object.key(), path = %path.display(), "Download complete");
        Ok(DownloadOutcome {
            key: object.key().to_string(),
            backend: backend.kind(),
            path,
        })
    }
}
