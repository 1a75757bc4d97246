use std::path::{Path, PathBuf};

use async_trait::async_trait;
use paibackup_cdn::CdnClient;
use tracing::{debug, info};

use super::Backend;
use crate::config::BackendKind;
use crate::error::{BackupError, Result};
use crate::locks::KeyLocks;

/// HTTP file service. The service mints the key on upload.
pub struct HttpBackend {
    client: CdnClient,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self::from_client(CdnClient::new(base_url)?))
    }

    pub fn from_client(client: CdnClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Http
    }

    async fn put(&self, archive: &Path, key: &str) -> Result<String> {
        let cdn_key = self.client.upload(archive).await?;
        info!(key, cdn_key = %cdn_key, base_url = self.client.base_url(), "Stored on file service");
        Ok(cdn_key)
    }

    async fn get(&self, key: &str, destination_dir: &Path, locks: &KeyLocks) -> Result<PathBuf> {
        let pending = self.client.fetch(key).await?;
        tokio::fs::create_dir_all(destination_dir)
            .await
            .map_err(|e| BackupError::destination(destination_dir, e))?;

        let target = destination_dir.join(pending.file_name());
        let _guard = locks.acquire(&target).await;
        debug!(key, path = %target.display(), "writing download");
        Ok(pending.save(destination_dir).await?)
    }
}
