use std::path::{Path, PathBuf};

use async_trait::async_trait;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::region::Region;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::Backend;
use crate::config::BackendKind;
use crate::error::{BackupError, Result};
use crate::locks::KeyLocks;

const DEFAULT_REGION: &str = "eu-central-1";

/// Contents of the credentials file named by `OBJECT_STORE_CREDENTIALS_PATH`.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// S3-compatible endpoint; path-style addressing is used when set.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl std::fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub credentials: StoreCredentials,
}

impl ObjectStoreConfig {
    pub fn load(bucket: &str, credentials_path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(credentials_path).map_err(|e| {
            BackupError::Auth(format!(
                "cannot read credentials file {}: {e}",
                credentials_path.display()
            ))
        })?;
        let credentials: StoreCredentials = serde_json::from_str(&text).map_err(|e| {
            BackupError::Auth(format!(
                "invalid credentials file {}: {e}",
                credentials_path.display()
            ))
        })?;
        if credentials.access_key_id.trim().is_empty()
            || credentials.secret_access_key.trim().is_empty()
        {
            return Err(BackupError::Auth(format!(
                "credentials file {} has an empty access key",
                credentials_path.display()
            )));
        }

        let region = credentials
            .region
            .clone()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let endpoint = credentials
            .endpoint
            .clone()
            .filter(|e| !e.trim().is_empty())
            .map(|e| e.trim_end_matches('/').to_string());

        Ok(Self {
            bucket: bucket.to_string(),
            region,
            endpoint,
            credentials,
        })
    }
}

pub struct ObjectStoreBackend {
    bucket_name: String,
    bucket: Box<Bucket>,
}

impl ObjectStoreBackend {
    pub fn new(config: ObjectStoreConfig) -> Result<Self> {
        let creds = &config.credentials;
        let credentials = Credentials::new(
            Some(creds.access_key_id.as_str()),
            Some(creds.secret_access_key.as_str()),
            None,
            creds.session_token.as_deref(),
            None,
        )
        .map_err(|e| BackupError::Auth(format!("invalid object store credentials: {e}")))?;

        let bucket = match &config.endpoint {
            Some(endpoint) => {
                let region = Region::Custom {
                    region: config.region.clone(),
                    endpoint: endpoint.clone(),
                };
                Bucket::new(&config.bucket, region, credentials)
                    .map_err(|e| classify(&config.bucket, e))?
                    .with_path_style()
            }
            None => {
                let region = Region::Custom {
                    region: config.region.clone(),
                    endpoint: format!("https://s3.{}.amazonaws.com", config.region),
                };
                Bucket::new(&config.bucket, region, credentials)
                    .map_err(|e| classify(&config.bucket, e))?
            }
        };

        Ok(Self {
            bucket_name: config.bucket,
            bucket,
        })
    }
}

#[async_trait]
impl Backend for ObjectStoreBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ObjectStore
    }

    async fn put(&self, archive: &Path, key: &str) -> Result<String> {
        let mut file = tokio::fs::File::open(archive).await.map_err(|e| {
            BackupError::Transfer(format!("cannot open {}: {e}", archive.display()))
        })?;
        self.bucket
            .put_object_stream(&mut file, key)
            .await
            .map_err(|e| classify(&format!("{}/{key}", self.bucket_name), e))?;

        info!(bucket = %self.bucket_name, key, "Stored in object store");
        Ok(key.to_string())
    }

    async fn get(&self, key: &str, destination_dir: &Path, locks: &KeyLocks) -> Result<PathBuf> {
        let file_name = Path::new(key)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| BackupError::InvalidRequest(format!("`{key}` has no file name")))?;

        tokio::fs::create_dir_all(destination_dir)
            .await
            .map_err(|e| BackupError::destination(destination_dir, e))?;
        let target = destination_dir.join(file_name);
        let partial = destination_dir.join(format!("{file_name}.part"));
        let _guard = locks.acquire(&target).await;

        if let Err(err) = self.fetch_into(key, &partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err);
        }
        tokio::fs::rename(&partial, &target)
            .await
            .map_err(|e| BackupError::destination(&target, e))?;

        info!(bucket = %self.bucket_name, key, path = %target.display(), "Fetched from object store");
        Ok(target)
    }
}

impl ObjectStoreBackend {
    async fn fetch_into(&self, key: &str, partial: &Path) -> Result<()> {
        let mut file = tokio::fs::File::create(partial)
            .await
            .map_err(|e| BackupError::destination(partial, e))?;

        let status = self
            .bucket
            .get_object_to_writer(key, &mut file)
            .await
            .map_err(|e| match e {
                S3Error::Io(io) => BackupError::destination(partial, io),
                other => classify(&format!("{}/{key}", self.bucket_name), other),
            })?;
        debug!(key, status, "object body received");

        file.flush()
            .await
            .map_err(|e| BackupError::destination(partial, e))?;
        file.sync_all()
            .await
            .map_err(|e| BackupError::destination(partial, e))
    }
}

fn classify(target: &str, err: S3Error) -> BackupError {
    match err {
        S3Error::HttpFailWithBody(401 | 403, body) => {
            BackupError::Auth(format!("{target}: access denied: {body}"))
        }
        S3Error::HttpFailWithBody(404, _) => BackupError::NotFound(target.to_string()),
        S3Error::HttpFailWithBody(status, body) => {
            BackupError::Transfer(format!("{target}: HTTP {status}: {body}"))
        }
        S3Error::Credentials(e) => BackupError::Auth(format!("{target}: {e}")),
        other => BackupError::Transfer(format!("{target}: {other}")),
    }
}
