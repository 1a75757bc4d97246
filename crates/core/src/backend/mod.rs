pub mod http;
pub mod object_store;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{BackendKind, BackendSettings};
use crate::error::Result;
use crate::locks::KeyLocks;

pub use http::HttpBackend;
pub use object_store::{ObjectStoreBackend, ObjectStoreConfig};

/// A place archives can be stored in and fetched back from.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Store the archive at `archive` and return the key it can be fetched by.
    /// This is `key` itself unless the backend assigns its own identifiers.
    async fn put(&self, archive: &Path, key: &str) -> Result<String>;

    /// Fetch `key` into `destination_dir`, returning the path written.
    ///
    /// The lock for the written file is taken from `locks` once its name is
    /// known and held until the file is in place.
    async fn get(&self, key: &str, destination_dir: &Path, locks: &KeyLocks) -> Result<PathBuf>;
}

pub fn open_backend(settings: &BackendSettings) -> Result<Arc<dyn Backend>> {
    match settings {
        BackendSettings::ObjectStore {
            bucket,
            credentials_path,
        } => {
            let config = ObjectStoreConfig::load(bucket, credentials_path)?;
            Ok(Arc::new(ObjectStoreBackend::new(config)?))
        }
        BackendSettings::Http { base_url } => Ok(Arc::new(HttpBackend::new(base_url)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn opens_http_backend() {
        let backend = open_backend(&BackendSettings::Http {
            base_url: "http://cdn.local/".into(),
        })
        .unwrap();
        assert_eq!(backend.kind(), BackendKind::Http);
    }

    #[test]
    fn unreadable_credentials_are_auth_errors() {
        let err = open_backend(&BackendSettings::ObjectStore {
            bucket: "backups".into(),
            credentials_path: PathBuf::from("/nonexistent/creds.json"),
        })
        .err()
        .unwrap();
        assert_eq!(err.kind(), ErrorKind::Auth);
    }
}
