use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CdnError>;

#[derive(Debug, Error)]
pub enum CdnError {
    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CdnError {
    pub(crate) fn request(context: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CdnError::Timeout(format!("{context}: {err}"))
        } else {
            CdnError::Transfer(format!("{context}: {err}"))
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CdnError::Write {
            path: path.into(),
            source,
        }
    }
}
