use std::path::PathBuf;

use paibackup_cdn::CdnError;
use thiserror::Error;

use crate::config::ConfigKey;

pub type Result<T> = std::result::Result<T, BackupError>;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("archive I/O failed: {0}")]
    CodecIo(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("failed to write {}: {message}", path.display())]
    DestinationWrite { path: PathBuf, message: String },

    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    #[error("missing configuration value {0}")]
    MissingConfig(ConfigKey),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Fieldless discriminant of [`BackupError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SourceNotFound,
    CodecIo,
    Auth,
    NotFound,
    Transfer,
    Protocol,
    Timeout,
    DestinationWrite,
    UnknownBackend,
    MissingConfig,
    InvalidRequest,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::SourceNotFound => "source-not-found",
            ErrorKind::CodecIo => "codec-io",
            ErrorKind::Auth => "auth",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Transfer => "transfer",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Timeout => "timeout",
            ErrorKind::DestinationWrite => "destination-write",
            ErrorKind::UnknownBackend => "unknown-backend",
            ErrorKind::MissingConfig => "missing-config",
            ErrorKind::InvalidRequest => "invalid-request",
        };
        f.write_str(s)
    }
}

impl BackupError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackupError::SourceNotFound(_) => ErrorKind::SourceNotFound,
            BackupError::CodecIo(_) => ErrorKind::CodecIo,
            BackupError::Auth(_) => ErrorKind::Auth,
            BackupError::NotFound(_) => ErrorKind::NotFound,
            BackupError::Transfer(_) => ErrorKind::Transfer,
            BackupError::Protocol(_) => ErrorKind::Protocol,
            BackupError::Timeout(_) => ErrorKind::Timeout,
            BackupError::DestinationWrite { .. } => ErrorKind::DestinationWrite,
            BackupError::UnknownBackend(_) => ErrorKind::UnknownBackend,
            BackupError::MissingConfig(_) => ErrorKind::MissingConfig,
            BackupError::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }

    pub(crate) fn codec(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        BackupError::CodecIo(format!("{context}: {err}"))
    }

    pub(crate) fn destination(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        BackupError::DestinationWrite {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl From<CdnError> for BackupError {
    fn from(err: CdnError) -> Self {
        match err {
            CdnError::Transfer(msg) => BackupError::Transfer(msg),
            CdnError::Timeout(msg) => BackupError::Timeout(msg),
            CdnError::NotFound(msg) => BackupError::NotFound(msg),
            CdnError::Protocol(msg) => BackupError::Protocol(msg),
            CdnError::Write { path, source } => BackupError::destination(path, source),
        }
    }
}
