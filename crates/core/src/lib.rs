pub mod archive;
pub mod backend;
pub mod config;
pub mod error;
pub mod history;
pub mod locks;
pub mod object;
pub mod orchestrator;

pub use config::{BackendKind, BackendSettings, ConfigKey, ConfigMap, ConfigSource};
pub use error::{BackupError, ErrorKind, Result};
pub use history::{HistoryLog, HistoryRecord};
pub use object::{BackupObject, ObjectKind};
pub use orchestrator::{BackupOutcome, BackupRequest, DownloadOutcome, DownloadRequest, Orchestrator};
