use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::config::BackendKind;
use crate::error::BackupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    BackupFile,
    BackupDirectory,
    Download,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::BackupFile => write!(f, "backup-file"),
            Operation::BackupDirectory => write!(f, "backup-directory"),
            Operation::Download => write!(f, "download"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub name: String,
    pub key: Option<String>,
    pub backend: Option<BackendKind>,
    pub status: Status,
    pub error: Option<String>,
}

impl HistoryRecord {
    pub fn succeeded(operation: Operation, name: &str, key: &str, backend: BackendKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            operation,
            name: name.to_string(),
            key: Some(key.to_string()),
            backend: Some(backend),
            status: Status::Succeeded,
            error: None,
        }
    }

    pub fn failed(operation: Operation, name: &str, error: &BackupError) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            operation,
            name: name.to_string(),
            key: None,
            backend: None,
            status: Status::Failed,
            error: Some(error.to_string()),
        }
    }

    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }
}

/// Append-only JSON-lines log of completed operations.
pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &HistoryRecord) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }

    /// Records, newest first. A missing log is empty.
    pub fn list(&self) -> io::Result<Vec<HistoryRecord>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut records: Vec<HistoryRecord> = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(n, line)| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(path = %self.path.display(), line = n + 1, error = %e, "Skipping malformed history line");
                    None
                }
            })
            .collect();
        records.reverse();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn append_then_list_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let log = HistoryLog::new(dir.path().join("nested/history.jsonl"));

        let mut older =
            HistoryRecord::succeeded(Operation::BackupFile, "file2.txt", "file2.txt.gz", BackendKind::ObjectStore);
        older.timestamp -= Duration::minutes(5);
        let newer = HistoryRecord::failed(
            Operation::Download,
            "data.tgz",
            &BackupError::NotFound("data.tgz".into()),
        );
        log.append(&older).unwrap();
        log.append(&newer).unwrap();

        let records = log.list().unwrap();
        assert_eq!(records, vec![newer, older]);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let record = HistoryRecord::succeeded(Operation::BackupDirectory, "data", "k-1", BackendKind::Http);
        let mut text = serde_json::to_string(&record).unwrap();
        text.push_str("\n{not json\n\n");
        std::fs::write(&path, text).unwrap();

        let records = HistoryLog::new(&path).list().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation, Operation::BackupDirectory);
    }

    #[test]
    fn missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = HistoryLog::new(dir.path().join("none.jsonl"));
        assert!(log.list().unwrap().is_empty());
    }

    #[test]
    fn short_id_is_a_prefix() {
        let record = HistoryRecord::succeeded(Operation::Download, "a", "a", BackendKind::Http);
        assert_eq!(record.short_id().len(), 8);
        assert!(record.id.simple().to_string().starts_with(&record.short_id()));
    }

    #[test]
    fn serialized_shape() {
        let record = HistoryRecord::succeeded(Operation::BackupFile, "a", "a.gz", BackendKind::ObjectStore);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["operation"], "backup-file");
        assert_eq!(value["status"], "succeeded");
        assert_eq!(value["backend"], "OBJECT_STORE");
    }
}
