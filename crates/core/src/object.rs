use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BackupError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    File,
    Directory,
}

impl ObjectKind {
    pub fn suffix(self) -> &'static str {
        match self {
            ObjectKind::File => ".gz",
            ObjectKind::Directory => ".tgz",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKind::File => write!(f, "file"),
            ObjectKind::Directory => write!(f, "directory"),
        }
    }
}

pub fn archive_key(name: &str, kind: ObjectKind) -> String {
    format!("{name}{}", kind.suffix())
}

/// One object moving through a single backup or download call.
///
/// Fixed at construction. The key a backend finally stores the archive under
/// is returned by [`Backend::put`](crate::backend::Backend::put) rather than
/// written back here.
#[derive(Debug, Clone)]
pub struct BackupObject {
    name: String,
    key: String,
    kind: Option<ObjectKind>,
    source_path: Option<PathBuf>,
    archive_path: Option<PathBuf>,
    destination: Option<PathBuf>,
}

impl BackupObject {
    /// Entity for a backup: `name` falls back to the base name of `source`,
    /// and the archive is placed in `work_dir` under the derived key.
    pub fn for_backup(
        kind: ObjectKind,
        source: &Path,
        name: Option<&str>,
        work_dir: &Path,
    ) -> Result<Self> {
        if source.as_os_str().is_empty() {
            return Err(BackupError::InvalidRequest("path must not be empty".into()));
        }

        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => validate_name(name)?.to_string(),
            None => base_name(source)?,
        };
        let key = archive_key(&name, kind);
        let archive_path = work_dir.join(&key);

        Ok(Self {
            name,
            key,
            kind: Some(kind),
            source_path: Some(source.to_path_buf()),
            archive_path: Some(archive_path),
            destination: None,
        })
    }

    /// Entity for a download. The destination defaults to the current directory.
    pub fn for_download(key: &str, destination: Option<&Path>) -> Result<Self> {
        let key = key.trim();
        if key.is_empty() {
            return Err(BackupError::InvalidRequest("key must not be empty".into()));
        }
        let destination = destination
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            name: key.to_string(),
            key: key.to_string(),
            kind: None,
            source_path: None,
            archive_path: None,
            destination: Some(destination),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// `None` for downloads, where the stored object is opaque.
    pub fn kind(&self) -> Option<ObjectKind> {
        self.kind
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    pub fn archive_path(&self) -> Option<&Path> {
        self.archive_path.as_deref()
    }

    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }
}

fn validate_name(name: &str) -> Result<&str> {
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(BackupError::InvalidRequest(format!(
            "name `{name}` must be a plain file name"
        )));
    }
    Ok(name)
}

fn base_name(source: &Path) -> Result<String> {
    let resolved;
    let file_name = match source.file_name() {
        Some(n) => n,
        None => {
            // "." or "dir/.." have no base name of their own
            resolved = std::fs::canonicalize(source)
                .map_err(|_| BackupError::SourceNotFound(source.to_path_buf()))?;
            resolved.file_name().ok_or_else(|| {
                BackupError::InvalidRequest(format!(
                    "cannot derive a name from {}",
                    source.display()
                ))
            })?
        }
    };
    file_name.to_str().map(str::to_string).ok_or_else(|| {
        BackupError::InvalidRequest(format!("{} is not valid UTF-8", source.display()))
    })
}
