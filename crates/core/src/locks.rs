use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

type Slot = Arc<tokio::sync::Mutex<()>>;

/// One async lock per local path. Calls that would write the same archive or
/// download target run one after the other.
#[derive(Debug, Default, Clone)]
pub struct KeyLocks {
    slots: Arc<Mutex<HashMap<PathBuf, Slot>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lock on `path`. Spellings of the same file (relative,
    /// absolute, through `..` or a symlinked directory) share one lock.
    pub async fn acquire(&self, path: &Path) -> KeyGuard {
        let path = normalize(path);
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(path.clone()).or_default().clone()
        };
        let guard = slot.lock_owned().await;
        KeyGuard {
            path,
            slots: Arc::clone(&self.slots),
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// The file itself may not exist yet, so only its directory is resolved.
fn normalize(path: &Path) -> PathBuf {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return path.to_path_buf();
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    match std::fs::canonicalize(parent) {
        Ok(dir) => dir.join(name),
        Err(_) => std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
    }
}

pub struct KeyGuard {
    path: PathBuf,
    slots: Arc<Mutex<HashMap<PathBuf, Slot>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // release before checking whether anyone else still holds the slot
        drop(self.guard.take());
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get(&self.path) {
            if Arc::strong_count(slot) == 1 {
                slots.remove(&self.path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_path_is_serialized() {
        let locks = KeyLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let locks = locks.clone();
            let inside = Arc::clone(&inside);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                let _guard = locks.acquire(Path::new("work/data.tgz")).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_paths_do_not_block() {
        let locks = KeyLocks::new();
        let _a = locks.acquire(Path::new("a.gz")).await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.acquire(Path::new("b.gz"))).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn spellings_of_one_file_share_a_lock() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let locks = KeyLocks::new();

        let _held = locks.acquire(&dir.path().join("data.tgz")).await;
        let other = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire(&dir.path().join("sub/../data.tgz")),
        )
        .await;

        assert!(other.is_err());
        assert_eq!(locks.len(), 1);
    }
}
