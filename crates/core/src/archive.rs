use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::debug;

use crate::error::{BackupError, Result};
use crate::locks::KeyGuard;

type ArchiveWriter = Cancellable<GzEncoder<BufWriter<File>>>;

/// Gzip `source` into a new file at `dest`. Returns the archive size.
///
/// The archive is complete and synced to disk when this returns. On failure
/// nothing is left at `dest`. Dropping the returned future stops the work at
/// the next write and removes the partial archive; `lock` is held until that
/// cleanup is done.
pub async fn compress_file(source: &Path, dest: &Path, lock: Arc<KeyGuard>) -> Result<u64> {
    let source = source.to_path_buf();
    let dest = dest.to_path_buf();
    run_blocking(lock, move |stop| {
        let meta = fs::metadata(&source).map_err(|_| BackupError::SourceNotFound(source.clone()))?;
        if !meta.is_file() {
            return Err(BackupError::SourceNotFound(source));
        }
        let mut input =
            File::open(&source).map_err(|_| BackupError::SourceNotFound(source.clone()))?;

        let size = write_archive(&dest, stop, |enc| {
            io::copy(&mut input, enc)
                .map(|_| ())
                .map_err(|e| BackupError::codec(format!("reading {}", source.display()), e))
        })?;
        debug!(source = %source.display(), archive = %dest.display(), bytes = size, "file compressed");
        Ok(size)
    })
    .await
}

/// Write the children of `source` as a gzip-compressed tar at `dest`, with
/// entry paths relative to `source`. Same guarantees as [`compress_file`].
pub async fn compress_directory(source: &Path, dest: &Path, lock: Arc<KeyGuard>) -> Result<u64> {
    let source = source.to_path_buf();
    let dest = dest.to_path_buf();
    run_blocking(lock, move |stop| {
        if !source.is_dir() {
            return Err(BackupError::SourceNotFound(source));
        }
        let mut children = fs::read_dir(&source)
            .and_then(|rd| rd.collect::<io::Result<Vec<_>>>())
            .map_err(|e| BackupError::codec(format!("listing {}", source.display()), e))?;
        children.sort_by_key(|entry| entry.file_name());

        let size = write_archive(&dest, stop, |enc| {
            // the archive may be written inside the directory being archived
            let own = fs::canonicalize(&dest).ok();
            let mut tar = tar::Builder::new(enc);
            for child in &children {
                let path = child.path();
                if own.is_some() && fs::canonicalize(&path).ok() == own {
                    continue;
                }
                append_entry(&mut tar, &path, Path::new(&child.file_name()))?;
            }
            tar.finish()
                .map_err(|e| BackupError::codec("finishing tar stream", e))
        })?;
        debug!(
            source = %source.display(),
            archive = %dest.display(),
            entries = children.len(),
            bytes = size,
            "directory compressed"
        );
        Ok(size)
    })
    .await
}

fn append_entry<W: Write>(tar: &mut tar::Builder<W>, path: &Path, name: &Path) -> Result<()> {
    let meta = fs::metadata(path).map_err(|e| BackupError::codec(path.display(), e))?;
    let res = if meta.is_dir() {
        tar.append_dir_all(name, path)
    } else {
        tar.append_path_with_name(path, name)
    };
    res.map_err(|e| BackupError::codec(format!("adding {}", path.display()), e))
}

fn write_archive<F>(dest: &Path, stop: Arc<AtomicBool>, fill: F) -> Result<u64>
where
    F: FnOnce(&mut ArchiveWriter) -> Result<()>,
{
    let file = File::create(dest)
        .map_err(|e| BackupError::codec(format!("creating {}", dest.display()), e))?;
    let mut enc = Cancellable {
        inner: GzEncoder::new(BufWriter::new(file), Compression::default()),
        stop,
    };

    let finished = fill(&mut enc).and_then(|()| finish(enc, dest));
    if finished.is_err() {
        let _ = fs::remove_file(dest);
    }
    finished
}

fn finish(enc: ArchiveWriter, dest: &Path) -> Result<u64> {
    let codec = |e| BackupError::codec(format!("writing {}", dest.display()), e);
    let file = enc
        .inner
        .finish()
        .and_then(|buf| buf.into_inner().map_err(io::IntoInnerError::into_error))
        .map_err(codec)?;
    file.sync_all().map_err(codec)?;
    Ok(file.metadata().map_err(codec)?.len())
}

/// Fails every write once `stop` is set.
struct Cancellable<W> {
    inner: W,
    stop: Arc<AtomicBool>,
}

impl<W: Write> Cancellable<W> {
    fn check(&self) -> io::Result<()> {
        if self.stop.load(Ordering::Relaxed) {
            return Err(io::Error::other("archive cancelled"));
        }
        Ok(())
    }
}

impl<W: Write> Write for Cancellable<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check()?;
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check()?;
        self.inner.flush()
    }
}

struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

async fn run_blocking<T, F>(lock: Arc<KeyGuard>, job: F) -> Result<T>
where
    F: FnOnce(Arc<AtomicBool>) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let _stop_on_drop = StopOnDrop(Arc::clone(&stop));
    tokio::task::spawn_blocking(move || {
        let _lock = lock;
        job(stop)
    })
    .await
    .map_err(|e| BackupError::CodecIo(format!("archive task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::locks::KeyLocks;
    use flate2::read::GzDecoder;
    use std::collections::BTreeMap;
    use std::io::Read;

    async fn lock(dest: &Path) -> Arc<KeyGuard> {
        Arc::new(KeyLocks::new().acquire(dest).await)
    }

    fn unpack(archive: &Path) -> BTreeMap<String, Vec<u8>> {
        let mut tar = tar::Archive::new(GzDecoder::new(File::open(archive).unwrap()));
        let mut files = BTreeMap::new();
        for entry in tar.entries().unwrap() {
            let mut entry = entry.unwrap();
            if entry.header().entry_type().is_file() {
                let name = entry.path().unwrap().to_string_lossy().into_owned();
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                files.insert(name, data);
            }
        }
        files
    }

    #[tokio::test]
    async fn file_round_trips_through_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("file2.txt");
        let content: Vec<u8> = b"line of backup data\n".repeat(5000);
        fs::write(&source, &content).unwrap();
        let dest = dir.path().join("file2.txt.gz");

        let size = compress_file(&source, &dest, lock(&dest).await).await.unwrap();
        assert_eq!(size, fs::metadata(&dest).unwrap().len());
        assert!(size < content.len() as u64);

        let mut out = Vec::new();
        GzDecoder::new(File::open(&dest).unwrap())
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, content);
    }

    #[tokio::test]
    async fn missing_or_wrong_sources() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.gz");

        let err = compress_file(&dir.path().join("nope.txt"), &dest, lock(&dest).await)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceNotFound);
        assert!(!dest.exists());

        // a directory is not a file source, and vice versa
        let err = compress_file(dir.path(), &dest, lock(&dest).await).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceNotFound);

        let file = dir.path().join("plain.txt");
        fs::write(&file, "x").unwrap();
        let out = dir.path().join("out.tgz");
        let err = compress_directory(&file, &out, lock(&out).await)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceNotFound);
    }

    #[tokio::test]
    async fn directory_entries_are_relative() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("data");
        fs::create_dir_all(source.join("nested/deeper")).unwrap();
        fs::write(source.join("a.txt"), "alpha").unwrap();
        fs::write(source.join("nested/b.txt"), "beta").unwrap();
        fs::write(source.join("nested/deeper/c.bin"), [0u8, 1, 2, 3]).unwrap();
        let dest = dir.path().join("data.tgz");

        compress_directory(&source, &dest, lock(&dest).await).await.unwrap();

        let files = unpack(&dest);
        let names: Vec<_> = files.keys().cloned().collect();
        assert_eq!(names, vec!["a.txt", "nested/b.txt", "nested/deeper/c.bin"]);
        assert_eq!(files["nested/deeper/c.bin"], vec![0u8, 1, 2, 3]);
    }

    #[tokio::test]
    async fn empty_directory_gives_empty_archive() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("empty");
        fs::create_dir(&source).unwrap();
        let dest = dir.path().join("empty.tgz");

        compress_directory(&source, &dest, lock(&dest).await).await.unwrap();
        assert!(unpack(&dest).is_empty());
    }

    #[tokio::test]
    async fn archive_inside_source_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("keep.txt"), "k").unwrap();
        let dest = dir.path().join("self.tgz");

        compress_directory(dir.path(), &dest, lock(&dest).await).await.unwrap();

        let names: Vec<_> = unpack(&dest).into_keys().collect();
        assert_eq!(names, vec!["keep.txt"]);
    }

    #[tokio::test]
    async fn unwritable_destination_is_codec_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("f.txt");
        fs::write(&source, "x").unwrap();

        let dest = dir.path().join("no/such/dir/f.txt.gz");
        let err = compress_file(&source, &dest, lock(&dest).await)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CodecIo);
    }

    #[tokio::test]
    async fn dropped_call_stops_and_cleans_up_before_unlocking() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("noise.bin");
        let mut state = 0x9e37_79b9_7f4a_7c15u64;
        let noise: Vec<u8> = (0..32 << 20)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect();
        fs::write(&source, noise).unwrap();
        let dest = dir.path().join("noise.bin.gz");

        let locks = KeyLocks::new();
        let guard = Arc::new(locks.acquire(&dest).await);
        let call = compress_file(&source, &dest, guard);
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(20), call)
                .await
                .is_err()
        );

        // the lock comes back only once the blocking job has finished
        let _again = locks.acquire(&dest).await;
        assert!(!dest.exists());
    }
}
