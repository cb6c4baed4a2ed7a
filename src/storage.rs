//! Shared append-only log.
//!
//! A single file-backed byte store shared by every connection handler and
//! the timestamp injector. All access goes through one async mutex, and
//! every operation below holds it for its full duration:
//! - `append_only`: append at the end of the log
//! - `append_and_dump`: append, rewind, stream the whole log into a sink
//!
//! Transactions are therefore totally ordered by lock acquisition, and a
//! dump never observes bytes from another writer interleaved into it.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::buffer::BLOCK_SIZE;
use crate::error::{Error, LogOp, Result};

/// Mutex-guarded append-only log file.
pub struct SharedLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl SharedLog {
    /// Create or truncate the backing file at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(|e| Error::log(LogOp::Open, &path, e))?;

        info!(path = %path.display(), "Opened shared log");
        Ok(Arc::new(Self {
            path,
            file: Mutex::new(file),
        }))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `bytes` at the end of the log.
    ///
    /// Returns the number of bytes that actually reached the file.
    pub async fn append_only(&self, bytes: &[u8]) -> Result<usize> {
        let mut file = self.file.lock().await;
        self.append_locked(&mut file, bytes).await
    }

    /// Append `bytes`, then write the full log content from offset zero into `sink`.
    ///
    /// The lock is held across both steps. A failing `sink` yields
    /// [`Error::ClientGone`]; the lock is released either way.
    pub async fn append_and_dump<W>(&self, bytes: &[u8], sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut file = self.file.lock().await;
        self.append_locked(&mut file, bytes).await?;

        file.seek(SeekFrom::Start(0))
            .await
            .map_err(|e| Error::log(LogOp::Seek, &self.path, e))?;

        let mut block = vec![0u8; BLOCK_SIZE];
        let mut sent = 0u64;
        loop {
            let n = file
                .read(&mut block)
                .await
                .map_err(|e| Error::log(LogOp::Read, &self.path, e))?;
            if n == 0 {
                break;
            }
            sink.write_all(&block[..n]).await.map_err(Error::ClientGone)?;
            sent += n as u64;
        }
        sink.flush().await.map_err(Error::ClientGone)?;

        trace!(sent, "Dumped shared log");
        Ok(sent)
    }

    /// Write `bytes` at the end of the file. The caller holds the lock.
    async fn append_locked(&self, file: &mut File, bytes: &[u8]) -> Result<usize> {
        file.seek(SeekFrom::End(0))
            .await
            .map_err(|e| Error::log(LogOp::Seek, &self.path, e))?;

        let mut written = 0;
        while written < bytes.len() {
            let n = file
                .write(&bytes[written..])
                .await
                .map_err(|e| Error::log(LogOp::Append, &self.path, e))?;
            if n == 0 {
                break;
            }
            written += n;
        }
        file.flush()
            .await
            .map_err(|e| Error::log(LogOp::Append, &self.path, e))?;

        if written < bytes.len() {
            // Not retried: the missing tail is lost.
            warn!(written, expected = bytes.len(), "Short write to shared log");
        }
        Ok(written)
    }

    /// Remove the backing file. Waits for any transaction in progress.
    pub async fn close(&self) {
        let _file = self.file.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!(path = %self.path.display(), "Removed shared log"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove shared log"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    async fn open_temp() -> (tempfile::TempDir, Arc<SharedLog>) {
        let dir = tempfile::tempdir().unwrap();
        let log = SharedLog::open(dir.path().join("data")).await.unwrap();
        (dir, log)
    }

    #[tokio::test]
    async fn test_open_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"stale contents\n").unwrap();

        let log = SharedLog::open(&path).await.unwrap();
        let mut out = Vec::new();
        log.append_and_dump(b"fresh\n", &mut out).await.unwrap();
        assert_eq!(out, b"fresh\n");
    }

    #[tokio::test]
    async fn test_open_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = SharedLog::open(dir.path().join("nope").join("data"))
            .await
            .err()
            .unwrap();
        assert!(err.is_fatal());
        assert!(matches!(err, Error::Log { op: LogOp::Open, .. }));
    }

    #[tokio::test]
    async fn test_append_and_dump_returns_whole_log() {
        let (_dir, log) = open_temp().await;

        assert_eq!(log.append_only(b"first\n").await.unwrap(), 6);

        let mut out = Vec::new();
        let sent = log.append_and_dump(b"second\n", &mut out).await.unwrap();
        assert_eq!(out, b"first\nsecond\n");
        assert_eq!(sent, 13);

        // The read cursor was left at the end; the next append must still land at the end.
        log.append_only(b"third\n").await.unwrap();
        let mut out = Vec::new();
        log.append_and_dump(b"fourth\n", &mut out).await.unwrap();
        assert_eq!(out, b"first\nsecond\nthird\nfourth\n");
    }

    #[tokio::test]
    async fn test_dump_spans_multiple_blocks() {
        let (_dir, log) = open_temp().await;

        let mut packet = vec![b'x'; BLOCK_SIZE * 3 + 17];
        packet.push(b'\n');

        let mut out = Vec::new();
        log.append_and_dump(&packet, &mut out).await.unwrap();
        assert_eq!(out, packet);
    }

    #[tokio::test]
    async fn test_client_gone_releases_lock() {
        let (_dir, log) = open_temp().await;

        let mut sink = tokio_test::io::Builder::new()
            .write_error(io::Error::from(io::ErrorKind::BrokenPipe))
            .build();
        let err = log.append_and_dump(b"hello\n", &mut sink).await.unwrap_err();
        assert!(matches!(err, Error::ClientGone(_)));
        assert!(!err.is_fatal());

        // The packet was appended before the dump failed, and the lock is free again.
        log.append_only(b"world\n").await.unwrap();
        let mut out = Vec::new();
        log.append_and_dump(b"", &mut out).await.unwrap();
        assert_eq!(out, b"hello\nworld\n");
    }

    #[tokio::test]
    async fn test_concurrent_appends_never_interleave() {
        let (_dir, log) = open_temp().await;

        let mut tasks = Vec::new();
        for i in 0..16u8 {
            let log = Arc::clone(&log);
            tasks.push(tokio::spawn(async move {
                let mut line = vec![b'a' + i; 3000];
                line.push(b'\n');
                log.append_only(&line).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut out = Vec::new();
        log.append_and_dump(b"", &mut out).await.unwrap();

        let lines: Vec<&[u8]> = out.split(|&b| b == b'\n').filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 16);
        for line in lines {
            assert_eq!(line.len(), 3000);
            assert!(line.iter().all(|&b| b == line[0]));
        }
    }

    #[tokio::test]
    async fn test_close_removes_file() {
        let (_dir, log) = open_temp().await;
        log.append_only(b"bye\n").await.unwrap();
        assert!(log.path().exists());

        log.close().await;
        assert!(!log.path().exists());
    }
}
