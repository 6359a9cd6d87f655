//! Cross-process mutual exclusion.
//!
//! The session store needs at most one token refresh across OS processes, so
//! the lock is an explicit interface rather than an implementation detail:
//! the file-backed default can be swapped for a different primitive without
//! touching callers.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("lock not acquired within {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Exclusive lock shared between OS processes. Acquisition is bounded; the
/// guard releases on drop.
#[async_trait::async_trait]
pub trait DistributedLock: Send + Sync {
    async fn acquire(&self, timeout: Duration) -> Result<LockGuard, LockError>;
}

/// Held lock. Dropping it releases the underlying primitive.
pub struct LockGuard {
    file: Option<File>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            // Advisory locks also release when the fd closes; unlock
            // explicitly so failure is at least observable.
            if let Err(e) = fs2::FileExt::unlock(&file) {
                debug!("lock release failed: {}", e);
            }
        }
    }
}

/// Advisory file lock: `try_lock_exclusive` polled on a fixed interval until
/// the deadline passes.
pub struct FileLock {
    path: PathBuf,
    poll_interval: Duration,
}

impl FileLock {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            poll_interval: Duration::from_millis(Config::LOCK_POLL_INTERVAL_MS),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn open_lock_file(&self) -> Result<File, LockError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Never truncate: the file may carry state owned by the lock holder.
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        Ok(file)
    }
}

#[async_trait::async_trait]
impl DistributedLock for FileLock {
    async fn acquire(&self, timeout: Duration) -> Result<LockGuard, LockError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let file = self.open_lock_file()?;
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!("acquired file lock at {}", self.path.display());
                    return Ok(LockGuard { file: Some(file) });
                }
                Err(_) if tokio::time::Instant::now() < deadline => {
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(_) => return Err(LockError::Timeout(timeout)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let lock = FileLock::new(dir.path().join("session.lock"));

        let guard = lock.acquire(Duration::from_secs(1)).await.unwrap();
        drop(guard);

        // Released lock can be re-acquired immediately
        let guard2 = lock.acquire(Duration::from_secs(1)).await.unwrap();
        drop(guard2);
    }

    #[tokio::test]
    async fn test_timeout_when_held() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.lock");

        let lock_a = FileLock::new(&path).with_poll_interval(Duration::from_millis(10));
        let lock_b = FileLock::new(&path).with_poll_interval(Duration::from_millis(10));

        let _held = lock_a.acquire(Duration::from_secs(1)).await.unwrap();

        let result = lock_b.acquire(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(LockError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_sequential_acquire_after_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.lock");

        let lock = FileLock::new(&path).with_poll_interval(Duration::from_millis(10));
        for _ in 0..3 {
            let guard = lock.acquire(Duration::from_millis(500)).await.unwrap();
            drop(guard);
        }
    }
}
