use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

/// 跨进程写锁（数据目录下的锁文件）
///
/// Every open takes its own file description, so two lockers in one process
/// exclude each other the same way two processes do.
pub struct WriteLock {
    path: PathBuf,
}

/// Held for the duration of one write; released on drop.
#[derive(Debug)]
pub struct WriteLockGuard {
    file: File,
}

impl WriteLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open(&self) -> Result<File> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .with_context(|| format!("failed to open lock file {}", self.path.display()))
    }

    /// Waits until no other writer holds the lock.
    pub async fn acquire(&self) -> Result<WriteLockGuard> {
        let file = self.open()?;
        debug!("waiting for {}", self.path.display());
        let file = tokio::task::spawn_blocking(move || file.lock_exclusive().map(|_| file))
            .await?
            .with_context(|| format!("failed to lock {}", self.path.display()))?;
        Ok(WriteLockGuard { file })
    }

    /// `None` when another writer currently holds the lock.
    pub fn try_acquire(&self) -> Result<Option<WriteLockGuard>> {
        let file = self.open()?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(WriteLockGuard { file })),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == fs2::lock_contended_error().kind() => {
                Ok(None)
            }
            Err(e) => Err(e).with_context(|| format!("failed to lock {}", self.path.display())),
        }
    }
}

impl Drop for WriteLockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            debug!("unlock failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn second_locker_is_refused_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = WriteLock::new(dir.path().join("data").join(".ingest.lock"));

        let guard = lock.try_acquire().unwrap().expect("first locker");
        assert!(lock.try_acquire().unwrap().is_none());

        drop(guard);
        assert!(lock.try_acquire().unwrap().is_some());
    }

    #[tokio::test]
    async fn acquire_waits_for_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".ingest.lock");
        let guard = WriteLock::new(&path).try_acquire().unwrap().unwrap();

        let waiter = tokio::spawn(async move { WriteLock::new(path).acquire().await.map(|_| ()) });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter released")
            .unwrap()
            .unwrap();
    }
}
