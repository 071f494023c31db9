use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fs4::fs_std::FileExt;
use sha2::{Digest, Sha256};
use tokio_retry::strategy::ExponentialBackoff;

use crate::config::paths::LOCKS_DIR_NAME;
use crate::error::ResourceError;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);
const STARTING_BACKOFF_DELAY_MS: u64 = 10;
const MAX_BACKOFF_DELAY_MS: u64 = 500;

/// Exclusive cross-process lock on one installation target.
///
/// Held for the duration of an install/update/remove and released on drop. The lock file
/// is never unlinked, so every contender locks the same inode.
#[derive(Debug)]
pub struct InstallLock {
    _file: Arc<File>,
    lock_path: PathBuf,
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        tracing::debug!(lock = %self.lock_path.display(), "Install lock released");
    }
}

impl InstallLock {
    /// Lock file for `key` under `<scope_base>/.locks/`.
    pub fn lock_path(scope_base: &Path, key: &str) -> PathBuf {
        scope_base
            .join(LOCKS_DIR_NAME)
            .join(format!("{}.lock", short_hash(key)))
    }

    pub async fn acquire(scope_base: &Path, key: &str) -> Result<Self, ResourceError> {
        Self::acquire_with_timeout(scope_base, key, DEFAULT_LOCK_TIMEOUT).await
    }

    pub async fn acquire_with_timeout(
        scope_base: &Path,
        key: &str,
        timeout: Duration,
    ) -> Result<Self, ResourceError> {
        let lock_path = Self::lock_path(scope_base, key);
        if let Some(parent) = lock_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let open_path = lock_path.clone();
        let file = tokio::task::spawn_blocking(move || {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&open_path)
        })
        .await
        .map_err(|e| ResourceError::Lock(format!("lock task failed: {e}")))??;
        let file = Arc::new(file);

        tracing::debug!(lock = %lock_path.display(), %key, "Waiting for install lock");
        let start = Instant::now();
        let backoff = ExponentialBackoff::from_millis(STARTING_BACKOFF_DELAY_MS)
            .max_delay(Duration::from_millis(MAX_BACKOFF_DELAY_MS));

        for delay in backoff {
            let candidate = Arc::clone(&file);
            let locked = tokio::task::spawn_blocking(move || candidate.try_lock_exclusive())
                .await
                .map_err(|e| ResourceError::Lock(format!("lock task failed: {e}")))?;

            if let Ok(true) = locked {
                tracing::debug!(
                    lock = %lock_path.display(),
                    wait_ms = start.elapsed().as_millis(),
                    "Install lock acquired"
                );
                return Ok(Self {
                    _file: file,
                    lock_path,
                });
            }

            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(delay.min(remaining)).await;
        }

        Err(ResourceError::Lock(format!(
            "Timeout acquiring install lock for '{key}' after {timeout:?}"
        )))
    }
}

/// First 16 hex chars of the SHA-256 of `value`.
pub(crate) fn short_hash(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_acquire_and_release() {
        let tmp = tempfile::tempdir().unwrap();
        let path = InstallLock::lock_path(tmp.path(), "npm:foo");
        {
            let _lock = InstallLock::acquire(tmp.path(), "npm:foo").await.unwrap();
            assert!(path.exists());
        }
        assert!(path.exists());
        InstallLock::acquire_with_timeout(tmp.path(), "npm:foo", Duration::from_millis(200))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_release_hands_lock_to_waiter_and_excludes_newcomer() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().to_path_buf();
        let key = "npm:foo";
        let first = InstallLock::acquire(&base, key).await.unwrap();

        let waiter_base = base.clone();
        let waiter = tokio::spawn(async move {
            InstallLock::acquire_with_timeout(&waiter_base, key, Duration::from_secs(5)).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(first);
        let second = waiter.await.unwrap().unwrap();

        let newcomer =
            InstallLock::acquire_with_timeout(&base, key, Duration::from_millis(200)).await;
        assert!(matches!(newcomer, Err(ResourceError::Lock(_))));

        drop(second);
        InstallLock::acquire_with_timeout(&base, key, Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_second_acquire_times_out_while_held() {
        let tmp = tempfile::tempdir().unwrap();
        let _held = InstallLock::acquire(tmp.path(), "git:github.com/a/b")
            .await
            .unwrap();
        let result = InstallLock::acquire_with_timeout(
            tmp.path(),
            "git:github.com/a/b",
            Duration::from_millis(100),
        )
        .await;
        assert!(matches!(result, Err(ResourceError::Lock(_))));
    }

    #[test]
    fn test_short_hash_is_stable() {
        assert_eq!(short_hash("npm:foo"), short_hash("npm:foo"));
        assert_ne!(short_hash("npm:foo"), short_hash("npm:bar"));
        assert_eq!(short_hash("npm:foo").len(), 16);
    }
}
