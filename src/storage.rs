//! Crash-safe JSON snapshot files
//!
//! A write goes to `<file>.tmp`, is fsynced, the previous file is copied to
//! `<file>.bak`, then the temp file is renamed over the target. Reads fall
//! back to the backup when the primary is missing or unreadable. Writes
//! through one [`SnapshotFile`] are serialized.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{CompanionError, Result};

/// Handle to one JSON snapshot on disk
#[derive(Debug)]
pub struct SnapshotFile<T> {
    path: PathBuf,
    write_lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SnapshotFile<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Create a handle for `path`; nothing is touched on disk yet
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    /// Target path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the rolling backup
    #[must_use]
    pub fn backup_path(&self) -> PathBuf {
        with_suffix(&self.path, "bak")
    }

    /// Load the snapshot, falling back to the backup
    ///
    /// Returns `Ok(None)` when neither file exists.
    ///
    /// # Errors
    /// Returns `CompanionError::Persistence` when files exist but none parses
    pub async fn load(&self) -> Result<Option<T>> {
        match read_json::<T>(&self.path).await {
            Ok(Some(value)) => return Ok(Some(value)),
            Ok(None) => {}
            Err(e) => log::warn!(
                "Snapshot {} unreadable, trying backup: {}",
                self.path.display(),
                e
            ),
        }

        let backup = self.backup_path();
        match read_json::<T>(&backup).await {
            Ok(Some(value)) => {
                log::info!("Restored snapshot from backup {}", backup.display());
                Ok(Some(value))
            }
            Ok(None) if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) => Ok(None),
            Ok(None) => Err(CompanionError::persistence(format!(
                "Snapshot {} is corrupt and no backup exists",
                self.path.display()
            ))),
            Err(e) => Err(CompanionError::persistence(format!(
                "Snapshot {} and its backup are unreadable: {e}",
                self.path.display()
            ))),
        }
    }

    /// Atomically replace the snapshot with `value`
    ///
    /// # Errors
    /// Returns `CompanionError::Persistence` on any I/O failure; the previous
    /// snapshot is left intact in that case
    pub async fn save(&self, value: &T) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_atomic(&bytes).await.map_err(|e| {
            CompanionError::persistence(format!("Failed to write {}: {e}", self.path.display()))
        })
    }

    async fn write_atomic(&self, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = with_suffix(&self.path, "tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        if tokio::fs::try_exists(&self.path).await? {
            // Backup failure must not block the write itself
            if let Err(e) = tokio::fs::copy(&self.path, self.backup_path()).await {
                log::warn!("Failed to back up {}: {}", self.path.display(), e);
            }
        }

        tokio::fs::rename(&tmp, &self.path).await
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> std::io::Result<Option<T>> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::<Vec<u32>>::new(dir.path().join("nested").join("s.json"));
        assert_eq!(file.load().await.unwrap(), None);
        file.save(&vec![1, 2]).await.unwrap();
        file.save(&vec![3]).await.unwrap();
        assert_eq!(file.load().await.unwrap(), Some(vec![3]));
        assert!(file.backup_path().exists());
    }

    #[tokio::test]
    async fn corrupt_primary_falls_back_to_backup() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::<Vec<u32>>::new(dir.path().join("s.json"));
        file.save(&vec![1]).await.unwrap();
        file.save(&vec![2]).await.unwrap();
        std::fs::write(file.path(), b"{not json").unwrap();
        assert_eq!(file.load().await.unwrap(), Some(vec![1]));
    }

    #[tokio::test]
    async fn corrupt_without_backup_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::<Vec<u32>>::new(dir.path().join("s.json"));
        std::fs::write(file.path(), b"[1,").unwrap();
        let err = file.load().await.unwrap_err();
        assert_eq!(err.code(), "PERSISTENCE_ERROR");
    }
}
