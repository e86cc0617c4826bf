//! Scratch space for encrypted and decrypted chunk files.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use ecfs_core::EcfsResult;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct TempStore {
    dir: PathBuf,
}

impl TempStore {
    pub fn new(dir: impl Into<PathBuf>) -> EcfsResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fresh, unique path: `{random}.{uuid}.{suffix}`.
    pub fn path(&self, uuid: &str, suffix: &str) -> PathBuf {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.dir.join(format!("{id}.{uuid}.{suffix}"))
    }

    /// Remove files in the temp dir older than `max_age`. Returns the count.
    pub async fn cleanup(&self, max_age: Duration) -> EcfsResult<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let stamp = meta.created().or_else(|_| meta.modified());
            let age = stamp
                .ok()
                .and_then(|t| now.duration_since(t).ok())
                .unwrap_or_default();
            if age >= max_age {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %entry.path().display(), "temp cleanup: {e}"),
                }
            }
        }
        debug!(removed, dir = %self.dir.display(), "temp cleanup finished");
        Ok(removed)
    }
}

/// Remove a scratch file, ignoring a missing one.
pub(crate) async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), "removing temp file: {e}");
        }
    }
}
