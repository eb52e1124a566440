//! Filesystem helpers shared by the storage backends.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Write `data` to `target` atomically.
///
/// The bytes land in a temporary sibling file first and replace the target
/// in a single rename, so a concurrent reader observes either the old
/// content or the new, never a partial write. Missing parent directories
/// are created.
pub async fn write_atomic(target: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).await?;

    let temp = parent.join(format!(".tmp-{}", Uuid::new_v4()));
    fs::write(&temp, data).await?;
    match fs::rename(&temp, target).await {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = fs::remove_file(&temp).await;
            Err(err)
        }
    }
}

/// Advisory write locks keyed by resolved physical path.
///
/// Writers to the same path serialize; writers to different paths do not
/// contend. Entries are never evicted: the set of distinct paths a process
/// writes is bounded by its content tree.
#[derive(Debug, Default, Clone)]
pub struct PathLocks {
    locks: Arc<DashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the write lock for `path`, waiting behind other writers.
    pub async fn acquire(&self, path: &Path) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}
