//! Staleness-aware local disk mirror for database-backed content.
//!
//! The SQL backend is the system of record; this mirror is a derived,
//! disposable acceleration structure that lets large payloads be served
//! from shared-read file handles instead of round-tripping blobs through
//! memory on every request. Mirrored files are refreshed when missing or
//! older than the record's freshness marker, and left alone otherwise.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use metrics::counter;
use time::OffsetDateTime;
use tokio::fs::{self, File};
use tracing::{debug, info};

use crate::application::store::StoreError;
use crate::domain::content::ContentRecord;
use crate::domain::path::{self, PathError};
use crate::util::fs::{PathLocks, write_atomic};

#[derive(Debug)]
pub struct LocalCacheMirror {
    root: PathBuf,
    default_host: String,
    locks: PathLocks,
}

impl LocalCacheMirror {
    /// The mirror root must already exist; construction never creates it.
    pub fn new(
        root: impl Into<PathBuf>,
        default_host: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let root = root.into();
        if root.as_os_str().is_empty() {
            return Err(StoreError::configuration("mirror root is required"));
        }
        if !root.is_dir() {
            return Err(StoreError::configuration(format!(
                "mirror root does not exist: {}",
                root.display()
            )));
        }
        Ok(Self {
            root,
            default_host: default_host.into(),
            locks: PathLocks::new(),
        })
    }

    /// Refresh the mirrored copy when missing or stale, and return its path.
    ///
    /// A mirrored file counts as fresh when it exists and its last write is
    /// not older than the record's freshness marker; records without dates
    /// treat any existing file as fresh. The record's payload (empty when
    /// absent) is what lands on disk.
    pub async fn refresh(&self, record: &ContentRecord) -> Result<PathBuf, StoreError> {
        let started_at = Instant::now();
        let target = self.mirror_path(record)?;

        if is_fresh(&target, record).await {
            counter!("teca_mirror_hit_total").increment(1);
            debug!(
                target = "infra::mirror",
                op = "refresh",
                result = "fresh",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                path = %target.display(),
                "Mirrored copy is current"
            );
            return Ok(target);
        }

        let payload = record.data.as_deref().unwrap_or_default();
        let _guard = self.locks.acquire(&target).await;
        write_atomic(&target, payload).await?;

        counter!("teca_mirror_refresh_total").increment(1);
        info!(
            target = "infra::mirror",
            op = "refresh",
            result = "rewritten",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            path = %target.display(),
            payload_bytes = payload.len(),
            "Mirrored copy rewritten"
        );
        Ok(target)
    }

    /// Refresh, then open a shared-read handle on the mirrored file.
    pub async fn open(&self, record: &ContentRecord) -> Result<File, StoreError> {
        let target = self.refresh(record).await?;
        Ok(File::open(&target).await?)
    }

    /// Same resolution contract as the file store, plus a second defense
    /// layer: parent tokens are stripped from the computed result and
    /// containment is verified again on what remains.
    fn mirror_path(&self, record: &ContentRecord) -> Result<PathBuf, StoreError> {
        let host = record.effective_host(&self.default_host);
        let resolved = path::resolve(&self.root, host, &record.path)?;

        let mut clean = PathBuf::new();
        for component in resolved.as_path().components() {
            if !matches!(component, Component::ParentDir) {
                clean.push(component.as_os_str());
            }
        }
        if !path::is_strict_descendant(&self.root, &clean) {
            return Err(StoreError::Path(PathError::EscapesRoot {
                path: clean.to_string_lossy().into_owned(),
            }));
        }
        Ok(clean)
    }
}

async fn is_fresh(target: &Path, record: &ContentRecord) -> bool {
    let metadata = match fs::metadata(target).await {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return false,
        Err(err) if err.kind() == ErrorKind::NotFound => return false,
        Err(_) => return false,
    };
    let Ok(modified) = metadata.modified() else {
        return false;
    };
    match record.freshness_marker() {
        Some(marker) => OffsetDateTime::from(modified) >= marker,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tempfile::TempDir;
    use time::Duration;

    use super::*;

    fn record_with(data: &'static [u8], modify_date: Option<OffsetDateTime>) -> ContentRecord {
        let mut record = ContentRecord::with_data("localhost", "/pages/note.txt", Bytes::from(data));
        record.modify_date = modify_date;
        record
    }

    #[tokio::test]
    async fn absent_mirror_file_is_written() {
        let dir = TempDir::new().expect("temp dir");
        let mirror = LocalCacheMirror::new(dir.path(), "localhost").expect("mirror");

        let record = record_with(b"v1", None);
        let target = mirror.refresh(&record).await.expect("refresh");
        assert_eq!(fs::read(&target).await.expect("read"), b"v1");
    }

    #[tokio::test]
    async fn fresh_mirror_file_is_not_rewritten() {
        let dir = TempDir::new().expect("temp dir");
        let mirror = LocalCacheMirror::new(dir.path(), "localhost").expect("mirror");

        let seeded = record_with(b"v1", None);
        let target = mirror.refresh(&seeded).await.expect("seed");

        // Marker older than the freshly written file: keep the mirror.
        let stale_marker = OffsetDateTime::now_utc() - Duration::hours(1);
        let update = record_with(b"v2", Some(stale_marker));
        mirror.refresh(&update).await.expect("refresh");
        assert_eq!(fs::read(&target).await.expect("read"), b"v1");
    }

    #[tokio::test]
    async fn stale_mirror_file_is_rewritten() {
        let dir = TempDir::new().expect("temp dir");
        let mirror = LocalCacheMirror::new(dir.path(), "localhost").expect("mirror");

        let seeded = record_with(b"v1", None);
        let target = mirror.refresh(&seeded).await.expect("seed");

        // Marker newer than the file on disk: the mirror must be replaced.
        let fresh_marker = OffsetDateTime::now_utc() + Duration::hours(1);
        let update = record_with(b"v2", Some(fresh_marker));
        mirror.refresh(&update).await.expect("refresh");
        assert_eq!(fs::read(&target).await.expect("read"), b"v2");
    }

    #[tokio::test]
    async fn dateless_record_trusts_an_existing_file() {
        let dir = TempDir::new().expect("temp dir");
        let mirror = LocalCacheMirror::new(dir.path(), "localhost").expect("mirror");

        let seeded = record_with(b"v1", None);
        let target = mirror.refresh(&seeded).await.expect("seed");

        let update = record_with(b"v2", None);
        mirror.refresh(&update).await.expect("refresh");
        assert_eq!(fs::read(&target).await.expect("read"), b"v1");
    }

    #[tokio::test]
    async fn missing_root_is_a_configuration_error() {
        let dir = TempDir::new().expect("temp dir");
        let missing = dir.path().join("nope");
        let err = LocalCacheMirror::new(&missing, "localhost").expect_err("must fail");
        assert!(matches!(err, StoreError::Configuration { .. }));
    }

    #[tokio::test]
    async fn traversal_in_the_address_is_neutralized() {
        let dir = TempDir::new().expect("temp dir");
        let mirror = LocalCacheMirror::new(dir.path(), "localhost").expect("mirror");

        let record =
            ContentRecord::with_data("localhost", "/../../escape.txt", Bytes::from_static(b"x"));
        let target = mirror.refresh(&record).await.expect("refresh");
        assert!(target.starts_with(dir.path()), "target: {}", target.display());
    }
}
