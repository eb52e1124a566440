//! Filesystem-backed content storage.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;
use tokio::fs::{self, File};
use tracing::warn;
use uuid::Uuid;

use crate::application::store::{ContentStore, StoreError};
use crate::domain::content::ContentRecord;
use crate::domain::path::{self, ResolvedPath};
use crate::util::fs::{PathLocks, write_atomic};

/// Content store over a directory tree rooted at a configured base path.
///
/// Layout is `root/host/logical/path`; every operation resolves through
/// [`path::resolve`] before touching the filesystem. Writes are atomic and
/// serialized per resolved path; reads open plain shared-read handles so
/// concurrent readers and writers never block each other.
#[derive(Debug)]
pub struct FileContentStore {
    root: PathBuf,
    default_host: String,
    locks: PathLocks,
}

impl FileContentStore {
    /// The root directory must already exist; construction never creates it.
    pub fn new(
        root: impl Into<PathBuf>,
        default_host: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let root = root.into();
        if root.as_os_str().is_empty() {
            return Err(StoreError::configuration("storage root is required"));
        }
        if !root.is_dir() {
            return Err(StoreError::configuration(format!(
                "storage root does not exist: {}",
                root.display()
            )));
        }
        Ok(Self {
            root,
            default_host: default_host.into(),
            locks: PathLocks::new(),
        })
    }

    fn resolve(&self, record: &ContentRecord) -> Result<ResolvedPath, StoreError> {
        let host = record.effective_host(&self.default_host);
        Ok(path::resolve(&self.root, host, &record.path)?)
    }

    /// Post-resolution double check used by the silently-degrading
    /// operations.
    fn within_root(&self, candidate: &Path) -> bool {
        path::is_contained(&self.root, candidate)
    }
}

#[async_trait]
impl ContentStore for FileContentStore {
    async fn exists(&self, record: &ContentRecord) -> Result<bool, StoreError> {
        let resolved = self.resolve(record)?;
        Ok(match fs::metadata(resolved.as_path()).await {
            Ok(metadata) => {
                if resolved.is_folder() {
                    metadata.is_dir()
                } else {
                    metadata.is_file()
                }
            }
            Err(_) => false,
        })
    }

    async fn retrieve(
        &self,
        record: &mut ContentRecord,
        include_data: bool,
    ) -> Result<(), StoreError> {
        let resolved = self.resolve(record)?;
        if resolved.is_folder() {
            return Ok(());
        }

        let metadata = match fs::metadata(resolved.as_path()).await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => return Ok(()),
        };
        record.modify_date = metadata.modified().ok().map(OffsetDateTime::from);
        record.create_date = metadata.created().ok().map(OffsetDateTime::from);
        record.data_length = Some(metadata.len() as i64);

        if include_data {
            let data = fs::read(resolved.as_path()).await?;
            record.data_length = Some(data.len() as i64);
            record.data = Some(Bytes::from(data));
        }
        Ok(())
    }

    async fn open(&self, record: &ContentRecord) -> Result<Option<File>, StoreError> {
        let resolved = self.resolve(record)?;
        if resolved.is_folder() {
            return Ok(None);
        }
        match File::open(resolved.as_path()).await {
            Ok(file) => Ok(Some(file)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    async fn save(&self, record: &mut ContentRecord) -> Result<(), StoreError> {
        let resolved = self.resolve(record)?;
        if resolved.is_folder() {
            return Err(StoreError::invalid_argument(
                "folders cannot be saved as content",
            ));
        }
        let Some(data) = record.data.clone() else {
            return Err(StoreError::invalid_argument("save requires a data payload"));
        };

        let target = resolved.as_path();
        let parent = target.parent().unwrap_or(&self.root);
        if !self.within_root(parent) {
            warn!(
                target = "infra::file_store",
                op = "save",
                result = "outside_root",
                path = %target.display(),
                "Resolved parent escapes the storage root; save skipped"
            );
            return Ok(());
        }

        let _guard = self.locks.acquire(target).await;
        write_atomic(target, &data).await?;

        let now = OffsetDateTime::now_utc();
        record.data_id = Some(Uuid::new_v4());
        record.data_length = Some(data.len() as i64);
        record.modify_date = Some(now);
        if record.create_date.is_none() {
            record.create_date = Some(now);
        }
        Ok(())
    }

    async fn remove(&self, record: &ContentRecord) -> Result<(), StoreError> {
        let resolved = self.resolve(record)?;
        let target = resolved.as_path();
        if !self.within_root(target) {
            warn!(
                target = "infra::file_store",
                op = "remove",
                result = "outside_root",
                path = %target.display(),
                "Resolved path escapes the storage root; remove skipped"
            );
            return Ok(());
        }

        if resolved.is_folder() {
            match fs::remove_dir_all(target).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => Err(StoreError::Io(err)),
            }
        } else {
            match fs::metadata(target).await {
                Ok(metadata) if metadata.is_file() => match fs::remove_file(target).await {
                    Ok(()) => Ok(()),
                    Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                    Err(err) => Err(StoreError::Io(err)),
                },
                _ => Ok(()),
            }
        }
    }

    async fn list(&self, record: &ContentRecord) -> Result<Vec<ContentRecord>, StoreError> {
        if !record.is_folder() {
            return Ok(Vec::new());
        }
        let resolved = self.resolve(record)?;
        if !self.within_root(resolved.as_path()) {
            warn!(
                target = "infra::file_store",
                op = "list",
                result = "outside_root",
                path = %resolved.as_path().display(),
                "Resolved path escapes the storage root; returning empty listing"
            );
            return Ok(Vec::new());
        }

        let mut entries = match fs::read_dir(resolved.as_path()).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::Io(err)),
        };

        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry.file_type().await?;
            let mut child = record.child(&name, file_type.is_dir());
            if let Ok(metadata) = entry.metadata().await {
                child.modify_date = metadata.modified().ok().map(OffsetDateTime::from);
                child.create_date = metadata.created().ok().map(OffsetDateTime::from);
                if !file_type.is_dir() {
                    child.data_length = Some(metadata.len() as i64);
                }
            }
            children.push(child);
        }
        children.sort_by(|a, b| (!a.is_folder(), &a.path).cmp(&(!b.is_folder(), &b.path)));
        Ok(children)
    }
}
