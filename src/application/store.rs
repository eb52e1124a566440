//! Store traits describing content persistence backends.

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs::File;

use crate::domain::content::ContentRecord;
use crate::domain::path::PathError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("store configuration invalid: {message}")]
    Configuration { message: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl StoreError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// CRUD over `(host, path)`-addressed content.
///
/// Every operation resolves the record's address against the store's
/// configured root before touching storage; resolution failures surface as
/// [`StoreError::Path`] from `exists`/`retrieve`/`save` while `remove` and
/// `list` degrade silently as documented per method.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Whether a physical artifact exists at the record's address. Folder
    /// records check for a container, leaf records for an item.
    async fn exists(&self, record: &ContentRecord) -> Result<bool, StoreError>;

    /// Populate the record's metadata from the backing store, and its payload
    /// when `include_data` is set. A missing target leaves the record
    /// untouched; it is not an error.
    async fn retrieve(
        &self,
        record: &mut ContentRecord,
        include_data: bool,
    ) -> Result<(), StoreError>;

    /// Open a shared-read stream over the disk artifact backing the record,
    /// when one exists. Returns `None` when the payload is only available in
    /// memory (no disk artifact, or no mirror configured); callers fall back
    /// to [`ContentStore::retrieve`] with `include_data` in that case.
    async fn open(&self, record: &ContentRecord) -> Result<Option<File>, StoreError>;

    /// Persist the record's payload, overwriting any previous version. Mints
    /// a fresh `data_id` and timestamps on the record. Folder records and
    /// records without a payload are rejected with
    /// [`StoreError::InvalidArgument`].
    async fn save(&self, record: &mut ContentRecord) -> Result<(), StoreError>;

    /// Delete the artifact at the record's address: the item for leaf
    /// records, the entire subtree for folder records. Missing targets and
    /// containment failures are silent no-ops.
    async fn remove(&self, record: &ContentRecord) -> Result<(), StoreError>;

    /// List the immediate children of a folder record, one entry per child
    /// item and one per child container (path suffixed with a separator).
    /// Non-folder records and containment failures yield an empty list,
    /// never an error.
    async fn list(&self, record: &ContentRecord) -> Result<Vec<ContentRecord>, StoreError>;
}

/// Version metadata access for backends that retain it.
///
/// The write path replaces the single row for a `(host, path)` address, so
/// `retrieve_history` reports at most the current version; the API shape
/// still keys payload fetches by version identifier.
#[async_trait]
pub trait ContentHistory: Send + Sync {
    /// Version metadata for the record's address, without payload bytes.
    async fn retrieve_history(
        &self,
        record: &ContentRecord,
    ) -> Result<Vec<ContentRecord>, StoreError>;

    /// Fetch payload bytes for the specific `(data_id, host, path)` triple
    /// named by the record. A missing `data_id` is
    /// [`StoreError::InvalidArgument`]; an unmatched triple leaves the
    /// record untouched.
    async fn populate_history_data(&self, record: &mut ContentRecord) -> Result<(), StoreError>;
}
