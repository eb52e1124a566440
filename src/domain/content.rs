//! Content records addressed by a `(host, path)` pair.

use bytes::Bytes;
use time::OffsetDateTime;
use uuid::Uuid;

/// Separator used by logical paths. A trailing one marks a folder.
pub const LOGICAL_SEPARATOR: char = '/';

/// The unit of storage: an addressed byte payload plus provenance metadata.
///
/// Callers construct a record with `host` and `path` (and optionally `data`)
/// set; stores populate the remaining fields on retrieval and mint fresh
/// version identifiers on save. Stores never hold on to a record after
/// returning it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentRecord {
    /// Namespace partition. Empty means "use the configured default host".
    pub host: String,
    /// Logical address, forward-slash separated. Trailing slash marks a
    /// folder (a listable container, never opened as a stream).
    pub path: String,
    /// Version identifier minted on every successful save.
    pub data_id: Option<Uuid>,
    /// Byte payload. Absent when only metadata was requested.
    pub data: Option<Bytes>,
    /// Payload size in bytes.
    pub data_length: Option<i64>,
    pub create_date: Option<OffsetDateTime>,
    pub modify_date: Option<OffsetDateTime>,
    pub create_by: Option<String>,
    pub modify_by: Option<String>,
}

impl ContentRecord {
    /// Construct an address-only record.
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Construct a record carrying a payload, ready to save.
    pub fn with_data(host: impl Into<String>, path: impl Into<String>, data: Bytes) -> Self {
        let data_length = Some(data.len() as i64);
        Self {
            host: host.into(),
            path: path.into(),
            data: Some(data),
            data_length,
            ..Self::default()
        }
    }

    /// Whether the record names a folder rather than a leaf item.
    #[must_use]
    pub fn is_folder(&self) -> bool {
        self.path.ends_with(LOGICAL_SEPARATOR)
    }

    /// Host used for physical resolution; empty hosts fall back to the
    /// store's configured default.
    #[must_use]
    pub fn effective_host<'a>(&'a self, default_host: &'a str) -> &'a str {
        if self.host.is_empty() {
            default_host
        } else {
            &self.host
        }
    }

    /// Timestamp driving mirror staleness comparisons: the modify date, or
    /// the create date when no modification has been recorded.
    #[must_use]
    pub fn freshness_marker(&self) -> Option<OffsetDateTime> {
        self.modify_date.or(self.create_date)
    }

    /// The final path segment, without any folder marker.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.path
            .trim_end_matches(LOGICAL_SEPARATOR)
            .rsplit(LOGICAL_SEPARATOR)
            .next()
            .unwrap_or_default()
    }

    /// Derive a child record for a folder listing entry. The child's path is
    /// the parent path plus `name`, suffixed with a separator for folders.
    #[must_use]
    pub fn child(&self, name: &str, folder: bool) -> ContentRecord {
        let mut path = self.path.clone();
        if !path.ends_with(LOGICAL_SEPARATOR) {
            path.push(LOGICAL_SEPARATOR);
        }
        path.push_str(name);
        if folder {
            path.push(LOGICAL_SEPARATOR);
        }
        ContentRecord {
            host: self.host.clone(),
            path,
            ..Self::default()
        }
    }
}
