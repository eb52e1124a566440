//! Shared request and response types for the Teca content API.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// One entry of a folder listing.
#[derive(Debug, Deserialize, Serialize)]
pub struct ContentItem {
    pub path: String,
    pub folder: bool,
    pub length: Option<i64>,
    pub create_date: Option<OffsetDateTime>,
    pub modify_date: Option<OffsetDateTime>,
    pub create_by: Option<String>,
    pub modify_by: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ContentListing {
    pub path: String,
    pub items: Vec<ContentItem>,
}

/// Metadata for one stored version of a leaf path.
#[derive(Debug, Deserialize, Serialize)]
pub struct HistoryEntry {
    pub id: Option<Uuid>,
    pub host: String,
    pub path: String,
    pub data_length: Option<i64>,
    pub create_date: Option<OffsetDateTime>,
    pub create_by: Option<String>,
}

/// Confirmation returned after a successful save.
#[derive(Debug, Deserialize, Serialize)]
pub struct SaveReceipt {
    pub id: Option<Uuid>,
    pub host: String,
    pub path: String,
    pub data_length: Option<i64>,
    pub create_date: Option<OffsetDateTime>,
    pub modify_date: Option<OffsetDateTime>,
}
