//! SQLite-backed content store.
//!
//! The database is the system of record; payload bytes live in the same row
//! as the address so a single table carries everything. The table name is
//! operator-configured and interpolated into statements, which is why it is
//! validated as a bare identifier at construction time.

mod content;

use sqlx::{
    query,
    sqlite::{SqlitePool, SqlitePoolOptions},
};

use crate::application::store::StoreError;
use crate::infra::mirror::LocalCacheMirror;
use crate::util::fs::PathLocks;

#[derive(Debug)]
pub struct SqlContentStore {
    pool: SqlitePool,
    table: String,
    default_host: String,
    mirror: Option<LocalCacheMirror>,
    locks: PathLocks,
}

impl SqlContentStore {
    pub fn new(
        pool: SqlitePool,
        table: impl Into<String>,
        default_host: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let table = table.into();
        if !is_bare_identifier(&table) {
            return Err(StoreError::configuration(format!(
                "content table name must be a bare identifier: {table:?}"
            )));
        }
        Ok(Self {
            pool,
            table,
            default_host: default_host.into(),
            mirror: None,
            locks: PathLocks::new(),
        })
    }

    /// Attach a disk mirror; payload reads then stream from mirrored files
    /// instead of materializing blobs per request.
    pub fn with_mirror(mut self, mirror: LocalCacheMirror) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
        SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }

    /// Create the content table and its address index when absent.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
                id TEXT NOT NULL, \
                host TEXT NOT NULL, \
                path TEXT NOT NULL, \
                data BLOB, \
                data_length INTEGER, \
                create_date TEXT, \
                create_by TEXT\
            )",
            table = self.table
        );
        query(&create_table)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        let create_index = format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_address ON {table} (host, path)",
            table = self.table
        );
        query(&create_index)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(())
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db) if db.message().contains("no such table") => {
            StoreError::configuration(db.message().to_string())
        }
        other => StoreError::from_persistence(other),
    }
}

fn is_bare_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Escape `%` and `_` so a logical path can be used as a LIKE prefix.
fn like_prefix(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len() + 1);
    for c in path.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}
