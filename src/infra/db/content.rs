use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use sqlx::QueryBuilder;
use time::OffsetDateTime;
use tokio::fs::File;
use uuid::Uuid;

use crate::application::store::{ContentHistory, ContentStore, StoreError};
use crate::domain::content::{ContentRecord, LOGICAL_SEPARATOR};

use super::{SqlContentStore, like_prefix, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct VersionRow {
    id: String,
    host: String,
    path: String,
    data_length: Option<i64>,
    create_date: Option<OffsetDateTime>,
    create_by: Option<String>,
}

#[derive(sqlx::FromRow)]
struct PayloadRow {
    data: Option<Vec<u8>>,
    data_length: Option<i64>,
}

impl From<VersionRow> for ContentRecord {
    fn from(row: VersionRow) -> Self {
        ContentRecord {
            host: row.host,
            path: row.path,
            data_id: Uuid::parse_str(&row.id).ok(),
            data_length: row.data_length,
            create_date: row.create_date,
            create_by: row.create_by,
            ..ContentRecord::default()
        }
    }
}

impl SqlContentStore {
    /// Load the payload named by the record's `data_id` into the record.
    /// Records without a version id, and version ids with no matching row,
    /// are left untouched.
    async fn fetch_payload(&self, record: &mut ContentRecord) -> Result<(), StoreError> {
        let Some(data_id) = record.data_id else {
            return Ok(());
        };

        let row: Option<PayloadRow> = {
            let mut qb = QueryBuilder::new(format!(
                "SELECT data, data_length FROM {} WHERE id = ",
                self.table
            ));
            qb.push_bind(data_id.to_string());
            qb.build_query_as()
                .fetch_optional(self.pool())
                .await
                .map_err(map_sqlx_error)?
        };

        if let Some(row) = row {
            record.data_length = row.data_length;
            record.data = row.data.map(Bytes::from);
        }
        Ok(())
    }

    fn save_lock_key(host: &str, path: &str) -> PathBuf {
        PathBuf::from(format!("{host}:{path}"))
    }
}

#[async_trait]
impl ContentStore for SqlContentStore {
    async fn exists(&self, record: &ContentRecord) -> Result<bool, StoreError> {
        let host = record.effective_host(&self.default_host);

        let count: i64 = {
            let mut qb = QueryBuilder::new(format!(
                "SELECT COUNT(*) FROM {} WHERE host = ",
                self.table
            ));
            qb.push_bind(host);
            if record.is_folder() {
                qb.push(" AND path LIKE ");
                qb.push_bind(like_prefix(&record.path));
                qb.push(" ESCAPE '\\'");
            } else {
                qb.push(" AND path = ");
                qb.push_bind(&record.path);
            }
            qb.build_query_scalar()
                .fetch_one(self.pool())
                .await
                .map_err(map_sqlx_error)?
        };

        Ok(count > 0)
    }

    async fn retrieve(
        &self,
        record: &mut ContentRecord,
        include_data: bool,
    ) -> Result<(), StoreError> {
        let row: Option<VersionRow> = {
            let host = record.effective_host(&self.default_host);
            let mut qb = QueryBuilder::new(format!(
                "SELECT id, host, path, data_length, create_date, create_by FROM {} WHERE host = ",
                self.table
            ));
            qb.push_bind(host);
            qb.push(" AND path = ");
            qb.push_bind(&record.path);
            qb.build_query_as()
                .fetch_optional(self.pool())
                .await
                .map_err(map_sqlx_error)?
        };

        if let Some(row) = row {
            record.data_id = Uuid::parse_str(&row.id).ok();
            record.data_length = row.data_length;
            record.create_date = row.create_date;
            record.create_by = row.create_by;
            if include_data {
                self.fetch_payload(record).await?;
            }
        }
        Ok(())
    }

    async fn open(&self, record: &ContentRecord) -> Result<Option<File>, StoreError> {
        if record.is_folder() {
            return Ok(None);
        }
        let Some(mirror) = &self.mirror else {
            return Ok(None);
        };

        let mut working = record.clone();
        if working.data.is_none() {
            self.fetch_payload(&mut working).await?;
        }
        let file = mirror.open(&working).await?;
        Ok(Some(file))
    }

    async fn save(&self, record: &mut ContentRecord) -> Result<(), StoreError> {
        if record.is_folder() {
            return Err(StoreError::invalid_argument(
                "folders cannot be saved as content",
            ));
        }
        let Some(payload) = record.data.clone() else {
            return Err(StoreError::invalid_argument("save requires a data payload"));
        };

        let host = record.effective_host(&self.default_host).to_owned();
        let new_id = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        let create_date = record.create_date.unwrap_or(now);
        let create_by = record.modify_by.clone().or_else(|| record.create_by.clone());

        let _guard = self
            .locks
            .acquire(&Self::save_lock_key(&host, &record.path))
            .await;

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        {
            let mut qb = QueryBuilder::new(format!("DELETE FROM {} WHERE host = ", self.table));
            qb.push_bind(&host);
            qb.push(" AND path = ");
            qb.push_bind(&record.path);
            qb.build().execute(&mut *tx).await.map_err(map_sqlx_error)?;
        }
        {
            let mut qb = QueryBuilder::new(format!(
                "INSERT INTO {} (id, host, path, data, data_length, create_date, create_by) \
                 VALUES (",
                self.table
            ));
            let mut fields = qb.separated(", ");
            fields.push_bind(new_id.to_string());
            fields.push_bind(&host);
            fields.push_bind(&record.path);
            fields.push_bind(payload.to_vec());
            fields.push_bind(payload.len() as i64);
            fields.push_bind(create_date);
            fields.push_bind(create_by.clone());
            qb.push(")");
            qb.build().execute(&mut *tx).await.map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;

        record.data_id = Some(new_id);
        record.data_length = Some(payload.len() as i64);
        record.create_date = Some(create_date);
        record.create_by = create_by;
        record.modify_date = Some(now);

        if let Some(mirror) = &self.mirror {
            mirror.refresh(record).await?;
        }
        Ok(())
    }

    async fn remove(&self, record: &ContentRecord) -> Result<(), StoreError> {
        let host = record.effective_host(&self.default_host);

        let mut qb = QueryBuilder::new(format!("DELETE FROM {} WHERE host = ", self.table));
        qb.push_bind(host);
        if record.is_folder() {
            qb.push(" AND path LIKE ");
            qb.push_bind(like_prefix(&record.path));
            qb.push(" ESCAPE '\\'");
        } else {
            qb.push(" AND path = ");
            qb.push_bind(&record.path);
        }
        qb.build()
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list(&self, record: &ContentRecord) -> Result<Vec<ContentRecord>, StoreError> {
        if !record.is_folder() {
            return Ok(Vec::new());
        }
        let host = record.effective_host(&self.default_host);

        let rows: Vec<VersionRow> = {
            let mut qb = QueryBuilder::new(format!(
                "SELECT id, host, path, data_length, create_date, create_by FROM {} WHERE host = ",
                self.table
            ));
            qb.push_bind(host);
            qb.push(" AND path LIKE ");
            qb.push_bind(like_prefix(&record.path));
            qb.push(" ESCAPE '\\'");
            qb.build_query_as()
                .fetch_all(self.pool())
                .await
                .map_err(map_sqlx_error)?
        };

        Ok(immediate_children(record, rows))
    }
}

#[async_trait]
impl ContentHistory for SqlContentStore {
    async fn retrieve_history(
        &self,
        record: &ContentRecord,
    ) -> Result<Vec<ContentRecord>, StoreError> {
        let host = record.effective_host(&self.default_host);

        let rows: Vec<VersionRow> = {
            let mut qb = QueryBuilder::new(format!(
                "SELECT id, host, path, data_length, create_date, create_by FROM {} WHERE host = ",
                self.table
            ));
            qb.push_bind(host);
            qb.push(" AND path = ");
            qb.push_bind(&record.path);
            qb.push(" ORDER BY create_date DESC");
            qb.build_query_as()
                .fetch_all(self.pool())
                .await
                .map_err(map_sqlx_error)?
        };

        Ok(rows.into_iter().map(ContentRecord::from).collect())
    }

    async fn populate_history_data(&self, record: &mut ContentRecord) -> Result<(), StoreError> {
        let Some(data_id) = record.data_id else {
            return Err(StoreError::invalid_argument(
                "history payload fetch requires a data id",
            ));
        };

        let row: Option<PayloadRow> = {
            let host = record.effective_host(&self.default_host);
            let mut qb = QueryBuilder::new(format!(
                "SELECT data, data_length FROM {} WHERE id = ",
                self.table
            ));
            qb.push_bind(data_id.to_string());
            qb.push(" AND host = ");
            qb.push_bind(host);
            qb.push(" AND path = ");
            qb.push_bind(&record.path);
            qb.build_query_as()
                .fetch_optional(self.pool())
                .await
                .map_err(map_sqlx_error)?
        };

        if let Some(row) = row {
            record.data_length = row.data_length;
            record.data = row.data.map(Bytes::from);
        }
        Ok(())
    }
}

/// Reduce raw prefix-matched rows to the folder's immediate children:
/// leaf rows directly under the folder keep their version metadata, deeper
/// rows collapse into one folder entry per first path segment. Prefix
/// comparison is case-insensitive to match LIKE.
fn immediate_children(parent: &ContentRecord, rows: Vec<VersionRow>) -> Vec<ContentRecord> {
    let mut seen_folders: HashSet<String> = HashSet::new();
    let mut children = Vec::new();

    for row in rows {
        let Some(remainder) = strip_prefix_ignore_case(&row.path, &parent.path) else {
            continue;
        };
        if remainder.is_empty() {
            continue;
        }
        match remainder.split_once(LOGICAL_SEPARATOR) {
            Some((name, _)) => {
                if seen_folders.insert(name.to_ascii_lowercase()) {
                    children.push(parent.child(name, true));
                }
            }
            None => {
                let mut child = parent.child(remainder, false);
                child.data_id = Uuid::parse_str(&row.id).ok();
                child.data_length = row.data_length;
                child.create_date = row.create_date;
                child.create_by = row.create_by;
                children.push(child);
            }
        }
    }

    children.sort_by(|a, b| (!a.is_folder(), &a.path).cmp(&(!b.is_folder(), &b.path)));
    children
}

fn strip_prefix_ignore_case<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let head = path.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &path[prefix.len()..])
}
