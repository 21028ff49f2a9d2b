use std::path::PathBuf;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, migrate::Migrator};
use thiserror::Error;

use crate::walker::{FileSystemEntry, join_relative};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

// Stays well under SQLite's bound-parameter limit for multi-row inserts.
const MAX_ROWS_PER_INSERT: usize = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
    #[error("stored level is out of range: {0}")]
    InvalidLevel(i64),
}

/// Two-state progress flag. Anything other than the stored value `1` reads
/// as pending, so rows written by other tools default to pending too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Complete,
}

impl Status {
    fn as_i64(self) -> i64 {
        match self {
            Status::Pending => 0,
            Status::Complete => 1,
        }
    }

    fn from_i64(value: i64) -> Self {
        if value == 1 {
            Status::Complete
        } else {
            Status::Pending
        }
    }
}

/// A queued entry together with its store-assigned id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub is_folder: bool,
    pub level: u32,
    pub status: Status,
}

impl StoredEntry {
    pub fn relative_path(&self) -> String {
        join_relative(&self.path, &self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InventoryRecord {
    pub entry: StoredEntry,
    pub portal_info: Option<String>,
    pub meta: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalRecord {
    pub name: String,
    pub path: String,
    pub portal_id: String,
    pub synced: bool,
    pub is_folder: bool,
    pub meta: Option<String>,
    pub portal_info: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy)]
enum Queue {
    Inventory,
    Uploads,
}

impl Queue {
    fn table(self) -> &'static str {
        match self {
            Queue::Inventory => "inventory",
            Queue::Uploads => "uploads",
        }
    }
}

/// Work queues persisted in SQLite. Cloning shares the connection pool.
#[derive(Clone)]
pub struct WorkStore {
    pool: SqlitePool,
}

impl WorkStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn new_default() -> Result<Self, StoreError> {
        let db_path = default_db_path()?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn open(database_url: Option<&str>) -> Result<Self, StoreError> {
        match database_url {
            Some(url) => Self::new(url).await,
            None => Self::new_default().await,
        }
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Appends entries to the local inventory. Not idempotent: inserting the
    /// same walk twice yields duplicate rows.
    pub async fn insert_inventory(
        &self,
        entries: &[FileSystemEntry],
        chunk_size: usize,
    ) -> Result<u64, StoreError> {
        self.bulk_insert(Queue::Inventory, entries, chunk_size).await
    }

    /// Appends entries to the upload queue. Not idempotent, like
    /// [`WorkStore::insert_inventory`].
    pub async fn insert_uploads(
        &self,
        entries: &[FileSystemEntry],
        chunk_size: usize,
    ) -> Result<u64, StoreError> {
        self.bulk_insert(Queue::Uploads, entries, chunk_size).await
    }

    async fn bulk_insert(
        &self,
        queue: Queue,
        entries: &[FileSystemEntry],
        chunk_size: usize,
    ) -> Result<u64, StoreError> {
        let chunk_size = chunk_size.clamp(1, MAX_ROWS_PER_INSERT);
        let mut inserted = 0;
        for chunk in entries.chunks(chunk_size) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                "INSERT INTO {} (name, path, is_folder, level) ",
                queue.table()
            ));
            builder.push_values(chunk, |mut row, entry| {
                row.push_bind(&entry.name)
                    .push_bind(&entry.path)
                    .push_bind(entry.is_folder)
                    .push_bind(i64::from(entry.level));
            });
            inserted += builder.build().execute(&self.pool).await?.rows_affected();
        }
        Ok(inserted)
    }

    /// Levels that still have at least one upload not marked complete,
    /// ascending.
    pub async fn distinct_pending_levels(&self) -> Result<Vec<u32>, StoreError> {
        let rows = sqlx::query(
            "SELECT DISTINCT level FROM uploads WHERE status_upload != 1 ORDER BY level ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| parse_level(row.try_get("level")?))
            .collect()
    }

    pub async fn pending_uploads_at_level(&self, level: u32) -> Result<Vec<StoredEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, path, is_folder, level, status_upload AS status
             FROM uploads
             WHERE level = ?1 AND status_upload != 1
             ORDER BY id ASC",
        )
        .bind(i64::from(level))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    pub async fn get_upload(&self, id: i64) -> Result<Option<StoredEntry>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, path, is_folder, level, status_upload AS status FROM uploads WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    pub async fn mark_uploaded(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE uploads SET status_upload = ?1 WHERE id = ?2")
            .bind(Status::Complete.as_i64())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_inventory(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM inventory")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn inventory_page(
        &self,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<InventoryRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, path, is_folder, level, status_sync AS status, portal_info, meta
             FROM inventory
             ORDER BY id ASC
             LIMIT ?1 OFFSET ?2",
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(inventory_from_row).collect()
    }

    pub async fn synced_inventory(&self) -> Result<Vec<InventoryRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, path, is_folder, level, status_sync AS status, portal_info, meta
             FROM inventory
             WHERE status_sync = 1
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(inventory_from_row).collect()
    }

    /// Attaches portal metadata to every inventory row with this name and
    /// parent path and marks them synced. Returns the number of rows touched.
    pub async fn record_portal_info(
        &self,
        name: &str,
        path: &str,
        portal_info: &str,
        meta: &str,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE inventory
             SET status_sync = ?1, portal_info = ?2, meta = ?3
             WHERE name = ?4 AND path = ?5",
        )
        .bind(Status::Complete.as_i64())
        .bind(portal_info)
        .bind(meta)
        .bind(name)
        .bind(path)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn insert_portal_records(
        &self,
        records: &[PortalRecord],
        chunk_size: usize,
    ) -> Result<u64, StoreError> {
        let chunk_size = chunk_size.clamp(1, MAX_ROWS_PER_INSERT);
        let mut inserted = 0;
        for chunk in records.chunks(chunk_size) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO portal_records (name, path, portal_id, synced, is_folder, meta, portal_info, created_at, updated_at) ",
            );
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(&record.name)
                    .push_bind(&record.path)
                    .push_bind(&record.portal_id)
                    .push_bind(record.synced)
                    .push_bind(record.is_folder)
                    .push_bind(&record.meta)
                    .push_bind(&record.portal_info)
                    .push_bind(&record.created_at)
                    .push_bind(&record.updated_at);
            });
            inserted += builder.build().execute(&self.pool).await?.rows_affected();
        }
        Ok(inserted)
    }

    pub async fn list_portal_records(&self) -> Result<Vec<PortalRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT name, path, portal_id, synced, is_folder, meta, portal_info, created_at, updated_at
             FROM portal_records
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(PortalRecord {
                name: row.try_get("name")?,
                path: row.try_get("path")?,
                portal_id: row.try_get("portal_id")?,
                synced: row.try_get("synced")?,
                is_folder: row.try_get("is_folder")?,
                meta: row.try_get("meta")?,
                portal_info: row.try_get("portal_info")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            });
        }
        Ok(out)
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<StoredEntry, StoreError> {
    Ok(StoredEntry {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        path: row.try_get("path")?,
        is_folder: row.try_get("is_folder")?,
        level: parse_level(row.try_get("level")?)?,
        status: Status::from_i64(row.try_get("status")?),
    })
}

fn inventory_from_row(row: &SqliteRow) -> Result<InventoryRecord, StoreError> {
    Ok(InventoryRecord {
        entry: entry_from_row(row)?,
        portal_info: row.try_get("portal_info")?,
        meta: row.try_get("meta")?,
    })
}

fn parse_level(value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::InvalidLevel(value))
}

fn default_db_path() -> Result<PathBuf, StoreError> {
    let mut path = dirs::data_dir().ok_or(StoreError::MissingDataDir)?;
    path.push("portal-sync");
    path.push("queue.db");
    Ok(path)
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
