//! SQLite-backed store
//!
//! List columns are stored as JSON text and dates as ISO `YYYY-MM-DD`. Each
//! batch runs in a single transaction.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use super::{Storage, StorageError, StorageResult};
use crate::{Item, ItemId, TimeSeriesSnapshot};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS items (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        release_date TEXT NOT NULL,
        price TEXT NOT NULL,
        developers TEXT NOT NULL,
        publishers TEXT NOT NULL,
        genres TEXT NOT NULL,
        description TEXT NOT NULL,
        updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS time_series (
        item_id INTEGER NOT NULL,
        date TEXT NOT NULL,
        up INTEGER NOT NULL,
        down INTEGER NOT NULL,
        UNIQUE(item_id, date)
    )",
    "CREATE INDEX IF NOT EXISTS idx_time_series_item ON time_series(item_id)",
];

const UPSERT_ITEM: &str = "INSERT OR REPLACE INTO items
        (id, name, release_date, price, developers, publishers, genres, description)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

const UPSERT_SNAPSHOT: &str = "INSERT OR REPLACE INTO time_series (item_id, date, up, down)
     VALUES (?1, ?2, ?3, ?4)";

/// [`Storage`] over a SQLite database
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if needed) the database file at `path`
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        info!(path = %path.display(), "Opened SQLite storage");
        Self::with_pool(pool).await
    }

    /// Private in-memory database
    pub async fn in_memory() -> StorageResult<Self> {
        // A single connection keeps every query on the same in-memory database.
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> StorageResult<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// Snapshots stored for one item ordered by date
    pub async fn time_series(&self, id: ItemId) -> StorageResult<Vec<TimeSeriesSnapshot>> {
        let rows = sqlx::query(
            "SELECT date, up, down FROM time_series WHERE item_id = ?1 ORDER BY date",
        )
        .bind(to_db_id(id)?)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> StorageResult<TimeSeriesSnapshot> {
                let date: String = row.try_get("date")?;
                let up: i64 = row.try_get("up")?;
                let down: i64 = row.try_get("down")?;
                Ok(TimeSeriesSnapshot {
                    item_id: id,
                    date: date
                        .parse()
                        .map_err(|e| StorageError::Serialization(format!("date {date}: {e}")))?,
                    up: up.max(0) as u64,
                    down: down.max(0) as u64,
                })
            })
            .collect()
    }

    /// Stored item, if any
    pub async fn item(&self, id: ItemId) -> StorageResult<Option<Item>> {
        let row = sqlx::query(
            "SELECT name, release_date, price, developers, publishers, genres, description
             FROM items WHERE id = ?1",
        )
        .bind(to_db_id(id)?)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Item {
            id,
            name: row.try_get("name")?,
            release_date: row.try_get("release_date")?,
            price: row.try_get("price")?,
            developers: decode_list(row.try_get("developers")?)?,
            publishers: decode_list(row.try_get("publishers")?)?,
            genres: decode_list(row.try_get("genres")?)?,
            description: row.try_get("description")?,
        }))
    }

    async fn upsert_items(&self, items: &[Item]) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        for item in items {
            sqlx::query(UPSERT_ITEM)
                .bind(to_db_id(item.id)?)
                .bind(&item.name)
                .bind(&item.release_date)
                .bind(&item.price)
                .bind(encode_list(&item.developers)?)
                .bind(encode_list(&item.publishers)?)
                .bind(encode_list(&item.genres)?)
                .bind(&item.description)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        debug!(count = items.len(), "Items upserted");
        Ok(())
    }

    async fn upsert_snapshots(
        &self,
        batches: &[(ItemId, Vec<TimeSeriesSnapshot>)],
    ) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        let mut rows = 0usize;
        for (id, snapshots) in batches {
            let db_id = to_db_id(*id)?;
            for snapshot in snapshots {
                sqlx::query(UPSERT_SNAPSHOT)
                    .bind(db_id)
                    .bind(snapshot.date.format("%Y-%m-%d").to_string())
                    .bind(i64::try_from(snapshot.up).unwrap_or(i64::MAX))
                    .bind(i64::try_from(snapshot.down).unwrap_or(i64::MAX))
                    .execute(&mut *tx)
                    .await?;
                rows += 1;
            }
        }
        tx.commit().await?;
        debug!(items = batches.len(), rows, "Snapshots upserted");
        Ok(())
    }
}

fn to_db_id(id: ItemId) -> StorageResult<i64> {
    i64::try_from(id).map_err(|_| StorageError::InvalidId(id))
}

fn encode_list(values: &[String]) -> StorageResult<String> {
    serde_json::to_string(values).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode_list(raw: String) -> StorageResult<Vec<String>> {
    serde_json::from_str(&raw).map_err(|e| StorageError::Serialization(e.to_string()))
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_item(&self, item: &Item) -> StorageResult<()> {
        self.upsert_items(std::slice::from_ref(item)).await
    }

    async fn save_items_batch(&self, items: &[Item]) -> StorageResult<()> {
        self.upsert_items(items).await
    }

    async fn save_time_series_batch(
        &self,
        id: ItemId,
        snapshots: &[TimeSeriesSnapshot],
    ) -> StorageResult<()> {
        self.upsert_snapshots(&[(id, snapshots.to_vec())]).await
    }

    async fn save_time_series_bulk(
        &self,
        batches: &[(ItemId, Vec<TimeSeriesSnapshot>)],
    ) -> StorageResult<()> {
        self.upsert_snapshots(batches).await
    }

    async fn get_all_ids(&self) -> StorageResult<Vec<ItemId>> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM items ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().filter_map(|id| u64::try_from(id).ok()).collect())
    }

    async fn exists(&self, id: ItemId) -> StorageResult<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM items WHERE id = ?1")
            .bind(to_db_id(id)?)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }
}
