//! Durable item and time-series stores
//!
//! Pipelines only ever write through the committer / batch-flush paths, so each
//! store sees at most one concurrent writer.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::{Item, ItemId, TimeSeriesSnapshot};

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Value could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Id outside the range the store can represent
    #[error("invalid id: {0}")]
    InvalidId(ItemId),

    /// Write rejected by the store
    #[error("write failed: {0}")]
    WriteFailed(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Upsert-semantics store for items and their daily snapshots
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert or replace one item
    async fn save_item(&self, item: &Item) -> StorageResult<()>;

    /// Insert or replace many items as one write
    async fn save_items_batch(&self, items: &[Item]) -> StorageResult<()>;

    /// Upsert snapshots for one item, keyed by (item id, date)
    async fn save_time_series_batch(
        &self,
        id: ItemId,
        snapshots: &[TimeSeriesSnapshot],
    ) -> StorageResult<()>;

    /// Upsert snapshots for many items
    async fn save_time_series_bulk(
        &self,
        batches: &[(ItemId, Vec<TimeSeriesSnapshot>)],
    ) -> StorageResult<()> {
        for (id, snapshots) in batches {
            self.save_time_series_batch(*id, snapshots).await?;
        }
        Ok(())
    }

    /// Every stored item id, ascending
    async fn get_all_ids(&self) -> StorageResult<Vec<ItemId>>;

    /// Whether an item with `id` is stored
    async fn exists(&self, id: ItemId) -> StorageResult<bool>;
}
