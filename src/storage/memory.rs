//! In-memory store for tests and dry runs

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{Storage, StorageError, StorageResult};
use crate::{Item, ItemId, TimeSeriesSnapshot};

#[derive(Debug, Default)]
struct Tables {
    items: BTreeMap<ItemId, Item>,
    snapshots: BTreeMap<(ItemId, NaiveDate), TimeSeriesSnapshot>,
    item_batches: Vec<usize>,
    snapshot_batches: Vec<usize>,
}

/// Map-backed [`Storage`] that also records the size of every batch write
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed("store is read-only".to_string()));
        }
        Ok(())
    }

    /// Make every subsequent write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Stored item, if any
    pub fn item(&self, id: ItemId) -> Option<Item> {
        self.tables().items.get(&id).cloned()
    }

    /// Number of stored items
    pub fn item_count(&self) -> usize {
        self.tables().items.len()
    }

    /// Snapshots for one item ordered by date
    pub fn time_series(&self, id: ItemId) -> Vec<TimeSeriesSnapshot> {
        self.tables()
            .snapshots
            .range((id, NaiveDate::MIN)..=(id, NaiveDate::MAX))
            .map(|(_, s)| s.clone())
            .collect()
    }

    /// Sizes of each `save_items_batch` call, in order
    pub fn item_batch_sizes(&self) -> Vec<usize> {
        self.tables().item_batches.clone()
    }

    /// Item counts of each time-series write, in order
    pub fn snapshot_batch_sizes(&self) -> Vec<usize> {
        self.tables().snapshot_batches.clone()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_item(&self, item: &Item) -> StorageResult<()> {
        self.check_writable()?;
        self.tables().items.insert(item.id, item.clone());
        Ok(())
    }

    async fn save_items_batch(&self, items: &[Item]) -> StorageResult<()> {
        self.check_writable()?;
        let mut tables = self.tables();
        for item in items {
            tables.items.insert(item.id, item.clone());
        }
        tables.item_batches.push(items.len());
        Ok(())
    }

    async fn save_time_series_batch(
        &self,
        id: ItemId,
        snapshots: &[TimeSeriesSnapshot],
    ) -> StorageResult<()> {
        self.check_writable()?;
        let mut tables = self.tables();
        for snapshot in snapshots {
            tables.snapshots.insert((id, snapshot.date), snapshot.clone());
        }
        tables.snapshot_batches.push(1);
        Ok(())
    }

    async fn save_time_series_bulk(
        &self,
        batches: &[(ItemId, Vec<TimeSeriesSnapshot>)],
    ) -> StorageResult<()> {
        self.check_writable()?;
        let mut tables = self.tables();
        for (id, snapshots) in batches {
            for snapshot in snapshots {
                tables.snapshots.insert((*id, snapshot.date), snapshot.clone());
            }
        }
        tables.snapshot_batches.push(batches.len());
        Ok(())
    }

    async fn get_all_ids(&self) -> StorageResult<Vec<ItemId>> {
        Ok(self.tables().items.keys().copied().collect())
    }

    async fn exists(&self, id: ItemId) -> StorageResult<bool> {
        Ok(self.tables().items.contains_key(&id))
    }
}
