use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::app::ports::{StoreReaderPort, StoreWriterPort};
use crate::domain::{StoreRow, StoredRow};
use crate::error::Result;

#[derive(Default)]
struct Inner {
    rows: Vec<StoredRow>,
    /// record_key -> position in `rows`
    index: HashMap<String, usize>,
    next_id: i64,
}

/// In-memory store for development and testing. Writes upsert on the
/// natural key, so replaying a batch leaves the same state.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append rows without any key handling, bypassing the upsert path.
    /// Lets callers reproduce a store that already holds bad data.
    pub async fn insert_raw(&self, rows: Vec<StoredRow>) {
        let mut inner = self.inner.lock().await;
        for row in rows {
            inner.next_id = inner.next_id.max(row.id);
            inner.rows.push(row);
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.rows.len()
    }
}

#[async_trait]
impl StoreWriterPort for InMemoryStore {
    async fn write_batch(&self, rows: &[StoreRow]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for row in rows {
            match inner.index.get(&row.record_key).copied() {
                Some(pos) => {
                    let id = inner.rows[pos].id;
                    inner.rows[pos] = StoredRow::from_store_row(id, row);
                }
                None => {
                    inner.next_id += 1;
                    let id = inner.next_id;
                    inner.rows.push(StoredRow::from_store_row(id, row));
                    let pos = inner.rows.len() - 1;
                    inner.index.insert(row.record_key.clone(), pos);
                }
            }
        }
        debug!("Upserted {} rows, {} stored", rows.len(), inner.rows.len());
        Ok(())
    }
}

#[async_trait]
impl StoreReaderPort for InMemoryStore {
    async fn fetch_all(&self) -> Result<Vec<StoredRow>> {
        Ok(self.inner.lock().await.rows.clone())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.len().await)
    }
}
