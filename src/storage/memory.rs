use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::traits::{Store, StoreError, TimeRange};
use crate::record::{Record, RecordId};

/// Ordered in-memory [`Store`].
///
/// Backed by a `BTreeMap` keyed on [`RecordId`]: the id's byte order is its
/// chronological order, so a time-window listing is a plain key-range scan.
/// `objects` resolves each id on its own task, so completions genuinely
/// arrive out of request order — the same behavior a batch object-storage
/// downloader exhibits.
pub struct InMemoryStore {
    records: Arc<RwLock<BTreeMap<RecordId, Vec<u8>>>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: RecordId) -> bool {
        self.records.read().contains_key(&id)
    }

    /// Fetch one payload directly; test convenience.
    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<Vec<u8>> {
        self.records.read().get(&id).cloned()
    }

    pub fn clear(&self) {
        self.records.write().clear();
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn put(&self, records: Vec<Record>) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut map = self.records.write();
        for record in records {
            map.insert(record.id, record.payload);
        }
        Ok(())
    }

    fn keys(
        &self,
        range: TimeRange,
        token: CancellationToken,
    ) -> mpsc::Receiver<Result<RecordId, StoreError>> {
        let (tx, rx) = mpsc::channel(64);

        // Snapshot the window under the read lock; the ascending order falls
        // out of the key order.
        let lo = RecordId::new(range.start_secs, 0);
        let hi = RecordId::new(range.end_secs, u32::MAX);
        let ids: Vec<RecordId> = self.records.read().range(lo..=hi).map(|(id, _)| *id).collect();

        tokio::spawn(async move {
            for id in ids {
                tokio::select! {
                    _ = token.cancelled() => {
                        let _ = tx.send(Err(StoreError::Cancelled)).await;
                        return;
                    }
                    sent = tx.send(Ok(id)) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        rx
    }

    fn objects(
        &self,
        ids: Vec<RecordId>,
        token: CancellationToken,
    ) -> mpsc::Receiver<Result<Record, StoreError>> {
        let (tx, rx) = mpsc::channel(ids.len().max(1));

        // One task per id: resolution order is up to the scheduler, exactly
        // like a concurrent batch download.
        for id in ids {
            let payload = self.records.read().get(&id).cloned();
            let tx = tx.clone();
            let token = token.clone();
            tokio::spawn(async move {
                if token.is_cancelled() {
                    let _ = tx.send(Err(StoreError::Cancelled)).await;
                    return;
                }
                let item = match payload {
                    Some(payload) => Ok(Record::new(id, payload)),
                    None => Err(StoreError::NotFound(id)),
                };
                let _ = tx.send(item).await;
            });
        }

        rx
    }
}
