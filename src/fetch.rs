// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Concurrent fetch with request-order delivery.
//!
//! [`Store::objects`] resolves payloads in whatever order the backend
//! completes them; the reconciliation response must stream records in the
//! exact order they were asked for. [`ReorderingFetcher`] sits between the
//! two: completions land in a fixed array of slots keyed by request
//! position, and records are released from the head of the array as soon as
//! an unbroken prefix is complete. Retrieval stays concurrent; only the
//! release is serialized.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::record::{Record, RecordId};
use crate::storage::Store;

/// Fixed-slot reorder window over one fetch batch.
///
/// One slot per requested id, in request order; a completion fills its slot
/// by index. `complete` returns every record that became releasable, i.e.
/// the contiguous run of filled slots starting at the head cursor.
struct ReorderQueue {
    slots: Vec<Option<Record>>,
    head: usize,
    by_id: HashMap<RecordId, usize>,
}

impl ReorderQueue {
    fn new(ids: &[RecordId]) -> Self {
        let by_id = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        ReorderQueue {
            slots: ids.iter().map(|_| None).collect(),
            head: 0,
            by_id,
        }
    }

    fn complete(&mut self, record: Record) -> Vec<Record> {
        let Some(&idx) = self.by_id.get(&record.id) else {
            warn!(id = %record.id, "completion for unrequested id, ignoring");
            return Vec::new();
        };
        if self.slots[idx].replace(record).is_some() {
            warn!(index = idx, "duplicate completion for slot, keeping latest");
        }

        let mut released = Vec::new();
        while self.head < self.slots.len() {
            match self.slots[self.head].take() {
                Some(record) => {
                    released.push(record);
                    self.head += 1;
                }
                None => break,
            }
        }
        released
    }

    fn is_drained(&self) -> bool {
        self.head == self.slots.len()
    }
}

/// Fetches batches of records from a store, restoring request order.
pub struct ReorderingFetcher {
    store: Arc<dyn Store>,
}

impl ReorderingFetcher {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        ReorderingFetcher { store }
    }

    /// Stream the records for `ids` in exactly that order.
    ///
    /// Any single retrieval failure aborts the whole batch: the error is the
    /// stream's final item and nothing further is emitted. Cancellation
    /// surfaces as [`SyncError::Cancelled`].
    pub fn fetch(
        &self,
        ids: Vec<RecordId>,
        token: CancellationToken,
    ) -> mpsc::Receiver<Result<Record, SyncError>> {
        let (tx, rx) = mpsc::channel(ids.len().max(1));
        if ids.is_empty() {
            return rx;
        }

        let mut queue = ReorderQueue::new(&ids);
        let mut objects = self.store.objects(ids, token.child_token());

        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    _ = token.cancelled() => {
                        let _ = tx.send(Err(SyncError::Cancelled)).await;
                        return;
                    }
                    item = objects.recv() => item,
                };

                match item {
                    None => {
                        if !queue.is_drained() {
                            warn!("object stream ended with slots unfilled");
                        } else {
                            debug!("fetch batch complete");
                        }
                        return;
                    }
                    Some(Err(e)) => {
                        // One bad retrieval poisons the batch.
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                    Some(Ok(record)) => {
                        for released in queue.complete(record) {
                            if tx.send(Ok(released)).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        rx
    }
}

/// Drain a fetch stream into a vector.
pub async fn collect_records(
    mut rx: mpsc::Receiver<Result<Record, SyncError>>,
) -> Result<Vec<Record>, SyncError> {
    let mut out = Vec::new();
    while let Some(item) = rx.recv().await {
        out.push(item?);
    }
    Ok(out)
}
