// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The collector node: ingest on one side, reconciliation on the other.
//!
//! Inbound webhook bodies are decoded, identified, and offered to the
//! [`BatchBuffer`], which writes them behind the request path. Separately,
//! each node periodically asks a peer for records it missed (buffer
//! admission is lossy) and answers the same question for the peer. Records
//! received over the exchange are written to the store directly, not through
//! the buffer, so a transferred record cannot be dropped a second time.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::buffer::BatchBuffer;
use crate::config::CollectorConfig;
use crate::error::SyncError;
use crate::ingest::decode_document;
use crate::record::{Record, RecordId};
use crate::reconcile::{Reconciler, SyncRequest};
use crate::storage::{collect_keys, Store, TimeRange};

/// What became of one ingested body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Body was empty or whitespace; nothing to do.
    Empty,
    /// Record handed to the buffer.
    Accepted(RecordId),
    /// Buffer refused admission; the record is dropped here and left for
    /// reconciliation to recover from a peer.
    Dropped(RecordId),
}

pub struct Collector {
    store: Arc<dyn Store>,
    buffer: BatchBuffer,
    reconciler: Reconciler,
    config: CollectorConfig,
}

impl Collector {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: CollectorConfig) -> Self {
        let buffer = BatchBuffer::new(store.clone(), &config);
        let reconciler = Reconciler::new(store.clone(), config.skew_tolerance_secs);
        Collector {
            store,
            buffer,
            reconciler,
            config,
        }
    }

    /// Decode one webhook body and offer it to the write-behind buffer.
    ///
    /// Malformed bodies fail with [`SyncError::Format`]; the caller's
    /// transport layer decides what status that maps to.
    pub fn ingest(&self, body: &[u8]) -> Result<IngestOutcome, SyncError> {
        let Some(record) = decode_document(body)? else {
            return Ok(IngestOutcome::Empty);
        };
        let id = record.id;
        if self.buffer.add(record) {
            Ok(IngestOutcome::Accepted(id))
        } else {
            Ok(IngestOutcome::Dropped(id))
        }
    }

    /// Build the exchange request for the configured window: far enough back
    /// to be interesting, far enough behind "now" that in-flight batches on
    /// both sides have settled.
    pub async fn sync_request(
        &self,
        token: CancellationToken,
    ) -> Result<SyncRequest, SyncError> {
        self.sync_request_at(SystemTime::now(), token).await
    }

    /// [`sync_request`] with an explicit "now".
    ///
    /// [`sync_request`]: Collector::sync_request
    pub async fn sync_request_at(
        &self,
        now: SystemTime,
        token: CancellationToken,
    ) -> Result<SyncRequest, SyncError> {
        let now_secs = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .min(u64::from(u32::MAX)) as u32;
        let start = now_secs.saturating_sub(self.config.sync_lookback_secs);
        let end = now_secs.saturating_sub(self.config.sync_lag_secs);

        let known_ids =
            collect_keys(self.store.keys(TimeRange::new(start, end), token)).await?;
        Ok(SyncRequest {
            window_start: u64::from(start),
            window_end: u64::from(end),
            known_ids,
        })
    }

    /// Answer a peer's request: stream back the records it is missing.
    pub async fn handle_sync(
        &self,
        request: &SyncRequest,
        token: CancellationToken,
    ) -> Result<mpsc::Receiver<Result<Record, SyncError>>, SyncError> {
        self.reconciler.missing_records(request, token).await
    }

    /// Persist records transferred from a peer.
    ///
    /// Writes go straight to the store; the lossy buffer is for the ingest
    /// hot path only.
    pub async fn apply_sync_records(&self, records: Vec<Record>) -> Result<usize, SyncError> {
        let count = records.len();
        self.store.put(records).await?;
        if count > 0 {
            info!(count, "records recovered from peer");
        }
        Ok(count)
    }

    /// Request an immediate buffer flush.
    pub fn flush(&self) {
        self.buffer.flush();
    }

    /// Flush pending records and stop the buffer worker.
    pub async fn shutdown(&self) {
        self.buffer.shutdown().await;
    }

    /// The store this collector writes through.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}
