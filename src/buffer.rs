// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Write-behind batching in front of [`Store::put`].
//!
//! A single worker task owns the pending batch outright; producers never
//! touch it. Admission is a non-blocking send into a single-slot channel, so
//! a producer is either accepted immediately or refused — ingest latency
//! stays flat no matter what the store is doing. Refused records are dropped
//! and recovered later by reconciliation; delivery here is at-most-once.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::CollectorConfig;
use crate::record::Record;
use crate::storage::Store;

/// Batches records and flushes them to the store on size, timer, or signal.
///
/// The worker task starts on the first [`add`]; [`shutdown`] flushes whatever
/// is pending and joins it. Dropping the buffer without a shutdown cancels
/// the worker but skips the final flush.
///
/// [`add`]: BatchBuffer::add
/// [`shutdown`]: BatchBuffer::shutdown
pub struct BatchBuffer {
    record_tx: mpsc::Sender<Record>,
    flush_tx: mpsc::Sender<()>,
    token: CancellationToken,
    worker: Mutex<WorkerState>,
}

enum WorkerState {
    /// Not started yet; everything the worker task needs, boxed up.
    Idle(Box<WorkerSeed>),
    Running(JoinHandle<()>),
    Stopped,
}

struct WorkerSeed {
    store: Arc<dyn Store>,
    max_batch_size: usize,
    interval: Duration,
    record_rx: mpsc::Receiver<Record>,
    flush_rx: mpsc::Receiver<()>,
    token: CancellationToken,
}

impl BatchBuffer {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: &CollectorConfig) -> Self {
        // Single-slot channels: admission and flush signals are both
        // accept-or-refuse, never queued up behind a slow store.
        let (record_tx, record_rx) = mpsc::channel(1);
        let (flush_tx, flush_rx) = mpsc::channel(1);
        let token = CancellationToken::new();

        let seed = WorkerSeed {
            store,
            max_batch_size: config.max_batch_size.max(1),
            interval: config.flush_interval(),
            record_rx,
            flush_rx,
            token: token.clone(),
        };

        BatchBuffer {
            record_tx,
            flush_tx,
            token,
            worker: Mutex::new(WorkerState::Idle(Box::new(seed))),
        }
    }

    /// Offer a record to the pending batch.
    ///
    /// Returns `false` when the worker is mid-flush and its intake slot is
    /// occupied, or after shutdown; the record is dropped in that case.
    /// Must be called from within a tokio runtime (the first call spawns the
    /// worker).
    pub fn add(&self, record: Record) -> bool {
        self.ensure_started();
        match self.record_tx.try_send(record) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(record))
            | Err(mpsc::error::TrySendError::Closed(record)) => {
                debug!(id = %record.id, "buffer refused record");
                false
            }
        }
    }

    /// Request an immediate flush. Lossy: if a flush signal is already
    /// queued, this one coalesces into it.
    pub fn flush(&self) {
        let _ = self.flush_tx.try_send(());
    }

    /// Stop the worker: cancel, final flush of pending records, join.
    /// Idempotent.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let handle = {
            let mut state = self.worker.lock();
            match std::mem::replace(&mut *state, WorkerState::Stopped) {
                WorkerState::Running(handle) => Some(handle),
                WorkerState::Idle(_) | WorkerState::Stopped => None,
            }
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "buffer worker join failed");
            }
        }
    }

    fn ensure_started(&self) {
        let mut state = self.worker.lock();
        if matches!(*state, WorkerState::Idle(_)) {
            if let WorkerState::Idle(seed) =
                std::mem::replace(&mut *state, WorkerState::Stopped)
            {
                *state = WorkerState::Running(tokio::spawn(run_worker(*seed)));
            }
        }
    }
}

impl Drop for BatchBuffer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run_worker(mut seed: WorkerSeed) {
    let mut pending: Vec<Record> = Vec::with_capacity(seed.max_batch_size);

    // First tick one full interval out, not immediately.
    let mut ticker = time::interval_at(Instant::now() + seed.interval, seed.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = seed.token.cancelled() => {
                // Pull anything still sitting in the intake slot, then flush.
                while let Ok(record) = seed.record_rx.try_recv() {
                    pending.push(record);
                }
                flush_pending(seed.store.as_ref(), &mut pending).await;
                debug!("buffer worker stopped");
                return;
            }
            Some(record) = seed.record_rx.recv() => {
                pending.push(record);
                if pending.len() >= seed.max_batch_size {
                    flush_pending(seed.store.as_ref(), &mut pending).await;
                    ticker.reset();
                }
            }
            Some(()) = seed.flush_rx.recv() => {
                flush_pending(seed.store.as_ref(), &mut pending).await;
                ticker.reset();
            }
            _ = ticker.tick() => {
                flush_pending(seed.store.as_ref(), &mut pending).await;
            }
        }
    }
}

/// Hand the whole pending batch to the store. The batch is cleared whether
/// the put succeeds or not; a failed batch is logged and gone.
async fn flush_pending(store: &dyn Store, pending: &mut Vec<Record>) {
    if pending.is_empty() {
        return;
    }
    let batch = std::mem::take(pending);
    let count = batch.len();
    match store.put(batch).await {
        Ok(()) => debug!(count, "batch flushed"),
        Err(e) => warn!(count, error = %e, "batch flush failed, batch discarded"),
    }
}
