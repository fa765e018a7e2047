use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::record::{Record, RecordId};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record {0} not found")]
    NotFound(RecordId),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("storage operation cancelled")]
    Cancelled,
}

/// An inclusive window of arrival time, in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start_secs: u32,
    pub end_secs: u32,
}

impl TimeRange {
    #[must_use]
    pub fn new(start_secs: u32, end_secs: u32) -> Self {
        TimeRange {
            start_secs,
            end_secs,
        }
    }

    #[must_use]
    pub fn contains(&self, unix_secs: u32) -> bool {
        unix_secs >= self.start_secs && unix_secs <= self.end_secs
    }
}

/// The sole dependency of the collector core: write a batch, list ids by
/// time window, resolve payloads by id.
///
/// `keys` and `objects` stream their results through a channel, the receiving
/// half of which is returned immediately; a failure mid-stream arrives as an
/// `Err` item and ends the stream. Both honor the supplied cancellation
/// token. `objects` may resolve ids in any order — callers needing request
/// order go through [`ReorderingFetcher`].
///
/// [`ReorderingFetcher`]: crate::fetch::ReorderingFetcher
#[async_trait]
pub trait Store: Send + Sync {
    /// Persist a batch of records. Must be a no-op on empty input.
    async fn put(&self, records: Vec<Record>) -> Result<(), StoreError>;

    /// Stream the ids of records whose arrival time falls inside `range`,
    /// ascending by time.
    fn keys(
        &self,
        range: TimeRange,
        token: CancellationToken,
    ) -> mpsc::Receiver<Result<RecordId, StoreError>>;

    /// Stream the full records for `ids`, payloads resolved, in whatever
    /// order the backend completes them.
    fn objects(
        &self,
        ids: Vec<RecordId>,
        token: CancellationToken,
    ) -> mpsc::Receiver<Result<Record, StoreError>>;
}

/// Drain a `keys` stream into a vector; the synchronous-load convenience the
/// reconciliation path uses when it needs the whole window at once.
pub async fn collect_keys(
    mut rx: mpsc::Receiver<Result<RecordId, StoreError>>,
) -> Result<Vec<RecordId>, StoreError> {
    let mut out = Vec::new();
    while let Some(item) = rx.recv().await {
        out.push(item?);
    }
    Ok(out)
}
