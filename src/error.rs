//! Error taxonomy for the collector.
//!
//! Four failure classes flow through the crate:
//! - [`SyncError::Format`] — a malformed inbound document; permanent, rejects
//!   only that request.
//! - [`SyncError::Store`] — a backing store failure, wrapping [`StoreError`].
//! - [`SyncError::Cancelled`] — aborted via a cancellation token; distinct
//!   from failure so callers can tell a deadline from a broken backend.
//! - [`SyncError::Precondition`] — caller-supplied data rejected before any
//!   processing (unsorted diff inputs, bad id hex, inverted time window).

use thiserror::Error;

use crate::storage::StoreError;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Inbound document is not well-formed JSON or not a top-level object.
    #[error("malformed document: {0}")]
    Format(String),

    /// Backing store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Operation aborted by a cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// Input rejected before processing.
    #[error("precondition failed: {0}")]
    Precondition(String),
}

impl SyncError {
    /// Whether this error came from cancellation rather than failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            SyncError::Cancelled | SyncError::Store(StoreError::Cancelled)
        )
    }
}
