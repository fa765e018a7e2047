// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Webhook Sync
//!
//! A webhook collector with cross-node reconciliation.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Ingest Layer                         │
//! │  • Decodes one JSON document per request body               │
//! │  • Derives a time+digest RecordId (top-level key order      │
//! │    never changes the digest)                                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        BatchBuffer                          │
//! │  • Single worker owns the pending batch                     │
//! │  • Non-blocking admission: accept or drop, never queue      │
//! │  • Flush on size, timer, signal, or shutdown                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                     (batched Store::put)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Store seam                          │
//! │  • put / keys / objects behind one async trait              │
//! │  • InMemoryStore reference backend                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Reconciliation                        │
//! │  • Peer sends its known ids for a settled time window       │
//! │  • Skew-tolerant diff finds what the peer is missing        │
//! │  • ReorderingFetcher streams records in id order            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Admission is deliberately lossy: a webhook provider retries on its side,
//! and whatever still slips through on one node is recovered from a peer by
//! the reconciliation exchange. Delivery within one node is at-most-once.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use webhook_sync::{Collector, CollectorConfig, InMemoryStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(InMemoryStore::new());
//!     let collector = Collector::new(store, CollectorConfig::default());
//!
//!     // Ingest a webhook body.
//!     let outcome = collector.ingest(br#"{"event":"ping","seq":1}"#).unwrap();
//!     println!("{outcome:?}");
//!
//!     // Build the request this node would send a peer.
//!     let request = collector
//!         .sync_request(CancellationToken::new())
//!         .await
//!         .unwrap();
//!     println!("known ids: {}", request.known_ids.len());
//!
//!     collector.shutdown().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`collector`]: The [`Collector`] gluing ingest, buffering, and sync
//! - [`ingest`]: Document decoding and the content digest
//! - [`buffer`]: Write-behind batching
//! - [`fetch`]: Order-restoring concurrent fetch
//! - [`reconcile`]: Diff algorithm, responder, and wire format
//! - [`storage`]: The [`Store`] trait and the in-memory backend

pub mod buffer;
pub mod collector;
pub mod config;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod reconcile;
pub mod record;
pub mod storage;

pub use buffer::BatchBuffer;
pub use collector::{Collector, IngestOutcome};
pub use config::CollectorConfig;
pub use error::SyncError;
pub use fetch::{collect_records, ReorderingFetcher};
pub use ingest::{content_digest, decode_document, decode_document_at, digest_bytes};
pub use reconcile::{decode_sync_stream, diff_missing, encode_sync_record, Reconciler, SyncRequest};
pub use record::{Record, RecordId, RECORD_ID_HEX_LEN};
pub use storage::{collect_keys, InMemoryStore, Store, StoreError, TimeRange};
