// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record identity and the record data unit.
//!
//! A [`RecordId`] is 8 bytes: big-endian unix seconds at arrival in the first
//! four, big-endian content digest in the last four. Lexicographic byte order
//! therefore equals chronological order, which is what lets backing stores
//! serve time-range scans as plain key-range scans.
//!
//! # Example
//!
//! ```
//! use webhook_sync::RecordId;
//!
//! let id = RecordId::new(1_700_000_000, 0xdeadbeef);
//! assert_eq!(id.timestamp_secs(), 1_700_000_000);
//! assert_eq!(id.digest(), 0xdeadbeef);
//! assert_eq!(RecordId::from_hex(&id.to_hex()).unwrap(), id);
//! ```

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::SyncError;

/// Length of the external hex form: 8 raw bytes, hex-encoded.
pub const RECORD_ID_HEX_LEN: usize = 16;

/// 8-byte time+digest identifier for an ingested document.
///
/// The all-zero value denotes "absent" and is never produced by normal
/// construction (arrival time is sampled from the clock).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RecordId([u8; 8]);

impl RecordId {
    /// The "absent" sentinel.
    pub const ZERO: RecordId = RecordId([0u8; 8]);

    /// Build an id from arrival seconds and a content digest.
    #[must_use]
    pub fn new(unix_secs: u32, digest: u32) -> Self {
        let mut b = [0u8; 8];
        b[0..4].copy_from_slice(&unix_secs.to_be_bytes());
        b[4..8].copy_from_slice(&digest.to_be_bytes());
        RecordId(b)
    }

    /// Build an id from a [`SystemTime`] arrival instant.
    ///
    /// Times before the epoch or past 2106 are clamped into `u32` range; the
    /// wire format only carries 32-bit seconds.
    #[must_use]
    pub fn from_time(at: SystemTime, digest: u32) -> Self {
        let secs = at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .min(u64::from(u32::MAX)) as u32;
        Self::new(secs, digest)
    }

    /// Parse the canonical external form: exactly 16 lowercase hex chars.
    pub fn from_hex(s: &str) -> Result<Self, SyncError> {
        if s.len() != RECORD_ID_HEX_LEN {
            return Err(SyncError::Precondition(format!(
                "record id hex must be {} chars, got {}",
                RECORD_ID_HEX_LEN,
                s.len()
            )));
        }
        let raw = hex::decode(s)
            .map_err(|e| SyncError::Precondition(format!("invalid record id hex {s:?}: {e}")))?;
        let mut b = [0u8; 8];
        b.copy_from_slice(&raw);
        Ok(RecordId(b))
    }

    /// Canonical external form: 16-char lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Arrival time as unix seconds.
    #[must_use]
    pub fn timestamp_secs(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Arrival time as a [`SystemTime`].
    #[must_use]
    pub fn timestamp(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(u64::from(self.timestamp_secs()))
    }

    /// Content digest component.
    #[must_use]
    pub fn digest(&self) -> u32 {
        u32::from_be_bytes([self.0[4], self.0[5], self.0[6], self.0[7]])
    }

    /// Raw bytes, big-endian time then digest.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 8]
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// On the wire the id is always its hex form, matching the reconciliation
// exchange's `knownIds` and response `id` fields.
impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HexVisitor;

        impl Visitor<'_> for HexVisitor {
            type Value = RecordId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a {RECORD_ID_HEX_LEN}-character hex string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<RecordId, E> {
                RecordId::from_hex(v).map_err(|e| E::custom(e.to_string()))
            }
        }

        deserializer.deserialize_str(HexVisitor)
    }
}

/// An ingested document: identity plus the original raw JSON bytes.
///
/// Records are created once at ingest (or reconstructed from a peer's sync
/// response), never mutated, and handed off by value to [`Store::put`].
///
/// [`Store::put`]: crate::storage::Store::put
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: RecordId,
    /// Raw bytes of the whole document as received, not the flattened digest
    /// input.
    pub payload: Vec<u8>,
}

impl Record {
    #[must_use]
    pub fn new(id: RecordId, payload: Vec<u8>) -> Self {
        Record { id, payload }
    }

    /// Parse the payload back into a JSON value.
    pub fn payload_json(&self) -> Result<serde_json::Value, SyncError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| SyncError::Format(format!("stored payload is not valid json: {e}")))
    }

    /// Arrival time carried by the id.
    #[must_use]
    pub fn timestamp_secs(&self) -> u32 {
        self.id.timestamp_secs()
    }

    /// Content digest carried by the id.
    #[must_use]
    pub fn digest(&self) -> u32 {
        self.id.digest()
    }

    /// Approximate in-memory footprint, used for flush accounting.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        std::mem::size_of::<Self>() + self.payload.len()
    }
}
