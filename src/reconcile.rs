// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cross-node reconciliation: the diff algorithm, the responder, and the
//! exchange wire format.
//!
//! A requesting node sends the ids it already holds for a time window; the
//! responder diffs those against its own ids and streams back the full
//! records the requester is missing. Two nodes ingesting the same webhook
//! stamp it with clocks that may disagree, so an id matches when digests are
//! equal and timestamps fall within a configured skew tolerance of each
//! other.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::SyncError;
use crate::fetch::ReorderingFetcher;
use crate::record::{Record, RecordId};
use crate::storage::{collect_keys, Store, TimeRange};

/// One side's opening of the reconciliation exchange: the time window under
/// discussion and every id the requester already holds inside it, ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub window_start: u64,
    pub window_end: u64,
    pub known_ids: Vec<RecordId>,
}

impl SyncRequest {
    /// Window as the inclusive [`TimeRange`] used against the store, clamped
    /// to the id format's 32-bit seconds.
    #[must_use]
    pub fn range(&self) -> TimeRange {
        TimeRange::new(
            self.window_start.min(u64::from(u32::MAX)) as u32,
            self.window_end.min(u64::from(u32::MAX)) as u32,
        )
    }

    fn validate(&self) -> Result<(), SyncError> {
        if self.window_start > self.window_end {
            return Err(SyncError::Precondition(format!(
                "window start {} after window end {}",
                self.window_start, self.window_end
            )));
        }
        ensure_ascending(&self.known_ids, "knownIds")?;
        Ok(())
    }
}

fn ensure_ascending(ids: &[RecordId], what: &str) -> Result<(), SyncError> {
    for pair in ids.windows(2) {
        if pair[0] > pair[1] {
            return Err(SyncError::Precondition(format!(
                "{what} not ascending: {} precedes {}",
                pair[0], pair[1]
            )));
        }
    }
    Ok(())
}

/// Ids in `secondary` with no skew-tolerant counterpart in `primary`.
///
/// A secondary id is matched when some primary id has an equal digest and a
/// timestamp within `tolerance_secs` of it, inclusive on both sides.
/// Non-matches come back in secondary order. Both inputs must be ascending
/// by id; unsorted input is rejected, not repaired.
///
/// Amortized O(n): the cursor backs up at most as far as the previous
/// window's start, so total movement is bounded by the overlap between
/// consecutive windows.
pub fn diff_missing(
    primary: &[RecordId],
    secondary: &[RecordId],
    tolerance_secs: u32,
) -> Result<Vec<RecordId>, SyncError> {
    ensure_ascending(primary, "primary ids")?;
    ensure_ascending(secondary, "secondary ids")?;

    let mut missing = Vec::new();
    let mut cursor = 0usize;

    for &sec in secondary {
        let lo = sec.timestamp_secs().saturating_sub(tolerance_secs);
        let hi = sec.timestamp_secs().saturating_add(tolerance_secs);

        // Park the cursor on the first primary entry that could still match.
        while cursor > 0 && primary[cursor - 1].timestamp_secs() >= lo {
            cursor -= 1;
        }
        while cursor < primary.len() && primary[cursor].timestamp_secs() < lo {
            cursor += 1;
        }

        let mut probe = cursor;
        let mut matched = false;
        // Exhaustion is probe == len(primary): the final entry is examined
        // like any other.
        while probe < primary.len() && primary[probe].timestamp_secs() <= hi {
            if primary[probe].digest() == sec.digest() {
                matched = true;
                break;
            }
            probe += 1;
        }
        if !matched {
            missing.push(sec);
        }
    }

    Ok(missing)
}

/// The responder half of the exchange: diff a peer's known ids against our
/// own store and stream back what the peer lacks.
pub struct Reconciler {
    store: Arc<dyn Store>,
    fetcher: ReorderingFetcher,
    tolerance_secs: u32,
}

impl Reconciler {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, tolerance_secs: u32) -> Self {
        let fetcher = ReorderingFetcher::new(store.clone());
        Reconciler {
            store,
            fetcher,
            tolerance_secs,
        }
    }

    /// Answer a peer's [`SyncRequest`]: the returned stream yields, in id
    /// order, every record we hold in the window that the peer's known ids
    /// don't account for.
    ///
    /// Fails before any record is emitted if the request is malformed or the
    /// key listing fails; mid-stream fetch errors arrive on the stream
    /// itself.
    pub async fn missing_records(
        &self,
        request: &SyncRequest,
        token: CancellationToken,
    ) -> Result<mpsc::Receiver<Result<Record, SyncError>>, SyncError> {
        request.validate()?;

        let own_ids = collect_keys(self.store.keys(request.range(), token.child_token())).await?;
        let missing = diff_missing(&request.known_ids, &own_ids, self.tolerance_secs)?;
        info!(
            window_start = request.window_start,
            window_end = request.window_end,
            known = request.known_ids.len(),
            own = own_ids.len(),
            missing = missing.len(),
            "reconciliation diff computed"
        );

        Ok(self.fetcher.fetch(missing, token))
    }
}

/// One response item on the wire: the id in hex and the record's original
/// payload bytes spliced in verbatim. The response body is these objects
/// back to back.
pub fn encode_sync_record(record: &Record) -> Vec<u8> {
    let mut out = Vec::with_capacity(record.payload.len() + 32);
    out.extend_from_slice(b"{\"id\":\"");
    out.extend_from_slice(record.id.to_hex().as_bytes());
    out.extend_from_slice(b"\",\"data\":");
    out.extend_from_slice(&record.payload);
    out.push(b'}');
    out
}

#[derive(Deserialize)]
struct SyncRecordWire<'a> {
    id: RecordId,
    #[serde(borrow)]
    data: &'a serde_json::value::RawValue,
}

/// Decode a response body of consecutive encoded records back into
/// [`Record`]s, payload bytes preserved exactly.
pub fn decode_sync_stream(body: &[u8]) -> Result<Vec<Record>, SyncError> {
    let stream = serde_json::Deserializer::from_slice(body).into_iter::<SyncRecordWire<'_>>();
    let mut records = Vec::new();
    for item in stream {
        let wire = item.map_err(|e| SyncError::Format(format!("bad sync stream: {e}")))?;
        records.push(Record::new(wire.id, wire.data.get().as_bytes().to_vec()));
    }
    debug!(count = records.len(), "sync stream decoded");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::collect_records;
    use crate::storage::InMemoryStore;

    fn id(secs: u32, digest: u32) -> RecordId {
        RecordId::new(secs, digest)
    }

    fn h(n: u32) -> u32 {
        0x1000 + n
    }

    #[test]
    fn test_diff_basic_vector() {
        // Secondary's first entry matches exactly; the second differs in
        // digest and has no counterpart within tolerance.
        let primary = vec![id(100, h(1)), id(200, h(2))];
        let secondary = vec![id(100, h(1)), id(205, h(9))];

        let missing = diff_missing(&primary, &secondary, 10).unwrap();
        assert_eq!(missing, vec![id(205, h(9))]);
    }

    #[test]
    fn test_diff_tolerance_is_inclusive() {
        let primary = vec![id(100, h(1))];
        // Exactly T away on either side still matches.
        assert!(diff_missing(&primary, &[id(110, h(1))], 10).unwrap().is_empty());
        assert!(diff_missing(&primary, &[id(90, h(1))], 10).unwrap().is_empty());
        // One past T does not.
        assert_eq!(
            diff_missing(&primary, &[id(111, h(1))], 10).unwrap(),
            vec![id(111, h(1))]
        );
    }

    #[test]
    fn test_diff_empty_primary_preserves_all_secondary() {
        let secondary = vec![id(100, h(1)), id(200, h(2))];
        let missing = diff_missing(&[], &secondary, 10).unwrap();
        assert_eq!(missing, secondary);
    }

    #[test]
    fn test_diff_empty_secondary() {
        let primary = vec![id(100, h(1))];
        assert!(diff_missing(&primary, &[], 10).unwrap().is_empty());
    }

    #[test]
    fn test_diff_final_primary_entry_is_examined() {
        // Regression: the match sits in the last primary slot.
        let primary = vec![id(100, h(1))];
        let secondary = vec![id(100, h(1))];
        assert!(diff_missing(&primary, &secondary, 10).unwrap().is_empty());

        let primary = vec![id(50, h(5)), id(100, h(1))];
        assert!(diff_missing(&primary, &secondary, 10).unwrap().is_empty());
    }

    #[test]
    fn test_diff_rejects_unsorted_input() {
        let unsorted = vec![id(200, h(2)), id(100, h(1))];
        let sorted = vec![id(100, h(1))];

        let err = diff_missing(&unsorted, &sorted, 10).unwrap_err();
        assert!(matches!(err, SyncError::Precondition(_)));
        let err = diff_missing(&sorted, &unsorted, 10).unwrap_err();
        assert!(matches!(err, SyncError::Precondition(_)));
    }

    #[test]
    fn test_diff_same_digest_outside_window_not_matched() {
        let primary = vec![id(100, h(1))];
        let secondary = vec![id(500, h(1))];
        assert_eq!(
            diff_missing(&primary, &secondary, 10).unwrap(),
            secondary
        );
    }

    #[test]
    fn test_diff_overlapping_windows_amortized_walk() {
        // Several secondaries share most of their window; the cursor backs
        // up and still finds each match.
        let primary = vec![id(100, h(1)), id(101, h(2)), id(102, h(3)), id(300, h(4))];
        let secondary = vec![id(102, h(1)), id(103, h(2)), id(104, h(3)), id(305, h(5))];

        let missing = diff_missing(&primary, &secondary, 5).unwrap();
        assert_eq!(missing, vec![id(305, h(5))]);
    }

    #[test]
    fn test_request_validation() {
        let bad_window = SyncRequest {
            window_start: 200,
            window_end: 100,
            known_ids: vec![],
        };
        assert!(matches!(
            bad_window.validate(),
            Err(SyncError::Precondition(_))
        ));

        let unsorted = SyncRequest {
            window_start: 0,
            window_end: 1000,
            known_ids: vec![id(200, h(2)), id(100, h(1))],
        };
        assert!(matches!(unsorted.validate(), Err(SyncError::Precondition(_))));
    }

    #[test]
    fn test_request_wire_form() {
        let request = SyncRequest {
            window_start: 100,
            window_end: 200,
            known_ids: vec![id(150, 0xdeadbeef)],
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"windowStart\":100"));
        assert!(json.contains("\"windowEnd\":200"));
        assert!(json.contains("\"knownIds\":[\"00000096deadbeef\"]"));

        let back: SyncRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.known_ids, request.known_ids);
    }

    #[test]
    fn test_encode_splices_payload_verbatim() {
        let payload = br#"{"b": 2, "a": 1}"#.to_vec();
        let record = Record::new(id(100, 0xdeadbeef), payload.clone());

        let encoded = encode_sync_record(&record);
        let text = String::from_utf8(encoded).unwrap();
        assert_eq!(
            text,
            format!(r#"{{"id":"00000064deadbeef","data":{}}}"#,
                String::from_utf8(payload).unwrap())
        );
    }

    #[test]
    fn test_stream_round_trip_preserves_payload_bytes() {
        let records = vec![
            Record::new(id(100, 1), br#"{"b": 2, "a": 1}"#.to_vec()),
            Record::new(id(200, 2), br#"{"nested":{"y":2,"x":1}}"#.to_vec()),
        ];
        let mut body = Vec::new();
        for record in &records {
            body.extend_from_slice(&encode_sync_record(record));
        }

        let decoded = decode_sync_stream(&body).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_decode_rejects_malformed_stream() {
        assert!(matches!(
            decode_sync_stream(br#"{"id":"00000064deadbeef","data":{"#),
            Err(SyncError::Format(_))
        ));
        assert!(matches!(
            decode_sync_stream(br#"{"id":"short","data":{}}"#),
            Err(SyncError::Format(_))
        ));
    }

    #[test]
    fn test_decode_empty_stream() {
        assert!(decode_sync_stream(b"").unwrap().is_empty());
        assert!(decode_sync_stream(b"  \n").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_records_against_store() {
        let store = Arc::new(InMemoryStore::new());
        store
            .put(vec![
                Record::new(id(100, h(1)), br#"{"n":1}"#.to_vec()),
                Record::new(id(200, h(2)), br#"{"n":2}"#.to_vec()),
                Record::new(id(300, h(3)), br#"{"n":3}"#.to_vec()),
            ])
            .await
            .unwrap();

        let reconciler = Reconciler::new(store, 10);
        // Peer already has the middle record (with 5s of skew).
        let request = SyncRequest {
            window_start: 0,
            window_end: 1000,
            known_ids: vec![id(205, h(2))],
        };

        let rx = reconciler
            .missing_records(&request, CancellationToken::new())
            .await
            .unwrap();
        let records = collect_records(rx).await.unwrap();
        assert_eq!(
            records.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![id(100, h(1)), id(300, h(3))]
        );
    }

    #[tokio::test]
    async fn test_missing_records_window_bounds_apply() {
        let store = Arc::new(InMemoryStore::new());
        store
            .put(vec![
                Record::new(id(100, h(1)), br#"{"n":1}"#.to_vec()),
                Record::new(id(900, h(9)), br#"{"n":9}"#.to_vec()),
            ])
            .await
            .unwrap();

        let reconciler = Reconciler::new(store, 10);
        let request = SyncRequest {
            window_start: 50,
            window_end: 150,
            known_ids: vec![],
        };

        let rx = reconciler
            .missing_records(&request, CancellationToken::new())
            .await
            .unwrap();
        let records = collect_records(rx).await.unwrap();
        // Only the in-window record comes back.
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id(100, h(1)));
    }

    #[tokio::test]
    async fn test_missing_records_rejects_bad_request() {
        let reconciler = Reconciler::new(Arc::new(InMemoryStore::new()), 10);
        let request = SyncRequest {
            window_start: 200,
            window_end: 100,
            known_ids: vec![],
        };
        let err = reconciler
            .missing_records(&request, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Precondition(_)));
    }
}
