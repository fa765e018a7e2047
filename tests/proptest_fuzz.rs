//! Property-based tests (fuzzing) for the collector's pure core.
//!
//! Uses proptest to generate random/malformed inputs and verify decoding
//! never panics, the digest holds its order invariants, and the wire forms
//! round-trip.
//!
//! Run with: `cargo test --test proptest_fuzz`

use proptest::prelude::*;
use serde_json::{Map, Value};

use webhook_sync::{
    decode_document, decode_sync_stream, diff_missing, digest_bytes, encode_sync_record, Record,
    RecordId,
};

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Arbitrary JSON values, nested a few levels deep.
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::String),
    ];

    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// A top-level document: distinct keys mapped to arbitrary values.
fn document_strategy() -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::btree_map("[a-z]{1,8}", arbitrary_json_strategy(), 0..8)
        .prop_map(|m| m.into_iter().collect())
}

fn to_body(pairs: &[(String, Value)]) -> Vec<u8> {
    let map: Map<String, Value> = pairs.iter().cloned().collect();
    serde_json::to_vec(&Value::Object(map)).unwrap()
}

/// Ascending id lists for the diff.
fn sorted_ids_strategy() -> impl Strategy<Value = Vec<RecordId>> {
    prop::collection::vec((0u32..100_000, 0u32..16), 0..40).prop_map(|pairs| {
        let mut ids: Vec<RecordId> = pairs
            .into_iter()
            .map(|(secs, digest)| RecordId::new(secs, digest))
            .collect();
        ids.sort();
        ids
    })
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    /// Decoding arbitrary bytes never panics; it either produces a record,
    /// reports nothing to ingest, or fails cleanly.
    #[test]
    fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = decode_document(&bytes);
    }

    /// Reordering top-level keys never changes the digest.
    #[test]
    fn digest_invariant_under_top_level_permutation(
        doc in document_strategy(),
        seed in any::<u64>(),
    ) {
        prop_assume!(!doc.is_empty());

        let forward = digest_bytes(&to_body(&doc)).unwrap();

        // Deterministic shuffle of the key order.
        let mut shuffled = doc.clone();
        let mut state = seed | 1;
        for i in (1..shuffled.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            shuffled.swap(i, (state % (i as u64 + 1)) as usize);
        }
        let backward = digest_bytes(&to_body(&shuffled)).unwrap();

        prop_assert_eq!(forward, backward);
    }

    /// A decoded record's payload is always itself decodable to the same
    /// digest (the payload is the document, not a transform of it).
    #[test]
    fn payload_redigests_identically(doc in document_strategy()) {
        let body = to_body(&doc);
        let record = decode_document(&body).unwrap().unwrap();
        prop_assert_eq!(digest_bytes(&record.payload).unwrap(), record.digest());
    }

    /// Hex round trip is the identity for every id.
    #[test]
    fn record_id_hex_round_trips(secs in any::<u32>(), digest in any::<u32>()) {
        let id = RecordId::new(secs, digest);
        prop_assert_eq!(RecordId::from_hex(&id.to_hex()).unwrap(), id);
    }

    /// Id ordering always agrees with timestamp ordering.
    #[test]
    fn record_id_order_is_chronological(
        a in (any::<u32>(), any::<u32>()),
        b in (any::<u32>(), any::<u32>()),
    ) {
        let (ida, idb) = (RecordId::new(a.0, a.1), RecordId::new(b.0, b.1));
        if a.0 < b.0 {
            prop_assert!(ida < idb);
        } else if a.0 > b.0 {
            prop_assert!(ida > idb);
        }
    }

    /// The diff never invents ids: its output is a subsequence of the
    /// secondary input, and zero tolerance with identical inputs yields
    /// nothing.
    #[test]
    fn diff_output_is_subsequence_of_secondary(
        primary in sorted_ids_strategy(),
        secondary in sorted_ids_strategy(),
        tolerance in 0u32..120,
    ) {
        let missing = diff_missing(&primary, &secondary, tolerance).unwrap();

        let mut cursor = 0usize;
        for id in &missing {
            let found = secondary[cursor..].iter().position(|s| s == id);
            prop_assert!(found.is_some(), "diff produced an id not in secondary");
            cursor += found.unwrap() + 1;
        }

        let self_diff = diff_missing(&secondary, &secondary, tolerance).unwrap();
        prop_assert!(self_diff.is_empty());
    }

    /// Sync records survive the wire byte-for-byte.
    #[test]
    fn sync_stream_round_trips(
        docs in prop::collection::vec(document_strategy(), 0..5),
        secs in any::<u32>(),
    ) {
        let records: Vec<Record> = docs
            .iter()
            .enumerate()
            .map(|(i, doc)| {
                Record::new(RecordId::new(secs, i as u32), to_body(doc))
            })
            .collect();

        let mut body = Vec::new();
        for record in &records {
            body.extend_from_slice(&encode_sync_record(record));
        }

        prop_assert_eq!(decode_sync_stream(&body).unwrap(), records);
    }
}
