// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Inbound document decoding and content-addressable identity.
//!
//! [`decode_document`] reads exactly one JSON document from a request body,
//! captures its raw bytes as the record payload, and derives a 32-bit content
//! digest that is invariant to top-level key order. Two nodes receiving the
//! same webhook with reordered top-level keys therefore agree on the digest
//! half of the [`RecordId`], which is what makes cross-node diffing work.
//!
//! The digest deliberately remains sensitive to key order *below* the top
//! level: nested keys and primitives are flattened in document order.
//!
//! The body is buffered whole so it can be both hashed and stored; webhook
//! payloads are bounded, so the extra copy buys simplicity and latency.

use std::time::SystemTime;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::SyncError;
use crate::record::{Record, RecordId};

/// Decode one JSON document into a [`Record`].
///
/// Returns `Ok(None)` when the body is empty or whitespace-only ("nothing to
/// ingest" — not an error). Returns [`SyncError::Format`] when the document
/// is malformed or its top-level value is not an object. Bytes after the end
/// of the first document are ignored.
///
/// The arrival timestamp is sampled once, before decoding.
pub fn decode_document(body: &[u8]) -> Result<Option<Record>, SyncError> {
    decode_document_at(body, SystemTime::now())
}

/// [`decode_document`] with an explicit arrival instant.
pub fn decode_document_at(
    body: &[u8],
    received_at: SystemTime,
) -> Result<Option<Record>, SyncError> {
    let mut stream = serde_json::Deserializer::from_slice(body).into_iter::<Value>();

    let doc = match stream.next() {
        // Only whitespace (or nothing) in the stream: nothing to ingest.
        None => return Ok(None),
        Some(Err(e)) => return Err(SyncError::Format(e.to_string())),
        Some(Ok(doc)) => doc,
    };
    // Payload is the raw bytes of the document itself, not the whole body.
    let payload = body[..stream.byte_offset()].to_vec();

    let Value::Object(doc) = doc else {
        return Err(SyncError::Format(
            "top-level value must be an object".into(),
        ));
    };

    let digest = content_digest(&doc);
    let id = RecordId::from_time(received_at, digest);
    debug!(id = %id, bytes = payload.len(), keys = doc.len(), "document decoded");

    Ok(Some(Record::new(id, payload)))
}

/// CRC-32C over the document's top-level (key, flattened-value) pairs, keys
/// sorted by byte order. `{}` digests to the CRC of empty input.
///
/// Duplicate top-level keys have already collapsed last-write-wins during
/// parsing.
#[must_use]
pub fn content_digest(doc: &Map<String, Value>) -> u32 {
    let mut keys: Vec<&String> = doc.keys().collect();
    keys.sort_unstable();

    let mut crc = 0u32;
    let mut flat = String::new();
    for key in keys {
        flat.clear();
        flatten_value(&doc[key.as_str()], &mut flat);
        crc = crc32c::crc32c_append(crc, key.as_bytes());
        crc = crc32c::crc32c_append(crc, flat.as_bytes());
    }
    crc
}

/// Concatenate the textual form of every primitive token inside `value`, in
/// document order. Delimiters contribute nothing; neither does null. Nested
/// object keys are string tokens and do contribute, which is what makes the
/// digest sensitive to nested key order.
fn flatten_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => out.push_str(s),
        Value::Array(items) => {
            for item in items {
                flatten_value(item, out);
            }
        }
        Value::Object(map) => {
            for (key, nested) in map {
                out.push_str(key);
                flatten_value(nested, out);
            }
        }
    }
}

/// Digest a raw document without building a [`Record`]; used by callers that
/// only need identity (and by tests).
pub fn digest_bytes(body: &[u8]) -> Result<u32, SyncError> {
    let doc: Value = serde_json::from_slice(body).map_err(|e| SyncError::Format(e.to_string()))?;
    match doc {
        Value::Object(map) => Ok(content_digest(&map)),
        _ => Err(SyncError::Format(
            "top-level value must be an object".into(),
        )),
    }
}
