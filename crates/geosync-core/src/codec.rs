//! Raw payload batch decoding and encoding.
//!
//! The service answers region queries with a JSON array of objects shaped
//! `{id, lat, lon, value, ts}`. A body that is not a JSON array fails whole
//! with [`CodecError::MalformedPayload`]; a malformed element *inside* the
//! array is skipped and counted so one bad record never discards a batch.

use geosync_types::{CodecError, Record};
use serde::Deserialize;
use tracing::warn;

/// Wire shape of one record in a service response.
#[derive(Debug, Deserialize)]
struct RawRecord {
    id: String,
    lat: f64,
    lon: f64,
    #[serde(default)]
    value: serde_json::Value,
    ts: i64,
}

/// Outcome of decoding one raw batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBatch {
    /// Records that passed validation.
    pub records: Vec<Record>,
    /// Count of malformed elements skipped.
    pub skipped: usize,
}

/// Decode a raw response body into validated records.
///
/// `fetched_at` is stamped onto every decoded record as its local
/// observation time. Elements missing required fields, carrying the wrong
/// types, or with out-of-range coordinates are skipped with a warning.
pub fn decode_batch(bytes: &[u8], fetched_at: i64) -> Result<DecodedBatch, CodecError> {
    let elements: Vec<serde_json::Value> = serde_json::from_slice(bytes)
        .map_err(|e| CodecError::malformed(format!("body is not a JSON array: {}", e)))?;

    let mut records = Vec::with_capacity(elements.len());
    let mut skipped = 0usize;

    for (index, element) in elements.into_iter().enumerate() {
        let raw: RawRecord = match serde_json::from_value(element) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Skipping malformed record at index {}: {}", index, e);
                skipped += 1;
                continue;
            }
        };

        let record = Record {
            id: raw.id,
            lat: raw.lat,
            lon: raw.lon,
            value: raw.value,
            source_ts: raw.ts,
            fetched_at,
        };

        if !record.coordinates_valid() {
            warn!(
                "Skipping record {} at index {}: coordinates out of range ({}, {})",
                record.id, index, record.lat, record.lon
            );
            skipped += 1;
            continue;
        }

        records.push(record);
    }

    Ok(DecodedBatch { records, skipped })
}

/// Encode a record back into its wire shape, for locally-originated
/// write-back.
pub fn encode_record(record: &Record) -> Result<Vec<u8>, CodecError> {
    let wire = serde_json::json!({
        "id": record.id,
        "lat": record.lat,
        "lon": record.lon,
        "value": record.value,
        "ts": record.source_ts,
    });
    serde_json::to_vec(&wire).map_err(|e| CodecError::malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_valid_batch() {
        let body = br#"[
            {"id": "a", "lat": 10.0, "lon": 20.0, "value": 5, "ts": 100},
            {"id": "b", "lat": -45.5, "lon": 170.25, "value": {"speed": 80.0}, "ts": 101}
        ]"#;
        let batch = decode_batch(body, 1_000).expect("valid batch decodes");
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.skipped, 0);
        assert_eq!(batch.records[0].id, "a");
        assert_eq!(batch.records[0].source_ts, 100);
        assert_eq!(batch.records[0].fetched_at, 1_000);
        assert_eq!(batch.records[1].payload_f64("speed"), Some(80.0));
    }

    #[test]
    fn test_malformed_element_is_skipped_not_fatal() {
        let body = br#"[
            {"id": "a", "lat": 10.0, "lon": 20.0, "value": 5, "ts": 100},
            {"lat": 10.0, "lon": 20.0, "ts": 100},
            {"id": "c", "lat": 95.0, "lon": 20.0, "value": 1, "ts": 100},
            {"id": "d", "lat": 10.0, "lon": -200.0, "value": 1, "ts": 100},
            {"id": "e", "lat": "ten", "lon": 20.0, "value": 1, "ts": 100}
        ]"#;
        let batch = decode_batch(body, 0).expect("partial batch decodes");
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.skipped, 4);
        assert_eq!(batch.records[0].id, "a");
    }

    #[test]
    fn test_non_array_body_fails_whole() {
        let err = decode_batch(b"{\"not\": \"an array\"}", 0).unwrap_err();
        assert!(matches!(err, CodecError::MalformedPayload { .. }));

        let err = decode_batch(b"not json at all", 0).unwrap_err();
        assert!(matches!(err, CodecError::MalformedPayload { .. }));
    }

    #[test]
    fn test_missing_value_defaults_to_null() {
        let body = br#"[{"id": "a", "lat": 1.0, "lon": 2.0, "ts": 3}]"#;
        let batch = decode_batch(body, 0).expect("decodes");
        assert_eq!(batch.records[0].value, serde_json::Value::Null);
    }

    #[test]
    fn test_encode_roundtrips_through_decode() {
        let record = Record {
            id: "v-1".to_string(),
            lat: 47.5,
            lon: 19.0,
            value: serde_json::json!({"heading": 270.0}),
            source_ts: 42,
            fetched_at: 99,
        };
        let bytes = encode_record(&record).expect("encodes");
        let wrapped = format!("[{}]", String::from_utf8(bytes).expect("utf8"));
        let batch = decode_batch(wrapped.as_bytes(), 99).expect("decodes");
        assert_eq!(batch.records[0], record);
    }
}
