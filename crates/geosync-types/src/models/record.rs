//! Record and cache-entry models.

use serde::{Deserialize, Serialize};

use super::region::RegionKey;

/// A single geolocated record as merged into the local store.
///
/// The `value` payload is opaque to the engine; the originating service
/// attaches whatever structure it likes (vehicle telemetry, sensor readings).
/// `source_ts` is the authoritative service timestamp and is monotone
/// non-decreasing per identifier; a strictly newer `source_ts` always
/// supersedes an older one for the same `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    /// Stable unique identifier.
    pub id: String,
    /// WGS-84 latitude in degrees, within [-90, 90].
    pub lat: f64,
    /// WGS-84 longitude in degrees, within [-180, 180].
    pub lon: f64,
    /// Opaque payload from the service.
    pub value: serde_json::Value,
    /// Authoritative source timestamp (epoch seconds).
    pub source_ts: i64,
    /// When this record was last observed locally (epoch seconds).
    pub fetched_at: i64,
}

impl Record {
    /// Whether both coordinates are inside their WGS-84 ranges.
    pub fn coordinates_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }

    /// Read a numeric field out of the opaque payload.
    ///
    /// Convenience for map layers that render payload fields such as
    /// `speed` or `heading` without re-parsing the value themselves.
    pub fn payload_f64(&self, key: &str) -> Option<f64> {
        self.value.get(key).and_then(serde_json::Value::as_f64)
    }

    /// Read a string field out of the opaque payload.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(serde_json::Value::as_str)
    }

    /// Source timestamp as a UTC datetime, if representable.
    pub fn source_time(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp(self.source_ts, 0)
    }
}

/// A stored record plus the bookkeeping the store keeps alongside it.
///
/// Ownership of entries belongs exclusively to the store; readers always
/// receive owned clones, never references into store internals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    /// The record itself.
    pub record: Record,
    /// Freshness timestamp (epoch seconds); never ahead of the wall clock.
    pub fetched_at: i64,
    /// Tile this entry was fetched under, used for partial invalidation.
    pub region: RegionKey,
}

/// Opaque marker of the last successfully merged update for one region.
///
/// Monotone per region. The engine advances a cursor only after the records
/// it represents are durably committed, so a crash between merge and cursor
/// save re-fetches the same batch (harmless: merges are idempotent).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncCursor(pub String);

impl SyncCursor {
    pub fn new(marker: impl Into<String>) -> Self {
        Self(marker.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(lat: f64, lon: f64) -> Record {
        Record {
            id: "r-1".to_string(),
            lat,
            lon,
            value: serde_json::json!({"speed": 42.5, "label": "IC 714"}),
            source_ts: 100,
            fetched_at: 100,
        }
    }

    #[test]
    fn test_coordinate_ranges() {
        assert!(record(47.5, 19.0).coordinates_valid());
        assert!(record(-90.0, 180.0).coordinates_valid());
        assert!(!record(90.1, 0.0).coordinates_valid());
        assert!(!record(0.0, -180.5).coordinates_valid());
    }

    #[test]
    fn test_payload_accessors() {
        let r = record(47.5, 19.0);
        assert_eq!(r.payload_f64("speed"), Some(42.5));
        assert_eq!(r.payload_str("label"), Some("IC 714"));
        assert_eq!(r.payload_f64("missing"), None);
    }
}
