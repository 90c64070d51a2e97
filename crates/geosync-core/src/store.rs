//! SQLite-based record and cursor persistence.
//!
//! One `LocalStore` instance owns the durable state: a `records` table keyed
//! by identifier and a per-region `cursors` table. The instance is passed
//! explicitly to the coordinator and provider at construction; lifecycle
//! belongs to the application shell.
//!
//! Atomicity model: `apply_batch` runs all upserts of one batch inside a
//! single transaction (a crash mid-batch leaves no partial record visible),
//! and `save_cursor` is a separate single-row write performed only after the
//! batch committed. A crash between the two re-fetches the same batch on the
//! next cycle; newest-wins upserts make the re-merge a no-op.

use geosync_types::{CacheEntry, EvictionPolicy, Record, Region, RegionKey, StoreError, SyncCursor};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Result of one upsert against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The record was inserted or replaced an older one.
    Applied,
    /// An equal-or-newer record was already present; no-op.
    Superseded,
}

/// Counts from merging one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub applied: usize,
    pub superseded: usize,
}

/// Durable key-value store for records plus per-region sync cursors.
pub struct LocalStore {
    conn: Mutex<Connection>,
    tile_size_deg: f64,
}

impl LocalStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: impl AsRef<Path>, tile_size_deg: f64) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(to_store_err)?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(to_store_err)?;
        conn.pragma_update(None, "synchronous", "NORMAL").map_err(to_store_err)?;
        let store = Self { conn: Mutex::new(conn), tile_size_deg };
        store.init_schema()?;
        Ok(store)
    }

    /// Open the store at its default on-disk location.
    ///
    /// Resolves `GEOSYNC_DATA_DIR` or `~/.geosync` and creates the
    /// directory on first use.
    pub fn open_default(tile_size_deg: f64) -> Result<Self, StoreError> {
        let path = crate::paths::default_db_path().map_err(StoreError::persistence)?;
        Self::open(path, tile_size_deg)
    }

    /// Open an in-memory store. Test and throwaway use only; nothing
    /// survives drop.
    pub fn open_in_memory(tile_size_deg: f64) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(to_store_err)?;
        let store = Self { conn: Mutex::new(conn), tile_size_deg };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                lat REAL NOT NULL,
                lon REAL NOT NULL,
                value TEXT NOT NULL,
                source_ts INTEGER NOT NULL,
                fetched_at INTEGER NOT NULL,
                region_x INTEGER NOT NULL,
                region_y INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_records_fetched_at ON records (fetched_at);
            CREATE INDEX IF NOT EXISTS idx_records_region ON records (region_x, region_y);
            CREATE TABLE IF NOT EXISTS cursors (
                region_x INTEGER NOT NULL,
                region_y INTEGER NOT NULL,
                cursor TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (region_x, region_y)
            );",
        )
        .map_err(to_store_err)?;
        debug!("Store schema initialized");
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::persistence("store lock poisoned"))
    }

    /// Look up one entry by identifier.
    ///
    /// A row whose payload is no longer valid JSON surfaces as
    /// `StoreError::Corrupt` instead of a silently degraded record.
    pub fn get(&self, id: &str) -> Result<Option<CacheEntry>, StoreError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT id, lat, lon, value, source_ts, fetched_at, region_x, region_y
                 FROM records WHERE id = ?1",
                params![id],
                row_to_raw,
            )
            .optional()
            .map_err(to_store_err)?;
        raw.map(raw_to_entry).transpose()
    }

    /// All entries whose coordinates fall inside the region.
    ///
    /// The result is a finite snapshot; iterating it is restartable and
    /// stable per identifier. No ordering is guaranteed. Corrupt rows are
    /// logged and skipped so one bad payload cannot take down the snapshot.
    pub fn get_region(&self, region: &Region) -> Result<Vec<CacheEntry>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, lat, lon, value, source_ts, fetched_at, region_x, region_y
                 FROM records
                 WHERE lat >= ?1 AND lat <= ?2 AND lon >= ?3 AND lon <= ?4",
            )
            .map_err(to_store_err)?;
        let rows = stmt
            .query_map(
                params![region.min_lat, region.max_lat, region.min_lon, region.max_lon],
                row_to_raw,
            )
            .map_err(to_store_err)?;
        let mut entries = Vec::new();
        for raw in rows {
            match raw.map_err(to_store_err).and_then(raw_to_entry) {
                Ok(entry) => entries.push(entry),
                Err(StoreError::Corrupt { key, message }) => {
                    warn!("Skipping corrupt entry {}: {}", key, message);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(entries)
    }

    /// Insert-or-update one record, resolved by newest-source-timestamp-wins.
    ///
    /// Applied iff no record exists under the id or the incoming
    /// `source_ts` is strictly greater; equal or older timestamps are a
    /// no-op so re-merging an already-seen batch cannot regress state.
    pub fn upsert(&self, record: &Record) -> Result<UpsertOutcome, StoreError> {
        let conn = self.lock()?;
        upsert_in(&conn, record, self.tile_size_deg)
    }

    /// Merge a whole batch transactionally.
    ///
    /// Either every upsert of the batch commits or none does; a crash
    /// mid-batch leaves the store at its pre-batch state.
    pub fn apply_batch(&self, records: &[Record]) -> Result<MergeStats, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(to_store_err)?;
        let mut stats = MergeStats::default();
        for record in records {
            match upsert_in(&tx, record, self.tile_size_deg)? {
                UpsertOutcome::Applied => stats.applied += 1,
                UpsertOutcome::Superseded => stats.superseded += 1,
            }
        }
        tx.commit().map_err(to_store_err)?;
        debug!("Batch merged: {} applied, {} superseded", stats.applied, stats.superseded);
        Ok(stats)
    }

    /// Remove entries beyond the capacity and age limits.
    ///
    /// Capacity evicts least-recently-fetched first; age drops anything
    /// whose freshness timestamp predates `now - ttl`. Returns the number
    /// of entries removed.
    pub fn evict(&self, policy: &EvictionPolicy) -> Result<usize, StoreError> {
        let now = chrono::Utc::now().timestamp();
        let cutoff = now - policy.ttl.as_secs() as i64;
        let conn = self.lock()?;

        let mut removed = conn
            .execute("DELETE FROM records WHERE fetched_at < ?1", params![cutoff])
            .map_err(to_store_err)?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
            .map_err(to_store_err)?;
        let excess = count - policy.max_entries as i64;
        if excess > 0 {
            removed += conn
                .execute(
                    "DELETE FROM records WHERE id IN (
                        SELECT id FROM records ORDER BY fetched_at ASC, id ASC LIMIT ?1
                    )",
                    params![excess],
                )
                .map_err(to_store_err)?;
        }

        if removed > 0 {
            info!("Evicted {} entries (capacity {}, ttl {:?})", removed, policy.max_entries, policy.ttl);
        }
        Ok(removed)
    }

    /// Drop every entry tagged with the given region tile.
    pub fn invalidate_region(&self, key: &RegionKey) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let removed = conn
            .execute(
                "DELETE FROM records WHERE region_x = ?1 AND region_y = ?2",
                params![key.ix, key.iy],
            )
            .map_err(to_store_err)?;
        debug!("Invalidated {} entries for region {}", removed, key);
        Ok(removed)
    }

    /// Load the persisted cursor for a region, if any.
    pub fn load_cursor(&self, key: &RegionKey) -> Result<Option<SyncCursor>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT cursor FROM cursors WHERE region_x = ?1 AND region_y = ?2",
            params![key.ix, key.iy],
            |row| row.get::<_, String>(0).map(SyncCursor),
        )
        .optional()
        .map_err(to_store_err)
    }

    /// Persist the cursor for a region. Single-row atomic write.
    ///
    /// Call only after the records the cursor represents have committed.
    pub fn save_cursor(&self, key: &RegionKey, cursor: &SyncCursor) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO cursors (region_x, region_y, cursor, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(region_x, region_y) DO UPDATE SET
                cursor = excluded.cursor,
                updated_at = excluded.updated_at",
            params![key.ix, key.iy, cursor.as_str(), now],
        )
        .map_err(to_store_err)?;
        Ok(())
    }

    /// Total stored records.
    pub fn len(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
            .map_err(to_store_err)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

fn to_store_err(e: rusqlite::Error) -> StoreError {
    StoreError::persistence(e.to_string())
}

/// Upsert against any connection-like handle (plain or transactional).
fn upsert_in(
    conn: &Connection,
    record: &Record,
    tile_size_deg: f64,
) -> Result<UpsertOutcome, StoreError> {
    let value = serde_json::to_string(&record.value)
        .map_err(|e| StoreError::persistence(format!("payload serialization: {}", e)))?;
    let key = RegionKey::for_point(record.lat, record.lon, tile_size_deg);
    let changed = conn
        .execute(
            "INSERT INTO records (id, lat, lon, value, source_ts, fetched_at, region_x, region_y)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                lat = excluded.lat,
                lon = excluded.lon,
                value = excluded.value,
                source_ts = excluded.source_ts,
                fetched_at = excluded.fetched_at,
                region_x = excluded.region_x,
                region_y = excluded.region_y
             WHERE excluded.source_ts > records.source_ts",
            params![
                record.id,
                record.lat,
                record.lon,
                value,
                record.source_ts,
                record.fetched_at,
                key.ix,
                key.iy,
            ],
        )
        .map_err(to_store_err)?;
    if changed > 0 {
        Ok(UpsertOutcome::Applied)
    } else {
        Ok(UpsertOutcome::Superseded)
    }
}

struct RawEntry {
    id: String,
    lat: f64,
    lon: f64,
    value_text: String,
    source_ts: i64,
    fetched_at: i64,
    region: RegionKey,
}

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        id: row.get(0)?,
        lat: row.get(1)?,
        lon: row.get(2)?,
        value_text: row.get(3)?,
        source_ts: row.get(4)?,
        fetched_at: row.get(5)?,
        region: RegionKey { ix: row.get(6)?, iy: row.get(7)? },
    })
}

fn raw_to_entry(raw: RawEntry) -> Result<CacheEntry, StoreError> {
    let value = serde_json::from_str(&raw.value_text).map_err(|e| StoreError::Corrupt {
        key: raw.id.clone(),
        message: format!("payload is not valid JSON: {}", e),
    })?;
    Ok(CacheEntry {
        record: Record {
            id: raw.id,
            lat: raw.lat,
            lon: raw.lon,
            value,
            source_ts: raw.source_ts,
            fetched_at: raw.fetched_at,
        },
        fetched_at: raw.fetched_at,
        region: raw.region,
    })
}
