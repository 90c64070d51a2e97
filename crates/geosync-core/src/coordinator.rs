//! Per-region sync orchestration.
//!
//! Each region tile moves through `Idle -> Fetching -> Merging -> Idle`,
//! with `Failed` reachable from either active phase. At most one sync runs
//! per tile at a time: a second `ensure_fresh` for the same tile while one
//! is active attaches to the in-flight sync instead of issuing a duplicate
//! fetch. The merge step is all-or-nothing and the cursor is persisted only
//! after the batch commits, so every failure mode degrades to "re-fetch the
//! same batch later" (idempotent under newest-wins upserts).

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use geosync_types::{EngineConfig, RegionKey, StoreError, SyncCursor, SyncError, Viewport};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::EngineResult;
use crate::fetcher::RegionFetch;
use crate::store::{LocalStore, MergeStats};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Observable phase of one region sync.
///
/// `Idle` doubles as the success terminal: the watch channel belongs to a
/// single sync cycle, and a cycle that reaches `Idle` has fully merged.
/// `Failed` is terminal on the channel; the region itself is back to idle
/// (no in-flight entry) once the error is reported.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncPhase {
    Idle,
    Fetching,
    Merging,
    Failed(SyncError),
    Cancelled,
}

impl SyncPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Idle | Self::Failed(_) | Self::Cancelled)
    }
}

/// Non-blocking status report emitted after every sync cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Completed { region: RegionKey, applied: usize, superseded: usize, skipped: usize },
    Failed { region: RegionKey, error: SyncError },
    Cancelled { region: RegionKey },
}

/// Handle onto an in-flight (or already satisfied) sync.
///
/// Dropping the ticket detaches from the sync without cancelling it.
pub struct SyncTicket {
    rx: watch::Receiver<SyncPhase>,
}

impl SyncTicket {
    fn attached(rx: watch::Receiver<SyncPhase>) -> Self {
        Self { rx }
    }

    /// A ticket that is already terminal (fresh region, nothing to do).
    fn satisfied() -> Self {
        let (_tx, rx) = watch::channel(SyncPhase::Idle);
        Self { rx }
    }

    /// Current phase of the sync this ticket observes.
    pub fn phase(&self) -> SyncPhase {
        self.rx.borrow().clone()
    }

    /// Wait for the sync to reach a terminal phase.
    pub async fn wait(mut self) -> SyncPhase {
        loop {
            let current = self.rx.borrow_and_update().clone();
            if current.is_terminal() {
                return current;
            }
            if self.rx.changed().await.is_err() {
                return self.rx.borrow().clone();
            }
        }
    }
}

struct InFlight {
    tx: Arc<watch::Sender<SyncPhase>>,
    rx: watch::Receiver<SyncPhase>,
    task: JoinHandle<()>,
}

/// Orchestrates fetch -> decode -> merge -> persist cycles per region.
pub struct SyncCoordinator {
    store: Arc<LocalStore>,
    fetcher: Arc<dyn RegionFetch>,
    config: EngineConfig,
    in_flight: DashMap<RegionKey, InFlight>,
    last_success: DashMap<RegionKey, Instant>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncCoordinator {
    pub fn new(store: Arc<LocalStore>, fetcher: Arc<dyn RegionFetch>, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            fetcher,
            config,
            in_flight: DashMap::new(),
            last_success: DashMap::new(),
            events,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whether the region's most recent successful sync is inside the
    /// freshness window.
    pub fn is_fresh(&self, key: &RegionKey) -> bool {
        self.last_success
            .get(key)
            .map(|t| t.elapsed() < self.config.freshness())
            .unwrap_or(false)
    }

    /// Ensure the region is fresh, without blocking the caller.
    ///
    /// Fresh region: returns an already-terminal ticket, no fetch. Sync
    /// already in flight: attaches to it. Otherwise spawns the sync task.
    pub fn ensure_fresh(self: &Arc<Self>, key: RegionKey) -> SyncTicket {
        if self.is_fresh(&key) {
            return SyncTicket::satisfied();
        }

        match self.in_flight.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                debug!("Attaching to in-flight sync for region {}", key);
                SyncTicket::attached(entry.get().rx.clone())
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(SyncPhase::Fetching);
                let tx = Arc::new(tx);
                let coordinator = Arc::clone(self);
                let task_tx = Arc::clone(&tx);
                let task = tokio::spawn(async move {
                    coordinator.run_sync(key, task_tx).await;
                });
                entry.insert(InFlight { tx, rx: rx.clone(), task });
                SyncTicket::attached(rx)
            }
        }
    }

    /// Cancel an in-flight sync, allowed only while it is still fetching.
    ///
    /// A sync that reached `Merging` always persists its complete batch;
    /// merge and cursor advance run on a blocking thread as one unit that
    /// an abort cannot split. Returns whether a sync was cancelled.
    pub fn cancel(&self, key: &RegionKey) -> bool {
        let removed = self
            .in_flight
            .remove_if(key, |_, inflight| matches!(&*inflight.rx.borrow(), SyncPhase::Fetching));
        match removed {
            Some((region, inflight)) => {
                inflight.task.abort();
                let _ = inflight.tx.send(SyncPhase::Cancelled);
                let _ = self.events.send(SyncEvent::Cancelled { region });
                info!("Cancelled sync for region {}", region);
                true
            }
            None => false,
        }
    }

    /// Subscribe to sync outcome events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Sync outcome events as a stream.
    pub fn events(&self) -> BroadcastStream<SyncEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    /// Re-run `ensure_fresh` over a viewport's tiles on a fixed interval.
    ///
    /// The first pass runs immediately. The returned handle aborts the
    /// loop on drop.
    pub fn start_auto_refresh(self: &Arc<Self>, viewport: Viewport) -> AutoRefreshHandle {
        let coordinator = Arc::clone(self);
        let interval = self.config.auto_refresh_interval();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                for key in viewport.tiles(coordinator.config.tile_size_deg) {
                    let _ = coordinator.ensure_fresh(key);
                }
            }
        });
        AutoRefreshHandle { task }
    }

    async fn run_sync(self: Arc<Self>, key: RegionKey, phase: Arc<watch::Sender<SyncPhase>>) {
        let result = self.sync_region(key, &phase).await;
        if result.is_ok() {
            self.last_success.insert(key, Instant::now());
        }
        self.in_flight.remove(&key);
        match result {
            Ok(report) => {
                info!(
                    "Region {} synced: {} applied, {} superseded, {} skipped",
                    key, report.stats.applied, report.stats.superseded, report.skipped
                );
                let _ = phase.send(SyncPhase::Idle);
                let _ = self.events.send(SyncEvent::Completed {
                    region: key,
                    applied: report.stats.applied,
                    superseded: report.stats.superseded,
                    skipped: report.skipped,
                });
            }
            Err(e) => {
                let error = e.to_sync_error();
                warn!("Region {} sync failed: {}", key, error);
                let _ = phase.send(SyncPhase::Failed(error.clone()));
                let _ = self.events.send(SyncEvent::Failed { region: key, error });
            }
        }
    }

    async fn sync_region(
        &self,
        key: RegionKey,
        phase: &watch::Sender<SyncPhase>,
    ) -> EngineResult<SyncOutcome> {
        let region = key.bounds(self.config.tile_size_deg);

        let store = Arc::clone(&self.store);
        let cursor =
            tokio::task::spawn_blocking(move || store.load_cursor(&key)).await??;

        let batch = self.fetcher.fetch(&region, cursor.as_ref()).await?;

        let fetched_at = chrono::Utc::now().timestamp();
        let decoded = codec::decode_batch(&batch.body, fetched_at)?;
        if decoded.skipped > 0 {
            warn!("Region {}: skipped {} malformed records", key, decoded.skipped);
        }

        let _ = phase.send(SyncPhase::Merging);

        // Advance the cursor to the newest source timestamp merged, never
        // moving it backwards. An empty batch, or a replayed batch entirely
        // older than the stored cursor, leaves it untouched.
        let floor = cursor.as_ref().and_then(|c| c.as_str().parse::<i64>().ok());
        let next_cursor = decoded
            .records
            .iter()
            .map(|r| r.source_ts)
            .max()
            .filter(|ts| floor.map_or(true, |f| *ts > f))
            .map(|ts| SyncCursor::new(ts.to_string()));

        let store = Arc::clone(&self.store);
        let policy = self.config.eviction_policy();
        let records = decoded.records;
        let stats = tokio::task::spawn_blocking(move || -> Result<MergeStats, StoreError> {
            let stats = store.apply_batch(&records)?;
            if let Some(cursor) = next_cursor {
                store.save_cursor(&key, &cursor)?;
            }
            store.evict(&policy)?;
            Ok(stats)
        })
        .await??;

        Ok(SyncOutcome { stats, skipped: decoded.skipped })
    }
}

struct SyncOutcome {
    stats: MergeStats,
    skipped: usize,
}

/// Aborts the auto-refresh loop when dropped.
pub struct AutoRefreshHandle {
    task: JoinHandle<()>,
}

impl AutoRefreshHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for AutoRefreshHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::RawBatch;
    use async_trait::async_trait;
    use geosync_types::{FetchError, Region};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct MockFetcher {
        calls: AtomicUsize,
        delay: Duration,
        responses: std::sync::Mutex<Vec<Result<String, FetchError>>>,
        last_since: std::sync::Mutex<Option<String>>,
    }

    impl MockFetcher {
        fn returning(body: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                responses: std::sync::Mutex::new(vec![Ok(body.to_string())]),
                last_since: std::sync::Mutex::new(None),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn failing(error: FetchError) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                responses: std::sync::Mutex::new(vec![Err(error)]),
                last_since: std::sync::Mutex::new(None),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RegionFetch for MockFetcher {
        async fn fetch(
            &self,
            _region: &Region,
            since: Option<&SyncCursor>,
        ) -> Result<RawBatch, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_since.lock().unwrap() = since.map(|c| c.as_str().to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let responses = self.responses.lock().unwrap();
            match responses.last().cloned().unwrap_or(Ok("[]".to_string())) {
                Ok(body) => Ok(RawBatch { body: bytes::Bytes::from(body) }),
                Err(e) => Err(e),
            }
        }
    }

    fn coordinator_with(fetcher: Arc<MockFetcher>) -> Arc<SyncCoordinator> {
        let store = Arc::new(LocalStore::open_in_memory(1.0).expect("store opens"));
        let mut config = EngineConfig::new("http://unused.test");
        config.freshness_secs = 60;
        Arc::new(SyncCoordinator::new(store, fetcher, config))
    }

    const KEY: RegionKey = RegionKey { ix: 19, iy: 47 };

    #[tokio::test]
    async fn test_successful_sync_merges_and_advances_cursor() {
        let fetcher = Arc::new(MockFetcher::returning(
            r#"[{"id": "a", "lat": 47.5, "lon": 19.5, "value": 5, "ts": 100}]"#,
        ));
        let coordinator = coordinator_with(Arc::clone(&fetcher));

        let phase = coordinator.ensure_fresh(KEY).wait().await;
        assert_eq!(phase, SyncPhase::Idle);

        let entry = coordinator.store.get("a").unwrap().expect("record merged");
        assert_eq!(entry.record.source_ts, 100);
        let cursor = coordinator.store.load_cursor(&KEY).unwrap().expect("cursor saved");
        assert_eq!(cursor.as_str(), "100");
        assert!(coordinator.is_fresh(&KEY));
    }

    #[tokio::test]
    async fn test_concurrent_ensure_fresh_issues_one_fetch() {
        let fetcher = Arc::new(
            MockFetcher::returning("[]").with_delay(Duration::from_millis(50)),
        );
        let coordinator = coordinator_with(Arc::clone(&fetcher));

        let first = coordinator.ensure_fresh(KEY);
        let second = coordinator.ensure_fresh(KEY);
        let (a, b) = tokio::join!(first.wait(), second.wait());

        assert_eq!(a, SyncPhase::Idle);
        assert_eq!(b, SyncPhase::Idle);
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_fresh_region_skips_fetch() {
        let fetcher = Arc::new(MockFetcher::returning("[]"));
        let coordinator = coordinator_with(Arc::clone(&fetcher));

        coordinator.ensure_fresh(KEY).wait().await;
        assert_eq!(fetcher.call_count(), 1);

        // Within the freshness window: satisfied without another fetch.
        let phase = coordinator.ensure_fresh(KEY).wait().await;
        assert_eq!(phase, SyncPhase::Idle);
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_reports_and_leaves_cache_intact() {
        let fetcher = Arc::new(MockFetcher::failing(FetchError::Server { status: 404 }));
        let coordinator = coordinator_with(Arc::clone(&fetcher));
        let mut events = coordinator.subscribe();

        let phase = coordinator.ensure_fresh(KEY).wait().await;
        assert!(matches!(phase, SyncPhase::Failed(SyncError::Fetch(_))));
        assert!(!coordinator.is_fresh(&KEY));
        assert!(coordinator.store.is_empty().unwrap());

        let event = events.recv().await.expect("event emitted");
        assert!(matches!(event, SyncEvent::Failed { region, .. } if region == KEY));
    }

    #[tokio::test]
    async fn test_cursor_is_passed_on_next_sync() {
        let fetcher = Arc::new(MockFetcher::returning(
            r#"[{"id": "a", "lat": 47.5, "lon": 19.5, "value": 1, "ts": 100}]"#,
        ));
        let coordinator = coordinator_with(Arc::clone(&fetcher));

        coordinator.ensure_fresh(KEY).wait().await;
        assert_eq!(*fetcher.last_since.lock().unwrap(), None);

        // Force the region stale and sync again: the saved cursor rides along.
        coordinator.last_success.remove(&KEY);
        coordinator.ensure_fresh(KEY).wait().await;
        assert_eq!(fetcher.last_since.lock().unwrap().as_deref(), Some("100"));
    }

    #[tokio::test]
    async fn test_older_batch_does_not_regress_cursor() {
        let fetcher = Arc::new(MockFetcher::returning(
            r#"[{"id": "a", "lat": 47.5, "lon": 19.5, "value": 1, "ts": 100}]"#,
        ));
        let coordinator = coordinator_with(Arc::clone(&fetcher));
        coordinator.ensure_fresh(KEY).wait().await;

        // A replayed snapshot older than the stored cursor loses under
        // newest-wins and must not move the cursor backwards either.
        *fetcher.responses.lock().unwrap() = vec![Ok(
            r#"[{"id": "a", "lat": 47.5, "lon": 19.5, "value": 0, "ts": 50}]"#.to_string(),
        )];
        coordinator.last_success.remove(&KEY);
        coordinator.ensure_fresh(KEY).wait().await;

        let cursor = coordinator.store.load_cursor(&KEY).unwrap().expect("cursor saved");
        assert_eq!(cursor.as_str(), "100");
        let entry = coordinator.store.get("a").unwrap().expect("record present");
        assert_eq!(entry.record.source_ts, 100);
    }

    #[tokio::test]
    async fn test_empty_batch_leaves_cursor_untouched() {
        let fetcher = Arc::new(MockFetcher::returning("[]"));
        let coordinator = coordinator_with(Arc::clone(&fetcher));

        coordinator.ensure_fresh(KEY).wait().await;
        assert!(coordinator.store.load_cursor(&KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_during_fetch() {
        let fetcher =
            Arc::new(MockFetcher::returning("[]").with_delay(Duration::from_secs(30)));
        let coordinator = coordinator_with(Arc::clone(&fetcher));

        let ticket = coordinator.ensure_fresh(KEY);
        // Give the task a chance to enter the fetch.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(coordinator.cancel(&KEY));

        let phase = ticket.wait().await;
        assert_eq!(phase, SyncPhase::Cancelled);
        assert!(coordinator.store.is_empty().unwrap());
        assert!(!coordinator.is_fresh(&KEY));
    }

    #[tokio::test]
    async fn test_cancel_without_in_flight_sync_is_a_noop() {
        let fetcher = Arc::new(MockFetcher::returning("[]"));
        let coordinator = coordinator_with(fetcher);
        assert!(!coordinator.cancel(&KEY));
    }
}
