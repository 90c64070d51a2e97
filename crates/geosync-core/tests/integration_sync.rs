#![allow(clippy::expect_used, reason = "integration test — panics are the assertion mechanism")]

use std::sync::Arc;

use geosync_core::coordinator::{SyncCoordinator, SyncPhase};
use geosync_core::fetcher::HttpFetcher;
use geosync_core::provider::DataProvider;
use geosync_core::store::LocalStore;
use geosync_types::{EngineConfig, RegionKey, Viewport};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn record_batch(ts: i64, value: i64) -> serde_json::Value {
    serde_json::json!([
        {"id": "a", "lat": 10.0, "lon": 20.0, "value": value, "ts": ts}
    ])
}

struct Engine {
    coordinator: Arc<SyncCoordinator>,
    provider: DataProvider,
}

fn engine_for(server: &MockServer) -> Engine {
    geosync_core::logging::init();
    let mut config = EngineConfig::new(format!("{}/records", server.uri()));
    // Every query counts as stale so each cycle in the test re-syncs.
    config.freshness_secs = 0;
    config.max_attempts = 2;
    config.backoff_base_ms = 1;
    config.backoff_cap_ms = 5;

    let store = Arc::new(LocalStore::open_in_memory(config.tile_size_deg).expect("store opens"));
    let fetcher = Arc::new(HttpFetcher::new(&config).expect("fetcher builds"));
    let coordinator = Arc::new(SyncCoordinator::new(Arc::clone(&store), fetcher, config));
    let provider = DataProvider::new(store, Arc::clone(&coordinator));
    Engine { coordinator, provider }
}

const TILE: RegionKey = RegionKey { ix: 20, iy: 10 };

fn viewport() -> Viewport {
    Viewport::new(9.5, 19.5, 10.5, 20.5)
}

#[tokio::test]
async fn test_end_to_end_sync_and_query() {
    let server = MockServer::start().await;
    let engine = engine_for(&server);

    {
        let _guard = Mock::given(method("GET"))
            .and(path("/records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(record_batch(100, 5)))
            .mount_as_scoped(&server)
            .await;

        let phase = engine.coordinator.ensure_fresh(TILE).wait().await;
        assert_eq!(phase, SyncPhase::Idle, "first sync should succeed");

        let records = engine.provider.query(&viewport()).expect("query succeeds");
        assert_eq!(records.len(), 1, "exactly one record for the viewport");
        assert_eq!(records[0].id, "a");
        assert_eq!(records[0].value, serde_json::json!(5));
        assert_eq!(records[0].source_ts, 100);

        // Let the background refreshes fired by the query settle against
        // this mock before it unmounts.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    {
        // The service regresses to an older snapshot of the same record;
        // newest-wins keeps the stored state at ts 100.
        let _guard = Mock::given(method("GET"))
            .and(path("/records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(record_batch(50, 99)))
            .mount_as_scoped(&server)
            .await;

        let phase = engine.coordinator.ensure_fresh(TILE).wait().await;
        assert_eq!(phase, SyncPhase::Idle, "older-batch sync still completes");

        let records = engine.provider.query(&viewport()).expect("query succeeds");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_ts, 100, "older snapshot must not supersede");
        assert_eq!(records[0].value, serde_json::json!(5));
    }
}

#[tokio::test]
async fn test_offline_service_degrades_to_cached_data() {
    let server = MockServer::start().await;
    let engine = engine_for(&server);

    {
        let _guard = Mock::given(method("GET"))
            .and(path("/records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(record_batch(100, 5)))
            .mount_as_scoped(&server)
            .await;
        let phase = engine.coordinator.ensure_fresh(TILE).wait().await;
        assert_eq!(phase, SyncPhase::Idle);
    }

    {
        // Service goes dark: syncs fail, the read path keeps serving cache.
        let _guard = Mock::given(method("GET"))
            .and(path("/records"))
            .respond_with(ResponseTemplate::new(503))
            .mount_as_scoped(&server)
            .await;

        let phase = engine.coordinator.ensure_fresh(TILE).wait().await;
        assert!(matches!(phase, SyncPhase::Failed(_)), "sync reports failure");

        let records = engine.provider.query(&viewport()).expect("read path must not fail");
        assert_eq!(records.len(), 1, "stale cache still served offline");
        assert_eq!(records[0].id, "a");
    }
}

#[tokio::test]
async fn test_malformed_records_are_skipped_not_fatal() {
    let server = MockServer::start().await;
    let engine = engine_for(&server);

    let body = serde_json::json!([
        {"id": "good", "lat": 10.2, "lon": 20.2, "value": 1, "ts": 10},
        {"id": "bad-lat", "lat": 123.0, "lon": 20.0, "value": 1, "ts": 10},
        {"lon": 20.0, "ts": 10}
    ]);
    Mock::given(method("GET"))
        .and(path("/records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let phase = engine.coordinator.ensure_fresh(TILE).wait().await;
    assert_eq!(phase, SyncPhase::Idle, "batch with bad elements still merges");

    let records = engine.provider.query(&viewport()).expect("query succeeds");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "good");
}
