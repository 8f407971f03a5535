//! HTTP API integration tests.
//!
//! Drives the full router over a Turso store: collect, then read back the
//! latest, history and keys views.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value as Json, json};
use tower::ServiceExt;

use market_snapshots::application::ports::{DocumentStore, NewDocument};
use market_snapshots::infrastructure::http::{AppState, create_router};
use market_snapshots::{
    Codec, CollectionNames, CollectionService, Collector, CollectorConfig, DedupStrategy,
    QueryEngine, RegisteredSource, Scheduler, SchedulerConfig, StaticMarketDataSource,
    StorageEngine, Timestamp, TursoDocumentStore,
};

// =============================================================================
// Harness
// =============================================================================

type Service = CollectionService<TursoDocumentStore>;

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<TursoDocumentStore>,
    state: AppState<TursoDocumentStore, Service>,
}

impl Harness {
    async fn new(source: StaticMarketDataSource, codec: Codec) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api.db");
        let store = Arc::new(TursoDocumentStore::open(path.to_str().unwrap()).await.unwrap());

        let collector = Collector::new(
            StorageEngine::new(Arc::clone(&store), Codec::new()),
            CollectionNames::default(),
            CollectorConfig::default(),
        );
        let service = CollectionService::new(
            collector,
            vec![RegisteredSource::new(Arc::new(source), DedupStrategy::price_snapshot())],
        );
        let scheduler = Arc::new(Scheduler::new(SchedulerConfig::default(), Arc::new(service)));
        let query = Arc::new(QueryEngine::new(
            Arc::clone(&store),
            codec,
            CollectionNames::default(),
            100,
        ));

        Self {
            _dir: dir,
            state: AppState::new(query, scheduler, Arc::clone(&store)),
            store,
        }
    }

    fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    async fn send(&self, method: &str, uri: &str) -> (StatusCode, Json) {
        let response = self
            .router()
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Json::Null))
    }
}

fn venue() -> StaticMarketDataSource {
    StaticMarketDataSource::new("venue")
        .with_entity(
            "SOL-PERP",
            json!({"markPrice": 101, "fundingRate": 3, "openInterest": 18_446_744_073_709_551_615_u64}),
        )
        .with_entity("BTC-PERP", json!({"markPrice": 64_000, "fundingRate": -1}))
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn collect_returns_run_summaries() {
    let h = Harness::new(venue(), Codec::new()).await;

    let (status, body) = h.send("POST", "/collect?mode=historical").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let run = &body["data"][0];
    assert_eq!(run["sourceTag"], "venue");
    assert_eq!(run["mode"], "historical");
    assert_eq!(run["counts"]["inserted"], 2);
}

#[tokio::test]
async fn latest_renders_big_integers_as_strings() {
    let h = Harness::new(venue(), Codec::new()).await;
    h.send("POST", "/collect").await;

    let (status, body) = h.send("GET", "/snapshots/latest?source=venue").await;

    assert_eq!(status, StatusCode::OK);
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["entityKey"], "BTC-PERP");
    assert_eq!(rows[1]["openInterest"], "18446744073709551615");
}

#[tokio::test]
async fn history_defaults_to_history_view_and_honors_limit() {
    let h = Harness::new(venue(), Codec::new()).await;
    for _ in 0..3 {
        let (status, _) = h.send("POST", "/collect?mode=history").await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, body) = h.send("GET", "/snapshots/SOL-PERP/history?limit=2").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (_, body) = h.send("GET", "/snapshots/SOL-PERP/history?view=current").await;
    assert_eq!(body["data"], json!([]));

    let (_, body) = h.send("GET", "/snapshots/keys?view=history").await;
    assert_eq!(body["data"][1]["documents"], 3);
}

#[tokio::test]
async fn invalid_parameters_are_rejected_with_envelope() {
    let h = Harness::new(venue(), Codec::new()).await;

    let (status, body) = h.send("GET", "/snapshots/latest?view=sideways").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = h.send("GET", "/snapshots/SOL-PERP/history?limit=many").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_big_integer_is_zero_by_default_and_500_when_strict() {
    let document = NewDocument {
        entity_key: "SOL-PERP".to_string(),
        source_tag: "venue".to_string(),
        captured_at: Timestamp::parse("2026-03-01T00:00:00Z").unwrap(),
        body: json!({
            "entityKey": "SOL-PERP",
            "sourceTag": "venue",
            "capturedAt": "2026-03-01T00:00:00.000Z",
            "openInterest": {"kind": "bigint", "digits": "12x"}
        }),
    };

    let lenient = Harness::new(venue(), Codec::new()).await;
    lenient.store.bulk_insert("snapshots", vec![document.clone()]).await.unwrap();
    let (status, body) = lenient.send("GET", "/snapshots/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["openInterest"], "0");

    let strict = Harness::new(venue(), Codec::strict()).await;
    strict.store.bulk_insert("snapshots", vec![document]).await.unwrap();
    let (status, body) = strict.send("GET", "/snapshots/latest").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("12x"));
}

#[tokio::test]
async fn liveness_and_readiness() {
    let h = Harness::new(venue(), Codec::new()).await;

    let response = h
        .router()
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = h
        .router()
        .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    h.store.close().await.unwrap();
    let response = h
        .router()
        .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
