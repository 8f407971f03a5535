//! HTTP Controller (Driver Adapter)
//!
//! Axum router over the query engine and the scheduler.
//!
//! # Endpoints
//!
//! - `GET /snapshots/latest` - latest snapshot per key
//! - `GET /snapshots/{key}/history` - bounded history for one key
//! - `GET /snapshots/keys` - grouped listing of stored keys
//! - `GET /funding-rates/latest` - funding-rate view over the current collection
//! - `POST /collect` - run one collection cycle and wait for it
//! - `GET /health`, `/healthz`, `/readyz`, `/metrics`

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use super::request::{
    CollectParams, HistoryParams, KeysParams, LatestParams, SourceParams, parse_fields,
    parse_limit, parse_mode, parse_view, source_filter,
};
use super::response::{ApiError, ApiResponse, HealthResponse, HealthStatus};
use crate::application::ports::{DocumentStore, KeySummary};
use crate::application::services::{
    CycleJob, HistoryQuery, LatestQuery, QueryEngine, Scheduler, View,
};
use crate::domain::shared::Timestamp;
use crate::domain::snapshot::{CollectionRun, Projection, Snapshot, WriteMode};
use crate::domain::value::Value;
use crate::infrastructure::metrics::get_metrics_handle;

/// Default `limit` for history requests.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Application state shared across handlers.
pub struct AppState<S: DocumentStore, J: CycleJob> {
    /// Read side.
    pub query: Arc<QueryEngine<S>>,
    /// Collection scheduler, also used for manual triggers.
    pub scheduler: Arc<Scheduler<J>>,
    /// Store, for readiness checks.
    pub store: Arc<S>,
    /// History limit when a request gives none.
    pub default_history_limit: usize,
    /// Application version.
    pub version: String,
    /// Startup time.
    pub started_at: Instant,
}

impl<S: DocumentStore, J: CycleJob> AppState<S, J> {
    /// Create state with the default history limit.
    pub fn new(query: Arc<QueryEngine<S>>, scheduler: Arc<Scheduler<J>>, store: Arc<S>) -> Self {
        Self {
            query,
            scheduler,
            store,
            default_history_limit: DEFAULT_HISTORY_LIMIT,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
        }
    }

    /// Override the default history limit.
    #[must_use]
    pub const fn with_default_history_limit(mut self, limit: usize) -> Self {
        self.default_history_limit = limit;
        self
    }
}

impl<S: DocumentStore, J: CycleJob> Clone for AppState<S, J> {
    fn clone(&self) -> Self {
        Self {
            query: Arc::clone(&self.query),
            scheduler: Arc::clone(&self.scheduler),
            store: Arc::clone(&self.store),
            default_history_limit: self.default_history_limit,
            version: self.version.clone(),
            started_at: self.started_at,
        }
    }
}

/// Create the HTTP router with all endpoints.
pub fn create_router<S, J>(state: AppState<S, J>) -> Router
where
    S: DocumentStore + 'static,
    J: CycleJob,
{
    Router::new()
        .route("/snapshots/latest", get(latest_snapshots))
        .route("/snapshots/keys", get(list_keys))
        .route("/snapshots/{key}/history", get(snapshot_history))
        .route("/funding-rates/latest", get(latest_funding_rates))
        .route("/collect", post(collect))
        .route("/health", get(health))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(metrics))
        .with_state(state)
}

// ============================================
// Query Endpoints
// ============================================

async fn latest_snapshots<S, J>(
    State(state): State<AppState<S, J>>,
    Query(params): Query<LatestParams>,
) -> Result<ApiResponse<Vec<Value>>, ApiError>
where
    S: DocumentStore + 'static,
    J: CycleJob,
{
    let view = parse_view(params.view.as_deref(), View::Current)?;
    let projection = parse_fields(params.fields.as_deref());
    let query = LatestQuery {
        source: source_filter(params.source.as_ref()),
        entity_key: None,
    };

    let snapshots = state.query.latest(view, &query).await?;
    Ok(ApiResponse::ok(render(&snapshots, projection.as_ref())))
}

async fn snapshot_history<S, J>(
    State(state): State<AppState<S, J>>,
    Path(key): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<ApiResponse<Vec<Value>>, ApiError>
where
    S: DocumentStore + 'static,
    J: CycleJob,
{
    let view = parse_view(params.view.as_deref(), View::History)?;
    let limit = parse_limit(params.limit.as_deref(), state.default_history_limit)?;
    let projection = parse_fields(params.fields.as_deref());
    let query = HistoryQuery {
        entity_key: key,
        source: source_filter(params.source.as_ref()),
        limit,
    };

    let snapshots = state.query.history(view, &query).await?;
    Ok(ApiResponse::ok(render(&snapshots, projection.as_ref())))
}

async fn list_keys<S, J>(
    State(state): State<AppState<S, J>>,
    Query(params): Query<KeysParams>,
) -> Result<ApiResponse<Vec<KeySummary>>, ApiError>
where
    S: DocumentStore + 'static,
    J: CycleJob,
{
    let view = parse_view(params.view.as_deref(), View::Current)?;
    let source = source_filter(params.source.as_ref());

    let keys = state.query.keys(view, source.as_deref()).await?;
    Ok(ApiResponse::ok(keys))
}

async fn latest_funding_rates<S, J>(
    State(state): State<AppState<S, J>>,
    Query(params): Query<SourceParams>,
) -> Result<ApiResponse<Vec<Value>>, ApiError>
where
    S: DocumentStore + 'static,
    J: CycleJob,
{
    let query = LatestQuery {
        source: source_filter(params.source.as_ref()),
        entity_key: None,
    };

    let snapshots = state.query.latest(View::Current, &query).await?;
    Ok(ApiResponse::ok(Projection::funding_rates().apply_all(&snapshots)))
}

fn render(snapshots: &[Snapshot], projection: Option<&Projection>) -> Vec<Value> {
    projection.map_or_else(
        || snapshots.iter().map(Snapshot::to_document).collect(),
        |p| p.apply_all(snapshots),
    )
}

// ============================================
// Collection Trigger
// ============================================

async fn collect<S, J>(
    State(state): State<AppState<S, J>>,
    Query(params): Query<CollectParams>,
) -> Result<ApiResponse<Vec<CollectionRun>>, ApiError>
where
    S: DocumentStore + 'static,
    J: CycleJob,
{
    let mode = parse_mode(params.mode.as_deref(), WriteMode::Upsert)?;

    let report = state.scheduler.trigger(mode).await?;
    for failure in &report.failures {
        tracing::warn!(
            source = %failure.source_tag,
            kind = failure.kind.as_label(),
            error = %failure.message,
            "Source failed during triggered cycle"
        );
    }
    Ok(ApiResponse::ok(report.runs))
}

// ============================================
// Health and Metrics
// ============================================

async fn health<S, J>(State(state): State<AppState<S, J>>) -> impl IntoResponse
where
    S: DocumentStore + 'static,
    J: CycleJob,
{
    let last_run = state.scheduler.last_run();
    let status = match &last_run {
        Some(run) if !run.success || run.failures > 0 => HealthStatus::Degraded,
        _ => HealthStatus::Healthy,
    };

    Json(HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Timestamp::now(),
        scheduler: state.scheduler.state(),
        skipped_ticks: state.scheduler.skipped_ticks(),
        last_run,
    })
}

async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness<S, J>(State(state): State<AppState<S, J>>) -> impl IntoResponse
where
    S: DocumentStore + 'static,
    J: CycleJob,
{
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, "READY"),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }
}

async fn metrics() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::{
        CollectionNames, CollectionService, Collector, CollectorConfig, RegisteredSource,
        SchedulerConfig, StorageEngine,
    };
    use crate::domain::codec::Codec;
    use crate::domain::snapshot::DedupStrategy;
    use crate::infrastructure::persistence::InMemoryDocumentStore;
    use crate::infrastructure::sources::StaticMarketDataSource;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    type TestState = AppState<InMemoryDocumentStore, CollectionService<InMemoryDocumentStore>>;

    fn state(source: StaticMarketDataSource) -> TestState {
        let store = Arc::new(InMemoryDocumentStore::new());
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
            Codec::new(),
            CollectionNames::default(),
            QueryEngine::<InMemoryDocumentStore>::DEFAULT_MAX_HISTORY_LIMIT,
        ));
        AppState::new(query, scheduler, store)
    }

    async fn call(router: Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn empty_store_returns_empty_data() {
        let router = create_router(state(StaticMarketDataSource::new("drift")));
        let (status, body) = call(router, "GET", "/snapshots/latest").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true, "data": []}));
    }

    #[tokio::test]
    async fn collect_then_query_latest() {
        let state = state(
            StaticMarketDataSource::new("drift")
                .with_entity("SOL-PERP", json!({"fundingRate": 12, "markPrice": 101})),
        );

        let (status, body) = call(create_router(state.clone()), "POST", "/collect?mode=upsert").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["sourceTag"], "drift");

        let (_, body) = call(create_router(state.clone()), "GET", "/snapshots/latest?fields=markPrice").await;
        let row = &body["data"][0];
        assert_eq!(row["entityKey"], "SOL-PERP");
        assert_eq!(row["markPrice"], 101);
        assert!(row.get("fundingRate").is_none());

        let (_, body) = call(create_router(state), "GET", "/funding-rates/latest?source=drift").await;
        assert_eq!(body["data"][0]["fundingRate"], 12);
    }

    #[tokio::test]
    async fn invalid_mode_is_bad_request() {
        let router = create_router(state(StaticMarketDataSource::new("drift")));
        let (status, body) = call(router, "POST", "/collect?mode=sideways").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("sideways"));
    }

    #[tokio::test]
    async fn empty_fetch_is_bad_gateway() {
        let router = create_router(state(StaticMarketDataSource::new("drift")));
        let (status, body) = call(router, "POST", "/collect").await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn unavailable_store_fails_readiness_and_queries() {
        let state = state(StaticMarketDataSource::new("drift"));
        state.store.set_unavailable(true);

        let response = create_router(state.clone())
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) = call(create_router(state), "GET", "/snapshots/keys").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn health_reports_scheduler_state() {
        let router = create_router(state(StaticMarketDataSource::new("drift")));
        let (status, body) = call(router, "GET", "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["scheduler"], "idle");
    }
}
