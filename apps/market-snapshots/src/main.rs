//! Market Snapshots Binary
//!
//! Starts the collection scheduler and the HTTP query API.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-snapshots
//! ```
//!
//! # Environment Variables
//!
//! - `MARKET_SNAPSHOTS_CONFIG`: config file path (default: config.yaml)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: market-snapshots)
//! - `RUST_LOG`: Log filter, overrides `observability.logging.level`

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_snapshots::application::ports::DocumentStore;
use market_snapshots::application::services::{
    CollectionService, Collector, QueryEngine, Scheduler, StorageEngine,
};
use market_snapshots::infrastructure::config::{Config, StorageBackend, load_config};
use market_snapshots::infrastructure::http::{AppState, create_router};
use market_snapshots::infrastructure::persistence::{InMemoryDocumentStore, TursoDocumentStore};
use market_snapshots::infrastructure::telemetry::{self, TelemetryConfig};
use market_snapshots::{Codec, init_metrics};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// How long shutdown waits for an in-flight cycle.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let config = load_config(None).context("failed to load configuration")?;

    // Initialize telemetry (tracing + optional OTLP export)
    let _telemetry_guard = telemetry::init_with_config(
        TelemetryConfig::from_env().with_logging(&config.observability.logging),
    );

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting market snapshots");

    let _metrics_handle = init_metrics();
    log_config(&config);

    match config.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage, data is lost on exit");
            run(config, Arc::new(InMemoryDocumentStore::new())).await
        }
        StorageBackend::Turso => {
            if let Some(parent) = std::path::Path::new(&config.storage.path).parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let store = TursoDocumentStore::open(&config.storage.path)
                .await
                .with_context(|| format!("failed to open database at {}", config.storage.path))?;
            run(config, Arc::new(store)).await
        }
    }
}

/// Wire the services over `store`, serve until a shutdown signal, then
/// drain the scheduler and close the store.
async fn run<S: DocumentStore + 'static>(config: Config, store: Arc<S>) -> anyhow::Result<()> {
    let collections = config.storage.collections();
    let sources = config.build_sources().context("failed to build sources")?;
    if sources.is_empty() {
        tracing::warn!("No sources configured, cycles will collect nothing");
    }

    let collector = Collector::new(
        StorageEngine::new(Arc::clone(&store), Codec::new()),
        collections.clone(),
        config.collector.to_collector_config(),
    );
    let service = Arc::new(CollectionService::new(collector, sources));
    let scheduler = Arc::new(Scheduler::new(
        config.scheduler.to_scheduler_config(),
        service,
    ));
    let query = Arc::new(QueryEngine::new(
        Arc::clone(&store),
        config.codec.codec(),
        collections,
        config.query.max_history_limit,
    ));

    if config.scheduler.enabled {
        scheduler.start();
    } else {
        tracing::info!("Scheduled collection disabled, use POST /collect");
    }

    let state = AppState::new(query, Arc::clone(&scheduler), Arc::clone(&store))
        .with_default_history_limit(config.query.default_history_limit);
    let app = create_router(state);

    let addr = config.server.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "HTTP server listening");

    let shutdown_token = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown_token.clone()));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_token.cancelled_owned())
        .await
        .context("HTTP server failed")?;

    scheduler.stop();
    if !scheduler.wait_idle(SHUTDOWN_TIMEOUT).await {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Collection cycle still running at shutdown"
        );
    }
    if let Err(e) = store.close().await {
        tracing::warn!(error = %e, "Failed to close store");
    }

    tracing::info!("Market snapshots stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &Config) {
    tracing::info!(
        http_port = config.server.http_port,
        backend = ?config.storage.backend,
        sources = config.sources.len(),
        interval_secs = config.scheduler.interval_secs,
        mode = %config.scheduler.mode,
        "Configuration loaded"
    );
    for source in &config.sources {
        tracing::debug!(source = %source.tag, kind = ?source.kind, "Source configured");
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
