#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Snapshots - Collection, Storage and Query Pipeline
//!
//! Periodically collects market snapshots (prices, funding rates, open
//! interest) from external data sources, stores them without losing
//! big-integer precision, and serves "latest per key" and "bounded history"
//! views.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Payload values, the storage codec and snapshot records
//!   - `value`: Tagged payload tree, including shared nodes
//!   - `codec`: Big-integer preserving encode/decode
//!   - `snapshot`: Snapshots, dedup keys, write modes, collection runs
//!
//! - **Application**: Port definitions and services
//!   - `ports`: `DocumentStore` and `MarketDataSource`
//!   - `services`: Storage engine, query engine, collector, scheduler
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `persistence`: In-memory and Turso document stores
//!   - `sources`: Static and JSON-over-HTTP sources
//!   - `http`: Query API, collection trigger, health, metrics
//!   - `config`, `telemetry`, `metrics`
//!
//! # Data Flow
//!
//! ```text
//! Scheduler ──► Collector ──► MarketDataSource (list, fetch details)
//!                   │
//!                   ▼
//!             StorageEngine ──► Codec::encode ──► DocumentStore
//!                                                      │
//! HTTP API ◄── QueryEngine ◄── Codec::decode ◄─────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - values, codec and snapshot types with no I/O.
pub mod domain;

/// Application layer - ports and services.
pub mod application;

/// Infrastructure layer - adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::codec::{Codec, CodecError, DecodeMode, Encoded, FieldDiagnostic};
pub use domain::shared::{FailureKind, Timestamp};
pub use domain::snapshot::{
    CollectionRun, DedupKey, DedupStrategy, Projection, Snapshot, WriteCounts, WriteMode,
};
pub use domain::value::{Value, ValueMap};

// Ports
pub use application::ports::{DocumentStore, MarketDataSource, SourceError, StorageError};

// Services
pub use application::services::{
    CollectionNames, CollectionService, Collector, CollectorConfig, CollectorError, CycleJob,
    CycleReport, QueryEngine, QueryError, RegisteredSource, Scheduler, SchedulerConfig,
    SchedulerError, StorageEngine, View,
};

// Adapters
pub use infrastructure::config::{Config, ConfigError, load_config};
pub use infrastructure::persistence::{InMemoryDocumentStore, TursoDocumentStore};
pub use infrastructure::sources::{HttpJsonSource, StaticMarketDataSource};

// Metrics and telemetry
pub use infrastructure::metrics::init_metrics;
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
